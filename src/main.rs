//! postureview: run one portfolio analysis against the backend and reveal it.
//!
//! Usage:
//!   postureview [--url URL] [--scenario ID] [--symbol SYM] [--json]
//!               [--transcript PATH] [--health] [--interactive]

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use postureview::client::{Backend, HttpBackend, RunRequest, KNOWN_SCENARIOS};
use postureview::config::Config;
use postureview::logging::{log, obj, v_str, Domain, Level};
use postureview::sequencer::{RunOutcome, RunSequencer, TriggerOutcome};
use postureview::sink::{JsonlSink, PresentationSink, TeeSink, TerminalSink};

const USAGE: &str = "usage: postureview [--url URL] [--scenario ID] [--symbol SYM] [--json] \
[--transcript PATH] [--health] [--interactive]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    url: Option<String>,
    scenario: Option<String>,
    symbol: Option<String>,
    json: bool,
    transcript: Option<PathBuf>,
    health: bool,
    interactive: bool,
    help: bool,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut args = Args::default();
    let mut it = raw.into_iter();
    while let Some(flag) = it.next() {
        let mut value = |name: &str| {
            it.next()
                .ok_or_else(|| anyhow!("{} needs a value\n{}", name, USAGE))
        };
        match flag.as_str() {
            "--url" => args.url = Some(value("--url")?),
            "--scenario" => args.scenario = Some(value("--scenario")?),
            "--symbol" => args.symbol = Some(value("--symbol")?),
            "--transcript" => args.transcript = Some(PathBuf::from(value("--transcript")?)),
            "--json" => args.json = true,
            "--health" => args.health = true,
            "--interactive" | "-i" => args.interactive = true,
            "--help" | "-h" => args.help = true,
            other => bail!("unknown argument: {}\n{}", other, USAGE),
        }
    }
    Ok(args)
}

fn build_sink(args: &Args) -> Result<Box<dyn PresentationSink + Send + Sync>> {
    let primary: Box<dyn PresentationSink + Send + Sync> = if args.json {
        Box::new(JsonlSink::new(std::io::stdout()))
    } else {
        Box::new(TerminalSink::new())
    };
    let Some(path) = &args.transcript else {
        return Ok(primary);
    };
    let file = File::create(path)
        .with_context(|| format!("cannot create transcript {}", path.display()))?;
    Ok(Box::new(TeeSink::new(vec![
        primary,
        Box::new(JsonlSink::new(BufWriter::new(file))),
    ])))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        println!("{}", USAGE);
        println!("scenarios: NORMAL, {}", KNOWN_SCENARIOS.join(", "));
        return Ok(());
    }

    let mut cfg = Config::from_env();
    if let Some(url) = &args.url {
        cfg = cfg.with_backend_url(url.clone());
    }
    let backend = HttpBackend::new(&cfg)?;
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("backend_url", v_str(&cfg.backend_url)),
            ("mode", v_str(if args.interactive { "interactive" } else { "single" })),
        ]),
    );

    if args.health {
        let health = backend
            .health()
            .await
            .map_err(|e| anyhow!("health check failed: {}", e))?;
        println!(
            "{} {}",
            health.status,
            health.service.as_deref().unwrap_or("(unnamed service)")
        );
        return Ok(());
    }

    let request = RunRequest::new(args.scenario.as_deref(), args.symbol.as_deref());
    if !request.is_known_scenario() {
        log(
            Level::Warn,
            Domain::System,
            "unknown_scenario",
            obj(&[(
                "scenario",
                v_str(request.scenario.as_deref().unwrap_or_default()),
            )]),
        );
    }

    let sequencer = Arc::new(RunSequencer::new(
        Box::new(backend),
        build_sink(&args)?,
        request,
    ));

    if args.interactive {
        return interactive(sequencer).await;
    }

    match sequencer.trigger().await {
        TriggerOutcome::Completed(report) => match report.outcome {
            RunOutcome::Revealed { .. } => Ok(()),
            RunOutcome::Failed(err) => Err(anyhow!(err)),
        },
        TriggerOutcome::Ignored { live_run_id } => bail!("run {} already in progress", live_run_id),
    }
}

/// Line-oriented control: `run`, `toggle N`, `status`, `quit`.
async fn interactive(sequencer: Arc<RunSequencer>) -> Result<()> {
    eprintln!("commands: run | toggle N | status | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut runs: Vec<JoinHandle<()>> = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("run") | Some("r") => {
                runs.retain(|h| !h.is_finished());
                let seq = Arc::clone(&sequencer);
                runs.push(tokio::spawn(async move {
                    if let TriggerOutcome::Ignored { live_run_id } = seq.trigger().await {
                        eprintln!("run {} still in progress", live_run_id);
                    }
                }));
            }
            Some("toggle") | Some("t") => match words.next().map(str::parse::<usize>) {
                Some(Ok(index)) => {
                    if sequencer.toggle_decision(index).is_none() {
                        eprintln!("no decision {} on screen", index);
                    }
                }
                _ => eprintln!("usage: toggle N"),
            },
            Some("status") | Some("s") => {
                let live = sequencer.live_run();
                eprintln!(
                    "status={} live={} shown={}",
                    sequencer.status(),
                    live.map(|c| c.run_id).unwrap_or_else(|| "-".to_string()),
                    sequencer.displayed_identity().unwrap_or_else(|| "-".to_string()),
                );
            }
            Some("quit") | Some("q") | Some("exit") => break,
            Some(other) => eprintln!("unknown command: {}", other),
            None => {}
        }
    }

    // Let an in-flight run reach DONE or FAILED before exiting.
    if let Some(live) = sequencer.live_run() {
        eprintln!("waiting for run {} to finish", live.run_id);
    }
    for handle in runs {
        if let Err(err) = handle.await {
            log(
                Level::Error,
                Domain::Run,
                "run_task_failed",
                obj(&[("msg", v_str(&err.to_string()))]),
            );
        }
    }

    log(Level::Info, Domain::System, "shutdown", obj(&[]));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(v: &[&str]) -> Result<Args> {
        parse_args(v.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_flags() {
        let a = parse(&["--url", "http://h:1", "--scenario", "crash_reflex", "--json"]).unwrap();
        assert_eq!(a.url.as_deref(), Some("http://h:1"));
        assert_eq!(a.scenario.as_deref(), Some("crash_reflex"));
        assert!(a.json);
        assert!(!a.interactive);
    }

    #[test]
    fn test_missing_value_and_unknown_flag() {
        assert!(parse(&["--symbol"]).is_err());
        assert!(parse(&["--fast"]).is_err());
        assert_eq!(parse(&[]).unwrap(), Args::default());
    }

    #[test]
    fn test_help_is_a_flag() {
        let a = parse(&["--scenario", "greedy_trap", "--help"]).unwrap();
        assert!(a.help);
        assert_eq!(a.scenario.as_deref(), Some("greedy_trap"));
        assert!(parse(&["-h"]).unwrap().help);
        assert!(!parse(&["--json"]).unwrap().help);
    }
}

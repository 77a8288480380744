//! HttpBackend against a mock analysis server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use postureview::client::{check_payload, Backend, FailureKind, FetchError, HttpBackend, RunRequest};
use postureview::config::Config;
use postureview::sequencer::{RunOutcome, RunSequencer, RunStatus};
use postureview::sink::RecordingSink;
use postureview::fragment::{Slot, Stage};

fn backend_for(server: &MockServer) -> HttpBackend {
    HttpBackend::new(&Config::default().with_backend_url(server.uri())).expect("backend")
}

#[tokio::test]
async fn fetch_run_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "phase2": {"volatility_state": "EXPANDING", "news_score": 31},
            "market_posture": {"market_posture": "DEFENSIVE", "risk_level": "HIGH"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let body = backend_for(&server)
        .fetch_run(&RunRequest::default())
        .await
        .expect("fetch ok");
    assert_eq!(body["phase2"]["volatility_state"], "EXPANDING");

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.query(), None);
}

#[tokio::test]
async fn scenario_and_symbol_sent_as_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/run"))
        .and(query_param("scenario", "concentration_guard"))
        .and(query_param("symbol", "NVDA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"decisions": []})))
        .expect(1)
        .mount(&server)
        .await;

    let request = RunRequest::new(Some("concentration_guard"), Some("NVDA"));
    let body = backend_for(&server).fetch_run(&request).await.expect("fetch ok");
    assert_eq!(body["decisions"], json!([]));
}

#[tokio::test]
async fn server_error_maps_to_status_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/run"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({"error": "portfolio file missing", "status": "FAILED"})),
        )
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .fetch_run(&RunRequest::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        FetchError::Status {
            code: 500,
            message: Some("portfolio file missing".to_string())
        }
    );
    assert_eq!(err.kind(), FailureKind::TransportFailure);
    assert!(err.operator_message().contains("portfolio file missing"));
}

#[tokio::test]
async fn non_json_body_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .fetch_run(&RunRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::InvalidBody(_)));
}

#[tokio::test]
async fn error_marker_in_ok_body_passes_fetch_but_fails_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "engine crashed"})))
        .mount(&server)
        .await;

    let body = backend_for(&server)
        .fetch_run(&RunRequest::default())
        .await
        .expect("2xx is a transport success");
    let err = check_payload(body).unwrap_err();
    assert_eq!(err.kind(), FailureKind::PayloadErrorMarker);
}

#[tokio::test]
async fn unreachable_backend_is_transport_failure() {
    // Bind then drop, leaving a port nobody listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };

    let backend = HttpBackend::new(&Config {
        backend_url: format!("http://127.0.0.1:{}", port),
        request_timeout: Some(Duration::from_secs(2)),
    })
    .expect("backend");
    let err = backend.fetch_run(&RunRequest::default()).await.unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)), "got {:?}", err);
}

#[tokio::test]
async fn health_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "healthy", "service": "Portfolio Intelligence API"})),
        )
        .mount(&server)
        .await;

    let health = backend_for(&server).health().await.expect("health ok");
    assert_eq!(health.status, "healthy");
    assert_eq!(health.service.as_deref(), Some("Portfolio Intelligence API"));
}

#[tokio::test]
async fn full_run_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "blocked_by_safety": [
                {"target": "NVDA", "action": "BUY_MORE", "safety_reason": "Sector concentration 62% > 40%"}
            ],
            "execution_summary": {"decision": "PARTIAL", "actions_proposed": 2, "actions_blocked": 1, "final_mode": "DEFENSIVE"}
        })))
        .mount(&server)
        .await;

    let sink = RecordingSink::new();
    let timing = postureview::thinking::Timing {
        thinking: Vec::new(),
        reveal_delay: Duration::from_millis(1),
    };
    let seq = RunSequencer::new(
        Box::new(backend_for(&server)),
        Box::new(sink.clone()),
        RunRequest::default(),
    )
    .with_timing(timing);

    let outcome = seq.trigger().await;
    let report = outcome.report().expect("completed");
    assert!(matches!(report.outcome, RunOutcome::Revealed { .. }));
    assert_eq!(seq.status(), RunStatus::Done);

    let container = sink.container();
    let safety = container.get(Slot::Stage(Stage::Safety)).expect("stage 4");
    assert_eq!(safety.action_items(true).count(), 1);
    assert!(safety.contains_text("Sector concentration"));
}

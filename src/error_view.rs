use crate::classify::Tone;
use crate::fragment::{Fragment, Node, NoticeKind, Slot};

pub const FALLBACK_MESSAGE: &str = "The analysis backend failed without a message.";

/// Terminal failure fragment. Replaces whatever the container held.
pub fn render_error(message: &str) -> Fragment {
    let message = message.trim();
    let text = if message.is_empty() {
        FALLBACK_MESSAGE
    } else {
        message
    };
    Fragment::new(Slot::Error)
        .heading("Analysis unavailable")
        .push(Node::Notice {
            kind: NoticeKind::Failure,
            text: text.to_string(),
            tone: Tone::Bad,
        })
        .push(Node::Text {
            text: "Check that the backend is running, then run the analysis again.".to_string(),
        })
}

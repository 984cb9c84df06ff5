//! Messages exchanged between the page and the worker.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A message carries a type tag and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Page → waiting worker: take over now.
    SkipWaiting,
    /// Worker → page: a new version is ready.
    UpdateAvailable,
}

impl WorkerMessage {
    /// Decode a posted message. Unknown or malformed payloads are ignored.
    pub fn parse(data: &str) -> Option<Self> {
        match serde_json::from_str(data) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(error = %e, "Ignoring unrecognised worker message");
                None
            }
        }
    }

    pub fn to_json(&self) -> String {
        match self {
            WorkerMessage::SkipWaiting => r#"{"type":"SKIP_WAITING"}"#.to_string(),
            WorkerMessage::UpdateAvailable => r#"{"type":"UPDATE_AVAILABLE"}"#.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(
            serde_json::to_string(&WorkerMessage::SkipWaiting).unwrap(),
            WorkerMessage::SkipWaiting.to_json()
        );
        assert_eq!(
            WorkerMessage::parse(r#"{"type":"UPDATE_AVAILABLE"}"#),
            Some(WorkerMessage::UpdateAvailable)
        );
    }

    #[test]
    fn test_unknown_messages_ignored() {
        assert_eq!(WorkerMessage::parse(r#"{"type":"CLAIM"}"#), None);
        assert_eq!(WorkerMessage::parse("SKIP_WAITING"), None);
    }
}

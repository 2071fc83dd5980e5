//! Sum-typed progress/result/error events streamed out of pull and push
//! (spec §4.5 "Progress reporting", §9 "External interfaces").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        total: u64,
        completed: u64,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
    },
    Result(serde_json::Value),
    Error {
        status: u16,
        message: String,
    },
}

impl ProgressEvent {
    pub fn progress(total: u64, completed: u64, status: impl Into<String>, digest: Option<String>) -> Self {
        Self::Progress {
            total,
            completed,
            status: status.into(),
            digest,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::Error {
            status,
            message: message.into(),
        }
    }
}

pub type ProgressSender = tokio::sync::mpsc::Sender<ProgressEvent>;

/// Send a progress event, silently dropping it if there is no receiver
/// (a caller that doesn't want streaming passes `None`).
pub async fn emit(tx: Option<&ProgressSender>, event: ProgressEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_event_serializes_with_kind_tag() {
        let e = ProgressEvent::progress(100, 50, "pulling", Some("sha256:abc".to_string()));
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "progress");
        assert_eq!(json["completed"], 50);
    }

    #[test]
    fn error_event_omits_digest_field() {
        let e = ProgressEvent::error(404, "not found");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "error");
        assert_eq!(json["status"], 404);
    }
}

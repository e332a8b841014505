//! Wire envelope for hub messages.

use chrono::{DateTime, Utc};
use prism_models::{Progress, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kind of payload carried in `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// `data` is one output line.
    Log,
    /// `data` is a [`Progress`] object.
    Progress,
    /// `data` is `{"success": bool, "result": ...}`.
    Complete,
    /// `data` is an error message.
    Error,
}

/// `{"type", "task_id", "data", "time"}` envelope sent to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub task_id: TaskId,
    pub data: Value,
    pub time: DateTime<Utc>,
}

impl Message {
    pub fn new(kind: MessageType, task_id: TaskId, data: Value) -> Self {
        Self {
            kind,
            task_id,
            data,
            time: Utc::now(),
        }
    }

    pub fn log(task_id: TaskId, line: impl Into<String>) -> Self {
        Self::new(MessageType::Log, task_id, Value::String(line.into()))
    }

    pub fn progress(task_id: TaskId, progress: &Progress) -> Self {
        let data = json!({
            "phase": progress.phase,
            "percent": progress.percent,
            "elapsed": progress.elapsed,
            "message": progress.message,
        });
        Self::new(MessageType::Progress, task_id, data)
    }

    pub fn complete(task_id: TaskId, success: bool, result: Value) -> Self {
        Self::new(
            MessageType::Complete,
            task_id,
            json!({ "success": success, "result": result }),
        )
    }

    pub fn error(task_id: TaskId, message: impl Into<String>) -> Self {
        Self::new(MessageType::Error, task_id, Value::String(message.into()))
    }

    /// Serializes to the JSON wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let msg = Message::log("t-1".into(), "Initializing...");
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "log");
        assert_eq!(value["task_id"], "t-1");
        assert_eq!(value["data"], "Initializing...");
        assert!(value["time"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_progress_payload() {
        let mut progress = Progress::new("plan", 30, "Planning changes");
        progress.elapsed = 1200;
        let msg = Message::progress("t-2".into(), &progress);

        assert_eq!(msg.kind, MessageType::Progress);
        assert_eq!(
            msg.data,
            json!({"phase": "plan", "percent": 30, "elapsed": 1200, "message": "Planning changes"})
        );
    }

    #[test]
    fn test_complete_payload() {
        let msg = Message::complete("t-3".into(), false, json!("boom"));
        assert_eq!(msg.data["success"], false);
        assert_eq!(msg.data["result"], "boom");
    }
}

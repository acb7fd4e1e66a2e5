use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::TaskStatus;

/// 长连接上发送的消息。结构化内容在发送前序列化为 JSON 文本。
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Text(String),
    Json(Value),
}

impl ChannelMessage {
    pub fn into_wire(self) -> Result<String, serde_json::Error> {
        match self {
            ChannelMessage::Text(text) => Ok(text),
            ChannelMessage::Json(value) => serde_json::to_string(&value),
        }
    }
}

impl From<String> for ChannelMessage {
    fn from(text: String) -> Self {
        ChannelMessage::Text(text)
    }
}

impl From<&str> for ChannelMessage {
    fn from(text: &str) -> Self {
        ChannelMessage::Text(text.to_string())
    }
}

impl From<Value> for ChannelMessage {
    fn from(value: Value) -> Self {
        ChannelMessage::Json(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub event: String,
    pub worker_id: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub status_value: i32,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn task_status<W: Into<String>, T: Into<String>>(
        worker_id: W,
        task_id: T,
        status: TaskStatus,
    ) -> Self {
        Self {
            event: "task_status".to_string(),
            worker_id: worker_id.into(),
            task_id: task_id.into(),
            status,
            status_value: status.value(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_message(&self) -> Result<ChannelMessage, serde_json::Error> {
        Ok(ChannelMessage::Json(serde_json::to_value(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_passes_through() {
        let wire = ChannelMessage::from("ping").into_wire().unwrap();
        assert_eq!(wire, "ping");
    }

    #[test]
    fn test_json_is_serialized() {
        let wire = ChannelMessage::from(json!({ "type": "hello" }))
            .into_wire()
            .unwrap();
        assert_eq!(wire, r#"{"type":"hello"}"#);
    }

    #[test]
    fn test_progress_event_payload() {
        let event = ProgressEvent::task_status("worker-1", "task-9", TaskStatus::Uploaded);
        let ChannelMessage::Json(value) = event.to_message().unwrap() else {
            panic!("progress events are structured");
        };
        assert_eq!(value["event"], "task_status");
        assert_eq!(value["status"], "UPLOADED");
        assert_eq!(value["status_value"], 5);
    }
}

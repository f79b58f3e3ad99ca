//! Server-sent event framing for chat completion streams

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One `chat.completion.chunk` event. Fields the gateway does not touch are
/// carried in `extra` so re-serialization keeps the envelope shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    pub choices: Vec<ChunkChoice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionChunk {
    /// Envelope for text released at end of stream that no upstream event carried.
    pub fn synthetic(content: String) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        Self {
            id: Some(format!("chatcmpl-{}", Uuid::new_v4().simple())),
            object: Some("chat.completion.chunk".to_string()),
            created: Some(created),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some(content),
                    extra: Map::new(),
                },
                finish_reason: None,
                extra: Map::new(),
            }],
            extra: Map::new(),
        }
    }

    /// Content of the first choice, when present and non-empty.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
            .filter(|content| !content.is_empty())
    }

    pub fn set_content(&mut self, content: String) {
        if let Some(choice) = self.choices.first_mut() {
            choice.delta.content = Some(content);
        }
    }
}

/// Split a line into its body and its terminator (`"\r\n"`, `"\n"` or `""`).
pub fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// Payload of a `data:` line, without the single optional leading space.
pub fn data_payload(body: &str) -> Option<&str> {
    body.strip_prefix(DATA_PREFIX)
        .map(|payload| payload.strip_prefix(' ').unwrap_or(payload))
}

pub fn format_event(chunk: &ChatCompletionChunk) -> serde_json::Result<String> {
    Ok(format!("{} {}\n\n", DATA_PREFIX, serde_json::to_string(chunk)?))
}

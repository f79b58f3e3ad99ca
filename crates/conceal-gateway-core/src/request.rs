//! Chat completion request shapes
//!
//! Only the parts the gateway rewrites are typed; every other field is kept in
//! `extra` and serialized back untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(MessageContent::Text(content.into())),
            extra: Map::new(),
        }
    }

    fn text_segments(&self) -> Vec<&str> {
        match &self.content {
            Some(MessageContent::Text(text)) => vec![text.as_str()],
            Some(MessageContent::Parts(parts)) => {
                parts.iter().filter_map(|part| part.text.as_deref()).collect()
            }
            None => Vec::new(),
        }
    }

    fn text_segments_mut(&mut self) -> Vec<&mut String> {
        match &mut self.content {
            Some(MessageContent::Text(text)) => vec![text],
            Some(MessageContent::Parts(parts)) => {
                parts.iter_mut().filter_map(|part| part.text.as_mut()).collect()
            }
            None => Vec::new(),
        }
    }
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            extra: Map::new(),
        }
    }

    /// Every scannable text in request order: one per plain-string message,
    /// one per text part of a multi-part message.
    pub fn text_segments(&self) -> Vec<&str> {
        self.messages
            .iter()
            .flat_map(|message| message.text_segments())
            .collect()
    }

    /// Mutable view over the same segments, in the same order as [`Self::text_segments`].
    pub fn text_segments_mut(&mut self) -> Vec<&mut String> {
        self.messages
            .iter_mut()
            .flat_map(|message| message.text_segments_mut())
            .collect()
    }

    pub fn is_streaming(&self) -> bool {
        self.extra
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

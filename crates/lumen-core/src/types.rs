//! Wire types for the chat-completion protocol.
//!
//! The request/response shapes follow the OpenAI-compatible contract spoken
//! by every endpoint this crate talks to: a JSON POST with a model id, an
//! ordered message list, and sampling parameters; a reply carrying
//! `choices[0].message.content` plus an optional usage payload.
//!
//! The response type additionally carries the degraded-mode marker
//! ([`ChatCompletionResponse::offline`]). Both `offline` and `degraded` are
//! always serialized so an offline reply has exactly the same key set as a
//! real one; callers detect degraded mode by the marker value, not by shape.

use serde::{Deserialize, Serialize};

/// Inline image reference inside a typed content part.
///
/// `url` is either an https URL or a `data:` URI with base64 payload, which
/// is how document pages reach the OCR models.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One typed part of a multi-part message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Message content: plain text or a list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single chat message with a role and content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: MessageContent::Text(text.into()) }
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: MessageContent::Text(text.into()) }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: MessageContent::Text(text.into()) }
    }

    /// Concatenated text of the message, ignoring image parts.
    #[must_use]
    pub fn content_text(&self) -> String {
        match &self.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Outbound chat-completion request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatCompletionRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self { model: model.into(), messages, temperature: None, max_tokens: None }
    }

    /// Structural validation performed before any network attempt.
    ///
    /// Returns the reason the request is malformed, or `None` when it is
    /// acceptable to send.
    #[must_use]
    pub fn validation_error(&self) -> Option<&'static str> {
        if self.model.trim().is_empty() {
            return Some("model identifier is empty");
        }
        if self.messages.is_empty() {
            return Some("message list is empty");
        }
        None
    }
}

/// Token accounting reported by the service.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsagePayload {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One completion choice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Degraded-mode metadata attached to a synthesized offline reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DegradedMetadata {
    /// Classification of the final failure that exhausted the policy.
    pub failure: String,
    /// Endpoints that were attempted, in order.
    pub endpoints_tried: Vec<String>,
}

/// Inbound chat-completion response.
///
/// `offline` and `degraded` are always present in serialized form so the
/// synthetic offline reply is shape-identical to a real one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<UsagePayload>,
    /// Degraded-mode marker: `true` only on a synthesized offline reply.
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub degraded: Option<DegradedMetadata>,
}

impl ChatCompletionResponse {
    /// Text of the first choice, if any.
    #[must_use]
    pub fn content(&self) -> Option<String> {
        self.choices.first().map(|c| c.message.content_text())
    }

    /// Whether the first choice was cut off at the token limit.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.choices
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .is_some_and(|r| r == "length")
    }
}

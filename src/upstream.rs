//! Wire types for the Dify-compatible chat backend.

use serde::{Deserialize, Serialize};

/// Record prefix used by the upstream event stream.
pub const DATA_PREFIX: &str = "data: ";

/// Response mode requested from the backend. The relay only ever issues
/// streaming calls; `Blocking` exists because the upstream API defines it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Streaming,
    Blocking,
}

/// Body of `POST {base}/chat-messages`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageRequest {
    pub inputs: serde_json::Value,
    pub query: String,
    pub user: String,
    pub response_mode: ResponseMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub files: Vec<serde_json::Value>,
}

/// One decoded record from the upstream event stream.
///
/// Records carry more fields than these (conversation metadata, usage
/// accounting); serde drops what the relay does not inspect without
/// failing the parse.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamEvent {
    pub event: String,
    #[serde(default)]
    pub answer: Option<String>,
}

impl UpstreamEvent {
    /// Whether this event kind carries answer text.
    pub fn carries_answer(&self) -> bool {
        self.event == "message" || self.event == "agent_message"
    }
}

/// Classify one complete line from the upstream stream.
///
/// Returns the answer fragment when the line is a well-formed message
/// event with non-empty text. Everything else — blank lines, other event
/// kinds, records truncated at a chunk boundary — yields nothing; a line
/// that fails to parse is expected traffic, not a fault.
pub fn answer_fragment(line: &str) -> Option<String> {
    let record = line.trim().strip_prefix(DATA_PREFIX)?;
    let event: UpstreamEvent = serde_json::from_str(record).ok()?;
    if !event.carries_answer() {
        return None;
    }
    event.answer.filter(|answer| !answer.is_empty())
}

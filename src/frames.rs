//! The outbound frame protocol consumed by the browser renderer.
//!
//! Every relay invocation writes the fixed sequence
//! `start, start-step, text-start, text-delta*, text-end, finish-step,
//! finish` — or cuts over to a single `error` frame and stops. The enum is
//! closed on purpose: a frame kind that isn't listed here does not exist on
//! the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One discrete, typed unit in the outbound stream.
///
/// Serialized shape matches what the renderer expects, e.g.
/// `{"type":"text-delta","id":"text-…","delta":"Hel"}` and
/// `{"type":"finish","finishReason":"stop"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Stream opened, no payload.
    #[serde(rename = "start")]
    Start,
    /// Logical generation step opened.
    #[serde(rename = "start-step")]
    StartStep,
    /// A text region begins. The id is constant for one answer.
    #[serde(rename = "text-start")]
    TextStart { id: String },
    /// Incremental answer fragment belonging to the region `id`.
    /// Order-sensitive; never coalesced, never empty.
    #[serde(rename = "text-delta")]
    TextDelta { id: String, delta: String },
    /// The text region closes. Exactly one per opened `text-start`.
    #[serde(rename = "text-end")]
    TextEnd { id: String },
    /// Generation step concludes.
    #[serde(rename = "finish-step")]
    FinishStep,
    /// Stream concludes normally. Mutually exclusive with `error`.
    #[serde(rename = "finish")]
    Finish {
        #[serde(rename = "finishReason")]
        finish_reason: FinishReason,
    },
    /// Stream concludes abnormally. Nothing follows this frame.
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
}

impl Frame {
    /// Whether this frame ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Finish { .. } | Frame::Error { .. })
    }
}

/// Why a stream finished. The relay only ever reports `stop`; the variant
/// set mirrors the renderer's vocabulary rather than the upstream's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
}

/// Generate the opaque text-region identifier for one relay invocation.
pub fn fresh_text_id() -> String {
    format!("text-{}", Uuid::new_v4().simple())
}

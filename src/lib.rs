pub mod cli;
pub mod error;
pub mod frames;
pub mod sse;
pub mod upstream;
pub mod web;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};

use error::RelayError;
use frames::{fresh_text_id, FinishReason, Frame};
use sse::SseLineDecoder;
use upstream::{answer_fragment, ChatMessageRequest, ResponseMode};

// ---------------------------------------------------------------------------
// Relay parameters
// ---------------------------------------------------------------------------

/// Everything one relay invocation needs to issue the upstream call.
///
/// Built at the web boundary from the inbound payload; owned by the relay
/// instance for exactly one request.
#[derive(Debug, Clone)]
pub struct ChatParams {
    /// Free-form structured inputs forwarded verbatim.
    pub inputs: serde_json::Value,
    /// Latest user-authored text, extracted from the message list.
    pub query: String,
    /// Caller identity forwarded to the backend.
    pub user: String,
    /// Present when the client continues an existing conversation.
    pub conversation_id: Option<String>,
    /// Opaque file references forwarded verbatim.
    pub files: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// ChatRelay — upstream call + frame pump
// ---------------------------------------------------------------------------

/// Bridges one upstream chat stream onto one outbound frame stream.
///
/// The struct itself only holds connection settings; all per-invocation
/// state (text id, decode buffer) lives inside [`ChatRelay::relay`] and
/// dies with it.
pub struct ChatRelay {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ChatRelay {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into();
        ChatRelay {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -----------------------------------------------------------------------
    // Public entry point
    // -----------------------------------------------------------------------

    /// Run one relay invocation: issue the upstream call and write the
    /// resulting frame sequence to `tx`.
    ///
    /// The sequence is terminated exactly once — `finish` on success,
    /// `error` on any failure — and nothing is written after the terminal
    /// frame. If the upstream call itself fails, the single `error` frame
    /// is the entire output. A dropped receiver means the client went
    /// away; the relay stops consuming upstream and returns quietly.
    pub async fn relay(&self, params: ChatParams, tx: &mpsc::UnboundedSender<Frame>) {
        let response = match self.create_chat_message(&params).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("chat stream error before first byte: {e}");
                let _ = tx.send(Frame::Error { error_text: e.to_string() });
                return;
            }
        };
        pump_frames(response.bytes_stream(), tx).await;
    }

    // -----------------------------------------------------------------------
    // Upstream call
    // -----------------------------------------------------------------------

    /// `POST {base}/chat-messages` in streaming mode. A non-2xx reply is a
    /// pre-stream failure carrying the response body text.
    async fn create_chat_message(&self, params: &ChatParams) -> Result<reqwest::Response, RelayError> {
        let request = ChatMessageRequest {
            inputs: params.inputs.clone(),
            query: params.query.clone(),
            user: params.user.clone(),
            response_mode: ResponseMode::Streaming,
            conversation_id: params.conversation_id.clone(),
            files: params.files.clone(),
        };

        let response = self
            .client
            .post(format!("{}/chat-messages", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await?;
            return Err(RelayError::UpstreamStatus { status, body });
        }

        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Frame pump
// ---------------------------------------------------------------------------

/// Drive an acquired upstream byte stream to completion.
///
/// Emits the opening scaffolding, forwards every answer delta in receipt
/// order, then terminates with either the normal closing sequence or a
/// single `error` frame. Generic over the chunk stream so tests can feed
/// it without a network.
pub async fn pump_frames<S, B, E>(mut chunks: S, tx: &mpsc::UnboundedSender<Frame>)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let text_id = fresh_text_id();
    let opened = tx.send(Frame::Start).is_ok()
        && tx.send(Frame::StartStep).is_ok()
        && tx.send(Frame::TextStart { id: text_id.clone() }).is_ok();
    if !opened {
        // Receiver already gone: the client disconnected before the first
        // frame. Nothing to clean up; dropping the stream aborts upstream.
        return;
    }

    let mut decoder = SseLineDecoder::new();

    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!("chat stream error mid-stream: {e}");
                let _ = tx.send(Frame::Error { error_text: e.to_string() });
                return;
            }
        };

        for line in decoder.push(chunk.as_ref()) {
            if let Some(delta) = answer_fragment(&line) {
                let frame = Frame::TextDelta { id: text_id.clone(), delta };
                if tx.send(frame).is_err() {
                    return;
                }
            }
        }
    }

    // The upstream closed cleanly. A trailing fragment without a newline is
    // offered to the same per-line parse as any record.
    if let Some(tail) = decoder.finish() {
        if let Some(delta) = answer_fragment(&tail) {
            let frame = Frame::TextDelta { id: text_id.clone(), delta };
            if tx.send(frame).is_err() {
                return;
            }
        }
    }

    let _ = tx.send(Frame::TextEnd { id: text_id });
    let _ = tx.send(Frame::FinishStep);
    let _ = tx.send(Frame::Finish { finish_reason: FinishReason::Stop });
}

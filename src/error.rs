//! Crate-level error type.
//!
//! Every failure the relay can hit collapses into one of two classes at
//! the stream boundary: pre-stream (the upstream call never produced a
//! byte stream) and mid-stream (the chunk iteration failed). Both surface
//! to the client as a single `error` frame whose text is this type's
//! `Display` output.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Required configuration was missing at startup.
    #[error("{name} not set. Export it or pass it on the command line.")]
    MissingConfig { name: &'static str },

    /// The upstream call failed at the transport level.
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The upstream backend replied with a non-2xx status.
    #[error("upstream API error: HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    /// The inbound request was not a usable chat request.
    #[error("invalid chat request: {0}")]
    InvalidRequest(String),

    /// Socket-level failure on the inbound connection.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

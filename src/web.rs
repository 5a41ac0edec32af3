//! Inbound HTTP boundary: a small tokio TCP server exposing the relay.
//!
//! One route matters: `POST /api/chat` takes the browser payload, builds
//! the relay parameters, and streams Output Frames back as
//! `data: <json>\n\n` records over an unbuffered event-stream response.
//! Everything else is plumbing around it.

use std::sync::Arc;

use colored::*;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RelayError;
use crate::frames::Frame;
use crate::{ChatParams, ChatRelay};

/// Upper bound on the request head; a legitimate chat request never comes
/// close.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound on the request body. File references are URLs or upload
/// ids, not content, so chat payloads stay small.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Response head for the outbound frame stream. Caching and intermediary
/// buffering are disabled so every frame reaches the client as written.
const SSE_RESPONSE_HEAD: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/event-stream\r\n\
Cache-Control: no-cache, no-transform\r\n\
Connection: keep-alive\r\n\
X-Accel-Buffering: no\r\n\
Access-Control-Allow-Origin: *\r\n\r\n";

// ---------------------------------------------------------------------------
// Inbound payload
// ---------------------------------------------------------------------------

/// The chat request body as the browser sends it.
#[derive(Debug, Default, Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub inputs: Option<serde_json::Value>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<serde_json::Value>>,
    /// Some clients nest file references under `data`.
    #[serde(default)]
    pub data: Option<PayloadData>,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayloadData {
    #[serde(default)]
    pub files: Option<Vec<serde_json::Value>>,
}

/// One entry of the inbound message list. `content` may be a plain string
/// or structured; structured clients put the text under `parts`.
#[derive(Debug, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Extract the query text from the latest message: a string `content`
/// wins, otherwise the first `text` part. Empty when neither is present.
pub fn extract_query(messages: &[InboundMessage]) -> String {
    let Some(latest) = messages.last() else {
        return String::new();
    };
    if let Some(serde_json::Value::String(content)) = &latest.content {
        return content.clone();
    }
    latest
        .parts
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|part| part.kind.as_deref() == Some("text"))
        .and_then(|part| part.text.clone())
        .unwrap_or_default()
}

impl ChatPayload {
    /// Build the relay parameters. File references prefer the nested
    /// `data.files` location; a payload-supplied user id wins over a
    /// generated one.
    pub fn into_params(self, user_prefix: &str) -> ChatParams {
        let query = extract_query(&self.messages);

        let files = self
            .data
            .and_then(|data| data.files)
            .or(self.files)
            .unwrap_or_default();

        let user = self
            .user
            .filter(|user| !user.is_empty())
            .unwrap_or_else(|| format!("{}-{}", user_prefix, Uuid::new_v4().simple()));

        ChatParams {
            inputs: self.inputs.unwrap_or_else(|| serde_json::json!({})),
            query,
            user,
            conversation_id: self.conversation_id.filter(|id| !id.is_empty()),
            files,
        }
    }
}

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

/// Read and parse one HTTP request from the socket: method, path, body.
/// The head is parsed with httparse; the body is read to Content-Length.
pub(crate) async fn read_request<R>(stream: &mut R) -> Result<(String, String, Vec<u8>), RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(8192);
    let mut tmp = [0u8; 4096];

    let (method, path, head_len, content_length) = loop {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Err(RelayError::InvalidRequest(
                "connection closed before request head".to_string(),
            ));
        }
        buf.extend_from_slice(&tmp[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut request = httparse::Request::new(&mut headers);
        match request.parse(&buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let method = request.method.unwrap_or("").to_string();
                let path = request.path.unwrap_or("/").to_string();
                let content_length = request
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                    .and_then(|h| std::str::from_utf8(h.value).ok())
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                break (method, path, head_len, content_length);
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEAD_BYTES {
                    return Err(RelayError::InvalidRequest(
                        "request head too large".to_string(),
                    ));
                }
            }
            Err(e) => {
                return Err(RelayError::InvalidRequest(format!(
                    "malformed request head: {e}"
                )));
            }
        }
    };

    if content_length > MAX_BODY_BYTES {
        return Err(RelayError::InvalidRequest("request body too large".to_string()));
    }

    let mut body = buf.split_off(head_len);
    while body.len() < content_length {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Err(RelayError::InvalidRequest(
                "connection closed mid-body".to_string(),
            ));
        }
        body.extend_from_slice(&tmp[..n]);
    }
    body.truncate(content_length);

    Ok((method, path, body))
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Accept loop. Each connection gets its own task, its own relay
/// invocation, and its own frame channel; connections never share state.
pub async fn serve(relay: ChatRelay, port: u16, user_prefix: String) -> Result<(), RelayError> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;

    eprintln!(
        "{}",
        format!("  Chat relay listening on http://localhost:{}", port).bright_green()
    );
    eprintln!(
        "{}",
        format!("  Upstream backend: {}", relay.base_url()).bright_blue()
    );
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());

    let relay = Arc::new(relay);
    let user_prefix: Arc<str> = user_prefix.into();

    loop {
        let (stream, _addr) = listener.accept().await?;
        let relay = Arc::clone(&relay);
        let user_prefix = Arc::clone(&user_prefix);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, relay, &user_prefix).await {
                tracing::warn!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    relay: Arc<ChatRelay>,
    user_prefix: &str,
) -> Result<(), RelayError> {
    let (method, path, body) = match read_request(&mut stream).await {
        Ok(parts) => parts,
        Err(e @ RelayError::InvalidRequest(_)) => {
            let message = serde_json::json!({ "error": e.to_string() }).to_string();
            return write_simple(stream, "400 Bad Request", message.as_bytes()).await;
        }
        Err(e) => return Err(e),
    };
    let route = path.split('?').next().unwrap_or("");

    match (method.as_str(), route) {
        ("POST", "/api/chat") => handle_chat(stream, relay, user_prefix, body).await,
        ("OPTIONS", _) => write_preflight(stream).await,
        ("GET", "/healthz") => {
            write_simple(stream, "200 OK", b"{\"status\":\"ok\"}").await
        }
        _ => write_simple(stream, "404 Not Found", b"{\"error\":\"not found\"}").await,
    }
}

/// The chat route: decode the payload, then bridge the relay's frame
/// channel onto the socket. A write failure means the client went away —
/// the relay task is aborted so the upstream connection is released
/// instead of draining into the void.
async fn handle_chat(
    mut stream: TcpStream,
    relay: Arc<ChatRelay>,
    user_prefix: &str,
    body: Vec<u8>,
) -> Result<(), RelayError> {
    let payload: ChatPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            let message =
                serde_json::json!({ "error": format!("invalid chat payload: {e}") }).to_string();
            return write_simple(stream, "400 Bad Request", message.as_bytes()).await;
        }
    };

    let params = payload.into_params(user_prefix);
    tracing::debug!(
        user = %params.user,
        conversation = params.conversation_id.as_deref().unwrap_or("-"),
        "relaying chat request"
    );

    stream.write_all(SSE_RESPONSE_HEAD.as_bytes()).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let relay_task = tokio::spawn(async move {
        relay.relay(params, &tx).await;
    });

    let mut client_gone = false;
    while let Some(frame) = rx.recv().await {
        if let Ok(json) = serde_json::to_string(&frame) {
            let record = format!("data: {}\n\n", json);
            if stream.write_all(record.as_bytes()).await.is_err() {
                client_gone = true;
                break;
            }
        }
    }

    if client_gone {
        relay_task.abort();
    }
    let _ = relay_task.await;
    Ok(())
}

async fn write_preflight(mut stream: TcpStream) -> Result<(), RelayError> {
    let head = "HTTP/1.1 204 No Content\r\n\
Access-Control-Allow-Origin: *\r\n\
Access-Control-Allow-Methods: POST, GET, OPTIONS\r\n\
Access-Control-Allow-Headers: Content-Type\r\n\
Connection: close\r\n\r\n";
    stream.write_all(head.as_bytes()).await?;
    Ok(())
}

async fn write_simple(
    mut stream: TcpStream,
    status: &str,
    body: &[u8],
) -> Result<(), RelayError> {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_from(json: &str) -> ChatPayload {
        serde_json::from_str(json).expect("payload parses")
    }

    #[test]
    fn test_extract_query_string_content() {
        let payload = payload_from(
            r#"{"messages":[{"role":"user","content":"first"},{"role":"user","content":"latest"}]}"#,
        );
        assert_eq!(extract_query(&payload.messages), "latest");
    }

    #[test]
    fn test_extract_query_from_parts() {
        let payload = payload_from(
            r#"{"messages":[{"role":"user","parts":[{"type":"file","text":"nope"},{"type":"text","text":"from parts"}]}]}"#,
        );
        assert_eq!(extract_query(&payload.messages), "from parts");
    }

    #[test]
    fn test_extract_query_structured_content_falls_back_to_parts() {
        let payload = payload_from(
            r#"{"messages":[{"content":{"nested":true},"parts":[{"type":"text","text":"hi"}]}]}"#,
        );
        assert_eq!(extract_query(&payload.messages), "hi");
    }

    #[test]
    fn test_extract_query_no_messages() {
        let payload = payload_from(r#"{"messages":[]}"#);
        assert_eq!(extract_query(&payload.messages), "");
    }

    #[test]
    fn test_into_params_generates_prefixed_user() {
        let payload = payload_from(r#"{"messages":[{"content":"hi"}]}"#);
        let params = payload.into_params("kiosk");
        assert!(params.user.starts_with("kiosk-"));
        assert_eq!(params.query, "hi");
        assert_eq!(params.inputs, serde_json::json!({}));
        assert!(params.files.is_empty());
        assert!(params.conversation_id.is_none());
    }

    #[test]
    fn test_into_params_keeps_payload_user() {
        let payload = payload_from(r#"{"messages":[],"user":"alice"}"#);
        let params = payload.into_params("user");
        assert_eq!(params.user, "alice");
    }

    #[test]
    fn test_into_params_nested_files_win() {
        let payload = payload_from(
            r#"{"messages":[],"files":[{"id":"outer"}],"data":{"files":[{"id":"nested"}]}}"#,
        );
        let params = payload.into_params("user");
        assert_eq!(params.files.len(), 1);
        assert_eq!(params.files[0]["id"], "nested");
    }

    #[test]
    fn test_into_params_outer_files_used_without_data() {
        let payload = payload_from(r#"{"messages":[],"files":[{"id":"outer"}]}"#);
        let params = payload.into_params("user");
        assert_eq!(params.files[0]["id"], "outer");
    }

    #[test]
    fn test_into_params_empty_conversation_id_dropped() {
        let payload = payload_from(r#"{"messages":[],"conversation_id":""}"#);
        let params = payload.into_params("user");
        assert!(params.conversation_id.is_none());
    }

    #[test]
    fn test_into_params_conversation_id_kept() {
        let payload = payload_from(r#"{"messages":[],"conversation_id":"conv-1"}"#);
        let params = payload.into_params("user");
        assert_eq!(params.conversation_id.as_deref(), Some("conv-1"));
    }

    #[test]
    fn test_sse_head_disables_buffering() {
        assert!(SSE_RESPONSE_HEAD.contains("Content-Type: text/event-stream"));
        assert!(SSE_RESPONSE_HEAD.contains("Cache-Control: no-cache, no-transform"));
        assert!(SSE_RESPONSE_HEAD.contains("Connection: keep-alive"));
        assert!(SSE_RESPONSE_HEAD.contains("X-Accel-Buffering: no"));
        assert!(SSE_RESPONSE_HEAD.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_read_request_parses_post_with_body() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request =
            b"POST /api/chat HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: 15\r\n\r\n{\"messages\":[]}";
        client.write_all(request).await.expect("write");

        let (method, path, body) = read_request(&mut server).await.expect("parsed");
        assert_eq!(method, "POST");
        assert_eq!(path, "/api/chat");
        assert_eq!(body, b"{\"messages\":[]}");
    }

    #[tokio::test]
    async fn test_read_request_body_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let head = b"POST /api/chat HTTP/1.1\r\nContent-Length: 15\r\n\r\n{\"messa";
        client.write_all(head).await.expect("write head");

        let reader = tokio::spawn(async move { read_request(&mut server).await });

        tokio::task::yield_now().await;
        client.write_all(b"ges\":[]}").await.expect("write rest");

        let (method, _, body) = reader.await.expect("join").expect("parsed");
        assert_eq!(method, "POST");
        assert_eq!(body, b"{\"messages\":[]}");
    }

    #[tokio::test]
    async fn test_read_request_get_without_body() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .expect("write");

        let (method, path, body) = read_request(&mut server).await.expect("parsed");
        assert_eq!(method, "GET");
        assert_eq!(path, "/healthz");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_read_request_rejects_garbage() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(b"\0\x01\x02 not http at all\r\n\r\n")
            .await
            .expect("write");

        let err = read_request(&mut server).await.expect_err("rejected");
        assert!(err.to_string().contains("malformed request head"));
    }

    #[tokio::test]
    async fn test_read_request_rejects_oversized_body() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = format!(
            "POST /api/chat HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_BYTES + 1
        );
        client.write_all(request.as_bytes()).await.expect("write");

        let err = read_request(&mut server).await.expect_err("rejected");
        assert!(err.to_string().contains("too large"));
    }
}

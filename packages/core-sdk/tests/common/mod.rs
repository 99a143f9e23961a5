// Mock OpenAI-compatible provider shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use http_body_util::BodyExt;
use sally_core_sdk::config::Settings;
use serde_json::{json, Value};

/// What the mock returns from `/v1/chat/completions`.
#[derive(Clone, Debug)]
pub enum MockBehavior {
    Reply { content: Option<String>, id: Option<String> },
    NoChoices,
    Status { code: u16, message: String },
    Stream { frames: Vec<String> },
}

impl MockBehavior {
    pub fn reply(content: &str) -> Self {
        MockBehavior::Reply {
            content: Some(content.to_string()),
            id: Some("chatcmpl-test".to_string()),
        }
    }

    pub fn status(code: u16, message: &str) -> Self {
        MockBehavior::Status {
            code,
            message: message.to_string(),
        }
    }

    /// SSE body with one frame per delta; `None` produces a contentless chunk.
    pub fn stream(deltas: &[Option<&str>]) -> Self {
        let mut frames: Vec<String> = deltas.iter().map(|d| delta_frame(*d)).collect();
        frames.push("data: [DONE]\n\n".to_string());
        MockBehavior::Stream { frames }
    }

    /// 200 stream that reports an upstream error object after the given deltas.
    pub fn stream_then_error(deltas: &[&str], message: &str) -> Self {
        let mut frames: Vec<String> = deltas.iter().map(|d| delta_frame(Some(d))).collect();
        let error = json!({ "error": { "message": message, "type": "server_error" } });
        frames.push(format!("data: {}\n\n", error));
        frames.push(delta_frame(Some("never sent")));
        frames.push("data: [DONE]\n\n".to_string());
        MockBehavior::Stream { frames }
    }
}

pub fn delta_frame(content: Option<&str>) -> String {
    let delta = match content {
        Some(text) => json!({ "content": text }),
        None => json!({ "role": "assistant" }),
    };
    let chunk = json!({
        "id": "chatcmpl-stream",
        "choices": [{ "index": 0, "delta": delta }]
    });
    format!("data: {}\n\n", chunk)
}

#[derive(Clone)]
struct MockState {
    behavior: MockBehavior,
    requests: Arc<Mutex<Vec<Value>>>,
}

pub struct MockProvider {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Value>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockProvider {
    pub async fn start(behavior: MockBehavior) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            behavior,
            requests: requests.clone(),
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock provider");
        let addr = listener.local_addr().expect("mock addr");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock provider serve");
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
            handle,
        }
    }

    /// Bodies received so far, in arrival order.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn settings(&self) -> Settings {
        settings_for(&self.base_url, Some("sk-test"))
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn completions(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state
        .requests
        .lock()
        .expect("requests lock")
        .push(body.clone());

    match state.behavior {
        MockBehavior::Reply { content, id } => {
            let mut payload = json!({
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": content }
                }]
            });
            if let Some(id) = id {
                payload["id"] = json!(id);
            }
            ([("x-request-id", "req-header-id")], Json(payload)).into_response()
        }
        MockBehavior::NoChoices => Json(json!({ "id": "chatcmpl-empty", "choices": [] })).into_response(),
        MockBehavior::Status { code, message } => (
            StatusCode::from_u16(code).expect("status code"),
            Json(json!({ "error": { "message": message } })),
        )
            .into_response(),
        MockBehavior::Stream { frames } => Response::builder()
            .header(CONTENT_TYPE, "text/event-stream")
            .body(Body::from(frames.concat()))
            .expect("stream response"),
    }
}

/// Provider that answers 200 with a `content-length` far past what it sends,
/// writes the given delta frames and then hangs up.
pub async fn truncated_stream_url(deltas: &[&str]) -> (String, tokio::task::JoinHandle<()>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind truncating provider");
    let addr = listener.local_addr().expect("truncating provider addr");
    let body: String = deltas.iter().map(|d| delta_frame(Some(d))).collect();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        read_request(&mut socket).await;
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\n\r\n",
            body.len() + 10_000
        );
        socket.write_all(head.as_bytes()).await.expect("write head");
        socket.write_all(body.as_bytes()).await.expect("write body");
        socket.flush().await.expect("flush");
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let _ = socket.shutdown().await;
    });

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.expect("read request");
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }

    (format!("http://{}", addr), handle)
}

pub fn settings_for(base_url: &str, api_key: Option<&str>) -> Settings {
    Settings {
        openai_api_key: api_key.map(str::to_string),
        openai_base_url: base_url.to_string(),
        request_timeout_seconds: 5.0,
        ..Settings::default()
    }
}

/// Base URL of a local port with nothing listening on it.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("free port addr");
    drop(listener);
    format!("http://{}", addr)
}

pub async fn body_string(resp: Response) -> String {
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

pub async fn body_json(resp: Response) -> Value {
    serde_json::from_str(&body_string(resp).await).expect("json body")
}

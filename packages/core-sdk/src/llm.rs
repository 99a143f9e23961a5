use std::{pin::Pin, time::Duration};

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use reqwest::{
    header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE},
    StatusCode,
};
use serde_json::{json, Value};

use crate::config::{ConfigError, Settings};
use crate::models::Message;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

const PLACEHOLDER_MARKER: &str = "REPLACE_ME";
const REQUEST_ID_HEADER: &str = "x-request-id";

/** \brief Incremental text fragments, in provider order. */
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/**
 * \brief Failure reported by the provider, classified into a closed set.
 */
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("Empty response from OpenAI")]
    EmptyResponse,
    #[error("{0}")]
    Unknown(String),
}

impl ProviderError {
    /**
     * \brief Human-readable detail as reported upstream (empty when none).
     */
    pub fn detail(&self) -> &str {
        match self {
            ProviderError::Authentication(d)
            | ProviderError::RateLimit(d)
            | ProviderError::Connection(d)
            | ProviderError::BadRequest(d)
            | ProviderError::PermissionDenied(d)
            | ProviderError::Server(d)
            | ProviderError::Unknown(d) => d,
            ProviderError::EmptyResponse => "Empty response from OpenAI",
        }
    }
}

/**
 * \brief Sampling parameters for a single call.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }
}

/**
 * \brief Result of a non-streaming call.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /** \brief First candidate's text; empty when the provider sent no content. */
    pub reply: String,
    /** \brief Provider-assigned request id; empty when unavailable. */
    pub request_id: String,
}

/**
 * \brief Client for an OpenAI-compatible `/v1/chat/completions` endpoint.
 *
 * Cheap to build; holds no state besides the resolved configuration.
 */
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
    temperature: f32,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    /**
     * \brief Build a client; fails before any network I/O when the key is absent or a placeholder.
     */
    pub fn new(settings: &Settings) -> Result<Self, ConfigError> {
        let api_key = settings
            .openai_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        if api_key.contains(PLACEHOLDER_MARKER) {
            return Err(ConfigError::PlaceholderApiKey);
        }

        let timeout = settings.request_timeout();
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint: format!(
                "{}/v1/chat/completions",
                settings.openai_base_url.trim_end_matches('/')
            ),
            api_key: api_key.to_string(),
            model: settings.openai_model.clone(),
            timeout,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    /**
     * \brief Override the sampling temperature used by `complete` and `stream_complete`.
     */
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /**
     * \brief Single non-streaming completion.
     */
    pub async fn complete(&self, messages: &[Message]) -> Result<Completion, ProviderError> {
        let options = CompletionOptions {
            temperature: self.temperature,
            ..CompletionOptions::default()
        };
        self.complete_with(messages, &options).await
    }

    pub async fn complete_with(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        let resp = ensure_success(resp).await?;

        let header_id = header_request_id(resp.headers());
        let bytes = resp.bytes().await.map_err(stream_interrupted)?;
        let v: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::Unknown(format!("invalid provider response: {}", e)))?;
        let mut completion = extract_completion(&v)?;
        if completion.request_id.is_empty() {
            completion.request_id = header_id.unwrap_or_default();
        }
        Ok(completion)
    }

    /**
     * \brief Streaming completion. Contentless or malformed chunks are skipped; an in-stream
     * `error` object ends the stream with `ProviderError::Server`.
     */
    pub async fn stream_complete(&self, messages: &[Message]) -> Result<TokenStream, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": true
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        let resp = ensure_success(resp).await?;

        tracing::debug!(
            request_id = %header_request_id(resp.headers()).unwrap_or_default(),
            model = %self.model,
            "provider stream opened"
        );
        Ok(parse_event_stream(resp.bytes_stream()))
    }
}

/**
 * \brief Turn a raw `text/event-stream` body into content tokens.
 */
pub fn parse_event_stream<S, B>(body: S) -> TokenStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let out = try_stream! {
        let mut body = Box::pin(body);
        let mut buf = Vec::<u8>::new();
        let mut done = false;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(stream_interrupted)?;
            buf.extend(chunk.as_ref().iter().copied().filter(|b| *b != b'\r'));
            while let Some(pos) = find_double_newline(&buf) {
                let block = buf.drain(..pos + 2).collect::<Vec<u8>>();
                match extract_data_line(&block) {
                    Some(line) if line == "[DONE]" => {
                        done = true;
                        break;
                    }
                    Some(line) => {
                        if let Some(delta) = parse_stream_frame(&line)? {
                            yield delta;
                        }
                    }
                    None => {}
                }
            }
            if done {
                break;
            }
        }
        // Trailing frame without the closing blank line.
        if !done {
            if let Some(line) = extract_data_line(&buf) {
                if line != "[DONE]" {
                    if let Some(delta) = parse_stream_frame(&line)? {
                        yield delta;
                    }
                }
            }
        }
    };
    Box::pin(out)
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(classify_status(status, &text))
}

/**
 * \brief Map an upstream HTTP status to the error taxonomy.
 */
pub fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = provider_message(body).unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status.to_string()
        } else {
            format!("{} -> {}", status, trimmed)
        }
    });
    match status {
        StatusCode::BAD_REQUEST => ProviderError::BadRequest(detail),
        StatusCode::UNAUTHORIZED => ProviderError::Authentication(detail),
        StatusCode::FORBIDDEN => ProviderError::PermissionDenied(detail),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimit(detail),
        _ => ProviderError::Server(detail),
    }
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::Unknown(format!("invalid provider response: {}", err))
    } else if err.is_builder() {
        ProviderError::Unknown(err.to_string())
    } else {
        ProviderError::Connection(err.to_string())
    }
}

// A body that was cut off after the response started.
fn stream_interrupted(err: reqwest::Error) -> ProviderError {
    ProviderError::Connection(err.to_string())
}

fn provider_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    error_message(&v)
}

fn error_message(v: &Value) -> Option<String> {
    let error = v.get("error").filter(|e| !e.is_null())?;
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
        .or_else(|| error.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| error.to_string());
    Some(message)
}

/**
 * \brief One `data:` payload: `Ok(Some)` for content, `Ok(None)` to skip, `Err` for an upstream error.
 */
fn parse_stream_frame(line: &str) -> Result<Option<String>, ProviderError> {
    let v: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };
    if let Some(message) = error_message(&v) {
        return Err(ProviderError::Server(message));
    }
    Ok(openai_delta(&v))
}

fn header_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn extract_completion(v: &Value) -> Result<Completion, ProviderError> {
    let first = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or(ProviderError::EmptyResponse)?;
    let reply = first
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();
    let request_id = v
        .get("id")
        .and_then(|id| id.as_str())
        .unwrap_or("")
        .to_string();
    Ok(Completion { reply, request_id })
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn extract_data_line(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    text.lines()
        .map(str::trim_start)
        .find_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim().to_string())
}

fn openai_delta(v: &Value) -> Option<String> {
    v.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

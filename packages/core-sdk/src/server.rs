use std::{convert::Infallible, sync::Arc, time::Duration, time::Instant};

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::config::{ConfigError, Settings};
use crate::llm::{OpenAiClient, ProviderError};
use crate::models::{ChatRequest, ChatResponse, ErrorBody};
use crate::prompt::build_messages;

const CORS_MAX_AGE: Duration = Duration::from_secs(3600);

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
}

/**
 * \brief Build the HTTP application: `/health`, `/chat`, `/chat/stream` plus CORS.
 */
pub fn router(settings: Arc<Settings>) -> Router {
    let cors = cors_layer(&settings.cors_origins);
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .layer(cors)
        .with_state(AppState { settings })
}

/**
 * \brief Start the HTTP service.
 * \param addr Listen address, e.g. "127.0.0.1:8000"
 */
pub async fn run(settings: Arc<Settings>, addr: &str) -> Result<()> {
    log_startup(&settings);
    let app = router(settings);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief Report provider configuration once at startup. A missing key is not fatal.
 */
pub fn log_startup(settings: &Settings) {
    if settings.has_api_key() {
        tracing::info!(
            model = %settings.openai_model,
            timeout = settings.request_timeout_seconds,
            "OpenAI configured"
        );
    } else {
        tracing::warn!(
            "OPENAI_API_KEY is not set. Chat endpoints will return errors until configured."
        );
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(%origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .max_age(CORS_MAX_AGE)
}

/**
 * \brief Error returned by the JSON routes as `{detail}`.
 */
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn unprocessable(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: e.to_string(),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        Self {
            status: status_for(&e),
            detail: error_detail(&e),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

/**
 * \brief HTTP status for each provider failure; the stream route reuses it in error frames.
 */
pub fn status_for(err: &ProviderError) -> StatusCode {
    match err {
        ProviderError::Authentication(_) => StatusCode::UNAUTHORIZED,
        ProviderError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
        ProviderError::Connection(_) => StatusCode::GATEWAY_TIMEOUT,
        ProviderError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ProviderError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ProviderError::Server(_) | ProviderError::EmptyResponse | ProviderError::Unknown(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_detail(err: &ProviderError) -> String {
    match err {
        ProviderError::Authentication(_) => "Invalid OpenAI API key".to_string(),
        ProviderError::RateLimit(_) => "OpenAI rate limit exceeded. Please try again.".to_string(),
        ProviderError::Connection(_) => "Unable to reach OpenAI service (network).".to_string(),
        ProviderError::BadRequest(d) => format!("Bad request to OpenAI: {}", d),
        ProviderError::PermissionDenied(_) => "OpenAI permission denied".to_string(),
        ProviderError::Server(_) | ProviderError::EmptyResponse => {
            format!("OpenAI API error: {}", err.detail())
        }
        ProviderError::Unknown(d) => format!("Unexpected error: {}", d),
    }
}

fn stream_error_message(err: &ProviderError) -> String {
    match err {
        ProviderError::Authentication(_) => "Invalid OpenAI API key".to_string(),
        ProviderError::RateLimit(_) => "OpenAI rate limit exceeded".to_string(),
        ProviderError::Connection(_) => "Unable to reach OpenAI service".to_string(),
        ProviderError::BadRequest(d) => format!("Bad request: {}", d),
        ProviderError::PermissionDenied(_) => "OpenAI permission denied".to_string(),
        ProviderError::Server(_) | ProviderError::EmptyResponse => {
            format!("OpenAI API error: {}", err.detail())
        }
        ProviderError::Unknown(d) => format!("Unexpected error: {}", d),
    }
}

fn error_event(err: &ProviderError) -> Event {
    Event::default().event("error").data(sse_safe(&format!(
        "{} {}",
        status_for(err).as_u16(),
        stream_error_message(err)
    )))
}

// SSE field values may not carry bare carriage returns.
fn sse_safe(text: &str) -> String {
    if text.contains('\r') {
        text.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        text.to_string()
    }
}

fn parse_request(payload: Result<Json<ChatRequest>, JsonRejection>) -> Result<ChatRequest, ApiError> {
    let Json(req) = payload?;
    req.validate().map_err(ApiError::unprocessable)?;
    Ok(req)
}

async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

/**
 * \brief POST /chat: one-shot reply.
 */
async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let req = parse_request(payload)?;
    let client = OpenAiClient::new(&state.settings)?;

    let t0 = Instant::now();
    let messages = build_messages(&req.message, req.role, req.preferred_name());
    let completion = client.complete(&messages).await.map_err(|e| {
        tracing::warn!(error = %e, role = %req.role, "chat failed");
        ApiError::from(e)
    })?;
    tracing::info!(
        openai_request_id = %completion.request_id,
        latency_sec = t0.elapsed().as_secs_f64(),
        "chat completed"
    );

    Ok(Json(ChatResponse {
        reply: completion.reply,
        model: client.model().to_string(),
    }))
}

/**
 * \brief POST /chat/stream: token-by-token SSE. Provider failures become one `error` event.
 */
async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let req = parse_request(payload)?;
    let client = OpenAiClient::new(&state.settings)?;
    let messages = build_messages(&req.message, req.role, req.preferred_name());

    let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();

    tokio::spawn(async move {
        let t0 = Instant::now();
        let opened = tokio::select! {
            _ = tx.closed() => None,
            res = client.stream_complete(&messages) => Some(res),
        };

        match opened {
            None => tracing::debug!("client went away before the stream opened"),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "stream failed");
                let _ = tx.send(Ok(error_event(&e)));
            }
            Some(Ok(mut tokens)) => loop {
                let item = tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!("client disconnected mid-stream");
                        break;
                    }
                    item = tokens.next() => item,
                };
                match item {
                    Some(Ok(token)) => {
                        if tx.send(Ok(Event::default().data(sse_safe(&token)))).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "stream error");
                        let _ = tx.send(Ok(error_event(&e)));
                        break;
                    }
                    None => break,
                }
            },
        }

        tracing::info!(
            latency_sec = t0.elapsed().as_secs_f64(),
            "stream finished"
        );
    });

    let stream = UnboundedReceiverStream::new(rx);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new()))
}

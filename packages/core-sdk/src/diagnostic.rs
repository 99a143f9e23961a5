use std::time::Instant;

use serde::Serialize;

use crate::config::{ConfigError, Settings};
use crate::llm::{CompletionOptions, OpenAiClient, ProviderError};
use crate::models::Message;

const SNIPPET_CHARS: usize = 80;

/**
 * \brief Outcome of a one-shot provider smoke test, printed as JSON by `sally check`.
 */
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProbeReport {
    Success {
        ok: bool,
        model: String,
        request_id: String,
        latency_sec: f64,
        snippet: String,
    },
    Failure {
        ok: bool,
        error: String,
    },
}

impl ProbeReport {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeReport::Success { .. })
    }

    fn failure(error: impl Into<String>) -> Self {
        ProbeReport::Failure {
            ok: false,
            error: error.into(),
        }
    }
}

/**
 * \brief Send a minimal prompt and report latency, request id and a reply snippet.
 */
pub async fn probe(settings: &Settings) -> ProbeReport {
    let client = match OpenAiClient::new(settings) {
        Ok(client) => client,
        Err(ConfigError::MissingApiKey) => {
            return ProbeReport::failure("OPENAI_API_KEY not set. Add it to .env");
        }
        Err(e) => return ProbeReport::failure(e.to_string()),
    };

    let messages = [Message::system("Be brief."), Message::user("Say 'ok'.")];
    let options = CompletionOptions {
        temperature: 0.0,
        max_tokens: Some(8),
    };

    let t0 = Instant::now();
    match client.complete_with(&messages, &options).await {
        Ok(completion) => {
            let latency = t0.elapsed().as_secs_f64();
            ProbeReport::Success {
                ok: true,
                model: client.model().to_string(),
                request_id: completion.request_id,
                latency_sec: (latency * 1000.0).round() / 1000.0,
                snippet: completion
                    .reply
                    .trim()
                    .chars()
                    .take(SNIPPET_CHARS)
                    .collect(),
            }
        }
        Err(e) => ProbeReport::failure(failure_text(&e)),
    }
}

fn failure_text(err: &ProviderError) -> String {
    match err {
        ProviderError::Authentication(_) => "Invalid OpenAI API key (401)".to_string(),
        ProviderError::PermissionDenied(_) => {
            "Permission denied for model (403). Check model access or use a different model."
                .to_string()
        }
        ProviderError::RateLimit(_) => "Rate limit exceeded (429)".to_string(),
        ProviderError::Connection(_) => {
            "Network error contacting OpenAI (connectivity)".to_string()
        }
        ProviderError::BadRequest(d) => format!("Bad request: {}", d),
        ProviderError::Server(d) => format!("OpenAI API error: {}", d),
        ProviderError::EmptyResponse => format!("OpenAI API error: {}", err.detail()),
        ProviderError::Unknown(d) => format!("Unexpected error: {}", d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_probe_without_key() {
        let report = probe(&Settings::default()).await;
        assert!(!report.is_ok());
        assert_eq!(
            serde_json::to_value(&report).expect("serialize"),
            json!({"ok": false, "error": "OPENAI_API_KEY not set. Add it to .env"})
        );
    }

    #[test]
    fn test_success_shape() {
        let report = ProbeReport::Success {
            ok: true,
            model: "gpt-4o-mini".into(),
            request_id: "req".into(),
            latency_sec: 0.25,
            snippet: "ok".into(),
        };
        assert_eq!(
            serde_json::to_value(&report).expect("serialize"),
            json!({
                "ok": true,
                "model": "gpt-4o-mini",
                "request_id": "req",
                "latency_sec": 0.25,
                "snippet": "ok"
            })
        );
    }

    #[test]
    fn test_failure_texts() {
        assert_eq!(
            failure_text(&ProviderError::Authentication(String::new())),
            "Invalid OpenAI API key (401)"
        );
        assert_eq!(
            failure_text(&ProviderError::BadRequest("max_tokens too small".into())),
            "Bad request: max_tokens too small"
        );
    }
}

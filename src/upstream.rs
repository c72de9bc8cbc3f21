//! HTTP plumbing shared by embedding and generation backends.
//!
//! Backends report failures as [`BackendFailure`]; [`normalize_failure`]
//! is the single place where those become [`RagError`] variants.

use reqwest::RequestBuilder;
use serde_json::Value;

use docchat_core::error::{truncate_chars, RagError};

/// Longest upstream error message carried into a [`RagError::UpstreamStatus`].
const MAX_STATUS_MESSAGE: usize = 300;

/// A backend call that did not produce a usable response.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendFailure {
    /// The route needs a credential that the tenant has not configured.
    MissingCredential(String),
    /// The provider answered with a non-success status.
    Status { status: u16, message: String },
    /// Connection refused, DNS failure or timeout.
    Unreachable(String),
    /// Any other failure, including unparseable responses.
    Other(String),
}

impl From<reqwest::Error> for BackendFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            BackendFailure::Unreachable(e.to_string())
        } else if let Some(status) = e.status() {
            BackendFailure::Status {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            BackendFailure::Other(e.to_string())
        }
    }
}

/// Map a backend failure for `model` onto the error taxonomy.
///
/// | Failure | Error |
/// |---------|-------|
/// | missing credential | `Configuration` |
/// | error status | `UpstreamStatus` |
/// | unreachable | `UpstreamUnavailable` |
/// | other, mentioning authentication / api_key / unauthorized | `Configuration` |
/// | other | `Generation`, message cut to 200 chars |
pub fn normalize_failure(model: &str, failure: BackendFailure) -> RagError {
    match failure {
        BackendFailure::MissingCredential(what) => {
            RagError::Configuration(format!("missing {what} for model '{model}'"))
        }
        BackendFailure::Status { status, message } => RagError::UpstreamStatus {
            status,
            message: format!("{model}: {}", truncate_chars(&message, MAX_STATUS_MESSAGE)),
        },
        BackendFailure::Unreachable(msg) => RagError::UpstreamUnavailable(format!(
            "cannot reach '{model}': {}",
            truncate_chars(&msg, MAX_STATUS_MESSAGE)
        )),
        BackendFailure::Other(msg) => {
            let lower = msg.to_lowercase();
            if ["authentication", "api_key", "unauthorized"]
                .iter()
                .any(|needle| lower.contains(needle))
            {
                RagError::Configuration(format!("invalid API key for model '{model}'"))
            } else {
                RagError::generation(format!("model '{model}': {msg}"))
            }
        }
    }
}

/// Send a JSON request and return the decoded JSON body of a success
/// response.
pub async fn send_json(request: RequestBuilder) -> Result<Value, BackendFailure> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendFailure::Status {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| BackendFailure::Other(format!("invalid response body: {e}")))
}

/// Best-effort error text from a provider error body.
///
/// OpenAI-compatible and Anthropic bodies carry `{"error": {"message": ..}}`;
/// Ollama uses `{"error": ".."}`. Anything else is returned verbatim.
pub fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = json
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| json.get("error").and_then(Value::as_str))
        {
            return msg.to_string();
        }
    }
    body.trim().to_string()
}

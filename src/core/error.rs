use hyper::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::core::utils::create_error_preview;

/// Failure talking to a third-party provider. The raw body is always kept for diagnostics.
#[derive(Debug, Clone, Error)]
#[error("{reason} ({url}{})", status_suffix(.status))]
pub struct UpstreamError {
    pub url: String,
    pub status: Option<u16>,
    pub body: String,
    pub reason: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(", status {}", code),
        None => String::new(),
    }
}

impl UpstreamError {
    pub fn http(url: &str, status: u16, body: String) -> Self {
        Self {
            url: url.to_string(),
            status: Some(status),
            reason: format!("upstream returned HTTP {}", status),
            body,
        }
    }

    pub fn transport(url: &str, err: &reqwest::Error) -> Self {
        Self {
            url: url.to_string(),
            status: None,
            body: String::new(),
            reason: format!("request failed: {}", err),
        }
    }

    pub fn parse(url: &str, body: String, err: &serde_json::Error) -> Self {
        Self {
            url: url.to_string(),
            status: None,
            body,
            reason: format!("malformed JSON: {}", err),
        }
    }

    pub fn schema(url: &str, reason: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            status: None,
            body: String::new(),
            reason: reason.into(),
        }
    }

    /// Short, single-line description that is safe to hand back to the browser
    pub fn diagnostic(&self) -> String {
        let mut message = self.to_string();
        if !self.body.is_empty() {
            message.push_str(": ");
            message.push_str(&create_error_preview(self.body.trim(), 200));
        }
        message
    }
}

/// One identifier in a batch could not be resolved. Reported inline on a placeholder record.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct PartialRecordError {
    pub message: String,
}

impl PartialRecordError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<UpstreamError> for PartialRecordError {
    fn from(err: UpstreamError) -> Self {
        Self::new(err.diagnostic())
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,
}

/// JSON error body returned for every failed call
#[derive(Debug, Serialize, PartialEq)]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProxyError {
    pub fn missing_credential(variable: &str) -> Self {
        ProxyError::Configuration(format!("Missing {} env var", variable))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::Configuration(_) => "configuration_error",
            ProxyError::Upstream(_) => "upstream_failed",
            ProxyError::Validation(_) => "invalid_request",
            ProxyError::NotFound(_) => "not_found",
            ProxyError::MethodNotAllowed => "method_not_allowed",
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let message = match self {
            ProxyError::Configuration(msg)
            | ProxyError::Validation(msg)
            | ProxyError::NotFound(msg) => Some(msg.clone()),
            ProxyError::Upstream(err) => Some(err.diagnostic()),
            ProxyError::MethodNotAllowed => None,
        };
        ErrorEnvelope {
            error: self.code().to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ProxyError::missing_credential("GLACIER_API_KEY").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::Upstream(UpstreamError::http("http://x", 503, String::new())).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = ProxyError::missing_credential("GLACIER_API_KEY").envelope();
        assert_eq!(envelope.error, "configuration_error");
        assert_eq!(envelope.message.as_deref(), Some("Missing GLACIER_API_KEY env var"));

        let json = serde_json::to_value(ProxyError::MethodNotAllowed.envelope()).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "method_not_allowed" }));
    }

    #[test]
    fn test_upstream_diagnostic_includes_status_and_body() {
        let err = UpstreamError::http(
            "https://beaconcha.in/api/v1/epoch/latest",
            503,
            "service unavailable".to_string(),
        );
        let diagnostic = err.diagnostic();
        assert!(diagnostic.contains("503"));
        assert!(diagnostic.contains("service unavailable"));
        assert!(diagnostic.contains("beaconcha.in"));
    }
}

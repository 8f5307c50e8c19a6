//! Centralized error types for stormgate.
//!
//! This module provides a closed error taxonomy that:
//! - Lets retry and circuit logic classify failures without inspecting
//!   arbitrary error shapes
//! - Provides user-friendly messages suitable for display
//! - Preserves full error context for logging

use thiserror::Error;

use crate::provider::ProviderId;

/// HTTP statuses treated as transient.
pub const RETRYABLE_HTTP_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Classification of a single provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NetworkError,
    Timeout,
    HttpRetryable,
    HttpTerminal,
    InvalidResponse,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::NetworkError | FailureKind::Timeout | FailureKind::HttpRetryable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::NetworkError => "network_error",
            FailureKind::Timeout => "timeout",
            FailureKind::HttpRetryable => "http_retryable",
            FailureKind::HttpTerminal => "http_terminal",
            FailureKind::InvalidResponse => "invalid_response",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by provider adapters.
///
/// Adapters must map every failure into one of these variants; the retry
/// executor and the circuit registry only ever see this type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        ProviderError::Http {
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::Network(_) => FailureKind::NetworkError,
            ProviderError::Timeout => FailureKind::Timeout,
            ProviderError::Http { status, .. } if RETRYABLE_HTTP_STATUSES.contains(status) => {
                FailureKind::HttpRetryable
            }
            ProviderError::Http { .. } => FailureKind::HttpTerminal,
            ProviderError::InvalidResponse(_) => FailureKind::InvalidResponse,
        }
    }

    /// Whether another attempt against the same provider may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            FailureKind::NetworkError => "Unable to reach the weather service.",
            FailureKind::Timeout => "The weather service took too long to respond.",
            FailureKind::HttpRetryable => "The weather service is busy. Retrying shortly.",
            FailureKind::HttpTerminal => "The weather service rejected the request.",
            FailureKind::InvalidResponse => "The weather service returned unreadable data.",
        }
    }
}

/// Orchestrator-level errors surfaced to callers.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("All weather providers exhausted ({}) and no usable cached reading", format_attempts(.attempted))]
    AllProvidersExhausted {
        attempted: Vec<(ProviderId, Option<FailureKind>)>,
    },

    #[error("No weather providers configured")]
    NoProviders,
}

fn format_attempts(attempted: &[(ProviderId, Option<FailureKind>)]) -> String {
    attempted
        .iter()
        .map(|(provider, kind)| match kind {
            Some(kind) => format!("{}: {}", provider, kind),
            None => format!("{}: circuit open", provider),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl WeatherError {
    pub fn user_message(&self) -> &'static str {
        match self {
            WeatherError::AllProvidersExhausted { .. } => {
                "Live weather is unavailable. Enter conditions manually."
            }
            WeatherError::NoProviders => "No weather source is configured. Check settings.",
        }
    }
}

/// Key/value storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlite(String),

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn user_message(&self) -> &'static str {
        match self {
            StorageError::Io(_) => "A file operation failed. Please try again.",
            StorageError::Sqlite(_) => "Unable to access local data. Try restarting the app.",
            StorageError::Corrupt(_) => {
                "Saved weather data could not be read and was ignored."
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "Configuration not found. Using defaults.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}

/// Extension trait for converting reqwest errors into the provider taxonomy.
pub trait ReqwestErrorExt {
    fn into_provider_error(self) -> ProviderError;

    /// Classify an error raised while streaming a response body. The
    /// status line already arrived, so anything but a timeout is a broken
    /// connection rather than a bad payload.
    fn into_transport_error(self) -> ProviderError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_provider_error(self) -> ProviderError {
        if self.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = self.status() {
            ProviderError::Http {
                status: status.as_u16(),
                message: self.to_string(),
            }
        } else if self.is_decode() {
            ProviderError::InvalidResponse(self.to_string())
        } else {
            ProviderError::Network(self.to_string())
        }
    }

    fn into_transport_error(self) -> ProviderError {
        if self.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Network(self.to_string())
        }
    }
}

/// Extension trait for converting rusqlite errors to storage errors.
pub trait RusqliteErrorExt {
    fn into_storage_error(self) -> StorageError;
}

impl RusqliteErrorExt for rusqlite::Error {
    fn into_storage_error(self) -> StorageError {
        match &self {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("corrupt") => {
                StorageError::Corrupt(self.to_string())
            }
            _ => StorageError::Sqlite(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_retryable_http_statuses() {
        for status in [429, 502, 503, 504] {
            let err = ProviderError::http(status, "transient");
            assert_eq!(err.kind(), FailureKind::HttpRetryable);
            assert!(err.is_retryable(), "{} should be retryable", status);
        }
    }

    #[test]
    fn test_terminal_http_statuses() {
        for status in [400, 401, 403, 404, 500, 501] {
            let err = ProviderError::http(status, "nope");
            assert_eq!(err.kind(), FailureKind::HttpTerminal);
            assert!(!err.is_retryable(), "{} should not be retryable", status);
        }
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(ProviderError::Network("connection reset".into()).is_retryable());
        assert!(ProviderError::Timeout.is_retryable());
    }

    #[test]
    fn test_invalid_response_is_terminal() {
        let err = ProviderError::InvalidResponse("missing temp".into());
        assert_eq!(err.kind(), FailureKind::InvalidResponse);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_failure_kind_names() {
        assert_eq!(FailureKind::NetworkError.to_string(), "network_error");
        assert_eq!(FailureKind::HttpRetryable.as_str(), "http_retryable");
    }

    #[test]
    fn test_exhausted_error_lists_attempts() {
        let err = WeatherError::AllProvidersExhausted {
            attempted: vec![
                (ProviderId::from("primary"), Some(FailureKind::Timeout)),
                (ProviderId::from("secondary"), None),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("primary: timeout"));
        assert!(msg.contains("secondary: circuit open"));
        assert_eq!(
            err.user_message(),
            "Live weather is unavailable. Enter conditions manually."
        );
    }

    #[test]
    fn test_user_messages_are_non_empty() {
        let messages = [
            ProviderError::Timeout.user_message(),
            WeatherError::NoProviders.user_message(),
            StorageError::Corrupt("x".into()).user_message(),
            ConfigError::Invalid("x".into()).user_message(),
        ];
        for message in messages {
            assert!(!message.is_empty());
        }
    }
}

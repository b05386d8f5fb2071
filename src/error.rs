//! Error types for pganalytics
//!
//! All errors implement `IntoResponse` for Axum handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read configuration file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Configuration file {path} failed validation: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid tenant identifier {tenant:?}: {reason}")]
    InvalidIdentifier { tenant: String, reason: String },

    #[error("Exposition output of {needed} bytes exceeds buffer capacity of {capacity} bytes")]
    BufferExceeded { needed: usize, capacity: usize },

    #[error("No pooled connection available for tenant {tenant}")]
    ConnectionUnavailable { tenant: String },

    #[error("Metric query failed for tenant {tenant}: {reason}")]
    QueryFailed { tenant: String, reason: String },

    #[error("Connection pool initialization failed for tenant {tenant}: {reason}")]
    PoolInitFailed { tenant: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::ConfigFileRead { .. } => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Self::ConfigParseFailed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Self::ConfigValidationFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            // A bad identifier or an undersized buffer is a server-side
            // contract violation, not a client error: surface as 500.
            Self::InvalidIdentifier { .. } => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Self::BufferExceeded { .. } => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            // Collection-side failures are recovered locally and never
            // surface to scrape callers; the mappings below are fallbacks.
            Self::ConnectionUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            Self::QueryFailed { .. } => (StatusCode::BAD_GATEWAY, self.to_string()),
            Self::PoolInitFailed { .. } => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_creates() {
        let err = AppError::Config("test error".to_string());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_invalid_identifier_error_mentions_tenant() {
        let err = AppError::InvalidIdentifier {
            tenant: "evil\ntenant".to_string(),
            reason: "contains disallowed character".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("evil\\ntenant"));
        assert!(msg.contains("disallowed"));
    }

    #[test]
    fn test_buffer_exceeded_error_reports_sizes() {
        let err = AppError::BufferExceeded {
            needed: 8192,
            capacity: 4096,
        };
        let msg = err.to_string();
        assert!(msg.contains("8192"));
        assert!(msg.contains("4096"));
    }

    #[test]
    fn test_invalid_identifier_response_status() {
        let err = AppError::InvalidIdentifier {
            tenant: "a\"b".to_string(),
            reason: "contains disallowed character".to_string(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_buffer_exceeded_response_status() {
        let err = AppError::BufferExceeded {
            needed: 100,
            capacity: 10,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_query_failed_response_status() {
        let err = AppError::QueryFailed {
            tenant: "acme".to_string(),
            reason: "connection reset".to_string(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_internal_error_response_status() {
        let err = AppError::Internal("unexpected state".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Error taxonomy shared by the planner, the controller and the stream.
//!
//! Sub-query failures are data, not Rust errors: they end up in an
//! [`ErrorInfo`] inside a terminal `ExecutionResult`. The `thiserror` enums
//! below are only for failures of the crate's own machinery.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a sub-query or plan failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing parameters. Never retried.
    Validation,
    /// Missing identifying credentials or context. Surfaced as a question.
    AuthRequired,
    /// Network, timeout or server-side failure. Retried per policy.
    Transient,
    /// Unknown data source or invalid plan graph. Aborts the whole plan.
    Structural,
    /// Sub-query retry budget or plan deadline expired.
    Timeout,
    /// Caller cancelled the execution.
    Cancelled,
    /// An upstream sub-query did not succeed.
    DependencyFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::Transient => "transient",
            ErrorKind::Structural => "structural",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DependencyFailed => "dependency_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-level description of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
        }
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.http_status {
            Some(status) => write!(f, "{} (HTTP {}): {}", self.kind, status, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Errors raised while building or validating a plan graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Duplicate sub-query id: {0}")]
    DuplicateId(String),

    #[error("Sub-query '{query}' depends on unknown sub-query '{dependency}'")]
    UnknownDependency { query: String, dependency: String },

    #[error("Dependency cycle detected among: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Corrupt pattern registry: {0}")]
    CorruptPatternRegistry(String),
}

impl PlanError {
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(ErrorKind::Structural, self.to_string())
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid keyword corpus: {0}")]
    Corpus(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_display_includes_status() {
        let info = ErrorInfo::new(ErrorKind::Transient, "upstream unavailable").with_http_status(503);
        assert_eq!(info.to_string(), "transient (HTTP 503): upstream unavailable");
    }

    #[test]
    fn test_cycle_message_lists_members() {
        let err = PlanError::Cycle(vec!["sq_a".into(), "sq_b".into()]);
        assert_eq!(err.to_string(), "Dependency cycle detected among: sq_a, sq_b");
        assert_eq!(err.to_error_info().kind, ErrorKind::Structural);
    }
}

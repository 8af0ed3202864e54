//! Tool Executor contract.
//!
//! The executor performs the real call (HTTP, SQL, MCP) for a data source.
//! The controller passes user filters plus two reserved parameters:
//! `_auth_profile` (resolved credential profile name) and `_dependencies`
//! (successful dependency payloads keyed by sub-query id).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub const PARAM_AUTH_PROFILE: &str = "_auth_profile";
pub const PARAM_DEPENDENCIES: &str = "_dependencies";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Network,
    Timeout,
    Server,
    AuthRejected,
    InvalidRequest,
    NotFound,
    Other,
}

/// Failure reported by a tool invocation.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
        }
    }

    /// Build from an HTTP status, inferring the kind.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ToolErrorKind::AuthRejected,
            404 => ToolErrorKind::NotFound,
            408 => ToolErrorKind::Timeout,
            400..=499 => ToolErrorKind::InvalidRequest,
            500..=599 => ToolErrorKind::Server,
            _ => ToolErrorKind::Other,
        };
        Self {
            kind,
            message: message.into(),
            http_status: Some(status),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, message)
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(&self, data_source: &str, params: &Map<String, Value>)
        -> Result<Value, ToolError>;
}

/// Serves canned payloads per data source, used by the CLI `run` command.
///
/// Array payloads honour a numeric `limit` parameter.
#[derive(Debug, Clone, Default)]
pub struct StaticToolExecutor {
    fixtures: HashMap<String, Value>,
}

impl StaticToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixture(mut self, data_source: impl Into<String>, payload: Value) -> Self {
        self.fixtures.insert(data_source.into(), payload);
        self
    }

    /// Data source ids with a fixture, sorted.
    pub fn data_sources(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.fixtures.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Load a JSON object mapping data source ids to payloads.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let fixtures: HashMap<String, Value> = serde_json::from_str(&content)?;
        Ok(Self { fixtures })
    }
}

#[async_trait]
impl ToolExecutor for StaticToolExecutor {
    async fn invoke(
        &self,
        data_source: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let payload = self.fixtures.get(data_source).cloned().ok_or_else(|| {
            ToolError::http(404, format!("no fixture for data source '{}'", data_source))
        })?;

        match (payload, params.get("limit").and_then(Value::as_u64)) {
            (Value::Array(mut rows), Some(limit)) => {
                rows.truncate(limit as usize);
                Ok(Value::Array(rows))
            }
            (payload, _) => Ok(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ToolError::http(503, "down").kind, ToolErrorKind::Server);
        assert_eq!(ToolError::http(403, "nope").kind, ToolErrorKind::AuthRejected);
        assert_eq!(ToolError::http(422, "bad").kind, ToolErrorKind::InvalidRequest);
        assert_eq!(ToolError::http(404, "gone").http_status, Some(404));
    }

    #[tokio::test]
    async fn test_static_executor_limit() {
        let executor = StaticToolExecutor::new().with_fixture("courses", json!([1, 2, 3]));
        let mut params = Map::new();
        params.insert("limit".into(), json!(2));
        assert_eq!(executor.invoke("courses", &params).await.unwrap(), json!([1, 2]));

        let err = executor.invoke("sales", &Map::new()).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::NotFound);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixtures.json");
        std::fs::write(&path, r#"{"courses": [{"name": "Rust"}]}"#).unwrap();
        let executor = StaticToolExecutor::from_json_file(&path).unwrap();
        assert_eq!(executor.data_sources(), vec!["courses".to_string()]);
    }
}

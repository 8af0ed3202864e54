//! Core data model shared by the planner, the controller and the stream.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{ErrorInfo, ErrorKind, PlanError};
use crate::planner::dag::QueryDag;

/// How demanding a request is. Ordered so that `High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Scheduling and delivery policy for the sub-queries of one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamingStrategy {
    /// One sub-query at a time, results delivered in plan order.
    Sequential,
    /// All sub-queries independent, results delivered as they finish.
    Parallel,
    /// Independent groups in parallel, dependents after their dependencies.
    Hybrid,
}

/// One decomposed, independently executable unit of data retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuery {
    /// Unique within a plan. Well-known shapes use stable ids such as `sq_courses`.
    pub id: String,
    pub description: String,
    pub data_source: String,
    #[serde(default)]
    pub filters: Map<String, Value>,
    pub expected_results: u32,
    pub priority: Priority,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl SubQuery {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        data_source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            data_source: data_source.into(),
            filters: Map::new(),
            expected_results: 1,
            priority: Priority::Medium,
            depends_on: vec![],
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_expected_results(mut self, expected: u32) -> Self {
        self.expected_results = expected;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// A planned request. Immutable once produced by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexQuery {
    pub original_intent: String,
    pub complexity: Complexity,
    pub sub_queries: Vec<SubQuery>,
    pub streaming_strategy: StreamingStrategy,
    pub estimated_time_ms: u64,
}

impl ComplexQuery {
    pub fn sub_query(&self, id: &str) -> Option<&SubQuery> {
        self.sub_queries.iter().find(|sq| sq.id == id)
    }

    pub fn sub_query_ids(&self) -> Vec<&str> {
        self.sub_queries.iter().map(|sq| sq.id.as_str()).collect()
    }

    /// Check ids are unique, every dependency exists and the graph is acyclic.
    pub fn validate(&self) -> Result<QueryDag, PlanError> {
        QueryDag::build(&self.sub_queries)
    }
}

/// Lifecycle of one sub-query inside the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubQueryStatus {
    Pending,
    AuthResolved,
    Running,
    Succeeded,
    AwaitingUserInput,
    Failed,
}

impl SubQueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubQueryStatus::Pending => "pending",
            SubQueryStatus::AuthResolved => "auth_resolved",
            SubQueryStatus::Running => "running",
            SubQueryStatus::Succeeded => "succeeded",
            SubQueryStatus::AwaitingUserInput => "awaiting_user_input",
            SubQueryStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubQueryStatus::Succeeded | SubQueryStatus::AwaitingUserInput | SubQueryStatus::Failed
        )
    }
}

/// A targeted question for the user when execution cannot proceed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationRequest {
    pub query_id: String,
    pub question: String,
    /// Parameter names whose values would unblock the sub-query.
    pub missing_params: Vec<String>,
    /// `AuthRequired` or `Validation`.
    pub reason: ErrorKind,
}

/// Terminal outcome of a sub-query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubQueryOutcome {
    Succeeded { data: Value },
    AwaitingUserInput { clarification: ClarificationRequest },
    Failed { error: ErrorInfo },
}

impl SubQueryOutcome {
    pub fn status(&self) -> SubQueryStatus {
        match self {
            SubQueryOutcome::Succeeded { .. } => SubQueryStatus::Succeeded,
            SubQueryOutcome::AwaitingUserInput { .. } => SubQueryStatus::AwaitingUserInput,
            SubQueryOutcome::Failed { .. } => SubQueryStatus::Failed,
        }
    }
}

/// One per executed sub-query. Immutable once emitted.
///
/// Serializes with a derived `success` flag next to the `status` tag; the
/// flag is ignored when reading.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub query_id: String,
    #[serde(flatten)]
    pub outcome: SubQueryOutcome,
    pub execution_time_ms: u64,
    pub retries: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionResultWire<'a> {
    query_id: &'a str,
    success: bool,
    #[serde(flatten)]
    outcome: &'a SubQueryOutcome,
    execution_time_ms: u64,
    retries: u32,
}

impl Serialize for ExecutionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ExecutionResultWire {
            query_id: &self.query_id,
            success: self.success(),
            outcome: &self.outcome,
            execution_time_ms: self.execution_time_ms,
            retries: self.retries,
        }
        .serialize(serializer)
    }
}

impl ExecutionResult {
    pub fn succeeded(query_id: impl Into<String>, data: Value) -> Self {
        Self::from_outcome(query_id, SubQueryOutcome::Succeeded { data })
    }

    pub fn failed(query_id: impl Into<String>, error: ErrorInfo) -> Self {
        Self::from_outcome(query_id, SubQueryOutcome::Failed { error })
    }

    pub fn awaiting_user_input(clarification: ClarificationRequest) -> Self {
        let query_id = clarification.query_id.clone();
        Self::from_outcome(query_id, SubQueryOutcome::AwaitingUserInput { clarification })
    }

    fn from_outcome(query_id: impl Into<String>, outcome: SubQueryOutcome) -> Self {
        Self {
            query_id: query_id.into(),
            outcome,
            execution_time_ms: 0,
            retries: 0,
        }
    }

    pub fn with_timing(mut self, execution_time_ms: u64, retries: u32) -> Self {
        self.execution_time_ms = execution_time_ms;
        self.retries = retries;
        self
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, SubQueryOutcome::Succeeded { .. })
    }

    pub fn status(&self) -> SubQueryStatus {
        self.outcome.status()
    }

    pub fn data(&self) -> Option<&Value> {
        match &self.outcome {
            SubQueryOutcome::Succeeded { data } => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match &self.outcome {
            SubQueryOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn clarification(&self) -> Option<&ClarificationRequest> {
        match &self.outcome {
            SubQueryOutcome::AwaitingUserInput { clarification } => Some(clarification),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub title: String,
    pub estimated_render_time_ms: u64,
    pub record_count: usize,
    pub source: String,
}

/// A bounded slice of a sub-query's result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChunk {
    pub chunk_id: String,
    pub query_id: String,
    /// Always `< total_chunks`.
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub data: Vec<Value>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamEventType {
    Html,
    Chunk,
    Progress,
    Complete,
    Error,
}

/// The wire-level unit emitted to the caller, totally ordered per connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// In `0.0..=1.0`, non-decreasing within a stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StreamEvent {
    fn new(event_type: StreamEventType) -> Self {
        Self {
            event_type,
            data: None,
            progress: None,
            message: None,
        }
    }

    pub fn html(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(StreamEventType::Html)
        }
    }

    pub fn chunk(chunk: &DataChunk) -> Self {
        Self {
            data: serde_json::to_value(chunk).ok(),
            ..Self::new(StreamEventType::Chunk)
        }
    }

    pub fn progress(progress: f64, message: impl Into<String>) -> Self {
        Self {
            progress: Some(progress.clamp(0.0, 1.0)),
            message: Some(message.into()),
            ..Self::new(StreamEventType::Progress)
        }
    }

    pub fn complete(summary: Value) -> Self {
        Self {
            data: Some(summary),
            progress: Some(1.0),
            ..Self::new(StreamEventType::Complete)
        }
    }

    pub fn error(message: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            message: Some(message.into()),
            ..Self::new(StreamEventType::Error)
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self.event_type {
            StreamEventType::Complete => true,
            StreamEventType::Error => self
                .data
                .as_ref()
                .and_then(|d| d.get("scope"))
                .and_then(Value::as_str)
                == Some("plan"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sub_query_builder() {
        let sq = SubQuery::new("sq_metrics", "Aggregate enrollments", "analytics")
            .with_filter("location", "São Paulo")
            .with_expected_results(10)
            .with_priority(Priority::Low)
            .with_dependencies(["sq_enrollments"]);

        assert_eq!(sq.depends_on, vec!["sq_enrollments".to_string()]);
        assert_eq!(sq.filters.get("location"), Some(&json!("São Paulo")));
        assert_eq!(sq.priority, Priority::Low);
    }

    #[test]
    fn test_complexity_ordering() {
        assert!(Complexity::High > Complexity::Medium);
        assert!(Complexity::Medium > Complexity::Low);
    }

    #[test]
    fn test_execution_result_wire_shape() {
        let result = ExecutionResult::succeeded("sq_courses", json!([1, 2])).with_timing(12, 1);
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["queryId"], "sq_courses");
        assert_eq!(wire["status"], "succeeded");
        assert_eq!(wire["retries"], 1);
        assert_eq!(wire["success"], true);
        assert!(result.success());

        let back: ExecutionResult = serde_json::from_value(wire).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_failed_result_serializes_success_false() {
        let result = ExecutionResult::failed(
            "sq_sales",
            ErrorInfo::new(ErrorKind::Transient, "down").with_http_status(503),
        );
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["success"], false);
        assert_eq!(wire["status"], "failed");
        assert_eq!(wire["error"]["httpStatus"], 503);

        let back: ExecutionResult = serde_json::from_value(wire).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_awaiting_user_input_is_not_success() {
        let result = ExecutionResult::awaiting_user_input(ClarificationRequest {
            query_id: "sq_companies".into(),
            question: "Which company?".into(),
            missing_params: vec!["company_id".into()],
            reason: ErrorKind::AuthRequired,
        });
        assert!(!result.success());
        assert!(result.error().is_none());
        assert_eq!(result.status(), SubQueryStatus::AwaitingUserInput);
    }

    #[test]
    fn test_stream_event_terminal_detection() {
        assert!(StreamEvent::complete(json!({})).is_terminal());
        assert!(StreamEvent::error("boom", json!({"scope": "plan"})).is_terminal());
        assert!(!StreamEvent::error("boom", json!({"scope": "sub_query"})).is_terminal());
        assert!(!StreamEvent::progress(0.5, "half").is_terminal());
    }

    #[test]
    fn test_stream_event_serializes_type_tag() {
        let wire = serde_json::to_value(StreamEvent::progress(1.5, "done")).unwrap();
        assert_eq!(wire, json!({"type": "Progress", "progress": 1.0, "message": "done"}));
    }
}

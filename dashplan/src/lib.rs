// Dashplan Library
// Plans natural-language dashboard requests and executes them as a stream

pub mod config;
pub mod controller;
pub mod error;
pub mod planner;
pub mod registry;
pub mod streaming;
pub mod tool;
pub mod types;

pub use config::{DashplanConfig, ExecutorConfig, PlannerConfig};
pub use controller::{
    ExecutionContext, ExecutionReport, ExecutionStream, StrategicExecutionController,
};
pub use error::{ConfigError, ErrorInfo, ErrorKind, PlanError};
pub use planner::QueryPlanner;
pub use registry::{
    AuthProfile, AuthProfileStore, AuthScope, DataSourceDescriptor, DataSourceKind,
    DataSourceRegistry, InMemoryAuthProfileStore, InMemoryDataSourceRegistry, ParamSpec,
    ParamType,
};
pub use streaming::StreamingCoordinator;
pub use tool::{StaticToolExecutor, ToolError, ToolErrorKind, ToolExecutor};
pub use types::*;

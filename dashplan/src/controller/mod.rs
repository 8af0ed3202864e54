//! Strategic Execution Controller
//!
//! Walks a [`ComplexQuery`] as a dependency DAG and drives every sub-query to
//! a terminal state:
//!
//! ```text
//! Pending -> AuthResolved -> Running -> Succeeded
//!                                    -> AwaitingUserInput
//!                                    -> Failed
//! ```
//!
//! Ready sub-queries (all dependencies `Succeeded`) are dispatched up to
//! `max_concurrent` at a time, one at a time for `Sequential` plans. Each
//! dispatch resolves credentials, validates parameters, then calls the Tool
//! Executor under the retry policy. A sub-query that cannot proceed without
//! the user ends `AwaitingUserInput`; its dependents are held with it so a
//! follow-up turn can resume only the blocked part of the plan.

pub mod auth;
pub mod retry;
pub mod validation;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::ExecutorConfig;
use crate::error::{ErrorInfo, ErrorKind};
use crate::planner::dag::QueryDag;
use crate::registry::{AuthProfileStore, DataSourceRegistry};
use crate::streaming::coordinator::{plan_error_event, StreamingCoordinator};
use crate::tool::{ToolExecutor, PARAM_AUTH_PROFILE, PARAM_DEPENDENCIES};
use crate::types::{
    ClarificationRequest, ComplexQuery, ExecutionResult, Priority, StreamEvent, StreamingStrategy,
    SubQuery, SubQueryOutcome, SubQueryStatus,
};

use auth::AuthResolution;
use retry::{FailureClass, Invocation, RetryPolicy};

const EVENT_BUFFER: usize = 64;
/// Answer key that selects a credential profile on resume.
pub const ANSWER_AUTH_PROFILE: &str = "auth_profile";

/// Per-execution inputs from the caller.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub auth_profile_hint: Option<String>,
    /// Merged over every sub-query's filters; user values win.
    pub user_supplied_params: Map<String, Value>,
    pub cancellation: CancellationToken,
    /// Results from an earlier turn. Succeeded ones are reused, not re-run.
    pub prior_results: HashMap<String, ExecutionResult>,
    /// Replaces the controller's executor config for this plan only
    pub config_override: Option<ExecutorConfig>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth_profile(mut self, profile: impl Into<String>) -> Self {
        self.auth_profile_hint = Some(profile.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.user_supplied_params.insert(key.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config_override = Some(config);
        self
    }

    pub fn with_prior_result(mut self, result: ExecutionResult) -> Self {
        self.prior_results.insert(result.query_id.clone(), result);
        self
    }
}

/// Everything one execution produced.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub plan: ComplexQuery,
    /// Results produced by this run, in plan order.
    pub results: Vec<ExecutionResult>,
    /// Succeeded results from this run and every earlier turn.
    pub succeeded: HashMap<String, ExecutionResult>,
    /// The last event of the stream: `Complete` or a plan-level `Error`.
    pub terminal: StreamEvent,
    pub cancelled: bool,
    /// Every state change of this run, in the order it happened.
    pub transitions: Vec<(String, SubQueryStatus)>,
    auth_profile_hint: Option<String>,
    user_supplied_params: Map<String, Value>,
    config_override: Option<ExecutorConfig>,
}

impl ExecutionReport {
    /// States `query_id` went through in this run, after `Pending`.
    pub fn history(&self, query_id: &str) -> Vec<SubQueryStatus> {
        self.transitions
            .iter()
            .filter(|(id, _)| id == query_id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn result(&self, query_id: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.query_id == query_id)
    }

    pub fn clarifications(&self) -> Vec<&ClarificationRequest> {
        self.results.iter().filter_map(|r| r.clarification()).collect()
    }

    /// Whether a follow-up turn with answers could make progress.
    pub fn needs_user_input(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.status() == SubQueryStatus::AwaitingUserInput)
    }

    /// Context for a follow-up turn.
    ///
    /// Earlier successes are carried over so only blocked sub-queries run
    /// again. An `auth_profile` answer selects the credential profile; every
    /// other answer becomes a user-supplied parameter.
    pub fn resume_context(&self, answers: Map<String, Value>) -> ExecutionContext {
        let mut params = self.user_supplied_params.clone();
        let mut hint = self.auth_profile_hint.clone();
        for (key, value) in answers {
            match (key.as_str(), value.as_str()) {
                (ANSWER_AUTH_PROFILE, Some(profile)) => hint = Some(profile.to_string()),
                _ => {
                    params.insert(key, value);
                }
            }
        }
        ExecutionContext {
            auth_profile_hint: hint,
            user_supplied_params: params,
            cancellation: CancellationToken::new(),
            prior_results: self.succeeded.clone(),
            config_override: self.config_override.clone(),
        }
    }
}

/// Handle to a spawned execution.
///
/// Yields [`StreamEvent`]s as a [`Stream`]. Dropping the handle cancels the
/// execution.
pub struct ExecutionStream {
    events: mpsc::Receiver<StreamEvent>,
    task: JoinHandle<ExecutionReport>,
    cancel: CancellationToken,
    guard: DropGuard,
}

impl ExecutionStream {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Discard unread events and wait for the report.
    pub async fn finish(self) -> Result<ExecutionReport, JoinError> {
        let (_, report) = self.drain().await?;
        Ok(report)
    }

    /// Read every remaining event, then wait for the report.
    pub async fn drain(self) -> Result<(Vec<StreamEvent>, ExecutionReport), JoinError> {
        let Self {
            mut events,
            task,
            guard,
            ..
        } = self;
        let mut collected = Vec::new();
        while let Some(event) = events.recv().await {
            collected.push(event);
        }
        let report = task.await;
        let _token = guard.disarm();
        Ok((collected, report?))
    }
}

impl Stream for ExecutionStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// Sends events downstream; a closed receiver counts as a disconnect.
struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    closed: bool,
}

impl EventSink {
    fn new(tx: mpsc::Sender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            closed: false,
        }
    }

    async fn emit(&mut self, event: StreamEvent) {
        if self.closed {
            return;
        }
        if self.tx.send(event).await.is_err() {
            log::warn!("Stream consumer disconnected, cancelling execution");
            self.closed = true;
            self.cancel.cancel();
        }
    }

    async fn emit_all(&mut self, events: Vec<StreamEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }
}

/// Why the dispatch loop stopped early.
enum Halt {
    Cancelled,
    Deadline,
    Structural(ErrorInfo),
}

/// What an in-flight sub-query future hands back to the dispatch loop.
enum Step {
    /// Credentials and parameters are settled; ready to call the tool.
    Prepared {
        idx: usize,
        params: Map<String, Value>,
        started: Instant,
    },
    Finished {
        idx: usize,
        result: ExecutionResult,
    },
}

/// Sub-query states plus the ordered record of every change.
struct StateTable {
    ids: Vec<String>,
    states: Vec<SubQueryStatus>,
    transitions: Vec<(String, SubQueryStatus)>,
}

impl StateTable {
    fn new(dag: &QueryDag) -> Self {
        let n = dag.len();
        Self {
            ids: (0..n).map(|idx| dag.id(idx).to_string()).collect(),
            states: vec![SubQueryStatus::Pending; n],
            transitions: vec![],
        }
    }

    fn get(&self, idx: usize) -> SubQueryStatus {
        self.states[idx]
    }

    fn set(&mut self, idx: usize, status: SubQueryStatus) {
        self.states[idx] = status;
        self.transitions.push((self.ids[idx].clone(), status));
    }
}

pub struct StrategicExecutionController {
    registry: Arc<dyn DataSourceRegistry>,
    auth_profiles: Arc<dyn AuthProfileStore>,
    tools: Arc<dyn ToolExecutor>,
    config: ExecutorConfig,
}

impl StrategicExecutionController {
    pub fn new(
        registry: Arc<dyn DataSourceRegistry>,
        auth_profiles: Arc<dyn AuthProfileStore>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            registry,
            auth_profiles,
            tools,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Spawn the execution and return a handle streaming its events.
    pub fn execute(self: &Arc<Self>, plan: ComplexQuery, ctx: ExecutionContext) -> ExecutionStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = ctx.cancellation.clone();
        let guard = cancel.clone().drop_guard();
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move { controller.run(&plan, &ctx, tx).await });
        ExecutionStream {
            events: rx,
            task,
            cancel,
            guard,
        }
    }

    /// Execute `plan`, sending events to `events` as they become ready.
    ///
    /// Never fails: sub-query problems end up in the report and the stream.
    pub async fn run(
        &self,
        plan: &ComplexQuery,
        ctx: &ExecutionContext,
        events: mpsc::Sender<StreamEvent>,
    ) -> ExecutionReport {
        let config = ctx.config_override.as_ref().unwrap_or(&self.config);
        let mut sink = EventSink::new(events, ctx.cancellation.clone());

        let dag = match plan.validate() {
            Ok(dag) => dag,
            Err(e) => {
                log::error!("Rejecting plan for '{}': {}", plan.original_intent, e);
                let terminal = plan_error_event(&e.to_error_info());
                sink.emit(terminal.clone()).await;
                return build_report(plan, ctx, vec![], terminal, false);
            }
        };

        let n = dag.len();
        let mut table = StateTable::new(&dag);
        let mut results: Vec<Option<ExecutionResult>> = vec![None; n];
        let mut payloads: Vec<Option<Value>> = vec![None; n];
        let mut dispatched = vec![false; n];

        for idx in 0..n {
            if let Some(prior) = ctx.prior_results.get(dag.id(idx)) {
                if let Some(data) = prior.data() {
                    // Reused, not a change made by this run.
                    table.states[idx] = SubQueryStatus::Succeeded;
                    payloads[idx] = Some(data.clone());
                }
            }
        }
        let tracked: Vec<String> = (0..n)
            .filter(|&idx| table.get(idx) == SubQueryStatus::Pending)
            .map(|idx| dag.id(idx).to_string())
            .collect();

        log::info!(
            "Executing plan for '{}': strategy={:?} sub_queries={} reused={}",
            plan.original_intent,
            plan.streaming_strategy,
            tracked.len(),
            n - tracked.len()
        );

        let mut coordinator = StreamingCoordinator::new(plan, &tracked, config.batch_size);
        sink.emit(coordinator.start()).await;

        let limit = match plan.streaming_strategy {
            StreamingStrategy::Sequential => 1,
            _ => config.max_concurrent.max(1),
        };
        let plan_timeout = config.plan_timeout(plan.estimated_time_ms);
        let deadline = Instant::now() + plan_timeout;
        let mut in_flight: FuturesUnordered<BoxFuture<'_, Step>> = FuturesUnordered::new();
        let mut halt = None;

        loop {
            while in_flight.len() < limit {
                let Some(idx) = next_ready(plan, &dag, &table.states, &dispatched) else {
                    break;
                };
                dispatched[idx] = true;
                in_flight.push(self.prepare_sub_query(idx, &plan.sub_queries[idx], ctx).boxed());
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => {
                    halt = Some(Halt::Cancelled);
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    halt = Some(Halt::Deadline);
                    break;
                }
                Some(step) = in_flight.next() => {
                    let (idx, result) = match step {
                        Step::Prepared { idx, params, started } => {
                            table.set(idx, SubQueryStatus::AuthResolved);
                            table.set(idx, SubQueryStatus::Running);
                            let dependencies = dependency_payloads(&dag, idx, &payloads);
                            in_flight.push(
                                self.invoke_sub_query(
                                    idx,
                                    &plan.sub_queries[idx],
                                    params,
                                    dependencies,
                                    ctx,
                                    config,
                                    started,
                                )
                                .boxed(),
                            );
                            continue;
                        }
                        Step::Finished { idx, result } => (idx, result),
                    };

                    log::info!(
                        "Sub-query {} finished: {} in {}ms ({} retries)",
                        result.query_id,
                        result.status().as_str(),
                        result.execution_time_ms,
                        result.retries
                    );
                    table.set(idx, result.status());

                    let structural = result
                        .error()
                        .filter(|e| e.kind == ErrorKind::Structural)
                        .cloned();
                    if let Some(error) = structural {
                        halt = Some(Halt::Structural(error));
                        results[idx] = Some(result);
                        break;
                    }

                    let mut finished = vec![];
                    match &result.outcome {
                        SubQueryOutcome::Succeeded { data } => payloads[idx] = Some(data.clone()),
                        _ => {
                            for dependent in dag.transitive_dependents(idx) {
                                if table.get(dependent) != SubQueryStatus::Pending {
                                    continue;
                                }
                                if let Some(blocked) = blocked_result(&result, &plan.sub_queries[dependent]) {
                                    table.set(dependent, blocked.status());
                                    finished.push((dependent, blocked));
                                }
                            }
                        }
                    }
                    finished.insert(0, (idx, result));

                    for (i, r) in finished {
                        let events = coordinator.on_result(r.clone());
                        results[i] = Some(r);
                        sink.emit_all(events).await;
                    }
                }
            }
        }
        drop(in_flight);

        let mut cancelled = false;
        let terminal = match halt {
            Some(Halt::Cancelled) => {
                log::warn!("Execution of '{}' cancelled", plan.original_intent);
                cancelled = true;
                let info = ErrorInfo::new(ErrorKind::Cancelled, "Execution cancelled");
                abandon(&mut table, &mut results, &info);
                coordinator.abort(&info)
            }
            Some(Halt::Structural(info)) => {
                log::error!("Aborting plan '{}': {}", plan.original_intent, info);
                let aborted = ErrorInfo::new(
                    ErrorKind::Structural,
                    format!("Plan aborted: {}", info.message),
                );
                abandon(&mut table, &mut results, &aborted);
                coordinator.abort(&info)
            }
            Some(Halt::Deadline) => {
                log::warn!(
                    "Plan '{}' exceeded its {}ms deadline",
                    plan.original_intent,
                    plan_timeout.as_millis()
                );
                let info = ErrorInfo::new(
                    ErrorKind::Timeout,
                    format!("Plan deadline of {}ms exceeded", plan_timeout.as_millis()),
                );
                for idx in 0..n {
                    if table.get(idx).is_terminal() {
                        continue;
                    }
                    let r = ExecutionResult::failed(dag.id(idx), info.clone());
                    table.set(idx, SubQueryStatus::Failed);
                    let events = coordinator.on_result(r.clone());
                    results[idx] = Some(r);
                    sink.emit_all(events).await;
                }
                None
            }
            None => {
                // Only reachable if a dependency never settled.
                for idx in 0..n {
                    if table.get(idx).is_terminal() {
                        continue;
                    }
                    let r = ExecutionResult::failed(
                        dag.id(idx),
                        ErrorInfo::new(ErrorKind::DependencyFailed, "Dependencies never completed"),
                    );
                    table.set(idx, SubQueryStatus::Failed);
                    let events = coordinator.on_result(r.clone());
                    results[idx] = Some(r);
                    sink.emit_all(events).await;
                }
                None
            }
        };

        let terminal = match terminal {
            Some(event) => event,
            None => {
                let mut events = coordinator.finish();
                let last = events.pop();
                sink.emit_all(events).await;
                last.unwrap_or_else(|| {
                    plan_error_event(&ErrorInfo::new(
                        ErrorKind::Structural,
                        "Stream already finished",
                    ))
                })
            }
        };
        sink.emit(terminal.clone()).await;

        let mut report = build_report(
            plan,
            ctx,
            results.into_iter().flatten().collect(),
            terminal,
            cancelled,
        );
        report.transitions = table.transitions;
        report
    }

    async fn prepare_sub_query(&self, idx: usize, sq: &SubQuery, ctx: &ExecutionContext) -> Step {
        let started = Instant::now();
        match self.prepare(sq, ctx).await {
            Ok(params) => Step::Prepared {
                idx,
                params,
                started,
            },
            Err(result) => Step::Finished {
                idx,
                result: timed(result, started),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn invoke_sub_query(
        &self,
        idx: usize,
        sq: &SubQuery,
        params: Map<String, Value>,
        dependencies: Map<String, Value>,
        ctx: &ExecutionContext,
        config: &ExecutorConfig,
        started: Instant,
    ) -> Step {
        let result = self.invoke(sq, params, dependencies, ctx, config).await;
        Step::Finished {
            idx,
            result: timed(result, started),
        }
    }

    /// Resolve the data source, credentials and parameters of `sq`.
    ///
    /// `Err` carries the terminal result when the sub-query cannot be
    /// dispatched.
    async fn prepare(
        &self,
        sq: &SubQuery,
        ctx: &ExecutionContext,
    ) -> Result<Map<String, Value>, ExecutionResult> {
        log::debug!("Preparing {} against {}", sq.id, sq.data_source);

        let Some(descriptor) = self.registry.resolve(&sq.data_source).await else {
            return Err(ExecutionResult::failed(
                sq.id.clone(),
                ErrorInfo::new(
                    ErrorKind::Structural,
                    format!("Unknown data source '{}' for sub-query {}", sq.data_source, sq.id),
                ),
            ));
        };

        let mut params = sq.filters.clone();
        for (key, value) in &ctx.user_supplied_params {
            params.insert(key.clone(), value.clone());
        }

        let resolution = auth::resolve_auth(
            sq,
            &descriptor,
            &params,
            ctx.auth_profile_hint.as_deref(),
            self.auth_profiles.as_ref(),
        )
        .await;
        let profile = match resolution {
            AuthResolution::Missing(request) => {
                return Err(ExecutionResult::awaiting_user_input(request));
            }
            AuthResolution::Default { profile } => profile,
            AuthResolution::Scoped {
                scope,
                profile,
                identity,
            } => {
                log::debug!("{} resolved {} scope", sq.id, scope);
                for (key, value) in identity {
                    params.entry(key).or_insert(value);
                }
                profile
            }
        };

        let issues = validation::validate_params(&descriptor.param_schema, &params);
        if !issues.is_empty() {
            let question = issues
                .iter()
                .map(|i| i.describe())
                .collect::<Vec<_>>()
                .join(" ");
            if issues.iter().all(|i| i.user_resolvable) {
                return Err(ExecutionResult::awaiting_user_input(ClarificationRequest {
                    query_id: sq.id.clone(),
                    question,
                    missing_params: issues.into_iter().map(|i| i.name).collect(),
                    reason: ErrorKind::Validation,
                }));
            }
            return Err(ExecutionResult::failed(
                sq.id.clone(),
                ErrorInfo::new(ErrorKind::Validation, question),
            ));
        }

        if let Some(profile) = &profile {
            params.insert(PARAM_AUTH_PROFILE.to_string(), Value::String(profile.name.clone()));
        }
        Ok(params)
    }

    async fn invoke(
        &self,
        sq: &SubQuery,
        mut params: Map<String, Value>,
        dependencies: Map<String, Value>,
        ctx: &ExecutionContext,
        config: &ExecutorConfig,
    ) -> ExecutionResult {
        log::debug!("Dispatching {} against {}", sq.id, sq.data_source);
        if !sq.depends_on.is_empty() {
            params.insert(PARAM_DEPENDENCIES.to_string(), Value::Object(dependencies));
        }

        let policy = RetryPolicy::from_config(config);
        let invocation = retry::invoke_with_retry(
            self.tools.as_ref(),
            &sq.data_source,
            &params,
            &policy,
            &ctx.cancellation,
        )
        .await;

        match invocation {
            Invocation::Succeeded { data, retries } => {
                ExecutionResult::succeeded(sq.id.clone(), data).with_timing(0, retries)
            }
            Invocation::Cancelled { retries } => ExecutionResult::failed(
                sq.id.clone(),
                ErrorInfo::new(ErrorKind::Cancelled, "Execution cancelled"),
            )
            .with_timing(0, retries),
            Invocation::Failed {
                error,
                class,
                retries,
                budget_exhausted,
            } => {
                let result = match class {
                    FailureClass::NeedsUserInput => {
                        ExecutionResult::awaiting_user_input(ClarificationRequest {
                            query_id: sq.id.clone(),
                            question: format!(
                                "{} rejected the credentials for \"{}\" ({}). Which credential profile should be used?",
                                sq.data_source, sq.description, error.message
                            ),
                            missing_params: vec![ANSWER_AUTH_PROFILE.to_string()],
                            reason: ErrorKind::AuthRequired,
                        })
                    }
                    FailureClass::Transient => {
                        let kind = if budget_exhausted {
                            ErrorKind::Timeout
                        } else {
                            ErrorKind::Transient
                        };
                        ExecutionResult::failed(sq.id.clone(), error_info(kind, &error))
                    }
                    FailureClass::Fatal => ExecutionResult::failed(
                        sq.id.clone(),
                        error_info(ErrorKind::Validation, &error),
                    ),
                };
                result.with_timing(0, retries)
            }
        }
    }
}

fn timed(result: ExecutionResult, started: Instant) -> ExecutionResult {
    let elapsed = started.elapsed().as_millis() as u64;
    let retries = result.retries;
    result.with_timing(elapsed, retries)
}

fn error_info(kind: ErrorKind, error: &crate::tool::ToolError) -> ErrorInfo {
    let info = ErrorInfo::new(kind, error.message.clone());
    match error.http_status {
        Some(status) => info.with_http_status(status),
        None => info,
    }
}

fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::High => 0,
        Priority::Medium => 1,
        Priority::Low => 2,
    }
}

/// Next pending, not yet dispatched sub-query whose dependencies all
/// succeeded.
///
/// Plan order for `Sequential`; otherwise higher priority first, plan order
/// breaking ties.
fn next_ready(
    plan: &ComplexQuery,
    dag: &QueryDag,
    states: &[SubQueryStatus],
    dispatched: &[bool],
) -> Option<usize> {
    let ready = (0..dag.len()).filter(|&idx| {
        states[idx] == SubQueryStatus::Pending
            && !dispatched[idx]
            && dag
                .dependencies(idx)
                .iter()
                .all(|&dep| states[dep] == SubQueryStatus::Succeeded)
    });
    match plan.streaming_strategy {
        StreamingStrategy::Sequential => ready.min(),
        _ => ready.min_by_key(|&idx| (priority_rank(plan.sub_queries[idx].priority), idx)),
    }
}

fn dependency_payloads(dag: &QueryDag, idx: usize, payloads: &[Option<Value>]) -> Map<String, Value> {
    dag.dependencies(idx)
        .iter()
        .filter_map(|&dep| {
            payloads[dep]
                .as_ref()
                .map(|data| (dag.id(dep).to_string(), data.clone()))
        })
        .collect()
}

/// Terminal result for a sub-query that can no longer run because `upstream`
/// did not succeed.
fn blocked_result(upstream: &ExecutionResult, sq: &SubQuery) -> Option<ExecutionResult> {
    let result = match &upstream.outcome {
        SubQueryOutcome::Succeeded { .. } => return None,
        SubQueryOutcome::AwaitingUserInput { clarification } => {
            ExecutionResult::awaiting_user_input(ClarificationRequest {
                query_id: sq.id.clone(),
                question: format!(
                    "Waiting on '{}': {}",
                    upstream.query_id, clarification.question
                ),
                missing_params: clarification.missing_params.clone(),
                reason: clarification.reason,
            })
        }
        SubQueryOutcome::Failed { error } => ExecutionResult::failed(
            sq.id.clone(),
            ErrorInfo::new(
                ErrorKind::DependencyFailed,
                format!("Depends on '{}' which failed: {}", upstream.query_id, error.message),
            ),
        ),
    };
    Some(result)
}

/// Mark every non-terminal sub-query as failed with `info`, without emitting.
fn abandon(table: &mut StateTable, results: &mut [Option<ExecutionResult>], info: &ErrorInfo) {
    for idx in 0..table.states.len() {
        if table.get(idx).is_terminal() {
            continue;
        }
        table.set(idx, SubQueryStatus::Failed);
        results[idx] = Some(ExecutionResult::failed(table.ids[idx].clone(), info.clone()));
    }
}

fn build_report(
    plan: &ComplexQuery,
    ctx: &ExecutionContext,
    results: Vec<ExecutionResult>,
    terminal: StreamEvent,
    cancelled: bool,
) -> ExecutionReport {
    let mut succeeded: HashMap<String, ExecutionResult> = ctx
        .prior_results
        .iter()
        .filter(|(_, r)| r.success())
        .map(|(id, r)| (id.clone(), r.clone()))
        .collect();
    for r in results.iter().filter(|r| r.success()) {
        succeeded.insert(r.query_id.clone(), r.clone());
    }
    ExecutionReport {
        plan: plan.clone(),
        results,
        succeeded,
        terminal,
        cancelled,
        transitions: vec![],
        auth_profile_hint: ctx.auth_profile_hint.clone(),
        user_supplied_params: ctx.user_supplied_params.clone(),
        config_override: ctx.config_override.clone(),
    }
}

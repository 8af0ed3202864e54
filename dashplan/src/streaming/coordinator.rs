//! Streaming Coordinator
//!
//! Turns terminal sub-query results into the ordered [`StreamEvent`]
//! sequence a caller sees: one payload or error frame per result, a
//! progress event after each one, and exactly one terminal event at the end.
//!
//! `Sequential` plans are delivered in plan order (results that finish early
//! are held back); `Parallel` and `Hybrid` plans are delivered in completion
//! order.

use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

use crate::error::{ErrorInfo, ErrorKind};
use crate::types::{
    ChunkMetadata, ComplexQuery, DataChunk, ExecutionResult, StreamEvent, StreamingStrategy,
    SubQueryOutcome,
};

const RENDER_BASE_MS: u64 = 5;
const RENDER_PER_RECORD_MS: u64 = 2;

/// Split `records` into chunks of at most `batch_size` items.
///
/// Always returns at least one chunk, so an empty result set still renders.
pub fn split_into_chunks(
    query_id: &str,
    title: &str,
    source: &str,
    records: &[Value],
    batch_size: usize,
) -> Vec<DataChunk> {
    let batch_size = batch_size.max(1);
    if records.is_empty() {
        return vec![make_chunk(query_id, title, source, 0, 1, vec![])];
    }
    let total_chunks = records.len().div_ceil(batch_size);
    records
        .chunks(batch_size)
        .enumerate()
        .map(|(index, slice)| make_chunk(query_id, title, source, index, total_chunks, slice.to_vec()))
        .collect()
}

fn make_chunk(
    query_id: &str,
    title: &str,
    source: &str,
    chunk_index: usize,
    total_chunks: usize,
    data: Vec<Value>,
) -> DataChunk {
    let record_count = data.len();
    DataChunk {
        chunk_id: format!("{}#{}", query_id, chunk_index),
        query_id: query_id.to_string(),
        chunk_index,
        total_chunks,
        data,
        metadata: ChunkMetadata {
            title: title.to_string(),
            estimated_render_time_ms: RENDER_BASE_MS + RENDER_PER_RECORD_MS * record_count as u64,
            record_count,
            source: source.to_string(),
        },
    }
}

/// Plan-scoped `Error` event; always terminal.
pub fn plan_error_event(error: &ErrorInfo) -> StreamEvent {
    StreamEvent::error(
        error.message.clone(),
        json!({
            "scope": "plan",
            "kind": error.kind,
        }),
    )
}

#[derive(Debug, Clone)]
struct Tracked {
    position: usize,
    title: String,
    source: String,
    delivered: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    succeeded: usize,
    failed: usize,
    awaiting: usize,
}

#[derive(Debug)]
pub struct StreamingCoordinator {
    strategy: StreamingStrategy,
    batch_size: usize,
    tracked: HashMap<String, Tracked>,
    total: usize,
    completed: usize,
    last_progress: f64,
    next_position: usize,
    held: BTreeMap<usize, ExecutionResult>,
    tally: Tally,
    clarifications: Vec<Value>,
    finished: bool,
}

impl StreamingCoordinator {
    /// Coordinate delivery for the sub-queries of `plan` named in `tracked`.
    ///
    /// Sub-queries outside `tracked` (e.g. reused from an earlier turn) are
    /// neither delivered nor counted towards progress.
    pub fn new(plan: &ComplexQuery, tracked: &[String], batch_size: usize) -> Self {
        let tracked: HashMap<String, Tracked> = plan
            .sub_queries
            .iter()
            .filter(|sq| tracked.contains(&sq.id))
            .enumerate()
            .map(|(position, sq)| {
                (
                    sq.id.clone(),
                    Tracked {
                        position,
                        title: sq.description.clone(),
                        source: sq.data_source.clone(),
                        delivered: false,
                    },
                )
            })
            .collect();
        Self {
            strategy: plan.streaming_strategy,
            batch_size,
            total: tracked.len(),
            tracked,
            completed: 0,
            last_progress: 0.0,
            next_position: 0,
            held: BTreeMap::new(),
            tally: Tally::default(),
            clarifications: vec![],
            finished: false,
        }
    }

    /// Track every sub-query of the plan.
    pub fn for_plan(plan: &ComplexQuery, batch_size: usize) -> Self {
        let ids: Vec<String> = plan.sub_queries.iter().map(|sq| sq.id.clone()).collect();
        Self::new(plan, &ids, batch_size)
    }

    pub fn start(&self) -> StreamEvent {
        StreamEvent::progress(
            0.0,
            format!("Executing {} sub-queries ({:?})", self.total, self.strategy),
        )
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Accept one terminal result and return the events ready to emit.
    pub fn on_result(&mut self, result: ExecutionResult) -> Vec<StreamEvent> {
        if self.finished {
            log::warn!("Result for {} arrived after the stream finished", result.query_id);
            return vec![];
        }
        let position = match self.tracked.get(&result.query_id) {
            Some(t) if !t.delivered => t.position,
            Some(_) => {
                log::warn!("Duplicate result for {}", result.query_id);
                return vec![];
            }
            None => {
                log::warn!("Result for untracked sub-query {}", result.query_id);
                return vec![];
            }
        };

        if self.strategy != StreamingStrategy::Sequential {
            return self.deliver(result);
        }

        self.held.insert(position, result);
        let mut events = vec![];
        while let Some(ready) = self.held.remove(&self.next_position) {
            events.extend(self.deliver(ready));
            self.next_position += 1;
        }
        events
    }

    /// Flush held results and produce the terminal event. Only the first call
    /// returns anything.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return vec![];
        }
        let mut events = vec![];
        let held = std::mem::take(&mut self.held);
        for (_, result) in held {
            events.extend(self.deliver(result));
        }
        self.finished = true;

        let tally = self.tally;
        if tally.succeeded == 0 && tally.awaiting == 0 && tally.failed > 0 {
            events.push(plan_error_event(&ErrorInfo::new(
                ErrorKind::Transient,
                format!("All {} sub-queries failed", tally.failed),
            )));
        } else {
            events.push(StreamEvent::complete(json!({
                "succeeded": tally.succeeded,
                "failed": tally.failed,
                "awaitingUserInput": tally.awaiting,
                "clarifications": self.clarifications,
            })));
        }
        events
    }

    /// End the stream with a plan-level error instead of `Complete`.
    pub fn abort(&mut self, error: &ErrorInfo) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.held.clear();
        Some(plan_error_event(error))
    }

    fn deliver(&mut self, result: ExecutionResult) -> Vec<StreamEvent> {
        let Some(meta) = self.tracked.get_mut(&result.query_id) else {
            return vec![];
        };
        meta.delivered = true;
        let (title, source) = (meta.title.clone(), meta.source.clone());

        let mut events = match &result.outcome {
            SubQueryOutcome::Succeeded { data } => {
                self.tally.succeeded += 1;
                match data {
                    Value::Array(records) if records.len() > self.batch_size.max(1) => {
                        split_into_chunks(&result.query_id, &title, &source, records, self.batch_size)
                            .iter()
                            .map(StreamEvent::chunk)
                            .collect()
                    }
                    _ => vec![StreamEvent::html(json!({
                        "queryId": result.query_id,
                        "title": title,
                        "source": source,
                        "data": data,
                    }))],
                }
            }
            SubQueryOutcome::AwaitingUserInput { clarification } => {
                self.tally.awaiting += 1;
                let frame = json!({
                    "scope": "sub_query",
                    "queryId": result.query_id,
                    "kind": "awaiting_user_input",
                    "reason": clarification.reason,
                    "missingParams": clarification.missing_params,
                });
                self.clarifications.push(json!({
                    "queryId": result.query_id,
                    "question": clarification.question,
                    "missingParams": clarification.missing_params,
                }));
                vec![StreamEvent::error(clarification.question.clone(), frame)]
            }
            SubQueryOutcome::Failed { error } => {
                self.tally.failed += 1;
                let mut frame = json!({
                    "scope": "sub_query",
                    "queryId": result.query_id,
                    "kind": error.kind,
                    "retries": result.retries,
                });
                if let Some(status) = error.http_status {
                    frame["httpStatus"] = json!(status);
                }
                vec![StreamEvent::error(error.message.clone(), frame)]
            }
        };

        self.completed += 1;
        let progress = if self.total == 0 {
            1.0
        } else {
            (self.completed as f64 / self.total as f64).min(1.0)
        };
        self.last_progress = self.last_progress.max(progress);
        events.push(StreamEvent::progress(
            self.last_progress,
            format!(
                "{} {} ({}/{})",
                result.query_id,
                result.status().as_str(),
                self.completed,
                self.total
            ),
        ));
        events
    }
}

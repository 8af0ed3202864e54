//! Failure classification and the per-sub-query retry loop.
//!
//! Transient failures are retried with linear backoff
//! (`retry_delay_ms * attempt`), the whole loop bounded by `timeout_ms` of
//! wall time. Anything else stops on the first failure.

use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorConfig;
use crate::tool::{ToolError, ToolErrorKind, ToolExecutor};

/// What the controller does with a failed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network, timeout or server-side; retried.
    Transient,
    /// Credentials rejected; ask the user.
    NeedsUserInput,
    /// Bad request or missing resource; fail immediately.
    Fatal,
}

pub fn classify_tool_error(err: &ToolError) -> FailureClass {
    if let Some(status) = err.http_status {
        match status {
            401 | 403 => return FailureClass::NeedsUserInput,
            408 | 429 | 500..=599 => return FailureClass::Transient,
            400..=499 => return FailureClass::Fatal,
            _ => {}
        }
    }
    match err.kind {
        ToolErrorKind::Network | ToolErrorKind::Timeout | ToolErrorKind::Server => {
            FailureClass::Transient
        }
        ToolErrorKind::AuthRejected => FailureClass::NeedsUserInput,
        ToolErrorKind::InvalidRequest | ToolErrorKind::NotFound | ToolErrorKind::Other => {
            FailureClass::Fatal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub budget: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            max_retries: config.retry_attempts,
            base_delay: Duration::from_millis(config.retry_delay_ms),
            budget: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Result of [`invoke_with_retry`]. `retries` never exceeds `max_retries`.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Succeeded {
        data: Value,
        retries: u32,
    },
    Failed {
        error: ToolError,
        class: FailureClass,
        retries: u32,
        /// The wall-time budget ran out
        budget_exhausted: bool,
    },
    Cancelled {
        retries: u32,
    },
}

pub async fn invoke_with_retry(
    tools: &dyn ToolExecutor,
    data_source: &str,
    params: &Map<String, Value>,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Invocation {
    let deadline = Instant::now() + policy.budget;
    let mut retries = 0;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Invocation::Cancelled { retries },
            r = tokio::time::timeout(remaining, tools.invoke(data_source, params)) => r,
        };

        let error = match attempt {
            Ok(Ok(data)) => return Invocation::Succeeded { data, retries },
            Ok(Err(e)) => e,
            Err(_) => {
                log::warn!(
                    "{} exceeded its {}ms budget after {} retries",
                    data_source,
                    policy.budget.as_millis(),
                    retries
                );
                return Invocation::Failed {
                    error: ToolError::timeout(format!(
                        "no response within {}ms",
                        policy.budget.as_millis()
                    )),
                    class: FailureClass::Transient,
                    retries,
                    budget_exhausted: true,
                };
            }
        };

        let class = classify_tool_error(&error);
        if class != FailureClass::Transient || retries >= policy.max_retries {
            return Invocation::Failed {
                error,
                class,
                retries,
                budget_exhausted: false,
            };
        }

        let delay = policy.delay_for(retries + 1);
        if Instant::now() + delay >= deadline {
            log::warn!(
                "{} retry budget exhausted after {} retries: {}",
                data_source,
                retries,
                error
            );
            return Invocation::Failed {
                error,
                class,
                retries,
                budget_exhausted: true,
            };
        }

        log::info!(
            "Retrying {} in {}ms (attempt {}/{}): {}",
            data_source,
            delay.as_millis(),
            retries + 1,
            policy.max_retries,
            error
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Invocation::Cancelled { retries },
            _ = tokio::time::sleep(delay) => {}
        }
        retries += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails with `error` for the first `failures` calls, then succeeds.
    struct Flaky {
        failures: u32,
        error: ToolError,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, error: ToolError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ToolExecutor for Flaky {
        async fn invoke(&self, _: &str, _: &Map<String, Value>) -> Result<Value, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(json!(["ok"]))
            }
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            budget: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_tool_error(&ToolError::http(503, "x")), FailureClass::Transient);
        assert_eq!(classify_tool_error(&ToolError::network("reset")), FailureClass::Transient);
        assert_eq!(
            classify_tool_error(&ToolError::http(401, "x")),
            FailureClass::NeedsUserInput
        );
        assert_eq!(classify_tool_error(&ToolError::http(422, "x")), FailureClass::Fatal);
        assert_eq!(
            classify_tool_error(&ToolError::new(ToolErrorKind::Other, "x")),
            FailureClass::Fatal
        );
    }

    #[test]
    fn test_linear_delay() {
        let p = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            budget: Duration::from_secs(30),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(3), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let tool = Flaky::new(2, ToolError::http(502, "bad gateway"));
        let out = invoke_with_retry(&tool, "sales", &Map::new(), &policy(3), &CancellationToken::new()).await;
        assert_eq!(out, Invocation::Succeeded { data: json!(["ok"]), retries: 2 });
    }

    #[tokio::test]
    async fn test_exhausts_retry_attempts() {
        let tool = Flaky::new(u32::MAX, ToolError::network("connection reset"));
        let out = invoke_with_retry(&tool, "sales", &Map::new(), &policy(3), &CancellationToken::new()).await;
        match out {
            Invocation::Failed { retries, class, budget_exhausted, .. } => {
                assert_eq!(retries, 3);
                assert_eq!(class, FailureClass::Transient);
                assert!(!budget_exhausted);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tool.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_transient_is_not_retried() {
        let tool = Flaky::new(u32::MAX, ToolError::http(400, "bad filter"));
        let out = invoke_with_retry(&tool, "sales", &Map::new(), &policy(3), &CancellationToken::new()).await;
        assert!(matches!(out, Invocation::Failed { retries: 0, class: FailureClass::Fatal, .. }));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_stops_retries() {
        let tool = Flaky::new(u32::MAX, ToolError::http(503, "down"));
        let p = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(40),
            budget: Duration::from_millis(100),
        };
        let out = invoke_with_retry(&tool, "sales", &Map::new(), &p, &CancellationToken::new()).await;
        match out {
            Invocation::Failed { retries, budget_exhausted, .. } => {
                assert!(budget_exhausted);
                assert!(retries < 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    struct Hanging;

    #[async_trait]
    impl ToolExecutor for Hanging {
        async fn invoke(&self, _: &str, _: &Map<String, Value>) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_call() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let tool = Arc::new(Hanging);
        let out = invoke_with_retry(tool.as_ref(), "sales", &Map::new(), &policy(3), &cancel).await;
        assert_eq!(out, Invocation::Cancelled { retries: 0 });
    }

    #[tokio::test]
    async fn test_hanging_call_hits_budget() {
        let p = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            budget: Duration::from_millis(20),
        };
        let out = invoke_with_retry(&Hanging, "sales", &Map::new(), &p, &CancellationToken::new()).await;
        assert!(matches!(out, Invocation::Failed { budget_exhausted: true, retries: 0, .. }));
    }
}

//! Operation-completion waiter
//!
//! [`wait_for_operation`] parks a caller until an in-flight mutation reaches
//! `DONE`, polling fresh status snapshots with jittered exponential backoff.
//! The waiter holds no connections and spawns no tasks between polls; its
//! only footprint while idle is a timer. Cancellation and the overall
//! deadline are observed at suspension points, never mid-query, so a
//! snapshot is always fully processed once fetched.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::operation::{Operation, OperationHandle};

/// Default overall deadline for a single wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default delay before the second status query.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);

/// Default cap for the growing poll interval.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(32);

/// Default growth factor applied to the interval after each poll.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default bound on consecutive status-query failures before giving up.
pub const DEFAULT_MAX_QUERY_FAILURES: u32 = 3;

/// Queries a fresh status snapshot for an in-flight operation.
///
/// Implemented by the provider layer and injected into the waiter; the
/// waiter never constructs requests itself. An error from `query` is a
/// failure of the status check, not of the operation being watched.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperationQuery: Send + Sync {
    /// Fetch the current snapshot for `handle`.
    async fn query(&self, handle: &OperationHandle) -> Result<Operation, ApiError>;
}

#[async_trait]
impl<T: OperationQuery + ?Sized> OperationQuery for std::sync::Arc<T> {
    async fn query(&self, handle: &OperationHandle) -> Result<Operation, ApiError> {
        (**self).query(handle).await
    }
}

/// Polling behavior for a single wait.
///
/// The defaults suit production provisioning times; tests shrink the
/// intervals to milliseconds. Jitter is always applied so that many waits
/// started together do not poll in lockstep.
#[derive(Clone, Debug)]
pub struct PollConfig {
    /// Overall deadline; the wait gives up when it elapses.
    pub timeout: Duration,
    /// Delay before the second status query.
    pub initial_interval: Duration,
    /// Cap for the growing interval.
    pub max_interval: Duration,
    /// Growth factor applied to the interval after each poll.
    pub backoff_multiplier: f64,
    /// Consecutive status-query failures tolerated before giving up.
    pub max_query_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_query_failures: DEFAULT_MAX_QUERY_FAILURES,
        }
    }
}

impl PollConfig {
    /// Default polling with a custom overall deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Terminal result of a wait.
#[derive(Clone, Debug, PartialEq)]
pub enum WaitOutcome {
    /// The operation reached `DONE`. The snapshot may still carry a terminal
    /// error payload; completion is not success.
    Completed(Operation),
    /// The deadline elapsed or the caller cancelled before `DONE` was
    /// observed. The operation may still be running on the provider side.
    Cancelled,
}

/// Failure of the polling machinery itself, distinct from the watched
/// operation's outcome.
#[derive(Debug, Error)]
pub enum WaitError {
    /// Consecutive status queries kept failing and the failure budget ran
    /// out.
    #[error("status query for {operation} failed {attempts} times: {source}")]
    QueryFailed {
        /// Name of the operation the wait was tracking.
        operation: String,
        /// Consecutive failed queries.
        attempts: u32,
        /// The last query error.
        source: ApiError,
    },
}

/// Wait until the operation behind `handle` reaches its terminal state.
///
/// Polls `query` for fresh snapshots, sleeping between polls with jittered
/// exponential backoff. Returns `Completed` the moment a snapshot reports
/// `DONE`, `Cancelled` when `cancel` fires or `config.timeout` elapses
/// first, and `Err(QueryFailed)` after `config.max_query_failures`
/// consecutive query errors. The failure counter resets on every successful
/// query, so an occasional dropped status check does not abort a long wait.
pub async fn wait_for_operation<Q>(
    query: &Q,
    handle: &OperationHandle,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<WaitOutcome, WaitError>
where
    Q: OperationQuery + ?Sized,
{
    let deadline = tokio::time::Instant::now() + config.timeout;
    let mut interval = config.initial_interval;
    let mut failures: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            info!(operation = %handle, "wait cancelled before terminal status");
            return Ok(WaitOutcome::Cancelled);
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                operation = %handle,
                timeout_secs = config.timeout.as_secs(),
                "wait deadline elapsed before terminal status"
            );
            return Ok(WaitOutcome::Cancelled);
        }

        // Add jitter: random factor between 0.5 and 1.5 of the interval
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let delay = Duration::from_secs_f64(interval.as_secs_f64() * jitter);

        match query.query(handle).await {
            Ok(op) if op.is_done() => {
                info!(
                    operation = %handle,
                    errors = op.terminal_errors().len(),
                    "operation reached terminal status"
                );
                return Ok(WaitOutcome::Completed(op));
            }
            Ok(op) => {
                failures = 0;
                debug!(
                    operation = %handle,
                    status = ?op.status,
                    progress = op.progress.unwrap_or(0),
                    "operation still in flight"
                );
            }
            Err(e) => {
                failures += 1;
                if failures >= config.max_query_failures {
                    error!(
                        operation = %handle,
                        attempts = failures,
                        error = %e,
                        "status query failed, giving up"
                    );
                    return Err(WaitError::QueryFailed {
                        operation: handle.name.clone(),
                        attempts: failures,
                        source: e,
                    });
                }
                warn!(
                    operation = %handle,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "status query failed, will retry"
                );
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(operation = %handle, "wait cancelled while sleeping");
                return Ok(WaitOutcome::Cancelled);
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(
                    operation = %handle,
                    timeout_secs = config.timeout.as_secs(),
                    "wait deadline elapsed while sleeping"
                );
                return Ok(WaitOutcome::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        interval = Duration::from_secs_f64(
            (interval.as_secs_f64() * config.backoff_multiplier)
                .min(config.max_interval.as_secs_f64()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationError, OperationScope, OperationStatus};
    use mockall::Sequence;
    use std::time::Instant;

    fn handle(name: &str) -> OperationHandle {
        OperationHandle {
            name: name.to_string(),
            scope: OperationScope::Global,
        }
    }

    fn fast_config() -> PollConfig {
        PollConfig {
            timeout: Duration::from_secs(5),
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            backoff_multiplier: 2.0,
            max_query_failures: 3,
        }
    }

    #[tokio::test]
    async fn test_done_on_first_query_returns_without_sleeping() {
        let mut query = MockOperationQuery::new();
        query
            .expect_query()
            .times(1)
            .returning(|h| Ok(Operation::new(h.name.as_str(), OperationStatus::Done)));

        // Interval long enough that any sleep would blow the elapsed bound.
        let config = PollConfig {
            initial_interval: Duration::from_secs(30),
            ..PollConfig::default()
        };
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let outcome = wait_for_operation(&query, &handle("op-1"), &config, &cancel)
            .await
            .expect("wait should succeed");

        assert!(matches!(outcome, WaitOutcome::Completed(op) if op.is_done()));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_polls_until_done_then_stops() {
        let mut query = MockOperationQuery::new();
        let mut seq = Sequence::new();
        for status in [
            OperationStatus::Pending,
            OperationStatus::Running,
            OperationStatus::Done,
        ] {
            query
                .expect_query()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |h| Ok(Operation::new(h.name.as_str(), status)));
        }

        let cancel = CancellationToken::new();
        let outcome = wait_for_operation(&query, &handle("op-2"), &fast_config(), &cancel)
            .await
            .expect("wait should succeed");

        // Exactly three queries: the mock panics on a fourth.
        assert!(matches!(outcome, WaitOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_completed_snapshot_preserves_error_payload() {
        let mut query = MockOperationQuery::new();
        query.expect_query().times(1).returning(|h| {
            Ok(Operation::new(h.name.as_str(), OperationStatus::Done).with_error(vec![
                OperationError {
                    code: "QUOTA_EXCEEDED".to_string(),
                    message: "out of CPUs".to_string(),
                },
            ]))
        });

        let cancel = CancellationToken::new();
        let outcome = wait_for_operation(&query, &handle("op-3"), &fast_config(), &cancel)
            .await
            .expect("wait should succeed");

        match outcome {
            WaitOutcome::Completed(op) => {
                assert_eq!(op.terminal_errors().len(), 1);
                assert_eq!(op.terminal_errors()[0].code, "QUOTA_EXCEEDED");
            }
            WaitOutcome::Cancelled => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_returns_without_querying() {
        // No expectations: any query would panic the mock.
        let query = MockOperationQuery::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = wait_for_operation(&query, &handle("op-4"), &fast_config(), &cancel)
            .await
            .expect("wait should succeed");

        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancellation_during_sleep_wins_over_polling() {
        let mut query = MockOperationQuery::new();
        query
            .expect_query()
            .returning(|h| Ok(Operation::new(h.name.as_str(), OperationStatus::Running)));

        // Long interval so the wait parks in its sleep.
        let config = PollConfig {
            timeout: Duration::from_secs(30),
            initial_interval: Duration::from_secs(30),
            ..PollConfig::default()
        };
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let waiter = tokio::spawn(async move {
            wait_for_operation(&query, &handle("op-5"), &config, &cancel).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();

        let outcome = waiter
            .await
            .expect("task should not panic")
            .expect("wait should succeed");
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_deadline_elapses_for_operation_that_never_finishes() {
        let mut query = MockOperationQuery::new();
        query
            .expect_query()
            .returning(|h| Ok(Operation::new(h.name.as_str(), OperationStatus::Pending)));

        let config = PollConfig {
            timeout: Duration::from_millis(30),
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(5),
            backoff_multiplier: 1.0,
            max_query_failures: 3,
        };
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let outcome = wait_for_operation(&query, &handle("op-6"), &config, &cancel)
            .await
            .expect("wait should succeed");

        assert_eq!(outcome, WaitOutcome::Cancelled);
        // Must stop near the deadline, not keep polling.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_consecutive_query_failures_exhaust_the_budget() {
        let mut query = MockOperationQuery::new();
        query
            .expect_query()
            .times(3)
            .returning(|_| Err(ApiError::transport("connection refused")));

        let cancel = CancellationToken::new();
        let err = wait_for_operation(&query, &handle("op-7"), &fast_config(), &cancel)
            .await
            .expect_err("wait should give up");

        let WaitError::QueryFailed {
            operation,
            attempts,
            source,
        } = err;
        assert_eq!(operation, "op-7");
        assert_eq!(attempts, 3);
        assert_eq!(source, ApiError::transport("connection refused"));
    }

    #[tokio::test]
    async fn test_successful_query_resets_the_failure_counter() {
        let mut query = MockOperationQuery::new();
        let mut seq = Sequence::new();
        // Two failures, a good poll, two more failures, then done. With a
        // budget of three this only aborts if the counter fails to reset.
        let script: [fn(&OperationHandle) -> Result<Operation, ApiError>; 6] = [
            |_| Err(ApiError::transport("reset")),
            |_| Err(ApiError::transport("reset")),
            |h| Ok(Operation::new(h.name.as_str(), OperationStatus::Running)),
            |_| Err(ApiError::transport("reset")),
            |_| Err(ApiError::transport("reset")),
            |h| Ok(Operation::new(h.name.as_str(), OperationStatus::Done)),
        ];
        for step in script {
            query
                .expect_query()
                .times(1)
                .in_sequence(&mut seq)
                .returning(step);
        }

        let cancel = CancellationToken::new();
        let outcome = wait_for_operation(&query, &handle("op-8"), &fast_config(), &cancel)
            .await
            .expect("wait should survive interleaved failures");

        assert!(matches!(outcome, WaitOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_zero_timeout_cancels_before_first_query() {
        let query = MockOperationQuery::new();
        let config = PollConfig::with_timeout(Duration::ZERO);
        let cancel = CancellationToken::new();

        let outcome = wait_for_operation(&query, &handle("op-9"), &config, &cancel)
            .await
            .expect("wait should succeed");

        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[test]
    fn test_default_config_matches_documented_values() {
        let config = PollConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert_eq!(config.initial_interval, Duration::from_secs(1));
        assert_eq!(config.max_interval, Duration::from_secs(32));
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.max_query_failures, 3);
    }
}

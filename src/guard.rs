//! Idempotent mutation guard
//!
//! A mutating call against the provisioning API resolves one of three ways:
//! the provider hands back an in-flight operation, refuses synchronously, or
//! reports nothing at all. [`guard`] folds all three, plus the wait for the
//! in-flight case, into a single outcome a reconciliation loop can branch
//! on. Along the way it absorbs the rejections an idempotent retry is
//! allowed to ignore: "already gone" on a delete and "already exists" on a
//! create are both the desired state, not failures.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{classify, ApiError, ErrorClass, TransientCause};
use crate::operation::Operation;
use crate::wait::{wait_for_operation, OperationQuery, PollConfig, WaitError, WaitOutcome};

/// Verb of the mutation being guarded.
///
/// Only the delete/non-delete distinction changes guard behavior; the full
/// verb is kept for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    /// The mutation creates the resource.
    Create,
    /// The mutation patches or replaces the resource.
    Update,
    /// The mutation removes the resource.
    Delete,
}

impl MutationKind {
    /// Deletes absorb "target not found"; creates and updates absorb
    /// "target already exists".
    pub fn is_delete(self) -> bool {
        matches!(self, MutationKind::Delete)
    }

    /// Lowercase verb for log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

/// Immediate result of issuing a mutating call.
///
/// Built with [`MutationAttempt::from_parts`] from the operation/error pair
/// the provider layer produces, so the "error and operation at once"
/// ambiguity is resolved at construction and never reaches the guard.
#[derive(Clone, Debug, PartialEq)]
pub enum MutationAttempt {
    /// The provider accepted the mutation and returned an operation to
    /// track.
    Accepted(Operation),
    /// The provider refused the mutation synchronously.
    Rejected(ApiError),
    /// The provider returned neither an operation nor an error.
    ///
    /// Treated as already applied: there is nothing left to track. A
    /// provider doing this for work it silently started leaves that work
    /// unobserved, which is the provider's contract to keep, not ours.
    Resolved,
}

impl MutationAttempt {
    /// Fold the provider's `(operation, error)` pair into an explicit sum.
    ///
    /// An error always wins over an operation reported for the same
    /// attempt: the operation is discarded and never polled.
    pub fn from_parts(operation: Option<Operation>, error: Option<ApiError>) -> Self {
        match (operation, error) {
            (_, Some(err)) => MutationAttempt::Rejected(err),
            (Some(op), None) => MutationAttempt::Accepted(op),
            (None, None) => MutationAttempt::Resolved,
        }
    }
}

/// Final outcome of a guarded mutation.
///
/// The only value handed back to reconciliation callers. It carries no
/// operation handles; a retry after failure re-issues the mutation from
/// scratch, which idempotence makes safe.
#[derive(Clone, Debug, PartialEq)]
pub enum ReconcileOutcome {
    /// The mutation is applied, or the desired state was already in place.
    Success,
    /// A delete found its target already absent; nothing needed doing.
    SuccessAbsent,
    /// The mutation failed with the given classification.
    Failure(ErrorClass),
}

impl ReconcileOutcome {
    /// True for both success variants.
    pub fn is_success(&self) -> bool {
        !matches!(self, ReconcileOutcome::Failure(_))
    }

    /// Whether a caller may re-issue the whole mutation and expect a
    /// different answer.
    pub fn retryable(&self) -> bool {
        matches!(self, ReconcileOutcome::Failure(class) if class.is_retryable())
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileOutcome::Success => write!(f, "success"),
            ReconcileOutcome::SuccessAbsent => write!(f, "success (already absent)"),
            ReconcileOutcome::Failure(class) => write!(f, "failure: {class}"),
        }
    }
}

/// Run one mutation attempt to its final outcome.
///
/// Immediate rejections are classified and filtered through the absorption
/// rules for `kind`. An accepted operation is awaited to its terminal
/// state; a terminal error payload is a failure even though the operation
/// itself completed. Cancellation or deadline expiry during the wait maps
/// to a retryable failure because the mutation may be re-issued safely.
pub async fn guard<Q>(
    query: &Q,
    attempt: MutationAttempt,
    kind: MutationKind,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> ReconcileOutcome
where
    Q: OperationQuery + ?Sized,
{
    match attempt {
        MutationAttempt::Rejected(err) => absorb(classify(&err), kind),
        MutationAttempt::Resolved => {
            debug!(mutation = kind.as_str(), "mutation resolved without an operation");
            ReconcileOutcome::Success
        }
        // The initiating call can hand back an already-terminal snapshot;
        // it is evaluated directly, without a single status query.
        MutationAttempt::Accepted(op) if op.is_done() => finish(&op),
        MutationAttempt::Accepted(op) => {
            let handle = op.handle();
            match wait_for_operation(query, &handle, poll, cancel).await {
                Ok(WaitOutcome::Completed(done)) => finish(&done),
                Ok(WaitOutcome::Cancelled) => {
                    warn!(
                        operation = %handle,
                        mutation = kind.as_str(),
                        "wait ended early, mutation can be re-issued"
                    );
                    ReconcileOutcome::Failure(ErrorClass::Transient(TransientCause::Cancelled))
                }
                Err(WaitError::QueryFailed {
                    attempts, source, ..
                }) => {
                    warn!(
                        operation = %handle,
                        mutation = kind.as_str(),
                        attempts,
                        error = %source,
                        "status polling failed"
                    );
                    ReconcileOutcome::Failure(classify(&source))
                }
            }
        }
    }
}

/// Apply the absorption rules for immediate rejections.
fn absorb(class: ErrorClass, kind: MutationKind) -> ReconcileOutcome {
    match class {
        ErrorClass::NotFound if kind.is_delete() => {
            debug!(mutation = kind.as_str(), "target already absent");
            ReconcileOutcome::SuccessAbsent
        }
        ErrorClass::AlreadyExists if !kind.is_delete() => {
            debug!(mutation = kind.as_str(), "target already exists");
            ReconcileOutcome::Success
        }
        class => ReconcileOutcome::Failure(class),
    }
}

/// Evaluate the embedded error payload of a terminal snapshot.
fn finish(op: &Operation) -> ReconcileOutcome {
    let errors = op.terminal_errors();
    if errors.is_empty() {
        ReconcileOutcome::Success
    } else {
        warn!(
            operation = %op.name,
            errors = errors.len(),
            "operation completed with errors"
        );
        ReconcileOutcome::Failure(ErrorClass::Permanent(ApiError::from_operation_errors(
            errors,
        )))
    }
}

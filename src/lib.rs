//! Gantry - idempotent reconciliation for cloud APIs with long-running operations
//!
//! Cloud provisioning APIs apply mutations asynchronously: a create, update,
//! or delete returns an operation handle, and the real outcome only exists
//! once that operation reaches its terminal state. Gantry is the
//! reconciliation core that makes mutating such an API safe to repeat:
//! every attempt is driven to one unambiguous outcome, and the rejections an
//! idempotent retry may ignore ("already gone" on delete, "already exists"
//! on create) are absorbed as success instead of surfacing as errors.
//!
//! # Architecture
//!
//! Callers issue the actual provisioning calls; Gantry supplies the decision
//! logic around them:
//! - The provider's raw errors are classified once, in one place
//! - Accepted operations are polled to completion with jittered backoff
//! - Every mutation collapses to success, success-with-nothing-to-do, or a
//!   classified failure that says whether retrying can help
//!
//! All collaborators are injected; the crate opens no connections and holds
//! no global state.
//!
//! # Modules
//!
//! - [`operation`] - Long-running operation snapshots, handles, and scopes
//! - [`error`] - Raw provider errors and their semantic classification
//! - [`wait`] - Operation-completion waiter with backoff and cancellation
//! - [`guard`] - Idempotent mutation guard folding attempts into outcomes
//! - [`compute`] - Per-resource facade for compute resource types
//!
//! # Example
//!
//! ```ignore
//! use gantry::{ComputeService, MutationAttempt, ResourceKind};
//! use tokio_util::sync::CancellationToken;
//!
//! let compute = ComputeService::new(operations_client);
//! let cancel = CancellationToken::new();
//!
//! let outcome = compute
//!     .resource(ResourceKind::Network, "prod-net")
//!     .delete(|| async { issue_delete().await }, &cancel)
//!     .await;
//!
//! // A 404 from the provider lands here as success: the network is gone.
//! assert!(outcome.is_success());
//! ```

#![deny(missing_docs)]

pub mod compute;
pub mod error;
pub mod guard;
pub mod operation;
pub mod wait;

pub use compute::{ComputeService, ResourceKind, ResourceScope};
pub use error::{classify, ApiError, ErrorClass, TransientCause};
pub use guard::{guard, MutationAttempt, MutationKind, ReconcileOutcome};
pub use operation::{
    Operation, OperationError, OperationErrorList, OperationHandle, OperationScope,
    OperationStatus,
};
pub use wait::{wait_for_operation, OperationQuery, PollConfig, WaitError, WaitOutcome};

//! Long-running operation snapshots and handles
//!
//! A mutation against the provisioning API does not complete synchronously:
//! the call returns an operation that moves through `PENDING`/`RUNNING` to
//! `DONE`, and only the `DONE` snapshot is authoritative about the outcome.
//! The types here model those snapshots. The provider owns the operation;
//! this crate only reads fresh copies of it via polling and never writes
//! back.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a long-running operation as reported by the provider.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Queued but not started.
    Pending,
    /// In progress.
    Running,
    /// Terminal. The snapshot's error payload decides success or failure.
    Done,
}

/// Endpoint scope an operation's name is valid in.
///
/// The provider exposes separate status endpoints for global, regional, and
/// zonal operations; the collaborator that queries status picks the endpoint
/// from this scope. The core itself never interprets it beyond logging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationScope {
    /// Project-wide operations (networks, firewalls, global addresses).
    Global,
    /// Regional operations (subnetworks, routers).
    Region(String),
    /// Zonal operations (instances, instance groups).
    Zone(String),
}

/// Opaque token sufficient to re-query an in-flight operation's status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationHandle {
    /// Provider-assigned operation name, unique within its scope.
    pub name: String,
    /// Endpoint scope the name resolves in.
    pub scope: OperationScope,
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            OperationScope::Global => write!(f, "{}", self.name),
            OperationScope::Region(region) => write!(f, "{} (region {})", self.name, region),
            OperationScope::Zone(zone) => write!(f, "{} (zone {})", self.name, zone),
        }
    }
}

/// One entry of a terminal error payload.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    /// Provider error code, e.g. `RESOURCE_NOT_FOUND`.
    #[serde(default)]
    pub code: String,
    /// Human-readable description of the failure.
    #[serde(default)]
    pub message: String,
}

/// Terminal error payload wrapper matching the provider wire shape.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct OperationErrorList {
    /// Individual failures; non-empty only for operations that failed.
    #[serde(default)]
    pub errors: Vec<OperationError>,
}

/// Snapshot of a long-running operation.
///
/// Deserializes directly from the provider's operation resource. Unknown
/// fields are ignored so the model stays stable as the provider adds fields.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Provider-assigned name, unique within the operation's scope.
    pub name: String,
    /// Current status.
    pub status: OperationStatus,
    /// Mutation verb that started this operation ("insert", "delete", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    /// Self-link of the resource the operation mutates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_link: Option<String>,
    /// Completion percentage, 0..=100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
    /// Region self-link for regional operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Zone self-link for zonal operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// Terminal error payload; meaningful only once status is `Done`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationErrorList>,
}

impl Operation {
    /// Create a snapshot with the given name and status; all optional
    /// fields empty.
    pub fn new(name: impl Into<String>, status: OperationStatus) -> Self {
        Self {
            name: name.into(),
            status,
            operation_type: None,
            target_link: None,
            progress: None,
            region: None,
            zone: None,
            error: None,
        }
    }

    /// Attach a terminal error payload to this snapshot.
    pub fn with_error(mut self, errors: Vec<OperationError>) -> Self {
        self.error = Some(OperationErrorList { errors });
        self
    }

    /// Whether the operation has reached its terminal state.
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    /// Terminal error payload entries; empty for pending or successful
    /// operations.
    pub fn terminal_errors(&self) -> &[OperationError] {
        self.error
            .as_ref()
            .map(|list| list.errors.as_slice())
            .unwrap_or(&[])
    }

    /// Endpoint scope derived from the snapshot's region/zone self-links.
    ///
    /// Zonal operations take precedence over regional ones; an operation
    /// with neither link is global.
    pub fn scope(&self) -> OperationScope {
        if let Some(zone) = self.zone.as_deref() {
            OperationScope::Zone(trailing_segment(zone))
        } else if let Some(region) = self.region.as_deref() {
            OperationScope::Region(trailing_segment(region))
        } else {
            OperationScope::Global
        }
    }

    /// Handle sufficient to re-query this operation's status.
    pub fn handle(&self) -> OperationHandle {
        OperationHandle {
            name: self.name.clone(),
            scope: self.scope(),
        }
    }
}

/// Last path segment of a provider self-link.
///
/// The provider reports locations as full URLs
/// ("https://.../projects/p/regions/us-central1"); only the trailing
/// segment names the location. Bare names pass through unchanged.
fn trailing_segment(link: &str) -> String {
    link.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(link)
        .to_string()
}

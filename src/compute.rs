//! Compute resource facade
//!
//! Thin per-resource entry points over the guard and waiter. The facade
//! holds no reconciliation logic of its own: it binds a resource kind and
//! name for logging, runs the caller's provisioning call, and hands the
//! attempt to [`guard`](crate::guard::guard). Collaborators arrive by
//! injection; nothing here reaches for ambient clients or globals.

use std::fmt;
use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::guard::{guard, MutationAttempt, MutationKind, ReconcileOutcome};
use crate::wait::{OperationQuery, PollConfig};

/// Compute resource types reconciled through the guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// VPC network.
    Network,
    /// Subnetwork within a region.
    Subnetwork,
    /// Firewall rule.
    Firewall,
    /// Load balancer health check.
    HealthCheck,
    /// Backend service grouping instance groups.
    BackendService,
    /// TCP proxy fronting a backend service.
    TargetTcpProxy,
    /// Global static address.
    GlobalAddress,
    /// Forwarding rule binding an address to a proxy.
    ForwardingRule,
    /// Zonal instance group.
    InstanceGroup,
    /// Compute instance.
    Instance,
    /// Cloud router for NAT egress.
    Router,
}

impl ResourceKind {
    /// Lowercase name for log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnetwork => "subnetwork",
            ResourceKind::Firewall => "firewall",
            ResourceKind::HealthCheck => "healthcheck",
            ResourceKind::BackendService => "backendservice",
            ResourceKind::TargetTcpProxy => "targettcpproxy",
            ResourceKind::GlobalAddress => "globaladdress",
            ResourceKind::ForwardingRule => "forwardingrule",
            ResourceKind::InstanceGroup => "instancegroup",
            ResourceKind::Instance => "instance",
            ResourceKind::Router => "router",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry point for guarded mutations against compute resources.
///
/// Owns the status-query collaborator and the polling policy shared by all
/// mutations issued through it. Cheap to share by reference across
/// concurrent reconciliations; the facade itself keeps no per-call state.
pub struct ComputeService<Q> {
    ops: Q,
    poll: PollConfig,
}

impl<Q: OperationQuery> ComputeService<Q> {
    /// Facade over the given status-query collaborator with default
    /// polling.
    pub fn new(ops: Q) -> Self {
        Self {
            ops,
            poll: PollConfig::default(),
        }
    }

    /// Facade with explicit polling behavior.
    pub fn with_poll_config(ops: Q, poll: PollConfig) -> Self {
        Self { ops, poll }
    }

    /// Bind a named resource for guarded mutations.
    pub fn resource(&self, kind: ResourceKind, name: impl Into<String>) -> ResourceScope<'_, Q> {
        ResourceScope {
            service: self,
            kind,
            name: name.into(),
        }
    }
}

/// A single named resource bound to the facade.
///
/// Created by [`ComputeService::resource`]; borrows the facade, so scopes
/// are free to construct per call site.
pub struct ResourceScope<'a, Q> {
    service: &'a ComputeService<Q>,
    kind: ResourceKind,
    name: String,
}

impl<Q: OperationQuery> ResourceScope<'_, Q> {
    /// Issue a create through `issue` and guard it to completion.
    ///
    /// An "already exists" rejection is absorbed as success.
    pub async fn create<F, Fut>(&self, issue: F, cancel: &CancellationToken) -> ReconcileOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MutationAttempt>,
    {
        self.run(MutationKind::Create, issue, cancel).await
    }

    /// Issue an update through `issue` and guard it to completion.
    pub async fn update<F, Fut>(&self, issue: F, cancel: &CancellationToken) -> ReconcileOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MutationAttempt>,
    {
        self.run(MutationKind::Update, issue, cancel).await
    }

    /// Issue a delete through `issue` and guard it to completion.
    ///
    /// A "not found" rejection is absorbed as [`ReconcileOutcome::SuccessAbsent`].
    pub async fn delete<F, Fut>(&self, issue: F, cancel: &CancellationToken) -> ReconcileOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MutationAttempt>,
    {
        self.run(MutationKind::Delete, issue, cancel).await
    }

    #[instrument(
        skip(self, issue, cancel),
        fields(resource = self.kind.as_str(), name = %self.name)
    )]
    async fn run<F, Fut>(
        &self,
        verb: MutationKind,
        issue: F,
        cancel: &CancellationToken,
    ) -> ReconcileOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MutationAttempt>,
    {
        let attempt = issue().await;
        let outcome = guard(
            &self.service.ops,
            attempt,
            verb,
            &self.service.poll,
            cancel,
        )
        .await;
        info!(
            mutation = verb.as_str(),
            outcome = %outcome,
            "reconcile finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ErrorClass};
    use crate::operation::{Operation, OperationStatus};
    use crate::wait::MockOperationQuery;
    use std::time::Duration;

    fn fast_service(query: MockOperationQuery) -> ComputeService<MockOperationQuery> {
        ComputeService::with_poll_config(
            query,
            PollConfig {
                timeout: Duration::from_secs(5),
                initial_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(4),
                backoff_multiplier: 2.0,
                max_query_failures: 3,
            },
        )
    }

    #[tokio::test]
    async fn test_delete_of_absent_resource_is_success_absent() {
        let service = fast_service(MockOperationQuery::new());
        let cancel = CancellationToken::new();

        let outcome = service
            .resource(ResourceKind::Firewall, "allow-healthchecks")
            .delete(
                || async { MutationAttempt::Rejected(ApiError::http(404, "not found")) },
                &cancel,
            )
            .await;

        assert_eq!(outcome, ReconcileOutcome::SuccessAbsent);
    }

    #[tokio::test]
    async fn test_create_of_existing_resource_is_success() {
        let service = fast_service(MockOperationQuery::new());
        let cancel = CancellationToken::new();

        let outcome = service
            .resource(ResourceKind::Network, "prod-net")
            .create(
                || async {
                    MutationAttempt::Rejected(ApiError::http_with_reason(
                        409,
                        "alreadyExists",
                        "exists",
                    ))
                },
                &cancel,
            )
            .await;

        assert_eq!(outcome, ReconcileOutcome::Success);
    }

    #[tokio::test]
    async fn test_create_tracks_the_returned_operation() {
        let mut query = MockOperationQuery::new();
        query
            .expect_query()
            .times(1)
            .withf(|h| h.name == "operation-create-net")
            .returning(|h| Ok(Operation::new(h.name.as_str(), OperationStatus::Done)));
        let service = fast_service(query);
        let cancel = CancellationToken::new();

        let outcome = service
            .resource(ResourceKind::Network, "prod-net")
            .create(
                || async {
                    MutationAttempt::Accepted(Operation::new(
                        "operation-create-net",
                        OperationStatus::Pending,
                    ))
                },
                &cancel,
            )
            .await;

        assert_eq!(outcome, ReconcileOutcome::Success);
    }

    #[tokio::test]
    async fn test_update_conflict_surfaces_as_failure() {
        let service = fast_service(MockOperationQuery::new());
        let cancel = CancellationToken::new();

        let outcome = service
            .resource(ResourceKind::BackendService, "api-backend")
            .update(
                || async {
                    MutationAttempt::Rejected(ApiError::http(412, "fingerprint mismatch"))
                },
                &cancel,
            )
            .await;

        assert_eq!(outcome, ReconcileOutcome::Failure(ErrorClass::Conflict));
    }

    #[tokio::test]
    async fn test_default_polling_facade_settles_immediate_outcomes() {
        // Default polling sleeps whole seconds between queries, so this
        // only drives paths that settle before the first query. The mock
        // has no expectations and panics if the guard polls anyway.
        let service = ComputeService::new(MockOperationQuery::new());
        let cancel = CancellationToken::new();

        let absent = service
            .resource(ResourceKind::Router, "nat-egress")
            .delete(
                || async { MutationAttempt::Rejected(ApiError::http(404, "not found")) },
                &cancel,
            )
            .await;
        assert_eq!(absent, ReconcileOutcome::SuccessAbsent);

        let settled = service
            .resource(ResourceKind::HealthCheck, "api-hc")
            .create(
                || async {
                    MutationAttempt::Accepted(Operation::new(
                        "operation-create-hc",
                        OperationStatus::Done,
                    ))
                },
                &cancel,
            )
            .await;
        assert_eq!(settled, ReconcileOutcome::Success);
    }

    #[test]
    fn test_kind_names_are_stable_log_fields() {
        let cases = [
            (ResourceKind::Network, "network"),
            (ResourceKind::Subnetwork, "subnetwork"),
            (ResourceKind::Firewall, "firewall"),
            (ResourceKind::HealthCheck, "healthcheck"),
            (ResourceKind::BackendService, "backendservice"),
            (ResourceKind::TargetTcpProxy, "targettcpproxy"),
            (ResourceKind::GlobalAddress, "globaladdress"),
            (ResourceKind::ForwardingRule, "forwardingrule"),
            (ResourceKind::InstanceGroup, "instancegroup"),
            (ResourceKind::Instance, "instance"),
            (ResourceKind::Router, "router"),
        ];
        for (kind, expected) in cases {
            assert_eq!(kind.as_str(), expected);
            assert_eq!(kind.to_string(), expected);
        }
    }
}

//! Bootstrap orchestration
//!
//! Sequences the approval phases for a node roster:
//!
//! 1. Nodes not `Ready` need a client certificate
//! 2. Match pending client CSRs, verify every such node has one, approve them
//! 3. Nodes whose `/healthz` is unreachable need a server certificate
//! 4. Match pending server CSRs, verify, approve
//! 5. Poll every roster node's `/healthz` until it answers
//!
//! The client phase finishes completely before the server phase starts: a kubelet
//! cannot request a serving certificate until it has a working client identity.
//!
//! Query, missing-CSR, and approval errors abort the run. The returned
//! [`BootstrapFailure`] still carries what happened before the abort, including
//! whether anything changed. An unhealthy node after the last phase does not abort;
//! it is reported in [`BootstrapResult::server_health`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::approval::{approve_all, count_approved, ApprovalOutcome, CsrApprover};
use crate::csr::{match_pending_csrs, SubjectDecoder, UsageClass};
use crate::gateway::{ready_node_names, ClusterGateway};
use crate::health::{probe_round, wait_for_server_health, HealthReport, PollerConfig};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::verify::verify_complete;
use crate::Error;

/// What a bootstrap run did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapResult {
    /// Whether any CSR was approved
    pub changed: bool,
    /// Client approvals in execution order
    pub client_approve_results: Vec<ApprovalOutcome>,
    /// Server approvals in execution order
    pub server_approve_results: Vec<ApprovalOutcome>,
    /// Final health polling outcome; `None` if the run aborted before polling
    pub server_health: Option<HealthReport>,
}

impl BootstrapResult {
    /// Whether some node never became reachable after server approval
    pub fn failed(&self) -> bool {
        self.server_health.as_ref().is_some_and(|h| !h.all_ready)
    }

    /// Failure detail for an unhealthy result
    pub fn failure_message(&self) -> Option<String> {
        self.server_health.as_ref().and_then(HealthReport::failure_message)
    }

    fn record(&mut self, phase: UsageClass, outcomes: Vec<ApprovalOutcome>) {
        self.changed |= count_approved(&outcomes) > 0;
        match phase {
            UsageClass::Client => self.client_approve_results = outcomes,
            UsageClass::Server => self.server_approve_results = outcomes,
        }
    }

    /// Fold a later attempt into this one: approvals accumulate, health is the
    /// latest attempt's
    fn absorb(&mut self, attempt: BootstrapResult) {
        self.changed |= attempt.changed;
        self.client_approve_results
            .extend(attempt.client_approve_results);
        self.server_approve_results
            .extend(attempt.server_approve_results);
        self.server_health = attempt.server_health;
    }
}

/// A run aborted; `report` holds everything done before the abort
#[derive(Debug, Error)]
#[error("bootstrap aborted")]
pub struct BootstrapFailure {
    /// Why the run stopped
    #[source]
    pub error: Error,
    /// Approvals performed before stopping
    pub report: BootstrapResult,
}

/// Drives the client and server approval phases for a roster
pub struct Bootstrapper {
    gateway: Arc<dyn ClusterGateway>,
    approver: Arc<dyn CsrApprover>,
    decoder: Arc<dyn SubjectDecoder>,
    poller: PollerConfig,
}

impl Bootstrapper {
    /// Create a bootstrapper from its collaborators
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        approver: Arc<dyn CsrApprover>,
        decoder: Arc<dyn SubjectDecoder>,
        poller: PollerConfig,
    ) -> Self {
        Self {
            gateway,
            approver,
            decoder,
            poller,
        }
    }

    /// Approve client then server CSRs for `roster` and wait for the nodes to serve
    #[instrument(skip_all, fields(nodes = roster.len()))]
    pub async fn run(&self, roster: &[String]) -> Result<BootstrapResult, BootstrapFailure> {
        let roster: BTreeSet<String> = roster.iter().cloned().collect();
        let mut report = BootstrapResult::default();

        match self.run_phases(&roster, &mut report).await {
            Ok(()) => Ok(report),
            Err(error) => Err(BootstrapFailure { error, report }),
        }
    }

    /// Like [`run`](Self::run), re-running the whole workflow while some node has
    /// not submitted its CSR yet
    ///
    /// The returned report covers every attempt, so approvals made by an attempt
    /// that later aborted stay visible.
    pub async fn run_with_retry(
        &self,
        roster: &[String],
        retry: &RetryConfig,
    ) -> Result<BootstrapResult, BootstrapFailure> {
        let history = Mutex::new(BootstrapResult::default());
        let history = &history;

        retry_with_backoff(
            retry,
            "bootstrap",
            |failure: &BootstrapFailure| failure.error.is_retryable(),
            move || async move {
                let attempt = self.run(roster).await;
                let mut history = history.lock().unwrap_or_else(PoisonError::into_inner);
                let merged = match attempt {
                    Ok(result) => {
                        history.absorb(result);
                        Ok(history.clone())
                    }
                    Err(BootstrapFailure { error, report }) => {
                        history.absorb(report);
                        Err(BootstrapFailure {
                            error,
                            report: history.clone(),
                        })
                    }
                };
                merged
            },
        )
        .await
    }

    async fn run_phases(
        &self,
        roster: &BTreeSet<String>,
        report: &mut BootstrapResult,
    ) -> Result<(), Error> {
        // Client certificates: control-plane readiness tells us who still needs one
        let nodes = self.gateway.list_nodes().await?;
        let ready: BTreeSet<&str> = ready_node_names(&nodes).collect();
        let needs_client: BTreeSet<String> = roster
            .iter()
            .filter(|n| !ready.contains(n.as_str()))
            .cloned()
            .collect();
        info!(not_ready = ?needs_client, "client certificate phase");
        self.approve_phase(UsageClass::Client, roster, &needs_client, report)
            .await?;

        // Server certificates: only an end-to-end probe proves the serving cert works
        let (_, needs_server) = probe_round(self.gateway.as_ref(), roster).await;
        info!(not_ready = ?needs_server, "server certificate phase");
        self.approve_phase(UsageClass::Server, roster, &needs_server, report)
            .await?;

        let health = wait_for_server_health(self.gateway.as_ref(), roster, &self.poller).await;
        report.server_health = Some(health);
        Ok(())
    }

    /// Discover, match, verify, then approve one certificate class
    async fn approve_phase(
        &self,
        phase: UsageClass,
        roster: &BTreeSet<String>,
        needs_cert: &BTreeSet<String>,
        report: &mut BootstrapResult,
    ) -> Result<(), Error> {
        let csrs = self.gateway.list_csrs().await?;
        let matched = match_pending_csrs(&csrs, phase, roster, self.decoder.as_ref());
        info!(%phase, pending = matched.len(), "matched pending CSRs");

        verify_complete(needs_cert, &matched).map_err(|e| Error::MissingCsr {
            phase,
            nodes: e.nodes,
        })?;

        match approve_all(self.approver.as_ref(), &matched).await {
            Ok(outcomes) => {
                report.record(phase, outcomes);
                Ok(())
            }
            Err(source) => {
                report.record(phase, source.outcomes.clone());
                Err(Error::Approval { phase, source })
            }
        }
    }
}

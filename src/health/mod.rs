//! Server health poller
//!
//! After server certificates are approved, kubelets still have to receive the
//! issued certificate and start serving with it. The poller probes each node's
//! proxied `/healthz` in rounds, narrowing to the nodes still unreachable, until
//! all of them answer, no progress is made, or the attempt budget runs out.
//!
//! The result is reported, not thrown: approvals already performed stand either way.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::gateway::ClusterGateway;
use crate::{DEFAULT_HEALTH_ATTEMPTS, DEFAULT_HEALTH_INTERVAL_SECS};

/// Poller settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollerConfig {
    /// Maximum number of probing rounds
    pub max_attempts: u32,
    /// Pause between rounds
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_HEALTH_ATTEMPTS,
            interval: Duration::from_secs(DEFAULT_HEALTH_INTERVAL_SECS),
        }
    }
}

impl PollerConfig {
    /// Config with `max_attempts` rounds and no pause between them
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            interval: Duration::ZERO,
        }
    }
}

/// How polling ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollTermination {
    /// Every node answered
    AllReady,
    /// A round made the same progress as the round before it
    Stalled,
    /// The attempt budget ran out
    Exhausted,
}

/// Outcome of [`wait_for_server_health`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Whether every node answered
    pub all_ready: bool,
    /// Nodes never observed reachable
    pub still_unready: BTreeSet<String>,
    /// Rounds that were run
    pub rounds: u32,
    /// Why polling stopped
    pub termination: PollTermination,
}

impl HealthReport {
    /// Human-readable failure message, `None` when every node answered
    pub fn failure_message(&self) -> Option<String> {
        if self.all_ready {
            return None;
        }
        let nodes: Vec<&str> = self.still_unready.iter().map(String::as_str).collect();
        Some(format!(
            "Some nodes still not ready after approving server certs: {}",
            nodes.join(", ")
        ))
    }
}

/// Probe `nodes` once, returning (reachable, unreachable)
pub async fn probe_round<G: ClusterGateway + ?Sized>(
    gateway: &G,
    nodes: &BTreeSet<String>,
) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut reachable = BTreeSet::new();
    let mut unreachable = BTreeSet::new();
    for node in nodes {
        if gateway.probe_node_health(node).await {
            reachable.insert(node.clone());
        } else {
            unreachable.insert(node.clone());
        }
    }
    (reachable, unreachable)
}

/// Poll until every node in `nodes` answers its health probe
///
/// Each round probes only the nodes not yet seen reachable. Polling stops when:
///
/// - no node is left unreachable
/// - the set of nodes that became reachable equals the previous round's (since the
///   probed set narrows every round, that only happens when two rounds in a row
///   brought no node up)
/// - `max_attempts` rounds have run
pub async fn wait_for_server_health<G: ClusterGateway + ?Sized>(
    gateway: &G,
    nodes: &BTreeSet<String>,
    config: &PollerConfig,
) -> HealthReport {
    let max_attempts = config.max_attempts.max(1);
    let mut remaining = nodes.clone();
    let mut previous: Option<BTreeSet<String>> = None;
    let mut round = 0u32;

    loop {
        round += 1;
        let (reachable, unreachable) = probe_round(gateway, &remaining).await;
        debug!(
            round,
            reachable = reachable.len(),
            unreachable = unreachable.len(),
            "server health round"
        );

        let termination = if unreachable.is_empty() {
            Some(PollTermination::AllReady)
        } else if previous.as_ref() == Some(&reachable) {
            Some(PollTermination::Stalled)
        } else if round >= max_attempts {
            Some(PollTermination::Exhausted)
        } else {
            None
        };

        if let Some(termination) = termination {
            let report = HealthReport {
                all_ready: termination == PollTermination::AllReady,
                still_unready: unreachable,
                rounds: round,
                termination,
            };
            if report.all_ready {
                info!(rounds = round, "all nodes serving with approved certificates");
            } else {
                warn!(
                    rounds = round,
                    ?termination,
                    nodes = ?report.still_unready,
                    "nodes still not serving after server certificate approval"
                );
            }
            return report;
        }

        previous = Some(reachable);
        remaining = unreachable;
        if !config.interval.is_zero() {
            tokio::time::sleep(config.interval).await;
        }
    }
}

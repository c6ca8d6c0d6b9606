//! CSR discovery and node matching
//!
//! Decides which pending CertificateSigningRequests belong to which expected nodes.
//! A CSR matches only when all of these hold:
//!
//! - it is pending (no status conditions)
//! - its usages contain the token for the requested class
//! - its subject Common Name, minus the `system:node:` prefix, is in the roster
//!
//! CSRs from identities outside the roster are never matched.

mod decoder;
mod subject;

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::gateway::CsrRecord;
use crate::NODE_IDENTITY_PREFIX;

pub use decoder::{DecodeError, SubjectDecoder, X509SubjectDecoder};
#[cfg(test)]
pub use decoder::MockSubjectDecoder;
pub use subject::parse_common_name;

/// Certificate class a CSR is requesting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageClass {
    /// Kubelet client certificate (node -> API server)
    Client,
    /// Kubelet serving certificate (API server -> node)
    Server,
}

impl UsageClass {
    /// Usage token a CSR of this class must carry in `spec.usages`
    pub fn usage_token(&self) -> &'static str {
        match self {
            Self::Client => "client auth",
            Self::Server => "server auth",
        }
    }
}

impl fmt::Display for UsageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// A pending CSR resolved to the node that submitted it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchedCsr {
    /// CSR name
    pub csr: String,
    /// Node name the CSR's subject resolved to
    pub node: String,
}

/// CSR name -> node name, in the order the CSRs were listed
///
/// Built fresh for each phase; approvals run in this order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchedCsrs {
    entries: Vec<MatchedCsr>,
}

impl MatchedCsrs {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `csr -> node`. A CSR name already present keeps its first mapping.
    pub fn insert(&mut self, csr: impl Into<String>, node: impl Into<String>) {
        let csr = csr.into();
        if self.entries.iter().any(|m| m.csr == csr) {
            return;
        }
        self.entries.push(MatchedCsr {
            csr,
            node: node.into(),
        });
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &MatchedCsr> {
        self.entries.iter()
    }

    /// Node name a CSR resolved to
    pub fn node_for(&self, csr: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|m| m.csr == csr)
            .map(|m| m.node.as_str())
    }

    /// Distinct nodes that have at least one matched CSR
    pub fn nodes(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|m| m.node.as_str()).collect()
    }

    /// Number of matched CSRs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing matched
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C: Into<String>, N: Into<String>> FromIterator<(C, N)> for MatchedCsrs {
    fn from_iter<I: IntoIterator<Item = (C, N)>>(iter: I) -> Self {
        let mut matched = Self::new();
        for (csr, node) in iter {
            matched.insert(csr, node);
        }
        matched
    }
}

/// Strip the kubelet identity prefix from a Common Name
fn node_name_from_common_name(common_name: &str) -> &str {
    common_name
        .strip_prefix(NODE_IDENTITY_PREFIX)
        .unwrap_or(common_name)
}

/// Select the pending CSRs of `class` whose subject names a node in `expected_nodes`
///
/// A payload that cannot be decoded excludes that CSR only; the rest of the scan
/// continues.
pub fn match_pending_csrs<D: SubjectDecoder + ?Sized>(
    csrs: &[CsrRecord],
    class: UsageClass,
    expected_nodes: &BTreeSet<String>,
    decoder: &D,
) -> MatchedCsrs {
    let token = class.usage_token();
    let mut matched = MatchedCsrs::new();

    for csr in csrs {
        if csr.has_status_conditions {
            continue;
        }
        if !csr.usages.iter().any(|u| u == token) {
            continue;
        }

        let subject = match decoder.decode_subject(&csr.request) {
            Ok(subject) => subject,
            Err(e) => {
                warn!(csr = %csr.name, error = %e, "skipping CSR with undecodable request");
                continue;
            }
        };

        let Some(common_name) = parse_common_name(&subject) else {
            debug!(csr = %csr.name, subject = %subject.trim(), "CSR subject has no common name");
            continue;
        };

        let node = node_name_from_common_name(&common_name);
        if !expected_nodes.contains(node) {
            debug!(csr = %csr.name, common_name = %common_name, "CSR is not from a roster node");
            continue;
        }

        debug!(csr = %csr.name, node = %node, %class, "matched pending CSR");
        matched.insert(csr.name.clone(), node);
    }

    matched
}

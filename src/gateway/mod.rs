//! Read-only cluster queries
//!
//! The orchestrator only needs three views of the cluster: node readiness, the CSR
//! queue, and whether a node's kubelet answers `/healthz` through the API proxy.
//! [`ClusterGateway`] abstracts them so tests can use mocks, while production uses
//! either the kube API directly ([`KubeGateway`]) or an `oc` binary ([`OcGateway`]).

mod kube_api;
mod oc;

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::Node;
#[cfg(test)]
use mockall::automock;

use crate::Error;

pub use kube_api::KubeGateway;
pub use oc::{OcGateway, OcOutput, OcRunner, ProcessRunner};

/// Node name plus its control-plane readiness
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeStatus {
    /// Node name
    pub name: String,
    /// Whether the `Ready` condition is `"True"`
    pub ready: bool,
}

impl NodeStatus {
    /// Project a Node object; `None` when it has no name
    pub fn from_node(node: &Node) -> Option<Self> {
        let name = node.metadata.name.clone()?;
        let ready = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .map(|conds| {
                // "True" is a string here, not a boolean
                conds.iter().any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or(false);
        Some(Self { name, ready })
    }
}

/// The fields of a CertificateSigningRequest the matcher looks at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrRecord {
    /// CSR name
    pub name: String,
    /// `spec.usages`
    pub usages: Vec<String>,
    /// Whether `status.conditions` is non-empty (approved, denied, failed)
    pub has_status_conditions: bool,
    /// `spec.request`, base64-decoded (PEM in practice)
    pub request: Vec<u8>,
}

impl CsrRecord {
    /// Project a CertificateSigningRequest; `None` when it has no name
    pub fn from_csr(csr: &CertificateSigningRequest) -> Option<Self> {
        let name = csr.metadata.name.clone()?;
        let has_status_conditions = csr
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|c| !c.is_empty());
        Some(Self {
            name,
            usages: csr.spec.usages.clone().unwrap_or_default(),
            has_status_conditions,
            request: csr.spec.request.0.clone(),
        })
    }
}

/// Names of the nodes whose `Ready` condition is true
pub fn ready_node_names(nodes: &[NodeStatus]) -> impl Iterator<Item = &str> {
    nodes.iter().filter(|n| n.ready).map(|n| n.name.as_str())
}

/// Trait abstracting read-only cluster queries
///
/// This trait allows mocking the cluster in tests while using the real API
/// server in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// List every node with its readiness
    async fn list_nodes(&self) -> Result<Vec<NodeStatus>, Error>;

    /// List every CertificateSigningRequest (there is no server-side pending filter)
    async fn list_csrs(&self) -> Result<Vec<CsrRecord>, Error>;

    /// Hit `/api/v1/nodes/{node}/proxy/healthz`
    ///
    /// Returns `true` when the kubelet answered, which proves its serving
    /// certificate works. Any failure is `false`, never an error.
    async fn probe_node_health(&self, node: &str) -> bool;
}

/// API path proxied to a node's kubelet health endpoint
pub fn node_healthz_path(node: &str) -> String {
    format!("/api/v1/nodes/{node}/proxy/healthz")
}

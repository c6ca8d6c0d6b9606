//! Gateway backed by the Kubernetes API via kube-rs

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use super::{node_healthz_path, ClusterGateway, CsrRecord, NodeStatus};
use crate::approval::{ApprovalError, CsrApprover, APPROVAL_REASON, APPROVED_CONDITION};
use crate::Error;

/// Real Kubernetes implementation of [`ClusterGateway`] and [`CsrApprover`]
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    /// Wrap an existing kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig, or infer one from the environment
    /// (`KUBECONFIG`, `~/.kube/config`, in-cluster service account)
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, Error> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::config(format!(
                        "failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
            }
            None => Config::infer()
                .await
                .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
        };

        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn list_nodes(&self) -> Result<Vec<NodeStatus>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        Ok(nodes.items.iter().filter_map(NodeStatus::from_node).collect())
    }

    async fn list_csrs(&self) -> Result<Vec<CsrRecord>, Error> {
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        let csrs = api.list(&ListParams::default()).await?;
        Ok(csrs.items.iter().filter_map(CsrRecord::from_csr).collect())
    }

    async fn probe_node_health(&self, node: &str) -> bool {
        let request = match http::Request::get(node_healthz_path(node)).body(Vec::new()) {
            Ok(request) => request,
            Err(e) => {
                debug!(node = %node, error = %e, "could not build healthz request");
                return false;
            }
        };

        match self.client.request_text(request).await {
            Ok(_) => true,
            Err(e) => {
                debug!(node = %node, error = %e, "node healthz not reachable");
                false
            }
        }
    }
}

#[async_trait]
impl CsrApprover for KubeGateway {
    async fn approve(&self, csr: &str) -> Result<String, ApprovalError> {
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());

        let patch = serde_json::json!({
            "status": {
                "conditions": [{
                    "type": APPROVED_CONDITION,
                    "status": "True",
                    "reason": APPROVAL_REASON,
                    "message": "Approved by bootstrap-approver for a node in the roster",
                }]
            }
        });

        api.patch_approval(csr, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ApprovalError::new(csr, e.to_string()))?;

        Ok(format!(
            "certificatesigningrequest.certificates.k8s.io/{csr} approved"
        ))
    }
}

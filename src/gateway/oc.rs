//! Gateway that shells out to an `oc` (or `kubectl`) binary
//!
//! Useful on hosts that only have an admin kubeconfig and the CLI, such as a
//! control plane node during install. Every call is
//! `<oc_bin> --config=<kubeconfig> <args...>`.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::Node;
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{node_healthz_path, ClusterGateway, CsrRecord, NodeStatus};
use crate::approval::{ApprovalError, CsrApprover};
use crate::Error;

/// Captured result of one command execution
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OcOutput {
    /// Whether the command exited zero
    pub success: bool,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

/// Runs a program and captures its output
///
/// Separate from [`OcGateway`] so tests can replay recorded CLI output.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OcRunner: Send + Sync {
    /// Run `program args...`; `Err` only when the process could not be started
    async fn run(&self, program: &str, args: &[String]) -> Result<OcOutput, Error>;
}

/// [`OcRunner`] that spawns real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl OcRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<OcOutput, Error> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::command(format!("failed to run {}: {}", program, e)))?;

        Ok(OcOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// `oc get <kind> -ojson` output; kubectl reports `kind: List` so only the items
/// are decoded
#[derive(Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Command-line implementation of [`ClusterGateway`] and [`CsrApprover`]
#[derive(Clone)]
pub struct OcGateway {
    runner: Arc<dyn OcRunner>,
    oc_bin: String,
    kubeconfig: String,
}

impl OcGateway {
    /// Gateway running `oc_bin` against `kubeconfig` with real processes
    pub fn new(oc_bin: impl Into<String>, kubeconfig: impl Into<String>) -> Self {
        Self::with_runner(Arc::new(ProcessRunner), oc_bin, kubeconfig)
    }

    /// Gateway using a custom runner
    pub fn with_runner(
        runner: Arc<dyn OcRunner>,
        oc_bin: impl Into<String>,
        kubeconfig: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            oc_bin: oc_bin.into(),
            kubeconfig: kubeconfig.into(),
        }
    }

    async fn oc(&self, args: &[&str]) -> Result<OcOutput, Error> {
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(format!("--config={}", self.kubeconfig));
        full_args.extend(args.iter().map(|a| a.to_string()));
        debug!(command = %self.oc_bin, args = ?full_args, "running oc");
        self.runner.run(&self.oc_bin, &full_args).await
    }

    /// Run a `get ... -ojson` query and decode its items
    async fn get_items<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>, Error> {
        let output = self.oc(&["get", kind, "-ojson"]).await?;
        if !output.success {
            return Err(Error::query(format!(
                "{} get {} failed: {}",
                self.oc_bin,
                kind,
                output.stderr.trim()
            )));
        }
        let list: ItemList<T> = serde_json::from_str(&output.stdout).map_err(|e| {
            Error::serialization(format!("failed to decode {} list: {}", kind, e))
        })?;
        Ok(list.items)
    }
}

#[async_trait]
impl ClusterGateway for OcGateway {
    async fn list_nodes(&self) -> Result<Vec<NodeStatus>, Error> {
        let nodes: Vec<Node> = self.get_items("nodes").await?;
        Ok(nodes.iter().filter_map(NodeStatus::from_node).collect())
    }

    async fn list_csrs(&self) -> Result<Vec<CsrRecord>, Error> {
        let csrs: Vec<CertificateSigningRequest> = self.get_items("csr").await?;
        Ok(csrs.iter().filter_map(CsrRecord::from_csr).collect())
    }

    async fn probe_node_health(&self, node: &str) -> bool {
        let path = node_healthz_path(node);
        match self.oc(&["get", "--raw", &path]).await {
            Ok(output) => output.success,
            Err(e) => {
                debug!(node = %node, error = %e, "healthz probe could not run");
                false
            }
        }
    }
}

#[async_trait]
impl CsrApprover for OcGateway {
    async fn approve(&self, csr: &str) -> Result<String, ApprovalError> {
        let output = self
            .oc(&["adm", "certificate", "approve", csr])
            .await
            .map_err(|e| ApprovalError::new(csr, e.to_string()))?;

        if output.success {
            Ok(output.stdout.trim().to_string())
        } else {
            Err(ApprovalError::new(csr, output.stderr.trim()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::function;

    const KUBECONFIG: &str = "/etc/origin/master/admin.kubeconfig";

    const NODES_JSON: &str = r#"{
        "apiVersion": "v1",
        "kind": "List",
        "items": [
            {
                "apiVersion": "v1",
                "kind": "Node",
                "metadata": {"name": "fedora1.openshift.io"},
                "status": {"conditions": [
                    {"type": "MemoryPressure", "status": "False"},
                    {"type": "Ready", "status": "True"}
                ]}
            },
            {
                "apiVersion": "v1",
                "kind": "Node",
                "metadata": {"name": "fedora2.mguginolocal.com"},
                "status": {"conditions": [{"type": "Ready", "status": "False"}]}
            },
            {
                "apiVersion": "v1",
                "kind": "Node",
                "metadata": {"name": "fedora3.openshift.io"},
                "status": {"conditions": [{"type": "Ready", "status": "True"}]}
            }
        ]
    }"#;

    // "c3ViamVjdA==" is base64("subject")
    const CSRS_JSON: &str = r#"{
        "apiVersion": "v1",
        "kind": "List",
        "items": [
            {
                "apiVersion": "certificates.k8s.io/v1",
                "kind": "CertificateSigningRequest",
                "metadata": {"name": "node-csr-pending"},
                "spec": {
                    "request": "c3ViamVjdA==",
                    "signerName": "kubernetes.io/kube-apiserver-client-kubelet",
                    "usages": ["digital signature", "key encipherment", "client auth"]
                },
                "status": {}
            },
            {
                "apiVersion": "certificates.k8s.io/v1",
                "kind": "CertificateSigningRequest",
                "metadata": {"name": "node-csr-approved"},
                "spec": {
                    "request": "c3ViamVjdA==",
                    "signerName": "kubernetes.io/kube-apiserver-client-kubelet",
                    "usages": ["client auth"]
                },
                "status": {"conditions": [{"type": "Approved", "status": "True"}]}
            }
        ]
    }"#;

    fn ok(stdout: &str) -> OcOutput {
        OcOutput {
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn failed(stderr: &str) -> OcOutput {
        OcOutput {
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn args_are(expected: &'static [&'static str]) -> impl Fn(&[String]) -> bool {
        move |args: &[String]| {
            args.first().map(String::as_str) == Some("--config=/etc/origin/master/admin.kubeconfig")
                && args[1..].iter().map(String::as_str).eq(expected.iter().copied())
        }
    }

    fn gateway(runner: MockOcRunner) -> OcGateway {
        OcGateway::with_runner(Arc::new(runner), "oc", KUBECONFIG)
    }

    #[tokio::test]
    async fn lists_ready_nodes_from_json() {
        let mut runner = MockOcRunner::new();
        runner
            .expect_run()
            .withf(|program, args| program == "oc" && args_are(&["get", "nodes", "-ojson"])(args))
            .times(1)
            .returning(|_, _| Ok(ok(NODES_JSON)));

        let nodes = gateway(runner).list_nodes().await.unwrap();
        let ready: Vec<&str> = crate::gateway::ready_node_names(&nodes).collect();
        assert_eq!(ready, vec!["fedora1.openshift.io", "fedora3.openshift.io"]);
        assert_eq!(nodes.len(), 3);
    }

    #[tokio::test]
    async fn lists_csrs_with_decoded_request() {
        let mut runner = MockOcRunner::new();
        runner
            .expect_run()
            .with(
                mockall::predicate::eq("oc"),
                function(args_are(&["get", "csr", "-ojson"])),
            )
            .returning(|_, _| Ok(ok(CSRS_JSON)));

        let csrs = gateway(runner).list_csrs().await.unwrap();
        assert_eq!(csrs.len(), 2);
        assert_eq!(csrs[0].name, "node-csr-pending");
        assert!(!csrs[0].has_status_conditions);
        assert_eq!(csrs[0].request, b"subject");
        assert!(csrs[1].has_status_conditions);
    }

    #[tokio::test]
    async fn query_failure_is_an_error() {
        let mut runner = MockOcRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(failed("error: You must be logged in to the server")));

        let err = gateway(runner).list_nodes().await.unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert!(err.to_string().contains("logged in"));
    }

    #[tokio::test]
    async fn undecodable_output_is_a_serialization_error() {
        let mut runner = MockOcRunner::new();
        runner.expect_run().returning(|_, _| Ok(ok("not json")));

        let err = gateway(runner).list_csrs().await.unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[tokio::test]
    async fn healthz_probe_uses_exit_status() {
        let mut runner = MockOcRunner::new();
        runner
            .expect_run()
            .withf(|_, args| args_are(&["get", "--raw", "/api/v1/nodes/up/proxy/healthz"])(args))
            .returning(|_, _| Ok(ok("ok")));
        runner
            .expect_run()
            .withf(|_, args| args_are(&["get", "--raw", "/api/v1/nodes/down/proxy/healthz"])(args))
            .returning(|_, _| Ok(failed("Error from server (ServiceUnavailable)")));
        runner
            .expect_run()
            .withf(|_, args| args_are(&["get", "--raw", "/api/v1/nodes/broken/proxy/healthz"])(args))
            .returning(|_, _| Err(Error::command("failed to run oc: not found")));

        let gw = gateway(runner);
        assert!(gw.probe_node_health("up").await);
        assert!(!gw.probe_node_health("down").await);
        assert!(!gw.probe_node_health("broken").await);
    }

    #[tokio::test]
    async fn approve_reports_stdout_or_stderr() {
        let mut runner = MockOcRunner::new();
        runner
            .expect_run()
            .withf(|_, args| args_are(&["adm", "certificate", "approve", "csr-1"])(args))
            .returning(|_, _| {
                Ok(ok(
                    "certificatesigningrequest.certificates.k8s.io/csr-1 approved\n",
                ))
            });
        runner
            .expect_run()
            .withf(|_, args| args_are(&["adm", "certificate", "approve", "csr-2"])(args))
            .returning(|_, _| Ok(failed("Error from server (Forbidden)\n")));

        let gw = gateway(runner);
        assert_eq!(
            gw.approve("csr-1").await.unwrap(),
            "certificatesigningrequest.certificates.k8s.io/csr-1 approved"
        );
        assert_eq!(
            gw.approve("csr-2").await.unwrap_err(),
            ApprovalError::new("csr-2", "Error from server (Forbidden)")
        );
    }
}

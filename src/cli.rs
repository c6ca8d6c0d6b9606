//! Command line surface

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

use crate::approval::{ApprovalOutcome, CsrApprover};
use crate::bootstrap::{BootstrapFailure, BootstrapResult, Bootstrapper};
use crate::config::{self, ApproverConfig, Backend};
use crate::csr::X509SubjectDecoder;
use crate::gateway::{ClusterGateway, KubeGateway, OcGateway};
use crate::health::{HealthReport, PollTermination, PollerConfig};
use crate::{Result, DEFAULT_HEALTH_ATTEMPTS, DEFAULT_HEALTH_INTERVAL_SECS, DEFAULT_OC_BIN};

/// Bootstrap approver - approve kubelet CSRs for a known node roster
#[derive(Parser, Debug)]
#[command(name = "bootstrap-approver")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Approve client then server CSRs for the roster and wait for the nodes to serve
    Approve(ApproveArgs),
}

/// How the final report is printed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per outcome
    #[default]
    Text,
    /// A single JSON document
    Json,
}

/// Arguments for `approve`
#[derive(Args, Debug)]
pub struct ApproveArgs {
    /// Node to bootstrap (repeatable, or comma separated)
    #[arg(long = "node", env = "BOOTSTRAP_APPROVER_NODES", value_delimiter = ',')]
    pub nodes: Vec<String>,

    /// YAML or JSON file listing nodes, merged with --node
    #[arg(long, env = "BOOTSTRAP_APPROVER_NODES_FILE")]
    pub nodes_file: Option<PathBuf>,

    /// Kubeconfig to use (inferred from the environment when omitted)
    #[arg(long, env = "BOOTSTRAP_APPROVER_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// How to talk to the cluster
    #[arg(long, value_enum, env = "BOOTSTRAP_APPROVER_BACKEND", default_value_t = Backend::Kube)]
    pub backend: Backend,

    /// oc/kubectl binary for the oc backend
    #[arg(long, env = "BOOTSTRAP_APPROVER_OC_BIN", default_value = DEFAULT_OC_BIN)]
    pub oc_bin: String,

    /// Server health polling rounds
    #[arg(long, env = "BOOTSTRAP_APPROVER_MAX_ATTEMPTS", default_value_t = DEFAULT_HEALTH_ATTEMPTS)]
    pub max_attempts: u32,

    /// Seconds between server health polling rounds
    #[arg(
        long,
        env = "BOOTSTRAP_APPROVER_POLL_INTERVAL_SECS",
        default_value_t = DEFAULT_HEALTH_INTERVAL_SECS
    )]
    pub poll_interval_secs: u64,

    /// Whole-run attempts while some node has not submitted its CSR yet (0 = until
    /// every CSR shows up)
    #[arg(long, env = "BOOTSTRAP_APPROVER_RETRIES", default_value_t = 1)]
    pub retries: u32,

    /// Initial delay between whole-run attempts, in seconds
    #[arg(long, env = "BOOTSTRAP_APPROVER_RETRY_DELAY_SECS", default_value_t = 10)]
    pub retry_delay_secs: u64,

    /// Report format
    #[arg(long, value_enum, env = "BOOTSTRAP_APPROVER_OUTPUT", default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl ApproveArgs {
    /// Validate the arguments into a run configuration
    pub fn into_config(self) -> Result<ApproverConfig> {
        let from_file = match &self.nodes_file {
            Some(path) => config::load_roster_file(path)?,
            None => Vec::new(),
        };
        let nodes = config::merge_roster(self.nodes.into_iter().chain(from_file))?;

        Ok(ApproverConfig {
            nodes,
            backend: self.backend,
            kubeconfig: self.kubeconfig,
            oc_bin: self.oc_bin,
            poller: PollerConfig {
                max_attempts: self.max_attempts,
                interval: Duration::from_secs(self.poll_interval_secs),
            },
            retry: config::retry_config(
                self.retries,
                Duration::from_secs(self.retry_delay_secs),
            ),
        })
    }
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<ExitCode> {
        match self.command {
            Commands::Approve(args) => {
                let output = args.output;
                let config = args.into_config()?;
                approve(config, output).await
            }
        }
    }
}

/// Printed report: the run result plus the overall verdict
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    #[serde(flatten)]
    result: &'a BootstrapResult,
    failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    msg: Option<String>,
}

impl<'a> Report<'a> {
    /// Report for a run that completed all phases
    pub fn completed(result: &'a BootstrapResult) -> Self {
        Self {
            result,
            failed: result.failed(),
            msg: result.failure_message(),
        }
    }

    /// Report for a run that aborted; `result` holds what happened before
    pub fn aborted(result: &'a BootstrapResult, msg: String) -> Self {
        Self {
            result,
            failed: true,
            msg: Some(msg),
        }
    }

    /// Render in the requested format
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| crate::Error::serialization(e.to_string())),
            OutputFormat::Text => Ok(self.render_text()),
        }
    }

    fn render_text(&self) -> String {
        let client = self
            .result
            .client_approve_results
            .iter()
            .map(|o| outcome_line("client", o));
        let server = self
            .result
            .server_approve_results
            .iter()
            .map(|o| outcome_line("server", o));
        let mut lines: Vec<String> = client.chain(server).collect();

        if let Some(health) = &self.result.server_health {
            lines.push(health_line(health));
        }
        lines.push(format!("changed: {}", self.result.changed));
        lines.push(match &self.msg {
            Some(msg) => format!("failed: {msg}"),
            None => "ok".to_string(),
        });
        lines.join("\n")
    }
}

fn outcome_line(phase: &str, outcome: &ApprovalOutcome) -> String {
    match outcome {
        ApprovalOutcome::Approved { csr, node, message } => {
            format!("{phase} approved {csr} ({node}): {message}")
        }
        ApprovalOutcome::Failed { csr, node, error } => {
            format!("{phase} FAILED {csr} ({node}): {error}")
        }
    }
}

fn health_line(health: &HealthReport) -> String {
    match health.termination {
        PollTermination::AllReady => {
            format!("server health: all nodes ready after {} round(s)", health.rounds)
        }
        PollTermination::Stalled | PollTermination::Exhausted => {
            let nodes: Vec<&str> = health.still_unready.iter().map(String::as_str).collect();
            format!(
                "server health: not ready after {} round(s): {}",
                health.rounds,
                nodes.join(", ")
            )
        }
    }
}

/// Collaborators for the configured backend
async fn build_collaborators(
    config: &ApproverConfig,
) -> Result<(Arc<dyn ClusterGateway>, Arc<dyn CsrApprover>)> {
    match config.backend {
        Backend::Kube => {
            let gateway = Arc::new(KubeGateway::connect(config.kubeconfig.as_deref()).await?);
            let cluster: Arc<dyn ClusterGateway> = gateway.clone();
            let approver: Arc<dyn CsrApprover> = gateway;
            Ok((cluster, approver))
        }
        Backend::Oc => {
            let gateway = Arc::new(OcGateway::new(
                config.oc_bin.clone(),
                config.oc_kubeconfig(),
            ));
            let cluster: Arc<dyn ClusterGateway> = gateway.clone();
            let approver: Arc<dyn CsrApprover> = gateway;
            Ok((cluster, approver))
        }
    }
}

async fn approve(config: ApproverConfig, output: OutputFormat) -> Result<ExitCode> {
    info!(nodes = ?config.nodes, backend = ?config.backend, "starting bootstrap approval");

    let (gateway, approver) = build_collaborators(&config).await?;
    let bootstrapper = Bootstrapper::new(
        gateway,
        approver,
        Arc::new(X509SubjectDecoder),
        config.poller.clone(),
    );

    let outcome = bootstrapper
        .run_with_retry(&config.nodes, &config.retry)
        .await;

    match outcome {
        Ok(result) => {
            let report = Report::completed(&result);
            println!("{}", report.render(output)?);
            if report.failed {
                warn!("some nodes never became reachable");
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(BootstrapFailure { error, report }) => {
            let printed = Report::aborted(&report, error.to_string());
            println!("{}", printed.render(output)?);
            Err(error)
        }
    }
}

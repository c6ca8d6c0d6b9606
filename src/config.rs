//! Run configuration
//!
//! The node roster comes from repeated `--node` flags and/or a roster file. A
//! roster file is YAML or JSON, either a bare list or an object with `nodes`:
//!
//! ```yaml
//! nodes:
//!   - node1.example.com
//!   - node2.example.com
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::health::PollerConfig;
use crate::retry::RetryConfig;
use crate::{Error, Result, DEFAULT_OC_BIN, DEFAULT_OC_KUBECONFIG};

/// Which gateway talks to the cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// Kubernetes API via kube-rs
    #[default]
    Kube,
    /// `oc`/`kubectl` binary
    Oc,
}

/// Validated settings for one invocation
#[derive(Clone, Debug)]
pub struct ApproverConfig {
    /// Nodes whose CSRs may be approved, deduplicated, in first-seen order
    pub nodes: Vec<String>,
    /// Gateway backend
    pub backend: Backend,
    /// Kubeconfig path; `None` lets the kube backend infer one
    pub kubeconfig: Option<PathBuf>,
    /// Binary used by the `oc` backend
    pub oc_bin: String,
    /// Server health polling
    pub poller: PollerConfig,
    /// Whole-run retries while CSRs are missing
    pub retry: RetryConfig,
}

impl ApproverConfig {
    /// Kubeconfig handed to the `oc` backend
    pub fn oc_kubeconfig(&self) -> String {
        self.kubeconfig
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| DEFAULT_OC_KUBECONFIG.to_string())
    }
}

impl Default for ApproverConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            backend: Backend::default(),
            kubeconfig: None,
            oc_bin: DEFAULT_OC_BIN.to_string(),
            poller: PollerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Accepted roster file layouts
#[derive(Deserialize)]
#[serde(untagged)]
enum RosterFile {
    List(Vec<String>),
    Object { nodes: Vec<String> },
}

/// Parse roster file contents (YAML, which includes JSON)
pub fn parse_roster(content: &str) -> Result<Vec<String>> {
    let roster: RosterFile = serde_yaml::from_str(content)
        .map_err(|e| Error::config(format!("invalid roster file: {}", e)))?;
    Ok(match roster {
        RosterFile::List(nodes) | RosterFile::Object { nodes } => nodes,
    })
}

/// Read a roster file from disk
pub fn load_roster_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
    parse_roster(&content)
}

/// Merge roster sources: trim names, drop blanks and duplicates, reject an empty
/// result
pub fn merge_roster<I>(sources: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let nodes: Vec<String> = sources
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.clone()))
        .collect();

    if nodes.is_empty() {
        return Err(Error::config(
            "node roster is empty; pass --node or --nodes-file",
        ));
    }
    Ok(nodes)
}

/// Retry settings for `attempts` whole-run attempts starting at `delay`; zero
/// attempts retries until no CSR is missing
pub fn retry_config(attempts: u32, delay: Duration) -> RetryConfig {
    let base = if attempts == 0 {
        RetryConfig::infinite()
    } else {
        RetryConfig {
            max_attempts: attempts,
            ..Default::default()
        }
    };
    RetryConfig {
        initial_delay: delay,
        ..base
    }
}

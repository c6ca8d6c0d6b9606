//! Bootstrap approver - approves kubelet bootstrap CSRs for a known node roster
//!
//! Nodes joining a cluster generate a key pair and submit a CertificateSigningRequest.
//! Someone has to approve it before the node becomes a trusted member: first the
//! client certificate (the kubelet talking to the API server), then the server
//! certificate (the API server talking to the kubelet over mTLS).
//!
//! # Flow
//!
//! 1. Nodes that are not `Ready` need a client CSR; every one of them must have a
//!    pending CSR before anything is approved
//! 2. Matching client CSRs are approved
//! 3. Nodes whose `/healthz` is not reachable through the API proxy need a server
//!    CSR; same completeness rule
//! 4. Matching server CSRs are approved
//! 5. Every node's `/healthz` is polled until reachable or the attempt budget runs out
//!
//! Only CSRs whose subject Common Name resolves to a node in the roster are ever
//! approved.
//!
//! # Modules
//!
//! - [`gateway`] - Cluster queries and CSR approval (kube API or `oc` binary)
//! - [`csr`] - Subject decoding and CSR-to-node matching
//! - [`verify`] - Completeness check before approval
//! - [`approval`] - Sequential approval with partial-failure reporting
//! - [`health`] - Server health poller
//! - [`bootstrap`] - Orchestrates the phases
//! - [`retry`] - Re-runs the whole workflow while CSRs are still missing
//! - [`config`] - Validated run configuration
//! - [`cli`] - Command line surface
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod approval;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod csr;
pub mod error;
pub mod gateway;
pub mod health;
pub mod retry;
pub mod verify;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Prefix the kubelet puts in front of its node name in CSR subjects
pub const NODE_IDENTITY_PREFIX: &str = "system:node:";

/// Default number of server health polling rounds
pub const DEFAULT_HEALTH_ATTEMPTS: u32 = 10;

/// Default pause between server health polling rounds, in seconds
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 5;

/// Default `oc` binary used by the command backend
pub const DEFAULT_OC_BIN: &str = "oc";

/// Default admin kubeconfig used by the command backend
pub const DEFAULT_OC_KUBECONFIG: &str = "/etc/origin/master/admin.kubeconfig";

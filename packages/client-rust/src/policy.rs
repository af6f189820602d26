//! Client and per-command configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Replica selection policy for routing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Replica {
    /// Always the master replica.
    Master,
    /// Round-robin across master and proles on every attempt.
    MasterProles,
    /// Master first, then successive replicas on retry.
    Sequence,
    /// Random starting replica, then sequence.
    Random,
}

/// How the client authenticates to the cluster.
///
/// Only the placement is defined here; the handshake itself is layered on
/// connection creation by security collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMode {
    None,
    Internal,
    External,
    Pki,
}

/// TLS certificate configuration.
///
/// No `Default` impl because certificate paths have no sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Path to the client certificate file.
    pub cert_path: PathBuf,
    /// Path to the client private key file.
    pub key_path: PathBuf,
    /// Optional path to a CA certificate for server verification.
    pub ca_cert_path: Option<PathBuf>,
}

/// Cluster-wide client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPolicy {
    /// Connection floor the tender tops up per node.
    pub min_conns_per_node: usize,
    /// Hard cap on open connections per node.
    pub max_conns_per_node: usize,
    /// TCP dial deadline.
    pub conn_timeout: Duration,
    /// Errors tolerated per node per window before refusing new connections.
    /// Zero disables the limit.
    pub max_error_rate: usize,
    /// Window length in tend iterations for `max_error_rate`.
    pub error_rate_window: u64,
    /// Idle age beyond which pooled connections above the floor are trimmed.
    pub max_socket_idle_trim: Duration,
    /// Interval between cluster tend iterations.
    pub tend_interval: Duration,
    /// Expected cluster name; when set, nodes advertising a different name
    /// are rejected.
    pub cluster_name: Option<String>,
    /// Fail `Client::new` when no seed yields a node on the first tend.
    pub fail_if_not_connected: bool,
    /// Prefer the alternate address list announced by peers.
    pub use_services_alternate: bool,
    /// TLS configuration; `None` disables TLS.
    pub tls: Option<TlsConfig>,
    /// Authentication placement.
    pub auth_mode: AuthMode,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            min_conns_per_node: 10,
            max_conns_per_node: 100,
            conn_timeout: Duration::from_secs(3),
            max_error_rate: 100,
            error_rate_window: 1,
            max_socket_idle_trim: Duration::from_secs(55),
            tend_interval: Duration::from_secs(1),
            cluster_name: None,
            fail_if_not_connected: true,
            use_services_alternate: false,
            tls: None,
            auth_mode: AuthMode::None,
            user: None,
            password: None,
        }
    }
}

impl ClientPolicy {
    /// Info command that yields the full peers listing for this
    /// configuration (TLS × alternate access).
    #[must_use]
    pub fn peers_command(&self) -> &'static str {
        match (self.tls.is_some(), self.use_services_alternate) {
            (false, false) => "peers-clear-std",
            (false, true) => "peers-clear-alt",
            (true, false) => "peers-tls-std",
            (true, true) => "peers-tls-alt",
        }
    }
}

/// Per-command execution budget and routing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPolicy {
    /// Per-socket-operation deadline. Also transmitted to the server so it
    /// can abort early. Zero disables the per-op deadline.
    pub socket_timeout: Duration,
    /// Absolute wall-clock budget across all attempts. Zero means unbounded.
    pub total_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Pause between attempts. Zero retries immediately.
    pub sleep_between_retries: Duration,
    /// Replica selection for reads.
    pub replica: Replica,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            socket_timeout: Duration::from_secs(30),
            total_timeout: Duration::from_secs(1),
            max_retries: 2,
            sleep_between_retries: Duration::from_millis(500),
            replica: Replica::Sequence,
        }
    }
}

//! Client error taxonomy and retry classification.
//!
//! The command engine drives its retry loop off three predicates defined
//! here: [`ClientError::is_retryable`], [`ClientError::keep_connection`],
//! and [`ClientError::is_client_timeout`]. Terminal failures are annotated
//! with a [`CommandContext`] naming the last node, the attempt count, and
//! the in-doubt flag.

use std::fmt;
use std::io;
use std::time::Duration;

use stratus_core::{result_code, ParseError};

/// Convenience alias used throughout the client.
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Everything that can go wrong between a command and the cluster.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// TCP dial (or its deadline) failed.
    #[error("connection to {addr} failed: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// A socket read missed its deadline.
    #[error("socket read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// A socket write missed its deadline.
    #[error("socket write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Socket-level I/O failure.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// The server answered with a non-zero result code.
    #[error("server error: {} ({code})", result_code::name(*.code))]
    Server { code: i32 },

    /// Routing exhausted every replica for the partition.
    #[error(
        "no available node for namespace {namespace} partition {partition_id} \
         (cluster size {cluster_size})"
    )]
    NoAvailableNode {
        cluster_size: usize,
        namespace: String,
        partition_id: usize,
    },

    /// The namespace is absent from the partition map.
    #[error("namespace {namespace} not found in partition map ({map_size} namespaces known)")]
    InvalidNamespace { namespace: String, map_size: usize },

    /// The node exceeded the configured error rate; connections are refused
    /// until the window resets.
    #[error("node {node} exceeded max error rate")]
    MaxErrorRate { node: String },

    /// The per-node connection cap was reached.
    #[error("no more available connections for node {node}")]
    NoMoreConnections { node: String },

    /// An info or record response could not be decoded.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The cluster has been shut down.
    #[error("cluster has been closed")]
    ClusterClosed,

    /// No seed produced a usable node during startup.
    #[error("cluster seed(s) failed")]
    ClusterSeedFailed,

    /// The server does not advertise a capability this client requires.
    #[error("node {node} does not advertise required feature {feature:?}")]
    UnsupportedServerVersion { node: String, feature: &'static str },

    /// The server is not yet fully initialized (partition-generation = -1).
    #[error("node {node} is not yet fully initialized")]
    UnsupportedServerState { node: String },

    /// The server's advertised cluster name does not match the configured one.
    #[error("node {node} expected cluster name {expected:?}, received {actual:?}")]
    ClusterNameMismatch {
        node: String,
        expected: String,
        actual: String,
    },

    /// A node handshake or identity check failed.
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// The retry budget or total deadline was exhausted.
    #[error(
        "timeout after {iterations} attempts (client={client}, \
         socket_timeout={socket_timeout:?}, total_timeout={total_timeout:?})"
    )]
    Timeout {
        socket_timeout: Duration,
        total_timeout: Duration,
        iterations: usize,
        client: bool,
    },

    /// Terminal command failure, annotated with execution context.
    #[error("{source} ({context})")]
    Command {
        context: CommandContext,
        source: Box<ClientError>,
    },
}

/// Execution context attached to a terminal command failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    /// Name of the last node the command was dispatched to, if any.
    pub node: Option<String>,
    /// Number of attempts made, including the first.
    pub iterations: usize,
    /// True when a write may have been applied by the server even though no
    /// success response was seen. Callers use this for idempotency reasoning.
    pub in_doubt: bool,
}

impl fmt::Display for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node={}, iterations={}, in_doubt={}",
            self.node.as_deref().unwrap_or("<none>"),
            self.iterations,
            self.in_doubt
        )
    }
}

impl ClientError {
    /// The server result code carried by this error, if any.
    #[must_use]
    pub fn result_code(&self) -> Option<i32> {
        match self {
            Self::Server { code } => Some(*code),
            Self::Command { source, .. } => source.result_code(),
            _ => None,
        }
    }

    /// Whether the connection that produced this error may return to the pool.
    ///
    /// Server result codes follow [`result_code::keep_connection`]; every
    /// client-side failure closes the connection because the wire state is
    /// unknown.
    #[must_use]
    pub fn keep_connection(&self) -> bool {
        match self {
            Self::Server { code } => result_code::keep_connection(*code),
            _ => false,
        }
    }

    /// Whether the command engine may try again on another iteration.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. }
            | Self::ReadTimeout(_)
            | Self::WriteTimeout(_)
            | Self::Io(_)
            | Self::NoAvailableNode { .. }
            | Self::NoMoreConnections { .. }
            | Self::InvalidNode(_) => true,
            Self::Server { code } => {
                matches!(*code, result_code::TIMEOUT | result_code::DEVICE_OVERLOAD)
            }
            _ => false,
        }
    }

    /// Whether this error is a client-side timeout (socket deadline missed
    /// before a server response was parsed).
    #[must_use]
    pub fn is_client_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout(_) | Self::WriteTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_timeout_is_retryable_and_keeps_connection() {
        let err = ClientError::Server {
            code: result_code::TIMEOUT,
        };
        assert!(err.is_retryable());
        assert!(err.keep_connection());
        assert!(!err.is_client_timeout());
    }

    #[test]
    fn filtered_out_is_terminal_but_keeps_connection() {
        let err = ClientError::Server {
            code: result_code::FILTERED_OUT,
        };
        assert!(!err.is_retryable());
        assert!(err.keep_connection());
    }

    #[test]
    fn read_timeout_is_client_timeout_and_closes() {
        let err = ClientError::ReadTimeout(Duration::from_millis(50));
        assert!(err.is_retryable());
        assert!(err.is_client_timeout());
        assert!(!err.keep_connection());
    }

    #[test]
    fn parse_errors_are_terminal() {
        let err = ClientError::Parse(ParseError::new("bad", b"x"));
        assert!(!err.is_retryable());
        assert!(!err.keep_connection());
    }

    #[test]
    fn command_context_display() {
        let ctx = CommandContext {
            node: Some("BB9".to_string()),
            iterations: 3,
            in_doubt: true,
        };
        assert_eq!(ctx.to_string(), "node=BB9, iterations=3, in_doubt=true");
    }

    #[test]
    fn command_wrapper_exposes_result_code() {
        let err = ClientError::Command {
            context: CommandContext {
                node: None,
                iterations: 1,
                in_doubt: false,
            },
            source: Box::new(ClientError::Server {
                code: result_code::KEY_NOT_FOUND,
            }),
        };
        assert_eq!(err.result_code(), Some(result_code::KEY_NOT_FOUND));
    }
}

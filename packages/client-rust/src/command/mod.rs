//! Command execution engine.
//!
//! A command is a capability set — node selection, request encoding,
//! response parsing, retry preparation — and the engine is the retry loop
//! around it: select a node, check out a connection, write the frame, parse
//! the result, classify the outcome, and either return, retry against the
//! next replica, or fail with annotated context.

pub mod partition;

mod delete;
mod exists;
mod read;
mod write;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use stratus_core::{result_code, wire, MessageHeader, ParseError, ProtoHeader};

pub use delete::DeleteCommand;
pub use exists::ExistsCommand;
pub use partition::Partition;
pub use read::{ReadCommand, Record};
pub use write::{Bin, WriteCommand};

use crate::cluster::{Cluster, Node};
use crate::errors::{ClientError, CommandContext, Result};
use crate::net::Connection;
use crate::policy::CommandPolicy;

/// The capability set the engine drives.
///
/// Concrete commands are plain values implementing this trait; there is no
/// shared base. Collaborator crates layer further operations on the same
/// hooks without touching the engine.
#[async_trait]
pub trait Command: Send {
    /// Whether the command mutates the record. Drives the in-doubt flag.
    fn is_write(&self) -> bool {
        false
    }

    /// Selects the node for this attempt against the current snapshot.
    ///
    /// # Errors
    ///
    /// Routing errors; retryable ones re-enter the loop.
    fn get_node(&mut self, cluster: &Cluster) -> Result<Arc<Node>>;

    /// Advances routing state before the next attempt.
    fn prepare_retry(&mut self, was_timeout: bool);

    /// Encodes the full wire frame. `server_timeout_ms` is written into the
    /// record header so the server can abort on its own.
    ///
    /// # Errors
    ///
    /// Encoding failures are terminal.
    fn encode(&mut self, server_timeout_ms: u32) -> Result<Bytes>;

    /// Reads and parses the response from `conn`.
    ///
    /// # Errors
    ///
    /// Server result codes surface as [`ClientError::Server`]; transport
    /// and decode failures as their respective kinds.
    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()>;
}

/// Reads one record message: proto header, then the full body.
///
/// Returns the decoded record header and the bytes that follow it (fields
/// and operations).
///
/// # Errors
///
/// Transport errors propagate; malformed headers fail with a parse error.
pub(crate) async fn read_message(conn: &mut Connection) -> Result<(MessageHeader, Vec<u8>)> {
    let mut raw = [0u8; 8];
    conn.read_exact(&mut raw).await?;
    let proto = ProtoHeader::parse(raw)?;
    if proto.size < wire::MSG_REMAINING_HEADER_SIZE {
        return Err(ParseError::new(
            format!("record message body is only {} bytes", proto.size),
            &raw,
        )
        .into());
    }
    let mut body = vec![0u8; proto.size];
    conn.read_exact(&mut body).await?;
    let header = MessageHeader::parse(&body)?;
    Ok((header, body.split_off(wire::MSG_REMAINING_HEADER_SIZE)))
}

/// Outcome of one attempt, made explicit so retry decisions are data, not
/// control flow smuggled through error types.
enum Attempt {
    Success,
    Retry {
        err: ClientError,
        client_timeout: bool,
    },
    Fatal(ClientError),
}

/// Runs `cmd` to completion under `policy`.
///
/// Deadlines: `total_timeout` is an absolute wall budget; `socket_timeout`
/// is clamped to it and re-shrunk between attempts as the budget drains.
///
/// # Errors
///
/// The last error, annotated with `{node, iterations, in_doubt}`; tagged as
/// a client timeout when the final attempt died on a socket deadline.
pub async fn execute<C>(cluster: &Cluster, policy: &CommandPolicy, cmd: &mut C) -> Result<()>
where
    C: Command + ?Sized,
{
    let mut total_timeout = policy.total_timeout;
    let mut socket_timeout = policy.socket_timeout;
    if !total_timeout.is_zero() && (socket_timeout.is_zero() || socket_timeout > total_timeout) {
        socket_timeout = total_timeout;
    }
    let deadline = (!total_timeout.is_zero()).then(|| Instant::now() + total_timeout);

    let mut iterations = 0usize;
    let mut sent_count = 0usize;
    let mut last_node: Option<String> = None;
    let mut last_error: Option<ClientError> = None;
    let mut client_timeout = false;

    loop {
        iterations += 1;
        match run_attempt(cluster, cmd, socket_timeout, &mut sent_count, &mut last_node).await {
            Attempt::Success => return Ok(()),
            Attempt::Fatal(err) => {
                // Shutdown is a lifecycle state, not a command failure.
                if matches!(err, ClientError::ClusterClosed) {
                    return Err(err);
                }
                return Err(annotate(err, &last_node, iterations, in_doubt(sent_count, cmd)));
            }
            Attempt::Retry {
                err,
                client_timeout: was_client_timeout,
            } => {
                client_timeout = was_client_timeout;
                last_error = Some(err);
            }
        }

        if iterations > policy.max_retries {
            break;
        }
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            total_timeout = remaining;
            if socket_timeout > total_timeout {
                socket_timeout = total_timeout;
            }
        }
        cmd.prepare_retry(client_timeout);
        if !policy.sleep_between_retries.is_zero() {
            tokio::time::sleep(policy.sleep_between_retries).await;
        }
    }

    let err = if client_timeout {
        ClientError::Timeout {
            socket_timeout: policy.socket_timeout,
            total_timeout: policy.total_timeout,
            iterations,
            client: true,
        }
    } else {
        last_error.unwrap_or(ClientError::Timeout {
            socket_timeout: policy.socket_timeout,
            total_timeout: policy.total_timeout,
            iterations,
            client: false,
        })
    };
    Err(annotate(err, &last_node, iterations, in_doubt(sent_count, cmd)))
}

fn in_doubt<C: Command + ?Sized>(sent_count: usize, cmd: &C) -> bool {
    sent_count > 0 && cmd.is_write()
}

fn annotate(
    err: ClientError,
    node: &Option<String>,
    iterations: usize,
    in_doubt: bool,
) -> ClientError {
    ClientError::Command {
        context: CommandContext {
            node: node.clone(),
            iterations,
            in_doubt,
        },
        source: Box::new(err),
    }
}

async fn run_attempt<C>(
    cluster: &Cluster,
    cmd: &mut C,
    socket_timeout: Duration,
    sent_count: &mut usize,
    last_node: &mut Option<String>,
) -> Attempt
where
    C: Command + ?Sized,
{
    let node = match cmd.get_node(cluster) {
        Ok(node) => node,
        Err(err) => {
            if cluster.is_closed() {
                return Attempt::Fatal(ClientError::ClusterClosed);
            }
            return if err.is_retryable() {
                Attempt::Retry {
                    err,
                    client_timeout: false,
                }
            } else {
                Attempt::Fatal(err)
            };
        }
    };
    *last_node = Some(node.name().to_string());

    if !node.error_count_within_limit() {
        return Attempt::Fatal(ClientError::MaxErrorRate {
            node: node.name().to_string(),
        });
    }

    let mut conn = match node.get_connection(socket_timeout).await {
        Ok(conn) => conn,
        Err(err) => {
            return if err.is_retryable() {
                Attempt::Retry {
                    err,
                    client_timeout: false,
                }
            } else {
                Attempt::Fatal(err)
            }
        }
    };

    let server_timeout_ms = u32::try_from(socket_timeout.as_millis()).unwrap_or(u32::MAX);
    let frame = match cmd.encode(server_timeout_ms) {
        Ok(frame) => frame,
        Err(err) => {
            // Nothing was written; the connection is still clean.
            node.put_connection(conn).await;
            return Attempt::Fatal(err);
        }
    };

    if let Err(err) = conn.write_all(&frame).await {
        // Bytes may already be on the wire.
        *sent_count += 1;
        node.close_connection_on_error(conn).await;
        let client_timeout = err.is_client_timeout();
        return Attempt::Retry {
            err,
            client_timeout,
        };
    }
    *sent_count += 1;

    match cmd.parse_result(&mut conn).await {
        Ok(()) => {
            node.put_connection(conn).await;
            Attempt::Success
        }
        Err(err) => {
            if err.keep_connection() {
                node.put_connection(conn).await;
            } else {
                node.close_connection_on_error(conn).await;
            }
            match err.result_code() {
                Some(result_code::TIMEOUT) => {
                    node.incr_error_count();
                    Attempt::Retry {
                        err,
                        client_timeout: false,
                    }
                }
                Some(result_code::DEVICE_OVERLOAD) => Attempt::Retry {
                    err,
                    client_timeout: false,
                },
                Some(_) => Attempt::Fatal(err),
                None => {
                    if err.is_retryable() {
                        let client_timeout = err.is_client_timeout();
                        Attempt::Retry {
                            err,
                            client_timeout,
                        }
                    } else {
                        Attempt::Fatal(err)
                    }
                }
            }
        }
    }
}

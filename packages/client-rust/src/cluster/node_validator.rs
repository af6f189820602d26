//! Candidate-endpoint handshake.
//!
//! Before a host becomes a node, one info round-trip must prove it: the
//! server has a name, has finished initializing its partition table, speaks
//! partition scans, and (when configured) belongs to the expected cluster.

use std::collections::HashSet;

use crate::errors::{ClientError, Result};
use crate::info;
use crate::net::{Connection, Host};
use crate::policy::ClientPolicy;

/// Partition scans; servers without it are too old for this client.
pub const FEATURE_PARTITION_SCANS: &str = "pscans";
/// Partition queries; optional, aggregated cluster-wide.
pub const FEATURE_PARTITION_QUERY: &str = "pquery";

/// A validated candidate endpoint: identity, capabilities, and the live
/// connection the handshake ran on (reused as the node's tend connection).
#[derive(Debug)]
pub struct NodeValidator {
    pub name: String,
    pub host: Host,
    pub features: HashSet<String>,
    pub conn: Connection,
}

impl NodeValidator {
    /// Dials `host` and runs the validation handshake.
    ///
    /// # Errors
    ///
    /// Any failure closes the connection that was opened:
    /// - missing/empty `node` name → [`ClientError::InvalidNode`]
    /// - `partition-generation` of -1 → [`ClientError::UnsupportedServerState`]
    /// - missing `pscans` capability → [`ClientError::UnsupportedServerVersion`]
    /// - cluster name mismatch → [`ClientError::ClusterNameMismatch`]
    pub async fn validate(policy: &ClientPolicy, host: &Host) -> Result<Self> {
        let mut conn = Connection::connect(host, policy.conn_timeout).await?;
        conn.set_timeout(policy.conn_timeout);
        match Self::handshake(policy, &mut conn).await {
            Ok((name, features)) => Ok(Self {
                name,
                host: host.clone(),
                features,
                conn,
            }),
            Err(err) => {
                conn.close().await;
                Err(err)
            }
        }
    }

    async fn handshake(
        policy: &ClientPolicy,
        conn: &mut Connection,
    ) -> Result<(String, HashSet<String>)> {
        let expected_cluster_name = policy
            .cluster_name
            .as_deref()
            .filter(|name| !name.is_empty());

        let mut commands = vec!["node", "partition-generation", "features"];
        if expected_cluster_name.is_some() {
            commands.push("cluster-name");
        }
        let map = info::request(conn, &commands).await?;

        let name = map
            .get("node")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ClientError::InvalidNode("node name missing from handshake".into()))?
            .clone();

        let generation: i64 = map
            .get("partition-generation")
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| {
                ClientError::InvalidNode(format!(
                    "node {name} returned invalid partition-generation"
                ))
            })?;
        if generation == -1 {
            return Err(ClientError::UnsupportedServerState { node: name });
        }

        let features: HashSet<String> = map
            .get("features")
            .map(|raw| raw.split(';').map(ToString::to_string).collect())
            .ok_or_else(|| {
                ClientError::InvalidNode(format!("node {name} returned no features"))
            })?;
        if !features.contains(FEATURE_PARTITION_SCANS) {
            return Err(ClientError::UnsupportedServerVersion {
                node: name,
                feature: FEATURE_PARTITION_SCANS,
            });
        }

        if let Some(expected) = expected_cluster_name {
            let actual = map.get("cluster-name").cloned().unwrap_or_default();
            if actual != expected {
                return Err(ClientError::ClusterNameMismatch {
                    node: name,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok((name, features))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use stratus_core::info as codec;

    use super::*;

    /// Spawns a one-shot info server answering from a fixed command map.
    async fn spawn_server(responses: HashMap<&'static str, &'static str>) -> Host {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 8];
            sock.read_exact(&mut header).await.unwrap();
            let len = codec::decode_header(header).unwrap();
            let mut body = vec![0u8; len];
            sock.read_exact(&mut body).await.unwrap();

            let mut response = Vec::new();
            for command in String::from_utf8_lossy(&body).split('\n') {
                if command.is_empty() {
                    continue;
                }
                if let Some(value) = responses.get(command) {
                    response.extend_from_slice(command.as_bytes());
                    response.push(b'\t');
                    response.extend_from_slice(value.as_bytes());
                    response.push(b'\n');
                }
            }
            let mut frame = Vec::with_capacity(8 + response.len());
            frame.push(codec::INFO_PROTOCOL_VERSION);
            frame.push(codec::INFO_MSG_TYPE);
            frame.extend_from_slice(&(response.len() as u64).to_be_bytes()[2..8]);
            frame.extend_from_slice(&response);
            sock.write_all(&frame).await.unwrap();
        });
        Host::new("127.0.0.1", port)
    }

    fn healthy_responses() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("node", "BB9020011AC4202"),
            ("partition-generation", "7"),
            ("features", "pscans;pquery;truncate-namespace"),
            ("cluster-name", "prod"),
        ])
    }

    #[tokio::test]
    async fn accepts_healthy_node() {
        let host = spawn_server(healthy_responses()).await;
        let nv = NodeValidator::validate(&ClientPolicy::default(), &host)
            .await
            .unwrap();
        assert_eq!(nv.name, "BB9020011AC4202");
        assert!(nv.features.contains(FEATURE_PARTITION_SCANS));
        assert!(nv.features.contains(FEATURE_PARTITION_QUERY));
        assert!(!nv.conn.is_closed());
    }

    #[tokio::test]
    async fn rejects_uninitialized_server() {
        let mut responses = healthy_responses();
        responses.insert("partition-generation", "-1");
        let host = spawn_server(responses).await;

        let err = NodeValidator::validate(&ClientPolicy::default(), &host)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedServerState { .. }));
    }

    #[tokio::test]
    async fn rejects_server_without_partition_scans() {
        let mut responses = healthy_responses();
        responses.insert("features", "batch-index;pipelining");
        let host = spawn_server(responses).await;

        let err = NodeValidator::validate(&ClientPolicy::default(), &host)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnsupportedServerVersion {
                feature: FEATURE_PARTITION_SCANS,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rejects_missing_node_name() {
        let mut responses = healthy_responses();
        responses.remove("node");
        let host = spawn_server(responses).await;

        let err = NodeValidator::validate(&ClientPolicy::default(), &host)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidNode(_)));
    }

    #[tokio::test]
    async fn enforces_cluster_name_when_configured() {
        let host = spawn_server(healthy_responses()).await;
        let policy = ClientPolicy {
            cluster_name: Some("staging".to_string()),
            ..ClientPolicy::default()
        };

        let err = NodeValidator::validate(&policy, &host).await.unwrap_err();
        match err {
            ClientError::ClusterNameMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, "staging");
                assert_eq!(actual, "prod");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn matching_cluster_name_passes() {
        let host = spawn_server(healthy_responses()).await;
        let policy = ClientPolicy {
            cluster_name: Some("prod".to_string()),
            ..ClientPolicy::default()
        };
        assert!(NodeValidator::validate(&policy, &host).await.is_ok());
    }

    #[tokio::test]
    async fn dial_failure_surfaces_connection_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = Host::new("127.0.0.1", listener.local_addr().unwrap().port());
        drop(listener);

        let err = NodeValidator::validate(&ClientPolicy::default(), &host)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionFailed { .. }));
    }
}

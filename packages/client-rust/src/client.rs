//! User-facing client facade.
//!
//! Thin wrapper over the cluster and the command engine: record operations
//! construct a command value and hand it to `command::execute`.

use std::collections::HashMap;
use std::sync::Arc;

use stratus_core::Key;

use crate::cluster::Cluster;
use crate::command::{self, Bin, DeleteCommand, ExistsCommand, ReadCommand, Record, WriteCommand};
use crate::errors::{ClientError, Result};
use crate::net::Host;
use crate::policy::{ClientPolicy, CommandPolicy};

/// Asynchronous database client.
///
/// Cheap to share: clones hold the same cluster.
#[derive(Debug, Clone)]
pub struct Client {
    cluster: Arc<Cluster>,
}

impl Client {
    /// Connects to the cluster seeded from `hosts`.
    ///
    /// # Errors
    ///
    /// [`ClientError::ClusterSeedFailed`] when no seed yields a node and the
    /// policy demands a connected start.
    pub async fn new(policy: ClientPolicy, hosts: &[Host]) -> Result<Self> {
        let cluster = Cluster::new(policy, hosts).await?;
        Ok(Self { cluster })
    }

    /// The underlying cluster, for layered operation builders.
    #[must_use]
    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Writes `bins` to the record at `key`.
    ///
    /// # Errors
    ///
    /// The annotated command failure; check `in_doubt` before assuming the
    /// write did not land.
    pub async fn put(&self, policy: &CommandPolicy, key: Key, bins: Vec<Bin>) -> Result<()> {
        let mut cmd = WriteCommand::new(policy, key, bins);
        command::execute(&self.cluster, policy, &mut cmd).await
    }

    /// Reads the record at `key`; an empty `bin_names` slice reads all bins.
    ///
    /// # Errors
    ///
    /// `Server { code: KEY_NOT_FOUND }` (annotated) when the record does not
    /// exist.
    pub async fn get(&self, policy: &CommandPolicy, key: Key, bin_names: &[&str]) -> Result<Record> {
        let mut cmd = ReadCommand::new(policy, key, bin_names);
        command::execute(&self.cluster, policy, &mut cmd).await?;
        cmd.into_record().ok_or_else(|| {
            ClientError::InvalidNode("read completed without a record".to_string())
        })
    }

    /// Deletes the record at `key`, returning whether it existed.
    ///
    /// # Errors
    ///
    /// The annotated command failure.
    pub async fn delete(&self, policy: &CommandPolicy, key: Key) -> Result<bool> {
        let mut cmd = DeleteCommand::new(policy, key);
        command::execute(&self.cluster, policy, &mut cmd).await?;
        Ok(cmd.existed())
    }

    /// Checks whether the record at `key` exists (metadata-only read).
    ///
    /// # Errors
    ///
    /// The annotated command failure.
    pub async fn exists(&self, policy: &CommandPolicy, key: Key) -> Result<bool> {
        let mut cmd = ExistsCommand::new(policy, key);
        command::execute(&self.cluster, policy, &mut cmd).await?;
        Ok(cmd.exists())
    }

    /// Raw info passthrough to the first active node.
    ///
    /// # Errors
    ///
    /// [`ClientError::ClusterClosed`] when no active node remains, plus any
    /// info round-trip failure.
    pub async fn info(&self, commands: &[&str]) -> Result<HashMap<String, String>> {
        let nodes = self.cluster.nodes();
        let node = nodes
            .iter()
            .find(|node| node.active())
            .ok_or(ClientError::ClusterClosed)?;
        node.info(commands).await
    }

    /// Whether the cluster currently has any active nodes.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.cluster.is_connected()
    }

    /// Shuts the cluster down; in-flight commands fail with `ClusterClosed`.
    pub async fn close(&self) {
        self.cluster.close().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stratus_core::Value;

    use super::*;
    use crate::cluster::mock::{spawn, MockConfig};

    async fn connected_client() -> Client {
        let server = spawn(MockConfig {
            answer_records: true,
            ..MockConfig::default()
        })
        .await;
        let policy = ClientPolicy {
            min_conns_per_node: 1,
            tend_interval: Duration::from_millis(50),
            ..ClientPolicy::default()
        };
        Client::new(policy, &[server.host.clone()]).await.unwrap()
    }

    fn key(user_key: &str) -> Key {
        Key::new("test", "demo", user_key)
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let client = connected_client().await;
        let policy = CommandPolicy::default();

        client
            .put(&policy, key("user-1"), vec![Bin::new("n", 7i64)])
            .await
            .unwrap();
        let record = client.get(&policy, key("user-1"), &[]).await.unwrap();
        assert_eq!(record.bin("n"), Some(&Value::Int(7)));
        client.close().await;
    }

    #[tokio::test]
    async fn exists_and_delete() {
        let client = connected_client().await;
        let policy = CommandPolicy::default();

        assert!(client.exists(&policy, key("user-2")).await.unwrap());
        assert!(client.delete(&policy, key("user-2")).await.unwrap());
        client.close().await;
    }

    #[tokio::test]
    async fn info_passthrough() {
        let client = connected_client().await;
        let map = client.info(&["node"]).await.unwrap();
        assert_eq!(map["node"], "MOCK-A");
        client.close().await;
    }

    #[tokio::test]
    async fn unknown_namespace_error_carries_code_path() {
        let client = connected_client().await;
        let policy = CommandPolicy {
            max_retries: 0,
            sleep_between_retries: Duration::ZERO,
            ..CommandPolicy::default()
        };
        let err = client
            .put(
                &policy,
                Key::new("missing", "demo", "k"),
                vec![Bin::new("n", 1i64)],
            )
            .await
            .unwrap_err();
        match err {
            ClientError::Command { source, .. } => {
                assert!(matches!(*source, ClientError::InvalidNamespace { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        client.close().await;
    }

    #[tokio::test]
    async fn commands_fail_after_close() {
        let client = connected_client().await;
        client.close().await;
        assert!(!client.is_connected());

        let policy = CommandPolicy {
            max_retries: 0,
            ..CommandPolicy::default()
        };
        let err = client
            .put(&policy, key("user-3"), vec![Bin::new("n", 1i64)])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ClusterClosed));
        assert_eq!(err.result_code(), None);
    }
}

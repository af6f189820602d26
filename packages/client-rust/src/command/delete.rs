//! Record delete command.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use stratus_core::{result_code, wire, Key, MessageWriter};

use crate::cluster::{Cluster, Node};
use crate::command::partition::Partition;
use crate::command::{read_message, Command};
use crate::errors::{ClientError, Result};
use crate::net::Connection;
use crate::policy::CommandPolicy;

/// Deletes a record, reporting whether it existed.
#[derive(Debug)]
pub struct DeleteCommand {
    key: Key,
    partition: Partition,
    existed: bool,
}

impl DeleteCommand {
    #[must_use]
    pub fn new(policy: &CommandPolicy, key: Key) -> Self {
        let partition = Partition::new(&key, policy.replica);
        Self {
            key,
            partition,
            existed: false,
        }
    }

    /// Whether the record existed before the delete.
    #[must_use]
    pub fn existed(&self) -> bool {
        self.existed
    }
}

#[async_trait]
impl Command for DeleteCommand {
    fn is_write(&self) -> bool {
        true
    }

    fn get_node(&mut self, cluster: &Cluster) -> Result<Arc<Node>> {
        self.partition.get_node_write(cluster)
    }

    fn prepare_retry(&mut self, _was_timeout: bool) {
        self.partition.prepare_retry();
    }

    fn encode(&mut self, server_timeout_ms: u32) -> Result<Bytes> {
        let mut writer = MessageWriter::new();
        writer.write_header(
            0,
            wire::INFO2_WRITE | wire::INFO2_DELETE,
            0,
            0,
            0,
            server_timeout_ms,
            wire::key_field_count(&self.key),
            0,
        );
        writer.write_key(&self.key);
        Ok(writer.finish())
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()> {
        let (header, _body) = read_message(conn).await?;
        match i32::from(header.result_code) {
            result_code::OK => {
                self.existed = true;
                Ok(())
            }
            result_code::KEY_NOT_FOUND => {
                self.existed = false;
                Ok(())
            }
            code => Err(ClientError::Server { code }),
        }
    }
}

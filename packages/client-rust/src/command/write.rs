//! Record write command.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use stratus_core::{result_code, wire, Key, MessageWriter, OperationType, Value};

use crate::cluster::{Cluster, Node};
use crate::command::partition::Partition;
use crate::command::{read_message, Command};
use crate::errors::{ClientError, Result};
use crate::net::Connection;
use crate::policy::CommandPolicy;

/// A named bin value to write.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    pub name: String,
    pub value: Value,
}

impl Bin {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Writes one or more bins to a record.
#[derive(Debug)]
pub struct WriteCommand {
    key: Key,
    bins: Vec<Bin>,
    partition: Partition,
}

impl WriteCommand {
    #[must_use]
    pub fn new(policy: &CommandPolicy, key: Key, bins: Vec<Bin>) -> Self {
        let partition = Partition::new(&key, policy.replica);
        Self {
            key,
            bins,
            partition,
        }
    }
}

#[async_trait]
impl Command for WriteCommand {
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
            wire::INFO2_WRITE,
            0,
            0,
            0,
            server_timeout_ms,
            wire::key_field_count(&self.key),
            self.bins.len() as u16,
        );
        writer.write_key(&self.key);
        for bin in &self.bins {
            writer.write_operation(OperationType::Write, &bin.name, &bin.value);
        }
        Ok(writer.finish())
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()> {
        let (header, _body) = read_message(conn).await?;
        match i32::from(header.result_code) {
            result_code::OK => Ok(()),
            code => Err(ClientError::Server { code }),
        }
    }
}

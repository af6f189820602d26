//! Record read command and the decoded record.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use stratus_core::{
    result_code, wire, Key, MessageHeader, MessageWriter, OperationType, ParseError, Value,
};

use crate::cluster::{Cluster, Node};
use crate::command::partition::Partition;
use crate::command::{read_message, Command};
use crate::errors::{ClientError, Result};
use crate::net::Connection;
use crate::policy::CommandPolicy;

/// A record returned by a read: bins plus server metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub bins: HashMap<String, Value>,
    pub generation: u32,
    pub expiration: u32,
}

impl Record {
    #[must_use]
    pub fn bin(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }
}

/// Reads named bins (or all bins) of a record.
#[derive(Debug)]
pub struct ReadCommand {
    key: Key,
    bin_names: Vec<String>,
    partition: Partition,
    record: Option<Record>,
}

impl ReadCommand {
    /// An empty `bin_names` slice reads every bin.
    #[must_use]
    pub fn new(policy: &CommandPolicy, key: Key, bin_names: &[&str]) -> Self {
        let partition = Partition::new(&key, policy.replica);
        Self {
            key,
            bin_names: bin_names.iter().map(ToString::to_string).collect(),
            partition,
            record: None,
        }
    }

    /// The record parsed from a successful response.
    #[must_use]
    pub fn into_record(self) -> Option<Record> {
        self.record
    }
}

#[async_trait]
impl Command for ReadCommand {
    fn get_node(&mut self, cluster: &Cluster) -> Result<Arc<Node>> {
        self.partition.get_node_read(cluster)
    }

    fn prepare_retry(&mut self, _was_timeout: bool) {
        self.partition.prepare_retry();
    }

    fn encode(&mut self, server_timeout_ms: u32) -> Result<Bytes> {
        let mut read_attr = wire::INFO1_READ;
        if self.bin_names.is_empty() {
            read_attr |= wire::INFO1_GET_ALL;
        }
        let mut writer = MessageWriter::new();
        writer.write_header(
            read_attr,
            0,
            0,
            0,
            0,
            server_timeout_ms,
            wire::key_field_count(&self.key),
            self.bin_names.len() as u16,
        );
        writer.write_key(&self.key);
        for name in &self.bin_names {
            writer.write_operation_bin(OperationType::Read, name);
        }
        Ok(writer.finish())
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()> {
        let (header, body) = read_message(conn).await?;
        match i32::from(header.result_code) {
            result_code::OK => {
                self.record = Some(parse_record(&header, &body)?);
                Ok(())
            }
            code => Err(ClientError::Server { code }),
        }
    }
}

/// Decodes the fields-and-operations section of a read response.
fn parse_record(header: &MessageHeader, body: &[u8]) -> Result<Record, ParseError> {
    let mut offset = 0usize;

    // Fields (key echo etc.) are skipped; only operations carry bins.
    for _ in 0..header.field_count {
        let raw = take(body, &mut offset, 4, "field length")?;
        let len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        take(body, &mut offset, len, "field body")?;
    }

    let mut bins = HashMap::new();
    for _ in 0..header.operation_count {
        let raw = take(body, &mut offset, 8, "operation header")?;
        let size = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        let particle_type = raw[5];
        let name_len = raw[7] as usize;
        let value_len = size
            .checked_sub(4 + name_len)
            .ok_or_else(|| ParseError::new("operation size smaller than its name", body))?;

        let name_bytes = take(body, &mut offset, name_len, "bin name")?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| ParseError::new("bin name is not UTF-8", body))?
            .to_string();
        let value_bytes = take(body, &mut offset, value_len, "bin value")?;

        if particle_type != 0 {
            bins.insert(name, Value::from_wire(particle_type, value_bytes)?);
        }
    }

    Ok(Record {
        bins,
        generation: header.generation,
        expiration: header.expiration,
    })
}

fn take<'a>(
    body: &'a [u8],
    offset: &mut usize,
    n: usize,
    what: &str,
) -> Result<&'a [u8], ParseError> {
    if body.len().saturating_sub(*offset) < n {
        return Err(ParseError::new(
            format!("truncated record body reading {what}"),
            body,
        ));
    }
    let slice = &body[*offset..*offset + n];
    *offset += n;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(field_count: u16, operation_count: u16) -> MessageHeader {
        MessageHeader {
            result_code: 0,
            generation: 9,
            expiration: 300,
            field_count,
            operation_count,
        }
    }

    /// Builds one response operation: name + integer value.
    fn int_op(name: &str, value: i64) -> Vec<u8> {
        let mut op = Vec::new();
        op.extend_from_slice(&((4 + name.len() + 8) as u32).to_be_bytes());
        op.push(OperationType::Read as u8);
        op.push(1); // integer particle
        op.push(0); // version
        op.push(name.len() as u8);
        op.extend_from_slice(name.as_bytes());
        op.extend_from_slice(&value.to_be_bytes());
        op
    }

    #[test]
    fn parses_bins_and_metadata() {
        let mut body = int_op("a", 5);
        body.extend_from_slice(&int_op("b", -1));

        let record = parse_record(&header(0, 2), &body).unwrap();
        assert_eq!(record.generation, 9);
        assert_eq!(record.expiration, 300);
        assert_eq!(record.bin("a"), Some(&Value::Int(5)));
        assert_eq!(record.bin("b"), Some(&Value::Int(-1)));
    }

    #[test]
    fn skips_fields_before_operations() {
        let mut body = Vec::new();
        // One field: len 5 (type byte + 4 payload bytes).
        body.extend_from_slice(&5u32.to_be_bytes());
        body.extend_from_slice(&[4, b't', b'e', b's', b't']);
        body.extend_from_slice(&int_op("n", 1));

        let record = parse_record(&header(1, 1), &body).unwrap();
        assert_eq!(record.bin("n"), Some(&Value::Int(1)));
    }

    #[test]
    fn null_particles_are_dropped() {
        let mut op = Vec::new();
        op.extend_from_slice(&((4 + 1) as u32).to_be_bytes());
        op.push(OperationType::Read as u8);
        op.push(0); // null particle
        op.push(0);
        op.push(1);
        op.push(b'x');

        let record = parse_record(&header(0, 1), &op).unwrap();
        assert!(record.bins.is_empty());
    }

    #[test]
    fn truncated_body_fails() {
        let mut body = int_op("a", 5);
        body.truncate(body.len() - 3);
        let err = parse_record(&header(0, 1), &body).unwrap_err();
        assert!(err.reason.contains("truncated record body"));
    }

    #[test]
    fn encode_sets_get_all_without_names() {
        let policy = CommandPolicy::default();
        let mut cmd = ReadCommand::new(&policy, Key::new("test", "demo", 1i64), &[]);
        let frame = cmd.encode(0).unwrap();
        assert_eq!(frame[9], wire::INFO1_READ | wire::INFO1_GET_ALL);
        assert_eq!(&frame[28..30], &0u16.to_be_bytes());
    }

    #[test]
    fn encode_lists_named_bins() {
        let policy = CommandPolicy::default();
        let mut cmd = ReadCommand::new(&policy, Key::new("test", "demo", 1i64), &["a", "b"]);
        let frame = cmd.encode(0).unwrap();
        assert_eq!(frame[9], wire::INFO1_READ);
        assert_eq!(&frame[28..30], &2u16.to_be_bytes());
    }
}

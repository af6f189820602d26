//! Record message framing.
//!
//! Every record command shares one frame shape: an 8-byte proto header
//! carrying the protocol version, message type, and body size, followed by a
//! 22-byte record header, then routing fields, then operations. All integers
//! are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ParseError;
use crate::key::Key;
use crate::value::Value;

/// Record protocol version in the proto header.
pub const CL_MSG_VERSION: u8 = 2;
/// Message type for record commands.
pub const AS_MSG_TYPE: u8 = 3;

/// Proto header (8) + record header (22).
pub const MSG_TOTAL_HEADER_SIZE: usize = 30;
/// Record header length, also written as its first byte.
pub const MSG_REMAINING_HEADER_SIZE: usize = 22;
/// Field prelude: length (4) + type (1).
pub const FIELD_HEADER_SIZE: usize = 5;
/// Operation prelude: size (4) + op (1) + particle (1) + version (1) + name length (1).
pub const OPERATION_HEADER_SIZE: usize = 8;

/// Read attribute: fetch the named bins.
pub const INFO1_READ: u8 = 1;
/// Read attribute: fetch all bins.
pub const INFO1_GET_ALL: u8 = 2;
/// Read attribute: metadata only, no bin data.
pub const INFO1_NOBINDATA: u8 = 32;
/// Write attribute: mutate the record.
pub const INFO2_WRITE: u8 = 1;
/// Write attribute: delete the record.
pub const INFO2_DELETE: u8 = 2;

/// Routing field type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Namespace = 0,
    Table = 1,
    Key = 2,
    DigestRipe = 4,
}

/// Per-bin operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationType {
    Read = 1,
    Write = 2,
    Touch = 5,
}

impl OperationType {
    /// Whether the operation mutates the record (drives the in-doubt flag).
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::Touch)
    }
}

// ---------------------------------------------------------------------------
// MessageWriter
// ---------------------------------------------------------------------------

/// Incremental writer for one record message.
///
/// Reserves the 30-byte header up front, appends fields and operations, and
/// patches the proto size word in [`finish`](Self::finish). The caller is
/// responsible for matching `field_count` / `operation_count` against the
/// fields and operations actually written.
#[derive(Debug)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    #[must_use]
    pub fn new() -> Self {
        let mut buf = BytesMut::with_capacity(256);
        buf.resize(MSG_TOTAL_HEADER_SIZE, 0);
        Self { buf }
    }

    /// Writes the 22-byte record header. The proto word is patched last.
    #[allow(clippy::too_many_arguments)]
    pub fn write_header(
        &mut self,
        read_attr: u8,
        write_attr: u8,
        info_attr: u8,
        generation: u32,
        expiration: u32,
        server_timeout_ms: u32,
        field_count: u16,
        operation_count: u16,
    ) {
        let h = &mut self.buf[8..MSG_TOTAL_HEADER_SIZE];
        h[0] = MSG_REMAINING_HEADER_SIZE as u8;
        h[1] = read_attr;
        h[2] = write_attr;
        h[3] = info_attr;
        // h[4] unused, h[5] result code: zero on requests.
        h[6..10].copy_from_slice(&generation.to_be_bytes());
        h[10..14].copy_from_slice(&expiration.to_be_bytes());
        h[14..18].copy_from_slice(&server_timeout_ms.to_be_bytes());
        h[18..20].copy_from_slice(&field_count.to_be_bytes());
        h[20..22].copy_from_slice(&operation_count.to_be_bytes());
    }

    pub fn write_field_str(&mut self, field_type: FieldType, value: &str) {
        self.write_field_bytes(field_type, value.as_bytes());
    }

    pub fn write_field_bytes(&mut self, field_type: FieldType, value: &[u8]) {
        // Field length covers the type byte plus the payload.
        self.buf.put_u32(value.len() as u32 + 1);
        self.buf.put_u8(field_type as u8);
        self.buf.put_slice(value);
    }

    /// Writes the routing fields for `key`: namespace, set (when non-empty),
    /// and digest.
    pub fn write_key(&mut self, key: &Key) {
        if !key.namespace.is_empty() {
            self.write_field_str(FieldType::Namespace, &key.namespace);
        }
        if !key.set_name.is_empty() {
            self.write_field_str(FieldType::Table, &key.set_name);
        }
        self.write_field_bytes(FieldType::DigestRipe, &key.digest);
    }

    /// Writes one operation carrying a bin value.
    pub fn write_operation(&mut self, op: OperationType, bin_name: &str, value: &Value) {
        let name_len = bin_name.len();
        self.buf.put_u32((name_len + value.size() + 4) as u32);
        self.buf.put_u8(op as u8);
        self.buf.put_u8(value.particle_type() as u8);
        self.buf.put_u8(0);
        self.buf.put_u8(name_len as u8);
        self.buf.put_slice(bin_name.as_bytes());
        value.write_to(&mut self.buf);
    }

    /// Writes a value-less operation (bin-name-only reads).
    pub fn write_operation_bin(&mut self, op: OperationType, bin_name: &str) {
        let name_len = bin_name.len();
        self.buf.put_u32((name_len + 4) as u32);
        self.buf.put_u8(op as u8);
        self.buf.put_u8(0);
        self.buf.put_u8(0);
        self.buf.put_u8(name_len as u8);
        self.buf.put_slice(bin_name.as_bytes());
    }

    /// Patches the proto size word and returns the finished frame.
    #[must_use]
    pub fn finish(mut self) -> Bytes {
        let size = (self.buf.len() - 8) as u64;
        let proto =
            size | (u64::from(CL_MSG_VERSION) << 56) | (u64::from(AS_MSG_TYPE) << 48);
        self.buf[0..8].copy_from_slice(&proto.to_be_bytes());
        self.buf.freeze()
    }
}

impl Default for MessageWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of routing fields [`MessageWriter::write_key`] will emit for `key`.
#[must_use]
pub fn key_field_count(key: &Key) -> u16 {
    let mut count = 1; // digest is always present
    if !key.namespace.is_empty() {
        count += 1;
    }
    if !key.set_name.is_empty() {
        count += 1;
    }
    count
}

// ---------------------------------------------------------------------------
// Response headers
// ---------------------------------------------------------------------------

/// Decoded 8-byte proto header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoHeader {
    pub version: u8,
    pub msg_type: u8,
    /// Body size in bytes (excludes the proto header itself).
    pub size: usize,
}

impl ProtoHeader {
    /// Decodes a proto header and validates version and message type.
    ///
    /// # Errors
    ///
    /// Fails if the version or message type does not match the record
    /// protocol.
    pub fn parse(raw: [u8; 8]) -> Result<Self, ParseError> {
        let word = u64::from_be_bytes(raw);
        let version = (word >> 56) as u8;
        let msg_type = ((word >> 48) & 0xFF) as u8;
        let size = (word & 0x0000_FFFF_FFFF_FFFF) as usize;
        if version != CL_MSG_VERSION || msg_type != AS_MSG_TYPE {
            return Err(ParseError::new(
                format!("unexpected proto header: version={version} type={msg_type}"),
                &raw,
            ));
        }
        Ok(Self {
            version,
            msg_type,
            size,
        })
    }
}

/// Decoded 22-byte record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub result_code: u8,
    pub generation: u32,
    pub expiration: u32,
    pub field_count: u16,
    pub operation_count: u16,
}

impl MessageHeader {
    /// Decodes the record header that follows the proto header.
    ///
    /// # Errors
    ///
    /// Fails if fewer than 22 bytes are supplied.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.len() < MSG_REMAINING_HEADER_SIZE {
            return Err(ParseError::new(
                format!("record header has {} bytes, expected 22", raw.len()),
                raw,
            ));
        }
        let mut buf = &raw[..MSG_REMAINING_HEADER_SIZE];
        let _header_len = buf.get_u8();
        let _read_attr = buf.get_u8();
        let _write_attr = buf.get_u8();
        let _info_attr = buf.get_u8();
        let _unused = buf.get_u8();
        let result_code = buf.get_u8();
        let generation = buf.get_u32();
        let expiration = buf.get_u32();
        let _server_timeout = buf.get_u32();
        let field_count = buf.get_u16();
        let operation_count = buf.get_u16();
        Ok(Self {
            result_code,
            generation,
            expiration,
            field_count,
            operation_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> Key {
        Key::new("test", "demo", "user-1")
    }

    #[test]
    fn finish_patches_proto_word() {
        let mut w = MessageWriter::new();
        w.write_header(0, INFO2_WRITE, 0, 0, 0, 1000, 1, 0);
        w.write_field_str(FieldType::Namespace, "test");
        let frame = w.finish();

        let header = ProtoHeader::parse(frame[0..8].try_into().unwrap()).unwrap();
        assert_eq!(header.version, CL_MSG_VERSION);
        assert_eq!(header.msg_type, AS_MSG_TYPE);
        assert_eq!(header.size, frame.len() - 8);
    }

    #[test]
    fn header_fields_land_at_fixed_offsets() {
        let mut w = MessageWriter::new();
        w.write_header(INFO1_READ, 0, 0, 7, 300, 1500, 3, 2);
        let frame = w.finish();

        assert_eq!(frame[8], 22); // header length
        assert_eq!(frame[9], INFO1_READ);
        assert_eq!(frame[10], 0);
        assert_eq!(frame[13], 0); // result code zero on requests
        assert_eq!(&frame[14..18], &7u32.to_be_bytes());
        assert_eq!(&frame[18..22], &300u32.to_be_bytes());
        assert_eq!(&frame[22..26], &1500u32.to_be_bytes());
        assert_eq!(&frame[26..28], &3u16.to_be_bytes());
        assert_eq!(&frame[28..30], &2u16.to_be_bytes());
    }

    #[test]
    fn write_key_emits_expected_fields() {
        let key = sample_key();
        let mut w = MessageWriter::new();
        w.write_header(0, INFO2_WRITE, 0, 0, 0, 0, key_field_count(&key), 0);
        w.write_key(&key);
        let frame = w.finish();

        let body = &frame[MSG_TOTAL_HEADER_SIZE..];
        // Namespace field: len=5 ("test" + type byte), type 0.
        assert_eq!(&body[0..4], &5u32.to_be_bytes());
        assert_eq!(body[4], FieldType::Namespace as u8);
        assert_eq!(&body[5..9], b"test");
        // Set field follows.
        assert_eq!(&body[9..13], &5u32.to_be_bytes());
        assert_eq!(body[13], FieldType::Table as u8);
        assert_eq!(&body[14..18], b"demo");
        // Digest field: 20 bytes + type.
        assert_eq!(&body[18..22], &21u32.to_be_bytes());
        assert_eq!(body[22], FieldType::DigestRipe as u8);
        assert_eq!(&body[23..43], &key.digest);
    }

    #[test]
    fn key_field_count_skips_empty_components() {
        assert_eq!(key_field_count(&Key::new("test", "demo", 1i64)), 3);
        assert_eq!(key_field_count(&Key::new("test", "", 1i64)), 2);
    }

    #[test]
    fn write_operation_frames_value() {
        let mut w = MessageWriter::new();
        w.write_header(0, INFO2_WRITE, 0, 0, 0, 0, 0, 1);
        w.write_operation(OperationType::Write, "age", &Value::Int(33));
        let frame = w.finish();

        let op = &frame[MSG_TOTAL_HEADER_SIZE..];
        // size = name(3) + value(8) + 4
        assert_eq!(&op[0..4], &15u32.to_be_bytes());
        assert_eq!(op[4], OperationType::Write as u8);
        assert_eq!(op[5], 1); // integer particle
        assert_eq!(op[6], 0); // version
        assert_eq!(op[7], 3); // name length
        assert_eq!(&op[8..11], b"age");
        assert_eq!(&op[11..19], &33i64.to_be_bytes());
    }

    #[test]
    fn proto_header_rejects_wrong_type() {
        let word = 10u64 | (2u64 << 56) | (1u64 << 48); // info type, not record
        let err = ProtoHeader::parse(word.to_be_bytes()).unwrap_err();
        assert!(err.reason.contains("unexpected proto header"));
    }

    #[test]
    fn message_header_round_trip() {
        let mut w = MessageWriter::new();
        w.write_header(0, INFO2_WRITE, 0, 3, 60, 250, 2, 1);
        let frame = w.finish();

        let header = MessageHeader::parse(&frame[8..]).unwrap();
        assert_eq!(header.result_code, 0);
        assert_eq!(header.generation, 3);
        assert_eq!(header.expiration, 60);
        assert_eq!(header.field_count, 2);
        assert_eq!(header.operation_count, 1);
    }

    #[test]
    fn message_header_rejects_short_input() {
        assert!(MessageHeader::parse(&[0u8; 10]).is_err());
    }
}

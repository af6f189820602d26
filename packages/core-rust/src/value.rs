//! Bin values and their wire particle types.
//!
//! A bin value is encoded on the wire as a particle: a one-byte type code
//! followed by the raw particle bytes. The core codec supports the scalar
//! particles; collection and probabilistic codes are declared so layered
//! operation builders can reference them.

use std::fmt;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Wire codes for particle (bin value) types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParticleType {
    Null = 0,
    Integer = 1,
    String = 3,
    Blob = 4,
    /// Reserved for HyperLogLog operation builders.
    Hll = 18,
    /// Reserved for map operation builders.
    Map = 19,
    /// Reserved for list operation builders.
    List = 20,
    /// Reserved for geospatial operation builders.
    GeoJson = 23,
}

/// A single bin value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    String(String),
    Blob(Vec<u8>),
}

impl Value {
    /// The particle type code this value encodes as.
    #[must_use]
    pub const fn particle_type(&self) -> ParticleType {
        match self {
            Self::Int(_) => ParticleType::Integer,
            Self::String(_) => ParticleType::String,
            Self::Blob(_) => ParticleType::Blob,
        }
    }

    /// Encoded particle size in bytes (excluding the type code).
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Int(_) => 8,
            Self::String(s) => s.len(),
            Self::Blob(b) => b.len(),
        }
    }

    /// Appends the particle bytes to `buf`.
    ///
    /// Integers are 8-byte big-endian; strings and blobs are raw bytes.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Self::Int(i) => buf.put_i64(*i),
            Self::String(s) => buf.put_slice(s.as_bytes()),
            Self::Blob(b) => buf.put_slice(b),
        }
    }

    /// Decodes a particle received from the server.
    ///
    /// # Errors
    ///
    /// Fails on unsupported particle type codes or malformed particle bytes.
    pub fn from_wire(particle_type: u8, bytes: &[u8]) -> Result<Self, ParseError> {
        match particle_type {
            t if t == ParticleType::Integer as u8 => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| {
                    ParseError::new(
                        format!("integer particle has {} bytes, expected 8", bytes.len()),
                        bytes,
                    )
                })?;
                Ok(Self::Int(i64::from_be_bytes(raw)))
            }
            t if t == ParticleType::String as u8 => {
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| ParseError::new("string particle is not UTF-8", bytes))?;
                Ok(Self::String(s.to_string()))
            }
            t if t == ParticleType::Blob as u8 => Ok(Self::Blob(bytes.to_vec())),
            other => Err(ParseError::new(
                format!("unsupported particle type {other}"),
                bytes,
            )),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

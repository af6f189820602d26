//! Stratus Core -- wire protocol framing, info codec, keys, and bin values.
//!
//! This crate is the pure protocol layer of the Stratus client. It performs
//! no I/O; the client crate drives these codecs over pooled connections.
//!
//! - **Info** ([`info`]): text-framed control protocol codec and scanner
//! - **Wire** ([`wire`]): record message framing (proto + record headers,
//!   fields, operations)
//! - **Key** ([`key`]): record keys, RIPEMD-160 digests, partition ids
//! - **Value** ([`value`]): bin values and particle type codes
//! - **Result codes** ([`result_code`]): server/client result codes and the
//!   keep-connection rule
//! - **Error** ([`error`]): decode errors with response echoes

pub mod error;
pub mod info;
pub mod key;
pub mod result_code;
pub mod value;
pub mod wire;

// Error
pub use error::ParseError;

// Info
pub use info::InfoParser;

// Key
pub use key::{Key, PARTITION_COUNT};

// Value
pub use value::{ParticleType, Value};

// Wire
pub use wire::{FieldType, MessageHeader, MessageWriter, OperationType, ProtoHeader};

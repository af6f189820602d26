//! Record keys and the digest that routes them to a partition.
//!
//! Every key hashes to a fixed 20-byte RIPEMD-160 digest over the set name
//! and the particle-typed user key. The first four digest bytes, read
//! little-endian, select one of the 4096 partitions.

use std::fmt;

use ripemd::{Digest, Ripemd160};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Number of partitions a namespace's keys hash into.
pub const PARTITION_COUNT: usize = 4096;

/// A record key: namespace, set, user key, and the derived digest.
///
/// The digest alone identifies the record on the wire; namespace and set are
/// sent alongside it as routing fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub namespace: String,
    pub set_name: String,
    pub user_key: Value,
    /// RIPEMD-160 over `set_name` + particle type + user key bytes.
    pub digest: [u8; 20],
}

impl Key {
    /// Creates a key and computes its digest.
    pub fn new(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        user_key: impl Into<Value>,
    ) -> Self {
        let set_name = set_name.into();
        let user_key = user_key.into();
        let digest = compute_digest(&set_name, &user_key);
        Self {
            namespace: namespace.into(),
            set_name,
            user_key,
            digest,
        }
    }

    /// Partition this key hashes to: first 4 digest bytes little-endian,
    /// modulo [`PARTITION_COUNT`].
    #[must_use]
    pub fn partition_id(&self) -> usize {
        let prefix = u32::from_le_bytes([
            self.digest[0],
            self.digest[1],
            self.digest[2],
            self.digest[3],
        ]);
        prefix as usize % PARTITION_COUNT
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.set_name, self.user_key)
    }
}

fn compute_digest(set_name: &str, user_key: &Value) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    hasher.update(set_name.as_bytes());
    hasher.update([user_key.particle_type() as u8]);
    match user_key {
        Value::Int(i) => hasher.update(i.to_be_bytes()),
        Value::String(s) => hasher.update(s.as_bytes()),
        Value::Blob(b) => hasher.update(b),
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = Key::new("test", "demo", "user-1");
        let b = Key::new("test", "demo", "user-1");
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.partition_id(), b.partition_id());
    }

    #[test]
    fn digest_depends_on_set_and_key() {
        let base = Key::new("test", "demo", "user-1");
        assert_ne!(base.digest, Key::new("test", "other", "user-1").digest);
        assert_ne!(base.digest, Key::new("test", "demo", "user-2").digest);
    }

    #[test]
    fn digest_distinguishes_particle_types() {
        // "1" as a string and 1 as an integer must not collide.
        let s = Key::new("test", "demo", "1");
        let i = Key::new("test", "demo", 1i64);
        assert_ne!(s.digest, i.digest);
    }

    #[test]
    fn namespace_does_not_affect_digest() {
        // Partition routing is namespace-scoped; the digest itself is not.
        let a = Key::new("ns1", "demo", "user-1");
        let b = Key::new("ns2", "demo", "user-1");
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn partition_id_is_in_range() {
        for i in 0..100 {
            let key = Key::new("test", "demo", format!("key-{i}"));
            assert!(key.partition_id() < PARTITION_COUNT);
        }
    }

    #[test]
    fn partition_id_uses_little_endian_prefix() {
        let mut key = Key::new("test", "demo", "x");
        key.digest[0] = 0x01;
        key.digest[1] = 0x02;
        key.digest[2] = 0x00;
        key.digest[3] = 0x00;
        // 0x0201 = 513; 513 % 4096 = 513
        assert_eq!(key.partition_id(), 513);
    }
}

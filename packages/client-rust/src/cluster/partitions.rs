//! Per-namespace replica tables and the replicas-response decoder.
//!
//! The partition map is published copy-on-write: the decoder never touches
//! the map commands are reading. It clones the current map into a working
//! copy, applies ownership claims under the regime rule, and hands the new
//! map back for a single atomic swap by the tender.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::info;

use stratus_core::{InfoParser, PARTITION_COUNT};

use crate::cluster::node::Node;
use crate::errors::Result;

/// Longest namespace token the server can produce (31 bytes + NUL).
const MAX_NAMESPACE_LEN: usize = 32;

/// Replica ownership for one namespace.
///
/// `replicas[i][p]` is the node currently believed to own replica `i` of
/// partition `p`. `regimes[p]` is a monotonic counter that totally orders
/// conflicting ownership claims.
#[derive(Debug, Clone, Default)]
pub struct Partitions {
    pub replicas: Vec<Vec<Option<Arc<Node>>>>,
    pub regimes: Vec<u32>,
}

impl Partitions {
    #[must_use]
    pub fn new(replica_count: usize) -> Self {
        Self {
            replicas: vec![vec![None; PARTITION_COUNT]; replica_count],
            regimes: vec![0; PARTITION_COUNT],
        }
    }

    /// Number of replicas (the namespace's replication factor).
    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Returns a resized copy for a changed replication factor.
    ///
    /// Shrinking keeps the first `replica_count` arrays; growing appends
    /// fresh unassigned arrays. Regimes carry over unchanged.
    #[must_use]
    pub fn resize(&self, replica_count: usize) -> Self {
        let mut replicas: Vec<Vec<Option<Arc<Node>>>> = self
            .replicas
            .iter()
            .take(replica_count)
            .cloned()
            .collect();
        while replicas.len() < replica_count {
            replicas.push(vec![None; PARTITION_COUNT]);
        }
        Self {
            replicas,
            regimes: self.regimes.clone(),
        }
    }
}

/// Namespace → replica table. Snapshots are shared via `Arc` and replaced
/// wholesale on mutation.
pub type PartitionMap = HashMap<String, Partitions>;

/// Result of decoding one replicas response.
#[derive(Debug)]
pub struct ParsedReplicas {
    /// The node's partition generation at the time of the response.
    pub generation: i64,
    /// New map to publish, or `None` when the response carried no
    /// namespaces (nothing changed, publication is skipped).
    pub map: Option<PartitionMap>,
}

/// Decoder for the `partition-generation` + `replicas` info response.
pub struct PartitionParser;

impl PartitionParser {
    /// Decodes the response body from `node`, applying ownership claims to a
    /// working copy of `current`.
    ///
    /// For each set bit in replica `i`'s bitmap at reported regime `r`:
    /// claims with `r` below the stored regime are ignored (logged once per
    /// parse); otherwise the slot is assigned to `node`, the regime is
    /// raised, and a displaced owner is forced to re-read its partitions on
    /// the next tend.
    ///
    /// # Errors
    ///
    /// Fails with a parse error echoing the response on malformed input.
    pub fn parse(
        node: &Arc<Node>,
        body: Vec<u8>,
        current: &PartitionMap,
    ) -> Result<ParsedReplicas> {
        let mut parser = InfoParser::new(body);
        if parser.is_empty() {
            return Err(parser.error("partition info is empty").into());
        }
        parser.parse_name("partition-generation")?;
        let generation = parser.parse_int()?;
        parser.expect(b'\n')?;
        parser.parse_name("replicas")?;

        let mut working: Option<PartitionMap> = None;
        let mut regime_logged = false;

        while !matches!(parser.peek(), None | Some(b'\n')) {
            let namespace = parser.parse_string(&[b':'])?;
            if namespace.is_empty() || namespace.len() >= MAX_NAMESPACE_LEN {
                return Err(parser
                    .error(format!("invalid partition namespace {namespace:?}"))
                    .into());
            }
            parser.expect(b':')?;

            let regime = parse_u32(&mut parser, "regime")?;
            parser.expect(b',')?;
            let replica_count = parse_u32(&mut parser, "replica count")? as usize;
            if replica_count == 0 {
                return Err(parser
                    .error(format!("namespace {namespace} has zero replicas"))
                    .into());
            }

            let map = working.get_or_insert_with(|| current.clone());
            match map.get(&namespace) {
                None => {
                    map.insert(namespace.clone(), Partitions::new(replica_count));
                }
                Some(existing) if existing.replica_count() != replica_count => {
                    info!(
                        namespace = %namespace,
                        from = existing.replica_count(),
                        to = replica_count,
                        "namespace replication factor changed"
                    );
                    let resized = existing.resize(replica_count);
                    map.insert(namespace.clone(), resized);
                }
                Some(_) => {}
            }
            let partitions = map
                .get_mut(&namespace)
                .ok_or_else(|| parser.error("namespace vanished from working map"))?;

            for index in 0..replica_count {
                parser.expect(b',')?;
                let begin = parser.offset;
                while !matches!(parser.peek(), None | Some(b',' | b';' | b'\n')) {
                    parser.offset += 1;
                }
                if parser.offset == begin {
                    return Err(parser
                        .error(format!("empty partition bitmap for namespace {namespace}"))
                        .into());
                }
                let encoded = parser.bytes()[begin..parser.offset].to_vec();
                decode_bitmap(
                    node,
                    partitions,
                    index,
                    regime,
                    &encoded,
                    &mut regime_logged,
                    &parser,
                )?;
            }
            if parser.peek() == Some(b';') {
                parser.offset += 1;
            }
        }

        Ok(ParsedReplicas {
            generation,
            map: working,
        })
    }
}

fn parse_u32(parser: &mut InfoParser, what: &str) -> Result<u32> {
    let raw = parser.parse_int()?;
    u32::try_from(raw)
        .map_err(|_| parser.error(format!("{what} {raw} out of range")).into())
}

fn decode_bitmap(
    node: &Arc<Node>,
    partitions: &mut Partitions,
    index: usize,
    regime: u32,
    encoded: &[u8],
    regime_logged: &mut bool,
    parser: &InfoParser,
) -> Result<()> {
    let bits = BASE64
        .decode(encoded)
        .map_err(|_| parser.error("partition bitmap is not valid base64"))?;
    if bits.len() * 8 < PARTITION_COUNT {
        return Err(parser
            .error(format!("partition bitmap too short: {} bytes", bits.len()))
            .into());
    }

    for pid in 0..PARTITION_COUNT {
        if bits[pid >> 3] & (0x80 >> (pid & 7)) == 0 {
            continue;
        }
        let regime_old = partitions.regimes[pid];
        if regime < regime_old {
            if !*regime_logged {
                info!(
                    node = %node.name(),
                    regime,
                    regime_old,
                    "ignoring partition claim: regime < old regime"
                );
                *regime_logged = true;
            }
            continue;
        }
        if regime > regime_old {
            partitions.regimes[pid] = regime;
        }
        let slot = &mut partitions.replicas[index][pid];
        if let Some(old) = slot {
            if old.name() != node.name() {
                // Displaced owner must re-read its partitions next tend.
                old.force_partition_refresh();
            }
        }
        *slot = Some(Arc::clone(node));
    }
    Ok(())
}

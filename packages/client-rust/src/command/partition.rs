//! Key → node routing against the current partition-map snapshot.
//!
//! Every attempt re-reads the cluster's snapshot, so a command that raced a
//! topology change retries under the new map. The replica sequence advances
//! on retry; when every replica has been tried the routing fails with
//! `NoAvailableNode`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stratus_core::Key;

use crate::cluster::{Cluster, Node};
use crate::errors::{ClientError, Result};
use crate::policy::Replica;

/// Process-wide cursor for `Replica::MasterProles` so successive commands
/// spread across replicas rather than all starting at the master.
static ROUND_ROBIN: AtomicUsize = AtomicUsize::new(0);

/// Routing state for one command.
#[derive(Debug)]
pub struct Partition {
    namespace: String,
    partition_id: usize,
    replica: Replica,
    sequence: usize,
    seeded: bool,
}

impl Partition {
    #[must_use]
    pub fn new(key: &Key, replica: Replica) -> Self {
        Self {
            namespace: key.namespace.clone(),
            partition_id: key.partition_id(),
            replica,
            sequence: 0,
            seeded: false,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn partition_id(&self) -> usize {
        self.partition_id
    }

    /// Advances to the next replica for the following attempt.
    pub fn prepare_retry(&mut self) {
        self.sequence += 1;
    }

    /// Node for a write: the master first, successive replicas on retry.
    ///
    /// # Errors
    ///
    /// See [`Partition::get_node_read`].
    pub fn get_node_write(&mut self, cluster: &Cluster) -> Result<Arc<Node>> {
        self.sequence_node(cluster)
    }

    /// Node for a read, per the command's replica policy.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidNamespace`] when the namespace is unmapped,
    /// [`ClientError::NoAvailableNode`] when every replica slot is empty or
    /// inactive.
    pub fn get_node_read(&mut self, cluster: &Cluster) -> Result<Arc<Node>> {
        match self.replica {
            Replica::Master => self.master_node(cluster),
            Replica::Sequence => self.sequence_node(cluster),
            Replica::MasterProles => {
                if !self.seeded {
                    self.sequence = ROUND_ROBIN.fetch_add(1, Ordering::Relaxed);
                    self.seeded = true;
                }
                self.sequence_node(cluster)
            }
            Replica::Random => {
                if !self.seeded {
                    self.sequence = rand::random::<u32>() as usize;
                    self.seeded = true;
                }
                self.sequence_node(cluster)
            }
        }
    }

    fn master_node(&self, cluster: &Cluster) -> Result<Arc<Node>> {
        let map = cluster.partitions();
        let partitions = map.get(&self.namespace).ok_or_else(|| {
            ClientError::InvalidNamespace {
                namespace: self.namespace.clone(),
                map_size: map.len(),
            }
        })?;
        if let Some(Some(node)) = partitions
            .replicas
            .first()
            .map(|replica| &replica[self.partition_id])
        {
            if node.active() {
                return Ok(Arc::clone(node));
            }
        }
        Err(self.no_available_node(cluster))
    }

    fn sequence_node(&mut self, cluster: &Cluster) -> Result<Arc<Node>> {
        let map = cluster.partitions();
        let partitions = map.get(&self.namespace).ok_or_else(|| {
            ClientError::InvalidNamespace {
                namespace: self.namespace.clone(),
                map_size: map.len(),
            }
        })?;
        let replica_count = partitions.replica_count();
        for _ in 0..replica_count {
            let index = self.sequence % replica_count;
            if let Some(node) = &partitions.replicas[index][self.partition_id] {
                if node.active() {
                    return Ok(Arc::clone(node));
                }
            }
            self.sequence += 1;
        }
        Err(self.no_available_node(cluster))
    }

    fn no_available_node(&self, cluster: &Cluster) -> ClientError {
        ClientError::NoAvailableNode {
            cluster_size: cluster.nodes().len(),
            namespace: self.namespace.clone(),
            partition_id: self.partition_id,
        }
    }
}

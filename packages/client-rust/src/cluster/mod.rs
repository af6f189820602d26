//! Cluster topology: tender loop, node lifecycle, and partition-map
//! publication.
//!
//! One tender task owns all topology mutation. Command tasks read the node
//! list and the partition map through lock-free `ArcSwap` snapshots; a
//! snapshot captured at routing time stays coherent for the whole command
//! even while the tender publishes a newer one.

pub mod node;
pub mod node_validator;
pub mod partitions;
pub mod peers;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use node::Node;
pub use node_validator::NodeValidator;
pub use partitions::{PartitionMap, PartitionParser, Partitions};
pub use peers::{Peer, PeerList, Peers};

use crate::errors::{ClientError, Result};
use crate::net::Host;
use crate::policy::ClientPolicy;

/// Connection pools are rebalanced every this many tend iterations.
const BALANCE_INTERVAL: u64 = 30;

/// Consecutive refresh failures after which an unreachable node is dropped.
const MAX_TEND_FAILURES: usize = 5;

/// The client's view of the cluster.
///
/// Owns every [`Node`] exclusively; the partition map references nodes but
/// nodes never reach back into cluster state, so topology mutation stays
/// confined to the tender.
pub struct Cluster {
    policy: Arc<ClientPolicy>,
    /// Hosts tried when the cluster has no nodes. Grows with every
    /// discovered node's host.
    seeds: Mutex<Vec<Host>>,
    /// Active nodes; swapped wholesale by the tender.
    nodes: ArcSwap<Vec<Arc<Node>>>,
    /// Node lookup by name. Written by the tender, read by peers refresh.
    nodes_map: DashMap<String, Arc<Node>>,
    /// Copy-on-write routing table.
    partition_map: ArcSwap<PartitionMap>,
    closed: AtomicBool,
    tend_count: AtomicU64,
    /// Whether every node advertises partition queries.
    has_partition_query: AtomicBool,
    tend_task: Mutex<Option<JoinHandle<()>>>,
}

impl Cluster {
    /// Connects to the cluster: one stabilizing tend, then the background
    /// tender.
    ///
    /// # Errors
    ///
    /// [`ClientError::ClusterSeedFailed`] when no seed yields a node on the
    /// first tend and `fail_if_not_connected` is set.
    pub async fn new(policy: ClientPolicy, hosts: &[Host]) -> Result<Arc<Self>> {
        let cluster = Arc::new(Self {
            policy: Arc::new(policy),
            seeds: Mutex::new(hosts.to_vec()),
            nodes: ArcSwap::from_pointee(Vec::new()),
            nodes_map: DashMap::new(),
            partition_map: ArcSwap::from_pointee(PartitionMap::new()),
            closed: AtomicBool::new(false),
            tend_count: AtomicU64::new(0),
            has_partition_query: AtomicBool::new(false),
            tend_task: Mutex::new(None),
        });

        cluster.wait_till_stabilized().await;

        if cluster.nodes.load().is_empty() {
            warn!("cluster seed(s) failed");
            if cluster.policy.fail_if_not_connected {
                cluster.closed.store(true, Ordering::Relaxed);
                return Err(ClientError::ClusterSeedFailed);
            }
        }

        // Every discovered node's host becomes a seed for future reseeding.
        {
            let mut seeds = cluster.seeds.lock();
            for node in cluster.nodes.load().iter() {
                if !seeds.contains(node.host()) {
                    debug!(seed = %node.host(), "add seed");
                    seeds.push(node.host().clone());
                }
            }
        }

        let tender = tokio::spawn(Self::tend_loop(Arc::clone(&cluster)));
        *cluster.tend_task.lock() = Some(tender);
        Ok(cluster)
    }

    /// Runs the first tend so commands issued right after startup do not
    /// race an empty partition map.
    async fn wait_till_stabilized(&self) {
        self.tend().await;
    }

    async fn tend_loop(cluster: Arc<Self>) {
        loop {
            tokio::time::sleep(cluster.policy.tend_interval).await;
            if cluster.closed.load(Ordering::Relaxed) {
                break;
            }
            cluster.tend().await;
        }
    }

    // -----------------------------------------------------------------------
    // Tend iteration
    // -----------------------------------------------------------------------

    async fn tend(&self) {
        let mut peers = Peers::default();
        let nodes = self.nodes.load_full();
        for node in nodes.iter() {
            node.reset_tend_state();
        }

        if nodes.is_empty() {
            self.seed_nodes(&mut peers).await;
        } else {
            for node in nodes.iter() {
                node.refresh(&mut peers).await;
            }

            if peers.generation_changed {
                peers.refresh_count = 0;
                for node in nodes.iter() {
                    node.refresh_peers(self, &mut peers).await;
                }
                let remove_list = self.find_nodes_to_remove(peers.refresh_count);
                if !remove_list.is_empty() {
                    self.remove_nodes(&remove_list).await;
                }
            }

            if !peers.nodes.is_empty() {
                self.add_discovered_nodes(&peers);
                self.refresh_discovered_peers(&mut peers).await;
            }
        }

        // Re-read the node list: adds and removals above may have changed it.
        for node in self.nodes.load_full().iter() {
            if node.partition_changed() {
                let current = self.partition_map.load_full();
                if let Some(updated) = Node::refresh_partitions(node, &peers, &current).await {
                    self.partition_map.store(Arc::new(updated));
                }
            }
        }

        let count = self.tend_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % BALANCE_INTERVAL == 0 {
            for node in self.nodes.load_full().iter() {
                node.balance_connections().await;
            }
        }
        if self.policy.max_error_rate > 0 && count % self.policy.error_rate_window.max(1) == 0 {
            for node in self.nodes.load_full().iter() {
                node.reset_error_count();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Seeding
    // -----------------------------------------------------------------------

    /// Tries every seed until one yields a properly peered node.
    ///
    /// A seed that handshakes but announces no peers is held aside as a
    /// fallback and accepted only when no better seed exists; a lone stale
    /// seed must not capture the cluster identity.
    async fn seed_nodes(&self, peers: &mut Peers) -> bool {
        self.install_nodes(Vec::new());
        let seeds = self.seeds.lock().clone();
        let mut fallback: Option<Arc<Node>> = None;

        for seed in &seeds {
            debug!(seed = %seed, "try seed");
            let nv = match NodeValidator::validate(&self.policy, seed).await {
                Ok(nv) => nv,
                Err(err) => {
                    peers.fail(seed.clone());
                    warn!(seed = %seed, error = %err, "failed to seed node");
                    continue;
                }
            };
            let node = Arc::new(Node::from_validator(Arc::clone(&self.policy), nv));

            peers.refresh_count = 0;
            node.refresh_peers(self, peers).await;
            if node.failures() > 0 {
                peers.fail(seed.clone());
                node.close().await;
                continue;
            }

            if node.peers_count() == 0 {
                if fallback.is_none() {
                    fallback = Some(node);
                } else {
                    node.close().await;
                }
                continue;
            }

            if let Some(orphan) = fallback.take() {
                info!(node = %orphan, "skip orphan seed");
                orphan.close().await;
            }
            self.add_seed_and_peers(node, peers).await;
            return true;
        }

        if let Some(node) = fallback {
            peers.refresh_count = 1;
            self.add_seed_and_peers(node, peers).await;
        }
        false
    }

    async fn add_seed_and_peers(&self, seed: Arc<Node>, peers: &mut Peers) {
        seed.create_min_connections().await;
        self.nodes_map.clear();

        info!(node = %seed, "add seed node");
        let mut node_array = vec![Arc::clone(&seed)];
        self.nodes_map
            .insert(seed.name().to_string(), Arc::clone(&seed));
        for (name, node) in &peers.nodes {
            info!(node = %node, "add node");
            self.nodes_map.insert(name.clone(), Arc::clone(node));
            node_array.push(Arc::clone(node));
        }
        self.install_nodes(node_array);

        if !peers.nodes.is_empty() {
            self.refresh_discovered_peers(peers).await;
        }
    }

    // -----------------------------------------------------------------------
    // Node add/remove
    // -----------------------------------------------------------------------

    fn add_discovered_nodes(&self, peers: &Peers) {
        let mut node_array: Vec<Arc<Node>> = self.nodes.load().as_ref().clone();
        for (name, node) in &peers.nodes {
            info!(node = %node, "add node");
            self.nodes_map.insert(name.clone(), Arc::clone(node));
            node_array.push(Arc::clone(node));
        }
        self.install_nodes(node_array);
    }

    /// Drains newly accepted nodes and asks each for its own peers until no
    /// further nodes surface: closure over transitive peers.
    async fn refresh_discovered_peers(&self, peers: &mut Peers) {
        loop {
            let batch: Vec<Arc<Node>> = peers.nodes.drain().map(|(_, node)| node).collect();
            for node in &batch {
                node.refresh_peers(self, peers).await;
            }
            if peers.nodes.is_empty() {
                break;
            }
            self.add_discovered_nodes(peers);
        }
    }

    /// Removal predicate, evaluated after a peers pass.
    fn find_nodes_to_remove(&self, refresh_count: usize) -> Vec<Arc<Node>> {
        let nodes = self.nodes.load_full();
        let mut remove_list = Vec::new();

        for node in nodes.iter() {
            if !node.active() {
                remove_list.push(Arc::clone(node));
                continue;
            }
            if refresh_count == 0 && node.failures() >= MAX_TEND_FAILURES {
                // Every info request failed this tend and this node has been
                // unreachable for five tends. If nothing is left, seeds are
                // tried next iteration.
                remove_list.push(Arc::clone(node));
                continue;
            }
            if nodes.len() > 1 && refresh_count >= 1 && node.reference_count() == 0 {
                // Not referenced by any peer listing.
                if node.failures() == 0 {
                    // Responding but unreferenced: keep only while it still
                    // holds partition assignments.
                    if !self.node_in_partition_map(node) {
                        remove_list.push(Arc::clone(node));
                    }
                } else {
                    remove_list.push(Arc::clone(node));
                }
            }
        }
        remove_list
    }

    async fn remove_nodes(&self, remove_list: &[Arc<Node>]) {
        for node in remove_list {
            info!(node = %node, "remove node");
            self.nodes_map.remove(node.name());
            node.close().await;
        }
        let remaining: Vec<Arc<Node>> = self
            .nodes
            .load()
            .iter()
            .filter(|node| !remove_list.iter().any(|removed| removed.name() == node.name()))
            .cloned()
            .collect();
        self.install_nodes(remaining);
        self.scrub_partition_map(remove_list);
    }

    /// Clears partition slots still referencing removed nodes so routing
    /// stops selecting them immediately.
    fn scrub_partition_map(&self, removed: &[Arc<Node>]) {
        let current = self.partition_map.load_full();
        let mut map: PartitionMap = current.as_ref().clone();
        let mut changed = false;
        for partitions in map.values_mut() {
            for replica in &mut partitions.replicas {
                for slot in replica.iter_mut() {
                    let is_removed = slot
                        .as_ref()
                        .is_some_and(|node| removed.iter().any(|r| r.name() == node.name()));
                    if is_removed {
                        *slot = None;
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.partition_map.store(Arc::new(map));
        }
    }

    fn install_nodes(&self, node_array: Vec<Arc<Node>>) {
        let supports_pquery =
            !node_array.is_empty() && node_array.iter().all(|node| node.has_partition_query());
        self.has_partition_query
            .store(supports_pquery, Ordering::Relaxed);
        self.nodes.store(Arc::new(node_array));
    }

    fn node_in_partition_map(&self, node: &Arc<Node>) -> bool {
        let map = self.partition_map.load();
        map.values().any(|partitions| {
            partitions.replicas.iter().any(|replica| {
                replica
                    .iter()
                    .any(|slot| slot.as_ref().is_some_and(|owner| owner.name() == node.name()))
            })
        })
    }

    // -----------------------------------------------------------------------
    // Snapshots & lookups
    // -----------------------------------------------------------------------

    /// Current partition-map snapshot. Stays coherent for as long as the
    /// caller holds it.
    #[must_use]
    pub fn partitions(&self) -> Arc<PartitionMap> {
        self.partition_map.load_full()
    }

    /// Current node-list snapshot.
    #[must_use]
    pub fn nodes(&self) -> Arc<Vec<Arc<Node>>> {
        self.nodes.load_full()
    }

    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes_map.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.nodes.load().is_empty() && !self.closed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Whether every node supports partition queries.
    #[must_use]
    pub fn has_partition_query(&self) -> bool {
        self.has_partition_query.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn client_policy(&self) -> &ClientPolicy {
        &self.policy
    }

    /// Completed tend iterations.
    #[must_use]
    pub fn tend_count(&self) -> u64 {
        self.tend_count.load(Ordering::Relaxed)
    }

    /// Stops the tender and closes every node.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Some(tender) = self.tend_task.lock().take() {
            tender.abort();
        }
        for node in self.nodes.load_full().iter() {
            node.close().await;
        }
        self.nodes_map.clear();
        self.install_nodes(Vec::new());
        self.partition_map.store(Arc::new(PartitionMap::new()));
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.nodes.load().len())
            .field("namespaces", &self.partition_map.load().len())
            .field("tend_count", &self.tend_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stratus_core::PARTITION_COUNT;

    use super::mock::{spawn, MockConfig};
    use super::*;

    fn test_policy() -> ClientPolicy {
        ClientPolicy {
            min_conns_per_node: 1,
            tend_interval: Duration::from_millis(50),
            ..ClientPolicy::default()
        }
    }

    #[tokio::test]
    async fn seed_discover_and_map() {
        let server = spawn(MockConfig::default()).await;
        let cluster = Cluster::new(test_policy(), &[server.host.clone()])
            .await
            .unwrap();

        assert!(cluster.is_connected());
        let nodes = cluster.nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name(), "MOCK-A");
        assert!(cluster.has_partition_query());

        let map = cluster.partitions();
        let partitions = map.get("test").expect("namespace mapped");
        assert_eq!(partitions.replica_count(), 1);
        for pid in 0..PARTITION_COUNT {
            let owner = partitions.replicas[0][pid].as_ref().expect("owner");
            assert_eq!(owner.name(), "MOCK-A");
        }

        cluster.close().await;
        assert!(cluster.is_closed());
        assert!(!cluster.is_connected());
    }

    #[tokio::test]
    async fn unreachable_seed_fails_startup() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = Host::new("127.0.0.1", listener.local_addr().unwrap().port());
        drop(listener);

        let err = Cluster::new(test_policy(), &[host]).await.unwrap_err();
        assert!(matches!(err, ClientError::ClusterSeedFailed));
    }

    #[tokio::test]
    async fn unreachable_seed_tolerated_when_configured() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = Host::new("127.0.0.1", listener.local_addr().unwrap().port());
        drop(listener);

        let policy = ClientPolicy {
            fail_if_not_connected: false,
            ..test_policy()
        };
        let cluster = Cluster::new(policy, &[host]).await.unwrap();
        assert!(!cluster.is_connected());
        cluster.close().await;
    }

    #[tokio::test]
    async fn cluster_name_mismatch_rejects_seed() {
        let server = spawn(MockConfig::default()).await;
        let policy = ClientPolicy {
            cluster_name: Some("other".to_string()),
            ..test_policy()
        };
        let err = Cluster::new(policy, &[server.host.clone()]).await.unwrap_err();
        assert!(matches!(err, ClientError::ClusterSeedFailed));
    }

    #[tokio::test]
    async fn second_seed_wins_when_first_is_down() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = Host::new("127.0.0.1", listener.local_addr().unwrap().port());
        drop(listener);
        let server = spawn(MockConfig::default()).await;

        let cluster = Cluster::new(test_policy(), &[dead, server.host.clone()])
            .await
            .unwrap();
        assert_eq!(cluster.nodes().len(), 1);
        cluster.close().await;
    }

    #[tokio::test]
    async fn tender_keeps_counting() {
        let server = spawn(MockConfig::default()).await;
        let cluster = Cluster::new(test_policy(), &[server.host.clone()])
            .await
            .unwrap();
        let initial = cluster.tend_count();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cluster.tend_count() > initial);
        cluster.close().await;
    }

    /// Policy with a tender slow enough not to interfere with assertions.
    fn slow_tend_policy() -> ClientPolicy {
        ClientPolicy {
            tend_interval: Duration::from_secs(60),
            ..test_policy()
        }
    }

    #[tokio::test]
    async fn inactive_node_is_selected_for_removal() {
        let server = spawn(MockConfig::default()).await;
        let cluster = Cluster::new(slow_tend_policy(), &[server.host.clone()])
            .await
            .unwrap();

        // Healthy node is kept.
        assert!(cluster.find_nodes_to_remove(1).is_empty());

        let nodes = cluster.nodes();
        nodes[0].close().await;
        let remove_list = cluster.find_nodes_to_remove(1);
        assert_eq!(remove_list.len(), 1);
        assert_eq!(remove_list[0].name(), "MOCK-A");
        cluster.close().await;
    }

    #[tokio::test]
    async fn removing_node_clears_partition_slots() {
        let server = spawn(MockConfig::default()).await;
        let cluster = Cluster::new(slow_tend_policy(), &[server.host.clone()])
            .await
            .unwrap();
        let node = Arc::clone(&cluster.nodes()[0]);

        cluster.remove_nodes(&[Arc::clone(&node)]).await;

        assert!(cluster.nodes().is_empty());
        assert!(cluster.node_by_name("MOCK-A").is_none());
        let map = cluster.partitions();
        let partitions = map.get("test").expect("namespace stays mapped");
        assert!(partitions.replicas[0].iter().all(Option::is_none));
        cluster.close().await;
    }

    #[tokio::test]
    async fn node_lookup_by_name() {
        let server = spawn(MockConfig::default()).await;
        let cluster = Cluster::new(test_policy(), &[server.host.clone()])
            .await
            .unwrap();
        assert!(cluster.node_by_name("MOCK-A").is_some());
        assert!(cluster.node_by_name("NOPE").is_none());
        cluster.close().await;
    }
}

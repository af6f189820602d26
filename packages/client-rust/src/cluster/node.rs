//! Per-server node: tend connection, data-path pool, generations, counters,
//! and liveness.
//!
//! A node keeps one connection reserved for control traffic so the tender
//! can still reach the server when the data-path pool is drained. All
//! counters that cross task boundaries are atomic; the pool is guarded by a
//! node-confined mutex and dials always happen outside it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::cluster::node_validator::{NodeValidator, FEATURE_PARTITION_QUERY};
use crate::cluster::partitions::{PartitionMap, PartitionParser};
use crate::cluster::peers::{PeerList, Peers};
use crate::cluster::Cluster;
use crate::errors::{ClientError, Result};
use crate::info;
use crate::net::pool::Pool;
use crate::net::{Connection, Host};
use crate::policy::ClientPolicy;

const CMD_NODE: &str = "node";
const CMD_PARTITION_GENERATION: &str = "partition-generation";
const CMD_CLUSTER_NAME: &str = "cluster-name";
const CMD_PEERS_GENERATION: &str = "peers-generation";
const CMD_SERVICES: &str = "services";
const CMD_REBALANCE_GENERATION: &str = "rebalance-generation";
const CMD_REPLICAS: &str = "replicas";

/// One server in the cluster.
pub struct Node {
    policy: Arc<ClientPolicy>,
    name: String,
    host: Host,
    features: HashSet<String>,

    /// Reserved control-traffic connection; tender only.
    tend_conn: AsyncMutex<Option<Connection>>,
    /// Data-path connections.
    pool: Mutex<Pool>,

    peers_generation: AtomicI64,
    partition_generation: AtomicI64,
    rebalance_generation: AtomicI64,

    partition_changed: AtomicBool,
    rebalance_changed: AtomicBool,
    active: AtomicBool,

    /// Consecutive tend failures.
    failures: AtomicUsize,
    /// Rolling error count within the current error-rate window.
    error_count: AtomicUsize,
    /// Peer references observed this tend.
    reference_count: AtomicUsize,
    /// Peers announced by this node's last peers refresh.
    peers_count: AtomicUsize,

    conns_opened: AtomicU64,
    conns_closed: AtomicU64,
}

impl Node {
    pub(crate) fn new(
        policy: Arc<ClientPolicy>,
        name: String,
        host: Host,
        features: HashSet<String>,
        tend_conn: Option<Connection>,
    ) -> Self {
        let pool = Pool::new(policy.min_conns_per_node, policy.max_conns_per_node);
        let opened = u64::from(tend_conn.is_some());
        Self {
            policy,
            name,
            host,
            features,
            tend_conn: AsyncMutex::new(tend_conn),
            pool: Mutex::new(pool),
            peers_generation: AtomicI64::new(-1),
            partition_generation: AtomicI64::new(-1),
            rebalance_generation: AtomicI64::new(-1),
            partition_changed: AtomicBool::new(true),
            rebalance_changed: AtomicBool::new(false),
            active: AtomicBool::new(true),
            failures: AtomicUsize::new(0),
            error_count: AtomicUsize::new(0),
            reference_count: AtomicUsize::new(0),
            peers_count: AtomicUsize::new(0),
            conns_opened: AtomicU64::new(opened),
            conns_closed: AtomicU64::new(0),
        }
    }

    pub(crate) fn from_validator(policy: Arc<ClientPolicy>, nv: NodeValidator) -> Self {
        Self::new(policy, nv.name, nv.host, nv.features, Some(nv.conn))
    }

    // -----------------------------------------------------------------------
    // Identity & state accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn host(&self) -> &Host {
        &self.host
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    #[must_use]
    pub fn has_partition_query(&self) -> bool {
        self.has_feature(FEATURE_PARTITION_QUERY)
    }

    #[must_use]
    pub fn partition_generation(&self) -> i64 {
        self.partition_generation.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn partition_changed(&self) -> bool {
        self.partition_changed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rebalance_changed(&self) -> bool {
        self.rebalance_changed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.reference_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peers_count(&self) -> usize {
        self.peers_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Open connections (pooled + checked out) and pooled count.
    #[must_use]
    pub fn connection_stats(&self) -> (usize, usize) {
        let pool = self.pool.lock();
        (pool.total_open(), pool.size())
    }

    /// Connections dialed over this node's lifetime.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.conns_opened.load(Ordering::Relaxed)
    }

    /// Connections closed over this node's lifetime.
    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.conns_closed.load(Ordering::Relaxed)
    }

    /// Forces a partition re-read on this node's next tend by invalidating
    /// its stored generation.
    pub(crate) fn force_partition_refresh(&self) {
        self.partition_generation.store(-1, Ordering::Relaxed);
    }

    pub(crate) fn set_partition_generation(&self, generation: i64) {
        self.partition_generation.store(generation, Ordering::Relaxed);
    }

    /// Tend step 1: clear per-iteration statistics.
    pub(crate) fn reset_tend_state(&self) {
        self.reference_count.store(0, Ordering::Relaxed);
        self.partition_changed.store(false, Ordering::Relaxed);
        self.rebalance_changed.store(false, Ordering::Relaxed);
    }

    pub(crate) fn reset_error_count(&self) {
        self.error_count.store(0, Ordering::Relaxed);
    }

    pub(crate) fn incr_error_count(&self) {
        if self.policy.max_error_rate > 0 {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether new connections may still be opened this window.
    #[must_use]
    pub fn error_count_within_limit(&self) -> bool {
        self.policy.max_error_rate == 0
            || self.error_count.load(Ordering::Relaxed) <= self.policy.max_error_rate
    }

    // -----------------------------------------------------------------------
    // Tend refresh
    // -----------------------------------------------------------------------

    /// Refreshes liveness and generations with one info round-trip.
    ///
    /// On failure the tend connection is closed, `failures` is incremented,
    /// and the tend is told to re-read peers.
    pub(crate) async fn refresh(&self, peers: &mut Peers) {
        let mut guard = self.tend_conn.lock().await;
        match self.refresh_inner(&mut guard, peers).await {
            Ok(()) => {
                peers.refresh_count += 1;
                self.failures.store(0, Ordering::Relaxed);
            }
            Err(err) => {
                self.close_tend_conn(&mut guard).await;
                self.failures.fetch_add(1, Ordering::Relaxed);
                peers.generation_changed = true;
                warn!(node = %self.name, error = %err, "node refresh failed");
            }
        }
    }

    async fn refresh_inner(
        &self,
        guard: &mut Option<Connection>,
        peers: &mut Peers,
    ) -> Result<()> {
        let conn = self.tend_connection(guard).await?;
        let map = info::request(
            conn,
            &[
                CMD_NODE,
                CMD_PARTITION_GENERATION,
                CMD_CLUSTER_NAME,
                CMD_PEERS_GENERATION,
                CMD_SERVICES,
                CMD_REBALANCE_GENERATION,
            ],
        )
        .await?;

        let reported = map
            .get(CMD_NODE)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ClientError::InvalidNode("node name missing from refresh".into()))?;
        if *reported != self.name {
            self.active.store(false, Ordering::Relaxed);
            return Err(ClientError::InvalidNode(format!(
                "node name changed from {} to {reported}",
                self.name
            )));
        }

        self.refresh_peers_generation(&map, peers)?;
        self.refresh_partition_generation(&map)?;
        self.refresh_rebalance_generation(&map)?;
        Ok(())
    }

    fn parse_generation(map: &HashMap<String, String>, key: &str) -> Result<i64> {
        map.get(key)
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| ClientError::InvalidNode(format!("{key} missing from refresh")))
    }

    fn refresh_peers_generation(
        &self,
        map: &HashMap<String, String>,
        peers: &mut Peers,
    ) -> Result<()> {
        let generation = Self::parse_generation(map, CMD_PEERS_GENERATION)?;
        // The stored generation is committed by refresh_peers only after
        // every announced peer resolved, so a mismatch here re-arms the
        // peers pass.
        if generation != self.peers_generation.load(Ordering::Relaxed) {
            peers.generation_changed = true;
        }
        Ok(())
    }

    fn refresh_partition_generation(&self, map: &HashMap<String, String>) -> Result<()> {
        let generation = Self::parse_generation(map, CMD_PARTITION_GENERATION)?;
        if generation != self.partition_generation.load(Ordering::Relaxed) {
            self.partition_changed.store(true, Ordering::Relaxed);
            self.partition_generation.store(generation, Ordering::Relaxed);
        }
        Ok(())
    }

    fn refresh_rebalance_generation(&self, map: &HashMap<String, String>) -> Result<()> {
        let generation = Self::parse_generation(map, CMD_REBALANCE_GENERATION)?;
        if generation != self.rebalance_generation.load(Ordering::Relaxed) {
            self.rebalance_changed.store(true, Ordering::Relaxed);
            self.rebalance_generation.store(generation, Ordering::Relaxed);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Peers refresh
    // -----------------------------------------------------------------------

    /// Re-reads this node's peers listing and validates newly announced
    /// peers, placing accepted nodes into `peers.nodes`.
    ///
    /// Skipped when this node already failed this tend. The new peers
    /// generation is committed only when every announced peer resolved, so
    /// an unreachable peer is retried next tend.
    pub(crate) async fn refresh_peers(&self, cluster: &Cluster, peers: &mut Peers) {
        if self.failures.load(Ordering::Relaxed) > 0 || !self.active() {
            return;
        }
        let mut guard = self.tend_conn.lock().await;
        match self.refresh_peers_inner(&mut guard, cluster, peers).await {
            Ok(committed_generation) => {
                if let Some(generation) = committed_generation {
                    self.peers_generation.store(generation, Ordering::Relaxed);
                }
                peers.refresh_count += 1;
            }
            Err(err) => self.refresh_failed(&mut guard, &err).await,
        }
    }

    async fn refresh_peers_inner(
        &self,
        guard: &mut Option<Connection>,
        cluster: &Cluster,
        peers: &mut Peers,
    ) -> Result<Option<i64>> {
        debug!(node = %self.name, "update peers");
        let conn = self.tend_connection(guard).await?;
        let body = info::request_raw(conn, &[self.policy.peers_command()]).await?;
        let list = PeerList::parse(body)?;
        self.peers_count.store(list.peers.len(), Ordering::Relaxed);

        let mut peers_validated = true;
        for peer in &list.peers {
            if Self::find_peer_node(cluster, peers, &peer.node_name) {
                // Node already exists; do not even dial its hosts.
                continue;
            }

            let mut node_validated = false;
            for host in &peer.hosts {
                // A host that failed this tend is not re-attempted.
                if peers.invalid_hosts.contains(host) {
                    continue;
                }
                match NodeValidator::validate(&self.policy, host).await {
                    Ok(mut nv) => {
                        if nv.name != peer.node_name {
                            warn!(
                                peer = %peer.node_name,
                                actual = %nv.name,
                                host = %host,
                                "peer node name differs from actual node"
                            );
                            if Self::find_peer_node(cluster, peers, &nv.name) {
                                nv.conn.close().await;
                                node_validated = true;
                                break;
                            }
                        }
                        let node =
                            Arc::new(Node::from_validator(Arc::clone(&self.policy), nv));
                        node.create_min_connections().await;
                        peers.nodes.insert(node.name().to_string(), node);
                        node_validated = true;
                        break;
                    }
                    Err(err) => {
                        peers.fail(host.clone());
                        warn!(host = %host, error = %err, "add node failed");
                    }
                }
            }
            if !node_validated {
                peers_validated = false;
            }
        }

        Ok(peers_validated.then_some(list.generation))
    }

    /// Looks the peer up in the cluster and in this tend's pending adds,
    /// counting the reference either way.
    fn find_peer_node(cluster: &Cluster, peers: &Peers, name: &str) -> bool {
        if let Some(node) = cluster.node_by_name(name) {
            node.reference_count.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if let Some(node) = peers.nodes.get(name) {
            node.reference_count.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    // -----------------------------------------------------------------------
    // Partition refresh
    // -----------------------------------------------------------------------

    /// Re-reads this node's partition bitmaps against `current`, returning a
    /// new map for the tender to publish when anything was decoded.
    ///
    /// Skipped when the node failed this tend, is inactive, or is an
    /// isolated node that already refreshed once this tend (an isolated
    /// seed must not pin stale partition data).
    pub(crate) async fn refresh_partitions(
        node: &Arc<Self>,
        peers: &Peers,
        current: &PartitionMap,
    ) -> Option<PartitionMap> {
        if node.failures.load(Ordering::Relaxed) > 0
            || !node.active()
            || (node.peers_count.load(Ordering::Relaxed) == 0 && peers.refresh_count > 1)
        {
            return None;
        }
        let mut guard = node.tend_conn.lock().await;
        match Self::refresh_partitions_inner(node, &mut guard, current).await {
            Ok(map) => map,
            Err(err) => {
                node.refresh_failed(&mut guard, &err).await;
                None
            }
        }
    }

    async fn refresh_partitions_inner(
        node: &Arc<Self>,
        guard: &mut Option<Connection>,
        current: &PartitionMap,
    ) -> Result<Option<PartitionMap>> {
        debug!(node = %node.name, "update partition map");
        let conn = node.tend_connection(guard).await?;
        let body = info::request_raw(conn, &[CMD_PARTITION_GENERATION, CMD_REPLICAS]).await?;
        let parsed = PartitionParser::parse(node, body, current)?;
        Ok(parsed.map)
    }

    // -----------------------------------------------------------------------
    // Tend connection plumbing
    // -----------------------------------------------------------------------

    async fn tend_connection<'a>(
        &self,
        guard: &'a mut Option<Connection>,
    ) -> Result<&'a mut Connection> {
        let conn = match guard.take() {
            Some(conn) => conn,
            None => {
                let mut conn = Connection::connect(&self.host, self.policy.conn_timeout).await?;
                conn.set_timeout(self.policy.conn_timeout);
                self.conns_opened.fetch_add(1, Ordering::Relaxed);
                conn
            }
        };
        Ok(guard.insert(conn))
    }

    async fn close_tend_conn(&self, guard: &mut Option<Connection>) {
        if let Some(mut conn) = guard.take() {
            self.conns_closed.fetch_add(1, Ordering::Relaxed);
            conn.close().await;
        }
    }

    async fn refresh_failed(&self, guard: &mut Option<Connection>, err: &ClientError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.incr_error_count();
        self.close_tend_conn(guard).await;
        warn!(node = %self.name, error = %err, "node refresh failed");
    }

    // -----------------------------------------------------------------------
    // Data-path connections
    // -----------------------------------------------------------------------

    /// Checks out a connection: pooled first, then a fresh dial while under
    /// the per-node cap and the error-rate limit.
    ///
    /// # Errors
    ///
    /// [`ClientError::MaxErrorRate`] when the window limit was exceeded,
    /// [`ClientError::NoMoreConnections`] at the cap, or the dial failure.
    pub(crate) async fn get_connection(&self, timeout: Duration) -> Result<Connection> {
        loop {
            let pooled = self.pool.lock().take();
            match pooled {
                Some(mut conn) => {
                    if conn.is_closed() {
                        self.pool.lock().release_open();
                        continue;
                    }
                    conn.set_timeout(timeout);
                    return Ok(conn);
                }
                None => break,
            }
        }

        if !self.error_count_within_limit() {
            return Err(ClientError::MaxErrorRate {
                node: self.name.clone(),
            });
        }
        if !self.pool.lock().reserve_open() {
            return Err(ClientError::NoMoreConnections {
                node: self.name.clone(),
            });
        }
        match Connection::connect(&self.host, self.policy.conn_timeout).await {
            Ok(mut conn) => {
                self.conns_opened.fetch_add(1, Ordering::Relaxed);
                conn.set_timeout(timeout);
                Ok(conn)
            }
            Err(err) => {
                self.pool.lock().release_open();
                self.incr_error_count();
                Err(err)
            }
        }
    }

    /// Returns a connection to the pool, closing it when the pool is full or
    /// the node is shutting down.
    pub(crate) async fn put_connection(&self, mut conn: Connection) {
        if self.active() && !conn.is_closed() {
            match self.pool.lock().offer(conn) {
                Ok(()) => return,
                Err(rejected) => conn = rejected,
            }
        }
        self.pool.lock().release_open();
        self.conns_closed.fetch_add(1, Ordering::Relaxed);
        conn.close().await;
    }

    /// Closes a connection that produced an error, counting it against the
    /// error-rate window.
    pub(crate) async fn close_connection_on_error(&self, mut conn: Connection) {
        self.pool.lock().release_open();
        self.conns_closed.fetch_add(1, Ordering::Relaxed);
        self.incr_error_count();
        conn.close().await;
    }

    /// Tops the pool up to the configured floor.
    pub(crate) async fn create_min_connections(&self) {
        let shortfall = {
            let pool = self.pool.lock();
            self.policy.min_conns_per_node.saturating_sub(pool.total_open())
        };
        if shortfall > 0 {
            self.create_connections(shortfall).await;
        }
    }

    async fn create_connections(&self, count: usize) {
        for _ in 0..count {
            if !self.pool.lock().reserve_open() {
                return;
            }
            match Connection::connect(&self.host, self.policy.conn_timeout).await {
                Ok(conn) => {
                    self.conns_opened.fetch_add(1, Ordering::Relaxed);
                    let offer_result = self.pool.lock().offer(conn);
                    if let Err(mut rejected) = offer_result {
                        self.pool.lock().release_open();
                        self.conns_closed.fetch_add(1, Ordering::Relaxed);
                        rejected.close().await;
                        return;
                    }
                }
                Err(err) => {
                    self.pool.lock().release_open();
                    debug!(node = %self.name, error = %err, "failed to create connection");
                    return;
                }
            }
        }
    }

    /// Called every 30 tends: trims idle connections above the floor, or
    /// tops the pool back up to it.
    pub(crate) async fn balance_connections(&self) {
        let excess = self.pool.lock().excess();
        if excess > 0 {
            self.close_idle_connections(excess.unsigned_abs()).await;
        } else if excess < 0 && self.error_count_within_limit() {
            self.create_connections(excess.unsigned_abs()).await;
        }
    }

    async fn close_idle_connections(&self, count: usize) {
        for _ in 0..count {
            let idle = self
                .pool
                .lock()
                .take_idle(self.policy.max_socket_idle_trim);
            match idle {
                Some(mut conn) => {
                    self.pool.lock().release_open();
                    self.conns_closed.fetch_add(1, Ordering::Relaxed);
                    conn.close().await;
                }
                None => return,
            }
        }
    }

    /// One-off info request on a pooled connection.
    ///
    /// # Errors
    ///
    /// Propagates connection checkout and info round-trip failures.
    pub async fn info(&self, commands: &[&str]) -> Result<HashMap<String, String>> {
        let mut conn = self.get_connection(self.policy.conn_timeout).await?;
        match info::request(&mut conn, commands).await {
            Ok(map) => {
                self.put_connection(conn).await;
                Ok(map)
            }
            Err(err) => {
                self.close_connection_on_error(conn).await;
                Err(err)
            }
        }
    }

    /// Marks the node inactive and closes every connection it owns.
    pub(crate) async fn close(&self) {
        self.active.store(false, Ordering::Relaxed);
        {
            let mut guard = self.tend_conn.lock().await;
            self.close_tend_conn(&mut guard).await;
        }
        let drained = self.pool.lock().drain();
        for mut conn in drained {
            self.pool.lock().release_open();
            self.conns_closed.fetch_add(1, Ordering::Relaxed);
            conn.close().await;
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Node {}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.host)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("active", &self.active())
            .field("failures", &self.failures())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    /// Silent TCP listener accepting any number of connections.
    async fn sink_listener() -> Host {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut sink = [0u8; 64];
                    while sock.read(&mut sink).await.is_ok_and(|n| n > 0) {}
                });
            }
        });
        Host::new("127.0.0.1", port)
    }

    fn node_with(policy: ClientPolicy, host: Host) -> Node {
        Node::new(
            Arc::new(policy),
            "BB9TEST".to_string(),
            host,
            HashSet::from([FEATURE_PARTITION_QUERY.to_string()]),
            None,
        )
    }

    #[tokio::test]
    async fn connection_checkout_reuses_pooled() {
        let host = sink_listener().await;
        let policy = ClientPolicy {
            min_conns_per_node: 0,
            max_conns_per_node: 4,
            ..ClientPolicy::default()
        };
        let node = node_with(policy, host);

        let conn = node.get_connection(Duration::from_secs(1)).await.unwrap();
        assert_eq!(node.connection_stats(), (1, 0));

        node.put_connection(conn).await;
        assert_eq!(node.connection_stats(), (1, 1));

        let _again = node.get_connection(Duration::from_secs(1)).await.unwrap();
        // No new dial: still one open connection.
        assert_eq!(node.connection_stats(), (1, 0));
    }

    #[tokio::test]
    async fn connection_cap_is_enforced() {
        let host = sink_listener().await;
        let policy = ClientPolicy {
            min_conns_per_node: 0,
            max_conns_per_node: 2,
            ..ClientPolicy::default()
        };
        let node = node_with(policy, host);

        let _c1 = node.get_connection(Duration::from_secs(1)).await.unwrap();
        let _c2 = node.get_connection(Duration::from_secs(1)).await.unwrap();
        let err = node.get_connection(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ClientError::NoMoreConnections { .. }));
    }

    #[tokio::test]
    async fn error_rate_blocks_new_connections() {
        let host = sink_listener().await;
        let policy = ClientPolicy {
            min_conns_per_node: 0,
            max_error_rate: 2,
            ..ClientPolicy::default()
        };
        let node = node_with(policy, host);

        for _ in 0..3 {
            node.incr_error_count();
        }
        assert!(!node.error_count_within_limit());
        let err = node.get_connection(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ClientError::MaxErrorRate { .. }));

        node.reset_error_count();
        assert!(node.error_count_within_limit());
        assert!(node.get_connection(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn error_count_disabled_when_rate_is_zero() {
        let host = sink_listener().await;
        let policy = ClientPolicy {
            max_error_rate: 0,
            ..ClientPolicy::default()
        };
        let node = node_with(policy, host);
        node.incr_error_count();
        assert_eq!(node.error_count(), 0);
        assert!(node.error_count_within_limit());
    }

    #[tokio::test]
    async fn balance_trims_idle_connections_to_floor() {
        let host = sink_listener().await;
        let policy = ClientPolicy {
            min_conns_per_node: 1,
            max_conns_per_node: 8,
            // Everything counts as idle immediately.
            max_socket_idle_trim: Duration::ZERO,
            ..ClientPolicy::default()
        };
        let node = node_with(policy, host);

        let mut checked_out = Vec::new();
        for _ in 0..4 {
            checked_out.push(node.get_connection(Duration::from_secs(1)).await.unwrap());
        }
        for conn in checked_out {
            node.put_connection(conn).await;
        }
        assert_eq!(node.connection_stats(), (4, 4));

        node.balance_connections().await;
        assert_eq!(node.connection_stats().0, 1);
    }

    #[tokio::test]
    async fn balance_tops_up_below_floor() {
        let host = sink_listener().await;
        let policy = ClientPolicy {
            min_conns_per_node: 3,
            max_conns_per_node: 8,
            ..ClientPolicy::default()
        };
        let node = node_with(policy, host);
        assert_eq!(node.connection_stats(), (0, 0));

        node.balance_connections().await;
        assert_eq!(node.connection_stats(), (3, 3));
    }

    #[tokio::test]
    async fn close_drains_everything() {
        let host = sink_listener().await;
        let policy = ClientPolicy {
            min_conns_per_node: 2,
            ..ClientPolicy::default()
        };
        let node = node_with(policy, host);
        node.create_min_connections().await;
        assert_eq!(node.connection_stats(), (2, 2));

        node.close().await;
        assert!(!node.active());
        assert_eq!(node.connection_stats(), (0, 0));
        assert_eq!(node.connections_opened(), 2);
        assert_eq!(node.connections_closed(), 2);
    }

    #[tokio::test]
    async fn tend_state_reset() {
        let host = sink_listener().await;
        let node = node_with(ClientPolicy::default(), host);
        assert!(node.partition_changed());

        node.reset_tend_state();
        assert!(!node.partition_changed());
        assert!(!node.rebalance_changed());
        assert_eq!(node.reference_count(), 0);
    }

    #[tokio::test]
    async fn force_partition_refresh_invalidates_generation() {
        let host = sink_listener().await;
        let node = node_with(ClientPolicy::default(), host);
        node.set_partition_generation(42);
        assert_eq!(node.partition_generation(), 42);

        node.force_partition_refresh();
        assert_eq!(node.partition_generation(), -1);
    }
}

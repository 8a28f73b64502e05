//! Redis Cluster client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use crate::cluster::cache::TopologyCache;
use crate::cluster::discovery::{Discovery, Rediscovery};
use crate::cluster::dispatcher::Dispatcher;
use crate::cluster::endpoint::{AddressTranslator, NodeEndpoint};
use crate::cluster::pool::{Connector, NodePool, PoolConfig};
use crate::cluster::slot::{slot_for_keys, SLOT_COUNT};
use crate::core::builder::ClusterClientBuilder;
use crate::core::command::{self, Cmd};
use crate::proto::frame::Frame;
use crate::{Error, Result};

struct ClientInner {
    cache: Arc<TopologyCache>,
    discovery: Arc<Discovery>,
    dispatcher: Dispatcher,
}

/// Redis Cluster client.
///
/// Routes every command to the node owning its slot and follows `MOVED`
/// and `ASK` redirects transparently. Cloning is cheap; all clones share
/// the routing table and node pools.
///
/// ```no_run
/// # async fn example() -> slotmux::Result<()> {
/// use slotmux::ClusterClient;
///
/// let client = ClusterClient::connect("127.0.0.1:7000,127.0.0.1:7001").await?;
/// client.set("{user:1}:name", "ada").await?;
/// let name = client.get("{user:1}:name").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClusterClient {
    inner: Arc<ClientInner>,
}

impl ClusterClient {
    /// Connects to a cluster with default settings.
    ///
    /// # Arguments
    ///
    /// * `addresses` - Comma-separated bootstrap nodes (e.g., "127.0.0.1:7000,127.0.0.1:7001")
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no valid address is given.
    pub async fn connect(addresses: &str) -> Result<Self> {
        ClusterClientBuilder::new().addresses(addresses).build().await
    }

    pub(crate) async fn connect_inner(
        bootstrap: Vec<NodeEndpoint>,
        connector: Arc<dyn Connector>,
        pool_config: PoolConfig,
        translator: AddressTranslator,
        max_redirects: usize,
    ) -> Result<Self> {
        let cache = Arc::new(TopologyCache::new(pool_config, connector));
        let discovery = Arc::new(Discovery::new(Arc::clone(&cache), translator.clone()));
        discovery.initialize(&bootstrap).await;

        let dispatcher = Dispatcher::new(
            Arc::clone(&cache),
            Arc::clone(&discovery),
            translator,
            max_redirects,
        );
        info!(
            nodes = cache.node_count(),
            covered_slots = cache.covered_slots(),
            "cluster client ready"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                cache,
                discovery,
                dispatcher,
            }),
        })
    }

    /// Executes any command, routed by its keys.
    ///
    /// Returns the raw reply. Error replies other than redirects come back
    /// as [`Error::Server`], [`Error::Auth`] or [`Error::ClusterDown`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientClosed`] after [`close`](Self::close), plus
    /// every routing error listed on [`Dispatcher::execute`].
    pub async fn execute(&self, cmd: Cmd) -> Result<Frame> {
        if self.is_closed() {
            return Err(Error::ClientClosed);
        }
        self.inner.dispatcher.execute(&cmd).await
    }

    /// Gets the value of a key.
    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        command::frame_to_bytes(self.execute(command::get(key)).await?)
    }

    /// Sets a key to a value.
    pub async fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        command::frame_to_status(self.execute(command::set(key, value)).await?).map(drop)
    }

    /// Sets a key to a value that expires after `expiry`.
    pub async fn set_with_expiry(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        expiry: Duration,
    ) -> Result<()> {
        let cmd = command::set_with_expiry(key, value, expiry);
        command::frame_to_status(self.execute(cmd).await?).map(drop)
    }

    /// Deletes keys; all keys must share a slot. Returns how many existed.
    pub async fn del<K: Into<Bytes>>(&self, keys: impl IntoIterator<Item = K>) -> Result<i64> {
        command::frame_to_int(self.execute(command::del(keys)).await?)
    }

    /// Counts how many of `keys` exist; all keys must share a slot.
    pub async fn exists<K: Into<Bytes>>(&self, keys: impl IntoIterator<Item = K>) -> Result<i64> {
        command::frame_to_int(self.execute(command::exists(keys)).await?)
    }

    /// Increments an integer key by one.
    pub async fn incr(&self, key: impl Into<Bytes>) -> Result<i64> {
        command::frame_to_int(self.execute(command::incr(key)).await?)
    }

    /// Increments an integer key by `amount`.
    pub async fn incr_by(&self, key: impl Into<Bytes>, amount: i64) -> Result<i64> {
        command::frame_to_int(self.execute(command::incr_by(key, amount)).await?)
    }

    /// Gets several keys at once; all keys must share a slot.
    pub async fn mget<K: Into<Bytes>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<Vec<Option<Bytes>>> {
        command::frame_to_vec_bytes(self.execute(command::mget(keys)).await?)
    }

    /// Sets several keys at once; all keys must share a slot.
    pub async fn mset<K: Into<Bytes>, V: Into<Bytes>>(
        &self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()> {
        command::frame_to_status(self.execute(command::mset(pairs)).await?).map(drop)
    }

    /// Sets a timeout on a key. Returns false if the key does not exist.
    pub async fn expire(&self, key: impl Into<Bytes>, seconds: u64) -> Result<bool> {
        command::frame_to_int(self.execute(command::expire(key, seconds)).await?).map(|n| n == 1)
    }

    /// Remaining time to live of a key in seconds (-1 no expiry, -2 missing).
    pub async fn ttl(&self, key: impl Into<Bytes>) -> Result<i64> {
        command::frame_to_int(self.execute(command::ttl(key)).await?)
    }

    /// Pings some reachable node.
    pub async fn ping(&self) -> Result<String> {
        command::frame_to_status(self.execute(command::ping()).await?)
    }

    /// Checks that `keys` share one slot and returns it, without any I/O.
    ///
    /// # Errors
    ///
    /// [`Error::CrossSlot`] if they do not, [`Error::InvalidArgument`] for
    /// an empty key list.
    pub fn validate_same_slot<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<u16> {
        slot_for_keys(keys.iter().map(AsRef::as_ref))?
            .ok_or_else(|| Error::invalid_argument("no keys given"))
    }

    /// Reloads the slot layout from the cluster.
    ///
    /// Returns immediately if a reload is already running.
    ///
    /// # Errors
    ///
    /// [`Error::NoReachableNode`] if no known node answered, and
    /// [`Error::ClientClosed`] after [`close`](Self::close).
    pub async fn refresh_topology(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ClientClosed);
        }
        match self.inner.discovery.rediscover(None).await {
            Rediscovery::Refreshed { .. } | Rediscovery::AlreadyInProgress => Ok(()),
            Rediscovery::Exhausted => Err(Error::NoReachableNode { source: None }),
        }
    }

    /// Known nodes keyed by canonical `host:port`.
    pub fn known_nodes(&self) -> HashMap<String, Arc<NodePool>> {
        self.inner.cache.nodes()
    }

    /// Number of known nodes.
    pub fn node_count(&self) -> usize {
        self.inner.cache.node_count()
    }

    /// Node currently believed to own `slot`.
    pub fn slot_owner(&self, slot: u16) -> Option<NodeEndpoint> {
        self.inner.cache.slot_owner(slot)
    }

    /// Returns true if every slot has a known owner.
    pub fn is_fully_covered(&self) -> bool {
        self.inner.cache.covered_slots() == usize::from(SLOT_COUNT)
    }

    /// Returns true after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.inner.cache.is_closed()
    }

    /// Closes every node pool and forgets the topology. Later commands, and
    /// commands still in flight that need another attempt, fail with
    /// [`Error::ClientClosed`]. Closing twice is a no-op.
    pub fn close(&self) {
        if self.inner.cache.close() {
            debug!("cluster client closed");
        }
    }
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("cache", &self.inner.cache)
            .field("max_redirects", &self.inner.dispatcher.max_redirects())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::slot::key_slot;
    use crate::testing::MockCluster;

    fn ep(port: u16) -> NodeEndpoint {
        NodeEndpoint::new("127.0.0.1", port)
    }

    /// A three-primary cluster storing values in memory.
    fn kv_cluster() -> MockCluster {
        let store = Arc::new(parking_lot::Mutex::new(HashMap::<Bytes, Bytes>::new()));
        MockCluster::new(move |_, args| {
            let mut store = store.lock();
            match args[0].as_ref() {
                b"CLUSTER" => Ok(MockCluster::cluster_slots(&[
                    (0, 5460, &ep(7000)),
                    (5461, 10922, &ep(7001)),
                    (10923, 16383, &ep(7002)),
                ])),
                b"SET" => {
                    store.insert(args[1].clone(), args[2].clone());
                    Ok(MockCluster::ok())
                }
                b"GET" => Ok(Frame::Bulk(store.get(&args[1]).cloned())),
                b"DEL" => Ok(Frame::Integer(
                    args[1..].iter().filter(|k| store.remove(*k).is_some()).count() as i64,
                )),
                b"MGET" => Ok(Frame::Array(
                    args[1..]
                        .iter()
                        .map(|k| Frame::Bulk(store.get(k).cloned()))
                        .collect(),
                )),
                _ => Ok(Frame::Error("ERR unknown command".into())),
            }
        })
    }

    async fn client(mock: &MockCluster) -> ClusterClient {
        ClusterClientBuilder::new()
            .node(ep(7000))
            .build_with_connector(mock.clone())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_loads_full_layout() {
        let mock = kv_cluster();
        let client = client(&mock).await;
        assert_eq!(client.node_count(), 3);
        assert!(client.is_fully_covered());
        assert_eq!(client.slot_owner(key_slot("foo")), Some(ep(7002)));
    }

    #[tokio::test]
    async fn test_commands_go_to_slot_owner() {
        let mock = kv_cluster();
        let client = client(&mock).await;

        client.set("foo", "bar").await.unwrap();
        assert_eq!(client.get("foo").await.unwrap(), Some(Bytes::from("bar")));
        assert_eq!(client.get("missing").await.unwrap(), None);

        let sets = mock.calls_named("SET");
        assert_eq!(sets[0].node, ep(7002));
    }

    #[tokio::test]
    async fn test_multi_key_same_slot() {
        let mock = kv_cluster();
        let client = client(&mock).await;

        client.set("{u:1}:a", "1").await.unwrap();
        client.set("{u:1}:b", "2").await.unwrap();
        let values = client.mget(["{u:1}:a", "{u:1}:b", "{u:1}:c"]).await.unwrap();
        assert_eq!(
            values,
            vec![Some(Bytes::from("1")), Some(Bytes::from("2")), None]
        );
        assert_eq!(client.del(["{u:1}:a", "{u:1}:b"]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cross_slot_rejected() {
        let mock = kv_cluster();
        let client = client(&mock).await;
        mock.clear_calls();

        let err = client.mget(["foo", "somekey"]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::CrossSlot {
                first: 12182,
                second: 11058
            }
        ));
        assert!(mock.calls().is_empty());
        assert!(client.validate_same_slot(&["foo", "somekey"]).is_err());
        assert_eq!(
            client.validate_same_slot(&["{x}1", "{x}2"]).unwrap(),
            key_slot("x")
        );
        assert!(matches!(
            client.validate_same_slot::<&str>(&[]),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_error_passes_through() {
        let mock = kv_cluster();
        let client = client(&mock).await;
        assert!(matches!(
            client.incr("counter").await,
            Err(Error::Server { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_topology() {
        let mock = kv_cluster();
        let client = client(&mock).await;
        mock.clear_calls();

        client.refresh_topology().await.unwrap();
        assert_eq!(mock.calls_named("CLUSTER").len(), 1);
        let queried = client.known_nodes().into_values().find(|p| p.idle_count() == 1);
        assert!(queried.is_some());

        for port in 7000..7003 {
            mock.set_unreachable(&ep(port), true);
        }
        assert!(matches!(
            client.refresh_topology().await,
            Err(Error::NoReachableNode { .. })
        ));
        for pool in client.known_nodes().values() {
            assert_eq!(pool.active_count(), 0);
            assert_eq!(pool.idle_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_close() {
        let mock = kv_cluster();
        let client = client(&mock).await;
        client.set("foo", "bar").await.unwrap();
        let pools: Vec<_> = client.known_nodes().into_values().collect();

        client.close();
        client.close();

        assert!(client.is_closed());
        assert!(client.known_nodes().is_empty());
        assert!(pools.iter().all(|p| p.is_closed()));
        assert!(matches!(client.get("foo").await, Err(Error::ClientClosed)));
        assert!(matches!(
            client.clone().refresh_topology().await,
            Err(Error::ClientClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_command_in_flight() {
        let slot = key_slot("foo");
        let mock = MockCluster::new(move |node, args| match (node.port(), args[0].as_ref()) {
            (_, b"CLUSTER") => Ok(MockCluster::cluster_slots(&[(0, 16383, &ep(7000))])),
            (7000, _) => Ok(MockCluster::moved(slot, &ep(7001))),
            _ => Ok(Frame::bulk("v")),
        });
        let client = client(&mock).await;
        mock.set_latency(Some(Duration::from_millis(100)));

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.get("foo").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.close();

        assert!(matches!(pending.await.unwrap(), Err(Error::ClientClosed)));
        assert!(client.known_nodes().is_empty());
        assert_eq!(client.slot_owner(slot), None);
        assert!(mock.calls_named("GET").iter().all(|c| c.node == ep(7000)));
    }
}

//! The slot routing table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::cluster::endpoint::NodeEndpoint;
use crate::cluster::pool::{Connector, NodePool, PoolConfig};
use crate::cluster::slot::SLOT_COUNT;
use crate::cluster::topology::SlotRange;
use crate::{Error, Result};

/// Both maps live under one lock: a slot entry is only meaningful while its
/// pool is registered in `nodes`. Once `closed` is set no pool is ever
/// registered again.
struct CacheState {
    nodes: HashMap<String, Arc<NodePool>>,
    slots: Vec<Option<Arc<NodePool>>>,
    closed: bool,
}

impl CacheState {
    fn empty(closed: bool) -> Self {
        Self {
            nodes: HashMap::new(),
            slots: vec![None; usize::from(SLOT_COUNT)],
            closed,
        }
    }

    /// Empties the maps, keeping the closed flag, and closes the old pools.
    fn clear(&mut self) {
        let closed = self.closed;
        let old = std::mem::replace(self, CacheState::empty(closed));
        for pool in old.nodes.into_values() {
            pool.close();
        }
    }
}

/// Thread-safe map from slots and node keys to node pools.
///
/// Lookups take the read lock; every mutation takes the write lock. The
/// lock is synchronous and never held across an `.await`, so no network
/// I/O can happen while it is held. Pools connect lazily, which makes
/// creating one under the write lock cheap.
pub struct TopologyCache {
    state: RwLock<CacheState>,
    pool_config: PoolConfig,
    connector: Arc<dyn Connector>,
}

impl TopologyCache {
    /// Creates an empty cache whose pools use `pool_config` and `connector`.
    pub fn new(pool_config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            state: RwLock::new(CacheState::empty(false)),
            pool_config,
            connector,
        }
    }

    /// Pool currently owning `slot`, if known.
    #[inline]
    pub fn pool_for_slot(&self, slot: u16) -> Option<Arc<NodePool>> {
        self.state.read().slots.get(usize::from(slot))?.clone()
    }

    /// Returns the pool for `endpoint`, creating and registering it if the
    /// node is new. Concurrent callers for the same node all get the same
    /// pool.
    ///
    /// # Errors
    ///
    /// [`Error::ClientClosed`] once the cache is closed.
    pub fn get_or_create_pool(&self, endpoint: &NodeEndpoint) -> Result<Arc<NodePool>> {
        let key = endpoint.node_key();
        if let Some(pool) = self.state.read().nodes.get(&key) {
            return Ok(Arc::clone(pool));
        }
        let mut state = self.state.write();
        Ok(Arc::clone(self.pool_entry(&mut state, key, endpoint)?))
    }

    /// Points every slot in `slots` at `endpoint`'s pool, creating the pool
    /// if needed.
    ///
    /// # Errors
    ///
    /// [`Error::ClientClosed`] once the cache is closed.
    pub fn assign_slots(
        &self,
        slots: impl IntoIterator<Item = u16>,
        endpoint: &NodeEndpoint,
    ) -> Result<Arc<NodePool>> {
        let mut state = self.state.write();
        let pool = Arc::clone(self.pool_entry(&mut state, endpoint.node_key(), endpoint)?);
        for slot in slots {
            if let Some(owner) = state.slots.get_mut(usize::from(slot)) {
                *owner = Some(Arc::clone(&pool));
            }
        }
        Ok(pool)
    }

    /// Replaces the slot table with the primaries of `ranges`.
    ///
    /// Slots not covered by `ranges` end up unowned. Known nodes are kept,
    /// since they remain valid redirect and fallback targets. Readers see
    /// either the old table or the new one.
    ///
    /// # Errors
    ///
    /// [`Error::ClientClosed`] once the cache is closed; the table is left
    /// empty.
    pub fn rebuild_from_authority(&self, ranges: &[SlotRange]) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(Error::ClientClosed);
        }
        state.slots.iter_mut().for_each(|owner| *owner = None);
        for range in ranges {
            let pool = Arc::clone(self.pool_entry(
                &mut state,
                range.master.node_key(),
                &range.master,
            )?);
            for slot in range.slots() {
                state.slots[usize::from(slot)] = Some(Arc::clone(&pool));
            }
        }
        debug!(
            ranges = ranges.len(),
            nodes = state.nodes.len(),
            "slot table rebuilt"
        );
        Ok(())
    }

    /// Closes every pool and forgets all nodes and slots.
    pub fn reset(&self) {
        self.state.write().clear();
    }

    /// Resets the cache and refuses to register pools from now on.
    ///
    /// Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.write();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.clear();
        debug!("topology cache closed");
        true
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Snapshot of all pools in random order.
    pub fn shuffled_pools(&self) -> Vec<Arc<NodePool>> {
        let mut pools: Vec<_> = self.state.read().nodes.values().cloned().collect();
        pools.shuffle(&mut rand::thread_rng());
        pools
    }

    /// Snapshot of the known nodes keyed by node key.
    pub fn nodes(&self) -> HashMap<String, Arc<NodePool>> {
        self.state.read().nodes.clone()
    }

    /// Pool registered under `node_key`.
    pub fn node(&self, node_key: &str) -> Option<Arc<NodePool>> {
        self.state.read().nodes.get(node_key).cloned()
    }

    /// Number of known nodes.
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Endpoint owning `slot`, if known.
    pub fn slot_owner(&self, slot: u16) -> Option<NodeEndpoint> {
        self.pool_for_slot(slot).map(|pool| pool.endpoint().clone())
    }

    /// Connector shared by every pool of this cache.
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// Number of slots with a known owner.
    pub fn covered_slots(&self) -> usize {
        self.state.read().slots.iter().flatten().count()
    }

    fn pool_entry<'s>(
        &self,
        state: &'s mut CacheState,
        key: String,
        endpoint: &NodeEndpoint,
    ) -> Result<&'s Arc<NodePool>> {
        if state.closed {
            return Err(Error::ClientClosed);
        }
        Ok(state.nodes.entry(key).or_insert_with(|| {
            debug!(node = %endpoint, "registering node pool");
            Arc::new(NodePool::new(
                endpoint.clone(),
                self.pool_config.clone(),
                Arc::clone(&self.connector),
            ))
        }))
    }
}

impl std::fmt::Debug for TopologyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("TopologyCache")
            .field("nodes", &state.nodes.keys().collect::<Vec<_>>())
            .field("covered_slots", &state.slots.iter().flatten().count())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCluster;

    fn cache() -> TopologyCache {
        let mock = MockCluster::new(|_, _| Ok(MockCluster::ok()));
        TopologyCache::new(PoolConfig::default(), Arc::new(mock))
    }

    fn ep(port: u16) -> NodeEndpoint {
        NodeEndpoint::new("127.0.0.1", port)
    }

    #[test]
    fn test_starts_empty() {
        let cache = cache();
        assert_eq!(cache.node_count(), 0);
        assert_eq!(cache.covered_slots(), 0);
        assert!(cache.pool_for_slot(0).is_none());
        assert!(cache.shuffled_pools().is_empty());
    }

    #[test]
    fn test_rebuild_covers_every_listed_slot() {
        let cache = cache();
        let ranges = vec![
            SlotRange::new(0, 5460, ep(7000)),
            SlotRange::new(5461, 10922, ep(7001)),
            SlotRange::new(10923, 16000, ep(7002)),
        ];
        cache.rebuild_from_authority(&ranges).unwrap();

        for range in &ranges {
            for slot in range.slots() {
                let pool = cache.pool_for_slot(slot).unwrap();
                assert_eq!(pool.endpoint(), &range.master);
            }
        }
        for slot in 16001..SLOT_COUNT {
            assert!(cache.pool_for_slot(slot).is_none());
        }
        assert_eq!(cache.node_count(), 3);
        assert_eq!(cache.covered_slots(), 16001);
    }

    #[test]
    fn test_rebuild_replaces_previous_table() {
        let cache = cache();
        cache.assign_slots([1, 2, 9000], &ep(7005)).unwrap();
        cache
            .rebuild_from_authority(&[SlotRange::new(0, 100, ep(7000))])
            .unwrap();

        assert_eq!(cache.slot_owner(1), Some(ep(7000)));
        assert!(cache.pool_for_slot(9000).is_none());
        // Still a valid target for redirects and fallback.
        assert!(cache.node("localhost:7005").is_some());
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let cache = cache();
        let a = cache.get_or_create_pool(&ep(7000)).unwrap();
        let b = cache.get_or_create_pool(&NodeEndpoint::new("localhost", 7000)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.node_count(), 1);
    }

    #[test]
    fn test_concurrent_get_or_create_yields_one_pool() {
        let cache = Arc::new(cache());
        let barrier = Arc::new(std::sync::Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_create_pool(&ep(7000)).unwrap()
                })
            })
            .collect();

        let pools: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
        assert_eq!(cache.node_count(), 1);
    }

    #[test]
    fn test_assign_slots_overwrites_and_is_idempotent() {
        let cache = cache();
        cache
            .rebuild_from_authority(&[SlotRange::new(0, 16383, ep(7000))])
            .unwrap();

        cache.assign_slots([42], &ep(7001)).unwrap();
        let once: Vec<_> = (0..SLOT_COUNT).map(|s| cache.slot_owner(s)).collect();
        cache.assign_slots([42], &ep(7001)).unwrap();
        let twice: Vec<_> = (0..SLOT_COUNT).map(|s| cache.slot_owner(s)).collect();

        assert_eq!(once, twice);
        assert_eq!(cache.slot_owner(42), Some(ep(7001)));
        assert_eq!(cache.slot_owner(41), Some(ep(7000)));
        assert_eq!(cache.node_count(), 2);
    }

    #[test]
    fn test_every_routed_pool_is_registered() {
        let cache = cache();
        cache
            .rebuild_from_authority(&[
                SlotRange::new(0, 10, ep(7000)),
                SlotRange::new(11, 20, ep(7001)),
            ])
            .unwrap();
        cache.assign_slots([5, 30], &ep(7002)).unwrap();

        let nodes = cache.nodes();
        for slot in 0..SLOT_COUNT {
            if let Some(pool) = cache.pool_for_slot(slot) {
                let registered = &nodes[&pool.endpoint().node_key()];
                assert!(Arc::ptr_eq(registered, &pool));
            }
        }
    }

    #[test]
    fn test_reset_closes_pools() {
        let cache = cache();
        let pool = cache.assign_slots([1], &ep(7000)).unwrap();
        cache.reset();

        assert!(pool.is_closed());
        assert_eq!(cache.node_count(), 0);
        assert!(cache.pool_for_slot(1).is_none());
    }

    #[test]
    fn test_closed_cache_registers_nothing() {
        let cache = cache();
        let pool = cache.assign_slots([1], &ep(7000)).unwrap();
        assert!(cache.close());
        assert!(!cache.close());

        assert!(pool.is_closed());
        assert!(matches!(
            cache.assign_slots([1], &ep(7001)),
            Err(Error::ClientClosed)
        ));
        assert!(matches!(
            cache.get_or_create_pool(&ep(7000)),
            Err(Error::ClientClosed)
        ));
        assert!(matches!(
            cache.rebuild_from_authority(&[SlotRange::new(0, 16383, ep(7002))]),
            Err(Error::ClientClosed)
        ));
        cache.reset();
        assert!(cache.is_closed());
        assert_eq!(cache.node_count(), 0);
        assert_eq!(cache.covered_slots(), 0);
    }

    #[test]
    fn test_shuffled_pools_is_a_snapshot_of_all_nodes() {
        let cache = cache();
        for port in 7000..7006 {
            cache.get_or_create_pool(&ep(port)).unwrap();
        }
        let mut ports: Vec<u16> = cache
            .shuffled_pools()
            .iter()
            .map(|p| p.endpoint().port())
            .collect();
        ports.sort_unstable();
        assert_eq!(ports, (7000..7006).collect::<Vec<_>>());
    }
}

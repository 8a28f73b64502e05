//! Topology discovery: fetching the slot layout and applying it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::cluster::cache::TopologyCache;
use crate::cluster::commands;
use crate::cluster::endpoint::{AddressTranslator, NodeEndpoint};
use crate::cluster::pool::NodePool;
use crate::cluster::topology::{ClusterTopology, SlotRange};
use crate::proto::frame::Frame;
use crate::Result;

/// Result of a [`Discovery::rediscover`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rediscovery {
    /// The slot table was rebuilt from `node`'s answer.
    Refreshed {
        /// Node that answered `CLUSTER SLOTS`.
        node: NodeEndpoint,
    },
    /// Another caller is already rediscovering; nothing was queried.
    AlreadyInProgress,
    /// No known node answered. The table is unchanged.
    Exhausted,
}

/// Loads the slot layout from the cluster into a [`TopologyCache`].
///
/// At most one rediscovery runs at a time per `Discovery`; callers that
/// arrive while one is in flight return immediately.
#[derive(Debug)]
pub struct Discovery {
    cache: Arc<TopologyCache>,
    translator: AddressTranslator,
    rediscovering: AtomicBool,
}

impl Discovery {
    /// Creates a discovery bound to `cache`.
    ///
    /// # Arguments
    ///
    /// * `cache` - Routing table to update
    /// * `translator` - Applied to every primary address reported by the cluster
    pub fn new(cache: Arc<TopologyCache>, translator: AddressTranslator) -> Self {
        Self {
            cache,
            translator,
            rediscovering: AtomicBool::new(false),
        }
    }

    /// The cache this discovery updates.
    pub fn cache(&self) -> &Arc<TopologyCache> {
        &self.cache
    }

    /// Returns true while a rediscovery pass is running.
    pub fn is_rediscovering(&self) -> bool {
        self.rediscovering.load(Ordering::Acquire)
    }

    /// Initial pass over the bootstrap nodes.
    ///
    /// Each node is tried in order over a temporary connection that is not
    /// added to any pool. The first good answer resets the cache and
    /// rebuilds it, so unreachable bootstrap nodes never become known nodes.
    /// If every node fails, the bootstrap nodes are registered as they are
    /// so later commands and rediscovery have somewhere to start.
    ///
    /// Returns true if a slot layout was loaded.
    #[instrument(skip_all, level = "debug", fields(bootstrap = bootstrap.len()))]
    pub async fn initialize(&self, bootstrap: &[NodeEndpoint]) -> bool {
        for endpoint in bootstrap {
            let loaded = self.query_bootstrap(endpoint).await.and_then(|ranges| {
                self.cache.reset();
                self.cache.rebuild_from_authority(&ranges)?;
                Ok(ranges.len())
            });
            match loaded {
                Ok(ranges) => {
                    info!(node = %endpoint, ranges, "initial topology loaded");
                    return true;
                }
                Err(e) => warn!(node = %endpoint, error = %e, "bootstrap node failed"),
            }
        }

        warn!("no bootstrap node returned a slot layout, routing starts from bootstrap nodes");
        for endpoint in bootstrap {
            if let Err(e) = self.cache.get_or_create_pool(endpoint) {
                warn!(node = %endpoint, error = %e, "bootstrap node not registered");
            }
        }
        false
    }

    /// Rebuilds the slot table from the first node that answers.
    ///
    /// `preferred` (typically the last node that responded to the caller)
    /// is asked first, then every known node in random order. Connections
    /// used for failed queries go back to (or are discarded by) their pool.
    #[instrument(skip_all, level = "debug")]
    pub async fn rediscover(&self, preferred: Option<Arc<NodePool>>) -> Rediscovery {
        let Some(_guard) = RediscoveryGuard::try_acquire(&self.rediscovering) else {
            debug!("rediscovery already in progress");
            return Rediscovery::AlreadyInProgress;
        };

        if let Some(pool) = &preferred {
            match self.refresh_from(pool).await {
                Ok(()) => {
                    return Rediscovery::Refreshed {
                        node: pool.endpoint().clone(),
                    }
                }
                Err(e) => warn!(node = %pool.endpoint(), error = %e, "preferred node failed"),
            }
        }

        for pool in self.cache.shuffled_pools() {
            if preferred.as_ref().is_some_and(|p| Arc::ptr_eq(p, &pool)) {
                continue;
            }
            match self.refresh_from(&pool).await {
                Ok(()) => {
                    return Rediscovery::Refreshed {
                        node: pool.endpoint().clone(),
                    }
                }
                Err(e) => debug!(node = %pool.endpoint(), error = %e, "rediscovery candidate failed"),
            }
        }

        warn!("rediscovery found no reachable node");
        Rediscovery::Exhausted
    }

    async fn refresh_from(&self, pool: &Arc<NodePool>) -> Result<()> {
        let reply = {
            let mut conn = pool.acquire().await?;
            conn.request(&commands::cluster_slots().into_frame()).await?
        };
        let ranges = self.parse(reply, pool.endpoint())?;
        self.cache.rebuild_from_authority(&ranges)?;
        info!(node = %pool.endpoint(), ranges = ranges.len(), "topology refreshed");
        Ok(())
    }

    async fn query_bootstrap(&self, endpoint: &NodeEndpoint) -> Result<Vec<SlotRange>> {
        let mut conn = self.cache.connector().connect(endpoint).await?;
        let reply = conn
            .request(&commands::cluster_slots().into_frame())
            .await?;
        self.parse(reply, endpoint)
    }

    fn parse(&self, reply: Frame, from: &NodeEndpoint) -> Result<Vec<SlotRange>> {
        let mut ranges = ClusterTopology::from_cluster_slots(reply, from)?.slot_ranges;
        for range in &mut ranges {
            range.master = self.translator.translate(range.master.clone());
        }
        Ok(ranges)
    }
}

/// Holds the `rediscovering` flag; clears it when dropped, including when
/// the owning future is cancelled.
struct RediscoveryGuard<'a>(&'a AtomicBool);

impl<'a> RediscoveryGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RediscoveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

//! Redirect-aware command execution.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::cluster::cache::TopologyCache;
use crate::cluster::commands;
use crate::cluster::discovery::Discovery;
use crate::cluster::endpoint::{AddressTranslator, NodeEndpoint};
use crate::cluster::errors::{classify, RedirectionSignal};
use crate::cluster::pool::NodePool;
use crate::core::command::{self, Cmd};
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// Where the next attempt goes.
enum Route {
    /// The slot owner from the cache, or a fallback node.
    Owner,
    /// One-shot `ASKING` attempt on a migration target.
    Asking(NodeEndpoint),
}

/// Runs commands against the node owning their slot, following `MOVED`
/// and `ASK` redirects and recovering from unreachable nodes, within a
/// fixed attempt budget.
#[derive(Debug)]
pub struct Dispatcher {
    cache: Arc<TopologyCache>,
    discovery: Arc<Discovery>,
    translator: AddressTranslator,
    max_redirects: usize,
}

impl Dispatcher {
    /// Creates a dispatcher.
    ///
    /// # Arguments
    ///
    /// * `cache` - Routing table, shared with `discovery`
    /// * `discovery` - Used to rebuild the table after connection failures
    /// * `translator` - Applied to redirect targets
    /// * `max_redirects` - Attempts per command (at least 1)
    pub fn new(
        cache: Arc<TopologyCache>,
        discovery: Arc<Discovery>,
        translator: AddressTranslator,
        max_redirects: usize,
    ) -> Self {
        Self {
            cache,
            discovery,
            translator,
            max_redirects: max_redirects.max(1),
        }
    }

    /// Attempts allowed per command.
    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// Executes `cmd` on the node owning its slot.
    ///
    /// # Errors
    ///
    /// - [`Error::CrossSlot`] before any I/O if the keys span several slots
    /// - [`Error::TooManyRedirections`] if the budget ran out after at least
    ///   one redirect
    /// - [`Error::ClusterUnavailable`] if it ran out on connection failures
    /// - [`Error::NoReachableNode`] if no owner is known and no node answers
    /// - [`Error::ClientClosed`] once the cache is closed, even mid-command
    /// - server, auth and protocol errors unchanged
    #[instrument(skip_all, level = "debug", fields(command = %cmd.name()))]
    pub async fn execute(&self, cmd: &Cmd) -> Result<Frame> {
        let slot = cmd.slot()?;
        let frame = cmd.to_frame();

        let mut route = Route::Owner;
        let mut redirected = false;
        let mut last_error: Option<Error> = None;
        let mut last_responsive: Option<Arc<NodePool>> = None;

        for attempt in 1..=self.max_redirects {
            if self.cache.is_closed() {
                return Err(Error::ClientClosed);
            }
            let (pool, asking) = match std::mem::replace(&mut route, Route::Owner) {
                Route::Asking(target) => (self.cache.get_or_create_pool(&target)?, true),
                Route::Owner => (self.owner_pool(slot).await?, false),
            };
            debug!(attempt, node = %pool.endpoint(), asking, "sending");

            match self.attempt(&pool, &frame, asking).await? {
                RedirectionSignal::Ok(reply) => return Ok(reply),
                RedirectionSignal::Moved { slot, target } => {
                    let target = self.translator.translate(target);
                    debug!(slot, target = %target, "MOVED");
                    self.cache.assign_slots([slot], &target)?;
                    redirected = true;
                    last_responsive = Some(pool);
                    last_error = Some(Error::Moved {
                        slot,
                        address: target.to_string(),
                    });
                }
                RedirectionSignal::Ask { slot, target } => {
                    let target = self.translator.translate(target);
                    debug!(slot, target = %target, "ASK");
                    redirected = true;
                    last_responsive = Some(pool);
                    last_error = Some(Error::Ask {
                        slot,
                        address: target.to_string(),
                    });
                    route = Route::Asking(target);
                }
                RedirectionSignal::ConnectionFailure(e) => {
                    warn!(node = %pool.endpoint(), error = %e, "connection failure, rediscovering");
                    last_error = Some(e);
                    self.discovery.rediscover(last_responsive.clone()).await;
                }
            }
        }

        let attempts = self.max_redirects;
        let source = Box::new(
            last_error.unwrap_or_else(|| Error::protocol("command was never attempted")),
        );
        if redirected {
            Err(Error::TooManyRedirections { attempts, source })
        } else {
            Err(Error::ClusterUnavailable { attempts, source })
        }
    }

    /// Sends `frame` on a connection from `pool`, preceded by `ASKING` when
    /// following an `ASK` redirect. The connection goes back to the pool
    /// (or is discarded) before this returns.
    async fn attempt(
        &self,
        pool: &Arc<NodePool>,
        frame: &Frame,
        asking: bool,
    ) -> Result<RedirectionSignal> {
        let mut conn = match pool.acquire().await {
            Ok(conn) => conn,
            Err(e) if e.is_connectivity() => return Ok(RedirectionSignal::ConnectionFailure(e)),
            Err(e) => return Err(e),
        };

        if asking {
            let ack = conn.request(&commands::asking().into_frame()).await;
            match classify(ack, pool.endpoint())? {
                RedirectionSignal::Ok(_) => {}
                other => return Ok(other),
            }
        }

        let reply = conn.request(frame).await;
        classify(reply, pool.endpoint())
    }

    /// Owner of `slot` from the table. An unowned slot triggers one
    /// rediscovery before falling back to any live node; keyless commands
    /// go straight to the fallback.
    async fn owner_pool(&self, slot: Option<u16>) -> Result<Arc<NodePool>> {
        let Some(slot) = slot else {
            return self.fallback_pool().await;
        };
        if let Some(pool) = self.cache.pool_for_slot(slot) {
            return Ok(pool);
        }
        if self.cache.node_count() > 0 {
            debug!(slot, "slot has no known owner, rediscovering");
            self.discovery.rediscover(None).await;
            if let Some(pool) = self.cache.pool_for_slot(slot) {
                return Ok(pool);
            }
        }
        self.fallback_pool().await
    }

    /// Picks any node that answers `PING`, for commands whose slot has no
    /// known owner (or that carry no key).
    async fn fallback_pool(&self) -> Result<Arc<NodePool>> {
        if self.cache.is_closed() {
            return Err(Error::ClientClosed);
        }
        let mut first_failure: Option<Error> = None;
        for pool in self.cache.shuffled_pools() {
            match ping(&pool).await {
                Ok(()) => {
                    debug!(node = %pool.endpoint(), "using fallback node");
                    return Ok(pool);
                }
                Err(e) => {
                    debug!(node = %pool.endpoint(), error = %e, "fallback candidate failed");
                    first_failure.get_or_insert(e);
                }
            }
        }
        Err(Error::NoReachableNode {
            source: first_failure.map(Box::new),
        })
    }
}

async fn ping(pool: &Arc<NodePool>) -> Result<()> {
    let mut conn = pool.acquire().await?;
    match conn.request(&command::ping().into_frame()).await? {
        Frame::Simple(s) if s == "PONG" => Ok(()),
        Frame::Error(message) => Err(Error::Server { message }),
        other => Err(Error::protocol(format!("unexpected PING reply {other:?}"))),
    }
}

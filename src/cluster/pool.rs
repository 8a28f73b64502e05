//! Per-node connection pools.
//!
//! A [`NodePool`] owns a bounded set of connections to one node. Connections
//! are established lazily on first use, so creating a pool never touches the
//! network and is safe under the topology write lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::cluster::endpoint::NodeEndpoint;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// One established connection to a node.
///
/// Implemented by the TCP connection and by test doubles.
pub trait NodeConnection: Send {
    /// Sends one request frame and waits for its reply.
    fn request<'a>(&'a mut self, frame: &'a Frame) -> BoxFuture<'a, Result<Frame>>;
}

/// Opens connections to nodes.
///
/// The connector is the seam between routing and the network; swap it to
/// run the whole client against a scripted cluster.
pub trait Connector: Send + Sync + 'static {
    /// Connects to `endpoint` and completes any handshake.
    fn connect<'a>(
        &'a self,
        endpoint: &'a NodeEndpoint,
    ) -> BoxFuture<'a, Result<Box<dyn NodeConnection>>>;
}

/// Configuration for node pools.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of connections per node.
    pub max_connections_per_node: usize,
    /// How long [`NodePool::acquire`] waits for a free connection.
    pub wait_timeout: Duration,
}

impl PoolConfig {
    /// Creates a pool configuration.
    pub fn new(max_connections_per_node: usize, wait_timeout: Duration) -> Self {
        Self {
            max_connections_per_node,
            wait_timeout,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_node: 8,
            wait_timeout: Duration::from_secs(2),
        }
    }
}

/// Bounded pool of connections to a single node.
pub struct NodePool {
    endpoint: NodeEndpoint,
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn NodeConnection>>>,
    closed: AtomicBool,
}

impl NodePool {
    /// Creates an empty pool. No connection is opened until
    /// [`acquire`](NodePool::acquire) needs one.
    pub fn new(endpoint: NodeEndpoint, config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        let permits = Arc::new(Semaphore::new(
            config.max_connections_per_node.min(Semaphore::MAX_PERMITS),
        ));
        Self {
            endpoint,
            config,
            connector,
            permits,
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Node this pool connects to.
    #[inline]
    pub fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    /// Takes a connection, opening a new one if none is idle.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolExhausted`] if no slot frees up within the wait timeout
    /// - [`Error::PoolClosed`] if the pool is closed
    /// - connect errors from the [`Connector`]
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let waited = self.config.wait_timeout;
        let permit =
            match tokio::time::timeout(waited, Arc::clone(&self.permits).acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(self.closed_error()),
                Err(_) => {
                    return Err(Error::PoolExhausted {
                        node: self.endpoint.node_key(),
                        waited,
                    })
                }
            };

        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!(node = %self.endpoint, "opening new connection");
                self.connector.connect(&self.endpoint).await?
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(self),
            conn: Some(conn),
            broken: false,
            _permit: permit,
        })
    }

    /// Closes the pool: idle connections are dropped and waiters fail with
    /// [`Error::PoolClosed`]. Connections still checked out are dropped when
    /// returned.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(node = %self.endpoint, "closing pool");
            self.permits.close();
            self.idle.lock().clear();
        }
    }

    /// Returns true once [`close`](NodePool::close) was called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Connections ready for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Connections currently checked out.
    pub fn active_count(&self) -> usize {
        self.config
            .max_connections_per_node
            .min(Semaphore::MAX_PERMITS)
            .saturating_sub(self.permits.available_permits())
    }

    fn closed_error(&self) -> Error {
        Error::PoolClosed {
            node: self.endpoint.node_key(),
        }
    }
}

impl fmt::Debug for NodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePool")
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .field("idle", &self.idle_count())
            .field("active", &self.active_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A connection checked out of a [`NodePool`].
///
/// Dropping it returns the connection to the pool, unless a request on it
/// failed or was cancelled halfway, in which case it is discarded.
pub struct PooledConnection {
    pool: Arc<NodePool>,
    conn: Option<Box<dyn NodeConnection>>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Sends one request on this connection.
    pub async fn request(&mut self, frame: &Frame) -> Result<Frame> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(self.pool.closed_error());
        };
        // Stays set if the future is dropped mid-request.
        self.broken = true;
        let result = conn.request(frame).await;
        self.broken = match &result {
            Ok(_) => false,
            Err(e) => {
                e.is_connectivity() || matches!(e, Error::Decode { .. } | Error::Protocol { .. })
            }
        };
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.broken || self.pool.is_closed() {
                debug!(node = %self.pool.endpoint, "discarding connection");
            } else {
                self.pool.idle.lock().push(conn);
            }
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("node", &self.pool.endpoint)
            .field("broken", &self.broken)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command;
    use crate::testing::MockCluster;

    fn ping() -> Frame {
        command::ping().into_frame()
    }

    fn pool(mock: &MockCluster, max: usize) -> Arc<NodePool> {
        Arc::new(NodePool::new(
            NodeEndpoint::new("127.0.0.1", 7000),
            PoolConfig::new(max, Duration::from_millis(50)),
            Arc::new(mock.clone()),
        ))
    }

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections_per_node, 8);
        assert_eq!(config.wait_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_new_pool_does_not_connect() {
        let mock = MockCluster::new(|_, _| Ok(MockCluster::ok()));
        let pool = pool(&mock, 2);
        assert_eq!(mock.connect_count(), 0);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_is_reused() {
        let mock = MockCluster::new(|_, _| Ok(MockCluster::ok()));
        let pool = pool(&mock, 2);

        for _ in 0..3 {
            let mut conn = pool.acquire().await.unwrap();
            let reply = conn.request(&ping()).await.unwrap();
            assert_eq!(reply, Frame::Simple("PONG".into()));
            assert_eq!(pool.active_count(), 1);
        }

        assert_eq!(mock.connect_count(), 1);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_times_out() {
        let mock = MockCluster::new(|_, _| Ok(MockCluster::ok()));
        let pool = pool(&mock, 1);

        let _held = pool.acquire().await.unwrap();
        match pool.acquire().await {
            Err(Error::PoolExhausted { node, waited }) => {
                assert_eq!(node, "localhost:7000");
                assert_eq!(waited, Duration::from_millis(50));
            }
            other => panic!("expected PoolExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_sized_pool_is_always_exhausted() {
        let mock = MockCluster::new(|_, _| Ok(MockCluster::ok()));
        let pool = pool(&mock, 0);
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { .. }));
        assert!(err.is_connectivity());
        assert_eq!(mock.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_connection_is_discarded() {
        let mock = MockCluster::new(|_, _| Ok(MockCluster::ok()));
        let pool = pool(&mock, 1);

        {
            let mut conn = pool.acquire().await.unwrap();
            mock.set_unreachable(pool.endpoint(), true);
            assert!(conn.request(&ping()).await.is_err());
        }
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);

        mock.set_unreachable(pool.endpoint(), false);
        let mut conn = pool.acquire().await.unwrap();
        assert!(conn.request(&ping()).await.is_ok());
        assert_eq!(mock.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_server_error_keeps_connection() {
        let mock = MockCluster::new(|_, _| Err(Error::Server { message: "ERR".into() }));
        let pool = pool(&mock, 1);
        {
            let mut conn = pool.acquire().await.unwrap();
            assert!(conn.request(&command::get("k").into_frame()).await.is_err());
        }
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_close() {
        let mock = MockCluster::new(|_, _| Ok(MockCluster::ok()));
        let pool = pool(&mock, 2);

        let held = pool.acquire().await.unwrap();
        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.idle_count(), 1);

        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(
            pool.acquire().await,
            Err(Error::PoolClosed { .. })
        ));

        drop(held);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_releases_permit() {
        let mock = MockCluster::new(|_, _| Ok(MockCluster::ok()));
        let pool = pool(&mock, 1);
        mock.set_unreachable(pool.endpoint(), true);

        assert!(pool.acquire().await.unwrap_err().is_connectivity());
        assert_eq!(pool.active_count(), 0);
    }
}

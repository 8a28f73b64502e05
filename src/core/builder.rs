use std::sync::Arc;
use std::time::Duration;

use crate::cluster::endpoint::{AddressTranslator, NodeEndpoint};
use crate::cluster::pool::{Connector, PoolConfig};
use crate::cluster::ClusterClient;
use crate::core::connection::TcpConnector;
use crate::core::ConnectionConfig;
use crate::{Error, Result};

const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Builder for configuring and creating a [`ClusterClient`].
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use slotmux::ClusterClientBuilder;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClusterClientBuilder::new()
///     .addresses("127.0.0.1:7000,127.0.0.1:7001")
///     .password("secret")
///     .max_connections_per_node(16)
///     .pool_wait_timeout(Duration::from_millis(500))
///     .max_redirects(5)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClusterClientBuilder {
    nodes: Vec<String>,
    username: Option<String>,
    password: Option<String>,
    client_name: Option<String>,
    connection_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    max_connections_per_node: Option<usize>,
    pool_wait_timeout: Option<Duration>,
    max_redirects: Option<usize>,
    translator: AddressTranslator,
}

impl ClusterClientBuilder {
    /// Creates a new [`ClusterClientBuilder`] instance.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one bootstrap node.
    #[inline]
    pub fn node(mut self, node: NodeEndpoint) -> Self {
        self.nodes.push(node.socket_address());
        self
    }

    /// Adds several bootstrap nodes.
    #[inline]
    pub fn nodes(mut self, nodes: impl IntoIterator<Item = NodeEndpoint>) -> Self {
        self.nodes
            .extend(nodes.into_iter().map(|n| n.socket_address()));
        self
    }

    /// Adds bootstrap nodes from a comma-separated address list.
    ///
    /// # Arguments
    ///
    /// * `addresses` - e.g. `"redis://127.0.0.1:7000, 127.0.0.1:7001"`
    #[inline]
    pub fn addresses(mut self, addresses: &str) -> Self {
        self.nodes.extend(
            addresses
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        );
        self
    }

    /// Sets the ACL username.
    #[inline]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password for authentication.
    #[inline]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the client connection name.
    ///
    /// # Arguments
    ///
    /// * `name` - Client name displayed in `CLIENT LIST`
    #[inline]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Sets the connection timeout (default 2s).
    #[inline]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the read timeout for replies (default 2s).
    #[inline]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Sets the write timeout for requests (default 2s).
    #[inline]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Sets the pool size per node (default 8).
    #[inline]
    pub fn max_connections_per_node(mut self, max: usize) -> Self {
        self.max_connections_per_node = Some(max);
        self
    }

    /// Sets how long a command waits for a pooled connection (default 2s).
    #[inline]
    pub fn pool_wait_timeout(mut self, timeout: Duration) -> Self {
        self.pool_wait_timeout = Some(timeout);
        self
    }

    /// Sets the number of attempts per command, redirects included
    /// (default 5).
    #[inline]
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = Some(max);
        self
    }

    /// Remaps node addresses advertised by the cluster.
    #[inline]
    pub fn address_translator<F>(mut self, f: F) -> Self
    where
        F: Fn(&NodeEndpoint) -> NodeEndpoint + Send + Sync + 'static,
    {
        self.translator = AddressTranslator::new(f);
        self
    }

    /// Connection settings this builder would use.
    pub fn connection_config(&self) -> ConnectionConfig {
        let defaults = ConnectionConfig::default();
        ConnectionConfig {
            connect_timeout: self.connection_timeout.unwrap_or(defaults.connect_timeout),
            read_timeout: self.read_timeout.unwrap_or(defaults.read_timeout),
            write_timeout: self.write_timeout.unwrap_or(defaults.write_timeout),
            username: self.username.clone(),
            password: self.password.clone(),
            client_name: self.client_name.clone(),
        }
    }

    /// Pool settings this builder would use.
    pub fn pool_config(&self) -> PoolConfig {
        let defaults = PoolConfig::default();
        PoolConfig::new(
            self.max_connections_per_node
                .unwrap_or(defaults.max_connections_per_node),
            self.pool_wait_timeout.unwrap_or(defaults.wait_timeout),
        )
    }

    /// Connects over TCP and loads the cluster layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no node is set, an address is
    /// malformed or `max_redirects` is zero.
    pub async fn build(self) -> Result<ClusterClient> {
        let connector = TcpConnector::new(self.connection_config());
        self.build_with_connector(connector).await
    }

    /// Like [`build`](Self::build), but opens connections with `connector`.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub async fn build_with_connector<C: Connector>(self, connector: C) -> Result<ClusterClient> {
        let bootstrap = self.bootstrap_nodes()?;
        let max_redirects = match self.max_redirects {
            Some(0) => return Err(Error::invalid_argument("max_redirects must be at least 1")),
            Some(n) => n,
            None => DEFAULT_MAX_REDIRECTS,
        };
        ClusterClient::connect_inner(
            bootstrap,
            Arc::new(connector),
            self.pool_config(),
            self.translator,
            max_redirects,
        )
        .await
    }

    fn bootstrap_nodes(&self) -> Result<Vec<NodeEndpoint>> {
        if self.nodes.is_empty() {
            return Err(Error::invalid_argument("at least one node address is required"));
        }
        self.nodes.iter().map(|a| NodeEndpoint::parse(a)).collect()
    }
}

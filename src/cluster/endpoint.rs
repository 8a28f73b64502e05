//! Node addresses and their canonical identity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use url::{Host, Url};

use crate::{Error, Result};

const DEFAULT_PORT: u16 = 6379;
const CANONICAL_LOOPBACK: &str = "localhost";

/// Address of one cluster node.
///
/// The host is kept as given (so the client connects to exactly what it was
/// told), but equality, hashing and [`node_key`](NodeEndpoint::node_key) use
/// the canonical host, so `127.0.0.1:7000`, `[::1]:7000` and
/// `localhost:7000` are the same node.
#[derive(Debug, Clone)]
pub struct NodeEndpoint {
    host: String,
    port: u16,
}

impl NodeEndpoint {
    /// Creates an endpoint from a host and port.
    ///
    /// # Arguments
    ///
    /// * `host` - Hostname or IP literal (IPv6 without brackets)
    /// * `port` - TCP port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a bootstrap address.
    ///
    /// Accepts `host:port`, `[v6]:port` and `redis://host:port`. The port
    /// defaults to 6379.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for anything else.
    ///
    /// ```
    /// use slotmux::NodeEndpoint;
    ///
    /// let a = NodeEndpoint::parse("127.0.0.1:7000").unwrap();
    /// let b = NodeEndpoint::parse("redis://localhost:7000").unwrap();
    /// assert_eq!(a, b);
    /// assert_eq!(a.node_key(), "localhost:7000");
    /// ```
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::invalid_argument("empty node address"));
        }
        let url = if address.contains("://") {
            Url::parse(address)
        } else {
            Url::parse(&format!("redis://{address}"))
        }
        .map_err(|e| Error::invalid_argument(format!("invalid node address {address:?}: {e}")))?;

        if url.scheme() != "redis" {
            return Err(Error::invalid_argument(format!(
                "unsupported scheme {:?} in {address:?}, expected redis://",
                url.scheme()
            )));
        }

        let host = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => {
                return Err(Error::invalid_argument(format!(
                    "missing host in {address:?}"
                )))
            }
        };

        Ok(Self::new(host, url.port().unwrap_or(DEFAULT_PORT)))
    }

    /// Parses the `host:port` part of a `MOVED`/`ASK` reply.
    ///
    /// The last `:` separates the port, so bare IPv6 literals work. An empty
    /// host means the node that sent the redirect.
    pub fn from_redirect(address: &str, replying: &NodeEndpoint) -> Option<Self> {
        let (host, port) = address.rsplit_once(':')?;
        let port = port.parse().ok()?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            Some(Self::new(replying.host.clone(), port))
        } else {
            Some(Self::new(host, port))
        }
    }

    /// Host as configured or advertised.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Canonical `host:port` identity used as the node-pool key.
    pub fn node_key(&self) -> String {
        join(&canonical_host(&self.host), self.port)
    }

    /// Address string suitable for [`tokio::net::TcpStream::connect`].
    pub fn socket_address(&self) -> String {
        join(&self.host, self.port)
    }
}

impl PartialEq for NodeEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && canonical_host(&self.host) == canonical_host(&other.host)
    }
}

impl Eq for NodeEndpoint {}

impl Hash for NodeEndpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        canonical_host(&self.host).hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.socket_address())
    }
}

/// Maps the loopback spellings onto one name and lowercases the rest.
pub fn canonical_host(host: &str) -> String {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    match host.to_ascii_lowercase().as_str() {
        "127.0.0.1" | "::1" | "0:0:0:0:0:0:0:1" | "localhost" => CANONICAL_LOOPBACK.to_string(),
        other => other.to_string(),
    }
}

fn join(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

type TranslateFn = dyn Fn(&NodeEndpoint) -> NodeEndpoint + Send + Sync;

/// Optional remapping of node addresses advertised by the cluster.
///
/// Clusters behind NAT or port forwarding advertise addresses the client
/// cannot reach. The translator is applied to every primary returned by
/// `CLUSTER SLOTS` and to every redirect target.
///
/// ```
/// use slotmux::{AddressTranslator, NodeEndpoint};
///
/// let translator = AddressTranslator::new(|ep: &NodeEndpoint| {
///     NodeEndpoint::new("gateway.example", ep.port() + 10000)
/// });
/// let outside = translator.translate(NodeEndpoint::new("10.0.0.5", 7000));
/// assert_eq!(outside.node_key(), "gateway.example:17000");
/// ```
#[derive(Clone, Default)]
pub struct AddressTranslator(Option<Arc<TranslateFn>>);

impl AddressTranslator {
    /// Wraps a translation function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&NodeEndpoint) -> NodeEndpoint + Send + Sync + 'static,
    {
        Self(Some(Arc::new(f)))
    }

    /// The identity translator.
    pub fn identity() -> Self {
        Self(None)
    }

    /// Applies the translation, if any.
    pub fn translate(&self, endpoint: NodeEndpoint) -> NodeEndpoint {
        match &self.0 {
            Some(f) => f(&endpoint),
            None => endpoint,
        }
    }
}

impl fmt::Debug for AddressTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.0.is_some() { "custom" } else { "identity" };
        f.debug_tuple("AddressTranslator").field(&kind).finish()
    }
}

//! Scripted in-memory cluster for tests.
//!
//! [`MockCluster`] implements [`Connector`], so a real [`ClusterClient`]
//! (or any cache, discovery or dispatcher) can run against it without
//! sockets. A handler closure decides what each node answers.
//!
//! ```
//! use slotmux::testing::MockCluster;
//! use slotmux::{ClusterClientBuilder, NodeEndpoint};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> slotmux::Result<()> {
//! let node = NodeEndpoint::new("127.0.0.1", 7000);
//! let owner = node.clone();
//! let mock = MockCluster::new(move |_, args| match args[0].as_ref() {
//!     b"CLUSTER" => Ok(MockCluster::cluster_slots(&[(0, 16383, &owner)])),
//!     _ => Ok(MockCluster::ok()),
//! });
//!
//! let client = ClusterClientBuilder::new()
//!     .node(node)
//!     .build_with_connector(mock.clone())
//!     .await?;
//! client.set("k", "v").await?;
//! assert_eq!(mock.calls_named("SET").len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! [`ClusterClient`]: crate::ClusterClient

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::cluster::endpoint::NodeEndpoint;
use crate::cluster::pool::{Connector, NodeConnection};
use crate::proto::frame::Frame;
use crate::{Error, Result};

type Handler = dyn Fn(&NodeEndpoint, &[Bytes]) -> Result<Frame> + Send + Sync;

/// One request that reached a mock node.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    /// Node the request was sent to.
    pub node: NodeEndpoint,
    /// Command name and arguments.
    pub args: Vec<Bytes>,
}

impl MockCall {
    /// Uppercased command name.
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|name| String::from_utf8_lossy(name).to_uppercase())
            .unwrap_or_default()
    }
}

struct Inner {
    handler: Box<Handler>,
    calls: Mutex<Vec<MockCall>>,
    connects: AtomicUsize,
    unreachable: Mutex<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
}

/// A fake cluster driven by a handler closure.
///
/// `PING` and `ASKING` are answered by the mock itself; every other
/// command goes to the handler. All requests that reach a node are logged.
/// A node marked unreachable refuses new connections and fails requests on
/// open ones with a connection reset.
#[derive(Clone)]
pub struct MockCluster {
    inner: Arc<Inner>,
}

impl MockCluster {
    /// Creates a mock cluster answering with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&NodeEndpoint, &[Bytes]) -> Result<Frame> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                handler: Box::new(handler),
                calls: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                unreachable: Mutex::new(HashSet::new()),
                latency: Mutex::new(None),
            }),
        }
    }

    /// Delays every request by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(Some(latency));
        self
    }

    /// Changes the per-request delay.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    /// Makes `node` unreachable (or reachable again).
    pub fn set_unreachable(&self, node: &NodeEndpoint, unreachable: bool) {
        let mut set = self.inner.unreachable.lock();
        if unreachable {
            set.insert(node.node_key());
        } else {
            set.remove(&node.node_key());
        }
    }

    /// Connections opened so far.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Every request that reached a node, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.inner.calls.lock().clone()
    }

    /// Requests whose command name is `name` (case-insensitive).
    pub fn calls_named(&self, name: &str) -> Vec<MockCall> {
        let name = name.to_uppercase();
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|call| call.name() == name)
            .cloned()
            .collect()
    }

    /// Forgets the call log.
    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    /// `+OK`
    pub fn ok() -> Frame {
        Frame::Simple("OK".to_string())
    }

    /// `-MOVED <slot> <node>`
    pub fn moved(slot: u16, node: &NodeEndpoint) -> Frame {
        Frame::Error(format!("MOVED {slot} {node}"))
    }

    /// `-ASK <slot> <node>`
    pub fn ask(slot: u16, node: &NodeEndpoint) -> Frame {
        Frame::Error(format!("ASK {slot} {node}"))
    }

    /// A `CLUSTER SLOTS` reply with one primary per range.
    pub fn cluster_slots(ranges: &[(u16, u16, &NodeEndpoint)]) -> Frame {
        Frame::Array(
            ranges
                .iter()
                .map(|(start, end, node)| {
                    Frame::Array(vec![
                        Frame::Integer(i64::from(*start)),
                        Frame::Integer(i64::from(*end)),
                        Frame::Array(vec![
                            Frame::bulk(node.host().to_string()),
                            Frame::Integer(i64::from(node.port())),
                        ]),
                    ])
                })
                .collect(),
        )
    }

    fn is_unreachable(&self, node: &NodeEndpoint) -> bool {
        self.inner.unreachable.lock().contains(&node.node_key())
    }

    async fn serve(&self, node: &NodeEndpoint, frame: &Frame) -> Result<Frame> {
        let args = frame_args(frame)?;
        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.is_unreachable(node) {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "mock node went away").into());
        }

        let call = MockCall {
            node: node.clone(),
            args,
        };
        let name = call.name();
        self.inner.calls.lock().push(call.clone());
        match name.as_str() {
            "PING" => Ok(Frame::Simple("PONG".to_string())),
            "ASKING" => Ok(Self::ok()),
            _ => (self.inner.handler)(node, &call.args),
        }
    }
}

impl std::fmt::Debug for MockCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCluster")
            .field("connects", &self.connect_count())
            .field("calls", &self.inner.calls.lock().len())
            .finish()
    }
}

impl Connector for MockCluster {
    fn connect<'a>(
        &'a self,
        endpoint: &'a NodeEndpoint,
    ) -> BoxFuture<'a, Result<Box<dyn NodeConnection>>> {
        async move {
            if self.is_unreachable(endpoint) {
                return Err(Error::from(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("mock node {endpoint} is unreachable"),
                )));
            }
            self.inner.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection {
                cluster: self.clone(),
                node: endpoint.clone(),
            }) as Box<dyn NodeConnection>)
        }
        .boxed()
    }
}

struct MockConnection {
    cluster: MockCluster,
    node: NodeEndpoint,
}

impl NodeConnection for MockConnection {
    fn request<'a>(&'a mut self, frame: &'a Frame) -> BoxFuture<'a, Result<Frame>> {
        self.cluster.serve(&self.node, frame).boxed()
    }
}

fn frame_args(frame: &Frame) -> Result<Vec<Bytes>> {
    let Frame::Array(items) = frame else {
        return Err(Error::protocol("mock expects a command array"));
    };
    items
        .iter()
        .map(|item| match item {
            Frame::Bulk(Some(data)) => Ok(data.clone()),
            other => Err(Error::protocol(format!("mock expects bulk arguments, got {other:?}"))),
        })
        .collect()
}

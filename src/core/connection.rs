use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::cluster::endpoint::NodeEndpoint;
use crate::cluster::pool::{Connector, NodeConnection};
use crate::core::command;
use crate::core::ConnectionConfig;
use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// A connection to one Redis node.
///
/// Wraps a stream (normally TCP) and handles RESP framing. Every read and
/// write is bounded by its own timeout when one is configured.
pub struct Connection<S> {
    stream: S,
    decoder: Decoder,
    encoder: Encoder,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Creates a new connection with no timeouts.
    ///
    /// # Arguments
    ///
    /// * `stream` - The underlying async stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
            encoder: Encoder::new(),
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Configures read and write timeouts for this connection.
    pub fn with_timeouts(
        mut self,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self
    }

    /// Writes a frame to the connection.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] on socket failure, [`Error::Timeout`] if the write
    /// timeout elapses.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.encoder.encode(frame);
        let data = self.encoder.take();
        let write = self.stream.write_all(&data);
        bounded("write", self.write_timeout, write).await?;
        Ok(())
    }

    /// Reads the next complete frame.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] (including `UnexpectedEof` when the peer closes),
    /// [`Error::Timeout`] if the read timeout elapses, [`Error::Decode`]
    /// for malformed input.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(frame);
            }
            let read = self.stream.read_buf(self.decoder.buffer_mut());
            let n = bounded("read", self.read_timeout, read).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )
                .into());
            }
        }
    }

    /// Writes `frame` and reads its reply.
    pub async fn round_trip(&mut self, frame: &Frame) -> Result<Frame> {
        self.write_frame(frame).await?;
        self.read_frame().await
    }

    /// Runs `AUTH` and `CLIENT SETNAME` as configured.
    ///
    /// # Errors
    ///
    /// [`Error::Auth`] if the server rejects the credentials.
    pub async fn handshake(&mut self, config: &ConnectionConfig) -> Result<()> {
        if let Some(password) = &config.password {
            let cmd = match &config.username {
                Some(user) => command::auth_with_username(user.clone(), password.clone()),
                None => command::auth(password.clone()),
            };
            match self.round_trip(&cmd.into_frame()).await? {
                Frame::Error(message) => return Err(Error::Auth { message }),
                reply => expect_ok("AUTH", reply)?,
            }
        }
        if let Some(name) = &config.client_name {
            let reply = self
                .round_trip(&command::client_setname(name.clone()).into_frame())
                .await?;
            expect_ok("CLIENT SETNAME", reply)?;
        }
        Ok(())
    }
}

impl<S> fmt::Debug for Connection<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("stream", &self.stream)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl<S> NodeConnection for Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn request<'a>(&'a mut self, frame: &'a Frame) -> BoxFuture<'a, Result<Frame>> {
        self.round_trip(frame).boxed()
    }
}

async fn bounded<T>(
    operation: &'static str,
    limit: Option<Duration>,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T> {
    match limit {
        Some(after) => match tokio::time::timeout(after, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(Error::Timeout { operation, after }),
        },
        None => Ok(fut.await?),
    }
}

fn expect_ok(step: &str, reply: Frame) -> Result<()> {
    match reply {
        Frame::Simple(s) if s == "OK" => Ok(()),
        Frame::Error(message) => Err(Error::Server { message }),
        other => Err(Error::protocol(format!(
            "unexpected {step} reply {other:?}"
        ))),
    }
}

/// Opens TCP connections configured by a [`ConnectionConfig`].
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: ConnectionConfig,
}

impl TcpConnector {
    /// Creates a connector.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Settings applied to each new connection.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects, disables Nagle and runs the handshake.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if connecting takes longer than the connect
    /// timeout, [`Error::Io`] if it fails, handshake errors otherwise.
    pub async fn open(&self, endpoint: &NodeEndpoint) -> Result<Connection<TcpStream>> {
        let address = endpoint.socket_address();
        let stream = bounded(
            "connect",
            Some(self.config.connect_timeout),
            TcpStream::connect(address.as_str()),
        )
        .await?;
        stream.set_nodelay(true)?;
        debug!(node = %endpoint, "connected");

        let mut conn = Connection::new(stream).with_timeouts(
            Some(self.config.read_timeout),
            Some(self.config.write_timeout),
        );
        conn.handshake(&self.config).await?;
        Ok(conn)
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a NodeEndpoint,
    ) -> BoxFuture<'a, Result<Box<dyn NodeConnection>>> {
        async move {
            let conn = self.open(endpoint).await?;
            Ok(Box::new(conn) as Box<dyn NodeConnection>)
        }
        .boxed()
    }
}

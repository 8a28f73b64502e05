//! Commands, node connections and client configuration.
//!
//! ## Modules
//!
//! - [`command`] - Command builders and reply converters
//! - [`connection`] - Socket connection and TCP connector
//! - [`builder`] - Cluster client builder

use std::fmt;
use std::time::Duration;

/// Client builder configuration.
pub mod builder;
/// Command construction helpers.
pub mod command;
/// Low-level connection management.
pub mod connection;

/// Settings applied to every node connection.
#[derive(Clone)]
#[non_exhaustive]
pub struct ConnectionConfig {
    /// Limit for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Limit for each reply read.
    pub read_timeout: Duration,
    /// Limit for each request write.
    pub write_timeout: Duration,
    /// ACL username, sent with the password.
    pub username: Option<String>,
    /// Password for `AUTH`.
    pub password: Option<String>,
    /// Name set with `CLIENT SETNAME` after connecting.
    pub client_name: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            username: None,
            password: None,
            client_name: None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_name", &self.client_name)
            .finish()
    }
}

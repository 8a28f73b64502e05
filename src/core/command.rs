use std::time::Duration;

use bytes::Bytes;

use crate::cluster::slot::slot_for_keys;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// A command ready to be routed and sent.
///
/// Arguments added with [`key`](Cmd::key) are remembered as routing keys;
/// the dispatcher hashes them to pick the owning node and refuses to send a
/// command whose keys span several slots.
///
/// # Example
///
/// ```
/// use slotmux::Cmd;
///
/// let cmd = Cmd::new("MGET").key("{user:1}:name").key("{user:1}:mail");
/// assert_eq!(cmd.keys().count(), 2);
/// assert!(cmd.slot().unwrap().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct Cmd {
    args: Vec<Bytes>,
    key_positions: Vec<usize>,
}

impl Cmd {
    /// Creates a new command with the given name.
    #[inline]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
            key_positions: Vec::new(),
        }
    }

    /// Appends a plain argument.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends an argument that is also a routing key.
    #[inline]
    pub fn key<T: Into<Bytes>>(mut self, key: T) -> Self {
        self.key_positions.push(self.args.len());
        self.args.push(key.into());
        self
    }

    /// Command name as sent.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_uppercase()
    }

    /// All arguments, name first.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Routing keys in argument order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.key_positions.iter().map(|&i| self.args[i].as_ref())
    }

    /// The slot every routing key hashes to.
    ///
    /// Returns `Ok(None)` for key-less commands.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CrossSlot`] if the keys do not share a slot.
    pub fn slot(&self) -> Result<Option<u16>> {
        slot_for_keys(self.keys())
    }

    /// Converts the command to a RESP array frame.
    #[inline]
    pub fn to_frame(&self) -> Frame {
        Frame::Array(self.args.iter().cloned().map(Frame::bulk).collect())
    }

    /// Consumes the command into a RESP array frame.
    #[inline]
    pub fn into_frame(self) -> Frame {
        Frame::Array(self.args.into_iter().map(Frame::bulk).collect())
    }
}

/// Creates a PING command.
#[inline]
pub fn ping() -> Cmd {
    Cmd::new("PING")
}

/// Creates a GET command.
#[inline]
pub fn get(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("GET").key(key)
}

/// Creates a SET command.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("SET").key(key).arg(value)
}

/// Creates a SET command with a relative expiry in milliseconds.
#[inline]
pub fn set_with_expiry(key: impl Into<Bytes>, value: impl Into<Bytes>, expiry: Duration) -> Cmd {
    Cmd::new("SET")
        .key(key)
        .arg(value)
        .arg("PX")
        .arg(expiry.as_millis().to_string())
}

/// Creates a DEL command over one or more keys.
pub fn del<K: Into<Bytes>>(keys: impl IntoIterator<Item = K>) -> Cmd {
    keys.into_iter().fold(Cmd::new("DEL"), Cmd::key)
}

/// Creates an EXISTS command over one or more keys.
pub fn exists<K: Into<Bytes>>(keys: impl IntoIterator<Item = K>) -> Cmd {
    keys.into_iter().fold(Cmd::new("EXISTS"), Cmd::key)
}

/// Creates an INCR command.
#[inline]
pub fn incr(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("INCR").key(key)
}

/// Creates an INCRBY command.
#[inline]
pub fn incr_by(key: impl Into<Bytes>, amount: i64) -> Cmd {
    Cmd::new("INCRBY").key(key).arg(amount.to_string())
}

/// Creates an MGET command.
pub fn mget<K: Into<Bytes>>(keys: impl IntoIterator<Item = K>) -> Cmd {
    keys.into_iter().fold(Cmd::new("MGET"), Cmd::key)
}

/// Creates an MSET command.
pub fn mset<K: Into<Bytes>, V: Into<Bytes>>(pairs: impl IntoIterator<Item = (K, V)>) -> Cmd {
    pairs
        .into_iter()
        .fold(Cmd::new("MSET"), |cmd, (k, v)| cmd.key(k).arg(v))
}

/// Creates an EXPIRE command.
#[inline]
pub fn expire(key: impl Into<Bytes>, seconds: u64) -> Cmd {
    Cmd::new("EXPIRE").key(key).arg(seconds.to_string())
}

/// Creates a TTL command.
#[inline]
pub fn ttl(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("TTL").key(key)
}

/// Creates an AUTH command with password only.
#[inline]
pub fn auth(password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(password)
}

/// Creates an AUTH command with username and password (ACL style).
#[inline]
pub fn auth_with_username(username: impl Into<Bytes>, password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(username).arg(password)
}

/// Creates a CLIENT SETNAME command.
#[inline]
pub fn client_setname(name: impl Into<Bytes>) -> Cmd {
    Cmd::new("CLIENT").arg("SETNAME").arg(name)
}

/// Expects a status reply such as `+OK`.
pub fn frame_to_status(frame: Frame) -> Result<String> {
    match frame {
        Frame::Simple(s) => Ok(s),
        other => Err(unexpected("status", &other)),
    }
}

/// Converts a bulk reply to optional bytes.
pub fn frame_to_bytes(frame: Frame) -> Result<Option<Bytes>> {
    match frame {
        Frame::Bulk(b) => Ok(b),
        Frame::Null => Ok(None),
        other => Err(unexpected("bulk string", &other)),
    }
}

/// Converts an integer reply.
pub fn frame_to_int(frame: Frame) -> Result<i64> {
    match frame {
        Frame::Integer(i) => Ok(i),
        other => Err(unexpected("integer", &other)),
    }
}

/// Converts an array of bulk replies.
pub fn frame_to_vec_bytes(frame: Frame) -> Result<Vec<Option<Bytes>>> {
    match frame {
        Frame::Array(items) => items.into_iter().map(frame_to_bytes).collect(),
        other => Err(unexpected("array", &other)),
    }
}

fn unexpected(expected: &str, got: &Frame) -> Error {
    match got {
        Frame::Error(msg) => Error::Server {
            message: msg.clone(),
        },
        _ => Error::protocol(format!("expected {expected} reply, got {got:?}")),
    }
}

//! Classification of node replies into routing outcomes.
//!
//! Redis Cluster uses special error replies for redirects:
//! - `MOVED <slot> <host>:<port>` - permanent ownership change
//! - `ASK <slot> <host>:<port>` - one-shot redirect during migration
//! - `CLUSTERDOWN ...` - cluster cannot serve requests

use crate::cluster::endpoint::NodeEndpoint;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// Outcome of one command attempt, as seen by the dispatcher.
#[derive(Debug)]
pub enum RedirectionSignal {
    /// A normal reply.
    Ok(Frame),
    /// The slot now lives on `target`; update routing and retry.
    Moved {
        /// Slot named in the reply.
        slot: u16,
        /// New owner.
        target: NodeEndpoint,
    },
    /// Retry once on `target` after `ASKING`; routing is not updated.
    Ask {
        /// Slot named in the reply.
        slot: u16,
        /// Node importing the slot.
        target: NodeEndpoint,
    },
    /// The node could not be reached or stopped answering.
    ConnectionFailure(Error),
}

/// Turns the result of a request sent to `from` into a routing outcome.
///
/// Redirects and connectivity failures become signals. Every other error
/// is returned as `Err` and is never retried.
///
/// # Arguments
///
/// * `result` - Reply (or failure) of the request
/// * `from` - Node the request was sent to, used for empty redirect hosts
///
/// # Errors
///
/// - [`Error::ClusterDown`] for `CLUSTERDOWN`
/// - [`Error::Auth`] for `NOAUTH`, `WRONGPASS` and `NOPERM`
/// - [`Error::Server`] for any other error reply, including malformed redirects
/// - non-connectivity errors of `result` unchanged
pub fn classify(result: Result<Frame>, from: &NodeEndpoint) -> Result<RedirectionSignal> {
    match result {
        Ok(Frame::Error(message)) => classify_error_reply(message, from),
        Ok(frame) => Ok(RedirectionSignal::Ok(frame)),
        Err(e) if e.is_connectivity() => Ok(RedirectionSignal::ConnectionFailure(e)),
        Err(e) => Err(e),
    }
}

fn classify_error_reply(message: String, from: &NodeEndpoint) -> Result<RedirectionSignal> {
    if let Some(args) = message.strip_prefix("MOVED ") {
        if let Some((slot, target)) = parse_redirect(args, from) {
            return Ok(RedirectionSignal::Moved { slot, target });
        }
    } else if let Some(args) = message.strip_prefix("ASK ") {
        if let Some((slot, target)) = parse_redirect(args, from) {
            return Ok(RedirectionSignal::Ask { slot, target });
        }
    } else if message.starts_with("CLUSTERDOWN") {
        return Err(Error::ClusterDown { message });
    } else if ["NOAUTH", "WRONGPASS", "NOPERM"]
        .iter()
        .any(|prefix| message.starts_with(prefix))
    {
        return Err(Error::Auth { message });
    }
    Err(Error::Server { message })
}

/// Parses redirect arguments: `<slot> <host>:<port>`.
fn parse_redirect(args: &str, from: &NodeEndpoint) -> Option<(u16, NodeEndpoint)> {
    let mut parts = args.split_whitespace();
    let slot: u16 = parts.next()?.parse().ok()?;
    let address = parts.next()?;
    if parts.next().is_some() || slot >= crate::cluster::slot::SLOT_COUNT {
        return None;
    }
    let target = NodeEndpoint::from_redirect(address, from)?;
    Some((slot, target))
}

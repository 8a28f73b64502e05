//! `CLUSTER SLOTS` reply parsing.

use crate::cluster::endpoint::NodeEndpoint;
use crate::cluster::slot::SLOT_COUNT;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// A range of hash slots and the nodes serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    /// Start of the slot range (inclusive).
    pub start: u16,
    /// End of the slot range (inclusive).
    pub end: u16,
    /// Primary owner of the range.
    pub master: NodeEndpoint,
    /// Replicas, in the order the cluster listed them. Routing ignores them.
    pub replicas: Vec<NodeEndpoint>,
}

impl SlotRange {
    /// Creates a range owned by `master` with no replicas.
    pub fn new(start: u16, end: u16, master: NodeEndpoint) -> Self {
        Self {
            start,
            end,
            master,
            replicas: Vec::new(),
        }
    }

    /// Iterates the slots of the range.
    pub fn slots(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

/// Slot layout as reported by one node.
#[derive(Debug, Clone, Default)]
pub struct ClusterTopology {
    /// Slot ranges with their owners.
    pub slot_ranges: Vec<SlotRange>,
}

impl ClusterTopology {
    /// Parses a `CLUSTER SLOTS` reply.
    ///
    /// Each entry is `[start, end, [host, port, id?], replica...]`. Entries
    /// with an invalid slot range are skipped. An empty or `?` host means
    /// the node that answered the query.
    ///
    /// # Arguments
    ///
    /// * `frame` - The reply frame
    /// * `queried` - The node that produced the reply
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the reply is not an array or a range's
    /// primary cannot be parsed, and [`Error::Server`] for an error reply.
    pub fn from_cluster_slots(frame: Frame, queried: &NodeEndpoint) -> Result<Self> {
        let entries = match frame {
            Frame::Array(entries) => entries,
            Frame::Error(message) => return Err(Error::Server { message }),
            other => {
                return Err(Error::protocol(format!(
                    "CLUSTER SLOTS reply must be an array, got {other:?}"
                )))
            }
        };

        let mut slot_ranges = Vec::with_capacity(entries.len());
        for entry in entries {
            let Frame::Array(fields) = entry else {
                continue;
            };
            if fields.len() < 3 {
                continue;
            }
            let (Some(start), Some(end)) = (slot_number(&fields[0]), slot_number(&fields[1])) else {
                continue;
            };
            if start > end {
                continue;
            }

            let master = parse_node(&fields[2], queried)?;
            let replicas = fields[3..]
                .iter()
                .filter_map(|node| parse_node(node, queried).ok())
                .collect();

            slot_ranges.push(SlotRange {
                start,
                end,
                master,
                replicas,
            });
        }

        Ok(Self { slot_ranges })
    }
}

fn slot_number(frame: &Frame) -> Option<u16> {
    match frame {
        Frame::Integer(n) => u16::try_from(*n).ok().filter(|&s| s < SLOT_COUNT),
        _ => None,
    }
}

fn parse_node(frame: &Frame, queried: &NodeEndpoint) -> Result<NodeEndpoint> {
    let Frame::Array(fields) = frame else {
        return Err(Error::protocol("CLUSTER SLOTS node entry must be an array"));
    };
    if fields.len() < 2 {
        return Err(Error::protocol(
            "CLUSTER SLOTS node entry needs a host and a port",
        ));
    }

    let host = fields[0]
        .as_text()
        .ok_or_else(|| Error::protocol("CLUSTER SLOTS node host must be a string"))?;
    let port = match &fields[1] {
        Frame::Integer(n) => u16::try_from(*n).ok(),
        _ => None,
    }
    .ok_or_else(|| Error::protocol("CLUSTER SLOTS node port is invalid"))?;

    if host.is_empty() || host == "?" {
        Ok(NodeEndpoint::new(queried.host(), port))
    } else {
        Ok(NodeEndpoint::new(host, port))
    }
}

//! Cluster protocol commands used by discovery and redirect handling.

use crate::core::command::Cmd;

/// `CLUSTER SLOTS`: the authoritative slot-to-node layout.
pub fn cluster_slots() -> Cmd {
    Cmd::new("CLUSTER").arg("SLOTS")
}

/// `ASKING`: lets the next command on this connection touch a slot the
/// node is still importing. Applies to exactly one command.
pub fn asking() -> Cmd {
    Cmd::new("ASKING")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::Frame;

    #[test]
    fn test_cluster_slots_is_keyless() {
        let cmd = cluster_slots();
        assert_eq!(cmd.slot().unwrap(), None);
        assert_eq!(
            cmd.into_frame(),
            Frame::Array(vec![Frame::bulk("CLUSTER"), Frame::bulk("SLOTS")])
        );
    }

    #[test]
    fn test_asking() {
        assert_eq!(asking().name(), "ASKING");
        assert_eq!(asking().args().len(), 1);
    }
}

//! Redis Cluster slot calculation.
//!
//! Redis Cluster maps every key to one of 16384 slots using CRC16/XMODEM.

use crc::{Crc, CRC_16_XMODEM};

use crate::{Error, Result};

/// Number of hash slots in Redis Cluster.
pub const SLOT_COUNT: u16 = 16384;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the cluster slot for a key.
///
/// If the key contains `{...}` with non-empty content, only that content is
/// hashed (hash tags), so related keys can be forced onto one slot.
///
/// ```
/// use slotmux::key_slot;
///
/// assert_eq!(key_slot("{user1000}.following"), key_slot("{user1000}.followers"));
/// assert_eq!(key_slot("foo"), 12182);
/// ```
pub fn key_slot(key: impl AsRef<[u8]>) -> u16 {
    let hashed = hash_tag(key.as_ref());
    CRC16.checksum(hashed) % SLOT_COUNT
}

/// Returns the part of the key that is hashed.
///
/// - `{user1000}.following` hashes `user1000`
/// - `foo{bar}{baz}` hashes `bar` (first `{` and the next `}`)
/// - `foo{}bar` hashes the whole key (empty tag)
fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// Returns the slot shared by all `keys`.
///
/// Returns `Ok(None)` for an empty key list.
///
/// # Errors
///
/// [`Error::CrossSlot`] naming the first two slots that disagree.
pub fn slot_for_keys<'a>(keys: impl IntoIterator<Item = &'a [u8]>) -> Result<Option<u16>> {
    let mut found: Option<u16> = None;
    for key in keys {
        let slot = key_slot(key);
        match found {
            None => found = Some(slot),
            Some(first) if first != slot => {
                return Err(Error::CrossSlot {
                    first,
                    second: slot,
                })
            }
            Some(_) => {}
        }
    }
    Ok(found)
}

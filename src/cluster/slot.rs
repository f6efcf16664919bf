//! Cluster slot calculation.
//!
//! Keys map to one of 16384 slots via CRC16 (XMODEM) of the key or of
//! its hash tag. This must match the store's own assignment exactly or
//! every command is answered with a redirect.

use crc::{Crc, CRC_16_XMODEM};

/// Number of hash slots in a cluster.
pub const SLOT_COUNT: u16 = 16384;

/// CRC-16/XMODEM (poly 0x1021, init 0, no reflection).
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the cluster slot for a given key.
///
/// If the key contains a non-empty `{...}` section, only its content is
/// hashed, so `{user1000}.following` and `{user1000}.followers` share a slot.
///
/// # Examples
///
/// ```
/// use shardmux::key_slot;
///
/// assert_eq!(key_slot("foo"), 12182);
/// assert_eq!(key_slot("{user1000}.following"), key_slot("{user1000}.followers"));
/// ```
pub fn key_slot(key: impl AsRef<[u8]>) -> u16 {
    let hash_key = extract_hash_tag(key.as_ref());
    CRC16.checksum(hash_key) % SLOT_COUNT
}

/// Extracts the hash tag from a key.
///
/// - `{user1000}.following` → `user1000`
/// - `foo{bar}{baz}` → `bar` (first pair only)
/// - `foo{}{bar}` → whole key (the first pair is empty)
/// - `foo{bar` → whole key (unmatched)
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    let Some(open) = key.iter().position(|&b| b == b'{') else {
        return key;
    };
    let tag_start = open + 1;
    match key[tag_start..].iter().position(|&b| b == b'}') {
        Some(len) if len > 0 => &key[tag_start..tag_start + len],
        _ => key,
    }
}

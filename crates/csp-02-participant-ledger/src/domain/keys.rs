//! # Storage Key Layout
//!
//! ```text
//! meta:marker                      -> ProcessedHeightMarker
//! meta:fee                         -> Amount (operator fee balance)
//! meta:batch_seq                   -> u64 (next batch id)
//! meta:journal_floor               -> BlockHeight (lowest journaled block)
//! part:<id>                        -> Participant
//! hist:<height u64 BE><id>         -> Amount (stake after that block;
//!                                     height 0 holds the pruned baseline)
//! blk:<height u64 BE>              -> AppliedBlock
//! evt:<block hash>                 -> BlockHeight (reward event applied)
//! batch:<id u64 BE>                -> PayoutBatch
//! ```
//!
//! Heights and ids are big-endian so byte order equals numeric order.

use shared_types::{BlockHash, BlockHeight, ParticipantId};

pub const MARKER: &[u8] = b"meta:marker";
pub const OPERATOR_FEE: &[u8] = b"meta:fee";
pub const BATCH_SEQ: &[u8] = b"meta:batch_seq";
pub const JOURNAL_FLOOR: &[u8] = b"meta:journal_floor";

pub const PARTICIPANT_PREFIX: &[u8] = b"part:";
pub const HISTORY_PREFIX: &[u8] = b"hist:";
pub const APPLIED_PREFIX: &[u8] = b"blk:";
pub const EVENT_PREFIX: &[u8] = b"evt:";
pub const BATCH_PREFIX: &[u8] = b"batch:";

fn prefixed(prefix: &[u8], tail: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + tail.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(tail);
    key
}

pub fn participant(id: &ParticipantId) -> Vec<u8> {
    prefixed(PARTICIPANT_PREFIX, id.as_str().as_bytes())
}

pub fn history(height: BlockHeight, id: &ParticipantId) -> Vec<u8> {
    let mut key = prefixed(HISTORY_PREFIX, &height.to_be_bytes());
    key.extend_from_slice(id.as_str().as_bytes());
    key
}

/// Split a history key into height and participant.
pub fn parse_history(key: &[u8]) -> Option<(BlockHeight, ParticipantId)> {
    let rest = key.strip_prefix(HISTORY_PREFIX)?;
    if rest.len() < 8 {
        return None;
    }
    let (height, id) = rest.split_at(8);
    let height = BlockHeight::from_be_bytes(height.try_into().ok()?);
    let id = std::str::from_utf8(id).ok()?;
    Some((height, ParticipantId::new(id)))
}

pub fn applied(height: BlockHeight) -> Vec<u8> {
    prefixed(APPLIED_PREFIX, &height.to_be_bytes())
}

pub fn event(hash: &BlockHash) -> Vec<u8> {
    prefixed(EVENT_PREFIX, &hash.0)
}

pub fn batch(id: u64) -> Vec<u8> {
    prefixed(BATCH_PREFIX, &id.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_key_roundtrip() {
        let id = ParticipantId::new("gcs1qalice");
        let key = history(200_001, &id);
        assert_eq!(parse_history(&key), Some((200_001, id)));
    }

    #[test]
    fn test_history_keys_sort_by_height() {
        let id = ParticipantId::new("a");
        assert!(history(9, &id) < history(10, &id));
        assert!(history(255, &id) < history(256, &id));
    }

    #[test]
    fn test_parse_history_rejects_foreign_key() {
        assert_eq!(parse_history(b"part:alice"), None);
        assert_eq!(parse_history(b"hist:123"), None);
    }
}

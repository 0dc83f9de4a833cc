//! Request-group time-series codec.
//!
//! The remote store keeps each hit as an offset from its bucket epoch
//! (`groupId`). Decoding adds the epoch back to recover absolute UTC millis.
//! Decoding consumes a [`RawRequestGroup`] and yields a [`TokenRequestGroup`],
//! so an already-decoded group cannot be decoded again.

use crate::models::{RawRequestGroup, TokenRequestGroup};

/// Decode one group: `time_logs[i] = group_id + offset[i]`, order preserving.
///
/// Negative offsets are clamped to zero so every timestamp is `>= group_id`.
pub fn decode(group: RawRequestGroup) -> TokenRequestGroup {
    let RawRequestGroup {
        group_id,
        request_count,
        token_id,
        time_logs,
    } = group;

    let time_logs = time_logs
        .into_iter()
        .map(|offset| group_id.saturating_add(offset.max(0)))
        .collect();

    TokenRequestGroup {
        group_id,
        request_count,
        token_id,
        time_logs,
    }
}

/// Decode every group of a snapshot.
pub fn decode_all(groups: Vec<RawRequestGroup>) -> Vec<TokenRequestGroup> {
    groups.into_iter().map(decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(group_id: i64, time_logs: Vec<i64>) -> RawRequestGroup {
        RawRequestGroup {
            group_id,
            request_count: time_logs.len() as u64,
            token_id: "t1".into(),
            time_logs,
        }
    }

    #[test]
    fn test_decode_adds_group_id_in_order() {
        let decoded = decode(raw(1000, vec![500, 0, 250]));
        assert_eq!(decoded.time_logs(), &[1500, 1000, 1250]);
        assert_eq!(decoded.group_id(), 1000);
        assert_eq!(decoded.token_id(), "t1");
    }

    #[test]
    fn test_decode_empty_time_logs() {
        let decoded = decode(raw(1000, vec![]));
        assert!(decoded.time_logs().is_empty());
    }

    #[test]
    fn test_decode_keeps_request_count_from_wire() {
        let mut group = raw(0, vec![1, 2]);
        group.request_count = 7;
        assert_eq!(decode(group).request_count(), 7);
    }

    #[test]
    fn test_negative_offset_never_precedes_bucket() {
        let decoded = decode(raw(2000, vec![-5, 10]));
        assert_eq!(decoded.time_logs(), &[2000, 2010]);
    }

    #[test]
    fn test_decode_all_preserves_group_order() {
        let decoded = decode_all(vec![raw(2000, vec![100]), raw(1000, vec![0])]);
        assert_eq!(decoded[0].time_logs(), &[2100]);
        assert_eq!(decoded[1].time_logs(), &[1000]);
    }
}

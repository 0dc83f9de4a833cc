//! Range queries over a token's materialized request history.
//!
//! All functions read decoded groups only; nothing here decodes.

use serde::Serialize;

use crate::models::Token;

/// Decoded timestamps `t` with `start <= t <= end`.
///
/// Results follow group order, then within-group order. No global sort.
pub fn time_logs_in_range(token: Option<&Token>, start: i64, end: i64) -> Vec<i64> {
    let Some(token) = token else {
        return Vec::new();
    };

    token
        .token_requests
        .iter()
        .flat_map(|group| group.time_logs().iter().copied())
        .filter(|t| (start..=end).contains(t))
        .collect()
}

/// Number of tracked events inside the window.
pub fn count_in_range(token: Option<&Token>, start: i64, end: i64) -> usize {
    let Some(token) = token else {
        return 0;
    };

    token
        .token_requests
        .iter()
        .flat_map(|group| group.time_logs().iter())
        .filter(|t| (start..=end).contains(*t))
        .count()
}

/// Sum of the server-side request counters.
pub fn total_requests(token: Option<&Token>) -> u64 {
    token
        .map(|t| t.token_requests.iter().map(|g| g.request_count()).sum())
        .unwrap_or(0)
}

/// Upper bound on the number of buckets a histogram may allocate.
pub const MAX_BUCKETS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bucket {
    /// Inclusive start of the bucket, UTC millis.
    pub start: i64,
    pub count: usize,
}

/// Event counts in consecutive `bucket_ms` buckets aligned to `start`.
///
/// Every bucket in the window is present, including empty ones. The last
/// bucket may extend past `end`; only events `<= end` are counted.
pub fn histogram(token: Option<&Token>, start: i64, end: i64, bucket_ms: i64) -> Vec<Bucket> {
    if end < start || bucket_ms <= 0 {
        return Vec::new();
    }
    let Some(len) = end
        .checked_sub(start)
        .and_then(|span| span.checked_div(bucket_ms))
        .and_then(|n| n.checked_add(1))
    else {
        return Vec::new();
    };
    if len > MAX_BUCKETS as i64 {
        tracing::warn!(len, max = MAX_BUCKETS, "histogram window too fine, refusing");
        return Vec::new();
    }

    let mut buckets: Vec<Bucket> = (0..len as usize)
        .map(|i| Bucket {
            start: start + i as i64 * bucket_ms,
            count: 0,
        })
        .collect();

    for t in time_logs_in_range(token, start, end) {
        let idx = ((t - start) / bucket_ms) as usize;
        buckets[idx].count += 1;
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawRequestGroup, TokenRecord};

    fn token(groups: Vec<(i64, Vec<i64>)>) -> Token {
        let raw = groups
            .into_iter()
            .map(|(group_id, time_logs)| RawRequestGroup {
                group_id,
                request_count: time_logs.len() as u64,
                token_id: "T1".into(),
                time_logs,
            })
            .collect();
        Token::from_raw(
            TokenRecord {
                id: "T1".into(),
                name: "readme".into(),
                owner: "u1".into(),
                url: "https://ping.example/T1".into(),
                short_url: "https://ping.example/T1".into(),
            },
            raw,
        )
    }

    #[test]
    fn test_null_token_yields_nothing() {
        assert!(time_logs_in_range(None, 0, i64::MAX).is_empty());
        assert_eq!(count_in_range(None, 0, 10), 0);
        assert_eq!(total_requests(None), 0);
    }

    #[test]
    fn test_window_is_inclusive_on_both_ends() {
        let t = token(vec![(1000, vec![0, 500, 999])]);
        assert_eq!(time_logs_in_range(Some(&t), 1000, 1999), vec![1000, 1500, 1999]);
        assert_eq!(time_logs_in_range(Some(&t), 1001, 1998), vec![1500]);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let t = token(vec![(1000, vec![0, 500]), (2000, vec![100])]);
        assert_eq!(time_logs_in_range(Some(&t), 1000, 1999), vec![1000, 1500]);
        assert_eq!(time_logs_in_range(Some(&t), 0, 10000), vec![1000, 1500, 2100]);
    }

    #[test]
    fn test_order_follows_groups_not_time() {
        let t = token(vec![(5000, vec![1]), (1000, vec![2])]);
        assert_eq!(time_logs_in_range(Some(&t), 0, 10000), vec![5001, 1002]);
    }

    #[test]
    fn test_empty_groups_and_tokens() {
        assert!(time_logs_in_range(Some(&token(vec![])), 0, 10).is_empty());
        let t = token(vec![(1000, vec![]), (2000, vec![5])]);
        assert_eq!(time_logs_in_range(Some(&t), 0, 10000), vec![2005]);
    }

    #[test]
    fn test_count_and_total() {
        let mut t = token(vec![(1000, vec![0, 500]), (2000, vec![100])]);
        t.token_requests[0].request_count = 10;
        assert_eq!(count_in_range(Some(&t), 1000, 1999), 2);
        assert_eq!(total_requests(Some(&t)), 11);
    }

    #[test]
    fn test_histogram_buckets() {
        let t = token(vec![(1000, vec![0, 500]), (2000, vec![100])]);
        let h = histogram(Some(&t), 1000, 3999, 1000);
        assert_eq!(
            h,
            vec![
                Bucket { start: 1000, count: 2 },
                Bucket { start: 2000, count: 1 },
                Bucket { start: 3000, count: 0 },
            ]
        );
    }

    #[test]
    fn test_histogram_invalid_window() {
        let t = token(vec![(1000, vec![0])]);
        assert!(histogram(Some(&t), 10, 0, 1000).is_empty());
        assert!(histogram(Some(&t), 0, 10, 0).is_empty());
    }

    #[test]
    fn test_histogram_extreme_windows_do_not_overflow() {
        let t = token(vec![(1000, vec![0])]);
        assert!(histogram(Some(&t), 0, i64::MAX, 1).is_empty());
        assert!(histogram(None, 0, i64::MAX, 1).is_empty());
        assert!(histogram(Some(&t), i64::MIN, i64::MAX, 1).is_empty());
        assert!(histogram(Some(&t), 0, i64::MAX, i64::MAX).len() == 2);
    }

    #[test]
    fn test_histogram_bucket_limit() {
        let t = token(vec![(0, vec![5])]);
        let max = MAX_BUCKETS as i64;
        assert_eq!(histogram(Some(&t), 0, max - 1, 1).len(), MAX_BUCKETS);
        assert!(histogram(Some(&t), 0, max, 1).is_empty());
    }
}

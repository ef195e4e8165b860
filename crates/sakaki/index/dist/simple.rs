use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::dist::key_range::KeyRange;
use crate::dist::{KeyDistribution, Pivot};
use crate::error::IndexError;

/// Fixed-granularity pivot oracle.
///
/// Emits two-byte candidates `0x81 0x00` .. `0x81 0xFF` filtered to the
/// range, shuffling and truncating when more than `max_count` remain. Only
/// useful when keys actually start with the `0x81` prefix (single int4/int8
/// key fields do); kept as the trivially predictable fallback oracle.
#[derive(Debug, Default)]
pub struct SimpleKeyDistribution;

const PREFIX: u8 = 0x81;

impl KeyDistribution for SimpleKeyDistribution {
    fn compute_pivots(
        &mut self,
        max_count: usize,
        range: &KeyRange,
    ) -> Result<Vec<Pivot>, IndexError> {
        let mut pivots: Vec<Pivot> = Vec::new();
        for i in 0..=0xFFu8 {
            let pivot = vec![PREFIX, i];
            let after_begin =
                range.begin_key().is_empty() || pivot.as_slice() >= range.begin_key();
            let before_end = range.end_key().is_empty() || pivot.as_slice() < range.end_key();
            if after_begin && before_end {
                pivots.push(pivot);
            }
        }
        if max_count < pivots.len() {
            pivots.shuffle(&mut thread_rng());
            pivots.truncate(max_count);
        }
        Ok(pivots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sakaki_kvs::EndPointKind;

    #[test]
    fn unbounded_range_yields_full_prefix_spread() {
        let mut dist = SimpleKeyDistribution;
        let pivots = dist.compute_pivots(1000, &KeyRange::unbound()).unwrap();
        assert_eq!(pivots.len(), 256);
        assert!(pivots.iter().all(|p| p[0] == PREFIX));
    }

    #[test]
    fn result_is_truncated_to_max_count() {
        let mut dist = SimpleKeyDistribution;
        let pivots = dist.compute_pivots(10, &KeyRange::unbound()).unwrap();
        assert_eq!(pivots.len(), 10);
    }

    #[test]
    fn pivots_respect_range_bounds() {
        let mut dist = SimpleKeyDistribution;
        let range = KeyRange::new(
            vec![PREFIX, 0x10],
            EndPointKind::Inclusive,
            vec![PREFIX, 0x20],
            EndPointKind::Exclusive,
        );
        let pivots = dist.compute_pivots(1000, &range).unwrap();
        assert!(!pivots.is_empty());
        for p in &pivots {
            assert!(p.as_slice() >= &[PREFIX, 0x10][..]);
            assert!(p.as_slice() < &[PREFIX, 0x20][..]);
        }
    }
}

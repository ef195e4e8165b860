//! Pivot oracles for splitting a key range across parallel scan strands.

pub mod key_range;
pub mod simple;
pub mod uniform;

pub use key_range::KeyRange;
pub use simple::SimpleKeyDistribution;
pub use uniform::UniformKeyDistribution;

use crate::error::IndexError;

/// A byte string claimed (not guaranteed) to lie inside a range.
pub type Pivot = Vec<u8>;

/// Produces approximate split points of a key range.
///
/// An empty pivot list is a valid answer (empty index, degenerate range);
/// callers then fall back to a single strand.
pub trait KeyDistribution {
    fn estimate_count(&mut self, _range: &KeyRange) -> Option<f64> {
        None
    }

    fn estimate_key_size(&mut self, _range: &KeyRange) -> Option<f64> {
        None
    }

    fn estimate_value_size(&mut self, _range: &KeyRange) -> Option<f64> {
        None
    }

    /// Returns at most `max_count` pivots inside `range`.
    fn compute_pivots(
        &mut self,
        max_count: usize,
        range: &KeyRange,
    ) -> Result<Vec<Pivot>, IndexError>;
}

use tracing::debug;

use sakaki_kvs::{EndPointKind, KvsError, Storage, Transaction};

use crate::dist::key_range::KeyRange;
use crate::dist::{KeyDistribution, Pivot};
use crate::error::IndexError;

/// Pivot oracle interpolating over the observed key span.
///
/// Samples the smallest and largest keys of the storage with single-entry
/// scans, clamps them by the requested range, then linearly interpolates the
/// 32 bits following the common prefix. Pivots falling outside the open
/// interval or collapsing onto the previous candidate are discarded, so the
/// result may be shorter than requested; an empty storage yields no pivots.
pub struct UniformKeyDistribution<'a> {
    storage: &'a dyn Storage,
    tx: &'a dyn Transaction,
}

impl<'a> UniformKeyDistribution<'a> {
    pub fn new(storage: &'a dyn Storage, tx: &'a dyn Transaction) -> Self {
        Self { storage, tx }
    }

    fn scan_one(&self, reverse: bool) -> Result<Option<Vec<u8>>, IndexError> {
        let mut it = self.storage.content_scan(
            self.tx,
            &[],
            EndPointKind::Unbound,
            &[],
            EndPointKind::Unbound,
            Some(1),
            reverse,
        )?;
        if !it.next()? {
            return Ok(None);
        }
        Ok(Some(it.key().to_vec()))
    }

    fn lowkey(&self) -> Result<Option<Vec<u8>>, IndexError> {
        self.scan_one(false)
    }

    fn highkey(&self) -> Result<Option<Vec<u8>>, IndexError> {
        self.scan_one(true)
    }
}

fn common_prefix_len(lo: &[u8], hi: &[u8]) -> usize {
    lo.iter().zip(hi.iter()).take_while(|(a, b)| a == b).count()
}

fn head_32bit(bytes: &[u8]) -> u64 {
    let mut out = 0u64;
    for i in 0..4 {
        let b = bytes.get(i).copied().unwrap_or(0);
        out = (out << 8) | u64::from(b);
    }
    out
}

/// Interpolates up to `max_count` keys strictly between `lo` and `hi`.
fn interpolate(max_count: usize, lo: &[u8], hi: &[u8]) -> Vec<Pivot> {
    if hi <= lo {
        return Vec::new();
    }
    let cpl = common_prefix_len(lo, hi);
    let h = head_32bit(&hi[cpl..]);
    // round the lower bound up unless the low key ends within the window
    let l = head_32bit(&lo[cpl..]) + u64::from(lo.len() > cpl + 4);
    let count = (max_count as u64).min((1 << 24) - 1);

    let mut pivots = Vec::new();
    let mut buf = vec![0u8; cpl + 4];
    buf[..cpl.min(lo.len())].copy_from_slice(&lo[..cpl.min(lo.len())]);
    let mut prev = 0u64;
    for i in 0..count {
        // weighted mean; (h - l) * (i + 1) < 2^56 so the product cannot wrap
        let c32 = l + (h - l) * (i + 1) / (count + 1);
        buf[cpl] = (c32 >> 24) as u8;
        buf[cpl + 1] = (c32 >> 16) as u8;
        buf[cpl + 2] = (c32 >> 8) as u8;
        buf[cpl + 3] = c32 as u8;
        let skip = buf.as_slice() <= lo || hi <= buf.as_slice() || (i > 0 && c32 <= prev);
        prev = c32;
        if !skip {
            pivots.push(buf.clone());
        }
    }
    pivots
}

impl KeyDistribution for UniformKeyDistribution<'_> {
    fn compute_pivots(
        &mut self,
        max_count: usize,
        range: &KeyRange,
    ) -> Result<Vec<Pivot>, IndexError> {
        let mut low = match self.lowkey() {
            Ok(Some(k)) => k,
            Ok(None) | Err(IndexError::Kvs(KvsError::NotFound)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        if range.begin_kind() != EndPointKind::Unbound && range.begin_key() > low.as_slice() {
            low = range.begin_key().to_vec();
        }
        let mut high = match self.highkey() {
            Ok(Some(k)) => k,
            Ok(None) | Err(IndexError::Kvs(KvsError::NotFound)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        if range.end_kind() != EndPointKind::Unbound && range.end_key() < high.as_slice() {
            high = range.end_key().to_vec();
        }
        let pivots = interpolate(max_count, &low, &high);
        debug!(pivot_count = pivots.len(), "computed scan pivots");
        Ok(pivots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sakaki_kvs::memory::MemoryDatabase;
    use sakaki_kvs::{Database, PutOption, TransactionOption};

    #[test]
    fn empty_storage_yields_no_pivots() {
        let db = MemoryDatabase::new();
        let stg = db.create_storage("T").unwrap();
        let tx = db.create_transaction(TransactionOption::occ()).unwrap();
        let mut dist = UniformKeyDistribution::new(stg.as_ref(), tx.as_ref());
        assert!(dist.compute_pivots(8, &KeyRange::unbound()).unwrap().is_empty());
    }

    #[test]
    fn single_key_yields_no_pivots() {
        let db = MemoryDatabase::new();
        let stg = db.create_storage("T").unwrap();
        let tx = db.create_transaction(TransactionOption::occ()).unwrap();
        stg.content_put(tx.as_ref(), b"only", b"", PutOption::Create).unwrap();
        tx.commit().unwrap();
        let tx = db.create_transaction(TransactionOption::occ()).unwrap();
        let mut dist = UniformKeyDistribution::new(stg.as_ref(), tx.as_ref());
        assert!(dist.compute_pivots(8, &KeyRange::unbound()).unwrap().is_empty());
    }

    #[test]
    fn pivots_lie_strictly_inside_the_span() {
        let db = MemoryDatabase::new();
        let stg = db.create_storage("T").unwrap();
        let tx = db.create_transaction(TransactionOption::occ()).unwrap();
        for i in 0u32..100 {
            stg.content_put(tx.as_ref(), &(i * 1000).to_be_bytes(), b"", PutOption::Create)
                .unwrap();
        }
        tx.commit().unwrap();
        let tx = db.create_transaction(TransactionOption::occ()).unwrap();
        let mut dist = UniformKeyDistribution::new(stg.as_ref(), tx.as_ref());
        let pivots = dist.compute_pivots(4, &KeyRange::unbound()).unwrap();
        assert!(!pivots.is_empty());
        assert!(pivots.len() <= 4);
        let low = 0u32.to_be_bytes().to_vec();
        let high = (99u32 * 1000).to_be_bytes().to_vec();
        for w in pivots.windows(2) {
            assert!(w[0] < w[1]);
        }
        for p in &pivots {
            assert!(p > &low && p < &high);
        }
    }

    #[test]
    fn interpolation_respects_degenerate_span() {
        assert!(interpolate(8, b"aaa", b"aaa").is_empty());
        assert!(interpolate(8, b"zzz", b"aaa").is_empty());
    }
}

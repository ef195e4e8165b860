use std::sync::Arc;

use sakaki_common::meta::RecordMeta;

use crate::arena::{PagePool, PagedArena};
use crate::record_ref::{copy_record, RecordRef};

/// Append-only store of fixed-layout records backed by a paged arena.
///
/// Appended records (and the varlen content they reference) stay valid until
/// [`RecordStore::reset`].
pub struct RecordStore {
    meta: Arc<RecordMeta>,
    records: PagedArena,
    varlen: PagedArena,
    count: usize,
}

impl RecordStore {
    pub fn new(pool: Arc<PagePool>, meta: Arc<RecordMeta>) -> Self {
        Self {
            meta,
            records: PagedArena::new(Arc::clone(&pool)),
            varlen: PagedArena::new(pool),
            count: 0,
        }
    }

    pub fn meta(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    /// Copies `record` into the store and returns a ref to the stored copy.
    pub fn append(&mut self, record: RecordRef) -> RecordRef {
        let size = self.meta.record_size();
        let ptr = self.records.allocate(size, self.meta.record_alignment());
        let stored = RecordRef::new(ptr, size);
        copy_record(record, stored, &self.meta, &self.varlen);
        self.count += 1;
        stored
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn reset(&mut self) {
        self.records.reset();
        self.varlen.reset();
        self.count = 0;
    }
}

#[derive(Debug, Clone, Copy)]
struct RecordRange {
    begin: *mut u8,
    end: *mut u8,
}

// Ranges point into pages owned by the store that holds them.
unsafe impl Send for RecordRange {}

/// Record store whose contents can be iterated in insertion order.
///
/// Records live in one or more arena pages; iteration walks the maximal
/// contiguous ranges observed during append, so callers see a single
/// sequential stream even though the backing memory has gaps at page
/// boundaries. Appending may invalidate iterators (a new range can start);
/// refs stay valid until reset.
pub struct IterableRecordStore {
    base: RecordStore,
    record_size: usize,
    prev: *mut u8,
    ranges: Vec<RecordRange>,
}

unsafe impl Send for IterableRecordStore {}

impl IterableRecordStore {
    pub fn new(pool: Arc<PagePool>, meta: Arc<RecordMeta>) -> Self {
        let record_size = meta.record_size();
        Self {
            base: RecordStore::new(pool, meta),
            record_size,
            prev: std::ptr::null_mut(),
            ranges: Vec::new(),
        }
    }

    pub fn meta(&self) -> &Arc<RecordMeta> {
        self.base.meta()
    }

    pub fn append(&mut self, record: RecordRef) -> RecordRef {
        let stored = self.base.append(record);
        let begin = stored.ptr();
        // Safety: the stored record spans record_size bytes.
        let end = unsafe { begin.add(self.record_size) };
        if !self.prev.is_null() && begin == self.prev {
            let last = self.ranges.last_mut().expect("range exists while prev is set");
            last.end = end;
        } else {
            self.ranges.push(RecordRange { begin, end });
        }
        self.prev = end;
        stored
    }

    pub fn count(&self) -> usize {
        self.base.count()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn reset(&mut self) {
        self.base.reset();
        self.ranges.clear();
        self.prev = std::ptr::null_mut();
    }

    pub fn iter(&self) -> RecordIter<'_> {
        RecordIter { store: self, range: 0, pos: self.ranges.first().map(|r| r.begin) }
    }

    /// Record at position `index` in insertion order.
    pub fn record_at(&self, index: usize) -> Option<RecordRef> {
        let mut remaining = index;
        for range in &self.ranges {
            let len = (range.end as usize - range.begin as usize) / self.record_size;
            if remaining < len {
                // Safety: remaining < len keeps the pointer inside the range.
                let ptr = unsafe { range.begin.add(remaining * self.record_size) };
                return Some(RecordRef::new(ptr, self.record_size));
            }
            remaining -= len;
        }
        None
    }
}

/// Iterator yielding stored records in insertion order.
pub struct RecordIter<'a> {
    store: &'a IterableRecordStore,
    range: usize,
    pos: Option<*mut u8>,
}

impl Iterator for RecordIter<'_> {
    type Item = RecordRef;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.pos?;
        let current = RecordRef::new(pos, self.store.record_size);
        // Safety: pos < range.end, so the advanced pointer is at most one
        // past the end of the range.
        let advanced = unsafe { pos.add(self.store.record_size) };
        let range = &self.store.ranges[self.range];
        if advanced < range.end {
            self.pos = Some(advanced);
        } else {
            self.range += 1;
            self.pos = self.store.ranges.get(self.range).map(|r| r.begin);
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sakaki_common::types::{FieldType, Value};

    fn store_of_int4() -> IterableRecordStore {
        let pool = Arc::new(PagePool::new());
        let meta = RecordMeta::all_nullable(vec![FieldType::Int4]);
        IterableRecordStore::new(pool, meta)
    }

    fn make_record(meta: &RecordMeta, buf: &mut Vec<u8>, v: i32) -> RecordRef {
        buf.clear();
        buf.resize(meta.record_size(), 0);
        let rec = RecordRef::from_slice(buf);
        rec.set_i32(meta.value_offset(0), v);
        rec.set_null(meta.nullity_offset(0), false);
        rec
    }

    #[test]
    fn iterates_in_insertion_order() {
        let mut store = store_of_int4();
        let meta = Arc::clone(store.meta());
        let mut buf = Vec::new();
        for v in [5, 3, 9] {
            let rec = make_record(&meta, &mut buf, v);
            store.append(rec);
        }
        let seen: Vec<i32> =
            store.iter().map(|r| r.get_i32(meta.value_offset(0))).collect();
        assert_eq!(seen, vec![5, 3, 9]);
        assert_eq!(store.count(), 3);
    }

    #[test]
    fn appended_ref_stays_valid() {
        let mut store = store_of_int4();
        let meta = Arc::clone(store.meta());
        let mut buf = Vec::new();
        let stored = store.append(make_record(&meta, &mut buf, 11));
        // mutate the source buffer afterwards
        make_record(&meta, &mut buf, 99);
        assert_eq!(stored.get_i32(meta.value_offset(0)), 11);
    }

    #[test]
    fn reset_empties_the_store() {
        let mut store = store_of_int4();
        let meta = Arc::clone(store.meta());
        let mut buf = Vec::new();
        store.append(make_record(&meta, &mut buf, 1));
        store.reset();
        assert!(store.is_empty());
        assert_eq!(store.iter().count(), 0);
    }

    #[test]
    fn varlen_content_is_copied() {
        let pool = Arc::new(PagePool::new());
        let meta =
            RecordMeta::all_nullable(vec![FieldType::Character { varying: true, length: None }]);
        let mut store = IterableRecordStore::new(pool.clone(), Arc::clone(&meta));
        let source_arena = PagedArena::new(pool);
        let mut buf = vec![0u8; meta.record_size()];
        let rec = RecordRef::from_slice(&mut buf);
        rec.set_value(&meta, 0, &Value::Character("abc".into()), &source_arena);
        store.append(rec);
        source_arena.reset();
        let got = store.iter().next().unwrap();
        assert_eq!(got.get_value(&meta, 0), Value::Character("abc".into()));
    }

    #[test]
    fn many_records_cross_page_boundaries() {
        let mut store = store_of_int4();
        let meta = Arc::clone(store.meta());
        let mut buf = Vec::new();
        // enough records to spill over one 2MiB page
        let n = 300_000;
        for v in 0..n {
            store.append(make_record(&meta, &mut buf, v));
        }
        let mut expected = 0;
        for rec in store.iter() {
            assert_eq!(rec.get_i32(meta.value_offset(0)), expected);
            expected += 1;
        }
        assert_eq!(expected, n);
    }
}

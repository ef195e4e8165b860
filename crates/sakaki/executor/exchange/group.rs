use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use sakaki_common::meta::RecordMeta;
use sakaki_data::{
    compare_record_fields, hash_record_fields, IterableRecordStore, PagePool, RecordRef,
};

use crate::error::OperatorError;
use crate::exchange::GroupRead;
use crate::plan::GroupSpec;

/// Records of one producer task for one consumer partition, sorted by key
/// at flush time.
struct SortedRun {
    /// Keeps the record bytes alive for the refs in `order`.
    _store: IterableRecordStore,
    order: Vec<RecordRef>,
}

/// Key-partitioned exchange with sorted merge at the reader.
///
/// Writers hash records over the consumer partitions and sort each
/// partition when the producer task flushes; readers merge the sorted runs
/// of every producer, so groups appear in key order globally.
pub struct GroupExchange {
    meta: Arc<RecordMeta>,
    key_fields: Vec<usize>,
    partitions: usize,
    group_limit: Option<usize>,
    collected: Mutex<Vec<Vec<SortedRun>>>,
}

impl GroupExchange {
    pub fn new(spec: &GroupSpec) -> Arc<Self> {
        let partitions = spec.partitions.max(1);
        Arc::new(Self {
            meta: Arc::clone(&spec.meta),
            key_fields: spec.key_fields.clone(),
            partitions,
            group_limit: spec.group_limit,
            collected: Mutex::new((0..partitions).map(|_| Vec::new()).collect()),
        })
    }

    pub fn meta(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn create_writer(self: &Arc<Self>, pool: Arc<PagePool>) -> GroupWriter {
        let stores = (0..self.partitions)
            .map(|_| IterableRecordStore::new(Arc::clone(&pool), Arc::clone(&self.meta)))
            .collect();
        GroupWriter { exchange: Arc::clone(self), stores, pool }
    }

    /// No producer delivered any data yet.
    pub fn no_input(&self) -> bool {
        self.collected.lock().expect("collected poisoned").iter().all(Vec::is_empty)
    }

    pub fn create_reader(&self, partition: usize, consumer_partitions: usize) -> GroupReader {
        let mut collected = self.collected.lock().expect("collected poisoned");
        let runs: Vec<SortedRun> = if consumer_partitions <= 1 {
            collected.iter_mut().flat_map(std::mem::take).collect()
        } else {
            std::mem::take(&mut collected[partition % self.partitions])
        };
        let positions = vec![0; runs.len()];
        GroupReader {
            meta: Arc::clone(&self.meta),
            key_fields: self.key_fields.clone(),
            group_limit: self.group_limit,
            runs,
            positions,
            head: None,
            current_member: None,
            members_delivered: 0,
        }
    }
}

/// Producer handle hashing records over the consumer partitions.
pub struct GroupWriter {
    exchange: Arc<GroupExchange>,
    stores: Vec<IterableRecordStore>,
    pool: Arc<PagePool>,
}

impl GroupWriter {
    pub fn meta(&self) -> Arc<RecordMeta> {
        Arc::clone(&self.exchange.meta)
    }

    pub fn write(&mut self, record: RecordRef) -> Result<(), OperatorError> {
        let h = hash_record_fields(&self.exchange.meta, record, &self.exchange.key_fields);
        let p = (h % self.exchange.partitions as u64) as usize;
        self.stores[p].append(record);
        Ok(())
    }

    pub fn flush(&mut self) {
        let meta = Arc::clone(&self.exchange.meta);
        let key_fields = self.exchange.key_fields.clone();
        for (p, store) in self.stores.iter_mut().enumerate() {
            if store.is_empty() {
                continue;
            }
            let full = std::mem::replace(
                store,
                IterableRecordStore::new(Arc::clone(&self.pool), Arc::clone(&meta)),
            );
            let mut order: Vec<RecordRef> = full.iter().collect();
            order.sort_by(|a, b| compare_record_fields(&meta, &key_fields, *a, *b));
            let mut collected = self.exchange.collected.lock().expect("collected poisoned");
            collected[p].push(SortedRun { _store: full, order });
        }
    }
}

/// Merging reader implementing the group protocol.
pub struct GroupReader {
    meta: Arc<RecordMeta>,
    key_fields: Vec<usize>,
    group_limit: Option<usize>,
    runs: Vec<SortedRun>,
    positions: Vec<usize>,
    head: Option<RecordRef>,
    current_member: Option<RecordRef>,
    members_delivered: usize,
}

impl GroupReader {
    pub fn meta(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    fn peek(&self, run: usize) -> Option<RecordRef> {
        let sorted = &self.runs[run];
        sorted.order.get(self.positions[run]).copied()
    }

    /// Run holding the smallest current record.
    fn min_run(&self) -> Option<usize> {
        let mut best: Option<(usize, RecordRef)> = None;
        for run in 0..self.runs.len() {
            let Some(rec) = self.peek(run) else { continue };
            match &best {
                Some((_, current))
                    if compare_record_fields(&self.meta, &self.key_fields, rec, *current)
                        != Ordering::Less => {}
                _ => best = Some((run, rec)),
            }
        }
        best.map(|(run, _)| run)
    }

    fn same_key_as_head(&self, rec: RecordRef) -> bool {
        let head = self.head.expect("head present inside a group");
        compare_record_fields(&self.meta, &self.key_fields, rec, head) == Ordering::Equal
    }

    /// Consumes every remaining record of the current group.
    fn skip_rest_of_group(&mut self) {
        while let Some(run) = self.min_run() {
            let rec = self.peek(run).expect("min run has a record");
            if !self.same_key_as_head(rec) {
                break;
            }
            self.positions[run] += 1;
        }
    }
}

impl GroupRead for GroupReader {
    fn next_group(&mut self) -> bool {
        if self.head.is_some() {
            self.skip_rest_of_group();
        }
        self.current_member = None;
        self.members_delivered = 0;
        match self.min_run() {
            Some(run) => {
                self.head = self.peek(run);
                true
            }
            None => {
                self.head = None;
                false
            }
        }
    }

    fn group(&self) -> RecordRef {
        self.head.expect("positioned on a group")
    }

    fn next_member(&mut self) -> bool {
        if let Some(limit) = self.group_limit {
            if self.members_delivered >= limit {
                return false;
            }
        }
        let Some(run) = self.min_run() else {
            return false;
        };
        let rec = self.peek(run).expect("min run has a record");
        if !self.same_key_as_head(rec) {
            return false;
        }
        self.positions[run] += 1;
        self.current_member = Some(rec);
        self.members_delivered += 1;
        true
    }

    fn member(&self) -> RecordRef {
        self.current_member.expect("positioned on a member")
    }
}

// Runs own their stores; refs in `order` point into them.
unsafe impl Send for SortedRun {}

#[cfg(test)]
mod tests {
    use super::*;
    use sakaki_common::types::{FieldType, Value};
    use sakaki_data::PagedArena;

    fn spec(partitions: usize, group_limit: Option<usize>) -> GroupSpec {
        GroupSpec {
            meta: RecordMeta::all_nullable(vec![FieldType::Int4, FieldType::Float8]),
            key_fields: vec![0],
            partitions,
            group_limit,
        }
    }

    fn write_rows(w: &mut GroupWriter, meta: &RecordMeta, rows: &[(i32, f64)]) {
        let arena = PagedArena::new(Arc::new(PagePool::new()));
        let mut buf = vec![0u8; meta.record_size()];
        for (k, v) in rows {
            let rec = RecordRef::from_slice(&mut buf);
            rec.set_value(meta, 0, &Value::Int4(*k), &arena);
            rec.set_value(meta, 1, &Value::Float8(*v), &arena);
            w.write(rec).unwrap();
        }
    }

    fn read_all(reader: &mut GroupReader, meta: &RecordMeta) -> Vec<(Value, Vec<Value>)> {
        let mut out = Vec::new();
        while reader.next_group() {
            let key = reader.group().get_value(meta, 0);
            let mut members = Vec::new();
            while reader.next_member() {
                members.push(reader.member().get_value(meta, 1));
            }
            out.push((key, members));
        }
        out
    }

    #[test]
    fn groups_appear_in_key_order_across_producers() {
        let spec = spec(2, None);
        let meta = Arc::clone(&spec.meta);
        let x = GroupExchange::new(&spec);
        let pool = Arc::new(PagePool::new());
        let mut w0 = x.create_writer(Arc::clone(&pool));
        let mut w1 = x.create_writer(pool);
        write_rows(&mut w0, &meta, &[(3, 0.3), (1, 0.1)]);
        write_rows(&mut w1, &meta, &[(2, 0.2), (1, 0.15)]);
        w0.flush();
        w1.flush();
        // single consumer sees all partitions merged in key order
        let mut r = x.create_reader(0, 1);
        let groups = read_all(&mut r, &meta);
        let keys: Vec<_> = groups.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Value::Int4(1), Value::Int4(2), Value::Int4(3)]);
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn group_limit_caps_members_deterministically() {
        let spec = spec(1, Some(1));
        let meta = Arc::clone(&spec.meta);
        let x = GroupExchange::new(&spec);
        let mut w = x.create_writer(Arc::new(PagePool::new()));
        write_rows(&mut w, &meta, &[(7, 0.1), (7, 0.2), (7, 0.3), (8, 0.4)]);
        w.flush();
        let mut r = x.create_reader(0, 1);
        let groups = read_all(&mut r, &meta);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1.len(), 1);
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn partitioned_consumers_cover_all_keys_disjointly() {
        let spec = spec(2, None);
        let meta = Arc::clone(&spec.meta);
        let x = GroupExchange::new(&spec);
        let mut w = x.create_writer(Arc::new(PagePool::new()));
        let rows: Vec<(i32, f64)> = (0..20).map(|i| (i, f64::from(i))).collect();
        write_rows(&mut w, &meta, &rows);
        w.flush();
        let mut seen = Vec::new();
        for p in 0..2 {
            let mut r = x.create_reader(p, 2);
            for (k, _) in read_all(&mut r, &meta) {
                seen.push(k);
            }
        }
        seen.sort_by_key(|v| match v {
            Value::Int4(i) => *i,
            _ => unreachable!(),
        });
        let expected: Vec<Value> = (0..20).map(Value::Int4).collect();
        assert_eq!(seen, expected);
    }
}

use std::sync::{Arc, Mutex};

use sakaki_common::meta::RecordMeta;
use sakaki_data::{IterableRecordStore, PagePool, RecordRef};

use crate::error::OperatorError;
use crate::plan::ForwardSpec;

/// Order-preserving exchange without keying.
///
/// Each producer partition keeps its own record order; a consumer either
/// reads its matching partition or, when single partitioned, the
/// concatenation of all of them.
pub struct ForwardExchange {
    meta: Arc<RecordMeta>,
    limit: Option<usize>,
    collected: Mutex<Vec<(usize, IterableRecordStore)>>,
    producer_sequence: Mutex<usize>,
}

impl ForwardExchange {
    pub fn new(spec: &ForwardSpec) -> Arc<Self> {
        Arc::new(Self {
            meta: Arc::clone(&spec.meta),
            limit: spec.limit,
            collected: Mutex::new(Vec::new()),
            producer_sequence: Mutex::new(0),
        })
    }

    pub fn meta(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    pub fn create_writer(self: &Arc<Self>, pool: Arc<PagePool>) -> ForwardWriter {
        let partition = {
            let mut seq = self.producer_sequence.lock().expect("sequence poisoned");
            let p = *seq;
            *seq += 1;
            p
        };
        ForwardWriter {
            exchange: Arc::clone(self),
            partition,
            store: IterableRecordStore::new(Arc::clone(&pool), Arc::clone(&self.meta)),
            pool,
        }
    }

    /// No producer delivered any data yet.
    pub fn no_input(&self) -> bool {
        self.collected.lock().expect("collected poisoned").is_empty()
    }

    pub fn create_reader(&self, partition: usize, consumer_partitions: usize) -> FlatReader {
        let mut collected = self.collected.lock().expect("collected poisoned");
        let stores = if consumer_partitions <= 1 {
            let mut drained: Vec<(usize, IterableRecordStore)> = collected.drain(..).collect();
            drained.sort_by_key(|(p, _)| *p);
            drained.into_iter().map(|(_, s)| s).collect()
        } else {
            let mut kept = Vec::new();
            let mut taken = Vec::new();
            for (p, s) in collected.drain(..) {
                if p % consumer_partitions == partition {
                    taken.push(s);
                } else {
                    kept.push((p, s));
                }
            }
            *collected = kept;
            taken
        };
        FlatReader {
            meta: Arc::clone(&self.meta),
            stores,
            limit: self.limit,
            store_index: 0,
            offset: 0,
            delivered: 0,
        }
    }
}

/// Producer handle appending to its own partition.
pub struct ForwardWriter {
    exchange: Arc<ForwardExchange>,
    partition: usize,
    store: IterableRecordStore,
    pool: Arc<PagePool>,
}

impl ForwardWriter {
    pub fn meta(&self) -> Arc<RecordMeta> {
        Arc::clone(self.exchange.meta())
    }

    pub fn write(&mut self, record: RecordRef) -> Result<(), OperatorError> {
        self.store.append(record);
        Ok(())
    }

    pub fn flush(&mut self) {
        if self.store.is_empty() {
            return;
        }
        let full = std::mem::replace(
            &mut self.store,
            IterableRecordStore::new(Arc::clone(&self.pool), Arc::clone(self.exchange.meta())),
        );
        let mut collected = self.exchange.collected.lock().expect("collected poisoned");
        collected.push((self.partition, full));
    }
}

/// Consumer handle iterating records in partition order.
pub struct FlatReader {
    meta: Arc<RecordMeta>,
    stores: Vec<IterableRecordStore>,
    limit: Option<usize>,
    store_index: usize,
    offset: usize,
    delivered: usize,
}

impl FlatReader {
    pub fn meta(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    /// Next record, or `None` when exhausted (or the limit was reached).
    pub fn next_record(&mut self) -> Option<RecordRef> {
        if let Some(limit) = self.limit {
            if self.delivered >= limit {
                return None;
            }
        }
        while self.store_index < self.stores.len() {
            if let Some(rec) = self.stores[self.store_index].record_at(self.offset) {
                self.offset += 1;
                self.delivered += 1;
                return Some(rec);
            }
            self.store_index += 1;
            self.offset = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sakaki_common::types::{FieldType, Value};
    use sakaki_data::PagedArena;

    fn spec() -> ForwardSpec {
        ForwardSpec { meta: RecordMeta::all_nullable(vec![FieldType::Int4]), limit: None }
    }

    fn write_values(w: &mut ForwardWriter, meta: &RecordMeta, values: &[i32]) {
        let arena = PagedArena::new(Arc::new(PagePool::new()));
        let mut buf = vec![0u8; meta.record_size()];
        for v in values {
            let rec = RecordRef::from_slice(&mut buf);
            rec.set_value(meta, 0, &Value::Int4(*v), &arena);
            w.write(rec).unwrap();
        }
    }

    #[test]
    fn single_partition_preserves_order() {
        let spec = spec();
        let meta = Arc::clone(&spec.meta);
        let x = ForwardExchange::new(&spec);
        let pool = Arc::new(PagePool::new());
        let mut w = x.create_writer(pool);
        write_values(&mut w, &meta, &[3, 1, 2]);
        w.flush();
        let mut r = x.create_reader(0, 1);
        let mut seen = Vec::new();
        while let Some(rec) = r.next_record() {
            seen.push(rec.get_value(&meta, 0));
        }
        assert_eq!(seen, vec![Value::Int4(3), Value::Int4(1), Value::Int4(2)]);
    }

    #[test]
    fn partitions_concatenate_in_producer_order() {
        let spec = spec();
        let meta = Arc::clone(&spec.meta);
        let x = ForwardExchange::new(&spec);
        let pool = Arc::new(PagePool::new());
        let mut w0 = x.create_writer(Arc::clone(&pool));
        let mut w1 = x.create_writer(pool);
        write_values(&mut w1, &meta, &[10]);
        write_values(&mut w0, &meta, &[1, 2]);
        // flush out of order; producer order still governs
        w1.flush();
        w0.flush();
        let mut r = x.create_reader(0, 1);
        let mut seen = Vec::new();
        while let Some(rec) = r.next_record() {
            seen.push(rec.get_value(&meta, 0));
        }
        assert_eq!(seen, vec![Value::Int4(1), Value::Int4(2), Value::Int4(10)]);
    }

    #[test]
    fn limit_caps_delivery() {
        let mut spec = spec();
        spec.limit = Some(2);
        let meta = Arc::clone(&spec.meta);
        let x = ForwardExchange::new(&spec);
        let mut w = x.create_writer(Arc::new(PagePool::new()));
        write_values(&mut w, &meta, &[1, 2, 3, 4]);
        w.flush();
        let mut r = x.create_reader(0, 1);
        let mut n = 0;
        while r.next_record().is_some() {
            n += 1;
        }
        assert_eq!(n, 2);
    }
}

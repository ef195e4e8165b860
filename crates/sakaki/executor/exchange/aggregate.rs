//! Aggregate exchange: incremental per-partition accumulation with a final
//! merge at the reader.
//!
//! Group keys are coded with the order-preserving key codec, so the
//! per-partition maps iterate in key order and the reader's k-way merge
//! yields globally key-ordered output. Accumulators are associative:
//! merging the partials of any partitioning equals aggregating the whole
//! input directly.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashSet;

use sakaki_common::error::{ErrorCode, ErrorInfo};
use sakaki_common::meta::RecordMeta;
use sakaki_common::status::Status;
use sakaki_common::types::Value;
use sakaki_data::{IterableRecordStore, PagePool, PagedArena, RecordRef};
use sakaki_kvs::coder::{self, CodingSpec};
use sakaki_kvs::stream::WritableStream;

use crate::error::OperatorError;
use crate::exchange::GroupRead;
use crate::expr::{self, EvalError};
use crate::plan::AggregateSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunctionKind {
    Sum,
    Count,
    CountDistinct,
    Min,
    Max,
    Avg,
}

/// Partial state of one aggregate function for one group.
#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(Option<Value>),
    Count(i64),
    Distinct(FxHashSet<Vec<u8>>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: Option<Value>, count: i64 },
}

impl Accumulator {
    pub fn new(kind: AggregateFunctionKind) -> Self {
        match kind {
            AggregateFunctionKind::Sum => Accumulator::Sum(None),
            AggregateFunctionKind::Count => Accumulator::Count(0),
            AggregateFunctionKind::CountDistinct => Accumulator::Distinct(FxHashSet::default()),
            AggregateFunctionKind::Min => Accumulator::Min(None),
            AggregateFunctionKind::Max => Accumulator::Max(None),
            AggregateFunctionKind::Avg => Accumulator::Avg { sum: None, count: 0 },
        }
    }

    /// Folds one input value in. NULL inputs are skipped, as SQL
    /// aggregates do.
    pub fn accumulate(&mut self, value: &Value) -> Result<(), EvalError> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            Accumulator::Sum(sum) => {
                *sum = Some(match sum.take() {
                    Some(s) => expr::numeric_add(s, value.clone())?,
                    None => value.clone(),
                });
            }
            Accumulator::Count(n) => *n += 1,
            Accumulator::Distinct(seen) => {
                seen.insert(distinct_token(value));
            }
            Accumulator::Min(current) => {
                let replace = match current {
                    Some(c) => expr::compare_values(value, c)? == Value::Boolean(true),
                    None => true,
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
            Accumulator::Max(current) => {
                let replace = match current {
                    Some(c) => expr::compare_values(c, value)? == Value::Boolean(true),
                    None => true,
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
            Accumulator::Avg { sum, count } => {
                *sum = Some(match sum.take() {
                    Some(s) => expr::numeric_add(s, value.clone())?,
                    None => value.clone(),
                });
                *count += 1;
            }
        }
        Ok(())
    }

    /// Merges the partial of another partition in.
    pub fn merge(&mut self, other: Accumulator) -> Result<(), EvalError> {
        match (self, other) {
            (Accumulator::Sum(a), Accumulator::Sum(b)) => {
                if let Some(bv) = b {
                    *a = Some(match a.take() {
                        Some(av) => expr::numeric_add(av, bv)?,
                        None => bv,
                    });
                }
            }
            (Accumulator::Count(a), Accumulator::Count(b)) => *a += b,
            (Accumulator::Distinct(a), Accumulator::Distinct(b)) => a.extend(b),
            (Accumulator::Min(a), Accumulator::Min(b)) => {
                if let Some(bv) = b {
                    let replace = match a {
                        Some(av) => expr::compare_values(&bv, av)? == Value::Boolean(true),
                        None => true,
                    };
                    if replace {
                        *a = Some(bv);
                    }
                }
            }
            (Accumulator::Max(a), Accumulator::Max(b)) => {
                if let Some(bv) = b {
                    let replace = match a {
                        Some(av) => expr::compare_values(av, &bv)? == Value::Boolean(true),
                        None => true,
                    };
                    if replace {
                        *a = Some(bv);
                    }
                }
            }
            (
                Accumulator::Avg { sum: a_sum, count: a_count },
                Accumulator::Avg { sum: b_sum, count: b_count },
            ) => {
                if let Some(bv) = b_sum {
                    *a_sum = Some(match a_sum.take() {
                        Some(av) => expr::numeric_add(av, bv)?,
                        None => bv,
                    });
                }
                *a_count += b_count;
            }
            _ => return Err(EvalError::TypeMismatch),
        }
        Ok(())
    }

    /// Produces the final value; empty groups yield NULL (zero for
    /// counts).
    pub fn finalize(self) -> Result<Value, EvalError> {
        Ok(match self {
            Accumulator::Sum(sum) => sum.unwrap_or(Value::Null),
            Accumulator::Count(n) => Value::Int8(n),
            Accumulator::Distinct(seen) => Value::Int8(seen.len() as i64),
            Accumulator::Min(v) | Accumulator::Max(v) => v.unwrap_or(Value::Null),
            Accumulator::Avg { sum, count } => match sum {
                Some(s) => expr::numeric_divide(s, Value::Int8(count))?,
                None => Value::Null,
            },
        })
    }
}

/// Stable token for distinct counting.
fn distinct_token(value: &Value) -> Vec<u8> {
    format!("{value:?}").into_bytes()
}

struct GroupState {
    key: Vec<Value>,
    accumulators: Vec<Accumulator>,
}

type PartitionMap = BTreeMap<Vec<u8>, GroupState>;

/// Key-partitioned aggregating exchange.
pub struct AggregateExchange {
    meta: Arc<RecordMeta>,
    key_fields: Vec<usize>,
    functions: Vec<(AggregateFunctionKind, usize)>,
    output_meta: Arc<RecordMeta>,
    partitions: usize,
    collected: Mutex<Vec<Vec<PartitionMap>>>,
}

impl AggregateExchange {
    pub fn new(spec: &AggregateSpec) -> Arc<Self> {
        let partitions = spec.partitions.max(1);
        Arc::new(Self {
            meta: Arc::clone(&spec.meta),
            key_fields: spec.key_fields.clone(),
            functions: spec.functions.iter().map(|f| (f.kind, f.source_field)).collect(),
            output_meta: spec.output_meta(),
            partitions,
            collected: Mutex::new((0..partitions).map(|_| Vec::new()).collect()),
        })
    }

    pub fn meta(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    pub fn output_meta(&self) -> &Arc<RecordMeta> {
        &self.output_meta
    }

    /// Codes the group key so that byte order equals key order.
    fn encode_key(&self, key: &[Value]) -> Result<Vec<u8>, OperatorError> {
        let mut buf = vec![0u8; 64];
        loop {
            let mut out = WritableStream::new(&mut buf, true);
            for (pos, &field) in self.key_fields.iter().enumerate() {
                coder::encode_value_nullable(
                    &key[pos],
                    self.meta.at(field),
                    CodingSpec::Ascending,
                    &mut out,
                )
                .map_err(|e| crate::error::codec_operator_error(&e))?;
            }
            let n = out.size();
            if n <= buf.len() {
                buf.truncate(n);
                return Ok(buf);
            }
            buf.resize(n, 0);
        }
    }

    pub fn create_writer(self: &Arc<Self>) -> AggregateWriter {
        AggregateWriter {
            exchange: Arc::clone(self),
            partitions: (0..self.partitions).map(|_| PartitionMap::new()).collect(),
        }
    }

    /// No producer delivered any data yet.
    pub fn no_input(&self) -> bool {
        self.collected.lock().expect("collected poisoned").iter().all(Vec::is_empty)
    }

    pub fn create_reader(
        &self,
        partition: usize,
        consumer_partitions: usize,
        pool: Arc<PagePool>,
    ) -> AggregateReader {
        let maps: Vec<PartitionMap> = {
            let mut collected = self.collected.lock().expect("collected poisoned");
            if consumer_partitions <= 1 {
                collected.iter_mut().flat_map(std::mem::take).collect()
            } else {
                std::mem::take(&mut collected[partition % self.partitions])
            }
        };
        AggregateReader::build(self, maps, pool)
    }

    fn eval_error(e: EvalError) -> OperatorError {
        OperatorError::new(ErrorInfo::new(
            ErrorCode::ValueEvaluationException,
            e.to_string(),
            Status::ErrExpressionEvaluationFailure,
        ))
    }
}

/// Producer handle maintaining per-partition partial aggregates.
pub struct AggregateWriter {
    exchange: Arc<AggregateExchange>,
    partitions: Vec<PartitionMap>,
}

impl AggregateWriter {
    pub fn meta(&self) -> Arc<RecordMeta> {
        Arc::clone(&self.exchange.meta)
    }

    pub fn write(&mut self, record: RecordRef) -> Result<(), OperatorError> {
        let x = &self.exchange;
        let key: Vec<Value> =
            x.key_fields.iter().map(|&i| record.get_value(&x.meta, i)).collect();
        let coded = x.encode_key(&key)?;
        let p = partition_of(&coded, x.partitions);
        let state = self.partitions[p].entry(coded).or_insert_with(|| GroupState {
            key,
            accumulators: x.functions.iter().map(|(k, _)| Accumulator::new(*k)).collect(),
        });
        for (slot, (_, source)) in state.accumulators.iter_mut().zip(x.functions.iter()) {
            let value = record.get_value(&x.meta, *source);
            slot.accumulate(&value).map_err(AggregateExchange::eval_error)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) {
        let mut collected = self.exchange.collected.lock().expect("collected poisoned");
        for (p, map) in self.partitions.iter_mut().enumerate() {
            if map.is_empty() {
                continue;
            }
            collected[p].push(std::mem::take(map));
        }
    }
}

fn partition_of(coded_key: &[u8], partitions: usize) -> usize {
    use std::hash::{Hash, Hasher};
    let mut h = rustc_hash::FxHasher::default();
    coded_key.hash(&mut h);
    (h.finish() % partitions as u64) as usize
}

/// Final-phase reader: merges partials and yields one record per key, in
/// key order.
pub struct AggregateReader {
    store: IterableRecordStore,
    position: Option<usize>,
    member_pending: bool,
}

impl AggregateReader {
    /// Layout of the aggregated output records.
    pub fn meta(&self) -> &Arc<RecordMeta> {
        self.store.meta()
    }

    fn build(exchange: &AggregateExchange, maps: Vec<PartitionMap>, pool: Arc<PagePool>) -> Self {
        // merge all partials; BTreeMap keeps coded-key (= key) order
        let mut merged: PartitionMap = PartitionMap::new();
        for map in maps {
            for (coded, state) in map {
                match merged.entry(coded) {
                    std::collections::btree_map::Entry::Vacant(v) => {
                        v.insert(state);
                    }
                    std::collections::btree_map::Entry::Occupied(mut o) => {
                        let existing = o.get_mut();
                        for (a, b) in
                            existing.accumulators.iter_mut().zip(state.accumulators)
                        {
                            // partials of the same function kind always merge
                            a.merge(b).expect("matching accumulator kinds");
                        }
                    }
                }
            }
        }
        let output_meta = Arc::clone(exchange.output_meta());
        let mut store = IterableRecordStore::new(Arc::clone(&pool), Arc::clone(&output_meta));
        let arena = PagedArena::new(pool);
        let mut buf = vec![0u8; output_meta.record_size()];
        for (_, state) in merged {
            let rec = RecordRef::from_slice(&mut buf);
            for (pos, key_value) in state.key.iter().enumerate() {
                rec.set_value(&output_meta, pos, key_value, &arena);
            }
            let key_count = state.key.len();
            for (i, acc) in state.accumulators.into_iter().enumerate() {
                let value = acc.finalize().unwrap_or(Value::Null);
                rec.set_value(&output_meta, key_count + i, &value, &arena);
            }
            store.append(rec);
        }
        Self { store, position: None, member_pending: false }
    }

    pub fn output_count(&self) -> usize {
        self.store.count()
    }
}

impl GroupRead for AggregateReader {
    fn next_group(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next >= self.store.count() {
            self.position = Some(self.store.count());
            self.member_pending = false;
            return false;
        }
        self.position = Some(next);
        self.member_pending = true;
        true
    }

    fn group(&self) -> RecordRef {
        let pos = self.position.expect("positioned on a group");
        self.store.record_at(pos).expect("group record present")
    }

    fn next_member(&mut self) -> bool {
        // aggregated output has exactly one member per group
        std::mem::take(&mut self.member_pending)
    }

    fn member(&self) -> RecordRef {
        self.group()
    }
}

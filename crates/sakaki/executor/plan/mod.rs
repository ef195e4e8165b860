//! Compiled statement representation handed over by the planner.
//!
//! A statement is a DAG of steps: processes (operator chains sharing block
//! scopes) and exchanges (forward/group/aggregate data transport). Steps
//! reference each other by id; operator specs reference block variable
//! fields by index, all name resolution having happened at compile time.

use std::sync::Arc;

use sakaki_common::meta::{ExternalRecordMeta, RecordMeta};
use sakaki_common::types::{FieldType, Value};
use sakaki_index::{FieldInfo, PrimaryTarget, SecondaryTarget};
use sakaki_kvs::coder::CodingSpec;
use sakaki_kvs::EndPointKind;
use sakaki_storage::StorageId;

use crate::exchange::aggregate::AggregateFunctionKind;
use crate::expr::Expression;

pub type StepId = usize;

/// One node of the step DAG.
pub struct Step {
    pub id: StepId,
    /// Upstream steps feeding the main input ports, in port order.
    pub inputs: Vec<StepId>,
    /// Upstream steps feeding sub-input ports, drained before main tasks.
    pub sub_inputs: Vec<StepId>,
    pub body: StepBody,
}

pub enum StepBody {
    Process(ProcessStep),
    Forward(ForwardSpec),
    Group(GroupSpec),
    Aggregate(AggregateSpec),
}

impl Step {
    pub fn is_process(&self) -> bool {
        matches!(self.body, StepBody::Process(_))
    }
}

/// The whole compiled statement.
pub struct StepGraph {
    pub steps: Vec<Step>,
}

impl StepGraph {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        for (i, s) in steps.iter().enumerate() {
            assert_eq!(i, s.id, "step ids must be dense and in position");
        }
        Arc::new(Self { steps })
    }

    pub fn step(&self, id: StepId) -> &Step {
        &self.steps[id]
    }

    /// Downstream consumers of `id` (main and sub inputs).
    pub fn downstreams(&self, id: StepId) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|s| s.inputs.contains(&id) || s.sub_inputs.contains(&id))
            .map(|s| s.id)
            .collect()
    }

    /// Steps in a topological order (inputs before consumers).
    pub fn topological_order(&self) -> Vec<StepId> {
        let mut order = Vec::with_capacity(self.steps.len());
        let mut pending: Vec<usize> = self
            .steps
            .iter()
            .map(|s| s.inputs.len() + s.sub_inputs.len())
            .collect();
        let mut ready: Vec<StepId> =
            self.steps.iter().filter(|s| pending[s.id] == 0).map(|s| s.id).collect();
        while let Some(id) = ready.pop() {
            order.push(id);
            for d in self.downstreams(id) {
                pending[d] -= 1;
                if pending[d] == 0 {
                    ready.push(d);
                }
            }
        }
        assert_eq!(order.len(), self.steps.len(), "step graph must be acyclic");
        order
    }
}

/// A compute step: a chain of relational operators over block scopes.
pub struct ProcessStep {
    pub operators: Vec<OperatorSpec>,
    /// Entry operator driving the chain.
    pub root: usize,
    /// Variable-table layout per block scope.
    pub block_metas: Vec<Arc<RecordMeta>>,
    /// Fixed partition count; `None` derives it from the plan shape.
    pub partitions: Option<usize>,
}

impl ProcessStep {
    pub fn has_emit(&self) -> bool {
        self.operators.iter().any(|o| matches!(o.kind, OperatorKind::Emit(_)))
    }

    pub fn has_write(&self) -> bool {
        self.operators.iter().any(|o| matches!(o.kind, OperatorKind::Write(_)))
    }

    pub fn root_scan(&self) -> Option<&ScanSpec> {
        match &self.operators[self.root].kind {
            OperatorKind::Scan(s) => Some(s),
            _ => None,
        }
    }
}

pub struct OperatorSpec {
    /// Position in [`ProcessStep::operators`].
    pub index: usize,
    /// Block scope the operator works in.
    pub block: usize,
    pub downstream: Option<usize>,
    pub kind: OperatorKind,
}

pub enum OperatorKind {
    Values(ValuesSpec),
    Scan(ScanSpec),
    Find(FindSpec),
    JoinFind(JoinFindSpec),
    JoinScan(JoinScanSpec),
    Filter(FilterSpec),
    Project(ProjectSpec),
    Emit(EmitSpec),
    Write(WriteSpec),
    TakeFlat(TakeFlatSpec),
    TakeGroup(TakeGroupSpec),
    TakeCogroup(TakeCogroupSpec),
    Offer(OfferSpec),
    AggregateGroup(AggregateGroupSpec),
}

/// One coded key component with its declared type, direction and
/// nullability (the coded form differs for nullable fields).
#[derive(Clone)]
pub struct KeyValue {
    pub value: Value,
    pub field_type: FieldType,
    pub spec: CodingSpec,
    pub nullable: bool,
}

impl KeyValue {
    pub fn nullable_asc(value: Value, field_type: FieldType) -> Self {
        Self { value, field_type, spec: CodingSpec::Ascending, nullable: true }
    }
}

/// One key component computed at run time from block variables.
pub struct KeyExpression {
    pub expr: Expression,
    pub field_type: FieldType,
    pub spec: CodingSpec,
    pub nullable: bool,
}

impl KeyExpression {
    pub fn nullable_asc(expr: Expression, field_type: FieldType) -> Self {
        Self { expr, field_type, spec: CodingSpec::Ascending, nullable: true }
    }
}

/// One bound of a scan range, as compile-time key values.
#[derive(Clone)]
pub struct ScanBound {
    pub keys: Vec<KeyValue>,
    pub kind: EndPointKind,
}

impl ScanBound {
    pub fn unbound() -> Self {
        Self { keys: Vec::new(), kind: EndPointKind::Unbound }
    }

    pub fn new(keys: Vec<KeyValue>, kind: EndPointKind) -> Self {
        Self { keys, kind }
    }
}

/// Literal rows driving the chain (INSERT ... VALUES and friends).
pub struct ValuesSpec {
    /// Block fields the row values land in.
    pub targets: Vec<usize>,
    pub rows: Vec<Vec<Value>>,
}

/// Scan over a primary index, optionally entered through a secondary.
pub struct ScanSpec {
    /// Storage actually scanned (the secondary when present).
    pub storage_name: String,
    pub secondary: Option<SecondaryScanInfo>,
    /// Decode targets for the primary key fields, into block variables.
    pub key_fields: Vec<FieldInfo>,
    /// Decode targets for the primary value fields, into block variables.
    pub value_fields: Vec<FieldInfo>,
    pub begin: ScanBound,
    pub end: ScanBound,
    pub limit: Option<u64>,
    /// Eligible for parallel strand execution.
    pub parallel: bool,
    /// Registry entry for the authorization check.
    pub storage_entry: Option<StorageId>,
}

pub struct SecondaryScanInfo {
    pub primary_storage: String,
    /// Types/specs of the secondary key head, skipped to reach the
    /// embedded primary key.
    pub secondary_key_fields: Vec<FieldInfo>,
}

/// Single-row lookup by a key computed from block variables.
pub struct FindSpec {
    pub storage_name: String,
    /// Key expressions in key order.
    pub key: Vec<KeyExpression>,
    pub key_fields: Vec<FieldInfo>,
    pub value_fields: Vec<FieldInfo>,
    pub storage_entry: Option<StorageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Semi,
    Anti,
    LeftOuter,
}

/// Join with a single-row index lookup on the right side.
pub struct JoinFindSpec {
    pub join_kind: JoinKind,
    pub find: FindSpec,
    /// Residual condition evaluated after the right side is bound.
    pub condition: Option<Expression>,
}

/// Join with a range scan on the right side.
pub struct JoinScanSpec {
    pub join_kind: JoinKind,
    pub storage_name: String,
    /// Prefix of the right key, computed from left block variables.
    pub key_prefix: Vec<KeyExpression>,
    pub key_fields: Vec<FieldInfo>,
    pub value_fields: Vec<FieldInfo>,
    pub condition: Option<Expression>,
    pub storage_entry: Option<StorageId>,
}

pub struct FilterSpec {
    pub condition: Expression,
}

pub struct ProjectSpec {
    /// `(target block field, expression)` pairs evaluated in order.
    pub columns: Vec<(usize, Expression)>,
}

pub struct EmitSpec {
    pub meta: Arc<ExternalRecordMeta>,
    /// Block fields forming the output row, in output order.
    pub fields: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
    Upsert,
}

/// Mapping of one block variable onto a key/value record field.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub source: usize,
    pub target: usize,
}

/// SET column of an update: the target field in the key or value record
/// plus the expression producing the new content.
pub struct UpdateColumn {
    pub key_field: Option<usize>,
    pub value_field: Option<usize>,
    pub expr: Expression,
}

/// Table write cascading to every secondary index.
pub struct WriteSpec {
    pub kind: WriteKind,
    pub primary: Arc<PrimaryTarget>,
    pub secondaries: Vec<Arc<SecondaryTarget>>,
    /// Block variables forming the key record (insert/upsert/delete and
    /// the update lookup key).
    pub key_mappings: Vec<FieldMapping>,
    /// Block variables forming the value record (insert/upsert).
    pub value_mappings: Vec<FieldMapping>,
    /// SET columns (update only).
    pub updates: Vec<UpdateColumn>,
    pub storage_entry: Option<StorageId>,
}

/// Pull records from a forward exchange.
pub struct TakeFlatSpec {
    /// Input port (position in the step's `inputs`).
    pub input: usize,
    /// `(exchange field, block field)` copy list.
    pub fields: Vec<FieldMapping>,
}

/// Pull groups from a group or aggregate exchange.
pub struct TakeGroupSpec {
    pub input: usize,
    /// Copied once per group from the group key record.
    pub key_fields: Vec<FieldMapping>,
    /// Copied per member from the member record.
    pub member_fields: Vec<FieldMapping>,
}

/// Merge several sorted group inputs over one key.
pub struct TakeCogroupSpec {
    pub inputs: Vec<usize>,
    /// Key field indices within each input's exchange meta, in key order.
    /// Key types must be identical across inputs.
    pub input_key_fields: Vec<Vec<usize>>,
    /// `(key position, block field)` copies done once per cogroup.
    pub key_fields: Vec<FieldMapping>,
}

/// Push the current record to a downstream exchange.
pub struct OfferSpec {
    /// Output port (position in the step's outputs).
    pub output: usize,
    /// `(block field, exchange field)` copy list.
    pub fields: Vec<FieldMapping>,
}

/// Per-cogroup aggregation (GROUP BY via a group exchange).
pub struct AggregateGroupSpec {
    pub functions: Vec<GroupAggregateSpec>,
}

pub struct GroupAggregateSpec {
    pub kind: AggregateFunctionKind,
    /// Cogroup input the members come from.
    pub input: usize,
    /// Field of the member record to aggregate.
    pub source_field: usize,
    /// Block field receiving the result.
    pub target: usize,
}

/// Forward exchange: order preserving per partition, no keying.
pub struct ForwardSpec {
    pub meta: Arc<RecordMeta>,
    pub limit: Option<usize>,
}

/// Group exchange: partition by key hash, sort per partition, merge at the
/// reader.
pub struct GroupSpec {
    pub meta: Arc<RecordMeta>,
    /// Key fields within `meta`.
    pub key_fields: Vec<usize>,
    pub partitions: usize,
    /// Cap on members delivered per group.
    pub group_limit: Option<usize>,
}

/// Aggregate exchange: incremental per-partition accumulation, final merge
/// at the reader.
pub struct AggregateSpec {
    pub meta: Arc<RecordMeta>,
    pub key_fields: Vec<usize>,
    pub functions: Vec<ExchangeAggregateSpec>,
    pub partitions: usize,
}

pub struct ExchangeAggregateSpec {
    pub kind: AggregateFunctionKind,
    /// Field of the input record to aggregate.
    pub source_field: usize,
    pub result_type: FieldType,
}

impl AggregateSpec {
    /// Layout of the reader output: key fields then one result per
    /// function.
    pub fn output_meta(&self) -> Arc<RecordMeta> {
        let mut fields: Vec<FieldType> =
            self.key_fields.iter().map(|&i| self.meta.at(i).clone()).collect();
        fields.extend(self.functions.iter().map(|f| f.result_type.clone()));
        RecordMeta::all_nullable(fields)
    }
}

//! Relational operator kernels.
//!
//! Operators form a chain inside a process step: driver operators (values,
//! scan, take_*) pull their input and push each record down the chain by
//! invoking their downstream operator; the rest transform the block
//! variables or perform index/channel writes. Failures are converted into
//! request-level error info by the process executor.

pub mod emit;
pub mod find;
pub mod scan;
pub mod take;
pub mod write;

use std::sync::Arc;

use sakaki_common::error::{ErrorCode, ErrorInfo};
use sakaki_common::meta::RecordMeta;
use sakaki_common::status::Status;
use sakaki_data::{IterableRecordStore, PagedArena, RecordRef};
use sakaki_kvs::coder;
use sakaki_kvs::stream::WritableStream;
use sakaki_kvs::Storage;
use sakaki_storage::{ActionSet, StorageId};

use crate::error::OperatorError;
use crate::expr::{evaluate, EvalError, Expression};
use crate::plan::{FieldMapping, KeyExpression, KeyValue, OperatorKind, ProcessStep};
use crate::process::task_context::TaskContext;
use crate::process::variable_table::VariableTable;
use crate::request_context::RequestContext;

/// One member list of a cogroup.
pub struct CogroupInput {
    pub meta: Arc<RecordMeta>,
    pub members: IterableRecordStore,
}

/// N-ary cogroup handed from `take_cogroup` to its downstream.
pub struct CogroupView<'a> {
    pub inputs: &'a [CogroupInput],
}

/// Input of one operator invocation.
pub enum OpInput<'a> {
    /// The current block variables hold a record.
    Record,
    Cogroup(&'a CogroupView<'a>),
}

/// Drives the process root operator to completion.
pub fn run_chain(
    step: &ProcessStep,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    let root = &step.operators[step.root];
    match &root.kind {
        OperatorKind::Values(spec) => take::run_values(step, root, spec, ctx, req),
        OperatorKind::Scan(spec) => scan::run_scan(step, root, spec, ctx, req),
        OperatorKind::TakeFlat(spec) => take::run_take_flat(step, root, spec, ctx, req),
        OperatorKind::TakeGroup(spec) => take::run_take_group(step, root, spec, ctx, req),
        OperatorKind::TakeCogroup(spec) => take::run_take_cogroup(step, root, spec, ctx, req),
        // a non-driver root runs once over the initial variables
        _ => dispatch(step, step.root, OpInput::Record, ctx, req),
    }
}

/// Invokes operator `idx` with `input`.
pub fn dispatch(
    step: &ProcessStep,
    idx: usize,
    input: OpInput<'_>,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    let op = &step.operators[idx];
    match (&op.kind, input) {
        (OperatorKind::Filter(spec), OpInput::Record) => {
            let vars = ctx.variables(op.block);
            let keep = evaluate(&spec.condition, vars).map_err(eval_operator_error)?;
            if keep == sakaki_common::types::Value::Boolean(true) {
                invoke_downstream(step, op, ctx, req)?;
            }
            Ok(())
        }
        (OperatorKind::Project(spec), OpInput::Record) => {
            let vars = ctx.variables(op.block);
            for (target, expr) in &spec.columns {
                let value = evaluate(expr, vars).map_err(eval_operator_error)?;
                vars.set(*target, &value, &ctx.varlen);
            }
            invoke_downstream(step, op, ctx, req)
        }
        (OperatorKind::Find(spec), OpInput::Record) => find::run_find(step, op, spec, ctx, req),
        (OperatorKind::JoinFind(spec), OpInput::Record) => {
            find::run_join_find(step, op, spec, ctx, req)
        }
        (OperatorKind::JoinScan(spec), OpInput::Record) => {
            find::run_join_scan(step, op, spec, ctx, req)
        }
        (OperatorKind::Emit(spec), OpInput::Record) => emit::run_emit(op, spec, ctx, req),
        (OperatorKind::Offer(spec), OpInput::Record) => emit::run_offer(op, spec, ctx),
        (OperatorKind::Write(spec), OpInput::Record) => write::run_write(op, spec, ctx, req),
        (OperatorKind::AggregateGroup(spec), OpInput::Cogroup(cogroup)) => {
            take::run_aggregate_group(step, op, spec, cogroup, ctx, req)
        }
        _ => Err(OperatorError::new(ErrorInfo::new(
            ErrorCode::InternalException,
            "operator invoked with an input kind it does not accept",
            Status::ErrUnknown,
        ))),
    }
}

/// Invokes the downstream operator with the current record, if any.
pub(crate) fn invoke_downstream(
    step: &ProcessStep,
    op: &crate::plan::OperatorSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    match op.downstream {
        Some(d) => dispatch(step, d, OpInput::Record, ctx, req),
        None => Ok(()),
    }
}

/// Evaluation failures abort the statement and the transaction.
pub(crate) fn eval_operator_error(e: EvalError) -> OperatorError {
    OperatorError::fatal(ErrorInfo::new(
        ErrorCode::ValueEvaluationException,
        e.to_string(),
        Status::ErrExpressionEvaluationFailure,
    ))
}

/// Verifies the session user may perform `required` on the target entry.
pub(crate) fn check_authorization(
    req: &RequestContext,
    entry: Option<StorageId>,
    required: ActionSet,
) -> Result<(), OperatorError> {
    let Some(id) = entry else {
        return Ok(());
    };
    let Some(entry) = req.storage_manager().find_entry(id) else {
        return Ok(());
    };
    let allowed = entry
        .read()
        .expect("storage entry poisoned")
        .allows_user_actions(req.session_user(), required);
    if allowed {
        return Ok(());
    }
    Err(OperatorError::new(ErrorInfo::new(
        ErrorCode::OperationDenied,
        "insufficient privilege for the operation",
        Status::ErrIllegalOperation,
    )))
}

/// Resolves a storage by name; absence is a missing target.
pub(crate) fn resolve_storage(
    req: &RequestContext,
    name: &str,
) -> Result<Arc<dyn Storage>, OperatorError> {
    req.database().get_storage(name).ok_or_else(|| {
        OperatorError::new(ErrorInfo::new(
            ErrorCode::TargetNotFoundException,
            format!("storage {name} not found"),
            Status::NotFound,
        ))
    })
}

/// Copies mapped fields of an exchange record into block variables.
pub(crate) fn copy_into_variables(
    record: RecordRef,
    meta: &RecordMeta,
    mappings: &[FieldMapping],
    vars: &VariableTable,
    varlen: &PagedArena,
) {
    for m in mappings {
        let value = record.get_value(meta, m.source);
        vars.set(m.target, &value, varlen);
    }
}

fn encode_one_key(
    value: &sakaki_common::types::Value,
    field_type: &sakaki_common::types::FieldType,
    spec: sakaki_kvs::coder::CodingSpec,
    nullable: bool,
    out: &mut WritableStream<'_>,
) -> Result<(), OperatorError> {
    let result = if nullable {
        coder::encode_value_nullable(value, field_type, spec, out)
    } else {
        coder::encode_value(value, field_type, spec, out)
    };
    result.map_err(|e| crate::error::codec_operator_error(&e))
}

/// Codes a compile-time key prefix.
pub(crate) fn encode_key_values(keys: &[KeyValue]) -> Result<Vec<u8>, OperatorError> {
    let mut buf = vec![0u8; 64];
    loop {
        let mut out = WritableStream::new(&mut buf, true);
        for k in keys {
            encode_one_key(&k.value, &k.field_type, k.spec, k.nullable, &mut out)?;
        }
        let n = out.size();
        if n <= buf.len() {
            buf.truncate(n);
            return Ok(buf);
        }
        buf.resize(n, 0);
    }
}

/// Evaluates and codes a run-time key prefix.
pub(crate) fn encode_key_expressions(
    keys: &[KeyExpression],
    vars: &VariableTable,
) -> Result<Vec<u8>, OperatorError> {
    let values: Vec<sakaki_common::types::Value> = keys
        .iter()
        .map(|k| evaluate(&k.expr, vars))
        .collect::<Result<_, _>>()
        .map_err(eval_operator_error)?;
    let mut buf = vec![0u8; 64];
    loop {
        let mut out = WritableStream::new(&mut buf, true);
        for (k, v) in keys.iter().zip(values.iter()) {
            encode_one_key(v, &k.field_type, k.spec, k.nullable, &mut out)?;
        }
        let n = out.size();
        if n <= buf.len() {
            buf.truncate(n);
            return Ok(buf);
        }
        buf.resize(n, 0);
    }
}

/// Sets the decode targets of a lookup to NULL (outer join padding).
pub(crate) fn null_fill(fields: &[sakaki_index::FieldInfo], vars: &VariableTable) {
    let record = vars.record();
    for f in fields {
        record.set_null(f.nullity_offset, true);
    }
}

/// Evaluates an optional residual join condition; absent means matched.
pub(crate) fn condition_holds(
    condition: &Option<Expression>,
    vars: &VariableTable,
) -> Result<bool, OperatorError> {
    match condition {
        None => Ok(true),
        Some(expr) => {
            let v = evaluate(expr, vars).map_err(eval_operator_error)?;
            Ok(v == sakaki_common::types::Value::Boolean(true))
        }
    }
}

use std::cmp::Ordering;
use std::sync::Arc;

use sakaki_common::error::{ErrorCode, ErrorInfo};
use sakaki_common::status::Status;
use sakaki_common::types::Value;
use sakaki_data::IterableRecordStore;

use crate::error::OperatorError;
use crate::exchange::ExchangeReader;
use crate::plan::{
    AggregateGroupSpec, OperatorSpec, ProcessStep, TakeCogroupSpec, TakeFlatSpec, TakeGroupSpec,
    ValuesSpec,
};
use crate::process::ops::{
    copy_into_variables, dispatch, eval_operator_error, invoke_downstream, CogroupInput,
    CogroupView, OpInput,
};
use crate::process::task_context::TaskContext;
use crate::request_context::RequestContext;

/// Drives the chain once per literal row.
pub fn run_values(
    step: &ProcessStep,
    op: &OperatorSpec,
    spec: &ValuesSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    let vars = ctx.variables(op.block);
    for row in &spec.rows {
        req.check_cancel()?;
        for (target, value) in spec.targets.iter().zip(row.iter()) {
            vars.set(*target, value, &ctx.varlen);
        }
        invoke_downstream(step, op, ctx, req)?;
    }
    Ok(())
}

/// Pulls records from a forward exchange.
pub fn run_take_flat(
    step: &ProcessStep,
    op: &OperatorSpec,
    spec: &TakeFlatSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    let vars = ctx.variables(op.block);
    loop {
        req.check_cancel()?;
        let (record, meta) = {
            let mut reader = ctx.readers[spec.input].borrow_mut();
            let flat = reader.as_flat_mut().ok_or_else(reader_kind_error)?;
            match flat.next_record() {
                Some(r) => (r, Arc::clone(flat.meta())),
                None => break,
            }
        };
        copy_into_variables(record, &meta, &spec.fields, vars, &ctx.varlen);
        invoke_downstream(step, op, ctx, req)?;
    }
    Ok(())
}

/// Pulls groups from a group or aggregate exchange, invoking downstream per
/// member.
pub fn run_take_group(
    step: &ProcessStep,
    op: &OperatorSpec,
    spec: &TakeGroupSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    let vars = ctx.variables(op.block);
    let meta = reader_group_meta(&ctx.readers[spec.input].borrow());
    loop {
        req.check_cancel()?;
        let group = {
            let mut reader = ctx.readers[spec.input].borrow_mut();
            let group_reader = reader.as_group_mut().ok_or_else(reader_kind_error)?;
            if !group_reader.next_group() {
                break;
            }
            group_reader.group()
        };
        copy_into_variables(group, &meta, &spec.key_fields, vars, &ctx.varlen);
        loop {
            let member = {
                let mut reader = ctx.readers[spec.input].borrow_mut();
                let group_reader = reader.as_group_mut().expect("checked above");
                if !group_reader.next_member() {
                    break;
                }
                group_reader.member()
            };
            copy_into_variables(member, &meta, &spec.member_fields, vars, &ctx.varlen);
            invoke_downstream(step, op, ctx, req)?;
        }
    }
    Ok(())
}

/// Orders two key value lists; keys of cogrouped inputs share one type
/// list, NULL first.
fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare_key_value(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_key_value(a: &Value, b: &Value) -> Ordering {
    use Value::*;
    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Boolean(x), Boolean(y)) => x.cmp(y),
        (Int4(x), Int4(y)) => x.cmp(y),
        (Int8(x), Int8(y)) => x.cmp(y),
        (Float4(x), Float4(y)) => x.total_cmp(y),
        (Float8(x), Float8(y)) => x.total_cmp(y),
        (Decimal(x), Decimal(y)) => x.cmp(y),
        (Character(x), Character(y)) => x.cmp(y),
        (Octet(x), Octet(y)) => x.cmp(y),
        (Date(x), Date(y)) => x.cmp(y),
        (TimeOfDay(x), TimeOfDay(y)) => x.cmp(y),
        (TimePoint(x), TimePoint(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Merges the sorted group streams of several inputs over their shared key
/// and hands each cogroup to the downstream operator.
pub fn run_take_cogroup(
    step: &ProcessStep,
    op: &OperatorSpec,
    spec: &TakeCogroupSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    let vars = ctx.variables(op.block);
    let n = spec.inputs.len();
    let metas: Vec<Arc<sakaki_common::meta::RecordMeta>> = spec
        .inputs
        .iter()
        .map(|&port| reader_group_meta(&ctx.readers[port].borrow()))
        .collect();

    // current group key per input; None = exhausted
    let mut current: Vec<Option<Vec<Value>>> = vec![None; n];
    for (i, &port) in spec.inputs.iter().enumerate() {
        current[i] = advance_group(ctx, port, &metas[i], &spec.input_key_fields[i])?;
    }

    loop {
        req.check_cancel()?;
        let Some(min_key) = current
            .iter()
            .flatten()
            .min_by(|a, b| compare_keys(a, b))
            .cloned()
        else {
            break;
        };
        // materialize members of every input positioned on the minimum key
        let mut inputs: Vec<CogroupInput> = Vec::with_capacity(n);
        let mut matched: Vec<bool> = vec![false; n];
        for (i, &port) in spec.inputs.iter().enumerate() {
            let mut store =
                IterableRecordStore::new(Arc::clone(&ctx.pool), Arc::clone(&metas[i]));
            let on_min = current[i]
                .as_ref()
                .is_some_and(|k| compare_keys(k, &min_key) == Ordering::Equal);
            if on_min {
                matched[i] = true;
                let mut reader = ctx.readers[port].borrow_mut();
                let group_reader = reader.as_group_mut().ok_or_else(reader_kind_error)?;
                while group_reader.next_member() {
                    store.append(group_reader.member());
                }
            }
            inputs.push(CogroupInput { meta: Arc::clone(&metas[i]), members: store });
        }
        for m in &spec.key_fields {
            vars.set(m.target, &min_key[m.source], &ctx.varlen);
        }
        if let Some(d) = op.downstream {
            let view = CogroupView { inputs: &inputs };
            dispatch(step, d, OpInput::Cogroup(&view), ctx, req)?;
        }
        for (i, &port) in spec.inputs.iter().enumerate() {
            if matched[i] {
                current[i] = advance_group(ctx, port, &metas[i], &spec.input_key_fields[i])?;
            }
        }
    }
    Ok(())
}

fn advance_group(
    ctx: &TaskContext,
    port: usize,
    meta: &sakaki_common::meta::RecordMeta,
    key_fields: &[usize],
) -> Result<Option<Vec<Value>>, OperatorError> {
    let mut reader = ctx.readers[port].borrow_mut();
    let group_reader = reader.as_group_mut().ok_or_else(reader_kind_error)?;
    if !group_reader.next_group() {
        return Ok(None);
    }
    let group = group_reader.group();
    Ok(Some(key_fields.iter().map(|&f| group.get_value(meta, f)).collect()))
}

/// Aggregates the members of the current cogroup into block variables.
pub fn run_aggregate_group(
    step: &ProcessStep,
    op: &OperatorSpec,
    spec: &AggregateGroupSpec,
    cogroup: &CogroupView<'_>,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    use crate::exchange::aggregate::Accumulator;
    let vars = ctx.variables(op.block);
    for f in &spec.functions {
        let input = &cogroup.inputs[f.input];
        let mut acc = Accumulator::new(f.kind);
        for member in input.members.iter() {
            let value = member.get_value(&input.meta, f.source_field);
            acc.accumulate(&value).map_err(eval_operator_error)?;
        }
        let result = acc.finalize().map_err(eval_operator_error)?;
        vars.set(f.target, &result, &ctx.varlen);
    }
    invoke_downstream(step, op, ctx, req)
}

fn reader_group_meta(reader: &ExchangeReader) -> Arc<sakaki_common::meta::RecordMeta> {
    match reader {
        ExchangeReader::Flat(r) => Arc::clone(r.meta()),
        ExchangeReader::Group(r) => Arc::clone(r.meta()),
        ExchangeReader::Aggregate(r) => Arc::clone(r.meta()),
    }
}

fn reader_kind_error() -> OperatorError {
    OperatorError::new(ErrorInfo::new(
        ErrorCode::InternalException,
        "exchange reader kind does not match the take operator",
        Status::ErrUnknown,
    ))
}

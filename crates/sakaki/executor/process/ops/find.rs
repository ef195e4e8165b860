use sakaki_index::IndexFieldMapper;
use sakaki_kvs::EndPointKind;
use sakaki_storage::{ActionKind, ActionSet};

use crate::error::{index_operator_error, kvs_operator_error, AccessClass, OperatorError};
use crate::plan::{FindSpec, JoinFindSpec, JoinKind, JoinScanSpec, OperatorSpec, ProcessStep};
use crate::process::ops::{
    check_authorization, condition_holds, encode_key_expressions, invoke_downstream, null_fill,
    resolve_storage,
};
use crate::process::task_context::TaskContext;
use crate::request_context::RequestContext;

/// Looks the key up and decodes the hit into block variables.
///
/// Returns whether a row was found and passed decoding.
fn lookup(
    spec: &FindSpec,
    op: &OperatorSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<bool, OperatorError> {
    check_authorization(req, spec.storage_entry, ActionSet::of(&[ActionKind::Select]))?;
    let storage = resolve_storage(req, &spec.storage_name)?;
    let vars = ctx.variables(op.block);
    let key = encode_key_expressions(&spec.key, vars)?;
    let tx_type = ctx.transaction.option().transaction_type;
    let value = storage
        .content_get(ctx.transaction.kvs_transaction().as_ref(), &key)
        .map_err(|e| kvs_operator_error(&e, tx_type, AccessClass::Read))?;
    let Some(value) = value else {
        return Ok(false);
    };
    let mapper = IndexFieldMapper::for_primary(spec.key_fields.clone(), spec.value_fields.clone());
    mapper
        .process(
            ctx.transaction.kvs_transaction().as_ref(),
            storage.as_ref(),
            &key,
            &value,
            vars.record(),
            &ctx.varlen,
        )
        .map_err(|e| index_operator_error(&e, tx_type, AccessClass::Read))?;
    Ok(true)
}

/// Point lookup; on a miss the downstream branch is skipped.
pub fn run_find(
    step: &ProcessStep,
    op: &OperatorSpec,
    spec: &FindSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    if lookup(spec, op, ctx, req)? {
        invoke_downstream(step, op, ctx, req)?;
    }
    Ok(())
}

/// Join with a point lookup on the right side.
pub fn run_join_find(
    step: &ProcessStep,
    op: &OperatorSpec,
    spec: &JoinFindSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    let vars = ctx.variables(op.block);
    let matched = lookup(&spec.find, op, ctx, req)? && condition_holds(&spec.condition, vars)?;
    match spec.join_kind {
        JoinKind::Inner | JoinKind::Semi => {
            if matched {
                invoke_downstream(step, op, ctx, req)?;
            }
        }
        JoinKind::Anti => {
            if !matched {
                null_fill(&spec.find.key_fields, vars);
                null_fill(&spec.find.value_fields, vars);
                invoke_downstream(step, op, ctx, req)?;
            }
        }
        JoinKind::LeftOuter => {
            if !matched {
                null_fill(&spec.find.key_fields, vars);
                null_fill(&spec.find.value_fields, vars);
            }
            invoke_downstream(step, op, ctx, req)?;
        }
    }
    Ok(())
}

/// Join with a prefix scan on the right side.
pub fn run_join_scan(
    step: &ProcessStep,
    op: &OperatorSpec,
    spec: &JoinScanSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    check_authorization(req, spec.storage_entry, ActionSet::of(&[ActionKind::Select]))?;
    let storage = resolve_storage(req, &spec.storage_name)?;
    let vars = ctx.variables(op.block);
    let prefix = encode_key_expressions(&spec.key_prefix, vars)?;
    let tx_type = ctx.transaction.option().transaction_type;
    let mut iterator = storage
        .content_scan(
            ctx.transaction.kvs_transaction().as_ref(),
            &prefix,
            EndPointKind::Inclusive,
            &prefix,
            EndPointKind::PrefixInclusive,
            None,
            false,
        )
        .map_err(|e| kvs_operator_error(&e, tx_type, AccessClass::Read))?;
    let mapper = IndexFieldMapper::for_primary(spec.key_fields.clone(), spec.value_fields.clone());
    let mut matches = 0usize;
    loop {
        req.check_cancel()?;
        let advanced =
            iterator.next().map_err(|e| kvs_operator_error(&e, tx_type, AccessClass::Read))?;
        if !advanced {
            break;
        }
        mapper
            .process(
                ctx.transaction.kvs_transaction().as_ref(),
                storage.as_ref(),
                iterator.key(),
                iterator.value(),
                vars.record(),
                &ctx.varlen,
            )
            .map_err(|e| index_operator_error(&e, tx_type, AccessClass::Read))?;
        if !condition_holds(&spec.condition, vars)? {
            continue;
        }
        matches += 1;
        match spec.join_kind {
            JoinKind::Inner | JoinKind::LeftOuter => invoke_downstream(step, op, ctx, req)?,
            JoinKind::Semi => {
                invoke_downstream(step, op, ctx, req)?;
                return Ok(());
            }
            JoinKind::Anti => return Ok(()),
        }
    }
    if matches == 0 && matches!(spec.join_kind, JoinKind::Anti | JoinKind::LeftOuter) {
        null_fill(&spec.key_fields, vars);
        null_fill(&spec.value_fields, vars);
        invoke_downstream(step, op, ctx, req)?;
    }
    Ok(())
}

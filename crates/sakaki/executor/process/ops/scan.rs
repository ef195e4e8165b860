use std::sync::Arc;

use sakaki_index::IndexFieldMapper;
use sakaki_kvs::{EndPointKind, KvsIterator, Storage};
use sakaki_storage::{ActionKind, ActionSet};

use crate::error::{index_operator_error, kvs_operator_error, AccessClass, OperatorError};
use crate::plan::{OperatorSpec, ProcessStep, ScanBound, ScanSpec};
use crate::process::ops::{
    check_authorization, encode_key_values, invoke_downstream, resolve_storage,
};
use crate::process::task_context::TaskContext;
use crate::request_context::RequestContext;

/// Per-task scan state: the open iterator and the projection mapper.
pub struct ScanContext {
    iterator: Box<dyn KvsIterator + Send>,
    mapper: IndexFieldMapper,
    primary_storage: Arc<dyn Storage>,
    rows: u64,
}

fn bound_bytes(bound: &ScanBound) -> Result<(Vec<u8>, EndPointKind), OperatorError> {
    if bound.kind == EndPointKind::Unbound {
        return Ok((Vec::new(), EndPointKind::Unbound));
    }
    Ok((encode_key_values(&bound.keys)?, bound.kind))
}

fn open(
    spec: &ScanSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<ScanContext, OperatorError> {
    check_authorization(req, spec.storage_entry, ActionSet::of(&[ActionKind::Select]))?;
    let scanned = resolve_storage(req, &spec.storage_name)?;
    let (primary_storage, mapper) = match &spec.secondary {
        Some(secondary) => (
            resolve_storage(req, &secondary.primary_storage)?,
            IndexFieldMapper::for_secondary(
                secondary.secondary_key_fields.clone(),
                spec.key_fields.clone(),
                spec.value_fields.clone(),
            ),
        ),
        None => (
            Arc::clone(&scanned),
            IndexFieldMapper::for_primary(spec.key_fields.clone(), spec.value_fields.clone()),
        ),
    };
    // strand tasks scan their assigned sub-range instead of the plan bounds
    let (begin, begin_kind, end, end_kind) = match &ctx.scan_range {
        Some(range) => (
            range.begin_key().to_vec(),
            range.begin_kind(),
            range.end_key().to_vec(),
            range.end_kind(),
        ),
        None => {
            let (begin, begin_kind) = bound_bytes(&spec.begin)?;
            let (end, end_kind) = bound_bytes(&spec.end)?;
            (begin, begin_kind, end, end_kind)
        }
    };
    let tx_type = ctx.transaction.option().transaction_type;
    let iterator = scanned
        .content_scan(
            ctx.transaction.kvs_transaction().as_ref(),
            &begin,
            begin_kind,
            &end,
            end_kind,
            None,
            false,
        )
        .map_err(|e| kvs_operator_error(&e, tx_type, AccessClass::Read))?;
    Ok(ScanContext { iterator, mapper, primary_storage, rows: 0 })
}

/// Runs a scan to completion, feeding each decoded row down the chain.
pub fn run_scan(
    step: &ProcessStep,
    op: &OperatorSpec,
    spec: &ScanSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    let slot = ctx.contexts.slot(op.index);
    {
        let mut borrow = slot.borrow_mut();
        if borrow.is_none() {
            *borrow = Some(Box::new(open(spec, ctx, req)?));
        }
    }
    let tx_type = ctx.transaction.option().transaction_type;
    let vars = ctx.variables(op.block);
    loop {
        req.check_cancel()?;
        let mut borrow = slot.borrow_mut();
        let state = borrow
            .as_mut()
            .and_then(|b| b.downcast_mut::<ScanContext>())
            .expect("scan context initialized above");
        if let Some(limit) = spec.limit {
            if state.rows >= limit {
                break;
            }
        }
        let advanced = state
            .iterator
            .next()
            .map_err(|e| kvs_operator_error(&e, tx_type, AccessClass::Read))?;
        if !advanced {
            break;
        }
        state.rows += 1;
        state
            .mapper
            .process(
                ctx.transaction.kvs_transaction().as_ref(),
                state.primary_storage.as_ref(),
                state.iterator.key(),
                state.iterator.value(),
                vars.record(),
                &ctx.varlen,
            )
            .map_err(|e| index_operator_error(&e, tx_type, AccessClass::Read))?;
        drop(borrow);
        invoke_downstream(step, op, ctx, req)?;
    }
    Ok(())
}

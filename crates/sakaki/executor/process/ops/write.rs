use std::sync::Arc;

use sakaki_data::{copy_record, RecordRef};
use sakaki_index::{IndexError, LobResolver, PrimaryContext, SecondaryContext};
use sakaki_kvs::PutOption;
use sakaki_storage::{ActionKind, ActionSet};

use crate::error::{index_operator_error, AccessClass, OperatorError};
use crate::expr::evaluate;
use crate::plan::{OperatorSpec, WriteKind, WriteSpec};
use crate::process::ops::{check_authorization, eval_operator_error, resolve_storage};
use crate::process::task_context::TaskContext;
use crate::request_context::RequestContext;

/// Per-task state of a write operator: storage-bound index contexts plus
/// the record buffers the kernel assembles rows in.
struct WriteContext {
    primary: PrimaryContext,
    secondaries: Vec<SecondaryContext>,
    key_buf: Box<[u8]>,
    value_buf: Box<[u8]>,
    old_key_buf: Box<[u8]>,
    old_value_buf: Box<[u8]>,
    new_key_buf: Box<[u8]>,
    new_value_buf: Box<[u8]>,
}

impl WriteContext {
    fn open(spec: &WriteSpec, req: &RequestContext) -> Result<Self, OperatorError> {
        let primary = PrimaryContext::new(resolve_storage(req, spec.primary.storage_name())?);
        let mut secondaries = Vec::with_capacity(spec.secondaries.len());
        for s in &spec.secondaries {
            secondaries.push(SecondaryContext::new(resolve_storage(req, s.storage_name())?));
        }
        let key_size = spec.primary.key_meta().record_size();
        let value_size = spec.primary.value_meta().record_size();
        Ok(Self {
            primary,
            secondaries,
            key_buf: vec![0u8; key_size].into_boxed_slice(),
            value_buf: vec![0u8; value_size].into_boxed_slice(),
            old_key_buf: vec![0u8; key_size].into_boxed_slice(),
            old_value_buf: vec![0u8; value_size].into_boxed_slice(),
            new_key_buf: vec![0u8; key_size].into_boxed_slice(),
            new_value_buf: vec![0u8; value_size].into_boxed_slice(),
        })
    }
}

fn record(buf: &mut Box<[u8]>) -> RecordRef {
    RecordRef::new(buf.as_mut_ptr(), buf.len())
}

fn required_actions(kind: WriteKind) -> ActionSet {
    match kind {
        WriteKind::Insert => ActionSet::of(&[ActionKind::Insert]),
        WriteKind::Update => ActionSet::of(&[ActionKind::Update]),
        WriteKind::Delete => ActionSet::of(&[ActionKind::Delete]),
        WriteKind::Upsert => ActionSet::of(&[ActionKind::Insert, ActionKind::Update]),
    }
}

fn write_error(e: IndexError, ctx: &TaskContext) -> OperatorError {
    index_operator_error(&e, ctx.transaction.option().transaction_type, AccessClass::Write)
}

/// Builds a record from block variables, clearing unmapped fields to NULL.
fn build_record(
    target: RecordRef,
    meta: &sakaki_common::meta::RecordMeta,
    mappings: &[crate::plan::FieldMapping],
    ctx: &TaskContext,
    block: usize,
) {
    for i in 0..meta.field_count() {
        target.set_null(meta.nullity_offset(i), true);
    }
    let vars = ctx.variables(block);
    for m in mappings {
        let value = vars.get(m.source);
        target.set_value(meta, m.target, &value, &ctx.varlen);
    }
}

/// Applies insert/update/delete/upsert for the current block variables,
/// cascading to every secondary index of the table.
pub fn run_write(
    op: &OperatorSpec,
    spec: &WriteSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    check_authorization(req, spec.storage_entry, required_actions(spec.kind))?;
    let slot = ctx.contexts.slot(op.index);
    {
        let mut borrow = slot.borrow_mut();
        if borrow.is_none() {
            *borrow = Some(Box::new(WriteContext::open(spec, req)?));
        }
    }
    let mut borrow = slot.borrow_mut();
    let state = borrow
        .as_mut()
        .and_then(|b| b.downcast_mut::<WriteContext>())
        .expect("write context initialized above");
    match spec.kind {
        WriteKind::Insert => insert(spec, state, ctx, op.block),
        WriteKind::Delete => delete(spec, state, ctx, op.block),
        WriteKind::Update => update(spec, state, ctx, op.block),
        WriteKind::Upsert => upsert(spec, state, ctx, op.block),
    }
}

fn insert(
    spec: &WriteSpec,
    state: &mut WriteContext,
    ctx: &TaskContext,
    block: usize,
) -> Result<(), OperatorError> {
    let key_meta = Arc::clone(spec.primary.key_meta());
    let value_meta = Arc::clone(spec.primary.value_meta());
    let key_rec = record(&mut state.key_buf);
    build_record(key_rec, &key_meta, &spec.key_mappings, ctx, block);
    let value_rec = record(&mut state.value_buf);
    build_record(value_rec, &value_meta, &spec.value_mappings, ctx, block);

    let tx = ctx.transaction.kvs_transaction().as_ref();
    let resolver: &dyn LobResolver = ctx.transaction.as_ref();
    spec.primary
        .encode_put(&mut state.primary, tx, PutOption::Create, key_rec, value_rec, Some(resolver))
        .map_err(|e| write_error(e, ctx))?;
    let encoded_pk: Vec<u8> = state.primary.encoded_key().to_vec();
    for (target, sctx) in spec.secondaries.iter().zip(state.secondaries.iter_mut()) {
        target
            .encode_put(sctx, tx, key_rec, value_rec, &encoded_pk)
            .map_err(|e| write_error(e, ctx))?;
    }
    Ok(())
}

fn delete(
    spec: &WriteSpec,
    state: &mut WriteContext,
    ctx: &TaskContext,
    block: usize,
) -> Result<(), OperatorError> {
    let key_meta = Arc::clone(spec.primary.key_meta());
    let key_rec = record(&mut state.key_buf);
    build_record(key_rec, &key_meta, &spec.key_mappings, ctx, block);
    let old_key = record(&mut state.old_key_buf);
    let old_value = record(&mut state.old_value_buf);

    let tx = ctx.transaction.kvs_transaction().as_ref();
    let found = spec
        .primary
        .encode_find(&mut state.primary, tx, key_rec, &ctx.varlen, old_key, old_value)
        .map_err(|e| write_error(e, ctx))?;
    if !found {
        // nothing to delete
        return Ok(());
    }
    let encoded_pk: Vec<u8> = state.primary.encoded_key().to_vec();
    for (target, sctx) in spec.secondaries.iter().zip(state.secondaries.iter_mut()) {
        target
            .encode_remove(sctx, tx, old_key, old_value, &encoded_pk)
            .map_err(|e| write_error(e, ctx))?;
    }
    spec.primary
        .remove_by_encoded_key(&mut state.primary, tx, &encoded_pk)
        .map_err(|e| write_error(e, ctx))?;
    Ok(())
}

fn update(
    spec: &WriteSpec,
    state: &mut WriteContext,
    ctx: &TaskContext,
    block: usize,
) -> Result<(), OperatorError> {
    let key_meta = Arc::clone(spec.primary.key_meta());
    let value_meta = Arc::clone(spec.primary.value_meta());
    let key_rec = record(&mut state.key_buf);
    build_record(key_rec, &key_meta, &spec.key_mappings, ctx, block);
    let old_key = record(&mut state.old_key_buf);
    let old_value = record(&mut state.old_value_buf);

    let tx = ctx.transaction.kvs_transaction().as_ref();
    let found = spec
        .primary
        .encode_find(&mut state.primary, tx, key_rec, &ctx.varlen, old_key, old_value)
        .map_err(|e| write_error(e, ctx))?;
    if !found {
        return Ok(());
    }
    let old_pk: Vec<u8> = state.primary.encoded_key().to_vec();

    // the new row starts as a copy of the old one, then SET columns apply
    let new_key = record(&mut state.new_key_buf);
    let new_value = record(&mut state.new_value_buf);
    copy_record(old_key, new_key, &key_meta, &ctx.varlen);
    copy_record(old_value, new_value, &value_meta, &ctx.varlen);
    let vars = ctx.variables(block);
    for column in &spec.updates {
        let value = evaluate(&column.expr, vars).map_err(eval_operator_error)?;
        if let Some(f) = column.key_field {
            new_key.set_value(&key_meta, f, &value, &ctx.varlen);
        }
        if let Some(f) = column.value_field {
            new_value.set_value(&value_meta, f, &value, &ctx.varlen);
        }
    }

    spec.primary
        .encode_extracted_key(&mut state.primary, new_key)
        .map_err(|e| write_error(e, ctx))?;
    let new_pk: Vec<u8> = state.primary.encoded_key().to_vec();

    for (target, sctx) in spec.secondaries.iter().zip(state.secondaries.iter_mut()) {
        target
            .encode_remove(sctx, tx, old_key, old_value, &old_pk)
            .map_err(|e| write_error(e, ctx))?;
    }
    if new_pk != old_pk {
        spec.primary
            .remove_by_encoded_key(&mut state.primary, tx, &old_pk)
            .map_err(|e| write_error(e, ctx))?;
        spec.primary
            .encode_put(&mut state.primary, tx, PutOption::Create, new_key, new_value, None)
            .map_err(|e| write_error(e, ctx))?;
    } else {
        spec.primary
            .encode_put(
                &mut state.primary,
                tx,
                PutOption::CreateOrUpdate,
                new_key,
                new_value,
                None,
            )
            .map_err(|e| write_error(e, ctx))?;
    }
    for (target, sctx) in spec.secondaries.iter().zip(state.secondaries.iter_mut()) {
        target
            .encode_put(sctx, tx, new_key, new_value, &new_pk)
            .map_err(|e| write_error(e, ctx))?;
    }
    Ok(())
}

fn upsert(
    spec: &WriteSpec,
    state: &mut WriteContext,
    ctx: &TaskContext,
    block: usize,
) -> Result<(), OperatorError> {
    let key_meta = Arc::clone(spec.primary.key_meta());
    let value_meta = Arc::clone(spec.primary.value_meta());
    let key_rec = record(&mut state.key_buf);
    build_record(key_rec, &key_meta, &spec.key_mappings, ctx, block);
    let value_rec = record(&mut state.value_buf);
    build_record(value_rec, &value_meta, &spec.value_mappings, ctx, block);
    let old_key = record(&mut state.old_key_buf);
    let old_value = record(&mut state.old_value_buf);

    let tx = ctx.transaction.kvs_transaction().as_ref();
    let existed = spec
        .primary
        .encode_find(&mut state.primary, tx, key_rec, &ctx.varlen, old_key, old_value)
        .map_err(|e| write_error(e, ctx))?;

    let resolver: &dyn LobResolver = ctx.transaction.as_ref();
    spec.primary
        .encode_put(
            &mut state.primary,
            tx,
            PutOption::CreateOrUpdate,
            key_rec,
            value_rec,
            Some(resolver),
        )
        .map_err(|e| write_error(e, ctx))?;
    let encoded_pk: Vec<u8> = state.primary.encoded_key().to_vec();

    for (target, sctx) in spec.secondaries.iter().zip(state.secondaries.iter_mut()) {
        if existed {
            // the primary key is unchanged; only secondaries whose key
            // bytes differ need maintenance
            target
                .encode_secondary_key(sctx, old_key, old_value, &encoded_pk)
                .map_err(|e| write_error(e, ctx))?;
            let old_sk: Vec<u8> = sctx.encoded_key().to_vec();
            target
                .encode_secondary_key(sctx, key_rec, value_rec, &encoded_pk)
                .map_err(|e| write_error(e, ctx))?;
            let new_sk: Vec<u8> = sctx.encoded_key().to_vec();
            if old_sk == new_sk {
                continue;
            }
            target
                .remove_by_encoded_key(sctx, tx, &old_sk)
                .map_err(|e| write_error(e, ctx))?;
        }
        target
            .encode_put(sctx, tx, key_rec, value_rec, &encoded_pk)
            .map_err(|e| write_error(e, ctx))?;
    }
    Ok(())
}

use sakaki_common::error::{ErrorCode, ErrorInfo};
use sakaki_common::status::Status;
use sakaki_data::RecordRef;

use crate::error::OperatorError;
use crate::plan::{EmitSpec, OfferSpec, OperatorSpec};
use crate::process::task_context::TaskContext;
use crate::request_context::RequestContext;

/// Scratch output record of an emit operator.
struct EmitContext {
    buffer: Box<[u8]>,
}

/// Writes the current record to the result channel.
///
/// The channel writer is acquired lazily and kept on the task context so
/// the executor can release it when the task ends; admission to run at all
/// was granted through the writer seat before the chain started.
pub fn run_emit(
    op: &OperatorSpec,
    spec: &EmitSpec,
    ctx: &TaskContext,
    req: &RequestContext,
) -> Result<(), OperatorError> {
    {
        let mut writer = ctx.channel_writer.borrow_mut();
        if writer.is_none() {
            let Some(channel) = req.channel() else {
                return Err(OperatorError::new(ErrorInfo::new(
                    ErrorCode::SqlExecutionException,
                    "no result channel for this request",
                    Status::ErrInvalidArgument,
                )));
            };
            *writer = Some(channel.acquire(spec.meta.clone()).map_err(|e| {
                OperatorError::new(ErrorInfo::new(
                    ErrorCode::SqlExecutionException,
                    e.to_string(),
                    Status::ErrIoError,
                ))
            })?);
        }
    }
    let slot = ctx.contexts.slot(op.index);
    {
        let mut borrow = slot.borrow_mut();
        if borrow.is_none() {
            let size = spec.meta.origin().record_size();
            *borrow = Some(Box::new(EmitContext { buffer: vec![0u8; size].into_boxed_slice() }));
        }
    }
    let mut borrow = slot.borrow_mut();
    let state = borrow
        .as_mut()
        .and_then(|b| b.downcast_mut::<EmitContext>())
        .expect("emit context initialized above");
    let out_meta = spec.meta.origin();
    let out = RecordRef::new(state.buffer.as_mut_ptr(), state.buffer.len());
    let vars = ctx.variables(op.block);
    for (position, &field) in spec.fields.iter().enumerate() {
        let value = vars.get(field);
        out.set_value(out_meta, position, &value, &ctx.varlen);
    }
    let mut writer = ctx.channel_writer.borrow_mut();
    writer
        .as_mut()
        .expect("writer acquired above")
        .write(out)
        .map_err(|e| {
            OperatorError::new(ErrorInfo::new(
                ErrorCode::SqlExecutionException,
                e.to_string(),
                Status::ErrIoError,
            ))
        })
}

/// Scratch record of an offer operator.
struct OfferContext {
    buffer: Box<[u8]>,
}

/// Pushes the current record to a downstream exchange writer.
pub fn run_offer(
    op: &OperatorSpec,
    spec: &OfferSpec,
    ctx: &TaskContext,
) -> Result<(), OperatorError> {
    let slot = ctx.contexts.slot(op.index);
    let meta = exchange_meta(ctx, spec.output);
    {
        let mut borrow = slot.borrow_mut();
        if borrow.is_none() {
            let size = meta.record_size();
            *borrow =
                Some(Box::new(OfferContext { buffer: vec![0u8; size].into_boxed_slice() }));
        }
    }
    let mut borrow = slot.borrow_mut();
    let state = borrow
        .as_mut()
        .and_then(|b| b.downcast_mut::<OfferContext>())
        .expect("offer context initialized above");
    let out = RecordRef::new(state.buffer.as_mut_ptr(), state.buffer.len());
    let vars = ctx.variables(op.block);
    for m in &spec.fields {
        let value = vars.get(m.source);
        out.set_value(&meta, m.target, &value, &ctx.varlen);
    }
    ctx.writers[spec.output].borrow_mut().write(out)
}

fn exchange_meta(
    ctx: &TaskContext,
    output: usize,
) -> std::sync::Arc<sakaki_common::meta::RecordMeta> {
    ctx.writers[output].borrow().meta()
}

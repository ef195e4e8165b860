//! Field-list encode/decode over scratch buffers.

use sakaki_data::{AlignedBuffer, PagedArena, RecordRef};
use sakaki_kvs::coder;
use sakaki_kvs::stream::{ReadableStream, WritableStream};

use crate::error::IndexError;
use crate::field_info::FieldInfo;

/// Encodes the listed fields of `source` in order.
pub fn encode_fields(
    fields: &[FieldInfo],
    source: RecordRef,
    out: &mut WritableStream<'_>,
) -> Result<(), IndexError> {
    for f in fields {
        if f.nullable {
            coder::encode_nullable(source, f.offset, f.nullity_offset, &f.field_type, f.spec, out)?;
        } else {
            if source.is_null(f.nullity_offset) {
                return Err(IndexError::NullForNonNullable);
            }
            coder::encode(source, f.offset, &f.field_type, f.spec, out)?;
        }
    }
    Ok(())
}

/// Decodes the listed fields from `stream` into `target`.
pub fn decode_fields(
    fields: &[FieldInfo],
    stream: &mut ReadableStream<'_>,
    target: RecordRef,
    arena: &PagedArena,
) -> Result<(), IndexError> {
    for f in fields {
        if f.nullable {
            coder::decode_nullable(
                stream,
                &f.field_type,
                f.spec,
                target,
                f.offset,
                f.nullity_offset,
                arena,
            )?;
        } else {
            coder::decode(stream, &f.field_type, f.spec, target, f.offset, arena)?;
            target.set_null(f.nullity_offset, false);
        }
    }
    Ok(())
}

pub(crate) fn buffer_slice(buf: &mut AlignedBuffer) -> &mut [u8] {
    let cap = buf.capacity();
    if cap == 0 {
        return &mut [];
    }
    // Safety: the buffer owns `cap` bytes at `data()`.
    unsafe { std::slice::from_raw_parts_mut(buf.data(), cap) }
}

/// Encodes fields into `buf`, growing it when the first pass overflows.
///
/// The first pass runs in sizing mode over the current capacity; when the
/// coded form does not fit, the buffer is grown to the exact size and the
/// encode is repeated. At most two passes run; afterwards `buf.size()` is
/// the coded length.
pub fn encode_into_buffer(
    buf: &mut AlignedBuffer,
    fields: &[FieldInfo],
    source: RecordRef,
    suffix: &[u8],
) -> Result<(), IndexError> {
    let capacity = buf.capacity();
    let required = {
        let mut stream = WritableStream::new(buffer_slice(buf), true);
        encode_fields(fields, source, &mut stream)?;
        stream.write_bytes(suffix)?;
        stream.size()
    };
    if required <= capacity {
        buf.resize(required);
        return Ok(());
    }
    buf.resize(required);
    let mut stream = WritableStream::new(buffer_slice(buf), false);
    encode_fields(fields, source, &mut stream)?;
    stream.write_bytes(suffix)?;
    debug_assert_eq!(stream.size(), required);
    buf.resize(required);
    Ok(())
}

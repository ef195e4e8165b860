//! Order-preserving binary codec for typed record fields.
//!
//! For an ascending spec, `a < b` implies `encode(a) < encode(b)` under
//! lexicographic byte comparison; the descending spec complements every
//! emitted byte, reversing the order. Every encoding is self-delimiting:
//! decode consumes exactly the bytes encode produced regardless of what
//! follows them.
//!
//! Nullable fields carry one leading indicator byte (`0x00` = null), placing
//! nulls first in ascending order and last in descending order.

use rust_decimal::Decimal;
use sakaki_data::{PagedArena, RecordRef};
use sakaki_common::lob::{LobKind, LobReference};
use sakaki_common::time::{Date, TimeOfDay, TimePoint};
use sakaki_common::types::{FieldType, Value};

use crate::stream::{CodecError, ReadableStream, WritableStream};

/// Direction of the coded representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodingSpec {
    #[default]
    Ascending,
    Descending,
}

const DEFAULT_DECIMAL_PRECISION: u8 = 38;

struct Sink<'a, 'b> {
    out: &'a mut WritableStream<'b>,
    invert: bool,
}

impl Sink<'_, '_> {
    fn put_byte(&mut self, b: u8) -> Result<(), CodecError> {
        self.out.write_byte(if self.invert { !b } else { b })
    }

    fn put(&mut self, data: &[u8]) -> Result<(), CodecError> {
        if self.invert {
            self.out.write_bytes_complement(data)
        } else {
            self.out.write_bytes(data)
        }
    }
}

struct Source<'a, 'b> {
    stream: &'a mut ReadableStream<'b>,
    invert: bool,
}

impl Source<'_, '_> {
    fn get_byte(&mut self) -> Result<u8, CodecError> {
        let b = self.stream.read_byte()?;
        Ok(if self.invert { !b } else { b })
    }

    fn get_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = self.stream.read_array::<N>()?;
        if self.invert {
            for b in &mut out {
                *b = !*b;
            }
        }
        Ok(out)
    }
}

fn invert(spec: CodingSpec) -> bool {
    spec == CodingSpec::Descending
}

/// Width in bytes of the coded form of a decimal with the given precision.
fn decimal_coded_width(precision: u8) -> usize {
    // smallest n with 10^p - 1 <= 2^(8n - 1) - 1
    let mut n = 1usize;
    let mut limit = 10u128.checked_pow(u32::from(precision)).unwrap_or(u128::MAX);
    limit = limit.saturating_sub(1);
    while n < 16 {
        let max = (1u128 << (8 * n - 1)) - 1;
        if limit <= max {
            break;
        }
        n += 1;
    }
    n
}

fn put_decimal(
    sink: &mut Sink<'_, '_>,
    value: Decimal,
    precision: Option<u8>,
    scale: Option<u8>,
) -> Result<(), CodecError> {
    let precision = precision.unwrap_or(DEFAULT_DECIMAL_PRECISION);
    let scale = u32::from(scale.unwrap_or(0));
    let mut scaled = value;
    if scaled.scale() != scale {
        scaled.rescale(scale);
        if scaled.scale() != scale || scaled != value {
            return Err(CodecError::ValueOutOfRange);
        }
    }
    let coefficient = scaled.mantissa();
    if let Some(limit) = 10i128.checked_pow(u32::from(precision)) {
        if coefficient.unsigned_abs() >= limit.unsigned_abs() {
            return Err(CodecError::ValueOutOfRange);
        }
    }
    let width = decimal_coded_width(precision);
    let be = coefficient.to_be_bytes();
    let bytes = &be[16 - width..];
    sink.put_byte(bytes[0] ^ 0x80)?;
    sink.put(&bytes[1..])
}

fn get_decimal(
    source: &mut Source<'_, '_>,
    precision: Option<u8>,
    scale: Option<u8>,
) -> Result<Decimal, CodecError> {
    let precision = precision.unwrap_or(DEFAULT_DECIMAL_PRECISION);
    let scale = u32::from(scale.unwrap_or(0));
    let width = decimal_coded_width(precision);
    let first = source.get_byte()? ^ 0x80;
    let negative = first & 0x80 != 0;
    let mut full = [if negative { 0xFFu8 } else { 0u8 }; 16];
    full[16 - width] = first;
    for i in 1..width {
        full[16 - width + i] = source.get_byte()?;
    }
    let coefficient = i128::from_be_bytes(full);
    Decimal::try_from_i128_with_scale(coefficient, scale)
        .map_err(|_| CodecError::InvalidDecimal)
}

fn put_varlen(
    sink: &mut Sink<'_, '_>,
    data: &[u8],
    declared_length: Option<u32>,
) -> Result<(), CodecError> {
    if let Some(limit) = declared_length {
        if data.len() > limit as usize {
            return Err(CodecError::ValueTooLong);
        }
    }
    for &b in data {
        if b == 0x00 {
            sink.put_byte(0x00)?;
            sink.put_byte(0xFF)?;
        } else {
            sink.put_byte(b)?;
        }
    }
    sink.put_byte(0x00)?;
    sink.put_byte(0x00)
}

fn get_varlen(source: &mut Source<'_, '_>) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    loop {
        let b = source.get_byte()?;
        if b != 0x00 {
            out.push(b);
            continue;
        }
        match source.get_byte()? {
            0x00 => return Ok(out),
            0xFF => out.push(0x00),
            _ => return Err(CodecError::StreamUnderrun),
        }
    }
}

fn skip_varlen(source: &mut Source<'_, '_>) -> Result<(), CodecError> {
    loop {
        if source.get_byte()? != 0x00 {
            continue;
        }
        match source.get_byte()? {
            0x00 => return Ok(()),
            0xFF => {}
            _ => return Err(CodecError::StreamUnderrun),
        }
    }
}

fn put_i32(sink: &mut Sink<'_, '_>, v: i32) -> Result<(), CodecError> {
    sink.put(&((v as u32) ^ 0x8000_0000).to_be_bytes())
}

fn put_i64(sink: &mut Sink<'_, '_>, v: i64) -> Result<(), CodecError> {
    sink.put(&((v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes())
}

fn put_i16(sink: &mut Sink<'_, '_>, v: i16) -> Result<(), CodecError> {
    sink.put(&((v as u16) ^ 0x8000).to_be_bytes())
}

fn put_f32(sink: &mut Sink<'_, '_>, v: f32) -> Result<(), CodecError> {
    let bits = v.to_bits();
    let coded = if bits & 0x8000_0000 != 0 { !bits } else { bits | 0x8000_0000 };
    sink.put(&coded.to_be_bytes())
}

fn put_f64(sink: &mut Sink<'_, '_>, v: f64) -> Result<(), CodecError> {
    let bits = v.to_bits();
    let coded =
        if bits & 0x8000_0000_0000_0000 != 0 { !bits } else { bits | 0x8000_0000_0000_0000 };
    sink.put(&coded.to_be_bytes())
}

fn get_i32(source: &mut Source<'_, '_>) -> Result<i32, CodecError> {
    Ok((u32::from_be_bytes(source.get_array()?) ^ 0x8000_0000) as i32)
}

fn get_i64(source: &mut Source<'_, '_>) -> Result<i64, CodecError> {
    Ok((u64::from_be_bytes(source.get_array()?) ^ 0x8000_0000_0000_0000) as i64)
}

fn get_i16(source: &mut Source<'_, '_>) -> Result<i16, CodecError> {
    Ok((u16::from_be_bytes(source.get_array()?) ^ 0x8000) as i16)
}

fn get_f32(source: &mut Source<'_, '_>) -> Result<f32, CodecError> {
    let coded = u32::from_be_bytes(source.get_array()?);
    let bits = if coded & 0x8000_0000 != 0 { coded & !0x8000_0000 } else { !coded };
    Ok(f32::from_bits(bits))
}

fn get_f64(source: &mut Source<'_, '_>) -> Result<f64, CodecError> {
    let coded = u64::from_be_bytes(source.get_array()?);
    let bits = if coded & 0x8000_0000_0000_0000 != 0 {
        coded & !0x8000_0000_0000_0000
    } else {
        !coded
    };
    Ok(f64::from_bits(bits))
}

/// Encodes field `offset` of `src` and appends the coded bytes to `out`.
pub fn encode(
    src: RecordRef,
    offset: usize,
    field_type: &FieldType,
    spec: CodingSpec,
    out: &mut WritableStream<'_>,
) -> Result<(), CodecError> {
    let mut sink = Sink { out: &mut *out, invert: invert(spec) };
    match field_type {
        FieldType::Boolean => sink.put_byte(u8::from(src.get_bool(offset))),
        FieldType::Int4 => put_i32(&mut sink, src.get_i32(offset)),
        FieldType::Int8 => put_i64(&mut sink, src.get_i64(offset)),
        FieldType::Float4 => put_f32(&mut sink, src.get_f32(offset)),
        FieldType::Float8 => put_f64(&mut sink, src.get_f64(offset)),
        FieldType::Decimal { precision, scale } => {
            put_decimal(&mut sink, src.get_decimal(offset), *precision, *scale)
        }
        FieldType::Character { length, .. } => {
            put_varlen(&mut sink, src.get_varlen(offset), *length)
        }
        FieldType::Octet { length, .. } => put_varlen(&mut sink, src.get_varlen(offset), *length),
        FieldType::Date => put_i64(&mut sink, src.get_date(offset).0),
        FieldType::TimeOfDay { with_offset: false } => {
            sink.put(&src.get_time_of_day(offset).0.to_be_bytes())
        }
        FieldType::TimeOfDay { with_offset: true } => {
            let v = src.get_time_of_day_with_offset(offset);
            sink.put(&v.time.0.to_be_bytes())?;
            put_i16(&mut sink, v.offset_minutes)
        }
        FieldType::TimePoint { with_offset: false } => {
            let v = src.get_time_point(offset);
            put_i64(&mut sink, v.seconds)?;
            sink.put(&v.subsecond_nanos.to_be_bytes())
        }
        FieldType::TimePoint { with_offset: true } => {
            let v = src.get_time_point_with_offset(offset);
            put_i64(&mut sink, v.time_point.seconds)?;
            sink.put(&v.time_point.subsecond_nanos.to_be_bytes())?;
            put_i16(&mut sink, v.offset_minutes)
        }
        FieldType::Blob | FieldType::Clob => {
            let v = src.get_lob(offset);
            sink.put_byte(matches!(v.kind, LobKind::Clob) as u8)?;
            sink.put(&v.id.to_be_bytes())
        }
        FieldType::Unknown => Ok(()),
        FieldType::Pointer => Err(CodecError::UnsupportedType),
    }
}

/// Encodes a nullable field: indicator byte, then the value when present.
pub fn encode_nullable(
    src: RecordRef,
    offset: usize,
    nullity_offset: usize,
    field_type: &FieldType,
    spec: CodingSpec,
    out: &mut WritableStream<'_>,
) -> Result<(), CodecError> {
    let mut sink = Sink { out: &mut *out, invert: invert(spec) };
    if src.is_null(nullity_offset) {
        return sink.put_byte(0x00);
    }
    sink.put_byte(0x01)?;
    encode(src, offset, field_type, spec, out)
}

/// Decodes a field into `dest` at `offset`; varlen content is allocated in
/// `arena`.
pub fn decode(
    stream: &mut ReadableStream<'_>,
    field_type: &FieldType,
    spec: CodingSpec,
    dest: RecordRef,
    offset: usize,
    arena: &PagedArena,
) -> Result<(), CodecError> {
    let mut source = Source { stream: &mut *stream, invert: invert(spec) };
    match field_type {
        FieldType::Boolean => {
            let b = source.get_byte()?;
            dest.set_bool(offset, b != 0);
        }
        FieldType::Int4 => dest.set_i32(offset, get_i32(&mut source)?),
        FieldType::Int8 => dest.set_i64(offset, get_i64(&mut source)?),
        FieldType::Float4 => dest.set_f32(offset, get_f32(&mut source)?),
        FieldType::Float8 => dest.set_f64(offset, get_f64(&mut source)?),
        FieldType::Decimal { precision, scale } => {
            dest.set_decimal(offset, get_decimal(&mut source, *precision, *scale)?)
        }
        FieldType::Character { .. } | FieldType::Octet { .. } => {
            let content = get_varlen(&mut source)?;
            dest.set_varlen_in(offset, &content, arena);
        }
        FieldType::Date => dest.set_date(offset, Date(get_i64(&mut source)?)),
        FieldType::TimeOfDay { with_offset: false } => {
            dest.set_time_of_day(offset, TimeOfDay(u64::from_be_bytes(source.get_array()?)))
        }
        FieldType::TimeOfDay { with_offset: true } => {
            let time = TimeOfDay(u64::from_be_bytes(source.get_array()?));
            let offset_minutes = get_i16(&mut source)?;
            dest.set_time_of_day_with_offset(
                offset,
                sakaki_common::time::TimeOfDayWithOffset { time, offset_minutes },
            );
        }
        FieldType::TimePoint { with_offset: false } => {
            let seconds = get_i64(&mut source)?;
            let nanos = u32::from_be_bytes(source.get_array()?);
            dest.set_time_point(offset, TimePoint { seconds, subsecond_nanos: nanos });
        }
        FieldType::TimePoint { with_offset: true } => {
            let seconds = get_i64(&mut source)?;
            let nanos = u32::from_be_bytes(source.get_array()?);
            let offset_minutes = get_i16(&mut source)?;
            dest.set_time_point_with_offset(
                offset,
                sakaki_common::time::TimePointWithOffset {
                    time_point: TimePoint { seconds, subsecond_nanos: nanos },
                    offset_minutes,
                },
            );
        }
        FieldType::Blob | FieldType::Clob => {
            let kind = if source.get_byte()? == 0 { LobKind::Blob } else { LobKind::Clob };
            let id = u64::from_be_bytes(source.get_array()?);
            dest.set_lob(offset, LobReference::resolved(id, kind));
        }
        FieldType::Unknown => {}
        FieldType::Pointer => return Err(CodecError::UnsupportedType),
    }
    Ok(())
}

/// Decodes a nullable field, maintaining the nullity bit of `dest`.
pub fn decode_nullable(
    stream: &mut ReadableStream<'_>,
    field_type: &FieldType,
    spec: CodingSpec,
    dest: RecordRef,
    offset: usize,
    nullity_offset: usize,
    arena: &PagedArena,
) -> Result<(), CodecError> {
    let indicator = {
        let mut source = Source { stream: &mut *stream, invert: invert(spec) };
        source.get_byte()?
    };
    if indicator == 0x00 {
        dest.set_null(nullity_offset, true);
        return Ok(());
    }
    dest.set_null(nullity_offset, false);
    decode(stream, field_type, spec, dest, offset, arena)
}

/// Consumes a coded field without storing it.
pub fn decode_skip(
    stream: &mut ReadableStream<'_>,
    field_type: &FieldType,
    spec: CodingSpec,
) -> Result<(), CodecError> {
    let mut source = Source { stream: &mut *stream, invert: invert(spec) };
    let fixed = match field_type {
        FieldType::Boolean => 1,
        FieldType::Int4 | FieldType::Float4 => 4,
        FieldType::Int8 | FieldType::Float8 | FieldType::Date => 8,
        FieldType::Decimal { precision, .. } => {
            decimal_coded_width(precision.unwrap_or(DEFAULT_DECIMAL_PRECISION))
        }
        FieldType::TimeOfDay { with_offset: false } => 8,
        FieldType::TimeOfDay { with_offset: true } => 10,
        FieldType::TimePoint { with_offset: false } => 12,
        FieldType::TimePoint { with_offset: true } => 14,
        FieldType::Blob | FieldType::Clob => 9,
        FieldType::Unknown => 0,
        FieldType::Character { .. } | FieldType::Octet { .. } => {
            return skip_varlen(&mut source);
        }
        FieldType::Pointer => return Err(CodecError::UnsupportedType),
    };
    stream.read_bytes(fixed).map(|_| ())
}

/// Consumes a coded nullable field without storing it.
pub fn decode_skip_nullable(
    stream: &mut ReadableStream<'_>,
    field_type: &FieldType,
    spec: CodingSpec,
) -> Result<(), CodecError> {
    let indicator = {
        let mut source = Source { stream: &mut *stream, invert: invert(spec) };
        source.get_byte()?
    };
    if indicator == 0x00 {
        return Ok(());
    }
    decode_skip(stream, field_type, spec)
}

/// Encodes an owned value, used for scan bounds and parameters.
pub fn encode_value(
    value: &Value,
    field_type: &FieldType,
    spec: CodingSpec,
    out: &mut WritableStream<'_>,
) -> Result<(), CodecError> {
    let mut sink = Sink { out: &mut *out, invert: invert(spec) };
    match (field_type, value) {
        (FieldType::Boolean, Value::Boolean(v)) => sink.put_byte(u8::from(*v)),
        (FieldType::Int4, Value::Int4(v)) => put_i32(&mut sink, *v),
        (FieldType::Int8, Value::Int8(v)) => put_i64(&mut sink, *v),
        (FieldType::Int8, Value::Int4(v)) => put_i64(&mut sink, i64::from(*v)),
        (FieldType::Float4, Value::Float4(v)) => put_f32(&mut sink, *v),
        (FieldType::Float8, Value::Float8(v)) => put_f64(&mut sink, *v),
        (FieldType::Decimal { precision, scale }, Value::Decimal(v)) => {
            put_decimal(&mut sink, *v, *precision, *scale)
        }
        (FieldType::Character { length, .. }, Value::Character(v)) => {
            put_varlen(&mut sink, v.as_bytes(), *length)
        }
        (FieldType::Octet { length, .. }, Value::Octet(v)) => put_varlen(&mut sink, v, *length),
        (FieldType::Date, Value::Date(v)) => put_i64(&mut sink, v.0),
        (FieldType::TimeOfDay { with_offset: false }, Value::TimeOfDay(v)) => {
            sink.put(&v.0.to_be_bytes())
        }
        (FieldType::TimePoint { with_offset: false }, Value::TimePoint(v)) => {
            put_i64(&mut sink, v.seconds)?;
            sink.put(&v.subsecond_nanos.to_be_bytes())
        }
        _ => Err(CodecError::UnsupportedType),
    }
}

/// Encodes an optional value with the null indicator byte.
pub fn encode_value_nullable(
    value: &Value,
    field_type: &FieldType,
    spec: CodingSpec,
    out: &mut WritableStream<'_>,
) -> Result<(), CodecError> {
    let mut sink = Sink { out: &mut *out, invert: invert(spec) };
    if value.is_null() {
        return sink.put_byte(0x00);
    }
    sink.put_byte(0x01)?;
    encode_value(value, field_type, spec, out)
}

/// Decodes a field into an owned [`Value`].
pub fn decode_value(
    stream: &mut ReadableStream<'_>,
    field_type: &FieldType,
    spec: CodingSpec,
) -> Result<Value, CodecError> {
    let mut source = Source { stream: &mut *stream, invert: invert(spec) };
    Ok(match field_type {
        FieldType::Boolean => Value::Boolean(source.get_byte()? != 0),
        FieldType::Int4 => Value::Int4(get_i32(&mut source)?),
        FieldType::Int8 => Value::Int8(get_i64(&mut source)?),
        FieldType::Float4 => Value::Float4(get_f32(&mut source)?),
        FieldType::Float8 => Value::Float8(get_f64(&mut source)?),
        FieldType::Decimal { precision, scale } => {
            Value::Decimal(get_decimal(&mut source, *precision, *scale)?)
        }
        FieldType::Character { .. } => {
            let content = get_varlen(&mut source)?;
            Value::Character(String::from_utf8_lossy(&content).into_owned())
        }
        FieldType::Octet { .. } => Value::Octet(get_varlen(&mut source)?),
        FieldType::Date => Value::Date(Date(get_i64(&mut source)?)),
        FieldType::TimeOfDay { with_offset: false } => {
            Value::TimeOfDay(TimeOfDay(u64::from_be_bytes(source.get_array()?)))
        }
        FieldType::TimePoint { with_offset: false } => {
            let seconds = get_i64(&mut source)?;
            let nanos = u32::from_be_bytes(source.get_array()?);
            Value::TimePoint(TimePoint { seconds, subsecond_nanos: nanos })
        }
        _ => return Err(CodecError::UnsupportedType),
    })
}

/// Decodes an optional field into an owned [`Value`].
pub fn decode_value_nullable(
    stream: &mut ReadableStream<'_>,
    field_type: &FieldType,
    spec: CodingSpec,
) -> Result<Value, CodecError> {
    let indicator = {
        let mut source = Source { stream: &mut *stream, invert: invert(spec) };
        source.get_byte()?
    };
    if indicator == 0x00 {
        return Ok(Value::Null);
    }
    decode_value(stream, field_type, spec)
}

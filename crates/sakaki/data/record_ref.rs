use rust_decimal::Decimal;
use sakaki_common::lob::{LobKind, LobReference};
use sakaki_common::meta::RecordMeta;
use sakaki_common::time::{
    Date, TimeOfDay, TimeOfDayWithOffset, TimePoint, TimePointWithOffset,
};
use sakaki_common::types::{FieldType, Value};

use crate::arena::PagedArena;

/// View over one record laid out per a [`RecordMeta`].
///
/// A ref does not own the bytes it points at; it stays valid while the
/// owning store, arena or variable table is alive and not reset. Varlen
/// slots hold `(pointer, length)` pairs into a varlen arena under the same
/// validity contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef {
    ptr: *mut u8,
    size: usize,
}

// Refs are moved between workers together with the stores that own the
// underlying bytes.
unsafe impl Send for RecordRef {}

impl RecordRef {
    pub fn new(ptr: *mut u8, size: usize) -> Self {
        Self { ptr, size }
    }

    pub fn from_slice(data: &mut [u8]) -> Self {
        Self { ptr: data.as_mut_ptr(), size: data.len() }
    }

    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_slice(&self) -> &[u8] {
        // Safety: validity contract of the ref.
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }

    fn read<const N: usize>(&self, offset: usize) -> [u8; N] {
        debug_assert!(offset + N <= self.size);
        let mut out = [0u8; N];
        // Safety: bounds asserted above under the validity contract.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(offset), out.as_mut_ptr(), N) };
        out
    }

    fn write(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.size);
        // Safety: bounds asserted above under the validity contract.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len()) };
    }

    pub fn get_bool(&self, offset: usize) -> bool {
        self.read::<1>(offset)[0] != 0
    }

    pub fn set_bool(&self, offset: usize, v: bool) {
        self.write(offset, &[u8::from(v)]);
    }

    pub fn get_i32(&self, offset: usize) -> i32 {
        i32::from_ne_bytes(self.read(offset))
    }

    pub fn set_i32(&self, offset: usize, v: i32) {
        self.write(offset, &v.to_ne_bytes());
    }

    pub fn get_i64(&self, offset: usize) -> i64 {
        i64::from_ne_bytes(self.read(offset))
    }

    pub fn set_i64(&self, offset: usize, v: i64) {
        self.write(offset, &v.to_ne_bytes());
    }

    pub fn get_f32(&self, offset: usize) -> f32 {
        f32::from_ne_bytes(self.read(offset))
    }

    pub fn set_f32(&self, offset: usize, v: f32) {
        self.write(offset, &v.to_ne_bytes());
    }

    pub fn get_f64(&self, offset: usize) -> f64 {
        f64::from_ne_bytes(self.read(offset))
    }

    pub fn set_f64(&self, offset: usize, v: f64) {
        self.write(offset, &v.to_ne_bytes());
    }

    pub fn get_decimal(&self, offset: usize) -> Decimal {
        Decimal::deserialize(self.read(offset))
    }

    pub fn set_decimal(&self, offset: usize, v: Decimal) {
        self.write(offset, &v.serialize());
    }

    pub fn get_date(&self, offset: usize) -> Date {
        Date(self.get_i64(offset))
    }

    pub fn set_date(&self, offset: usize, v: Date) {
        self.set_i64(offset, v.0);
    }

    pub fn get_time_of_day(&self, offset: usize) -> TimeOfDay {
        TimeOfDay(u64::from_ne_bytes(self.read(offset)))
    }

    pub fn set_time_of_day(&self, offset: usize, v: TimeOfDay) {
        self.write(offset, &v.0.to_ne_bytes());
    }

    pub fn get_time_of_day_with_offset(&self, offset: usize) -> TimeOfDayWithOffset {
        let time = self.get_time_of_day(offset);
        let minutes = i16::from_ne_bytes(self.read(offset + 8));
        TimeOfDayWithOffset { time, offset_minutes: minutes }
    }

    pub fn set_time_of_day_with_offset(&self, offset: usize, v: TimeOfDayWithOffset) {
        self.set_time_of_day(offset, v.time);
        self.write(offset + 8, &v.offset_minutes.to_ne_bytes());
    }

    pub fn get_time_point(&self, offset: usize) -> TimePoint {
        let seconds = self.get_i64(offset);
        let nanos = u32::from_ne_bytes(self.read(offset + 8));
        TimePoint { seconds, subsecond_nanos: nanos }
    }

    pub fn set_time_point(&self, offset: usize, v: TimePoint) {
        self.set_i64(offset, v.seconds);
        self.write(offset + 8, &v.subsecond_nanos.to_ne_bytes());
    }

    pub fn get_time_point_with_offset(&self, offset: usize) -> TimePointWithOffset {
        let time_point = self.get_time_point(offset);
        let minutes = i16::from_ne_bytes(self.read(offset + 12));
        TimePointWithOffset { time_point, offset_minutes: minutes }
    }

    pub fn set_time_point_with_offset(&self, offset: usize, v: TimePointWithOffset) {
        self.set_time_point(offset, v.time_point);
        self.write(offset + 12, &v.offset_minutes.to_ne_bytes());
    }

    pub fn get_lob(&self, offset: usize) -> LobReference {
        let id = u64::from_ne_bytes(self.read(offset));
        let kind = if self.read::<1>(offset + 8)[0] == 0 { LobKind::Blob } else { LobKind::Clob };
        let resolved = self.read::<1>(offset + 9)[0] != 0;
        LobReference { id, kind, resolved }
    }

    pub fn set_lob(&self, offset: usize, v: LobReference) {
        self.write(offset, &v.id.to_ne_bytes());
        self.write(offset + 8, &[matches!(v.kind, LobKind::Clob) as u8]);
        self.write(offset + 9, &[u8::from(v.resolved)]);
    }

    pub fn get_pointer(&self, offset: usize) -> *mut u8 {
        usize::from_ne_bytes(self.read(offset)) as *mut u8
    }

    pub fn set_pointer(&self, offset: usize, v: *mut u8) {
        self.write(offset, &(v as usize).to_ne_bytes());
    }

    /// Reads the bytes of a varlen slot.
    pub fn get_varlen(&self, offset: usize) -> &[u8] {
        let ptr = usize::from_ne_bytes(self.read(offset)) as *const u8;
        let len = usize::from_ne_bytes(self.read(offset + 8));
        if len == 0 {
            return &[];
        }
        // Safety: the slot was written by set_varlen_in and the arena it
        // points into outlives this ref.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }

    /// Copies `data` into `arena` and stores the reference in the slot.
    pub fn set_varlen_in(&self, offset: usize, data: &[u8], arena: &PagedArena) {
        let ptr = arena.allocate_bytes(data);
        self.write(offset, &(ptr as usize).to_ne_bytes());
        self.write(offset + 8, &data.len().to_ne_bytes());
    }

    pub fn is_null(&self, nullity_offset: usize) -> bool {
        let byte = self.read::<1>(nullity_offset / 8)[0];
        byte & (1 << (nullity_offset % 8)) != 0
    }

    pub fn set_null(&self, nullity_offset: usize, null: bool) {
        let pos = nullity_offset / 8;
        let mask = 1u8 << (nullity_offset % 8);
        let byte = self.read::<1>(pos)[0];
        let updated = if null { byte | mask } else { byte & !mask };
        self.write(pos, &[updated]);
    }

    /// Reads field `index` as an owned [`Value`], honoring the nullity bit.
    pub fn get_value(&self, meta: &RecordMeta, index: usize) -> Value {
        if self.is_null(meta.nullity_offset(index)) {
            return Value::Null;
        }
        let offset = meta.value_offset(index);
        match meta.at(index) {
            FieldType::Boolean => Value::Boolean(self.get_bool(offset)),
            FieldType::Int4 => Value::Int4(self.get_i32(offset)),
            FieldType::Int8 => Value::Int8(self.get_i64(offset)),
            FieldType::Float4 => Value::Float4(self.get_f32(offset)),
            FieldType::Float8 => Value::Float8(self.get_f64(offset)),
            FieldType::Decimal { .. } => Value::Decimal(self.get_decimal(offset)),
            FieldType::Character { .. } => {
                Value::Character(String::from_utf8_lossy(self.get_varlen(offset)).into_owned())
            }
            FieldType::Octet { .. } => Value::Octet(self.get_varlen(offset).to_vec()),
            FieldType::Date => Value::Date(self.get_date(offset)),
            FieldType::TimeOfDay { with_offset: false } => {
                Value::TimeOfDay(self.get_time_of_day(offset))
            }
            FieldType::TimeOfDay { with_offset: true } => {
                Value::TimeOfDayWithOffset(self.get_time_of_day_with_offset(offset))
            }
            FieldType::TimePoint { with_offset: false } => {
                Value::TimePoint(self.get_time_point(offset))
            }
            FieldType::TimePoint { with_offset: true } => {
                Value::TimePointWithOffset(self.get_time_point_with_offset(offset))
            }
            FieldType::Blob => Value::Blob(self.get_lob(offset)),
            FieldType::Clob => Value::Clob(self.get_lob(offset)),
            FieldType::Unknown => Value::Null,
            FieldType::Pointer => {
                // pointer fields never leave the exchange internals
                Value::Null
            }
        }
    }

    /// Writes `value` into field `index`; varlen content is copied into
    /// `arena`. A `Null` value only raises the nullity bit.
    pub fn set_value(&self, meta: &RecordMeta, index: usize, value: &Value, arena: &PagedArena) {
        let nullity_offset = meta.nullity_offset(index);
        if value.is_null() {
            self.set_null(nullity_offset, true);
            return;
        }
        self.set_null(nullity_offset, false);
        let offset = meta.value_offset(index);
        match (meta.at(index), value) {
            (FieldType::Boolean, Value::Boolean(v)) => self.set_bool(offset, *v),
            (FieldType::Int4, Value::Int4(v)) => self.set_i32(offset, *v),
            (FieldType::Int8, Value::Int8(v)) => self.set_i64(offset, *v),
            (FieldType::Int8, Value::Int4(v)) => self.set_i64(offset, i64::from(*v)),
            (FieldType::Float4, Value::Float4(v)) => self.set_f32(offset, *v),
            (FieldType::Float8, Value::Float8(v)) => self.set_f64(offset, *v),
            (FieldType::Decimal { .. }, Value::Decimal(v)) => self.set_decimal(offset, *v),
            (FieldType::Character { .. }, Value::Character(v)) => {
                self.set_varlen_in(offset, v.as_bytes(), arena)
            }
            (FieldType::Octet { .. }, Value::Octet(v)) => self.set_varlen_in(offset, v, arena),
            (FieldType::Date, Value::Date(v)) => self.set_date(offset, *v),
            (FieldType::TimeOfDay { with_offset: false }, Value::TimeOfDay(v)) => {
                self.set_time_of_day(offset, *v)
            }
            (FieldType::TimeOfDay { with_offset: true }, Value::TimeOfDayWithOffset(v)) => {
                self.set_time_of_day_with_offset(offset, *v)
            }
            (FieldType::TimePoint { with_offset: false }, Value::TimePoint(v)) => {
                self.set_time_point(offset, *v)
            }
            (FieldType::TimePoint { with_offset: true }, Value::TimePointWithOffset(v)) => {
                self.set_time_point_with_offset(offset, *v)
            }
            (FieldType::Blob, Value::Blob(v)) | (FieldType::Clob, Value::Clob(v)) => {
                self.set_lob(offset, *v)
            }
            (ty, v) => {
                debug_assert!(false, "value {v:?} does not fit field type {ty:?}");
            }
        }
    }
}

/// Copies a whole record, deep-copying varlen content into `varlen_arena`.
pub fn copy_record(src: RecordRef, dst: RecordRef, meta: &RecordMeta, varlen_arena: &PagedArena) {
    debug_assert!(src.size() >= meta.record_size());
    debug_assert!(dst.size() >= meta.record_size());
    // Safety: both refs cover at least record_size bytes.
    unsafe { std::ptr::copy_nonoverlapping(src.ptr(), dst.ptr(), meta.record_size()) };
    for i in 0..meta.field_count() {
        if meta.at(i).is_varlen() && !src.is_null(meta.nullity_offset(i)) {
            let content = src.get_varlen(meta.value_offset(i));
            dst.set_varlen_in(meta.value_offset(i), content, varlen_arena);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::PagePool;
    use std::sync::Arc;

    fn arena() -> PagedArena {
        PagedArena::new(Arc::new(PagePool::new()))
    }

    #[test]
    fn primitive_round_trip() {
        let meta = RecordMeta::all_nullable(vec![FieldType::Int4, FieldType::Float8]);
        let mut buf = vec![0u8; meta.record_size()];
        let rec = RecordRef::from_slice(&mut buf);
        rec.set_i32(meta.value_offset(0), -42);
        rec.set_f64(meta.value_offset(1), 2.5);
        assert_eq!(rec.get_i32(meta.value_offset(0)), -42);
        assert_eq!(rec.get_f64(meta.value_offset(1)), 2.5);
    }

    #[test]
    fn nullity_bits_are_independent() {
        let meta = RecordMeta::all_nullable(vec![FieldType::Int4, FieldType::Int4]);
        let mut buf = vec![0u8; meta.record_size()];
        let rec = RecordRef::from_slice(&mut buf);
        rec.set_null(meta.nullity_offset(0), true);
        assert!(rec.is_null(meta.nullity_offset(0)));
        assert!(!rec.is_null(meta.nullity_offset(1)));
        rec.set_null(meta.nullity_offset(0), false);
        assert!(!rec.is_null(meta.nullity_offset(0)));
    }

    #[test]
    fn varlen_round_trip() {
        let meta =
            RecordMeta::all_nullable(vec![FieldType::Character { varying: true, length: None }]);
        let mut buf = vec![0u8; meta.record_size()];
        let rec = RecordRef::from_slice(&mut buf);
        let arena = arena();
        rec.set_varlen_in(meta.value_offset(0), b"hello world", &arena);
        assert_eq!(rec.get_varlen(meta.value_offset(0)), b"hello world");
    }

    #[test]
    fn value_round_trip() {
        let meta = RecordMeta::all_nullable(vec![
            FieldType::Int8,
            FieldType::Character { varying: true, length: None },
            FieldType::Decimal { precision: Some(10), scale: Some(2) },
        ]);
        let mut buf = vec![0u8; meta.record_size()];
        let rec = RecordRef::from_slice(&mut buf);
        let arena = arena();
        rec.set_value(&meta, 0, &Value::Int8(7), &arena);
        rec.set_value(&meta, 1, &Value::Character("abc".into()), &arena);
        rec.set_value(&meta, 2, &Value::Decimal(Decimal::new(12345, 2)), &arena);
        assert_eq!(rec.get_value(&meta, 0), Value::Int8(7));
        assert_eq!(rec.get_value(&meta, 1), Value::Character("abc".into()));
        assert_eq!(rec.get_value(&meta, 2), Value::Decimal(Decimal::new(12345, 2)));
    }

    #[test]
    fn null_value_round_trip() {
        let meta = RecordMeta::all_nullable(vec![FieldType::Int4]);
        let mut buf = vec![0u8; meta.record_size()];
        let rec = RecordRef::from_slice(&mut buf);
        let arena = arena();
        rec.set_value(&meta, 0, &Value::Null, &arena);
        assert_eq!(rec.get_value(&meta, 0), Value::Null);
    }

    #[test]
    fn copy_record_deep_copies_varlen() {
        let meta =
            RecordMeta::all_nullable(vec![FieldType::Character { varying: true, length: None }]);
        let src_arena = arena();
        let dst_arena = arena();
        let mut src_buf = vec![0u8; meta.record_size()];
        let src = RecordRef::from_slice(&mut src_buf);
        src.set_varlen_in(meta.value_offset(0), b"content", &src_arena);
        let mut dst_buf = vec![0u8; meta.record_size()];
        let dst = RecordRef::from_slice(&mut dst_buf);
        copy_record(src, dst, &meta, &dst_arena);
        src_arena.reset();
        assert_eq!(dst.get_varlen(meta.value_offset(0)), b"content");
    }
}

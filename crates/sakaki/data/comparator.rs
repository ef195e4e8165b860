use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use sakaki_common::meta::RecordMeta;
use sakaki_common::types::FieldType;

use crate::record_ref::RecordRef;

/// Compares two records field by field in declaration order.
///
/// NULL sorts before any value, matching the ascending key encoding.
pub fn compare_records(meta: &RecordMeta, a: RecordRef, b: RecordRef) -> Ordering {
    for i in 0..meta.field_count() {
        let ord = compare_field(meta, i, a, b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Compares the listed fields in order, used for key-only comparisons.
pub fn compare_record_fields(
    meta: &RecordMeta,
    fields: &[usize],
    a: RecordRef,
    b: RecordRef,
) -> Ordering {
    for &i in fields {
        let ord = compare_field(meta, i, a, b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Compares a prefix of the fields, used when only key fields matter.
pub fn compare_record_prefix(
    meta: &RecordMeta,
    field_count: usize,
    a: RecordRef,
    b: RecordRef,
) -> Ordering {
    for i in 0..field_count {
        let ord = compare_field(meta, i, a, b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_field(meta: &RecordMeta, index: usize, a: RecordRef, b: RecordRef) -> Ordering {
    let a_null = a.is_null(meta.nullity_offset(index));
    let b_null = b.is_null(meta.nullity_offset(index));
    match (a_null, b_null) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    let offset = meta.value_offset(index);
    match meta.at(index) {
        FieldType::Boolean => a.get_bool(offset).cmp(&b.get_bool(offset)),
        FieldType::Int4 => a.get_i32(offset).cmp(&b.get_i32(offset)),
        FieldType::Int8 => a.get_i64(offset).cmp(&b.get_i64(offset)),
        FieldType::Float4 => a.get_f32(offset).total_cmp(&b.get_f32(offset)),
        FieldType::Float8 => a.get_f64(offset).total_cmp(&b.get_f64(offset)),
        FieldType::Decimal { .. } => a.get_decimal(offset).cmp(&b.get_decimal(offset)),
        FieldType::Character { .. } | FieldType::Octet { .. } => {
            a.get_varlen(offset).cmp(b.get_varlen(offset))
        }
        FieldType::Date => a.get_date(offset).cmp(&b.get_date(offset)),
        FieldType::TimeOfDay { with_offset: false } => {
            a.get_time_of_day(offset).cmp(&b.get_time_of_day(offset))
        }
        FieldType::TimeOfDay { with_offset: true } => {
            let x = a.get_time_of_day_with_offset(offset);
            let y = b.get_time_of_day_with_offset(offset);
            x.time.cmp(&y.time).then(x.offset_minutes.cmp(&y.offset_minutes))
        }
        FieldType::TimePoint { with_offset: false } => {
            a.get_time_point(offset).cmp(&b.get_time_point(offset))
        }
        FieldType::TimePoint { with_offset: true } => {
            let x = a.get_time_point_with_offset(offset);
            let y = b.get_time_point_with_offset(offset);
            x.time_point.cmp(&y.time_point).then(x.offset_minutes.cmp(&y.offset_minutes))
        }
        FieldType::Blob | FieldType::Clob => a.get_lob(offset).id.cmp(&b.get_lob(offset).id),
        FieldType::Unknown => Ordering::Equal,
        FieldType::Pointer => Ordering::Equal,
    }
}

/// Hashes the listed fields of a record, for partitioning by key.
pub fn hash_record_fields(meta: &RecordMeta, record: RecordRef, fields: &[usize]) -> u64 {
    let mut hasher = FxHasher::default();
    for &i in fields {
        let null = record.is_null(meta.nullity_offset(i));
        null.hash(&mut hasher);
        if null {
            continue;
        }
        let offset = meta.value_offset(i);
        match meta.at(i) {
            FieldType::Boolean => record.get_bool(offset).hash(&mut hasher),
            FieldType::Int4 => record.get_i32(offset).hash(&mut hasher),
            FieldType::Int8 => record.get_i64(offset).hash(&mut hasher),
            FieldType::Float4 => record.get_f32(offset).to_bits().hash(&mut hasher),
            FieldType::Float8 => record.get_f64(offset).to_bits().hash(&mut hasher),
            FieldType::Decimal { .. } => record.get_decimal(offset).hash(&mut hasher),
            FieldType::Character { .. } | FieldType::Octet { .. } => {
                record.get_varlen(offset).hash(&mut hasher)
            }
            FieldType::Date => record.get_date(offset).hash(&mut hasher),
            FieldType::TimeOfDay { with_offset: false } => {
                record.get_time_of_day(offset).hash(&mut hasher)
            }
            FieldType::TimeOfDay { with_offset: true } => {
                let v = record.get_time_of_day_with_offset(offset);
                (v.time, v.offset_minutes).hash(&mut hasher)
            }
            FieldType::TimePoint { with_offset: false } => {
                record.get_time_point(offset).hash(&mut hasher)
            }
            FieldType::TimePoint { with_offset: true } => {
                let v = record.get_time_point_with_offset(offset);
                (v.time_point, v.offset_minutes).hash(&mut hasher)
            }
            FieldType::Blob | FieldType::Clob => record.get_lob(offset).id.hash(&mut hasher),
            FieldType::Unknown | FieldType::Pointer => {}
        }
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{PagePool, PagedArena};
    use sakaki_common::types::Value;
    use std::sync::Arc;

    fn record(meta: &RecordMeta, buf: &mut Vec<u8>, values: &[Value], arena: &PagedArena) -> RecordRef {
        buf.clear();
        buf.resize(meta.record_size(), 0);
        let rec = RecordRef::from_slice(buf);
        for (i, v) in values.iter().enumerate() {
            rec.set_value(meta, i, v, arena);
        }
        rec
    }

    #[test]
    fn orders_by_first_differing_field() {
        let meta = RecordMeta::all_nullable(vec![FieldType::Int4, FieldType::Int4]);
        let arena = PagedArena::new(Arc::new(PagePool::new()));
        let mut b1 = Vec::new();
        let mut b2 = Vec::new();
        let a = record(&meta, &mut b1, &[Value::Int4(1), Value::Int4(9)], &arena);
        let b = record(&meta, &mut b2, &[Value::Int4(2), Value::Int4(0)], &arena);
        assert_eq!(compare_records(&meta, a, b), Ordering::Less);
        assert_eq!(compare_records(&meta, b, a), Ordering::Greater);
    }

    #[test]
    fn null_sorts_first() {
        let meta = RecordMeta::all_nullable(vec![FieldType::Int4]);
        let arena = PagedArena::new(Arc::new(PagePool::new()));
        let mut b1 = Vec::new();
        let mut b2 = Vec::new();
        let a = record(&meta, &mut b1, &[Value::Null], &arena);
        let b = record(&meta, &mut b2, &[Value::Int4(i32::MIN)], &arena);
        assert_eq!(compare_records(&meta, a, b), Ordering::Less);
    }

    #[test]
    fn equal_keys_hash_identically() {
        let meta = RecordMeta::all_nullable(vec![
            FieldType::Int8,
            FieldType::Character { varying: true, length: None },
        ]);
        let arena = PagedArena::new(Arc::new(PagePool::new()));
        let mut b1 = Vec::new();
        let mut b2 = Vec::new();
        let a = record(&meta, &mut b1, &[Value::Int8(5), Value::Character("k".into())], &arena);
        let b = record(&meta, &mut b2, &[Value::Int8(5), Value::Character("k".into())], &arena);
        assert_eq!(
            hash_record_fields(&meta, a, &[0, 1]),
            hash_record_fields(&meta, b, &[0, 1])
        );
    }
}

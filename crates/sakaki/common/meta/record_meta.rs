use std::sync::Arc;

use crate::types::FieldType;

const fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Schema of a fixed-layout record with precomputed field offsets.
///
/// The layout is a pure function of the field-type list and the nullability
/// bitset: values are placed greedily in declaration order respecting each
/// field's alignment, the nullity bits follow the value area (one bit per
/// field, nullable or not), and the total size is padded to the record
/// alignment. Two records sharing a meta are byte interchangeable.
#[derive(Debug, PartialEq, Eq)]
pub struct RecordMeta {
    fields: Vec<FieldType>,
    nullability: Vec<bool>,
    value_offsets: Vec<usize>,
    nullity_offsets: Vec<usize>,
    record_alignment: usize,
    record_size: usize,
}

impl RecordMeta {
    pub fn new(fields: Vec<FieldType>, nullability: Vec<bool>) -> Arc<Self> {
        assert_eq!(fields.len(), nullability.len(), "one nullability flag per field");
        let mut value_offsets = Vec::with_capacity(fields.len());
        let mut offset = 0usize;
        let mut record_alignment = 1usize;
        for f in &fields {
            let alignment = f.value_alignment();
            record_alignment = record_alignment.max(alignment);
            offset = align_up(offset, alignment);
            value_offsets.push(offset);
            offset += f.value_size();
        }
        let nullity_base = offset * 8;
        let nullity_offsets = (0..fields.len()).map(|i| nullity_base + i).collect();
        let bytes_for_bits = fields.len().div_ceil(8);
        let record_size = align_up(offset + bytes_for_bits, record_alignment);
        Arc::new(Self {
            fields,
            nullability,
            value_offsets,
            nullity_offsets,
            record_alignment,
            record_size,
        })
    }

    /// Meta with every field nullable.
    pub fn all_nullable(fields: Vec<FieldType>) -> Arc<Self> {
        let nullability = vec![true; fields.len()];
        Self::new(fields, nullability)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn at(&self, index: usize) -> &FieldType {
        &self.fields[index]
    }

    pub fn fields(&self) -> &[FieldType] {
        &self.fields
    }

    pub fn nullable(&self, index: usize) -> bool {
        self.nullability[index]
    }

    /// Byte offset of the field value within the record.
    pub fn value_offset(&self, index: usize) -> usize {
        self.value_offsets[index]
    }

    /// Bit offset of the field's nullity flag within the record.
    pub fn nullity_offset(&self, index: usize) -> usize {
        self.nullity_offsets[index]
    }

    pub fn record_alignment(&self) -> usize {
        self.record_alignment
    }

    /// Total record size including nullity bits and padding.
    pub fn record_size(&self) -> usize {
        self.record_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_respects_alignment() {
        let meta = RecordMeta::all_nullable(vec![
            FieldType::Boolean,
            FieldType::Int8,
            FieldType::Int4,
        ]);
        assert_eq!(meta.value_offset(0), 0);
        assert_eq!(meta.value_offset(1), 8);
        assert_eq!(meta.value_offset(2), 16);
        // nullity bits start right after the value area
        assert_eq!(meta.nullity_offset(0), 20 * 8);
        assert_eq!(meta.nullity_offset(2), 20 * 8 + 2);
        assert_eq!(meta.record_alignment(), 8);
        assert_eq!(meta.record_size(), 24);
    }

    #[test]
    fn identical_schema_identical_layout() {
        let a = RecordMeta::all_nullable(vec![FieldType::Int4, FieldType::Float8]);
        let b = RecordMeta::all_nullable(vec![FieldType::Int4, FieldType::Float8]);
        assert_eq!(a.record_size(), b.record_size());
        assert_eq!(a.value_offset(1), b.value_offset(1));
    }

    #[test]
    fn varlen_fields_are_fixed_slots() {
        let meta = RecordMeta::all_nullable(vec![
            FieldType::Character { varying: true, length: None },
            FieldType::Int4,
        ]);
        assert_eq!(meta.value_offset(0), 0);
        assert_eq!(meta.value_offset(1), 16);
    }
}

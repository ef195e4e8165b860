use sakaki_common::types::FieldType;
use sakaki_kvs::coder::CodingSpec;

/// Coded form and record location of one index field.
///
/// `offset`/`nullity_offset` address the record that is the source (encode)
/// or destination (decode) of the field, typically a key/value record or a
/// block variable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub field_type: FieldType,
    pub offset: usize,
    pub nullity_offset: usize,
    pub nullable: bool,
    pub spec: CodingSpec,
}

impl FieldInfo {
    pub fn new(
        field_type: FieldType,
        offset: usize,
        nullity_offset: usize,
        nullable: bool,
        spec: CodingSpec,
    ) -> Self {
        Self { field_type, offset, nullity_offset, nullable, spec }
    }
}

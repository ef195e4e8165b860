use sakaki_data::{PagedArena, RecordRef};
use sakaki_kvs::coder;
use sakaki_kvs::stream::ReadableStream;
use sakaki_kvs::{Storage, Transaction};

use crate::coding::decode_fields;
use crate::error::IndexError;
use crate::field_info::FieldInfo;

/// Projects index hits into an output record.
///
/// For a primary hit the key/value bytes are decoded directly. For a
/// secondary hit the indexed fields at the head of the secondary key are
/// consumed, the remaining bytes are the coded primary key, and the primary
/// row is fetched to supply the value fields. A secondary entry whose
/// primary row is missing is corruption.
pub struct IndexFieldMapper {
    use_secondary: bool,
    /// Types/specs of the secondary key head, consumed before the embedded
    /// primary key. Offsets are unused.
    secondary_key_fields: Vec<FieldInfo>,
    primary_key_fields: Vec<FieldInfo>,
    primary_value_fields: Vec<FieldInfo>,
}

impl IndexFieldMapper {
    pub fn for_primary(
        primary_key_fields: Vec<FieldInfo>,
        primary_value_fields: Vec<FieldInfo>,
    ) -> Self {
        Self {
            use_secondary: false,
            secondary_key_fields: Vec::new(),
            primary_key_fields,
            primary_value_fields,
        }
    }

    pub fn for_secondary(
        secondary_key_fields: Vec<FieldInfo>,
        primary_key_fields: Vec<FieldInfo>,
        primary_value_fields: Vec<FieldInfo>,
    ) -> Self {
        Self {
            use_secondary: true,
            secondary_key_fields,
            primary_key_fields,
            primary_value_fields,
        }
    }

    pub fn uses_secondary(&self) -> bool {
        self.use_secondary
    }

    /// Decodes one index hit into `dest`.
    ///
    /// `key`/`value` are the scanned entry; `primary_storage` is consulted
    /// only for secondary hits.
    pub fn process(
        &self,
        tx: &dyn Transaction,
        primary_storage: &dyn Storage,
        key: &[u8],
        value: &[u8],
        dest: RecordRef,
        arena: &PagedArena,
    ) -> Result<(), IndexError> {
        if !self.use_secondary {
            let mut keys = ReadableStream::new(key);
            decode_fields(&self.primary_key_fields, &mut keys, dest, arena)?;
            let mut values = ReadableStream::new(value);
            decode_fields(&self.primary_value_fields, &mut values, dest, arena)?;
            return Ok(());
        }
        let mut stream = ReadableStream::new(key);
        for f in &self.secondary_key_fields {
            if f.nullable {
                coder::decode_skip_nullable(&mut stream, &f.field_type, f.spec)?;
            } else {
                coder::decode_skip(&mut stream, &f.field_type, f.spec)?;
            }
        }
        let encoded_primary_key = stream.rest();
        let primary_value = primary_storage
            .content_get(tx, encoded_primary_key)?
            .ok_or(IndexError::SecondaryCorruption)?;
        let mut keys = ReadableStream::new(encoded_primary_key);
        decode_fields(&self.primary_key_fields, &mut keys, dest, arena)?;
        let mut values = ReadableStream::new(&primary_value);
        decode_fields(&self.primary_value_fields, &mut values, dest, arena)?;
        Ok(())
    }
}

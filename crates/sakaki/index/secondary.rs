use std::sync::Arc;

use sakaki_data::{AlignedBuffer, RecordRef};
use sakaki_kvs::coder;
use sakaki_kvs::stream::WritableStream;
use sakaki_kvs::{PutOption, Storage, Transaction};

use crate::coding::buffer_slice;
use crate::error::IndexError;
use crate::field_info::FieldInfo;

/// One field of a secondary key, drawn from the primary key record or the
/// primary value record.
#[derive(Debug, Clone)]
pub struct SecondaryKeyField {
    pub info: FieldInfo,
    /// True when the field is read from the primary key record.
    pub from_key: bool,
}

/// Per-task state of a [`SecondaryTarget`].
pub struct SecondaryContext {
    pub storage: Arc<dyn Storage>,
    key_buf: AlignedBuffer,
}

impl SecondaryContext {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage, key_buf: AlignedBuffer::default() }
    }

    /// Coded secondary key produced by the last successful encode.
    pub fn encoded_key(&self) -> &[u8] {
        self.key_buf.as_slice()
    }
}

/// Coded form of one secondary index.
///
/// The stored key is the indexed fields followed by the full coded primary
/// key; the stored value is empty. Removal therefore only needs the same
/// inputs as insertion.
pub struct SecondaryTarget {
    storage_name: String,
    fields: Vec<SecondaryKeyField>,
}

impl SecondaryTarget {
    pub fn new(storage_name: impl Into<String>, fields: Vec<SecondaryKeyField>) -> Self {
        Self { storage_name: storage_name.into(), fields }
    }

    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub fn fields(&self) -> &[SecondaryKeyField] {
        &self.fields
    }

    /// Builds the coded secondary key into the context buffer.
    ///
    /// The first pass runs in sizing mode; when the coded form overflows the
    /// buffer it is grown once and the encode repeated.
    pub fn encode_secondary_key(
        &self,
        ctx: &mut SecondaryContext,
        primary_key: RecordRef,
        primary_value: RecordRef,
        encoded_primary_key: &[u8],
    ) -> Result<(), IndexError> {
        let capacity = ctx.key_buf.capacity();
        let required = {
            let mut stream = WritableStream::new(buffer_slice(&mut ctx.key_buf), true);
            self.encode_key_fields(&mut stream, primary_key, primary_value)?;
            stream.write_bytes(encoded_primary_key)?;
            stream.size()
        };
        if required > capacity {
            ctx.key_buf.resize(required);
            let mut stream = WritableStream::new(buffer_slice(&mut ctx.key_buf), false);
            self.encode_key_fields(&mut stream, primary_key, primary_value)?;
            stream.write_bytes(encoded_primary_key)?;
        }
        ctx.key_buf.resize(required);
        Ok(())
    }

    fn encode_key_fields(
        &self,
        stream: &mut WritableStream<'_>,
        primary_key: RecordRef,
        primary_value: RecordRef,
    ) -> Result<(), IndexError> {
        for f in &self.fields {
            let source = if f.from_key { primary_key } else { primary_value };
            if f.info.nullable {
                coder::encode_nullable(
                    source,
                    f.info.offset,
                    f.info.nullity_offset,
                    &f.info.field_type,
                    f.info.spec,
                    stream,
                )?;
            } else {
                if source.is_null(f.info.nullity_offset) {
                    return Err(IndexError::NullForNonNullable);
                }
                coder::encode(source, f.info.offset, &f.info.field_type, f.info.spec, stream)?;
            }
        }
        Ok(())
    }

    /// Inserts the secondary entry for the given primary row.
    pub fn encode_put(
        &self,
        ctx: &mut SecondaryContext,
        tx: &dyn Transaction,
        primary_key: RecordRef,
        primary_value: RecordRef,
        encoded_primary_key: &[u8],
    ) -> Result<(), IndexError> {
        self.encode_secondary_key(ctx, primary_key, primary_value, encoded_primary_key)?;
        ctx.storage.content_put(
            tx,
            ctx.key_buf.as_slice(),
            &[],
            PutOption::CreateOrUpdate,
        )?;
        Ok(())
    }

    /// Removes the secondary entry for the given primary row.
    pub fn encode_remove(
        &self,
        ctx: &mut SecondaryContext,
        tx: &dyn Transaction,
        primary_key: RecordRef,
        primary_value: RecordRef,
        encoded_primary_key: &[u8],
    ) -> Result<(), IndexError> {
        self.encode_secondary_key(ctx, primary_key, primary_value, encoded_primary_key)?;
        let key: Vec<u8> = ctx.key_buf.as_slice().to_vec();
        self.remove_by_encoded_key(ctx, tx, &key)
    }

    pub fn remove_by_encoded_key(
        &self,
        ctx: &mut SecondaryContext,
        tx: &dyn Transaction,
        encoded_secondary_key: &[u8],
    ) -> Result<(), IndexError> {
        ctx.storage.content_delete(tx, encoded_secondary_key)?;
        Ok(())
    }
}

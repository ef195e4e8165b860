use std::sync::Arc;

use sakaki_common::lob::{LobId, LobKind, LobReference};
use sakaki_common::meta::RecordMeta;
use sakaki_common::types::FieldType;
use sakaki_data::{AlignedBuffer, PagedArena, RecordRef};
use sakaki_kvs::stream::ReadableStream;
use sakaki_kvs::{KvsError, PutOption, Storage, Transaction};

use crate::coding::{decode_fields, encode_into_buffer};
use crate::error::IndexError;
use crate::field_info::FieldInfo;

/// Assigns datastore ids to unresolved LOB references and registers them
/// with the surrounding transaction.
pub trait LobResolver {
    fn assign_lob_id(&self, kind: LobKind) -> Result<LobId, IndexError>;
}

/// Per-task state of a [`PrimaryTarget`]: the storage handle and the coded
/// key/value scratch buffers.
pub struct PrimaryContext {
    pub storage: Arc<dyn Storage>,
    key_buf: AlignedBuffer,
    value_buf: AlignedBuffer,
}

impl PrimaryContext {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            key_buf: AlignedBuffer::default(),
            value_buf: AlignedBuffer::default(),
        }
    }

    /// Coded primary key produced by the last successful encode.
    pub fn encoded_key(&self) -> &[u8] {
        self.key_buf.as_slice()
    }

    pub fn encoded_value(&self) -> &[u8] {
        self.value_buf.as_slice()
    }
}

/// Coded form of a table's primary index.
///
/// `input_keys` reads the key from an upstream record (block variables);
/// `extracted_keys`/`extracted_values` read or fill the canonical key and
/// value records of the index.
pub struct PrimaryTarget {
    storage_name: String,
    key_meta: Arc<RecordMeta>,
    value_meta: Arc<RecordMeta>,
    input_keys: Vec<FieldInfo>,
    extracted_keys: Vec<FieldInfo>,
    extracted_values: Vec<FieldInfo>,
}

impl PrimaryTarget {
    pub fn new(
        storage_name: impl Into<String>,
        key_meta: Arc<RecordMeta>,
        value_meta: Arc<RecordMeta>,
        input_keys: Vec<FieldInfo>,
        extracted_keys: Vec<FieldInfo>,
        extracted_values: Vec<FieldInfo>,
    ) -> Self {
        Self {
            storage_name: storage_name.into(),
            key_meta,
            value_meta,
            input_keys,
            extracted_keys,
            extracted_values,
        }
    }

    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub fn key_meta(&self) -> &Arc<RecordMeta> {
        &self.key_meta
    }

    pub fn value_meta(&self) -> &Arc<RecordMeta> {
        &self.value_meta
    }

    pub fn extracted_keys(&self) -> &[FieldInfo] {
        &self.extracted_keys
    }

    pub fn extracted_values(&self) -> &[FieldInfo] {
        &self.extracted_values
    }

    /// Encodes the canonical key record into the context buffer.
    pub fn encode_extracted_key(
        &self,
        ctx: &mut PrimaryContext,
        key_record: RecordRef,
    ) -> Result<(), IndexError> {
        encode_into_buffer(&mut ctx.key_buf, &self.extracted_keys, key_record, &[])
    }

    /// Encodes the key read through `input_keys` into the context buffer.
    pub fn prepare_encoded_key(
        &self,
        ctx: &mut PrimaryContext,
        source: RecordRef,
    ) -> Result<(), IndexError> {
        encode_into_buffer(&mut ctx.key_buf, &self.input_keys, source, &[])
    }

    /// Looks up by the key in `key_source`; decodes the hit into
    /// `dest_key`/`dest_value`. Returns `false` when the row is absent.
    pub fn encode_find(
        &self,
        ctx: &mut PrimaryContext,
        tx: &dyn Transaction,
        key_source: RecordRef,
        arena: &PagedArena,
        dest_key: RecordRef,
        dest_value: RecordRef,
    ) -> Result<bool, IndexError> {
        self.prepare_encoded_key(ctx, key_source)?;
        let encoded: Vec<u8> = ctx.encoded_key().to_vec();
        self.find_by_encoded_key(ctx, tx, &encoded, arena, dest_key, dest_value)
    }

    /// Looks up an already coded key.
    pub fn find_by_encoded_key(
        &self,
        ctx: &mut PrimaryContext,
        tx: &dyn Transaction,
        encoded_key: &[u8],
        arena: &PagedArena,
        dest_key: RecordRef,
        dest_value: RecordRef,
    ) -> Result<bool, IndexError> {
        let value = match ctx.storage.content_get(tx, encoded_key)? {
            Some(v) => v,
            None => return Ok(false),
        };
        let mut keys = ReadableStream::new(encoded_key);
        decode_fields(&self.extracted_keys, &mut keys, dest_key, arena)?;
        let mut values = ReadableStream::new(&value);
        decode_fields(&self.extracted_values, &mut values, dest_value, arena)?;
        Ok(true)
    }

    /// Writes the row held in `key_record`/`value_record`.
    ///
    /// Unresolved LOB references in the value record are assigned ids first
    /// when a resolver is supplied. After success the coded key is available
    /// through [`PrimaryContext::encoded_key`].
    pub fn encode_put(
        &self,
        ctx: &mut PrimaryContext,
        tx: &dyn Transaction,
        option: PutOption,
        key_record: RecordRef,
        value_record: RecordRef,
        lob_resolver: Option<&dyn LobResolver>,
    ) -> Result<(), IndexError> {
        if let Some(resolver) = lob_resolver {
            resolve_lob_fields(value_record, &self.extracted_values, resolver)?;
        }
        encode_into_buffer(&mut ctx.key_buf, &self.extracted_keys, key_record, &[])?;
        encode_into_buffer(&mut ctx.value_buf, &self.extracted_values, value_record, &[])?;
        ctx.storage.content_put(tx, ctx.key_buf.as_slice(), ctx.value_buf.as_slice(), option)?;
        Ok(())
    }

    /// Deletes the row whose key is read through `input_keys`.
    pub fn encode_remove(
        &self,
        ctx: &mut PrimaryContext,
        tx: &dyn Transaction,
        key_source: RecordRef,
    ) -> Result<(), IndexError> {
        self.prepare_encoded_key(ctx, key_source)?;
        let encoded: Vec<u8> = ctx.encoded_key().to_vec();
        self.remove_by_encoded_key(ctx, tx, &encoded)
    }

    pub fn remove_by_encoded_key(
        &self,
        ctx: &mut PrimaryContext,
        tx: &dyn Transaction,
        encoded_key: &[u8],
    ) -> Result<(), IndexError> {
        ctx.storage.content_delete(tx, encoded_key)?;
        Ok(())
    }

    /// Looks up the row, decodes it, then deletes it.
    pub fn encode_find_remove(
        &self,
        ctx: &mut PrimaryContext,
        tx: &dyn Transaction,
        key_source: RecordRef,
        arena: &PagedArena,
        dest_key: RecordRef,
        dest_value: RecordRef,
    ) -> Result<bool, IndexError> {
        if !self.encode_find(ctx, tx, key_source, arena, dest_key, dest_value)? {
            return Ok(false);
        }
        let encoded: Vec<u8> = ctx.encoded_key().to_vec();
        self.remove_by_encoded_key(ctx, tx, &encoded)?;
        Ok(true)
    }
}

fn resolve_lob_fields(
    record: RecordRef,
    fields: &[FieldInfo],
    resolver: &dyn LobResolver,
) -> Result<(), IndexError> {
    for f in fields {
        let kind = match f.field_type {
            FieldType::Blob => LobKind::Blob,
            FieldType::Clob => LobKind::Clob,
            _ => continue,
        };
        if record.is_null(f.nullity_offset) {
            continue;
        }
        let reference = record.get_lob(f.offset);
        if reference.resolved {
            continue;
        }
        let id = resolver.assign_lob_id(kind)?;
        record.set_lob(f.offset, LobReference::resolved(id, kind));
    }
    Ok(())
}

/// Maps KV-layer failures that the index layer treats as data-plane results
/// rather than errors.
pub fn is_not_found(e: &IndexError) -> bool {
    matches!(e, IndexError::Kvs(KvsError::NotFound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sakaki_common::types::{FieldType, Value};
    use sakaki_data::PagePool;
    use sakaki_kvs::coder::CodingSpec;
    use sakaki_kvs::memory::MemoryDatabase;
    use sakaki_kvs::{Database, TransactionOption};

    fn target() -> (PrimaryTarget, Arc<RecordMeta>, Arc<RecordMeta>) {
        let key_meta = RecordMeta::all_nullable(vec![FieldType::Int8]);
        let value_meta = RecordMeta::all_nullable(vec![FieldType::Float8]);
        let input_keys = vec![FieldInfo::new(
            FieldType::Int8,
            key_meta.value_offset(0),
            key_meta.nullity_offset(0),
            true,
            CodingSpec::Ascending,
        )];
        let extracted_keys = input_keys.clone();
        let extracted_values = vec![FieldInfo::new(
            FieldType::Float8,
            value_meta.value_offset(0),
            value_meta.nullity_offset(0),
            true,
            CodingSpec::Ascending,
        )];
        let t = PrimaryTarget::new(
            "T",
            Arc::clone(&key_meta),
            Arc::clone(&value_meta),
            input_keys,
            extracted_keys,
            extracted_values,
        );
        (t, key_meta, value_meta)
    }

    #[test]
    fn put_then_find_round_trips() {
        let db = MemoryDatabase::new();
        let stg = db.create_storage("T").unwrap();
        let tx = db.create_transaction(TransactionOption::occ()).unwrap();
        let (target, key_meta, value_meta) = target();
        let pool = Arc::new(PagePool::new());
        let arena = PagedArena::new(pool);

        let mut key_buf = vec![0u8; key_meta.record_size()];
        let key_rec = RecordRef::from_slice(&mut key_buf);
        key_rec.set_value(&key_meta, 0, &Value::Int8(42), &arena);
        let mut value_buf = vec![0u8; value_meta.record_size()];
        let value_rec = RecordRef::from_slice(&mut value_buf);
        value_rec.set_value(&value_meta, 0, &Value::Float8(1.5), &arena);

        let mut ctx = PrimaryContext::new(stg);
        target
            .encode_put(&mut ctx, tx.as_ref(), PutOption::Create, key_rec, value_rec, None)
            .unwrap();

        let mut dest_key_buf = vec![0u8; key_meta.record_size()];
        let dest_key = RecordRef::from_slice(&mut dest_key_buf);
        let mut dest_value_buf = vec![0u8; value_meta.record_size()];
        let dest_value = RecordRef::from_slice(&mut dest_value_buf);
        let found = target
            .encode_find(&mut ctx, tx.as_ref(), key_rec, &arena, dest_key, dest_value)
            .unwrap();
        assert!(found);
        assert_eq!(dest_key.get_value(&key_meta, 0), Value::Int8(42));
        assert_eq!(dest_value.get_value(&value_meta, 0), Value::Float8(1.5));
    }

    #[test]
    fn find_missing_returns_false() {
        let db = MemoryDatabase::new();
        let stg = db.create_storage("T").unwrap();
        let tx = db.create_transaction(TransactionOption::occ()).unwrap();
        let (target, key_meta, value_meta) = target();
        let arena = PagedArena::new(Arc::new(PagePool::new()));

        let mut key_buf = vec![0u8; key_meta.record_size()];
        let key_rec = RecordRef::from_slice(&mut key_buf);
        key_rec.set_value(&key_meta, 0, &Value::Int8(7), &arena);
        let mut dest_key_buf = vec![0u8; key_meta.record_size()];
        let mut dest_value_buf = vec![0u8; value_meta.record_size()];
        let mut ctx = PrimaryContext::new(stg);
        let found = target
            .encode_find(
                &mut ctx,
                tx.as_ref(),
                key_rec,
                &arena,
                RecordRef::from_slice(&mut dest_key_buf),
                RecordRef::from_slice(&mut dest_value_buf),
            )
            .unwrap();
        assert!(!found);
    }

    #[test]
    fn remove_deletes_the_row() {
        let db = MemoryDatabase::new();
        let stg = db.create_storage("T").unwrap();
        let tx = db.create_transaction(TransactionOption::occ()).unwrap();
        let (target, key_meta, value_meta) = target();
        let arena = PagedArena::new(Arc::new(PagePool::new()));

        let mut key_buf = vec![0u8; key_meta.record_size()];
        let key_rec = RecordRef::from_slice(&mut key_buf);
        key_rec.set_value(&key_meta, 0, &Value::Int8(1), &arena);
        let mut value_buf = vec![0u8; value_meta.record_size()];
        let value_rec = RecordRef::from_slice(&mut value_buf);
        value_rec.set_value(&value_meta, 0, &Value::Float8(0.0), &arena);

        let mut ctx = PrimaryContext::new(stg);
        target
            .encode_put(&mut ctx, tx.as_ref(), PutOption::Create, key_rec, value_rec, None)
            .unwrap();
        target.encode_remove(&mut ctx, tx.as_ref(), key_rec).unwrap();

        let mut dk = vec![0u8; key_meta.record_size()];
        let mut dv = vec![0u8; value_meta.record_size()];
        let found = target
            .encode_find(
                &mut ctx,
                tx.as_ref(),
                key_rec,
                &arena,
                RecordRef::from_slice(&mut dk),
                RecordRef::from_slice(&mut dv),
            )
            .unwrap();
        assert!(!found);
    }
}

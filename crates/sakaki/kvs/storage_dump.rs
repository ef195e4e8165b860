//! Streaming dump/load of one storage.
//!
//! The format is a sequence of `(key_size: u32le, value_size: u32le,
//! key_bytes, value_bytes)` records terminated by a sentinel
//! `key_size = 0xFFFF_FFFF`. Dump and load proceed in batches, each batch
//! under its own transaction, resuming after the last processed key.

use std::io::{Read, Write};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::database::{Database, EndPointKind, PutOption, TransactionOption};
use crate::error::KvsError;

/// Sentinel value marking the end of a dump stream.
pub const EOF_MARK: u32 = 0xFFFF_FFFF;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Kvs(#[from] KvsError),
    #[error("malformed dump stream")]
    Malformed,
}

/// Writes one `(key, value)` record.
pub fn append(out: &mut dyn Write, key: &[u8], value: &[u8]) -> Result<(), DumpError> {
    let key_size = u32::try_from(key.len()).map_err(|_| DumpError::Malformed)?;
    if key_size == EOF_MARK {
        return Err(DumpError::Malformed);
    }
    let value_size = u32::try_from(value.len()).map_err(|_| DumpError::Malformed)?;
    out.write_all(&key_size.to_le_bytes())?;
    out.write_all(&value_size.to_le_bytes())?;
    out.write_all(key)?;
    out.write_all(value)?;
    Ok(())
}

/// Writes the end-of-stream sentinel.
pub fn append_eof(out: &mut dyn Write) -> Result<(), DumpError> {
    out.write_all(&EOF_MARK.to_le_bytes())?;
    Ok(())
}

/// Reads the next record into the given buffers; `false` at the sentinel.
pub fn read_next(
    input: &mut dyn Read,
    key: &mut Vec<u8>,
    value: &mut Vec<u8>,
) -> Result<bool, DumpError> {
    let mut word = [0u8; 4];
    input.read_exact(&mut word)?;
    let key_size = u32::from_le_bytes(word);
    if key_size == EOF_MARK {
        return Ok(false);
    }
    input.read_exact(&mut word)?;
    let value_size = u32::from_le_bytes(word);
    key.clear();
    key.resize(key_size as usize, 0);
    input.read_exact(key)?;
    value.clear();
    value.resize(value_size as usize, 0);
    input.read_exact(value)?;
    Ok(true)
}

/// Dump/load driver bound to a database.
pub struct StorageDump {
    db: Arc<dyn Database>,
}

impl StorageDump {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Dumps the whole content of `storage_name` to `out`.
    ///
    /// `batch_size` bounds how many entries one transaction reads; zero
    /// means unbounded.
    pub fn dump(
        &self,
        out: &mut dyn Write,
        storage_name: &str,
        batch_size: usize,
    ) -> Result<(), DumpError> {
        let storage = self.db.get_or_create_storage(storage_name)?;
        let mut last_key: Option<Vec<u8>> = None;
        let mut total = 0usize;
        loop {
            let tx = self.db.create_transaction(TransactionOption::occ())?;
            let (begin, begin_kind) = match &last_key {
                Some(k) => (k.as_slice(), EndPointKind::Exclusive),
                None => (&[][..], EndPointKind::Unbound),
            };
            let mut it = storage.content_scan(
                tx.as_ref(),
                begin,
                begin_kind,
                &[],
                EndPointKind::Unbound,
                None,
                false,
            )?;
            let mut in_batch = 0usize;
            let mut eof = true;
            while it.next()? {
                append(out, it.key(), it.value())?;
                total += 1;
                in_batch += 1;
                if batch_size > 0 && in_batch >= batch_size {
                    last_key = Some(it.key().to_vec());
                    eof = false;
                    break;
                }
            }
            tx.abort()?;
            if eof {
                append_eof(out)?;
                debug!(storage = storage_name, entries = total, "dump complete");
                return Ok(());
            }
        }
    }

    /// Loads records from `input` into `storage_name` until the sentinel.
    pub fn load(
        &self,
        input: &mut dyn Read,
        storage_name: &str,
        batch_size: usize,
    ) -> Result<(), DumpError> {
        let storage = self.db.get_or_create_storage(storage_name)?;
        let mut key = Vec::new();
        let mut value = Vec::new();
        let mut total = 0usize;
        let mut eof = false;
        while !eof {
            let tx = self.db.create_transaction(TransactionOption::occ())?;
            let mut in_batch = 0usize;
            loop {
                if !read_next(input, &mut key, &mut value)? {
                    eof = true;
                    break;
                }
                storage.content_put(tx.as_ref(), &key, &value, PutOption::CreateOrUpdate)?;
                total += 1;
                in_batch += 1;
                if batch_size > 0 && in_batch >= batch_size {
                    break;
                }
            }
            tx.commit()?;
        }
        debug!(storage = storage_name, entries = total, "load complete");
        Ok(())
    }
}

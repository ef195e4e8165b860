use std::any::Any;
use std::sync::Arc;

use crate::error::KvsError;

/// Concurrency-control mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionType {
    /// Optimistic short transaction.
    #[default]
    Occ,
    /// Long transaction with declared write preserves.
    Ltx,
    /// Read-only transaction.
    Rtx,
}

/// Options passed when a transaction is created.
#[derive(Debug, Clone, Default)]
pub struct TransactionOption {
    pub transaction_type: TransactionType,
    /// Storages a long transaction is allowed to write.
    pub write_preserves: Vec<String>,
}

impl TransactionOption {
    pub fn occ() -> Self {
        Self { transaction_type: TransactionType::Occ, write_preserves: Vec::new() }
    }

    pub fn ltx(write_preserves: Vec<String>) -> Self {
        Self { transaction_type: TransactionType::Ltx, write_preserves }
    }

    pub fn rtx() -> Self {
        Self { transaction_type: TransactionType::Rtx, write_preserves: Vec::new() }
    }

    pub fn readonly(&self) -> bool {
        self.transaction_type == TransactionType::Rtx
    }
}

/// Behavior of `content_put` regarding existing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOption {
    /// Fail with `AlreadyExists` when the key is present.
    Create,
    /// Fail with `NotFound` when the key is absent.
    Update,
    CreateOrUpdate,
}

/// Endpoint qualification of a scan bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndPointKind {
    /// Start of the index / end of the index.
    #[default]
    Unbound,
    Inclusive,
    Exclusive,
    /// Include every key having the bound as prefix.
    PrefixInclusive,
}

/// Handle on an engine transaction.
///
/// Storage operations take the transaction by shared reference; engines use
/// interior locking so a strand can funnel worker access through one handle.
pub trait Transaction: Send + Sync {
    fn commit(&self) -> Result<(), KvsError>;
    fn abort(&self) -> Result<(), KvsError>;
    /// Waits until the commit is durable.
    fn wait_for_commit(&self, timeout_ns: u64) -> Result<(), KvsError>;
    fn is_active(&self) -> bool;
    fn option(&self) -> TransactionOption;
    fn as_any(&self) -> &dyn Any;
}

/// One ordered key space of the engine.
pub trait Storage: Send + Sync {
    fn name(&self) -> &str;

    /// Reads the value for `key`; `Ok(None)` when absent.
    fn content_get(&self, tx: &dyn Transaction, key: &[u8]) -> Result<Option<Vec<u8>>, KvsError>;

    fn content_put(
        &self,
        tx: &dyn Transaction,
        key: &[u8],
        value: &[u8],
        option: PutOption,
    ) -> Result<(), KvsError>;

    /// Deletes the entry for `key`; `NotFound` when absent.
    fn content_delete(&self, tx: &dyn Transaction, key: &[u8]) -> Result<(), KvsError>;

    #[allow(clippy::too_many_arguments)]
    fn content_scan(
        &self,
        tx: &dyn Transaction,
        begin_key: &[u8],
        begin_kind: EndPointKind,
        end_key: &[u8],
        end_kind: EndPointKind,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Box<dyn KvsIterator + Send>, KvsError>;
}

/// Cursor over a scan result.
///
/// Freshly created iterators are positioned before the first entry; `key`
/// and `value` are valid after `next` returned `true`.
pub trait KvsIterator {
    fn next(&mut self) -> Result<bool, KvsError>;
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
}

/// Entry point of the KV engine.
pub trait Database: Send + Sync {
    fn create_transaction(
        &self,
        option: TransactionOption,
    ) -> Result<Arc<dyn Transaction>, KvsError>;

    /// Creates a storage; `AlreadyExists` when the name is taken.
    fn create_storage(&self, name: &str) -> Result<Arc<dyn Storage>, KvsError>;

    fn get_storage(&self, name: &str) -> Option<Arc<dyn Storage>>;

    fn get_or_create_storage(&self, name: &str) -> Result<Arc<dyn Storage>, KvsError>;

    /// Drops a storage and its content; `NotFound` when absent.
    fn delete_storage(&self, name: &str) -> Result<(), KvsError>;

    fn list_storages(&self) -> Vec<String>;
}

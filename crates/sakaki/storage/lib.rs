//! Table/index registry and the DML/DDL lock protocol.
//!
//! Every table and index known to the engine has a [`entry::StorageEntry`]
//! here; DML statements take shared locks on the storages they touch while
//! DDL holds one unique lock whose coverage grows and shrinks as statements
//! execute. Authorization action sets live on the entries.

pub mod auth;
pub mod entry;
pub mod error;
pub mod manager;
pub mod options;
pub mod table;

pub use auth::{ActionKind, ActionSet};
pub use entry::StorageEntry;
pub use error::StorageError;
pub use manager::{SharedLock, StorageList, StorageManager, UniqueLock};
pub use options::{deserialize_storage_options, serialize_storage_options, StorageOptions};
pub use table::{ColumnDefinition, IndexDefinition, IndexKey, SortDirection, TableDefinition};

/// Registry identifier of a table or index.
pub type StorageId = u64;

//! Index access layer: maps records to KV entries and back.
//!
//! A primary target owns the coded form of a table's primary index;
//! secondary targets maintain the `secondary key -> primary key` entries
//! that let scans run against alternative orderings. The `dist` module
//! provides pivot oracles for splitting ranges across parallel scans.

pub mod coding;
pub mod dist;
pub mod error;
pub mod field_info;
pub mod field_mapper;
pub mod primary;
pub mod secondary;

pub use error::IndexError;
pub use field_info::FieldInfo;
pub use field_mapper::IndexFieldMapper;
pub use primary::{LobResolver, PrimaryContext, PrimaryTarget};
pub use secondary::{SecondaryContext, SecondaryKeyField, SecondaryTarget};

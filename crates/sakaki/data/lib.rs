//! Record buffers and task-local memory for the execution core.
//!
//! Records are flat byte buffers laid out by `sakaki_common::meta::RecordMeta`;
//! varlen fields hold references into paged arenas. Everything here follows
//! the contract that a reference obtained from a store or arena stays valid
//! until that store or arena is reset.

pub mod aligned_buffer;
pub mod arena;
pub mod comparator;
pub mod record_ref;
pub mod record_store;

pub use aligned_buffer::AlignedBuffer;
pub use arena::{PagePool, PagedArena, PAGE_SIZE};
pub use comparator::{compare_record_fields, compare_records, hash_record_fields};
pub use record_ref::{copy_record, RecordRef};
pub use record_store::{IterableRecordStore, RecordStore};

//! Plan execution runtime.
//!
//! Takes a compiled statement (a DAG of process and exchange steps), builds
//! per-partition task contexts, and drives the operator chains against the
//! KV layer, producing result records over the request's record channel.
//! Scheduling is cooperative: tasks run until they complete, yield or sleep,
//! on either the serial scheduler or the worker pool.

pub mod bootstrap;
pub mod error;
pub mod exchange;
pub mod exec;
pub mod expr;
pub mod io;
pub mod plan;
pub mod process;
pub mod request_context;
pub mod scheduler;
pub mod transaction;
pub mod writer_count;

pub use exec::execute_statement;
pub use request_context::RequestContext;
pub use transaction::{Strand, TransactionContext, TransactionState};

use std::sync::{Arc, Mutex};

use thiserror::Error;

use sakaki_common::meta::ExternalRecordMeta;
use sakaki_common::types::Value;
use sakaki_data::RecordRef;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("buffer capacity exhausted")]
    BufferFull,
    #[error("io failure: {0}")]
    Io(String),
}

/// Sink of emitted result records.
///
/// A writer belongs to one task at a time; `flush` makes buffered rows
/// visible to the consumer, `release` ends the stream of this producer.
pub trait RecordWriter: Send {
    fn write(&mut self, record: RecordRef) -> Result<(), ChannelError>;
    fn flush(&mut self) -> Result<(), ChannelError>;
    fn release(self: Box<Self>);
}

/// Source of [`RecordWriter`]s for one result stream.
pub trait RecordChannel: Send + Sync {
    fn acquire(
        &self,
        meta: Arc<ExternalRecordMeta>,
    ) -> Result<Box<dyn RecordWriter>, ChannelError>;
}

/// Record channel collecting rows as owned values, used by tests and
/// embedded callers.
#[derive(Default)]
pub struct CollectingChannel {
    rows: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl CollectingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.rows.lock().expect("rows poisoned").clone()
    }
}

impl RecordChannel for CollectingChannel {
    fn acquire(
        &self,
        meta: Arc<ExternalRecordMeta>,
    ) -> Result<Box<dyn RecordWriter>, ChannelError> {
        Ok(Box::new(CollectingWriter {
            meta,
            rows: Arc::clone(&self.rows),
            pending: Vec::new(),
        }))
    }
}

struct CollectingWriter {
    meta: Arc<ExternalRecordMeta>,
    rows: Arc<Mutex<Vec<Vec<Value>>>>,
    pending: Vec<Vec<Value>>,
}

impl RecordWriter for CollectingWriter {
    fn write(&mut self, record: RecordRef) -> Result<(), ChannelError> {
        let meta = self.meta.origin();
        let row: Vec<Value> =
            (0..meta.field_count()).map(|i| record.get_value(meta, i)).collect();
        self.pending.push(row);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        let mut rows = self.rows.lock().expect("rows poisoned");
        rows.append(&mut self.pending);
        Ok(())
    }

    fn release(mut self: Box<Self>) {
        let _ = self.flush();
    }
}

//! Exchanges: record transport between process steps.
//!
//! A producer task owns an [`ExchangeWriter`]; flushing it delivers the
//! task's partitions to the exchange. Once every producer of a step
//! completed, downstream tasks read through [`ExchangeReader`]s, which for
//! group/aggregate exchanges see records in key order globally across all
//! input partitions.

pub mod aggregate;
pub mod forward;
pub mod group;

use std::sync::Arc;

use sakaki_data::{PagePool, RecordRef};

use crate::error::OperatorError;
use crate::plan::StepBody;

pub use aggregate::{AggregateExchange, AggregateFunctionKind, AggregateReader, AggregateWriter};
pub use forward::{FlatReader, ForwardExchange, ForwardWriter};
pub use group::{GroupExchange, GroupReader, GroupWriter};

/// Runtime object of one exchange step.
pub enum ExchangeRuntime {
    Forward(Arc<ForwardExchange>),
    Group(Arc<GroupExchange>),
    Aggregate(Arc<AggregateExchange>),
}

impl ExchangeRuntime {
    /// Builds the runtime for an exchange step body; `None` for processes.
    pub fn from_step(body: &StepBody) -> Option<Self> {
        match body {
            StepBody::Forward(spec) => {
                Some(ExchangeRuntime::Forward(ForwardExchange::new(spec)))
            }
            StepBody::Group(spec) => Some(ExchangeRuntime::Group(GroupExchange::new(spec))),
            StepBody::Aggregate(spec) => {
                Some(ExchangeRuntime::Aggregate(AggregateExchange::new(spec)))
            }
            StepBody::Process(_) => None,
        }
    }

    /// No producer delivered any data yet.
    pub fn no_input(&self) -> bool {
        match self {
            ExchangeRuntime::Forward(x) => x.no_input(),
            ExchangeRuntime::Group(x) => x.no_input(),
            ExchangeRuntime::Aggregate(x) => x.no_input(),
        }
    }

    pub fn create_writer(&self, pool: Arc<PagePool>) -> ExchangeWriter {
        match self {
            ExchangeRuntime::Forward(x) => ExchangeWriter::Forward(x.create_writer(pool)),
            ExchangeRuntime::Group(x) => ExchangeWriter::Group(x.create_writer(pool)),
            ExchangeRuntime::Aggregate(x) => ExchangeWriter::Aggregate(x.create_writer()),
        }
    }

    /// Reader over the data assigned to `partition`.
    ///
    /// When the consumer runs single partitioned it receives every
    /// partition's data (`consumer_partitions == 1`).
    pub fn create_reader(
        &self,
        partition: usize,
        consumer_partitions: usize,
        pool: Arc<PagePool>,
    ) -> ExchangeReader {
        match self {
            ExchangeRuntime::Forward(x) => {
                ExchangeReader::Flat(x.create_reader(partition, consumer_partitions))
            }
            ExchangeRuntime::Group(x) => {
                ExchangeReader::Group(x.create_reader(partition, consumer_partitions))
            }
            ExchangeRuntime::Aggregate(x) => {
                ExchangeReader::Aggregate(x.create_reader(partition, consumer_partitions, pool))
            }
        }
    }
}

/// Producer-side handle of one exchange.
pub enum ExchangeWriter {
    Forward(ForwardWriter),
    Group(GroupWriter),
    Aggregate(AggregateWriter),
}

impl ExchangeWriter {
    /// Layout of the records this writer accepts.
    pub fn meta(&self) -> Arc<sakaki_common::meta::RecordMeta> {
        match self {
            ExchangeWriter::Forward(w) => w.meta(),
            ExchangeWriter::Group(w) => w.meta(),
            ExchangeWriter::Aggregate(w) => w.meta(),
        }
    }

    pub fn write(&mut self, record: RecordRef) -> Result<(), OperatorError> {
        match self {
            ExchangeWriter::Forward(w) => w.write(record),
            ExchangeWriter::Group(w) => w.write(record),
            ExchangeWriter::Aggregate(w) => w.write(record),
        }
    }

    /// Delivers the buffered partitions to the exchange.
    pub fn flush(&mut self) {
        match self {
            ExchangeWriter::Forward(w) => w.flush(),
            ExchangeWriter::Group(w) => w.flush(),
            ExchangeWriter::Aggregate(w) => w.flush(),
        }
    }
}

/// Group-protocol view shared by group and aggregate readers.
pub trait GroupRead {
    /// Advances to the next group; `false` at the end.
    fn next_group(&mut self) -> bool;
    /// Key-bearing record of the current group.
    fn group(&self) -> RecordRef;
    /// Advances to the next member of the current group.
    fn next_member(&mut self) -> bool;
    /// Current member record.
    fn member(&self) -> RecordRef;
}

/// Consumer-side handle of one exchange.
pub enum ExchangeReader {
    Flat(FlatReader),
    Group(GroupReader),
    Aggregate(AggregateReader),
}

impl ExchangeReader {
    pub fn as_flat_mut(&mut self) -> Option<&mut FlatReader> {
        match self {
            ExchangeReader::Flat(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut dyn GroupRead> {
        match self {
            ExchangeReader::Group(r) => Some(r),
            ExchangeReader::Aggregate(r) => Some(r),
            ExchangeReader::Flat(_) => None,
        }
    }
}

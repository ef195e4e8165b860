//! Result delivery: record channels, the endpoint data-channel protocol and
//! writer-seat admission.

pub mod data_channel;
pub mod record_channel;
pub mod response;
pub mod writer_pool;

pub use data_channel::{DataBuffer, DataChannel, DataChannelRecordChannel, InMemoryDataChannel};
pub use record_channel::{ChannelError, CollectingChannel, RecordChannel, RecordWriter};
pub use response::{RecordingResponse, Response, ResponseCode};
pub use writer_pool::{WriterPool, WriterSeat};

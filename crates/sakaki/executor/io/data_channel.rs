//! Endpoint data-channel protocol.
//!
//! A channel vends fixed-capacity buffers. A producer fills a buffer with
//! `write` and either stages it (publish to the consumer) or discards it
//! (return the resource unused). Ordered channels deliver staged buffers in
//! acquisition order even when producers stage out of order; discarding a
//! buffer releases its slot in the order.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::io::record_channel::ChannelError;

/// Fixed-capacity buffer leased from a [`DataChannel`].
pub struct DataBuffer {
    index: u64,
    data: Vec<u8>,
    capacity: usize,
}

impl DataBuffer {
    /// Acquisition index; ordered channels consume in this order.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        if self.data.len() + bytes.len() > self.capacity {
            return Err(ChannelError::BufferFull);
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.data.len()
    }
}

pub trait DataChannel: Send + Sync {
    /// Leases a buffer of the given capacity.
    fn acquire(&self, size: usize) -> Result<DataBuffer, ChannelError>;
    /// Publishes a filled buffer to the consumer.
    fn stage(&self, buffer: DataBuffer) -> Result<(), ChannelError>;
    /// Returns an unused buffer, releasing its place in the order.
    fn discard(&self, buffer: DataBuffer);
}

enum Slot {
    Staged(Vec<u8>),
    Discarded,
}

struct ChannelState {
    next_index: u64,
    next_to_deliver: u64,
    pending: BTreeMap<u64, Slot>,
    delivered: Vec<Vec<u8>>,
}

/// In-memory data channel, ordered or unordered.
pub struct InMemoryDataChannel {
    ordered: bool,
    state: Mutex<ChannelState>,
}

impl InMemoryDataChannel {
    pub fn new(ordered: bool) -> Arc<Self> {
        Arc::new(Self {
            ordered,
            state: Mutex::new(ChannelState {
                next_index: 0,
                next_to_deliver: 0,
                pending: BTreeMap::new(),
                delivered: Vec::new(),
            }),
        })
    }

    /// Buffers visible to the consumer so far, in delivery order.
    pub fn delivered(&self) -> Vec<Vec<u8>> {
        self.state.lock().expect("channel state poisoned").delivered.clone()
    }

    fn drain_ready(state: &mut ChannelState) {
        while let Some(slot) = state.pending.remove(&state.next_to_deliver) {
            if let Slot::Staged(data) = slot {
                state.delivered.push(data);
            }
            state.next_to_deliver += 1;
        }
    }
}

impl DataChannel for InMemoryDataChannel {
    fn acquire(&self, size: usize) -> Result<DataBuffer, ChannelError> {
        let mut state = self.state.lock().expect("channel state poisoned");
        let index = state.next_index;
        state.next_index += 1;
        Ok(DataBuffer { index, data: Vec::with_capacity(size), capacity: size })
    }

    fn stage(&self, buffer: DataBuffer) -> Result<(), ChannelError> {
        let mut state = self.state.lock().expect("channel state poisoned");
        if self.ordered {
            state.pending.insert(buffer.index, Slot::Staged(buffer.data));
            Self::drain_ready(&mut state);
        } else {
            state.delivered.push(buffer.data);
        }
        Ok(())
    }

    fn discard(&self, buffer: DataBuffer) {
        let mut state = self.state.lock().expect("channel state poisoned");
        if self.ordered {
            state.pending.insert(buffer.index, Slot::Discarded);
            Self::drain_ready(&mut state);
        }
    }
}

/// Record channel writing coded rows into data-channel buffers.
///
/// Each row is coded field by field with the value codec and staged as one
/// buffer, so ordered channels deliver rows in emit order.
pub struct DataChannelRecordChannel {
    channel: Arc<dyn DataChannel>,
}

impl DataChannelRecordChannel {
    pub fn new(channel: Arc<dyn DataChannel>) -> Arc<Self> {
        Arc::new(Self { channel })
    }
}

impl crate::io::record_channel::RecordChannel for DataChannelRecordChannel {
    fn acquire(
        &self,
        meta: Arc<sakaki_common::meta::ExternalRecordMeta>,
    ) -> Result<Box<dyn crate::io::record_channel::RecordWriter>, ChannelError> {
        Ok(Box::new(DataChannelRecordWriter {
            meta,
            channel: Arc::clone(&self.channel),
            scratch: vec![0u8; 256],
        }))
    }
}

struct DataChannelRecordWriter {
    meta: Arc<sakaki_common::meta::ExternalRecordMeta>,
    channel: Arc<dyn DataChannel>,
    scratch: Vec<u8>,
}

impl crate::io::record_channel::RecordWriter for DataChannelRecordWriter {
    fn write(&mut self, record: sakaki_data::RecordRef) -> Result<(), ChannelError> {
        use sakaki_kvs::coder::{encode_nullable, CodingSpec};
        use sakaki_kvs::stream::WritableStream;
        let meta = Arc::clone(self.meta.origin());
        let coded_len = loop {
            let mut out = WritableStream::new(&mut self.scratch, true);
            for i in 0..meta.field_count() {
                encode_nullable(
                    record,
                    meta.value_offset(i),
                    meta.nullity_offset(i),
                    meta.at(i),
                    CodingSpec::Ascending,
                    &mut out,
                )
                .map_err(|e| ChannelError::Io(e.to_string()))?;
            }
            let n = out.size();
            if n <= self.scratch.len() {
                break n;
            }
            self.scratch.resize(n, 0);
        };
        let mut buffer = self.channel.acquire(coded_len)?;
        buffer.write(&self.scratch[..coded_len])?;
        self.channel.stage(buffer)
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn release(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_capacity_is_enforced() {
        let ch = InMemoryDataChannel::new(false);
        let mut buf = ch.acquire(4).unwrap();
        buf.write(b"ab").unwrap();
        buf.write(b"cd").unwrap();
        assert_eq!(buf.write(b"e"), Err(ChannelError::BufferFull));
    }

    #[test]
    fn ordered_channel_delivers_in_acquisition_order() {
        let ch = InMemoryDataChannel::new(true);
        let mut first = ch.acquire(8).unwrap();
        let mut second = ch.acquire(8).unwrap();
        second.write(b"2").unwrap();
        ch.stage(second).unwrap();
        // nothing delivered until the first buffer resolves
        assert!(ch.delivered().is_empty());
        first.write(b"1").unwrap();
        ch.stage(first).unwrap();
        assert_eq!(ch.delivered(), vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn discard_releases_the_order_slot() {
        let ch = InMemoryDataChannel::new(true);
        let first = ch.acquire(8).unwrap();
        let mut second = ch.acquire(8).unwrap();
        second.write(b"x").unwrap();
        ch.stage(second).unwrap();
        ch.discard(first);
        assert_eq!(ch.delivered(), vec![b"x".to_vec()]);
    }

    #[test]
    fn unordered_channel_delivers_immediately() {
        let ch = InMemoryDataChannel::new(false);
        let _hole = ch.acquire(8).unwrap();
        let mut buf = ch.acquire(8).unwrap();
        buf.write(b"now").unwrap();
        ch.stage(buf).unwrap();
        assert_eq!(ch.delivered(), vec![b"now".to_vec()]);
    }
}

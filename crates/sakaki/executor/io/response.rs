use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::io::data_channel::{DataChannel, InMemoryDataChannel};

/// Outcome reported to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseCode {
    #[default]
    Unknown,
    Success,
    Started,
    ApplicationError,
}

/// Endpoint response surface consumed by the statement driver.
pub trait Response: Send + Sync {
    fn code(&self, code: ResponseCode);
    fn message(&self, message: &str);
    fn write_body(&self, bytes: &[u8]);
    /// Named row-data channel of this response; creates it on first use.
    fn output_channel(&self, name: &str) -> Arc<dyn DataChannel>;
    fn complete(&self);
}

/// Response recording everything it receives, for tests and embedding.
#[derive(Default)]
pub struct RecordingResponse {
    state: Mutex<Recorded>,
    channels: Mutex<HashMap<String, Arc<InMemoryDataChannel>>>,
}

#[derive(Default, Clone)]
struct Recorded {
    code: ResponseCode,
    message: String,
    body: Vec<u8>,
    completed: bool,
}

impl RecordingResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded_code(&self) -> ResponseCode {
        self.state.lock().expect("response poisoned").code
    }

    pub fn recorded_message(&self) -> String {
        self.state.lock().expect("response poisoned").message.clone()
    }

    pub fn completed(&self) -> bool {
        self.state.lock().expect("response poisoned").completed
    }
}

impl Response for RecordingResponse {
    fn code(&self, code: ResponseCode) {
        self.state.lock().expect("response poisoned").code = code;
    }

    fn message(&self, message: &str) {
        self.state.lock().expect("response poisoned").message = message.to_owned();
    }

    fn write_body(&self, bytes: &[u8]) {
        self.state.lock().expect("response poisoned").body.extend_from_slice(bytes);
    }

    fn output_channel(&self, name: &str) -> Arc<dyn DataChannel> {
        let mut channels = self.channels.lock().expect("channels poisoned");
        let channel = channels
            .entry(name.to_owned())
            .or_insert_with(|| InMemoryDataChannel::new(true));
        Arc::clone(channel) as Arc<dyn DataChannel>
    }

    fn complete(&self) {
        self.state.lock().expect("response poisoned").completed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_channels_are_created_per_name() {
        let response = RecordingResponse::new();
        let a = response.output_channel("result");
        let mut buf = a.acquire(8).unwrap();
        buf.write(b"row").unwrap();
        a.stage(buf).unwrap();
        // same name returns the same channel
        let again = response.output_channel("result");
        let mut buf = again.acquire(8).unwrap();
        buf.write(b"next").unwrap();
        again.stage(buf).unwrap();
        response.code(ResponseCode::Success);
        response.complete();
        assert!(response.completed());
    }
}

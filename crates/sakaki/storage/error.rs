use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("unsupported storage metadata message version {0}")]
    UnsupportedMessageVersion(u32),
    #[error("malformed storage metadata: {0}")]
    MalformedOptions(String),
    #[error("failed to serialize storage metadata: {0}")]
    Serialization(String),
}

use sakaki_kvs::stream::CodecError;
use sakaki_kvs::KvsError;
use thiserror::Error;

/// Failures of the index access layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Kvs(#[from] KvsError),
    #[error("null value assigned to a non-nullable field")]
    NullForNonNullable,
    #[error("secondary index entry has no matching primary row")]
    SecondaryCorruption,
}

use sakaki_common::status::Status;
use thiserror::Error;

/// Failures reported by the KV engine or detected at its boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvsError {
    #[error("entry not found")]
    NotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("concurrent operation on an in-flight entry")]
    ConcurrentOperation,
    #[error("serialization failure")]
    SerializationFailure,
    #[error("transaction is inactive")]
    InactiveTransaction,
    #[error("operation not permitted for the transaction")]
    IllegalOperation,
    #[error("unique constraint violation")]
    UniqueConstraintViolation,
    #[error("integrity constraint violation")]
    IntegrityConstraintViolation,
    #[error("conflict on write preserve")]
    ConflictOnWritePreserve,
    #[error("data corruption detected: {0}")]
    DataCorruption(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl KvsError {
    /// Engine status corresponding to this failure.
    pub fn status(&self) -> Status {
        match self {
            KvsError::NotFound => Status::NotFound,
            KvsError::AlreadyExists => Status::AlreadyExists,
            KvsError::ConcurrentOperation => Status::ConcurrentOperation,
            KvsError::SerializationFailure => Status::ErrSerializationFailure,
            KvsError::InactiveTransaction => Status::ErrInactiveTransaction,
            KvsError::IllegalOperation => Status::ErrIllegalOperation,
            KvsError::UniqueConstraintViolation => Status::ErrUniqueConstraintViolation,
            KvsError::IntegrityConstraintViolation => Status::ErrIntegrityConstraintViolation,
            KvsError::ConflictOnWritePreserve => Status::ErrConflictOnWritePreserve,
            KvsError::DataCorruption(_) => Status::ErrDataCorruption,
            KvsError::Io(_) => Status::ErrIoError,
            KvsError::InvalidArgument(_) => Status::ErrInvalidArgument,
            KvsError::Internal(_) => Status::ErrUnknown,
        }
    }

    /// True when the failure definitely aborted the transaction on the
    /// engine side.
    pub fn aborts_transaction(&self) -> bool {
        matches!(
            self,
            KvsError::SerializationFailure
                | KvsError::ConflictOnWritePreserve
                | KvsError::IllegalOperation
                | KvsError::UniqueConstraintViolation
                | KvsError::IntegrityConstraintViolation
        )
    }
}

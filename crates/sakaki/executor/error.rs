//! Translation of lower-layer failures into user-visible error info.

use sakaki_common::error::{ErrorCode, ErrorInfo};
use sakaki_common::status::Status;
use sakaki_index::IndexError;
use sakaki_kvs::stream::CodecError;
use sakaki_kvs::{KvsError, TransactionType};

use crate::request_context::RequestContext;

/// Whether the failing KV call was reading or writing; CC failures map to
/// different codes per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessClass {
    Read,
    Write,
}

/// Failure raised inside an operator kernel.
///
/// Carries the user-visible info; the process runtime attaches it to the
/// request context and aborts the transaction when the failure is fatal to
/// it.
#[derive(Debug, Clone)]
pub struct OperatorError {
    pub info: ErrorInfo,
    /// The transaction cannot continue (CC failures, constraint violations).
    pub aborts_transaction: bool,
}

impl OperatorError {
    pub fn new(info: ErrorInfo) -> Self {
        Self { info, aborts_transaction: false }
    }

    pub fn fatal(info: ErrorInfo) -> Self {
        Self { info, aborts_transaction: true }
    }
}

impl From<ErrorInfo> for OperatorError {
    fn from(info: ErrorInfo) -> Self {
        Self::new(info)
    }
}

/// Maps a KV failure to its error code given the transaction mode.
pub fn kvs_error_code(e: &KvsError, tx_type: TransactionType, class: AccessClass) -> ErrorCode {
    match e {
        KvsError::IllegalOperation => match tx_type {
            TransactionType::Rtx => ErrorCode::WriteOperationByRtxException,
            TransactionType::Ltx => ErrorCode::LtxWriteOperationWithoutWritePreserveException,
            TransactionType::Occ => ErrorCode::RestrictedOperationException,
        },
        KvsError::SerializationFailure => match (tx_type, class) {
            (TransactionType::Occ, AccessClass::Read) => ErrorCode::OccReadException,
            (TransactionType::Occ, AccessClass::Write) => ErrorCode::OccWriteException,
            (TransactionType::Ltx, AccessClass::Read) => ErrorCode::LtxReadException,
            (TransactionType::Ltx, AccessClass::Write) => ErrorCode::LtxWriteException,
            (TransactionType::Rtx, _) => ErrorCode::RtxException,
        },
        KvsError::ConflictOnWritePreserve => ErrorCode::ConflictOnWritePreserveException,
        KvsError::ConcurrentOperation => ErrorCode::BlockedByConcurrentOperationException,
        KvsError::AlreadyExists => ErrorCode::UniqueConstraintViolationException,
        KvsError::UniqueConstraintViolation => ErrorCode::UniqueConstraintViolationException,
        KvsError::IntegrityConstraintViolation => ErrorCode::ConstraintViolationException,
        KvsError::InactiveTransaction => ErrorCode::InactiveTransactionException,
        KvsError::DataCorruption(_) => ErrorCode::DataCorruptionException,
        KvsError::NotFound => ErrorCode::TargetNotFoundException,
        _ => ErrorCode::SqlExecutionException,
    }
}

/// Builds the operator error for a KV failure observed during index access.
pub fn kvs_operator_error(
    e: &KvsError,
    tx_type: TransactionType,
    class: AccessClass,
) -> OperatorError {
    let code = kvs_error_code(e, tx_type, class);
    let info = ErrorInfo::new(code, e.to_string(), e.status());
    OperatorError { info, aborts_transaction: e.aborts_transaction() }
}

/// Builds the operator error for a codec failure.
pub fn codec_operator_error(e: &CodecError) -> OperatorError {
    let (code, status) = match e {
        CodecError::ValueOutOfRange => {
            (ErrorCode::ValueOutOfRangeException, Status::ErrInvalidArgument)
        }
        CodecError::InvalidDecimal => {
            (ErrorCode::InvalidDecimalValueException, Status::ErrInvalidArgument)
        }
        CodecError::ValueTooLong => (ErrorCode::ValueTooLongException, Status::ErrInvalidArgument),
        CodecError::StreamUnderrun => (ErrorCode::DataCorruptionException, Status::ErrDataCorruption),
        _ => (ErrorCode::SqlExecutionException, Status::ErrUnknown),
    };
    OperatorError::new(ErrorInfo::new(code, e.to_string(), status))
}

/// Builds the operator error for an index-layer failure.
pub fn index_operator_error(
    e: &IndexError,
    tx_type: TransactionType,
    class: AccessClass,
) -> OperatorError {
    match e {
        IndexError::Codec(c) => codec_operator_error(c),
        IndexError::Kvs(k) => kvs_operator_error(k, tx_type, class),
        IndexError::NullForNonNullable => OperatorError::new(ErrorInfo::new(
            ErrorCode::NotNullConstraintViolationException,
            "null value written to non-nullable column",
            Status::ErrIntegrityConstraintViolation,
        )),
        IndexError::SecondaryCorruption => OperatorError::fatal(ErrorInfo::new(
            ErrorCode::SecondaryIndexCorruptionException,
            "secondary index entry has no matching primary row",
            Status::ErrDataCorruption,
        )),
    }
}

/// Attaches the error to the request and aborts the transaction when it is
/// fatal to it.
pub fn propagate(req: &RequestContext, e: OperatorError) -> OperatorError {
    if e.aborts_transaction {
        req.transaction().force_abort();
    }
    req.set_error(e.info.clone());
    e
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_operation_maps_per_transaction_mode() {
        assert_eq!(
            kvs_error_code(&KvsError::IllegalOperation, TransactionType::Ltx, AccessClass::Write),
            ErrorCode::LtxWriteOperationWithoutWritePreserveException
        );
        assert_eq!(
            kvs_error_code(&KvsError::IllegalOperation, TransactionType::Rtx, AccessClass::Write),
            ErrorCode::WriteOperationByRtxException
        );
    }

    #[test]
    fn serialization_failure_maps_per_direction() {
        assert_eq!(
            kvs_error_code(
                &KvsError::SerializationFailure,
                TransactionType::Occ,
                AccessClass::Read
            ),
            ErrorCode::OccReadException
        );
        assert_eq!(
            kvs_error_code(
                &KvsError::SerializationFailure,
                TransactionType::Ltx,
                AccessClass::Write
            ),
            ErrorCode::LtxWriteException
        );
    }
}

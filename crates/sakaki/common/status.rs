use std::fmt;

/// Engine-wide operation status.
///
/// Non-error variants (`Ok`, `NotFound`, `AlreadyExists`, ...) describe
/// ordinary outcomes that callers branch on; `Err*` variants originate from
/// the CC engine or from the runtime itself and normally surface as an
/// [`crate::error::ErrorInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    NotFound,
    AlreadyExists,
    UserRollback,
    WaitingForOtherTransaction,
    /// The CC engine could not decide visibility of an in-flight entry.
    ConcurrentOperation,
    ErrUnknown,
    ErrIoError,
    ErrInvalidArgument,
    ErrUnsupported,
    ErrIllegalOperation,
    ErrAborted,
    ErrAbortedRetryable,
    ErrSerializationFailure,
    ErrConflictOnWritePreserve,
    ErrTimeOut,
    ErrIntegrityConstraintViolation,
    ErrUniqueConstraintViolation,
    ErrInactiveTransaction,
    ErrDataCorruption,
    ErrResourceLimitReached,
    ErrExpressionEvaluationFailure,
    ErrInsufficientFieldStorage,
    ErrInvalidKeyLength,
}

impl Status {
    /// Returns true for outcomes that do not indicate an engine error.
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok | Status::NotFound | Status::AlreadyExists)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::NotFound => "not_found",
            Status::AlreadyExists => "already_exists",
            Status::UserRollback => "user_rollback",
            Status::WaitingForOtherTransaction => "waiting_for_other_transaction",
            Status::ConcurrentOperation => "concurrent_operation",
            Status::ErrUnknown => "err_unknown",
            Status::ErrIoError => "err_io_error",
            Status::ErrInvalidArgument => "err_invalid_argument",
            Status::ErrUnsupported => "err_unsupported",
            Status::ErrIllegalOperation => "err_illegal_operation",
            Status::ErrAborted => "err_aborted",
            Status::ErrAbortedRetryable => "err_aborted_retryable",
            Status::ErrSerializationFailure => "err_serialization_failure",
            Status::ErrConflictOnWritePreserve => "err_conflict_on_write_preserve",
            Status::ErrTimeOut => "err_time_out",
            Status::ErrIntegrityConstraintViolation => "err_integrity_constraint_violation",
            Status::ErrUniqueConstraintViolation => "err_unique_constraint_violation",
            Status::ErrInactiveTransaction => "err_inactive_transaction",
            Status::ErrDataCorruption => "err_data_corruption",
            Status::ErrResourceLimitReached => "err_resource_limit_reached",
            Status::ErrExpressionEvaluationFailure => "err_expression_evaluation_failure",
            Status::ErrInsufficientFieldStorage => "err_insufficient_field_storage",
            Status::ErrInvalidKeyLength => "err_invalid_key_length",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

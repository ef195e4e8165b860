use std::fmt;

use crate::status::Status;

/// Error codes surfaced to clients.
///
/// The enumeration is closed; each code has a stable numeric value and a
/// string representation that is part of the external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    None,
    SqlServiceException,
    SqlExecutionException,
    ConstraintViolationException,
    UniqueConstraintViolationException,
    NotNullConstraintViolationException,
    ReferentialIntegrityConstraintViolationException,
    CheckConstraintViolationException,
    EvaluationException,
    ValueEvaluationException,
    TargetNotFoundException,
    TargetAlreadyExistsException,
    InconsistentStatementException,
    RestrictedOperationException,
    WriteOperationByRtxException,
    LtxWriteOperationWithoutWritePreserveException,
    ReadOperationOnRestrictedReadAreaException,
    InactiveTransactionException,
    ParameterException,
    UnresolvedPlaceholderException,
    SqlLimitReachedException,
    TransactionExceededLimitException,
    SqlRequestTimeoutException,
    DataCorruptionException,
    SecondaryIndexCorruptionException,
    RequestFailureException,
    TransactionNotFoundException,
    StatementNotFoundException,
    InternalException,
    UnsupportedRuntimeFeatureException,
    BlockedByHighPriorityTransactionException,
    InvalidRuntimeValueException,
    ValueOutOfRangeException,
    ValueTooLongException,
    InvalidDecimalValueException,
    CcException,
    OccException,
    OccReadException,
    ConflictOnWritePreserveException,
    OccWriteException,
    LtxException,
    LtxReadException,
    LtxWriteException,
    RtxException,
    BlockedByConcurrentOperationException,
    RequestCanceled,
    LobFileIoError,
    LobReferenceInvalid,
    OperationDenied,
}

impl ErrorCode {
    /// Stable numeric representation, part of the wire contract.
    pub fn code_number(&self) -> i64 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::SqlServiceException => 1000,
            ErrorCode::SqlExecutionException => 2000,
            ErrorCode::ConstraintViolationException => 2001,
            ErrorCode::UniqueConstraintViolationException => 2002,
            ErrorCode::NotNullConstraintViolationException => 2003,
            ErrorCode::ReferentialIntegrityConstraintViolationException => 2004,
            ErrorCode::CheckConstraintViolationException => 2005,
            ErrorCode::EvaluationException => 2010,
            ErrorCode::ValueEvaluationException => 2011,
            ErrorCode::TargetNotFoundException => 2014,
            ErrorCode::TargetAlreadyExistsException => 2016,
            ErrorCode::InconsistentStatementException => 2018,
            ErrorCode::RestrictedOperationException => 2020,
            ErrorCode::WriteOperationByRtxException => 2022,
            ErrorCode::LtxWriteOperationWithoutWritePreserveException => 2023,
            ErrorCode::ReadOperationOnRestrictedReadAreaException => 2024,
            ErrorCode::InactiveTransactionException => 2025,
            ErrorCode::ParameterException => 2027,
            ErrorCode::UnresolvedPlaceholderException => 2028,
            ErrorCode::SqlLimitReachedException => 2036,
            ErrorCode::TransactionExceededLimitException => 2037,
            ErrorCode::SqlRequestTimeoutException => 2039,
            ErrorCode::DataCorruptionException => 2041,
            ErrorCode::SecondaryIndexCorruptionException => 2042,
            ErrorCode::RequestFailureException => 2044,
            ErrorCode::TransactionNotFoundException => 2045,
            ErrorCode::StatementNotFoundException => 2046,
            ErrorCode::InternalException => 2048,
            ErrorCode::UnsupportedRuntimeFeatureException => 2050,
            ErrorCode::BlockedByHighPriorityTransactionException => 2052,
            ErrorCode::InvalidRuntimeValueException => 2054,
            ErrorCode::ValueOutOfRangeException => 2056,
            ErrorCode::ValueTooLongException => 2058,
            ErrorCode::InvalidDecimalValueException => 2060,
            ErrorCode::CcException => 4000,
            ErrorCode::OccException => 4001,
            ErrorCode::OccReadException => 4010,
            ErrorCode::ConflictOnWritePreserveException => 4015,
            ErrorCode::OccWriteException => 4011,
            ErrorCode::LtxException => 4003,
            ErrorCode::LtxReadException => 4013,
            ErrorCode::LtxWriteException => 4014,
            ErrorCode::RtxException => 4005,
            ErrorCode::BlockedByConcurrentOperationException => 4007,
            ErrorCode::RequestCanceled => 50011,
            ErrorCode::LobFileIoError => 50012,
            ErrorCode::LobReferenceInvalid => 50013,
            ErrorCode::OperationDenied => 50014,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::None => "none",
            ErrorCode::SqlServiceException => "sql_service_exception",
            ErrorCode::SqlExecutionException => "sql_execution_exception",
            ErrorCode::ConstraintViolationException => "constraint_violation_exception",
            ErrorCode::UniqueConstraintViolationException => "unique_constraint_violation_exception",
            ErrorCode::NotNullConstraintViolationException => {
                "not_null_constraint_violation_exception"
            }
            ErrorCode::ReferentialIntegrityConstraintViolationException => {
                "referential_integrity_constraint_violation_exception"
            }
            ErrorCode::CheckConstraintViolationException => "check_constraint_violation_exception",
            ErrorCode::EvaluationException => "evaluation_exception",
            ErrorCode::ValueEvaluationException => "value_evaluation_exception",
            ErrorCode::TargetNotFoundException => "target_not_found_exception",
            ErrorCode::TargetAlreadyExistsException => "target_already_exists_exception",
            ErrorCode::InconsistentStatementException => "inconsistent_statement_exception",
            ErrorCode::RestrictedOperationException => "restricted_operation_exception",
            ErrorCode::WriteOperationByRtxException => "write_operation_by_rtx_exception",
            ErrorCode::LtxWriteOperationWithoutWritePreserveException => {
                "ltx_write_operation_without_write_preserve_exception"
            }
            ErrorCode::ReadOperationOnRestrictedReadAreaException => {
                "read_operation_on_restricted_read_area_exception"
            }
            ErrorCode::InactiveTransactionException => "inactive_transaction_exception",
            ErrorCode::ParameterException => "parameter_exception",
            ErrorCode::UnresolvedPlaceholderException => "unresolved_placeholder_exception",
            ErrorCode::SqlLimitReachedException => "sql_limit_reached_exception",
            ErrorCode::TransactionExceededLimitException => "transaction_exceeded_limit_exception",
            ErrorCode::SqlRequestTimeoutException => "sql_request_timeout_exception",
            ErrorCode::DataCorruptionException => "data_corruption_exception",
            ErrorCode::SecondaryIndexCorruptionException => "secondary_index_corruption_exception",
            ErrorCode::RequestFailureException => "request_failure_exception",
            ErrorCode::TransactionNotFoundException => "transaction_not_found_exception",
            ErrorCode::StatementNotFoundException => "statement_not_found_exception",
            ErrorCode::InternalException => "internal_exception",
            ErrorCode::UnsupportedRuntimeFeatureException => {
                "unsupported_runtime_feature_exception"
            }
            ErrorCode::BlockedByHighPriorityTransactionException => {
                "blocked_by_high_priority_transaction_exception"
            }
            ErrorCode::InvalidRuntimeValueException => "invalid_runtime_value_exception",
            ErrorCode::ValueOutOfRangeException => "value_out_of_range_exception",
            ErrorCode::ValueTooLongException => "value_too_long_exception",
            ErrorCode::InvalidDecimalValueException => "invalid_decimal_value_exception",
            ErrorCode::CcException => "cc_exception",
            ErrorCode::OccException => "occ_exception",
            ErrorCode::OccReadException => "occ_read_exception",
            ErrorCode::ConflictOnWritePreserveException => "conflict_on_write_preserve_exception",
            ErrorCode::OccWriteException => "occ_write_exception",
            ErrorCode::LtxException => "ltx_exception",
            ErrorCode::LtxReadException => "ltx_read_exception",
            ErrorCode::LtxWriteException => "ltx_write_exception",
            ErrorCode::RtxException => "rtx_exception",
            ErrorCode::BlockedByConcurrentOperationException => {
                "blocked_by_concurrent_operation_exception"
            }
            ErrorCode::RequestCanceled => "request_canceled",
            ErrorCode::LobFileIoError => "lob_file_io_error",
            ErrorCode::LobReferenceInvalid => "lob_reference_invalid",
            ErrorCode::OperationDenied => "operation_denied",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detail of an error raised during request processing.
///
/// The first fatal error of a request wins; later ones are dropped by the
/// request context. An info may chain the error that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    code: ErrorCode,
    message: String,
    status: Status,
    supplementary_text: String,
    cause: Option<Box<ErrorInfo>>,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>, status: Status) -> Self {
        Self {
            code,
            message: message.into(),
            status,
            supplementary_text: String::new(),
            cause: None,
        }
    }

    pub fn with_supplementary(mut self, text: impl Into<String>) -> Self {
        self.supplementary_text = text.into();
        self
    }

    pub fn with_cause(mut self, cause: ErrorInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn supplementary_text(&self) -> &str {
        &self.supplementary_text
    }

    pub fn cause(&self) -> Option<&ErrorInfo> {
        self.cause.as_deref()
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (status={})", self.code, self.message, self.status)?;
        if !self.supplementary_text.is_empty() {
            write!(f, " {}", self.supplementary_text)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInfo {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_strings_are_stable() {
        assert_eq!(
            ErrorCode::UniqueConstraintViolationException.as_str(),
            "unique_constraint_violation_exception"
        );
        assert_eq!(ErrorCode::UniqueConstraintViolationException.code_number(), 2002);
        assert_eq!(
            ErrorCode::LtxWriteOperationWithoutWritePreserveException.code_number(),
            2023
        );
    }

    #[test]
    fn error_info_chains_cause() {
        let cause = ErrorInfo::new(
            ErrorCode::OccReadException,
            "read conflict",
            Status::ErrSerializationFailure,
        );
        let info = ErrorInfo::new(
            ErrorCode::SqlExecutionException,
            "statement failed",
            Status::ErrAborted,
        )
        .with_cause(cause.clone());
        assert_eq!(info.cause(), Some(&cause));
    }
}

//! # Error Types
//!
//! Domain-specific error types for attendo-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  attendo-core errors (this file)                                       │
//! │  ├── CoreError        - Terminal data that cannot be interpreted       │
//! │  └── ValidationError  - Operator input validation failures             │
//! │                                                                         │
//! │  attendo-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  attendo-sync errors (separate crate)                                  │
//! │  └── SyncError        - Session / reconciliation failures              │
//! │                                                                         │
//! │  Flow: CoreError → SyncError::Format → skipped record, pull continues  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors raised while interpreting data.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A record reported by a terminal has a field that cannot be coerced
    /// into the local representation.
    ///
    /// ## When This Occurs
    /// - Terminal user_id is not an integer (e.g. `"A12"`)
    /// - Terminal group_id is not an integer
    ///
    /// Only the offending record is affected; the rest of a pull continues.
    #[error("Invalid {field} '{value}' in terminal record: {reason}")]
    InvalidRecord {
        field: String,
        value: String,
        reason: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvalidRecord error.
    pub fn invalid_record(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::InvalidRecord {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when operator input doesn't meet requirements.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g. non-numeric id, malformed IP address).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_record_message() {
        let err = CoreError::invalid_record("user_id", "A12", "not an integer");
        assert_eq!(
            err.to_string(),
            "Invalid user_id 'A12' in terminal record: not an integer"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "serial_number".to_string(),
        };
        assert_eq!(err.to_string(), "serial_number is required");

        let err = ValidationError::OutOfRange {
            field: "port".to_string(),
            min: 0,
            max: 65535,
        };
        assert_eq!(err.to_string(), "port must be between 0 and 65535");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "name".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}

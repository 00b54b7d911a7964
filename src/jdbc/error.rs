// Driver Errors
//
// The single error type crossing the driver boundary.

use std::fmt;

use thiserror::Error;

/// Failure reported by a driver, carrying the SQLState and vendor code
/// the dialect uses to classify it
#[derive(Error, Debug, Clone, PartialEq)]
pub struct SqlError {
    message: String,
    sql_state: Option<String>,
    error_code: i32,
}

/// Result type for driver-level calls
pub type SqlResult<T> = std::result::Result<T, SqlError>;

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "{} [SQLState: {}, error code: {}]", self.message, state, self.error_code),
            None => write!(f, "{} [error code: {}]", self.message, self.error_code),
        }
    }
}

impl SqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
            error_code: 0,
        }
    }

    pub fn with_state(message: impl Into<String>, sql_state: impl Into<String>, error_code: i32) -> Self {
        Self {
            message: message.into(),
            sql_state: Some(sql_state.into()),
            error_code,
        }
    }

    /// An error identified by a vendor code only
    pub fn with_code(message: impl Into<String>, error_code: i32) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
            error_code,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }

    /// The two-character class of the SQLState, e.g. `23` for integrity violations
    pub fn sql_state_class(&self) -> Option<&str> {
        self.sql_state.as_deref().filter(|s| s.len() >= 2).map(|s| &s[..2])
    }

    pub fn error_code(&self) -> i32 {
        self.error_code
    }
}

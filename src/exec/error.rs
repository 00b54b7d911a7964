// Execution Errors
//
// The domain error family of the execution layer and the helper that
// translates driver errors into it.

use std::fmt;

use log::warn;
use thiserror::Error;

use crate::dialect::{ConstraintKind, Dialect, SqlErrorKind};
use crate::jdbc::SqlError;
use crate::mapping::MappingError;

/// Error type for execution operations
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("No argument bound for parameter {0}")]
    ParameterNotBound(String),

    #[error("Unable to determine the JDBC type of parameter {0}")]
    UnresolvableParameterType(String),

    #[error("Value {value} cannot be bound through mapping {mapping}")]
    ParameterMismatch { mapping: String, value: String },

    #[error("{message} [{sql}]; {kind} constraint [{}]", .constraint_name.as_deref().unwrap_or("unknown"))]
    ConstraintViolation {
        kind: ConstraintKind,
        constraint_name: Option<String>,
        message: String,
        sql: String,
        #[source]
        source: SqlError,
    },

    #[error("{message} [{sql}]")]
    LockTimeout {
        message: String,
        sql: String,
        #[source]
        source: SqlError,
    },

    #[error("{message} [{sql}]")]
    LockAcquisition {
        message: String,
        sql: String,
        #[source]
        source: SqlError,
    },

    #[error("{message} [{sql}]")]
    QueryTimeout {
        message: String,
        sql: String,
        #[source]
        source: SqlError,
    },

    #[error("{message} [{sql}]")]
    SqlGrammar {
        message: String,
        sql: String,
        #[source]
        source: SqlError,
    },

    #[error("{message} [{sql}]")]
    Data {
        message: String,
        sql: String,
        #[source]
        source: SqlError,
    },

    #[error("{message} [{sql}]")]
    JdbcConnection {
        message: String,
        sql: String,
        #[source]
        source: SqlError,
    },

    #[error("{message} [{sql}]")]
    GenericJdbc {
        message: String,
        sql: String,
        #[source]
        source: SqlError,
    },

    #[error("Unexpected row count: {actual}; expected: {expected}; statement executed: {sql}")]
    StaleState { expected: u64, actual: u64, sql: String },

    #[error("Duplicate row was found and Assert was specified: {0}")]
    DuplicateRow(String),

    #[error("Query returned more than one result: {0}")]
    NonUniqueResult(usize),

    #[error("Result cache error: {0}")]
    ResultCache(String),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("{primary} (plus {} suppressed)", .suppressed.len())]
    Suppressed {
        primary: Box<ExecError>,
        suppressed: Vec<ExecError>,
    },
}

/// Result type for execution operations
pub type ExecResult<T> = std::result::Result<T, ExecError>;

impl ExecError {
    /// The error that caused the failure, ignoring cleanup failures
    pub fn primary(&self) -> &ExecError {
        match self {
            ExecError::Suppressed { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// Failures that happened while cleaning up after the primary error
    pub fn suppressed(&self) -> &[ExecError] {
        match self {
            ExecError::Suppressed { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// Attach a cleanup failure, keeping `self` as the primary error
    pub fn with_suppressed(self, cleanup: ExecError) -> ExecError {
        match self {
            ExecError::Suppressed { primary, mut suppressed } => {
                suppressed.push(cleanup);
                ExecError::Suppressed { primary, suppressed }
            }
            primary => ExecError::Suppressed {
                primary: Box::new(primary),
                suppressed: vec![cleanup],
            },
        }
    }

    /// The driver error behind a translated error
    pub fn sql_error(&self) -> Option<&SqlError> {
        match self.primary() {
            ExecError::ConstraintViolation { source, .. }
            | ExecError::LockTimeout { source, .. }
            | ExecError::LockAcquisition { source, .. }
            | ExecError::QueryTimeout { source, .. }
            | ExecError::SqlGrammar { source, .. }
            | ExecError::Data { source, .. }
            | ExecError::JdbcConnection { source, .. }
            | ExecError::GenericJdbc { source, .. } => Some(source),
            _ => None,
        }
    }

    /// SQL text attached to a translated error
    pub fn sql(&self) -> Option<&str> {
        match self.primary() {
            ExecError::ConstraintViolation { sql, .. }
            | ExecError::LockTimeout { sql, .. }
            | ExecError::LockAcquisition { sql, .. }
            | ExecError::QueryTimeout { sql, .. }
            | ExecError::SqlGrammar { sql, .. }
            | ExecError::Data { sql, .. }
            | ExecError::JdbcConnection { sql, .. }
            | ExecError::GenericJdbc { sql, .. }
            | ExecError::StaleState { sql, .. } => Some(sql),
            _ => None,
        }
    }

    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self.primary() {
            ExecError::ConstraintViolation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn constraint_name(&self) -> Option<&str> {
        match self.primary() {
            ExecError::ConstraintViolation { constraint_name, .. } => constraint_name.as_deref(),
            _ => None,
        }
    }
}

/// Translates driver errors into execution errors using the dialect's
/// classification
pub struct SqlExceptionHelper<'a> {
    dialect: &'a dyn Dialect,
}

impl<'a> SqlExceptionHelper<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self { dialect }
    }

    /// Convert `err`, raised while `message`, for statement `sql`
    pub fn convert(&self, err: SqlError, message: &str, sql: &str) -> ExecError {
        self.log_exceptions(&err, message);
        let message = format!("{}: {}", message, err.message());
        let sql = sql.to_string();
        match self.dialect.classify(&err) {
            SqlErrorKind::ConstraintViolation(kind) => ExecError::ConstraintViolation {
                kind,
                constraint_name: self.dialect.extract_constraint_name(&err),
                message,
                sql,
                source: err,
            },
            SqlErrorKind::LockTimeout => ExecError::LockTimeout { message, sql, source: err },
            SqlErrorKind::LockAcquisition => ExecError::LockAcquisition { message, sql, source: err },
            SqlErrorKind::QueryTimeout => ExecError::QueryTimeout { message, sql, source: err },
            SqlErrorKind::SqlGrammar => ExecError::SqlGrammar { message, sql, source: err },
            SqlErrorKind::Data => ExecError::Data { message, sql, source: err },
            SqlErrorKind::JdbcConnection => ExecError::JdbcConnection { message, sql, source: err },
            SqlErrorKind::Generic => ExecError::GenericJdbc { message, sql, source: err },
        }
    }

    fn log_exceptions(&self, err: &SqlError, message: &str) {
        warn!(
            "SQL Error: {}, SQLState: {} ({})",
            err.error_code(),
            err.sql_state().unwrap_or("n/a"),
            message
        );
        warn!("{}", err.message());
    }
}

impl fmt::Debug for SqlExceptionHelper<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlExceptionHelper")
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

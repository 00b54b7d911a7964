// Dialect Module
//
// Database-specific behavior the execution layer consults: classification
// of driver errors, extraction of violated constraint names, IN-list bind
// padding, SQL comments and hints, pessimistic lock clauses and the SQL used
// to read and change a connection's lock timeout.

pub mod postgresql;
pub mod sqlite;
pub mod standard;

use std::fmt;

use crate::common::types::DataValue;
use crate::exec::options::{LockMode, Timeout};
use crate::jdbc::SqlError;

pub use self::postgresql::PostgreSqlDialect;
pub use self::sqlite::SqliteDialect;
pub use self::standard::StandardDialect;

/// Kind of integrity constraint a statement violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
    Other,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not null",
            ConstraintKind::Check => "check",
            ConstraintKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Classification of a driver error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlErrorKind {
    ConstraintViolation(ConstraintKind),
    LockTimeout,
    LockAcquisition,
    QueryTimeout,
    SqlGrammar,
    Data,
    JdbcConnection,
    Generic,
}

/// Database-specific behavior
pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Classify a driver error. The default reads the SQLState class.
    fn classify(&self, err: &SqlError) -> SqlErrorKind {
        classify_by_sql_state(err)
    }

    /// Name of the constraint a constraint-violation error reports, if the
    /// message carries one
    fn extract_constraint_name(&self, err: &SqlError) -> Option<String> {
        extract_using_template(err.message(), "constraint \"", "\"")
            .or_else(|| extract_using_template(err.message(), "constraint '", "'"))
    }

    /// Whether a violated constraint name reported by the database is the
    /// constraint declared on the mapping
    fn constraint_name_matches(&self, declared: &str, violated: Option<&str>) -> bool {
        default_constraint_name_matches(declared, violated)
    }

    /// Maximum number of expressions in an IN list; 0 means no limit
    fn in_expression_count_limit(&self) -> usize {
        0
    }

    /// Bind count an IN list of `count` values is padded to: the next power
    /// of two, capped by the IN list limit
    fn padded_bind_count(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        let padded = count.next_power_of_two();
        match self.in_expression_count_limit() {
            0 => padded,
            limit if padded > limit => limit.max(count),
            _ => padded,
        }
    }

    /// Apply query hints to the SQL text. The default ignores hints.
    fn query_hint_string(&self, sql: &str, _hints: &[String]) -> String {
        sql.to_string()
    }

    /// Apply hints, then prepend the comment when comments are enabled
    fn add_sql_hint_or_comment(&self, sql: &str, comment: Option<&str>, hints: &[String], comments_enabled: bool) -> String {
        let mut sql = if hints.is_empty() {
            sql.to_string()
        } else {
            self.query_hint_string(sql, hints)
        };
        if comments_enabled {
            if let Some(comment) = comment.filter(|c| !c.is_empty()) {
                sql = format!("/* {} */ {}", escape_comment(comment), sql);
            }
        }
        sql
    }

    /// Clause appended to a select to lock its rows
    fn for_update_string(&self, mode: LockMode, timeout: Timeout) -> String {
        if !mode.is_pessimistic() {
            return String::new();
        }
        match timeout {
            Timeout::NoWait => " for update nowait".to_string(),
            Timeout::SkipLocked => " for update skip locked".to_string(),
            _ => " for update".to_string(),
        }
    }

    /// Whether the lock timeout can be changed on the connection. When it
    /// can, lock timeouts are applied around a select instead of rendered
    /// into the lock clause.
    fn supports_connection_lock_timeout(&self) -> bool {
        self.current_lock_timeout_sql().is_some()
    }

    /// Query returning the connection's current lock timeout as one value
    fn current_lock_timeout_sql(&self) -> Option<&str> {
        None
    }

    /// Interpret the value returned by the current lock timeout query
    fn lock_timeout_from_value(&self, _value: &DataValue) -> Option<Timeout> {
        None
    }

    /// Statement that sets the connection's lock timeout; `None` when the
    /// timeout cannot be expressed at connection level
    fn set_lock_timeout_sql(&self, _timeout: Timeout) -> Option<String> {
        None
    }

    fn supports_named_call_parameters(&self) -> bool {
        false
    }
}

/// Case-insensitive match that tolerates a qualifying prefix before the
/// last `.` of the violated name
pub fn default_constraint_name_matches(declared: &str, violated: Option<&str>) -> bool {
    let Some(violated) = violated else {
        return false;
    };
    if declared.eq_ignore_ascii_case(violated) {
        return true;
    }
    match violated.rfind('.') {
        Some(dot) => declared.eq_ignore_ascii_case(&violated[dot + 1..]),
        None => false,
    }
}

/// Text between `start` and the following `end` in `message`, compared
/// case-insensitively on `start`
pub fn extract_using_template(message: &str, start: &str, end: &str) -> Option<String> {
    let lower = message.to_ascii_lowercase();
    let begin = lower.find(&start.to_ascii_lowercase())? + start.len();
    let rest = &message[begin..];
    let finish = if end.is_empty() { rest.len() } else { rest.find(end)? };
    let name = rest[..finish].trim();
    if name.is_empty() { None } else { Some(name.to_string()) }
}

/// Classification shared by dialects that follow the SQLState classes
pub fn classify_by_sql_state(err: &SqlError) -> SqlErrorKind {
    match err.sql_state() {
        Some("23505") => SqlErrorKind::ConstraintViolation(ConstraintKind::Unique),
        Some("23503") => SqlErrorKind::ConstraintViolation(ConstraintKind::ForeignKey),
        Some("23502") => SqlErrorKind::ConstraintViolation(ConstraintKind::NotNull),
        Some("23514") => SqlErrorKind::ConstraintViolation(ConstraintKind::Check),
        Some("40001") | Some("40P01") => SqlErrorKind::LockAcquisition,
        Some("HYT00") | Some("HYT01") => SqlErrorKind::QueryTimeout,
        _ => match err.sql_state_class() {
            Some("23") | Some("27") | Some("44") => SqlErrorKind::ConstraintViolation(ConstraintKind::Other),
            Some("42") | Some("37") => SqlErrorKind::SqlGrammar,
            Some("22") => SqlErrorKind::Data,
            Some("08") => SqlErrorKind::JdbcConnection,
            Some("40") => SqlErrorKind::LockAcquisition,
            _ => SqlErrorKind::Generic,
        },
    }
}

fn escape_comment(comment: &str) -> String {
    comment.replace("*/", "*\\/").replace("/*", "/\\*")
}

// SQLite Dialect
//
// SQLite reports no SQLState; errors are classified by the extended result
// code. The lock timeout is the connection's busy timeout.

use crate::common::types::DataValue;
use crate::dialect::{classify_by_sql_state, extract_using_template, ConstraintKind, Dialect, SqlErrorKind};
use crate::exec::options::{LockMode, Timeout};
use crate::jdbc::SqlError;

const SQLITE_ERROR: i32 = 1;
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_INTERRUPT: i32 = 9;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_TOOBIG: i32 = 18;
const SQLITE_CONSTRAINT: i32 = 19;
const SQLITE_MISMATCH: i32 = 20;
const SQLITE_RANGE: i32 = 25;
const SQLITE_NOTADB: i32 = 26;

const SQLITE_CONSTRAINT_CHECK: i32 = 275;
const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;
const SQLITE_CONSTRAINT_NOTNULL: i32 = 1299;
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

/// Busy timeout used to express "wait forever"
const WAIT_FOREVER_MILLIS: i64 = i32::MAX as i64;

/// SQLite dialect
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn classify(&self, err: &SqlError) -> SqlErrorKind {
        if err.sql_state().is_some() {
            return classify_by_sql_state(err);
        }
        match err.error_code() {
            SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY => {
                SqlErrorKind::ConstraintViolation(ConstraintKind::Unique)
            }
            SQLITE_CONSTRAINT_FOREIGNKEY => SqlErrorKind::ConstraintViolation(ConstraintKind::ForeignKey),
            SQLITE_CONSTRAINT_NOTNULL => SqlErrorKind::ConstraintViolation(ConstraintKind::NotNull),
            SQLITE_CONSTRAINT_CHECK => SqlErrorKind::ConstraintViolation(ConstraintKind::Check),
            code => match code & 0xff {
                SQLITE_CONSTRAINT => SqlErrorKind::ConstraintViolation(ConstraintKind::Other),
                SQLITE_BUSY | SQLITE_LOCKED => SqlErrorKind::LockAcquisition,
                SQLITE_INTERRUPT => SqlErrorKind::QueryTimeout,
                SQLITE_TOOBIG | SQLITE_MISMATCH | SQLITE_RANGE => SqlErrorKind::Data,
                SQLITE_CORRUPT | SQLITE_CANTOPEN | SQLITE_NOTADB => SqlErrorKind::JdbcConnection,
                SQLITE_ERROR
                    if err.message().contains("syntax error") || err.message().contains("no such") =>
                {
                    SqlErrorKind::SqlGrammar
                }
                _ => SqlErrorKind::Generic,
            },
        }
    }

    /// SQLite names the constrained columns, e.g. `users.email`
    fn extract_constraint_name(&self, err: &SqlError) -> Option<String> {
        extract_using_template(err.message(), "constraint failed: ", "")
    }

    fn in_expression_count_limit(&self) -> usize {
        // SQLITE_MAX_VARIABLE_NUMBER on builds before 3.32
        999
    }

    fn for_update_string(&self, _mode: LockMode, _timeout: Timeout) -> String {
        String::new()
    }

    fn current_lock_timeout_sql(&self) -> Option<&str> {
        Some("pragma busy_timeout")
    }

    fn lock_timeout_from_value(&self, value: &DataValue) -> Option<Timeout> {
        match value.as_integer()? {
            0 => Some(Timeout::NoWait),
            ms if ms >= WAIT_FOREVER_MILLIS => Some(Timeout::WaitForever),
            ms if ms > 0 => Some(Timeout::Millis(ms as u64)),
            _ => None,
        }
    }

    fn set_lock_timeout_sql(&self, timeout: Timeout) -> Option<String> {
        let millis = match timeout {
            Timeout::NoWait => 0,
            Timeout::WaitForever => WAIT_FOREVER_MILLIS,
            Timeout::Millis(ms) => ms.min(WAIT_FOREVER_MILLIS as u64) as i64,
            Timeout::SkipLocked => return None,
        };
        Some(format!("pragma busy_timeout = {}", millis))
    }
}

// PostgreSQL Dialect
//
// Error classification adds the lock and cancellation states PostgreSQL
// reports; the lock timeout is a session setting read with
// `current_setting` and changed with `SET LOCAL`.

use crate::common::types::DataValue;
use crate::dialect::{classify_by_sql_state, extract_using_template, Dialect, SqlErrorKind};
use crate::exec::options::{LockMode, Timeout};
use crate::jdbc::SqlError;

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgreSqlDialect;

impl PostgreSqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgreSqlDialect {
    fn name(&self) -> &str {
        "postgresql"
    }

    fn classify(&self, err: &SqlError) -> SqlErrorKind {
        match err.sql_state() {
            // lock_not_available
            Some("55P03") => SqlErrorKind::LockTimeout,
            // query_canceled, raised when statement_timeout elapses
            Some("57014") => SqlErrorKind::QueryTimeout,
            _ => classify_by_sql_state(err),
        }
    }

    fn extract_constraint_name(&self, err: &SqlError) -> Option<String> {
        let message = err.message();
        ["violates unique constraint \"", "violates foreign key constraint \"", "violates check constraint \""]
            .iter()
            .find_map(|start| extract_using_template(message, start, "\""))
    }

    fn query_hint_string(&self, sql: &str, hints: &[String]) -> String {
        format!("/*+ {} */ {}", hints.join(" "), sql)
    }

    fn for_update_string(&self, mode: LockMode, timeout: Timeout) -> String {
        let clause = match mode {
            LockMode::PessimisticRead => " for share",
            LockMode::PessimisticWrite | LockMode::PessimisticForceIncrement => " for update",
            _ => return String::new(),
        };
        match timeout {
            Timeout::NoWait => format!("{} nowait", clause),
            Timeout::SkipLocked => format!("{} skip locked", clause),
            _ => clause.to_string(),
        }
    }

    fn current_lock_timeout_sql(&self) -> Option<&str> {
        Some("select current_setting('lock_timeout', false)")
    }

    fn lock_timeout_from_value(&self, value: &DataValue) -> Option<Timeout> {
        match value {
            DataValue::Integer(0) => Some(Timeout::WaitForever),
            DataValue::Integer(ms) if *ms > 0 => Some(Timeout::Millis(*ms as u64)),
            DataValue::Text(text) => parse_setting(text),
            _ => None,
        }
    }

    fn set_lock_timeout_sql(&self, timeout: Timeout) -> Option<String> {
        match timeout {
            Timeout::WaitForever => Some("set local lock_timeout = 0".to_string()),
            Timeout::Millis(ms) => Some(format!("set local lock_timeout = {}", ms)),
            Timeout::NoWait | Timeout::SkipLocked => None,
        }
    }

    fn supports_named_call_parameters(&self) -> bool {
        true
    }
}

/// Parse a duration setting such as `0`, `250ms`, `5s` or `2min`
fn parse_setting(text: &str) -> Option<Timeout> {
    let text = text.trim();
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let amount: u64 = text[..split].parse().ok()?;
    let millis = match text[split..].trim() {
        "" | "ms" => amount,
        "s" => amount * 1_000,
        "min" => amount * 60_000,
        "h" => amount * 3_600_000,
        _ => return None,
    };
    if millis == 0 { Some(Timeout::WaitForever) } else { Some(Timeout::Millis(millis)) }
}

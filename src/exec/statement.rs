// Statement Creation
//
// Executors obtain their prepared statements through a StatementCreator so
// callers can substitute how a statement is prepared.

use std::fmt;

use crate::exec::error::ExecResult;
use crate::jdbc::{PreparedStatement, ScrollMode};
use crate::session::SessionContext;

/// Prepares the statement for one execution
pub trait StatementCreator: fmt::Debug {
    fn create_statement(
        &self,
        session: &SessionContext,
        sql: &str,
        scroll_mode: ScrollMode,
    ) -> ExecResult<Box<dyn PreparedStatement>>;
}

/// Prepares statements through the session's coordinator
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardStatementCreator;

impl StatementCreator for StandardStatementCreator {
    fn create_statement(
        &self,
        session: &SessionContext,
        sql: &str,
        scroll_mode: ScrollMode,
    ) -> ExecResult<Box<dyn PreparedStatement>> {
        session
            .jdbc_coordinator()
            .prepare_statement(sql, scroll_mode)
            .map_err(|e| session.factory().sql_exception_helper().convert(e, "could not prepare statement", sql))
    }
}

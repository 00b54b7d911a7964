// JDBC Coordinator
//
// Owns the session's borrowed connection handle and every statement
// prepared through it. Statements are released here; the connection
// itself is never closed by the execution layer.

use std::cell::{Cell, RefCell};
use std::fmt;

use log::{debug, trace};

use crate::jdbc::{CallableStatement, Connection, PreparedStatement, ResultSet, ScrollMode, SqlResult, Statement};

/// Prepares and releases the statements of one session
pub struct JdbcCoordinator {
    /// Connection borrowed from the connection provider
    connection: RefCell<Box<dyn Connection>>,

    /// Statements prepared and not yet released
    open_statements: Cell<usize>,

    /// Completed statement executions
    executions: Cell<u64>,
}

impl JdbcCoordinator {
    pub fn new(connection: Box<dyn Connection>) -> Self {
        Self {
            connection: RefCell::new(connection),
            open_statements: Cell::new(0),
            executions: Cell::new(0),
        }
    }

    /// Prepare a parameterized statement, logging its SQL
    pub fn prepare_statement(&self, sql: &str, scroll_mode: ScrollMode) -> SqlResult<Box<dyn PreparedStatement>> {
        debug!("{}", sql);
        let statement = self.connection.borrow_mut().prepare_statement(sql, scroll_mode)?;
        self.open_statements.set(self.open_statements.get() + 1);
        Ok(statement)
    }

    /// Prepare a stored-procedure call, logging its SQL
    pub fn prepare_call(&self, sql: &str) -> SqlResult<Box<dyn CallableStatement>> {
        debug!("{}", sql);
        let statement = self.connection.borrow_mut().prepare_call(sql)?;
        self.open_statements.set(self.open_statements.get() + 1);
        Ok(statement)
    }

    /// Create a plain statement for ad hoc SQL
    pub fn create_statement(&self) -> SqlResult<Box<dyn Statement>> {
        let statement = self.connection.borrow_mut().create_statement()?;
        self.open_statements.set(self.open_statements.get() + 1);
        Ok(statement)
    }

    /// Close a prepared statement
    pub fn release(&self, mut statement: Box<dyn PreparedStatement>) -> SqlResult<()> {
        trace!("Releasing statement [{}]", statement.sql());
        self.statement_released();
        statement.close()
    }

    /// Close a callable statement
    pub fn release_call(&self, mut statement: Box<dyn CallableStatement>) -> SqlResult<()> {
        trace!("Releasing callable statement");
        self.statement_released();
        statement.close()
    }

    /// Close a plain statement
    pub fn release_statement(&self, mut statement: Box<dyn Statement>) -> SqlResult<()> {
        trace!("Releasing plain statement");
        self.statement_released();
        statement.close()
    }

    /// Close a result set
    pub fn release_result_set(&self, mut result_set: Box<dyn ResultSet>) -> SqlResult<()> {
        trace!("Releasing result set");
        result_set.close()
    }

    /// Hook run once a statement has completed, successfully or not
    pub fn after_statement_execution(&self) {
        self.executions.set(self.executions.get() + 1);
        trace!(
            "Statement execution complete ({} executions, {} open statements)",
            self.executions.get(),
            self.open_statements.get()
        );
    }

    pub fn open_statement_count(&self) -> usize {
        self.open_statements.get()
    }

    pub fn execution_count(&self) -> u64 {
        self.executions.get()
    }

    fn statement_released(&self) {
        self.open_statements.set(self.open_statements.get().saturating_sub(1));
    }
}

impl fmt::Debug for JdbcCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JdbcCoordinator")
            .field("open_statements", &self.open_statements.get())
            .field("executions", &self.executions.get())
            .finish()
    }
}

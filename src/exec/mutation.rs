// Mutation Executor
//
// Runs insert, update and delete statements. The row count is checked
// against the caller's expectation, and a unique violation of the
// constraint an insert declared it may fail on counts as zero rows
// inserted instead of an error.

use log::{debug, trace};

use crate::dialect::ConstraintKind;
use crate::exec::binder::bind_parameters;
use crate::exec::context::ExecutionContext;
use crate::exec::error::{ExecError, ExecResult};
use crate::exec::operation::{JdbcMutation, JdbcOperation};
use crate::exec::parameter::JdbcParameterBindings;
use crate::exec::select::combine;
use crate::exec::statement::{StandardStatementCreator, StatementCreator};
use crate::jdbc::{PreparedStatement, ScrollMode};

/// Check of the number of rows a mutation affected
pub trait Expectation {
    fn verify_outcome(&self, row_count: u64, sql: &str) -> ExecResult<()>;
}

impl<F> Expectation for F
where
    F: Fn(u64, &str) -> ExecResult<()>,
{
    fn verify_outcome(&self, row_count: u64, sql: &str) -> ExecResult<()> {
        self(row_count, sql)
    }
}

/// Accepts any row count
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpectation;

impl Expectation for NoExpectation {
    fn verify_outcome(&self, _row_count: u64, _sql: &str) -> ExecResult<()> {
        Ok(())
    }
}

/// Requires an exact row count; any other count means the rows changed
/// underneath the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCountExpectation {
    expected: u64,
}

impl RowCountExpectation {
    pub fn new(expected: u64) -> Self {
        Self { expected }
    }

    /// Exactly one row
    pub fn single_row() -> Self {
        Self::new(1)
    }
}

impl Expectation for RowCountExpectation {
    fn verify_outcome(&self, row_count: u64, sql: &str) -> ExecResult<()> {
        if row_count == self.expected {
            return Ok(());
        }
        Err(ExecError::StaleState {
            expected: self.expected,
            actual: row_count,
            sql: sql.to_string(),
        })
    }
}

/// Executes mutations. Holds no state, so one instance serves every
/// session.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardJdbcMutationExecutor;

impl StandardJdbcMutationExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute `mutation` and return the number of rows it affected
    pub fn execute(
        &self,
        mutation: &JdbcMutation,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'_>,
        statement_creator: &dyn StatementCreator,
        expectation: &dyn Expectation,
    ) -> ExecResult<u64> {
        let session = context.session();
        session.auto_flush_if_required(mutation.affected_table_names())?;

        let options = context.query_options();
        let sql = session.dialect().add_sql_hint_or_comment(
            mutation.sql(),
            options.comment.as_deref(),
            &options.database_hints,
            session.settings().comments_enabled,
        );
        debug!("Executing mutation: {}", sql);

        let mut statement = statement_creator.create_statement(session, &sql, ScrollMode::ForwardOnly)?;
        let outcome = match self.perform(mutation, statement.as_mut(), bindings, context, &sql, expectation) {
            Err(e) if self.is_suppressible(mutation, &e, context) => {
                debug!(
                    "Ignoring unique constraint violation on insert: {}",
                    e.constraint_name().unwrap_or("unknown")
                );
                Ok(0)
            }
            other => other,
        };

        let coordinator = session.jdbc_coordinator();
        let released = coordinator
            .release(statement)
            .map_err(|e| session.factory().sql_exception_helper().convert(e, "could not release statement", &sql));
        coordinator.after_statement_execution();
        let rows = combine(outcome, released)?;

        let tables: Vec<String> = mutation.affected_table_names().iter().cloned().collect();
        if !tables.is_empty() {
            trace!("Invalidating cached results of {:?}", tables);
            session.factory().update_timestamps().invalidate(&tables);
        }
        Ok(rows)
    }

    /// Execute with the standard statement creator and no row count check
    pub fn execute_update(
        &self,
        mutation: &JdbcMutation,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<u64> {
        self.execute(mutation, bindings, context, &StandardStatementCreator, &NoExpectation)
    }

    fn perform(
        &self,
        mutation: &JdbcMutation,
        statement: &mut dyn PreparedStatement,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'_>,
        sql: &str,
        expectation: &dyn Expectation,
    ) -> ExecResult<u64> {
        let helper = context.session().factory().sql_exception_helper();
        if let Some(seconds) = context.query_options().timeout {
            statement
                .set_query_timeout(seconds)
                .map_err(|e| helper.convert(e, "could not set query timeout", sql))?;
        }
        bind_parameters(mutation.parameter_binders(), statement, bindings, context)?;
        let rows = statement
            .execute_update()
            .map_err(|e| helper.convert(e, "could not execute statement", sql))?;
        expectation.verify_outcome(rows, sql)?;
        Ok(rows)
    }

    fn is_suppressible(&self, mutation: &JdbcMutation, err: &ExecError, context: &ExecutionContext<'_>) -> bool {
        let declared = match mutation.unique_constraint_name_that_may_fail() {
            Some(declared) => declared,
            None => return false,
        };
        err.constraint_kind() == Some(ConstraintKind::Unique)
            && context.session().dialect().constraint_name_matches(declared, err.constraint_name())
    }
}

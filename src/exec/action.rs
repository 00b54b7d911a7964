// Pre and Post Actions
//
// Work run around a select: pre-actions before the statement executes and
// post-actions after its results are consumed. Actions reach the connection
// through a plain statement created on first use and released once per
// execution. Per-execution action state lives in an ActionMemo so the
// operation holding the actions stays immutable and reusable.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::common::types::{DataValue, ObjectId};
use crate::exec::context::ExecutionContext;
use crate::exec::error::{ExecError, ExecResult};
use crate::jdbc::Statement;
use crate::session::SessionContext;

/// Lazily created plain statement shared by the actions of one execution
pub struct StatementAccess<'a> {
    session: &'a SessionContext,
    statement: Option<Box<dyn Statement>>,
}

impl<'a> StatementAccess<'a> {
    pub fn new(session: &'a SessionContext) -> Self {
        Self {
            session,
            statement: None,
        }
    }

    pub fn session(&self) -> &'a SessionContext {
        self.session
    }

    /// The statement, created on first access
    pub fn statement(&mut self) -> ExecResult<&mut Box<dyn Statement>> {
        if self.statement.is_none() {
            let statement = self.session.jdbc_coordinator().create_statement().map_err(|e| {
                self.session
                    .factory()
                    .sql_exception_helper()
                    .convert(e, "could not create statement", "")
            })?;
            self.statement = Some(statement);
        }
        self.statement
            .as_mut()
            .ok_or_else(|| ExecError::Execution("Statement was not created".to_string()))
    }

    /// Run `sql` and return the first column of its first row
    pub fn query_single_value(&mut self, sql: &str) -> ExecResult<Option<DataValue>> {
        let session = self.session;
        let convert = |e| session.factory().sql_exception_helper().convert(e, "could not execute query", sql);
        let mut result_set = self.statement()?.execute_query(sql).map_err(convert)?;
        let value = match result_set.next() {
            Ok(true) => result_set.get_value(1, crate::jdbc::SqlType::Other).map(Some),
            Ok(false) => Ok(None),
            Err(e) => Err(e),
        };
        let closed = session.jdbc_coordinator().release_result_set(result_set);
        let value = value.map_err(convert)?;
        closed.map_err(convert)?;
        Ok(value)
    }

    /// Run a statement that returns no rows
    pub fn execute_update(&mut self, sql: &str) -> ExecResult<u64> {
        let session = self.session;
        self.statement()?
            .execute_update(sql)
            .map_err(|e| session.factory().sql_exception_helper().convert(e, "could not execute statement", sql))
    }

    pub fn is_created(&self) -> bool {
        self.statement.is_some()
    }

    /// Release the statement if it was created; safe to call repeatedly
    pub fn release(&mut self) -> ExecResult<()> {
        match self.statement.take() {
            Some(statement) => self
                .session
                .jdbc_coordinator()
                .release_statement(statement)
                .map_err(|e| self.session.factory().sql_exception_helper().convert(e, "could not release statement", "")),
            None => Ok(()),
        }
    }
}

impl Drop for StatementAccess<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Unable to release action statement: {}", e);
        }
    }
}

/// State actions keep for the duration of one execution, keyed by the
/// action's identity
#[derive(Default)]
pub struct ActionMemo {
    values: HashMap<ObjectId, Box<dyn Any>>,
}

impl ActionMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Any>(&mut self, action: ObjectId, value: T) {
        self.values.insert(action, Box::new(value));
    }

    pub fn get<T: Any>(&self, action: ObjectId) -> Option<&T> {
        self.values.get(&action).and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains(&self, action: ObjectId) -> bool {
        self.values.contains_key(&action)
    }
}

impl fmt::Debug for ActionMemo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionMemo").field("entries", &self.values.len()).finish()
    }
}

/// Work run before the statement executes
pub trait PreAction: Send + Sync {
    fn perform_pre_action(
        &self,
        statement: &mut StatementAccess<'_>,
        memo: &mut ActionMemo,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<()>;
}

/// Work run after the results are consumed
pub trait PostAction: Send + Sync {
    fn perform_post_action(
        &self,
        statement: &mut StatementAccess<'_>,
        memo: &mut ActionMemo,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<()>;

    /// Whether the action also runs when execution failed
    fn should_run_after_fail(&self, _memo: &ActionMemo) -> bool {
        false
    }
}

/// The ordered pre and post actions of an operation
#[derive(Clone, Default)]
pub struct JdbcActions {
    pre_actions: Vec<Arc<dyn PreAction>>,
    post_actions: Vec<Arc<dyn PostAction>>,
}

impl JdbcActions {
    pub fn builder() -> JdbcActionsBuilder {
        JdbcActionsBuilder::default()
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pre_actions.is_empty() && self.post_actions.is_empty()
    }

    pub fn pre_action_count(&self) -> usize {
        self.pre_actions.len()
    }

    pub fn post_action_count(&self) -> usize {
        self.post_actions.len()
    }

    /// Run every pre-action in order, stopping at the first failure
    pub fn perform_pre_actions(
        &self,
        statement: &mut StatementAccess<'_>,
        memo: &mut ActionMemo,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<()> {
        for action in &self.pre_actions {
            action.perform_pre_action(statement, memo, context)?;
        }
        Ok(())
    }

    /// Run the post-actions in order. After a failed execution only actions
    /// that ask to run after failure are run. Every eligible action runs even
    /// when an earlier one fails; the first failure is returned with the
    /// rest suppressed.
    pub fn perform_post_actions(
        &self,
        succeeded: bool,
        statement: &mut StatementAccess<'_>,
        memo: &mut ActionMemo,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<()> {
        let mut failure: Option<ExecError> = None;
        for action in &self.post_actions {
            if !succeeded && !action.should_run_after_fail(memo) {
                continue;
            }
            if let Err(e) = action.perform_post_action(statement, memo, context) {
                debug!("Post-action failed: {}", e);
                failure = Some(match failure {
                    Some(first) => first.with_suppressed(e),
                    None => e,
                });
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for JdbcActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JdbcActions")
            .field("pre_actions", &self.pre_actions.len())
            .field("post_actions", &self.post_actions.len())
            .finish()
    }
}

/// Builder for [`JdbcActions`]
#[derive(Default)]
pub struct JdbcActionsBuilder {
    pre_actions: VecDeque<Arc<dyn PreAction>>,
    post_actions: VecDeque<Arc<dyn PostAction>>,
}

impl JdbcActionsBuilder {
    pub fn append_pre_action(mut self, action: Arc<dyn PreAction>) -> Self {
        self.pre_actions.push_back(action);
        self
    }

    pub fn prepend_pre_action(mut self, action: Arc<dyn PreAction>) -> Self {
        self.pre_actions.push_front(action);
        self
    }

    pub fn append_post_action(mut self, action: Arc<dyn PostAction>) -> Self {
        self.post_actions.push_back(action);
        self
    }

    pub fn prepend_post_action(mut self, action: Arc<dyn PostAction>) -> Self {
        self.post_actions.push_front(action);
        self
    }

    /// Add an action that wraps everything added before it: its pre part
    /// runs first and its post part runs last
    pub fn add_secondary_action_pair<A>(self, action: Arc<A>) -> Self
    where
        A: PreAction + PostAction + 'static,
    {
        let post: Arc<dyn PostAction> = action.clone();
        self.prepend_pre_action(action).append_post_action(post)
    }

    pub fn add_secondary_action_pairs(self, pre: Arc<dyn PreAction>, post: Arc<dyn PostAction>) -> Self {
        self.prepend_pre_action(pre).append_post_action(post)
    }

    pub fn build(self) -> JdbcActions {
        JdbcActions {
            pre_actions: self.pre_actions.into_iter().collect(),
            post_actions: self.post_actions.into_iter().collect(),
        }
    }
}

// Lock Timeout Handler
//
// Applies a lock timeout at connection level around a locking select. The
// connection's current timeout is read and replaced before the select runs
// and put back afterwards, including after a failed select.

use log::debug;

use crate::common::types::{next_object_id, ObjectId};
use crate::exec::action::{ActionMemo, PostAction, PreAction, StatementAccess};
use crate::exec::context::ExecutionContext;
use crate::exec::error::ExecResult;
use crate::exec::options::Timeout;

/// Timeout read from the connection before it was replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Baseline(Timeout);

/// Sets the connection lock timeout for the duration of one select
#[derive(Debug)]
pub struct LockTimeoutHandler {
    id: ObjectId,
    timeout: Timeout,
}

impl LockTimeoutHandler {
    pub fn new(timeout: Timeout) -> Self {
        Self {
            id: next_object_id(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    /// Timeout the connection had before the pre-action replaced it
    pub fn baseline(&self, memo: &ActionMemo) -> Option<Timeout> {
        memo.get::<Baseline>(self.id).map(|baseline| baseline.0)
    }
}

impl PreAction for LockTimeoutHandler {
    fn perform_pre_action(
        &self,
        statement: &mut StatementAccess<'_>,
        memo: &mut ActionMemo,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<()> {
        let dialect = context.session().dialect();
        let (current_sql, set_sql) = match (dialect.current_lock_timeout_sql(), dialect.set_lock_timeout_sql(self.timeout)) {
            (Some(current), Some(set)) => (current, set),
            _ => {
                debug!("Dialect {} cannot apply lock timeout {:?} on the connection", dialect.name(), self.timeout);
                return Ok(());
            }
        };
        let baseline = statement
            .query_single_value(current_sql)?
            .and_then(|value| dialect.lock_timeout_from_value(&value))
            .unwrap_or_default();
        debug!("Replacing connection lock timeout {:?} with {:?}", baseline, self.timeout);
        statement.execute_update(&set_sql)?;
        memo.put(self.id, Baseline(baseline));
        Ok(())
    }
}

impl PostAction for LockTimeoutHandler {
    fn perform_post_action(
        &self,
        statement: &mut StatementAccess<'_>,
        memo: &mut ActionMemo,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<()> {
        let baseline = match self.baseline(memo) {
            Some(baseline) => baseline,
            None => return Ok(()),
        };
        if let Some(restore_sql) = context.session().dialect().set_lock_timeout_sql(baseline) {
            debug!("Restoring connection lock timeout {:?}", baseline);
            statement.execute_update(&restore_sql)?;
        }
        Ok(())
    }

    fn should_run_after_fail(&self, memo: &ActionMemo) -> bool {
        memo.contains(self.id)
    }
}

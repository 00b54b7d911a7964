// Follow-on Locking
//
// Locks the rows a select loaded with separate statements once its results
// are consumed. Used when the dialect cannot render a lock clause into the
// select itself. Root entities are locked in one statement per entity type,
// other entities and collections in one statement each.

use std::sync::Arc;

use linked_hash_map::LinkedHashMap;
use log::debug;

use crate::common::types::{next_object_id, DataValue, ObjectId};
use crate::exec::action::{ActionMemo, JdbcActionsBuilder, PostAction, PreAction, StatementAccess};
use crate::exec::binder::write_value;
use crate::exec::context::ExecutionContext;
use crate::exec::error::ExecResult;
use crate::exec::loaded::{LoadedEntityRegistration, LoadedValuesCollector};
use crate::exec::lock_timeout::LockTimeoutHandler;
use crate::exec::options::{LockOptions, Timeout};
use crate::exec::select::combine;
use crate::jdbc::{ScrollMode, SqlResult};
use crate::mapping::jdbc_mapping::JdbcMapping;

/// Post-action locking the values collected by a select's
/// [`LoadedValuesCollector`]
#[derive(Debug)]
pub struct FollowOnLockingAction {
    id: ObjectId,
    lock_options: LockOptions,
}

impl FollowOnLockingAction {
    pub fn new(lock_options: LockOptions) -> Self {
        Self {
            id: next_object_id(),
            lock_options,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn lock_options(&self) -> &LockOptions {
        &self.lock_options
    }

    /// Append a follow-on locking action for `lock_options` to `actions`
    pub fn apply(actions: JdbcActionsBuilder, lock_options: LockOptions) -> JdbcActionsBuilder {
        actions.append_post_action(Arc::new(Self::new(lock_options)))
    }

    /// Timeout rendered into the lock clause. A millisecond timeout goes to
    /// the connection instead when the dialect supports it.
    fn clause_timeout(&self, context: &ExecutionContext<'_>) -> Timeout {
        match self.lock_options.timeout {
            Timeout::Millis(_) if context.session().dialect().supports_connection_lock_timeout() => Timeout::WaitForever,
            timeout => timeout,
        }
    }

    fn lock_all(&self, collector: &LoadedValuesCollector, context: &ExecutionContext<'_>) -> ExecResult<()> {
        let dialect = context.session().dialect();
        let clause = dialect.for_update_string(self.lock_options.mode, self.clause_timeout(context));

        let mut by_entity: LinkedHashMap<String, Vec<LoadedEntityRegistration>> = LinkedHashMap::new();
        for registration in collector.collected_root_entities() {
            by_entity
                .entry(registration.descriptor.name().to_string())
                .or_insert_with(Vec::new)
                .push(registration);
        }
        for (name, registrations) in by_entity.iter() {
            let descriptor = &registrations[0].descriptor;
            let ids: Vec<DataValue> = registrations.iter().map(|r| r.key.id.clone()).collect();
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "select {id} from {table} where {id} in ({placeholders}){clause}",
                id = descriptor.id_column(),
                table = descriptor.table(),
            );
            debug!("Follow-on locking {} {} rows", ids.len(), name);
            lock_rows(&sql, &ids, descriptor.id_mapping(), context)?;
        }

        for registration in collector.collected_non_root_entities() {
            let descriptor = &registration.descriptor;
            let sql = format!(
                "select {id} from {table} where {id} = ?{clause}",
                id = descriptor.id_column(),
                table = descriptor.table(),
            );
            lock_rows(&sql, std::slice::from_ref(&registration.key.id), descriptor.id_mapping(), context)?;
        }

        for registration in collector.collected_collections() {
            let descriptor = &registration.descriptor;
            let sql = format!(
                "select {key} from {table} where {key} = ?{clause}",
                key = descriptor.key_column(),
                table = descriptor.table(),
            );
            lock_rows(&sql, std::slice::from_ref(&registration.key.owner_id), descriptor.key_mapping(), context)?;
        }
        Ok(())
    }
}

impl PostAction for FollowOnLockingAction {
    fn perform_post_action(
        &self,
        statement: &mut StatementAccess<'_>,
        memo: &mut ActionMemo,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<()> {
        if !self.lock_options.mode.is_pessimistic() {
            return Ok(());
        }
        let collector = match context.loaded_values_collector() {
            Some(collector) if !collector.is_empty() => collector.clone(),
            _ => return Ok(()),
        };

        let timeout_handler = match self.lock_options.timeout {
            Timeout::Millis(_) if context.session().dialect().supports_connection_lock_timeout() => {
                Some(LockTimeoutHandler::new(self.lock_options.timeout))
            }
            _ => None,
        };
        if let Some(handler) = &timeout_handler {
            handler.perform_pre_action(statement, memo, context)?;
        }
        let locked = self.lock_all(&collector, context);
        match &timeout_handler {
            Some(handler) => combine(locked, handler.perform_post_action(statement, memo, context)),
            None => locked,
        }
    }
}

/// Run one locking select and drain it
fn lock_rows(sql: &str, ids: &[DataValue], mapping: &JdbcMapping, context: &ExecutionContext<'_>) -> ExecResult<()> {
    let session = context.session();
    let coordinator = session.jdbc_coordinator();
    let helper = session.factory().sql_exception_helper();
    let mut statement = coordinator
        .prepare_statement(sql, ScrollMode::ForwardOnly)
        .map_err(|e| helper.convert(e, "could not prepare lock statement", sql))?;

    let locked = (|| -> ExecResult<()> {
        for (index, id) in ids.iter().enumerate() {
            write_value(statement.as_mut(), index + 1, id, mapping, context)?;
        }
        let mut rows = statement
            .execute_query()
            .map_err(|e| helper.convert(e, "could not lock rows", sql))?;
        let drained: SqlResult<()> = (|| {
            while rows.next()? {}
            Ok(())
        })();
        let released = coordinator.release_result_set(rows);
        drained
            .and(released)
            .map_err(|e| helper.convert(e, "could not lock rows", sql))
    })();

    let released = coordinator
        .release(statement)
        .map_err(|e| helper.convert(e, "could not release lock statement", sql));
    coordinator.after_statement_execution();
    combine(locked, released)
}

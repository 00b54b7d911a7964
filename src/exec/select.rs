// Select Executor
//
// Runs a JdbcSelect: serves its rows from the result cache or a deferred
// result set, wraps the execution in the select's pre and post actions,
// hands the rows to a results consumer and records statistics.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, trace};

use crate::cache::QueryKey;
use crate::exec::action::{ActionMemo, StatementAccess};
use crate::exec::binder::key_values;
use crate::exec::context::ExecutionContext;
use crate::exec::error::ExecResult;
use crate::exec::loaded::LoadedValuesCollector;
use crate::exec::operation::{JdbcOperation, JdbcSelect, LockStrategy};
use crate::exec::parameter::JdbcParameterBindings;
use crate::exec::results::{ListResultsConsumer, ResultsConsumer, ScrollableResultsConsumer, SingleResultConsumer, UniqueSemantic};
use crate::exec::row::{FromDomainValue, RowProcessingState, RowReader, RowTransformer, StandardRowTransformer, TupleTransformerAdapter};
use crate::exec::scroll::ScrollableResults;
use crate::exec::statement::{StandardStatementCreator, StatementCreator};
use crate::exec::values::{CachedJdbcValues, DeferredResultSetAccess, JdbcValues, QueryCachePutManager, ResultSetJdbcValues};

/// Executes selects. Holds no state, so one instance serves every session.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardJdbcSelectExecutor;

impl StandardJdbcSelectExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute `select` with `bindings` and hand its rows to `consumer`
    pub fn execute_query<'a, C>(
        &self,
        select: &JdbcSelect,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'a>,
        row_transformer: Option<Arc<dyn RowTransformer>>,
        statement_creator: Arc<dyn StatementCreator>,
        consumer: &C,
    ) -> ExecResult<C::Output>
    where
        C: ResultsConsumer<'a>,
    {
        let session = context.session();
        let _read_only = session.override_default_read_only(context.query_options().read_only);

        let mut context = context.clone();
        if let (LockStrategy::FollowOn, Some(paths)) = (select.lock_strategy(), select.paths_to_lock()) {
            if context.loaded_values_collector().is_none() {
                let collector = LoadedValuesCollector::new(paths.iter().cloned());
                context = context.with_loaded_values_collector(Rc::new(collector));
            }
        }

        let options = context.query_options();
        let sql = session.dialect().add_sql_hint_or_comment(
            select.sql(),
            options.comment.as_deref(),
            &options.database_hints,
            session.settings().comments_enabled,
        );
        let query_identifier = context.query_identifier(&sql).to_string();
        let started = Instant::now();

        let values = self.resolve_values(select, bindings, &context, &sql, statement_creator, consumer)?;
        let cache_hit = values.is_cache_hit();
        let transformer = row_transformer
            .or_else(|| {
                options
                    .tuple_transformer
                    .clone()
                    .map(|t| Arc::new(TupleTransformerAdapter::new(t)) as Arc<dyn RowTransformer>)
            })
            .unwrap_or_else(|| Arc::new(StandardRowTransformer) as Arc<dyn RowTransformer>);

        let actions = select.actions();
        let mut statement_access = StatementAccess::new(session);
        let mut memo = ActionMemo::new();
        let result = actions
            .perform_pre_actions(&mut statement_access, &mut memo, &context)
            .and_then(|()| Self::consume(select, values, transformer, &context, consumer));

        let post = actions.perform_post_actions(result.is_ok(), &mut statement_access, &mut memo, &context);
        let released = statement_access.release();
        let output = combine(combine(result, post), released)?;

        let statistics = session.factory().statistics();
        if !cache_hit && statistics.is_statistics_enabled() {
            let rows = consumer.result_size(&output).unwrap_or(0);
            statistics.query_executed(&query_identifier, rows, started.elapsed().as_millis() as u64);
        }
        Ok(output)
    }

    /// Resolve the row mapping against the executed statement and let the
    /// consumer read the rows
    fn consume<'a, C>(
        select: &JdbcSelect,
        mut values: Box<dyn JdbcValues + 'a>,
        transformer: Arc<dyn RowTransformer>,
        context: &ExecutionContext<'a>,
        consumer: &C,
    ) -> ExecResult<C::Output>
    where
        C: ResultsConsumer<'a>,
    {
        let metadata = values.metadata()?.clone();
        let mapping = select.mapping_producer().resolve(&metadata)?;
        values.use_column_types(mapping.column_types());
        let reader = RowReader::new(mapping, transformer);
        consumer.consume(values, reader, RowProcessingState::new(context))
    }

    fn resolve_values<'a, C>(
        &self,
        select: &JdbcSelect,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'a>,
        sql: &str,
        statement_creator: Arc<dyn StatementCreator>,
        consumer: &C,
    ) -> ExecResult<Box<dyn JdbcValues + 'a>>
    where
        C: ResultsConsumer<'a>,
    {
        let session = context.session();
        let options = context.query_options();
        let cacheable = session.settings().query_cache_enabled
            && options.is_result_caching_enabled()
            && consumer.can_result_be_cached();

        let mut put_manager = None;
        if cacheable {
            let cache = session.factory().query_results_cache();
            let statistics = session.factory().statistics();
            let key = QueryKey::new(sql, &options.limit, key_values(select.parameter_binders(), bindings, context));
            let query_identifier = context.query_identifier(sql);
            if options.cache_mode.is_get_enabled() {
                let spaces: Vec<String> = select.affected_table_names().iter().cloned().collect();
                match cache.get(&key, &spaces)? {
                    Some(results) => {
                        trace!("Serving {} cached rows for: {}", results.rows.len(), sql);
                        if statistics.is_statistics_enabled() {
                            statistics.query_cache_hit(query_identifier, cache.region_name());
                        }
                        return Ok(Box::new(CachedJdbcValues::new(results)));
                    }
                    None => {
                        trace!("Result cache miss for: {}", sql);
                        if statistics.is_statistics_enabled() {
                            statistics.query_cache_miss(query_identifier, cache.region_name());
                        }
                    }
                }
            }
            if options.cache_mode.is_put_enabled() {
                put_manager = Some(QueryCachePutManager::new(key, query_identifier));
            }
        }

        debug!("Executing select: {}", sql);
        let max_rows = rows_to_fetch(select.max_rows(), select.rows_to_skip());
        let access = DeferredResultSetAccess::new(
            context.clone(),
            sql.to_string(),
            select.parameter_binders().to_vec(),
            bindings.clone(),
            statement_creator,
            consumer.scroll_mode(),
        )
        .with_max_rows(max_rows);
        Ok(Box::new(ResultSetJdbcValues::new(access, select.rows_to_skip(), put_manager)))
    }

    /// Execute with the standard statement creator and collect every
    /// result
    pub fn list<'a, T: FromDomainValue>(
        &self,
        select: &JdbcSelect,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'a>,
        semantic: UniqueSemantic,
    ) -> ExecResult<Vec<T>> {
        let consumer = ListResultsConsumer::new(semantic);
        self.execute_query(select, bindings, context, None, Arc::new(StandardStatementCreator), &consumer)
    }

    /// Execute and read only the first result
    pub fn first<'a, T: FromDomainValue>(
        &self,
        select: &JdbcSelect,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'a>,
    ) -> ExecResult<Option<T>> {
        let consumer = SingleResultConsumer::new();
        self.execute_query(select, bindings, context, None, Arc::new(StandardStatementCreator), &consumer)
    }

    /// Execute and fail when more than one distinct result is returned
    pub fn unique<'a, T: FromDomainValue>(
        &self,
        select: &JdbcSelect,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'a>,
    ) -> ExecResult<Option<T>> {
        let consumer = SingleResultConsumer::unique();
        self.execute_query(select, bindings, context, None, Arc::new(StandardStatementCreator), &consumer)
    }

    /// Execute and return a cursor over the results
    pub fn scroll<'a, T: FromDomainValue>(
        &self,
        select: &JdbcSelect,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'a>,
    ) -> ExecResult<ScrollableResults<'a, T>> {
        let consumer = ScrollableResultsConsumer::new();
        self.execute_query(select, bindings, context, None, Arc::new(StandardStatementCreator), &consumer)
    }
}

/// Driver row cap covering the rows skipped client side
fn rows_to_fetch(max_rows: Option<u32>, rows_to_skip: usize) -> Option<u32> {
    let skipped = u32::try_from(rows_to_skip).unwrap_or(u32::MAX);
    max_rows.map(|rows| rows.saturating_add(skipped))
}

/// Keep the first failure; later failures are attached as suppressed
pub(crate) fn combine<T>(result: ExecResult<T>, cleanup: ExecResult<()>) -> ExecResult<T> {
    match (result, cleanup) {
        (Ok(output), Ok(())) => Ok(output),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(suppressed)) => Err(e.with_suppressed(suppressed)),
    }
}

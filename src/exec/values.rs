// Row Sources
//
// A select's rows come either from a live result set or from the result
// cache. The live source defers preparing and executing its statement until
// rows or metadata are first requested, releases the statement exactly
// once, and captures the rows it reads so a fully read result can be
// written to the cache.

use std::fmt;
use std::sync::Arc;

use log::{trace, warn};

use crate::cache::{CachedResults, QueryKey};
use crate::common::types::DataValue;
use crate::exec::binder::{bind_parameters, ParameterBinder};
use crate::exec::context::ExecutionContext;
use crate::exec::error::{ExecError, ExecResult};
use crate::exec::parameter::JdbcParameterBindings;
use crate::exec::select::combine;
use crate::exec::statement::StatementCreator;
use crate::jdbc::{PreparedStatement, ResultSet, ResultSetMetadata, ScrollMode, SqlError, SqlResult, SqlType};

/// Source of the raw rows of one select
pub trait JdbcValues {
    /// Advance to the next row; false once the rows are exhausted
    fn next(&mut self) -> ExecResult<bool>;

    /// Values of the current row; empty before the first row
    fn current_row(&self) -> &[DataValue];

    /// Column metadata; a live source executes its statement to obtain it
    fn metadata(&mut self) -> ExecResult<&ResultSetMetadata>;

    /// Read columns with these types instead of the metadata's
    fn use_column_types(&mut self, _types: &[SqlType]) {}

    fn is_cache_hit(&self) -> bool {
        false
    }

    /// Release the underlying resources. Safe to call more than once.
    fn finish_up(&mut self) -> ExecResult<()>;
}

/// Prepares, binds and executes a select on first use
pub struct DeferredResultSetAccess<'a> {
    context: ExecutionContext<'a>,
    sql: String,
    binders: Vec<Arc<dyn ParameterBinder>>,
    bindings: JdbcParameterBindings,
    statement_creator: Arc<dyn StatementCreator>,
    scroll_mode: ScrollMode,
    max_rows: Option<u32>,
    statement: Option<Box<dyn PreparedStatement>>,
    result_set: Option<Box<dyn ResultSet>>,
    metadata: Option<ResultSetMetadata>,
}

impl<'a> DeferredResultSetAccess<'a> {
    pub fn new(
        context: ExecutionContext<'a>,
        sql: String,
        binders: Vec<Arc<dyn ParameterBinder>>,
        bindings: JdbcParameterBindings,
        statement_creator: Arc<dyn StatementCreator>,
        scroll_mode: ScrollMode,
    ) -> Self {
        Self {
            context,
            sql,
            binders,
            bindings,
            statement_creator,
            scroll_mode,
            max_rows: None,
            statement: None,
            result_set: None,
            metadata: None,
        }
    }

    /// Limit the rows the statement returns
    pub fn with_max_rows(mut self, max_rows: Option<u32>) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_executed(&self) -> bool {
        self.result_set.is_some()
    }

    fn convert(&self, err: SqlError, message: &str) -> ExecError {
        self.context
            .session()
            .factory()
            .sql_exception_helper()
            .convert(err, message, &self.sql)
    }

    fn execute(&mut self) -> ExecResult<()> {
        let session = self.context.session();
        let statement = self
            .statement_creator
            .create_statement(session, &self.sql, self.scroll_mode)?;
        self.statement = Some(statement);
        let options = self.context.query_options();
        let fetch_size = options.fetch_size.or(session.settings().default_fetch_size);
        let (timeout, max_rows) = (options.timeout, self.max_rows);

        let statement = match self.statement.as_mut() {
            Some(statement) => statement,
            None => return Err(ExecError::Execution("Statement was not prepared".to_string())),
        };
        let configured: SqlResult<()> = (|| {
            if let Some(seconds) = timeout {
                statement.set_query_timeout(seconds)?;
            }
            if let Some(rows) = fetch_size {
                statement.set_fetch_size(rows)?;
            }
            if let Some(rows) = max_rows {
                statement.set_max_rows(rows)?;
            }
            Ok(())
        })();
        if let Err(e) = configured {
            let helper = session.factory().sql_exception_helper();
            return Err(helper.convert(e, "could not configure statement", &self.sql));
        }

        bind_parameters(&self.binders, statement.as_mut(), &self.bindings, &self.context)?;
        let executed = statement.execute_query();
        let mut result_set = executed.map_err(|e| self.convert(e, "could not execute query"))?;
        match result_set.metadata() {
            Ok(metadata) => {
                self.result_set = Some(result_set);
                self.metadata = Some(metadata);
                Ok(())
            }
            Err(e) => {
                let primary = self.convert(e, "could not read result set metadata");
                let closed = result_set.close().map_err(|e| {
                    warn!("Unable to close result set of {}: {}", self.sql, e);
                    self.convert(e, "could not close result set")
                });
                combine(Err(primary), closed)
            }
        }
    }

    fn ensure_executed(&mut self) -> ExecResult<()> {
        if self.result_set.is_none() {
            if self.statement.is_some() {
                return Err(ExecError::Execution(format!("Select already failed or was released: {}", self.sql)));
            }
            self.execute()?;
        }
        Ok(())
    }

    pub fn metadata(&mut self) -> ExecResult<&ResultSetMetadata> {
        self.ensure_executed()?;
        self.metadata
            .as_ref()
            .ok_or_else(|| ExecError::Execution("Result set metadata is unavailable".to_string()))
    }

    /// Advance the result set and read every column of the new row
    pub fn read_next(&mut self, column_types: &[SqlType]) -> ExecResult<Option<Vec<DataValue>>> {
        self.ensure_executed()?;
        let result_set = match self.result_set.as_mut() {
            Some(result_set) => result_set,
            None => return Ok(None),
        };
        let read: SqlResult<Option<Vec<DataValue>>> = (|| {
            if !result_set.next()? {
                return Ok(None);
            }
            let mut row = Vec::with_capacity(column_types.len());
            for (index, sql_type) in column_types.iter().enumerate() {
                row.push(result_set.get_value(index + 1, *sql_type)?);
            }
            Ok(Some(row))
        })();
        read.map_err(|e| self.convert(e, "could not read result set"))
    }

    /// Close the result set and release the statement. Only the first call
    /// does anything.
    pub fn release(&mut self) -> ExecResult<()> {
        let statement = match self.statement.take() {
            Some(statement) => statement,
            None => return Ok(()),
        };
        let coordinator = self.context.session().jdbc_coordinator();
        let closed = match self.result_set.take() {
            Some(result_set) => coordinator.release_result_set(result_set),
            None => Ok(()),
        };
        let released = coordinator.release(statement);
        coordinator.after_statement_execution();
        match closed.and(released) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.convert(e, "could not release statement")),
        }
    }
}

impl Drop for DeferredResultSetAccess<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Unable to release select statement: {}", e);
        }
    }
}

impl fmt::Debug for DeferredResultSetAccess<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredResultSetAccess")
            .field("sql", &self.sql)
            .field("scroll_mode", &self.scroll_mode)
            .field("executed", &self.result_set.is_some())
            .finish()
    }
}

/// Rows collected for the result cache while a live result is read
#[derive(Debug)]
pub struct QueryCachePutManager {
    key: QueryKey,
    query_identifier: String,
    rows: Vec<Vec<DataValue>>,
}

impl QueryCachePutManager {
    pub fn new(key: QueryKey, query_identifier: impl Into<String>) -> Self {
        Self {
            key,
            query_identifier: query_identifier.into(),
            rows: Vec::new(),
        }
    }
}

/// Rows read from a live result set
pub struct ResultSetJdbcValues<'a> {
    access: DeferredResultSetAccess<'a>,
    rows_to_skip: usize,
    skipped: bool,
    column_types: Option<Vec<SqlType>>,
    current: Vec<DataValue>,
    put_manager: Option<QueryCachePutManager>,
    exhausted: bool,
    finished: bool,
}

impl<'a> ResultSetJdbcValues<'a> {
    pub fn new(access: DeferredResultSetAccess<'a>, rows_to_skip: usize, put_manager: Option<QueryCachePutManager>) -> Self {
        Self {
            access,
            rows_to_skip,
            skipped: false,
            column_types: None,
            current: Vec::new(),
            put_manager,
            exhausted: false,
            finished: false,
        }
    }

    fn column_types(&mut self) -> ExecResult<Vec<SqlType>> {
        if let Some(types) = &self.column_types {
            return Ok(types.clone());
        }
        let types: Vec<SqlType> = self.access.metadata()?.columns().iter().map(|c| c.sql_type).collect();
        self.column_types = Some(types.clone());
        Ok(types)
    }

    fn write_to_cache(&mut self) -> ExecResult<()> {
        let manager = match self.put_manager.take() {
            Some(manager) => manager,
            None => return Ok(()),
        };
        if !self.exhausted {
            trace!("Result was not fully read; skipping result cache put");
            return Ok(());
        }
        let session = self.access.context.session();
        let metadata = match &self.access.metadata {
            Some(metadata) => metadata.clone(),
            None => return Ok(()),
        };
        let cache = session.factory().query_results_cache();
        let results = CachedResults {
            metadata,
            rows: manager.rows,
        };
        if cache.put(manager.key, &results)? {
            let statistics = session.factory().statistics();
            if statistics.is_statistics_enabled() {
                statistics.query_cache_put(&manager.query_identifier, cache.region_name());
            }
        }
        Ok(())
    }
}

impl JdbcValues for ResultSetJdbcValues<'_> {
    fn next(&mut self) -> ExecResult<bool> {
        if self.finished || self.exhausted {
            return Ok(false);
        }
        let types = self.column_types()?;
        if !self.skipped {
            self.skipped = true;
            for _ in 0..self.rows_to_skip {
                if self.access.read_next(&types)?.is_none() {
                    self.exhausted = true;
                    return Ok(false);
                }
            }
        }
        match self.access.read_next(&types)? {
            Some(row) => {
                if let Some(manager) = self.put_manager.as_mut() {
                    manager.rows.push(row.clone());
                }
                self.current = row;
                Ok(true)
            }
            None => {
                self.exhausted = true;
                self.current.clear();
                Ok(false)
            }
        }
    }

    fn current_row(&self) -> &[DataValue] {
        &self.current
    }

    fn metadata(&mut self) -> ExecResult<&ResultSetMetadata> {
        self.access.metadata()
    }

    fn use_column_types(&mut self, types: &[SqlType]) {
        self.column_types = Some(types.to_vec());
    }

    fn finish_up(&mut self) -> ExecResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let released = self.access.release();
        let cached = self.write_to_cache();
        match (released, cached) {
            (Err(e), Err(c)) => Err(e.with_suppressed(c)),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

/// Rows served from the result cache
#[derive(Debug)]
pub struct CachedJdbcValues {
    metadata: ResultSetMetadata,
    rows: Vec<Vec<DataValue>>,
    position: usize,
}

impl CachedJdbcValues {
    pub fn new(results: CachedResults) -> Self {
        Self {
            metadata: results.metadata,
            rows: results.rows,
            position: 0,
        }
    }
}

impl JdbcValues for CachedJdbcValues {
    fn next(&mut self) -> ExecResult<bool> {
        if self.position < self.rows.len() {
            self.position += 1;
            Ok(true)
        } else {
            self.position = self.rows.len() + 1;
            Ok(false)
        }
    }

    fn current_row(&self) -> &[DataValue] {
        match self.position.checked_sub(1).and_then(|index| self.rows.get(index)) {
            Some(row) => row,
            None => &[],
        }
    }

    fn metadata(&mut self) -> ExecResult<&ResultSetMetadata> {
        Ok(&self.metadata)
    }

    fn is_cache_hit(&self) -> bool {
        true
    }

    fn finish_up(&mut self) -> ExecResult<()> {
        Ok(())
    }
}

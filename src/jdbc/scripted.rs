// Scripted Driver
//
// An in-memory driver whose responses are scripted per SQL text. Every
// prepared, bound and executed statement is recorded so callers can assert
// on binding positions, statement settings and resource release.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::DataValue;
use crate::jdbc::{
    CallableStatement, ColumnMetadata, Connection, PreparedStatement, ResultSet, ResultSetMetadata,
    ScrollMode, SqlError, SqlResult, SqlType, Statement,
};

/// Rows returned by a scripted query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptedRows {
    metadata: ResultSetMetadata,
    rows: Vec<Vec<DataValue>>,
}

impl ScriptedRows {
    pub fn new(columns: &[(&str, SqlType)]) -> Self {
        let columns = columns
            .iter()
            .map(|(label, sql_type)| ColumnMetadata::new(*label, *sql_type))
            .collect();
        Self {
            metadata: ResultSetMetadata::new(columns),
            rows: Vec::new(),
        }
    }

    /// Append a row
    pub fn row(mut self, values: Vec<DataValue>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Where a parameter was bound: by position or by name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParameterKey {
    Position(usize),
    Name(String),
}

/// Outcome of a scripted stored-procedure call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptedCall {
    pub out_values: Vec<(ParameterKey, DataValue)>,
    pub ref_cursors: Vec<(ParameterKey, ScriptedRows)>,
    pub result: Option<ScriptedRows>,
    pub update_count: Option<u64>,
}

/// A scripted driver response
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedResponse {
    Rows(ScriptedRows),
    UpdateCount(u64),
    Call(ScriptedCall),
    Failure(SqlError),
}

type Responder = Arc<dyn Fn(&[DataValue]) -> ScriptedResponse + Send + Sync>;

enum Script {
    Fixed(ScriptedResponse),
    Dynamic(Responder),
}

/// A parameter value as the driver received it
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub key: ParameterKey,
    pub value: DataValue,
    pub sql_type: SqlType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    Query,
    Update,
    Call,
    Plain,
}

/// One statement execution as seen by the driver
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub sql: String,
    pub kind: ExecutionKind,
    pub parameters: Vec<BoundParameter>,
    pub out_parameters: Vec<(ParameterKey, SqlType)>,
    pub query_timeout: Option<u32>,
    pub fetch_size: Option<u32>,
    pub max_rows: Option<u32>,
    pub scroll_mode: ScrollMode,
}

impl ExecutionRecord {
    /// Value bound at the 1-based position
    pub fn value_at(&self, position: usize) -> Option<&DataValue> {
        self.parameters
            .iter()
            .find(|p| p.key == ParameterKey::Position(position))
            .map(|p| &p.value)
    }

    /// Value bound under the parameter name
    pub fn named_value(&self, name: &str) -> Option<&DataValue> {
        self.parameters
            .iter()
            .find(|p| matches!(&p.key, ParameterKey::Name(n) if n == name))
            .map(|p| &p.value)
    }

    /// Positional values ordered by position
    pub fn positional_values(&self) -> Vec<DataValue> {
        let mut positional: Vec<(usize, &DataValue)> = self
            .parameters
            .iter()
            .filter_map(|p| match p.key {
                ParameterKey::Position(pos) => Some((pos, &p.value)),
                ParameterKey::Name(_) => None,
            })
            .collect();
        positional.sort_by_key(|(pos, _)| *pos);
        positional.into_iter().map(|(_, v)| v.clone()).collect()
    }
}

#[derive(Default)]
struct DriverState {
    scripts: HashMap<String, Script>,
    pending_failures: HashMap<String, VecDeque<SqlError>>,
    executions: Vec<ExecutionRecord>,
    open_statements: usize,
    open_result_sets: usize,
    statements_prepared: usize,
    close_failure: Option<SqlError>,
    metadata_failure: Option<SqlError>,
    result_set_close_failure: Option<SqlError>,
}

impl DriverState {
    fn respond(&mut self, sql: &str, parameters: &[DataValue]) -> SqlResult<ScriptedResponse> {
        let key = normalize(sql);
        if let Some(queue) = self.pending_failures.get_mut(&key) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        match self.scripts.get(&key) {
            Some(Script::Fixed(ScriptedResponse::Failure(err))) => Err(err.clone()),
            Some(Script::Fixed(response)) => Ok(response.clone()),
            Some(Script::Dynamic(responder)) => match responder(parameters) {
                ScriptedResponse::Failure(err) => Err(err),
                response => Ok(response),
            },
            None => Err(SqlError::with_state(format!("No scripted response for: {}", sql), "HY000", 0)),
        }
    }

    fn release_statement(&mut self) -> SqlResult<()> {
        self.open_statements = self.open_statements.saturating_sub(1);
        match &self.close_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Handle used to script responses and inspect what the driver saw
#[derive(Clone, Default)]
pub struct ScriptedDriver {
    state: Arc<Mutex<DriverState>>,
}

impl fmt::Debug for ScriptedDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScriptedDriver")
            .field("scripts", &state.scripts.len())
            .field("executions", &state.executions.len())
            .field("open_statements", &state.open_statements)
            .finish()
    }
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection sharing this driver's scripts and records
    pub fn connect(&self) -> ScriptedConnection {
        ScriptedConnection {
            state: self.state.clone(),
        }
    }

    pub fn script_rows(&self, sql: &str, rows: ScriptedRows) {
        self.script(sql, ScriptedResponse::Rows(rows));
    }

    pub fn script_update(&self, sql: &str, count: u64) {
        self.script(sql, ScriptedResponse::UpdateCount(count));
    }

    pub fn script_call(&self, sql: &str, call: ScriptedCall) {
        self.script(sql, ScriptedResponse::Call(call));
    }

    pub fn script_failure(&self, sql: &str, err: SqlError) {
        self.script(sql, ScriptedResponse::Failure(err));
    }

    pub fn script(&self, sql: &str, response: ScriptedResponse) {
        self.state.lock().scripts.insert(normalize(sql), Script::Fixed(response));
    }

    /// Respond based on the positional values bound for the execution
    pub fn script_dynamic<F>(&self, sql: &str, responder: F)
    where
        F: Fn(&[DataValue]) -> ScriptedResponse + Send + Sync + 'static,
    {
        self.state
            .lock()
            .scripts
            .insert(normalize(sql), Script::Dynamic(Arc::new(responder)));
    }

    /// Fail the next execution of `sql` only
    pub fn fail_next(&self, sql: &str, err: SqlError) {
        self.state
            .lock()
            .pending_failures
            .entry(normalize(sql))
            .or_default()
            .push_back(err);
    }

    /// Make every statement close fail with `err`
    pub fn fail_statement_close(&self, err: SqlError) {
        self.state.lock().close_failure = Some(err);
    }

    /// Make reading result set metadata fail with `err`
    pub fn fail_result_set_metadata(&self, err: SqlError) {
        self.state.lock().metadata_failure = Some(err);
    }

    /// Make every result set close fail with `err`
    pub fn fail_result_set_close(&self, err: SqlError) {
        self.state.lock().result_set_close_failure = Some(err);
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.state.lock().executions.clone()
    }

    /// Executions whose SQL text matches `sql`
    pub fn executions_of(&self, sql: &str) -> Vec<ExecutionRecord> {
        let key = normalize(sql);
        self.state
            .lock()
            .executions
            .iter()
            .filter(|e| normalize(&e.sql) == key)
            .cloned()
            .collect()
    }

    pub fn execution_count(&self, sql: &str) -> usize {
        self.executions_of(sql).len()
    }

    /// SQL text of every execution, in order
    pub fn executed_sql(&self) -> Vec<String> {
        self.state.lock().executions.iter().map(|e| e.sql.clone()).collect()
    }

    pub fn clear_executions(&self) {
        self.state.lock().executions.clear();
    }

    pub fn open_statement_count(&self) -> usize {
        self.state.lock().open_statements
    }

    pub fn open_result_set_count(&self) -> usize {
        self.state.lock().open_result_sets
    }

    pub fn statements_prepared(&self) -> usize {
        self.state.lock().statements_prepared
    }
}

/// A connection of the scripted driver
pub struct ScriptedConnection {
    state: Arc<Mutex<DriverState>>,
}

impl ScriptedConnection {
    fn new_prepared(&self, sql: &str, scroll_mode: ScrollMode) -> ScriptedPreparedStatement {
        let mut state = self.state.lock();
        state.open_statements += 1;
        state.statements_prepared += 1;
        ScriptedPreparedStatement {
            state: self.state.clone(),
            sql: sql.to_string(),
            scroll_mode,
            parameters: Vec::new(),
            query_timeout: None,
            fetch_size: None,
            max_rows: None,
            closed: false,
        }
    }
}

impl Connection for ScriptedConnection {
    fn prepare_statement(&mut self, sql: &str, scroll_mode: ScrollMode) -> SqlResult<Box<dyn PreparedStatement>> {
        Ok(Box::new(self.new_prepared(sql, scroll_mode)))
    }

    fn prepare_call(&mut self, sql: &str) -> SqlResult<Box<dyn CallableStatement>> {
        Ok(Box::new(ScriptedCallableStatement {
            inner: self.new_prepared(sql, ScrollMode::ForwardOnly),
            out_parameters: Vec::new(),
            outcome: None,
        }))
    }

    fn create_statement(&mut self) -> SqlResult<Box<dyn Statement>> {
        self.state.lock().open_statements += 1;
        Ok(Box::new(ScriptedStatement {
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct ScriptedStatement {
    state: Arc<Mutex<DriverState>>,
    closed: bool,
}

impl ScriptedStatement {
    fn run(&mut self, sql: &str) -> SqlResult<ScriptedResponse> {
        if self.closed {
            return Err(SqlError::with_state("Statement is closed", "HY010", 0));
        }
        let mut state = self.state.lock();
        state.executions.push(ExecutionRecord {
            sql: sql.to_string(),
            kind: ExecutionKind::Plain,
            parameters: Vec::new(),
            out_parameters: Vec::new(),
            query_timeout: None,
            fetch_size: None,
            max_rows: None,
            scroll_mode: ScrollMode::ForwardOnly,
        });
        state.respond(sql, &[])
    }
}

impl Statement for ScriptedStatement {
    fn execute_query(&mut self, sql: &str) -> SqlResult<Box<dyn ResultSet>> {
        match self.run(sql)? {
            ScriptedResponse::Rows(rows) => Ok(Box::new(ScriptedResultSet::open(self.state.clone(), rows))),
            _ => Err(SqlError::with_state("Statement did not return a result set", "HY000", 0)),
        }
    }

    fn execute_update(&mut self, sql: &str) -> SqlResult<u64> {
        match self.run(sql)? {
            ScriptedResponse::UpdateCount(count) => Ok(count),
            _ => Err(SqlError::with_state("Statement did not return an update count", "HY000", 0)),
        }
    }

    fn close(&mut self) -> SqlResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.state.lock().release_statement()
    }
}

struct ScriptedPreparedStatement {
    state: Arc<Mutex<DriverState>>,
    sql: String,
    scroll_mode: ScrollMode,
    parameters: Vec<BoundParameter>,
    query_timeout: Option<u32>,
    fetch_size: Option<u32>,
    max_rows: Option<u32>,
    closed: bool,
}

impl ScriptedPreparedStatement {
    fn check_open(&self) -> SqlResult<()> {
        if self.closed {
            return Err(SqlError::with_state("Statement is closed", "HY010", 0));
        }
        Ok(())
    }

    fn bind(&mut self, key: ParameterKey, value: DataValue, sql_type: SqlType) -> SqlResult<()> {
        self.check_open()?;
        if key == ParameterKey::Position(0) {
            return Err(SqlError::with_state("Parameter positions start at 1", "07009", 0));
        }
        self.parameters.retain(|p| p.key != key);
        self.parameters.push(BoundParameter { key, value, sql_type });
        Ok(())
    }

    fn record(&self, kind: ExecutionKind, out_parameters: Vec<(ParameterKey, SqlType)>) -> ExecutionRecord {
        ExecutionRecord {
            sql: self.sql.clone(),
            kind,
            parameters: self.parameters.clone(),
            out_parameters,
            query_timeout: self.query_timeout,
            fetch_size: self.fetch_size,
            max_rows: self.max_rows,
            scroll_mode: self.scroll_mode,
        }
    }

    fn execute(&mut self, kind: ExecutionKind, out_parameters: Vec<(ParameterKey, SqlType)>) -> SqlResult<ScriptedResponse> {
        self.check_open()?;
        let record = self.record(kind, out_parameters);
        let positional = record.positional_values();
        let mut state = self.state.lock();
        state.executions.push(record);
        state.respond(&self.sql, &positional)
    }
}

impl PreparedStatement for ScriptedPreparedStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn set_value(&mut self, position: usize, value: &DataValue, sql_type: SqlType) -> SqlResult<()> {
        self.bind(ParameterKey::Position(position), value.clone(), sql_type)
    }

    fn set_null(&mut self, position: usize, sql_type: SqlType) -> SqlResult<()> {
        self.bind(ParameterKey::Position(position), DataValue::Null, sql_type)
    }

    fn set_query_timeout(&mut self, seconds: u32) -> SqlResult<()> {
        self.check_open()?;
        self.query_timeout = Some(seconds);
        Ok(())
    }

    fn set_fetch_size(&mut self, rows: u32) -> SqlResult<()> {
        self.check_open()?;
        self.fetch_size = Some(rows);
        Ok(())
    }

    fn set_max_rows(&mut self, rows: u32) -> SqlResult<()> {
        self.check_open()?;
        self.max_rows = Some(rows);
        Ok(())
    }

    fn execute_query(&mut self) -> SqlResult<Box<dyn ResultSet>> {
        match self.execute(ExecutionKind::Query, Vec::new())? {
            ScriptedResponse::Rows(mut rows) => {
                if let Some(max) = self.max_rows.filter(|m| *m > 0) {
                    rows.rows.truncate(max as usize);
                }
                Ok(Box::new(ScriptedResultSet::open(self.state.clone(), rows)))
            }
            _ => Err(SqlError::with_state("Statement did not return a result set", "HY000", 0)),
        }
    }

    fn execute_update(&mut self) -> SqlResult<u64> {
        match self.execute(ExecutionKind::Update, Vec::new())? {
            ScriptedResponse::UpdateCount(count) => Ok(count),
            _ => Err(SqlError::with_state("Statement did not return an update count", "HY000", 0)),
        }
    }

    fn close(&mut self) -> SqlResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.state.lock().release_statement()
    }
}

struct ScriptedCallableStatement {
    inner: ScriptedPreparedStatement,
    out_parameters: Vec<(ParameterKey, SqlType)>,
    outcome: Option<ScriptedCall>,
}

impl ScriptedCallableStatement {
    fn outcome(&self) -> SqlResult<&ScriptedCall> {
        self.outcome
            .as_ref()
            .ok_or_else(|| SqlError::with_state("Call has not been executed", "HY010", 0))
    }

    fn out_value(&self, key: ParameterKey) -> SqlResult<DataValue> {
        if !self.out_parameters.iter().any(|(k, _)| *k == key) {
            return Err(SqlError::with_state(format!("{:?} is not registered as an OUT parameter", key), "07009", 0));
        }
        Ok(self
            .outcome()?
            .out_values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or(DataValue::Null))
    }

    fn ref_cursor(&mut self, key: ParameterKey) -> SqlResult<Box<dyn ResultSet>> {
        let rows = self
            .outcome()?
            .ref_cursors
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, rows)| rows.clone())
            .ok_or_else(|| SqlError::with_state(format!("No cursor returned for {:?}", key), "07009", 0))?;
        Ok(Box::new(ScriptedResultSet::open(self.inner.state.clone(), rows)))
    }
}

impl CallableStatement for ScriptedCallableStatement {
    fn as_prepared(&mut self) -> &mut dyn PreparedStatement {
        &mut self.inner
    }

    fn set_named_value(&mut self, name: &str, value: &DataValue, sql_type: SqlType) -> SqlResult<()> {
        self.inner.bind(ParameterKey::Name(name.to_string()), value.clone(), sql_type)
    }

    fn set_named_null(&mut self, name: &str, sql_type: SqlType) -> SqlResult<()> {
        self.inner.bind(ParameterKey::Name(name.to_string()), DataValue::Null, sql_type)
    }

    fn register_out_parameter(&mut self, position: usize, sql_type: SqlType) -> SqlResult<()> {
        self.inner.check_open()?;
        self.out_parameters.push((ParameterKey::Position(position), sql_type));
        Ok(())
    }

    fn register_named_out_parameter(&mut self, name: &str, sql_type: SqlType) -> SqlResult<()> {
        self.inner.check_open()?;
        self.out_parameters.push((ParameterKey::Name(name.to_string()), sql_type));
        Ok(())
    }

    fn get_out_value(&mut self, position: usize, _sql_type: SqlType) -> SqlResult<DataValue> {
        self.out_value(ParameterKey::Position(position))
    }

    fn get_named_out_value(&mut self, name: &str, _sql_type: SqlType) -> SqlResult<DataValue> {
        self.out_value(ParameterKey::Name(name.to_string()))
    }

    fn get_ref_cursor(&mut self, position: usize) -> SqlResult<Box<dyn ResultSet>> {
        self.ref_cursor(ParameterKey::Position(position))
    }

    fn get_named_ref_cursor(&mut self, name: &str) -> SqlResult<Box<dyn ResultSet>> {
        self.ref_cursor(ParameterKey::Name(name.to_string()))
    }

    fn execute(&mut self) -> SqlResult<bool> {
        let outs = self.out_parameters.clone();
        match self.inner.execute(ExecutionKind::Call, outs)? {
            ScriptedResponse::Call(call) => {
                let has_result = call.result.is_some();
                self.outcome = Some(call);
                Ok(has_result)
            }
            ScriptedResponse::Rows(rows) => {
                self.outcome = Some(ScriptedCall {
                    result: Some(rows),
                    ..ScriptedCall::default()
                });
                Ok(true)
            }
            ScriptedResponse::UpdateCount(count) => {
                self.outcome = Some(ScriptedCall {
                    update_count: Some(count),
                    ..ScriptedCall::default()
                });
                Ok(false)
            }
            ScriptedResponse::Failure(err) => Err(err),
        }
    }

    fn result_set(&mut self) -> SqlResult<Option<Box<dyn ResultSet>>> {
        let rows = match self.outcome.as_mut() {
            Some(outcome) => outcome.result.take(),
            None => return Err(SqlError::with_state("Call has not been executed", "HY010", 0)),
        };
        Ok(rows.map(|rows| Box::new(ScriptedResultSet::open(self.inner.state.clone(), rows)) as Box<dyn ResultSet>))
    }

    fn update_count(&mut self) -> SqlResult<Option<u64>> {
        Ok(self.outcome()?.update_count)
    }

    fn close(&mut self) -> SqlResult<()> {
        self.inner.close()
    }
}

struct ScriptedResultSet {
    state: Arc<Mutex<DriverState>>,
    metadata: ResultSetMetadata,
    rows: VecDeque<Vec<DataValue>>,
    current: Option<Vec<DataValue>>,
    closed: bool,
}

impl ScriptedResultSet {
    fn open(state: Arc<Mutex<DriverState>>, rows: ScriptedRows) -> Self {
        state.lock().open_result_sets += 1;
        Self {
            state,
            metadata: rows.metadata,
            rows: rows.rows.into(),
            current: None,
            closed: false,
        }
    }
}

impl ResultSet for ScriptedResultSet {
    fn next(&mut self) -> SqlResult<bool> {
        if self.closed {
            return Err(SqlError::with_state("Result set is closed", "HY010", 0));
        }
        self.current = self.rows.pop_front();
        Ok(self.current.is_some())
    }

    fn get_value(&mut self, column: usize, _sql_type: SqlType) -> SqlResult<DataValue> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| SqlError::with_state("No current row", "24000", 0))?;
        if column == 0 || column > row.len() {
            return Err(SqlError::with_state(format!("Invalid column index {}", column), "07009", 0));
        }
        Ok(row[column - 1].clone())
    }

    fn metadata(&self) -> SqlResult<ResultSetMetadata> {
        match &self.state.lock().metadata_failure {
            Some(err) => Err(err.clone()),
            None => Ok(self.metadata.clone()),
        }
    }

    fn close(&mut self) -> SqlResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.state.lock();
        state.open_result_sets = state.open_result_sets.saturating_sub(1);
        match &state.result_set_close_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

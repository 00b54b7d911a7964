// Call Executor
//
// Executes stored procedure and function calls. IN and INOUT values are
// bound by name when the driver allows it and every parameter is named,
// otherwise by position after the function return slot. OUT values,
// REF_CURSOR results, a returned result set and the update count are
// collected into CallOutputs.

use std::collections::BTreeSet;
use std::fmt;

use linked_hash_map::LinkedHashMap;
use log::{debug, trace};

use crate::common::config::MissingBindingPolicy;
use crate::common::types::DataValue;
use crate::exec::binder::{resolve_bind_type, write_value};
use crate::exec::context::ExecutionContext;
use crate::exec::error::{ExecError, ExecResult};
use crate::exec::parameter::{JdbcParameter, JdbcParameterBindings};
use crate::exec::select::combine;
use crate::jdbc::{CallableStatement, ResultSet, ResultSetMetadata, SqlError, SqlResult, SqlType};
use crate::mapping::jdbc_mapping::JdbcMapping;
use crate::session::SessionContext;

/// Direction of a call parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterMode {
    In,
    InOut,
    Out,
    RefCursor,
}

impl ParameterMode {
    pub fn is_input(&self) -> bool {
        matches!(self, ParameterMode::In | ParameterMode::InOut)
    }

    pub fn is_output(&self) -> bool {
        !matches!(self, ParameterMode::In)
    }
}

/// One parameter of a call
#[derive(Debug, Clone)]
pub struct JdbcCallParameterRegistration {
    name: Option<String>,
    mode: ParameterMode,
    mapping: Option<JdbcMapping>,
    parameter: Option<JdbcParameter>,
}

impl JdbcCallParameterRegistration {
    /// IN parameter whose value is the binding of `parameter`
    pub fn input(parameter: &JdbcParameter, mapping: Option<JdbcMapping>) -> Self {
        Self {
            name: None,
            mode: ParameterMode::In,
            mapping,
            parameter: Some(parameter.clone()),
        }
    }

    pub fn in_out(parameter: &JdbcParameter, mapping: JdbcMapping) -> Self {
        Self {
            name: None,
            mode: ParameterMode::InOut,
            mapping: Some(mapping),
            parameter: Some(parameter.clone()),
        }
    }

    pub fn output(mapping: JdbcMapping) -> Self {
        Self {
            name: None,
            mode: ParameterMode::Out,
            mapping: Some(mapping),
            parameter: None,
        }
    }

    pub fn ref_cursor() -> Self {
        Self {
            name: None,
            mode: ParameterMode::RefCursor,
            mapping: None,
            parameter: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn mode(&self) -> ParameterMode {
        self.mode
    }

    pub fn mapping(&self) -> Option<&JdbcMapping> {
        self.mapping.as_ref()
    }

    fn out_type(&self) -> SqlType {
        match (self.mode, &self.mapping) {
            (ParameterMode::RefCursor, _) => SqlType::RefCursor,
            (_, Some(mapping)) => mapping.sql_type(),
            (_, None) => SqlType::Other,
        }
    }
}

/// Value returned by a function call
#[derive(Debug, Clone)]
pub enum FunctionReturn {
    Value(JdbcMapping),
    RefCursor,
}

/// An executable stored procedure or function call
#[derive(Debug, Clone)]
pub struct JdbcCall {
    sql: String,
    function_return: Option<FunctionReturn>,
    registrations: Vec<JdbcCallParameterRegistration>,
    affected_tables: BTreeSet<String>,
}

impl JdbcCall {
    pub fn builder(sql: impl Into<String>) -> JdbcCallBuilder {
        JdbcCallBuilder {
            call: JdbcCall {
                sql: sql.into(),
                function_return: None,
                registrations: Vec::new(),
                affected_tables: BTreeSet::new(),
            },
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn function_return(&self) -> Option<&FunctionReturn> {
        self.function_return.as_ref()
    }

    pub fn registrations(&self) -> &[JdbcCallParameterRegistration] {
        &self.registrations
    }

    pub fn affected_table_names(&self) -> &BTreeSet<String> {
        &self.affected_tables
    }

    /// Position of the registration at `index`, after the function return
    fn position_of(&self, index: usize) -> usize {
        index + 1 + usize::from(self.function_return.is_some())
    }
}

pub struct JdbcCallBuilder {
    call: JdbcCall,
}

impl JdbcCallBuilder {
    pub fn function_return(mut self, function_return: FunctionReturn) -> Self {
        self.call.function_return = Some(function_return);
        self
    }

    pub fn parameter(mut self, registration: JdbcCallParameterRegistration) -> Self {
        self.call.registrations.push(registration);
        self
    }

    pub fn affected_table(mut self, table: impl Into<String>) -> Self {
        self.call.affected_tables.insert(table.into().to_ascii_lowercase());
        self
    }

    pub fn build(self) -> JdbcCall {
        self.call
    }
}

/// Rows of a result set read by a call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallResult {
    metadata: ResultSetMetadata,
    rows: Vec<Vec<DataValue>>,
}

impl CallResult {
    pub fn new(metadata: ResultSetMetadata, rows: Vec<Vec<DataValue>>) -> Self {
        Self { metadata, rows }
    }

    pub fn metadata(&self) -> &ResultSetMetadata {
        &self.metadata
    }

    pub fn rows(&self) -> &[Vec<DataValue>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<DataValue>> {
        self.rows
    }
}

/// Everything a call produced. Outputs are keyed by parameter name, or by
/// 1-based position for unnamed parameters.
#[derive(Debug, Default)]
pub struct CallOutputs {
    function_return: Option<DataValue>,
    out_values: LinkedHashMap<String, DataValue>,
    ref_cursors: LinkedHashMap<String, CallResult>,
    result: Option<CallResult>,
    update_count: Option<u64>,
}

impl CallOutputs {
    pub fn function_return(&self) -> Option<&DataValue> {
        self.function_return.as_ref()
    }

    pub fn out_value(&self, name: &str) -> Option<&DataValue> {
        self.out_values.get(name)
    }

    pub fn out_value_at(&self, position: usize) -> Option<&DataValue> {
        self.out_values.get(&position.to_string())
    }

    pub fn out_values(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.out_values.iter()
    }

    pub fn ref_cursor(&self, name: &str) -> Option<&CallResult> {
        self.ref_cursors.get(name)
    }

    pub fn ref_cursor_at(&self, position: usize) -> Option<&CallResult> {
        self.ref_cursors.get(&position.to_string())
    }

    /// Result set returned directly by the call
    pub fn result(&self) -> Option<&CallResult> {
        self.result.as_ref()
    }

    pub fn update_count(&self) -> Option<u64> {
        self.update_count
    }
}

/// Reads the rows of a REF_CURSOR parameter
pub trait RefCursorExtractor: fmt::Debug {
    /// Read the cursor registered at `position`, or under `name` when the
    /// call binds by name
    fn extract_results(
        &self,
        statement: &mut dyn CallableStatement,
        position: usize,
        name: Option<&str>,
        session: &SessionContext,
    ) -> SqlResult<CallResult>;
}

/// Reads cursors through the driver's REF_CURSOR getters
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRefCursorExtractor;

impl RefCursorExtractor for StandardRefCursorExtractor {
    fn extract_results(
        &self,
        statement: &mut dyn CallableStatement,
        position: usize,
        name: Option<&str>,
        session: &SessionContext,
    ) -> SqlResult<CallResult> {
        let result_set = match name {
            Some(name) => statement.get_named_ref_cursor(name)?,
            None => statement.get_ref_cursor(position)?,
        };
        read_result_set(result_set, session)
    }
}

/// Read every row of `result_set` and release it
fn read_result_set(mut result_set: Box<dyn ResultSet>, session: &SessionContext) -> SqlResult<CallResult> {
    let read = (|| {
        let metadata = result_set.metadata()?;
        let mut rows = Vec::new();
        while result_set.next()? {
            let mut row = Vec::with_capacity(metadata.column_count());
            for (index, column) in metadata.columns().iter().enumerate() {
                row.push(result_set.get_value(index + 1, column.sql_type)?);
            }
            rows.push(row);
        }
        Ok::<_, SqlError>(CallResult::new(metadata, rows))
    })();
    let released = session.jdbc_coordinator().release_result_set(result_set);
    let result = read?;
    released?;
    Ok(result)
}

/// Executes calls. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct JdbcCallExecutor;

impl JdbcCallExecutor {
    pub fn new() -> Self {
        Self
    }

    pub fn execute(
        &self,
        call: &JdbcCall,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<CallOutputs> {
        self.execute_with(call, bindings, context, &StandardRefCursorExtractor)
    }

    pub fn execute_with(
        &self,
        call: &JdbcCall,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'_>,
        extractor: &dyn RefCursorExtractor,
    ) -> ExecResult<CallOutputs> {
        let session = context.session();
        session.auto_flush_if_required(call.affected_table_names())?;

        let options = context.query_options();
        let sql = session.dialect().add_sql_hint_or_comment(
            call.sql(),
            options.comment.as_deref(),
            &options.database_hints,
            session.settings().comments_enabled,
        );
        let helper = session.factory().sql_exception_helper();
        let coordinator = session.jdbc_coordinator();
        let mut statement = coordinator
            .prepare_call(&sql)
            .map_err(|e| helper.convert(e, "could not prepare call", &sql))?;

        let named = use_named_parameters(call, session);
        debug!("Executing call ({} binding): {}", if named { "named" } else { "positional" }, sql);
        let outcome = self.perform(call, statement.as_mut(), bindings, context, named, extractor, &sql);

        let released = coordinator
            .release_call(statement)
            .map_err(|e| helper.convert(e, "could not release call", &sql));
        coordinator.after_statement_execution();
        combine(outcome, released)
    }

    #[allow(clippy::too_many_arguments)]
    fn perform(
        &self,
        call: &JdbcCall,
        statement: &mut dyn CallableStatement,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'_>,
        named: bool,
        extractor: &dyn RefCursorExtractor,
        sql: &str,
    ) -> ExecResult<CallOutputs> {
        let session = context.session();
        let helper = session.factory().sql_exception_helper();
        let convert = |e: SqlError, message: &str| helper.convert(e, message, sql);

        if let Some(function_return) = call.function_return() {
            let sql_type = match function_return {
                FunctionReturn::Value(mapping) => mapping.sql_type(),
                FunctionReturn::RefCursor => SqlType::RefCursor,
            };
            statement
                .register_out_parameter(1, sql_type)
                .map_err(|e| convert(e, "could not register function return"))?;
        }
        for (index, registration) in call.registrations().iter().enumerate() {
            let position = call.position_of(index);
            if registration.mode.is_input() {
                self.bind_input(statement, registration, position, named, bindings, context)?;
            }
            if registration.mode.is_output() {
                let registered = match (named, registration.name()) {
                    (true, Some(name)) => statement.register_named_out_parameter(name, registration.out_type()),
                    _ => statement.register_out_parameter(position, registration.out_type()),
                };
                registered.map_err(|e| convert(e, "could not register out parameter"))?;
            }
        }
        if let Some(seconds) = context.query_options().timeout {
            statement
                .as_prepared()
                .set_query_timeout(seconds)
                .map_err(|e| convert(e, "could not set query timeout"))?;
        }

        let has_result = statement.execute().map_err(|e| convert(e, "could not execute call"))?;

        let mut outputs = CallOutputs::default();
        match call.function_return() {
            Some(FunctionReturn::Value(mapping)) => {
                let value = statement
                    .get_out_value(1, mapping.sql_type())
                    .map_err(|e| convert(e, "could not read function return"))?;
                outputs.function_return = Some(mapping.to_domain_value(&value)?);
            }
            Some(FunctionReturn::RefCursor) => {
                let cursor = extractor
                    .extract_results(statement, 1, None, session)
                    .map_err(|e| convert(e, "could not extract function return cursor"))?;
                outputs.ref_cursors.insert("1".to_string(), cursor);
            }
            None => {}
        }
        for (index, registration) in call.registrations().iter().enumerate() {
            let position = call.position_of(index);
            let name = registration.name().filter(|_| named);
            let key = registration.name().map(str::to_string).unwrap_or_else(|| position.to_string());
            match registration.mode {
                ParameterMode::In => {}
                ParameterMode::RefCursor => {
                    let cursor = extractor
                        .extract_results(statement, position, name, session)
                        .map_err(|e| convert(e, "could not extract REF_CURSOR parameter"))?;
                    outputs.ref_cursors.insert(key, cursor);
                }
                ParameterMode::Out | ParameterMode::InOut => {
                    let sql_type = registration.out_type();
                    let value = match name {
                        Some(name) => statement.get_named_out_value(name, sql_type),
                        None => statement.get_out_value(position, sql_type),
                    }
                    .map_err(|e| convert(e, "could not read out parameter"))?;
                    let value = match registration.mapping() {
                        Some(mapping) => mapping.to_domain_value(&value)?,
                        None => value,
                    };
                    trace!("Extracted out parameter [{}] <- {}", key, value.to_log_string());
                    outputs.out_values.insert(key, value);
                }
            }
        }

        if has_result {
            if let Some(result_set) = statement.result_set().map_err(|e| convert(e, "could not read call result"))? {
                outputs.result =
                    Some(read_result_set(result_set, session).map_err(|e| convert(e, "could not read call result"))?);
            }
        }
        outputs.update_count = statement
            .update_count()
            .map_err(|e| convert(e, "could not read update count"))?;
        Ok(outputs)
    }

    fn bind_input(
        &self,
        statement: &mut dyn CallableStatement,
        registration: &JdbcCallParameterRegistration,
        position: usize,
        named: bool,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<()> {
        let parameter = match &registration.parameter {
            Some(parameter) => parameter,
            None => return Ok(()),
        };
        let binding = bindings.get_binding(parameter);
        if binding.is_none() {
            match context.session().settings().missing_binding_policy {
                MissingBindingPolicy::Fail => {
                    let label = registration.name().map(str::to_string).unwrap_or_else(|| parameter.label());
                    return Err(ExecError::ParameterNotBound(label));
                }
                MissingBindingPolicy::UseDatabaseDefault => return Ok(()),
            }
        }
        let mapping = match (binding.and_then(|b| b.bind_type()), registration.mapping()) {
            (Some(mapping), _) | (None, Some(mapping)) => mapping.clone(),
            (None, None) => resolve_bind_type(parameter, binding, context)?,
        };
        let value = binding.map(|b| b.value().clone()).unwrap_or(DataValue::Null);
        match (named, registration.name()) {
            (true, Some(name)) => {
                trace!("binding call parameter ({}:{})", name, mapping.sql_type());
                let result = if value.is_null() {
                    statement.set_named_null(name, mapping.sql_type())
                } else {
                    statement.set_named_value(name, &value, mapping.sql_type())
                };
                result.map_err(|e| {
                    context
                        .session()
                        .factory()
                        .sql_exception_helper()
                        .convert(e, &format!("could not bind parameter {}", name), statement.as_prepared().sql())
                })
            }
            _ => write_value(statement.as_prepared(), position, &value, &mapping, context),
        }
    }
}

fn use_named_parameters(call: &JdbcCall, session: &SessionContext) -> bool {
    session.settings().prefer_named_call_parameters
        && session.dialect().supports_named_call_parameters()
        && !call.registrations().is_empty()
        && call.registrations().iter().all(|r| r.name().is_some())
}

// Parameter Binders
//
// A binder writes its value(s) into a prepared statement starting at a
// given position and reports how many positions it consumed. Binders are
// stateless; the value comes from the execution's bindings or, for the
// pagination slots, from the query options.

use std::fmt;

use chrono::Utc;
use log::trace;

use crate::common::config::MissingBindingPolicy;
use crate::common::types::{DataValue, ValueClass};
use crate::exec::context::ExecutionContext;
use crate::exec::error::{ExecError, ExecResult};
use crate::exec::parameter::{JdbcParameter, JdbcParameterBinding, JdbcParameterBindings, ParameterKind};
use crate::jdbc::PreparedStatement;
use crate::mapping::jdbc_mapping::JdbcMapping;

/// Writes parameter values into a prepared statement
pub trait ParameterBinder: Send + Sync + fmt::Debug {
    /// Bind starting at the 1-based `start_position`; returns the number of
    /// positions consumed
    fn bind_parameter_value(
        &self,
        statement: &mut dyn PreparedStatement,
        start_position: usize,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<usize>;

    /// Append the values this binder would write, one per position, for
    /// keying cached results. Unbound slots contribute NULL.
    fn collect_key_values(&self, bindings: &JdbcParameterBindings, context: &ExecutionContext<'_>, values: &mut Vec<DataValue>);
}

/// Values of every binder in statement position order
pub fn key_values<B>(binders: &[B], bindings: &JdbcParameterBindings, context: &ExecutionContext<'_>) -> Vec<DataValue>
where
    B: AsRef<dyn ParameterBinder>,
{
    let mut values = Vec::with_capacity(bindings.len());
    for binder in binders {
        binder.as_ref().collect_key_values(bindings, context, &mut values);
    }
    values
}

/// Bind every binder in order starting at position 1. Returns the next
/// free position.
pub fn bind_parameters<B>(
    binders: &[B],
    statement: &mut dyn PreparedStatement,
    bindings: &JdbcParameterBindings,
    context: &ExecutionContext<'_>,
) -> ExecResult<usize>
where
    B: AsRef<dyn ParameterBinder>,
{
    let mut position = 1;
    for binder in binders {
        position += binder.as_ref().bind_parameter_value(statement, position, bindings, context)?;
    }
    Ok(position)
}

impl ParameterBinder for JdbcParameter {
    fn bind_parameter_value(
        &self,
        statement: &mut dyn PreparedStatement,
        start_position: usize,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<usize> {
        let value = match (bindings.get_binding(self), self.kind()) {
            (Some(binding), _) => {
                let mapping = resolve_bind_type(self, Some(binding), context)?;
                return write_value(statement, start_position, binding.value(), &mapping, context).map(|_| 1);
            }
            (None, ParameterKind::Offset) => DataValue::Integer(context.query_options().limit.first_row_or(0) as i64),
            (None, ParameterKind::Limit) => match context.query_options().limit.max_rows {
                Some(max_rows) => DataValue::Integer(max_rows as i64),
                None => return Err(ExecError::ParameterNotBound(self.label())),
            },
            (None, ParameterKind::Standard) => {
                return match context.session().settings().missing_binding_policy {
                    MissingBindingPolicy::Fail => Err(ExecError::ParameterNotBound(self.label())),
                    MissingBindingPolicy::UseDatabaseDefault => {
                        trace!("Parameter {} has no binding; leaving position {} unset", self.label(), start_position);
                        Ok(1)
                    }
                };
            }
        };
        let mapping = resolve_bind_type(self, None, context)?;
        write_value(statement, start_position, &value, &mapping, context)?;
        Ok(1)
    }

    fn collect_key_values(&self, bindings: &JdbcParameterBindings, context: &ExecutionContext<'_>, values: &mut Vec<DataValue>) {
        let limit = &context.query_options().limit;
        values.push(match (bindings.get_binding(self), self.kind()) {
            (Some(binding), _) => binding.value().clone(),
            (None, ParameterKind::Offset) => DataValue::Integer(limit.first_row_or(0) as i64),
            (None, ParameterKind::Limit) => limit.max_rows.map_or(DataValue::Null, |rows| DataValue::Integer(rows as i64)),
            (None, ParameterKind::Standard) => DataValue::Null,
        });
    }
}

/// Resolve the mapping used to write a slot: the binding's type, then the
/// slot's declared type, then the registry's guess from the value's class
pub fn resolve_bind_type(
    parameter: &JdbcParameter,
    binding: Option<&JdbcParameterBinding>,
    context: &ExecutionContext<'_>,
) -> ExecResult<JdbcMapping> {
    if let Some(mapping) = binding.and_then(|b| b.bind_type()).or_else(|| parameter.static_type()) {
        return Ok(mapping.clone());
    }
    binding
        .and_then(|b| context.session().factory().type_registry().resolve_for_value(b.value()))
        .cloned()
        .ok_or_else(|| ExecError::UnresolvableParameterType(parameter.label()))
}

/// Write one value at `position`, as NULL when the value is null
pub fn write_value(
    statement: &mut dyn PreparedStatement,
    position: usize,
    value: &DataValue,
    mapping: &JdbcMapping,
    context: &ExecutionContext<'_>,
) -> ExecResult<()> {
    let session = context.session();
    if session.settings().log_parameter_values {
        trace!("binding parameter ({}:{}) <- [{}]", position, mapping.sql_type(), value.to_log_string());
    } else {
        trace!("binding parameter ({}:{})", position, mapping.sql_type());
    }
    let result = if value.is_null() {
        statement.set_null(position, mapping.sql_type())
    } else {
        statement.set_value(position, value, mapping.sql_type())
    };
    result.map_err(|e| {
        session
            .factory()
            .sql_exception_helper()
            .convert(e, &format!("could not bind parameter {}", position), statement.sql())
    })
}

/// Binds the slots of an embeddable value, one position per column
#[derive(Debug, Clone)]
pub struct CompositeParameterBinder {
    parts: Vec<JdbcParameter>,
}

impl CompositeParameterBinder {
    pub fn new(parts: Vec<JdbcParameter>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &[JdbcParameter] {
        &self.parts
    }
}

impl ParameterBinder for CompositeParameterBinder {
    fn bind_parameter_value(
        &self,
        statement: &mut dyn PreparedStatement,
        start_position: usize,
        bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<usize> {
        let mut position = start_position;
        for part in &self.parts {
            position += part.bind_parameter_value(statement, position, bindings, context)?;
        }
        Ok(position - start_position)
    }

    fn collect_key_values(&self, bindings: &JdbcParameterBindings, context: &ExecutionContext<'_>, values: &mut Vec<DataValue>) {
        for part in &self.parts {
            part.collect_key_values(bindings, context, values);
        }
    }
}

/// Binds the initial version of a newly inserted row
#[derive(Debug, Clone)]
pub struct VersionSeedParameterBinder {
    mapping: JdbcMapping,
}

impl VersionSeedParameterBinder {
    pub fn new(mapping: JdbcMapping) -> Self {
        Self { mapping }
    }

    /// Seed value for the version mapping
    pub fn seed(&self) -> ExecResult<DataValue> {
        let now = Utc::now().naive_utc();
        match self.mapping.value_class() {
            ValueClass::Integer => Ok(DataValue::Integer(0)),
            ValueClass::Timestamp => Ok(DataValue::Timestamp(now.format("%Y-%m-%d %H:%M:%S%.3f").to_string())),
            ValueClass::Date => Ok(DataValue::Date(now.format("%Y-%m-%d").to_string())),
            other => Err(ExecError::Execution(format!(
                "Version mapping {} of class {} has no seed value",
                self.mapping.name(),
                other
            ))),
        }
    }
}

impl ParameterBinder for VersionSeedParameterBinder {
    fn bind_parameter_value(
        &self,
        statement: &mut dyn PreparedStatement,
        start_position: usize,
        _bindings: &JdbcParameterBindings,
        context: &ExecutionContext<'_>,
    ) -> ExecResult<usize> {
        let seed = self.mapping.to_relational_value(&self.seed()?)?;
        write_value(statement, start_position, &seed, &self.mapping, context)?;
        Ok(1)
    }

    // the seed is not a bound value, only its position counts
    fn collect_key_values(&self, _bindings: &JdbcParameterBindings, _context: &ExecutionContext<'_>, values: &mut Vec<DataValue>) {
        values.push(DataValue::Null);
    }
}

// Domain Parameter Expansion
//
// Query parameters bind domain values: a single value, an embeddable value
// spanning several columns, or a list for an IN predicate. Each domain
// parameter was rendered as one or more groups of positional slots, one
// slot per column. Expansion turns the domain values into one JDBC binding
// per slot, applying attribute converters and padding lists by repeating
// their last value.

use linked_hash_map::LinkedHashMap;
use log::trace;

use crate::common::types::DataValue;
use crate::exec::error::{ExecError, ExecResult};
use crate::exec::parameter::{JdbcParameter, JdbcParameterBinding, JdbcParameterBindings};
use crate::mapping::jdbc_mapping::{BindableType, JdbcMapping};
use crate::session::SessionContext;

/// One domain value: a basic value or the column values of an embeddable
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Single(DataValue),
    Tuple(Vec<DataValue>),
}

impl From<DataValue> for BindValue {
    fn from(value: DataValue) -> Self {
        BindValue::Single(value)
    }
}

/// The value(s) bound to one query parameter
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameterBinding {
    bind_type: Option<BindableType>,
    values: Vec<BindValue>,
    multi_valued: bool,
}

impl QueryParameterBinding {
    pub fn single(bind_type: Option<BindableType>, value: impl Into<BindValue>) -> Self {
        Self {
            bind_type,
            values: vec![value.into()],
            multi_valued: false,
        }
    }

    /// A list bound for an IN predicate
    pub fn multi(bind_type: Option<BindableType>, values: Vec<BindValue>) -> Self {
        Self {
            bind_type,
            values,
            multi_valued: true,
        }
    }

    pub fn bind_type(&self) -> Option<&BindableType> {
        self.bind_type.as_ref()
    }

    pub fn values(&self) -> &[BindValue] {
        &self.values
    }

    pub fn is_multi_valued(&self) -> bool {
        self.multi_valued
    }
}

/// Bindings of the named query parameters, in declaration order
#[derive(Debug, Clone, Default)]
pub struct QueryParameterBindings {
    bindings: LinkedHashMap<String, QueryParameterBinding>,
}

impl QueryParameterBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, binding: QueryParameterBinding) -> &mut Self {
        self.bindings.insert(name.into(), binding);
        self
    }

    pub fn get(&self, name: &str) -> Option<&QueryParameterBinding> {
        self.bindings.get(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// The slot groups each query parameter was rendered as. A group holds one
/// slot per column of the parameter's type; lists render one group per
/// (padded) element.
#[derive(Debug, Clone, Default)]
pub struct ParameterSlots {
    slots: LinkedHashMap<String, Vec<Vec<JdbcParameter>>>,
}

impl ParameterSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, groups: Vec<Vec<JdbcParameter>>) -> &mut Self {
        self.slots.insert(name.into(), groups);
        self
    }

    pub fn groups(&self, name: &str) -> Option<&[Vec<JdbcParameter>]> {
        self.slots.get(name).map(|groups| groups.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Vec<JdbcParameter>>)> {
        self.slots.iter()
    }

    /// Every slot, in rendering order
    pub fn all(&self) -> Vec<JdbcParameter> {
        self.slots.values().flatten().flatten().cloned().collect()
    }
}

/// Number of slot groups to render for `binding`. Lists are padded to the
/// dialect's bind count when IN clause padding is enabled, so the SQL text
/// stays the same for lists of similar size.
pub fn padded_group_count(binding: &QueryParameterBinding, session: &SessionContext) -> usize {
    let count = binding.values.len().max(1);
    if binding.multi_valued && session.settings().in_clause_parameter_padding {
        session.dialect().padded_bind_count(count)
    } else {
        count
    }
}

/// Expand domain bindings into one JDBC binding per slot
pub fn create_bindings(
    domain: &QueryParameterBindings,
    slots: &ParameterSlots,
    session: &SessionContext,
) -> ExecResult<JdbcParameterBindings> {
    let mut bindings = JdbcParameterBindings::with_capacity(slots.all().len());
    for (name, groups) in slots.iter() {
        let binding = domain
            .get(name)
            .ok_or_else(|| ExecError::ParameterNotBound(name.clone()))?;
        if binding.values.len() > groups.len() {
            return Err(ExecError::Execution(format!(
                "Parameter {} has {} values but only {} were rendered",
                name,
                binding.values.len(),
                groups.len()
            )));
        }
        for (index, group) in groups.iter().enumerate() {
            let value = match binding.values.get(index).or_else(|| binding.values.last()) {
                Some(value) => value,
                None => {
                    bind_nulls(&mut bindings, binding, group)?;
                    continue;
                }
            };
            if index >= binding.values.len() {
                trace!("Padding parameter {} slot group {} with its last value", name, index + 1);
            }
            bind_group(&mut bindings, name, binding, value, group, session)?;
        }
    }
    Ok(bindings)
}

fn bind_group(
    bindings: &mut JdbcParameterBindings,
    name: &str,
    binding: &QueryParameterBinding,
    value: &BindValue,
    group: &[JdbcParameter],
    session: &SessionContext,
) -> ExecResult<()> {
    let columns: Vec<&DataValue> = match value {
        BindValue::Single(v) => vec![v],
        BindValue::Tuple(vs) => vs.iter().collect(),
    };
    if columns.len() != group.len() {
        return Err(ExecError::Execution(format!(
            "Parameter {} value spans {} columns but {} slots were rendered",
            name,
            columns.len(),
            group.len()
        )));
    }
    let mappings = column_mappings(binding.bind_type.as_ref(), &columns, session);
    if let Some(mappings) = &mappings {
        if mappings.len() != group.len() {
            return Err(ExecError::Execution(format!(
                "Parameter {} type spans {} columns but {} slots were rendered",
                name,
                mappings.len(),
                group.len()
            )));
        }
    }
    for (column, (parameter, domain_value)) in group.iter().zip(columns).enumerate() {
        let jdbc_binding = match mappings.as_ref().and_then(|m| m.get(column)) {
            Some(mapping) => {
                let relational = mapping.to_relational_value(domain_value)?;
                JdbcParameterBinding::new(Some(mapping.clone()), relational)?
            }
            None => JdbcParameterBinding::untyped(domain_value.clone()),
        };
        bindings.add_binding(parameter, jdbc_binding);
    }
    Ok(())
}

fn bind_nulls(
    bindings: &mut JdbcParameterBindings,
    binding: &QueryParameterBinding,
    group: &[JdbcParameter],
) -> ExecResult<()> {
    for (column, parameter) in group.iter().enumerate() {
        let mapping = binding
            .bind_type
            .as_ref()
            .and_then(|t| t.jdbc_mappings().get(column))
            .cloned();
        bindings.add_binding(parameter, JdbcParameterBinding::new(mapping, DataValue::Null)?);
    }
    Ok(())
}

/// Mappings of the columns of one value: the declared type, or for a basic
/// value without a declared type, the registry's mapping for its class
fn column_mappings(
    bind_type: Option<&BindableType>,
    columns: &[&DataValue],
    session: &SessionContext,
) -> Option<Vec<JdbcMapping>> {
    match bind_type {
        Some(bind_type) => Some(bind_type.jdbc_mappings().to_vec()),
        None => match columns {
            [single] => session
                .factory()
                .type_registry()
                .resolve_for_value(single)
                .map(|mapping| vec![mapping.clone()]),
            _ => None,
        },
    }
}

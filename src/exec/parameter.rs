// JDBC Parameters and Bindings
//
// A JdbcParameter is one positional `?` slot. Slots are compared by
// identity: two parameters with the same declared type are still distinct
// slots. JdbcParameterBindings maps slots to the values bound for one
// execution, in insertion order.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use linked_hash_map::LinkedHashMap;

use crate::common::types::{next_object_id, DataValue, ObjectId};
use crate::exec::error::{ExecError, ExecResult};
use crate::mapping::jdbc_mapping::JdbcMapping;

/// Role of a parameter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    Standard,
    /// Receives the row limit of the query
    Limit,
    /// Receives the first row of the query
    Offset,
}

struct JdbcParameterInner {
    id: ObjectId,
    kind: ParameterKind,
    static_type: Option<JdbcMapping>,
    label: Option<String>,
}

/// A positional parameter slot. Clones share the slot's identity.
#[derive(Clone)]
pub struct JdbcParameter {
    inner: Arc<JdbcParameterInner>,
}

impl JdbcParameter {
    fn create(kind: ParameterKind, static_type: Option<JdbcMapping>, label: Option<String>) -> Self {
        Self {
            inner: Arc::new(JdbcParameterInner {
                id: next_object_id(),
                kind,
                static_type,
                label,
            }),
        }
    }

    /// A slot with a declared type
    pub fn typed(mapping: JdbcMapping) -> Self {
        Self::create(ParameterKind::Standard, Some(mapping), None)
    }

    /// A slot whose type is taken from its binding or guessed from the value
    pub fn untyped() -> Self {
        Self::create(ParameterKind::Standard, None, None)
    }

    /// The slot receiving the query's row limit
    pub fn limit() -> Self {
        Self::create(ParameterKind::Limit, Some(JdbcMapping::integer()), Some("limit".to_string()))
    }

    /// The slot receiving the query's first row
    pub fn offset() -> Self {
        Self::create(ParameterKind::Offset, Some(JdbcMapping::integer()), Some("offset".to_string()))
    }

    /// Name the slot for error messages and logs
    pub fn labeled(mapping: Option<JdbcMapping>, label: impl Into<String>) -> Self {
        Self::create(ParameterKind::Standard, mapping, Some(label.into()))
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn kind(&self) -> ParameterKind {
        self.inner.kind
    }

    pub fn static_type(&self) -> Option<&JdbcMapping> {
        self.inner.static_type.as_ref()
    }

    /// Label used in error messages
    pub fn label(&self) -> String {
        match &self.inner.label {
            Some(label) => label.clone(),
            None => format!("#{}", self.inner.id),
        }
    }

    pub fn is_limit(&self) -> bool {
        self.inner.kind == ParameterKind::Limit
    }

    pub fn is_offset(&self) -> bool {
        self.inner.kind == ParameterKind::Offset
    }
}

impl PartialEq for JdbcParameter {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for JdbcParameter {}

impl Hash for JdbcParameter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for JdbcParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JdbcParameter")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("type", &self.inner.static_type.as_ref().map(|m| m.name().to_string()))
            .finish()
    }
}

/// A value bound to one slot, with the mapping used to write it
#[derive(Debug, Clone, PartialEq)]
pub struct JdbcParameterBinding {
    bind_type: Option<JdbcMapping>,
    value: DataValue,
}

impl JdbcParameterBinding {
    /// Bind `value` through `bind_type`; the value must be of a class the
    /// mapping accepts
    pub fn new(bind_type: Option<JdbcMapping>, value: DataValue) -> ExecResult<Self> {
        if let Some(mapping) = &bind_type {
            if !mapping.accepts(&value) {
                return Err(ExecError::ParameterMismatch {
                    mapping: mapping.name().to_string(),
                    value: value.to_log_string(),
                });
            }
        }
        Ok(Self { bind_type, value })
    }

    pub fn typed(bind_type: JdbcMapping, value: impl Into<DataValue>) -> ExecResult<Self> {
        Self::new(Some(bind_type), value.into())
    }

    /// A binding whose type is resolved when it is written
    pub fn untyped(value: impl Into<DataValue>) -> Self {
        Self {
            bind_type: None,
            value: value.into(),
        }
    }

    pub fn bind_type(&self) -> Option<&JdbcMapping> {
        self.bind_type.as_ref()
    }

    pub fn value(&self) -> &DataValue {
        &self.value
    }
}

/// Values bound for one execution, keyed by slot identity
#[derive(Debug, Clone, Default)]
pub struct JdbcParameterBindings {
    bindings: LinkedHashMap<ObjectId, (JdbcParameter, JdbcParameterBinding)>,
}

impl JdbcParameterBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bindings: LinkedHashMap::with_capacity(capacity),
        }
    }

    /// Bind a slot, replacing any earlier binding of the same slot
    pub fn add_binding(&mut self, parameter: &JdbcParameter, binding: JdbcParameterBinding) {
        self.bindings.insert(parameter.id(), (parameter.clone(), binding));
    }

    pub fn get_binding(&self, parameter: &JdbcParameter) -> Option<&JdbcParameterBinding> {
        self.bindings.get(&parameter.id()).map(|(_, binding)| binding)
    }

    pub fn contains(&self, parameter: &JdbcParameter) -> bool {
        self.bindings.contains_key(&parameter.id())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Slots and bindings in the order they were bound
    pub fn iter(&self) -> impl Iterator<Item = (&JdbcParameter, &JdbcParameterBinding)> {
        self.bindings.values().map(|(parameter, binding)| (parameter, binding))
    }
}

/// Slots of an operation whose values were rendered into the SQL text.
/// Used only to decide whether the operation may be reused.
#[derive(Debug, Clone, Default)]
pub struct AppliedParameters {
    applied: LinkedHashMap<ObjectId, (JdbcParameter, Option<JdbcParameterBinding>)>,
}

impl AppliedParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `parameter` was rendered with `binding`; `None` records
    /// a slot that was rendered without any value
    pub fn apply(&mut self, parameter: &JdbcParameter, binding: Option<JdbcParameterBinding>) {
        self.applied.insert(parameter.id(), (parameter.clone(), binding));
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JdbcParameter, Option<&JdbcParameterBinding>)> {
        self.applied.values().map(|(parameter, binding)| (parameter, binding.as_ref()))
    }
}

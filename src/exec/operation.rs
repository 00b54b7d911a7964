// Executable Operations
//
// A translated, immutable SQL operation: the SQL text, the binders that
// fill its positional slots, the tables it touches and the parameters whose
// values were rendered into the text. Operations are built once and reused
// for as long as new bindings and options are compatible with them.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use log::trace;

use crate::common::types::DataValue;
use crate::exec::action::JdbcActions;
use crate::exec::binder::ParameterBinder;
use crate::exec::loaded::NavigablePath;
use crate::exec::options::QueryOptions;
use crate::exec::parameter::{AppliedParameters, JdbcParameter, JdbcParameterBinding, JdbcParameterBindings};
use crate::exec::row::JdbcValuesMappingProducer;

/// Behavior common to every executable operation
pub trait JdbcOperation {
    fn sql(&self) -> &str;

    /// Binders for the positional slots, in position order
    fn parameter_binders(&self) -> &[Arc<dyn ParameterBinder>];

    /// Tables the operation reads or writes
    fn affected_table_names(&self) -> &BTreeSet<String>;

    /// Parameters whose values were rendered into the SQL text
    fn applied_parameters(&self) -> &AppliedParameters;

    /// Whether the operation can run with `bindings` and `options` without
    /// being translated again. Every parameter rendered into the text must
    /// be bound to an equal value.
    fn is_compatible_with(&self, bindings: Option<&JdbcParameterBindings>, _options: &QueryOptions) -> bool {
        applied_values_match(self.applied_parameters(), bindings, |_, _| None)
    }
}

/// Compare every applied parameter with the new bindings. `special`
/// decides slots whose rendering depends on more than their binding; it
/// returns `None` to fall back to the binding comparison.
fn applied_values_match<F>(applied: &AppliedParameters, bindings: Option<&JdbcParameterBindings>, special: F) -> bool
where
    F: Fn(&JdbcParameter, Option<&JdbcParameterBinding>) -> Option<bool>,
{
    if applied.is_empty() {
        return true;
    }
    let bindings = match bindings {
        Some(bindings) => bindings,
        None => return false,
    };
    applied.iter().all(|(parameter, applied_binding)| {
        if let Some(compatible) = special(parameter, applied_binding) {
            return compatible;
        }
        match (applied_binding, bindings.get_binding(parameter)) {
            // rendered without a value: a non-null value needs different SQL
            (None, Some(binding)) => binding.value().is_null(),
            (None, None) => true,
            (Some(_), None) => false,
            (Some(applied_binding), Some(binding)) => bindings_equal(applied_binding, binding),
        }
    })
}

fn bindings_equal(applied: &JdbcParameterBinding, binding: &JdbcParameterBinding) -> bool {
    match applied.bind_type().or_else(|| binding.bind_type()) {
        Some(mapping) => mapping.are_equal(applied.value(), binding.value()),
        None => applied.value() == binding.value(),
    }
}

/// How a select's pessimistic lock is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockStrategy {
    /// No pessimistic lock
    #[default]
    None,
    /// Rendered into the select as a locking clause
    Clause,
    /// Taken by separate statements after the select completes
    FollowOn,
}

/// A translated select
pub struct JdbcSelect {
    sql: String,
    parameter_binders: Vec<Arc<dyn ParameterBinder>>,
    affected_table_names: BTreeSet<String>,
    applied_parameters: AppliedParameters,
    mapping_producer: Arc<dyn JdbcValuesMappingProducer>,
    rows_to_skip: usize,
    max_rows: Option<u32>,
    offset_parameter: Option<JdbcParameter>,
    limit_parameter: Option<JdbcParameter>,
    lock_strategy: LockStrategy,
    actions: JdbcActions,
    paths_to_lock: Option<Arc<HashSet<NavigablePath>>>,
}

impl JdbcSelect {
    pub fn builder(sql: impl Into<String>, mapping_producer: Arc<dyn JdbcValuesMappingProducer>) -> JdbcSelectBuilder {
        JdbcSelectBuilder::new(sql.into(), mapping_producer)
    }

    pub fn mapping_producer(&self) -> &Arc<dyn JdbcValuesMappingProducer> {
        &self.mapping_producer
    }

    /// Rows discarded client-side before the first result
    pub fn rows_to_skip(&self) -> usize {
        self.rows_to_skip
    }

    /// Row limit applied to the statement when the SQL carries none
    pub fn max_rows(&self) -> Option<u32> {
        self.max_rows
    }

    pub fn offset_parameter(&self) -> Option<&JdbcParameter> {
        self.offset_parameter.as_ref()
    }

    pub fn limit_parameter(&self) -> Option<&JdbcParameter> {
        self.limit_parameter.as_ref()
    }

    pub fn uses_limit_parameters(&self) -> bool {
        self.offset_parameter.is_some() || self.limit_parameter.is_some()
    }

    pub fn lock_strategy(&self) -> LockStrategy {
        self.lock_strategy
    }

    pub fn actions(&self) -> &JdbcActions {
        &self.actions
    }

    /// Paths whose loaded values are collected when the lock strategy is
    /// [`LockStrategy::FollowOn`]
    pub fn paths_to_lock(&self) -> Option<&Arc<HashSet<NavigablePath>>> {
        self.paths_to_lock.as_ref()
    }

    /// Value a pagination slot receives under `options`
    fn requested_pagination(&self, parameter: &JdbcParameter, bindings: &JdbcParameterBindings, options: &QueryOptions) -> Option<DataValue> {
        if let Some(binding) = bindings.get_binding(parameter) {
            return Some(binding.value().clone());
        }
        let requested = if parameter.is_offset() {
            options.limit.first_row
        } else {
            options.limit.max_rows
        };
        requested.map(|value| DataValue::Integer(value as i64))
    }
}

impl JdbcOperation for JdbcSelect {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn parameter_binders(&self) -> &[Arc<dyn ParameterBinder>] {
        &self.parameter_binders
    }

    fn affected_table_names(&self) -> &BTreeSet<String> {
        &self.affected_table_names
    }

    fn applied_parameters(&self) -> &AppliedParameters {
        &self.applied_parameters
    }

    /// Pagination slots are compared against the pagination the options
    /// request: a slot rendered without a value needs the options to omit
    /// it, and a slot rendered with a value needs the same value. A select
    /// without pagination slots only runs unpaginated.
    fn is_compatible_with(&self, bindings: Option<&JdbcParameterBindings>, options: &QueryOptions) -> bool {
        let empty = JdbcParameterBindings::new();
        let pagination_bindings = bindings.unwrap_or(&empty);
        let compatible = applied_values_match(&self.applied_parameters, bindings, |parameter, applied| {
            let is_pagination = self.offset_parameter.as_ref() == Some(parameter) || self.limit_parameter.as_ref() == Some(parameter);
            if !is_pagination {
                return None;
            }
            let requested = self.requested_pagination(parameter, pagination_bindings, options);
            Some(match (applied, requested) {
                (None, None) => true,
                (None, Some(_)) | (Some(_), None) => false,
                (Some(applied), Some(requested)) => match applied.bind_type() {
                    Some(mapping) => mapping.are_equal(applied.value(), &requested),
                    None => applied.value() == &requested,
                },
            })
        });
        if !compatible {
            trace!("Select is not compatible with the new bindings: {}", self.sql);
            return false;
        }
        self.uses_limit_parameters() || options.limit.is_empty()
    }
}

impl fmt::Debug for JdbcSelect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JdbcSelect")
            .field("sql", &self.sql)
            .field("parameter_binders", &self.parameter_binders.len())
            .field("affected_table_names", &self.affected_table_names)
            .field("rows_to_skip", &self.rows_to_skip)
            .field("max_rows", &self.max_rows)
            .field("lock_strategy", &self.lock_strategy)
            .field("actions", &self.actions)
            .finish()
    }
}

/// Builder for [`JdbcSelect`]
pub struct JdbcSelectBuilder {
    select: JdbcSelect,
}

impl JdbcSelectBuilder {
    fn new(sql: String, mapping_producer: Arc<dyn JdbcValuesMappingProducer>) -> Self {
        Self {
            select: JdbcSelect {
                sql,
                parameter_binders: Vec::new(),
                affected_table_names: BTreeSet::new(),
                applied_parameters: AppliedParameters::new(),
                mapping_producer,
                rows_to_skip: 0,
                max_rows: None,
                offset_parameter: None,
                limit_parameter: None,
                lock_strategy: LockStrategy::None,
                actions: JdbcActions::none(),
                paths_to_lock: None,
            },
        }
    }

    /// Append the binder of the next positional slot(s)
    pub fn binder(mut self, binder: Arc<dyn ParameterBinder>) -> Self {
        self.select.parameter_binders.push(binder);
        self
    }

    /// Append a slot as its own binder
    pub fn parameter(self, parameter: &JdbcParameter) -> Self {
        self.binder(Arc::new(parameter.clone()))
    }

    pub fn affected_table(mut self, table: impl Into<String>) -> Self {
        self.select.affected_table_names.insert(table.into().to_ascii_lowercase());
        self
    }

    /// Record a parameter whose value was rendered into the SQL text
    pub fn applied_parameter(mut self, parameter: &JdbcParameter, binding: Option<JdbcParameterBinding>) -> Self {
        self.select.applied_parameters.apply(parameter, binding);
        self
    }

    pub fn rows_to_skip(mut self, rows: usize) -> Self {
        self.select.rows_to_skip = rows;
        self
    }

    pub fn max_rows(mut self, rows: u32) -> Self {
        self.select.max_rows = Some(rows);
        self
    }

    /// Declare the slot receiving the first row; the slot's binder is added
    /// separately at its position
    pub fn offset_parameter(mut self, parameter: &JdbcParameter) -> Self {
        self.select.offset_parameter = Some(parameter.clone());
        self
    }

    /// Declare the slot receiving the row limit
    pub fn limit_parameter(mut self, parameter: &JdbcParameter) -> Self {
        self.select.limit_parameter = Some(parameter.clone());
        self
    }

    pub fn lock_strategy(mut self, strategy: LockStrategy) -> Self {
        self.select.lock_strategy = strategy;
        self
    }

    pub fn actions(mut self, actions: JdbcActions) -> Self {
        self.select.actions = actions;
        self
    }

    /// Collect the values loaded at `paths` during each execution. Only
    /// consulted under [`LockStrategy::FollowOn`].
    pub fn collect_loaded_values(mut self, paths: impl IntoIterator<Item = NavigablePath>) -> Self {
        self.select.paths_to_lock = Some(Arc::new(paths.into_iter().collect()));
        self
    }

    pub fn build(self) -> JdbcSelect {
        self.select
    }
}

/// Statement kind of a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    Insert {
        /// Unique constraint whose violation is tolerated: the insert then
        /// reports zero affected rows instead of failing
        unique_constraint_name_that_may_fail: Option<String>,
    },
    Update,
    Delete,
    Other,
}

/// A translated insert, update or delete
pub struct JdbcMutation {
    sql: String,
    kind: MutationKind,
    parameter_binders: Vec<Arc<dyn ParameterBinder>>,
    affected_table_names: BTreeSet<String>,
    applied_parameters: AppliedParameters,
}

impl JdbcMutation {
    pub fn builder(kind: MutationKind, sql: impl Into<String>) -> JdbcMutationBuilder {
        JdbcMutationBuilder {
            mutation: JdbcMutation {
                sql: sql.into(),
                kind,
                parameter_binders: Vec::new(),
                affected_table_names: BTreeSet::new(),
                applied_parameters: AppliedParameters::new(),
            },
        }
    }

    pub fn kind(&self) -> &MutationKind {
        &self.kind
    }

    pub fn unique_constraint_name_that_may_fail(&self) -> Option<&str> {
        match &self.kind {
            MutationKind::Insert {
                unique_constraint_name_that_may_fail,
            } => unique_constraint_name_that_may_fail.as_deref(),
            _ => None,
        }
    }
}

impl JdbcOperation for JdbcMutation {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn parameter_binders(&self) -> &[Arc<dyn ParameterBinder>] {
        &self.parameter_binders
    }

    fn affected_table_names(&self) -> &BTreeSet<String> {
        &self.affected_table_names
    }

    fn applied_parameters(&self) -> &AppliedParameters {
        &self.applied_parameters
    }
}

impl fmt::Debug for JdbcMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JdbcMutation")
            .field("sql", &self.sql)
            .field("kind", &self.kind)
            .field("parameter_binders", &self.parameter_binders.len())
            .field("affected_table_names", &self.affected_table_names)
            .finish()
    }
}

/// Builder for [`JdbcMutation`]
pub struct JdbcMutationBuilder {
    mutation: JdbcMutation,
}

impl JdbcMutationBuilder {
    pub fn binder(mut self, binder: Arc<dyn ParameterBinder>) -> Self {
        self.mutation.parameter_binders.push(binder);
        self
    }

    pub fn parameter(self, parameter: &JdbcParameter) -> Self {
        self.binder(Arc::new(parameter.clone()))
    }

    pub fn affected_table(mut self, table: impl Into<String>) -> Self {
        self.mutation.affected_table_names.insert(table.into().to_ascii_lowercase());
        self
    }

    pub fn applied_parameter(mut self, parameter: &JdbcParameter, binding: Option<JdbcParameterBinding>) -> Self {
        self.mutation.applied_parameters.apply(parameter, binding);
        self
    }

    pub fn build(self) -> JdbcMutation {
        self.mutation
    }
}

// Row Reading
//
// Turns raw result rows into domain results. A mapping producer describes
// the results of a select (basic values and entities with fetched
// collections) and is resolved against the result set's metadata once per
// execution. The row reader materializes each row through the session's
// persistence context so rows naming the same entity share one instance,
// then hands the row's results to a row transformer.

use std::any::type_name;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use log::trace;

use crate::common::types::{DataValue, ObjectId};
use crate::exec::context::{Callback, ExecutionContext};
use crate::exec::error::{ExecError, ExecResult};
use crate::exec::loaded::{LoadedValuesCollector, NavigablePath};
use crate::exec::options::TupleTransformer;
use crate::jdbc::{ResultSetMetadata, SqlType};
use crate::mapping::entity::{CollectionDescriptor, CollectionInstance, CollectionKey, EntityDescriptor, EntityInstance, EntityKey};
use crate::mapping::jdbc_mapping::JdbcMapping;
use crate::session::SessionContext;

/// One materialized result
#[derive(Debug, Clone)]
pub enum DomainValue {
    Basic(DataValue),
    Entity(Arc<EntityInstance>),
    Tuple(Vec<DomainValue>),
}

impl DomainValue {
    pub fn as_basic(&self) -> Option<&DataValue> {
        match self {
            DomainValue::Basic(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Arc<EntityInstance>> {
        match self {
            DomainValue::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[DomainValue]> {
        match self {
            DomainValue::Tuple(values) => Some(values),
            _ => None,
        }
    }

    /// Identity of the first entity in the value
    pub fn root_entity_id(&self) -> Option<ObjectId> {
        match self {
            DomainValue::Entity(entity) => Some(entity.object_id()),
            DomainValue::Tuple(values) => values.iter().find_map(|v| v.root_entity_id()),
            DomainValue::Basic(_) => None,
        }
    }
}

/// Entities compare by instance identity, everything else by value
impl PartialEq for DomainValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DomainValue::Basic(a), DomainValue::Basic(b)) => a == b,
            (DomainValue::Entity(a), DomainValue::Entity(b)) => Arc::ptr_eq(a, b),
            (DomainValue::Tuple(a), DomainValue::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DomainValue {}

impl Hash for DomainValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            DomainValue::Basic(value) => {
                0u8.hash(state);
                value.hash(state);
            }
            DomainValue::Entity(entity) => {
                1u8.hash(state);
                entity.object_id().hash(state);
            }
            DomainValue::Tuple(values) => {
                2u8.hash(state);
                values.hash(state);
            }
        }
    }
}

/// Conversion of a domain result into the caller's result type
pub trait FromDomainValue: Sized {
    fn from_domain_value(value: DomainValue) -> ExecResult<Self>;
}

fn unexpected<T>(value: &DomainValue) -> ExecError {
    ExecError::Execution(format!("Cannot read result {:?} as {}", value, type_name::<T>()))
}

impl FromDomainValue for DomainValue {
    fn from_domain_value(value: DomainValue) -> ExecResult<Self> {
        Ok(value)
    }
}

impl FromDomainValue for DataValue {
    fn from_domain_value(value: DomainValue) -> ExecResult<Self> {
        match value {
            DomainValue::Basic(value) => Ok(value),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromDomainValue for Arc<EntityInstance> {
    fn from_domain_value(value: DomainValue) -> ExecResult<Self> {
        match value {
            DomainValue::Entity(entity) => Ok(entity),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromDomainValue for Vec<DomainValue> {
    fn from_domain_value(value: DomainValue) -> ExecResult<Self> {
        match value {
            DomainValue::Tuple(values) => Ok(values),
            single => Ok(vec![single]),
        }
    }
}

impl FromDomainValue for Vec<DataValue> {
    fn from_domain_value(value: DomainValue) -> ExecResult<Self> {
        Vec::<DomainValue>::from_domain_value(value)?
            .into_iter()
            .map(DataValue::from_domain_value)
            .collect()
    }
}

impl FromDomainValue for i64 {
    fn from_domain_value(value: DomainValue) -> ExecResult<Self> {
        match value {
            DomainValue::Basic(DataValue::Integer(i)) => Ok(i),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromDomainValue for f64 {
    fn from_domain_value(value: DomainValue) -> ExecResult<Self> {
        match value {
            DomainValue::Basic(DataValue::Float(f)) => Ok(f),
            DomainValue::Basic(DataValue::Integer(i)) => Ok(i as f64),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromDomainValue for bool {
    fn from_domain_value(value: DomainValue) -> ExecResult<Self> {
        match value {
            DomainValue::Basic(DataValue::Boolean(b)) => Ok(b),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromDomainValue for String {
    fn from_domain_value(value: DomainValue) -> ExecResult<Self> {
        match value {
            DomainValue::Basic(DataValue::Text(s)) => Ok(s),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

/// SQL NULL reads as `None`
impl<T: FromDomainValue> FromDomainValue for Option<T> {
    fn from_domain_value(value: DomainValue) -> ExecResult<Self> {
        match value {
            DomainValue::Basic(DataValue::Null) => Ok(None),
            other => T::from_domain_value(other).map(Some),
        }
    }
}

/// Column a result reads from: a 1-based position or a column label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Position(usize),
    Label(String),
}

impl ColumnRef {
    pub fn label(label: impl Into<String>) -> Self {
        ColumnRef::Label(label.into())
    }

    /// 0-based index of the column within `metadata`
    fn resolve(&self, metadata: &ResultSetMetadata) -> ExecResult<usize> {
        match self {
            ColumnRef::Position(position) if *position >= 1 && *position <= metadata.column_count() => Ok(position - 1),
            ColumnRef::Position(position) => Err(ExecError::Execution(format!(
                "Column position {} is out of range; the result has {} columns",
                position,
                metadata.column_count()
            ))),
            ColumnRef::Label(label) => metadata
                .resolve_column(label)
                .ok_or_else(|| ExecError::Execution(format!("Column '{}' not found in result set", label))),
        }
    }
}

impl From<usize> for ColumnRef {
    fn from(position: usize) -> Self {
        ColumnRef::Position(position)
    }
}

impl From<&str> for ColumnRef {
    fn from(label: &str) -> Self {
        ColumnRef::Label(label.to_string())
    }
}

/// A single column read as a basic value
#[derive(Debug, Clone)]
pub struct BasicResult {
    column: ColumnRef,
    mapping: Option<JdbcMapping>,
    alias: Option<String>,
}

impl BasicResult {
    pub fn new(column: impl Into<ColumnRef>, mapping: Option<JdbcMapping>) -> Self {
        Self {
            column: column.into(),
            mapping,
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// A collection joined into the rows of its owning entity
#[derive(Debug, Clone)]
pub struct CollectionFetch {
    path: NavigablePath,
    descriptor: Arc<CollectionDescriptor>,
    element_columns: Vec<ColumnRef>,
}

impl CollectionFetch {
    pub fn new(path: NavigablePath, descriptor: Arc<CollectionDescriptor>, element_columns: Vec<ColumnRef>) -> Self {
        Self {
            path,
            descriptor,
            element_columns,
        }
    }
}

/// An entity read from its id column and one column per attribute
#[derive(Debug, Clone)]
pub struct EntityResult {
    path: NavigablePath,
    descriptor: Arc<EntityDescriptor>,
    id_column: ColumnRef,
    attribute_columns: Vec<ColumnRef>,
    fetches: Vec<CollectionFetch>,
}

impl EntityResult {
    pub fn new(
        path: NavigablePath,
        descriptor: Arc<EntityDescriptor>,
        id_column: impl Into<ColumnRef>,
        attribute_columns: Vec<ColumnRef>,
    ) -> Self {
        Self {
            path,
            descriptor,
            id_column: id_column.into(),
            attribute_columns,
            fetches: Vec::new(),
        }
    }

    /// An entity whose columns are labeled like the descriptor's columns
    pub fn by_column_names(path: NavigablePath, descriptor: Arc<EntityDescriptor>) -> Self {
        let attribute_columns = descriptor
            .attributes()
            .iter()
            .map(|attribute| ColumnRef::label(attribute.column.clone()))
            .collect();
        let id_column = ColumnRef::label(descriptor.id_column());
        Self::new(path, descriptor, id_column, attribute_columns)
    }

    pub fn with_fetch(mut self, fetch: CollectionFetch) -> Self {
        self.fetches.push(fetch);
        self
    }
}

/// One result of a row
#[derive(Debug, Clone)]
pub enum DomainResult {
    Basic(BasicResult),
    Entity(EntityResult),
}

impl From<BasicResult> for DomainResult {
    fn from(result: BasicResult) -> Self {
        DomainResult::Basic(result)
    }
}

impl From<EntityResult> for DomainResult {
    fn from(result: EntityResult) -> Self {
        DomainResult::Entity(result)
    }
}

#[derive(Debug, Clone)]
struct ResolvedFetch {
    path: NavigablePath,
    descriptor: Arc<CollectionDescriptor>,
    element_indexes: Vec<usize>,
}

#[derive(Debug, Clone)]
enum ResolvedResult {
    Basic {
        index: usize,
        mapping: Option<JdbcMapping>,
    },
    Entity {
        path: NavigablePath,
        descriptor: Arc<EntityDescriptor>,
        id_index: usize,
        attribute_indexes: Vec<usize>,
        fetches: Vec<ResolvedFetch>,
    },
}

/// Results of a select resolved against a concrete result set
#[derive(Debug, Clone)]
pub struct JdbcValuesMapping {
    results: Vec<ResolvedResult>,
    column_types: Vec<SqlType>,
    aliases: Vec<String>,
}

impl JdbcValuesMapping {
    /// Types to read each column with, in column order
    pub fn column_types(&self) -> &[SqlType] {
        &self.column_types
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    pub fn has_collection_fetches(&self) -> bool {
        self.results
            .iter()
            .any(|r| matches!(r, ResolvedResult::Entity { fetches, .. } if !fetches.is_empty()))
    }

    /// Whether each row yields exactly one entity
    pub fn is_single_entity_result(&self) -> bool {
        matches!(self.results.as_slice(), [ResolvedResult::Entity { .. }])
    }
}

/// Produces the mapping of a select's rows once the result set's metadata
/// is known
pub trait JdbcValuesMappingProducer: Send + Sync + fmt::Debug {
    fn resolve(&self, metadata: &ResultSetMetadata) -> ExecResult<JdbcValuesMapping>;
}

/// Mapping declared up front as a list of results
#[derive(Debug, Clone, Default)]
pub struct RowMapping {
    results: Vec<DomainResult>,
}

impl RowMapping {
    pub fn new(results: Vec<DomainResult>) -> Self {
        Self { results }
    }

    pub fn with_result(mut self, result: impl Into<DomainResult>) -> Self {
        self.results.push(result.into());
        self
    }
}

impl JdbcValuesMappingProducer for RowMapping {
    fn resolve(&self, metadata: &ResultSetMetadata) -> ExecResult<JdbcValuesMapping> {
        let mut results = Vec::with_capacity(self.results.len());
        let mut aliases = Vec::with_capacity(self.results.len());
        for result in &self.results {
            match result {
                DomainResult::Basic(basic) => {
                    let index = basic.column.resolve(metadata)?;
                    let alias = basic
                        .alias
                        .clone()
                        .or_else(|| metadata.column(index).map(|c| c.label.clone()))
                        .unwrap_or_default();
                    aliases.push(alias);
                    results.push(ResolvedResult::Basic {
                        index,
                        mapping: basic.mapping.clone(),
                    });
                }
                DomainResult::Entity(entity) => {
                    if entity.attribute_columns.len() != entity.descriptor.attributes().len() {
                        return Err(ExecError::Execution(format!(
                            "Entity {} maps {} attributes but {} columns were given",
                            entity.descriptor.name(),
                            entity.descriptor.attributes().len(),
                            entity.attribute_columns.len()
                        )));
                    }
                    let fetches = entity
                        .fetches
                        .iter()
                        .map(|fetch| {
                            Ok(ResolvedFetch {
                                path: fetch.path.clone(),
                                descriptor: fetch.descriptor.clone(),
                                element_indexes: fetch
                                    .element_columns
                                    .iter()
                                    .map(|c| c.resolve(metadata))
                                    .collect::<ExecResult<_>>()?,
                            })
                        })
                        .collect::<ExecResult<Vec<_>>>()?;
                    aliases.push(entity.path.full_path().to_string());
                    results.push(ResolvedResult::Entity {
                        path: entity.path.clone(),
                        descriptor: entity.descriptor.clone(),
                        id_index: entity.id_column.resolve(metadata)?,
                        attribute_indexes: entity
                            .attribute_columns
                            .iter()
                            .map(|c| c.resolve(metadata))
                            .collect::<ExecResult<_>>()?,
                        fetches,
                    });
                }
            }
        }
        Ok(JdbcValuesMapping {
            results,
            column_types: metadata.columns().iter().map(|c| c.sql_type).collect(),
            aliases,
        })
    }
}

/// Maps every column of the result set to a basic result, as native
/// queries without a declared mapping do
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnsMappingProducer;

impl JdbcValuesMappingProducer for ColumnsMappingProducer {
    fn resolve(&self, metadata: &ResultSetMetadata) -> ExecResult<JdbcValuesMapping> {
        Ok(JdbcValuesMapping {
            results: (0..metadata.column_count())
                .map(|index| ResolvedResult::Basic { index, mapping: None })
                .collect(),
            column_types: metadata.columns().iter().map(|c| c.sql_type).collect(),
            aliases: metadata.columns().iter().map(|c| c.label.clone()).collect(),
        })
    }
}

/// Reshapes the results of one row into the value handed to consumers
pub trait RowTransformer: Send + Sync {
    fn transform_row(&self, row: Vec<DomainValue>, aliases: &[String]) -> ExecResult<DomainValue>;
}

impl<F> RowTransformer for F
where
    F: Fn(Vec<DomainValue>, &[String]) -> ExecResult<DomainValue> + Send + Sync,
{
    fn transform_row(&self, row: Vec<DomainValue>, aliases: &[String]) -> ExecResult<DomainValue> {
        self(row, aliases)
    }
}

/// A single result stays itself; several results become a tuple
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRowTransformer;

impl RowTransformer for StandardRowTransformer {
    fn transform_row(&self, mut row: Vec<DomainValue>, _aliases: &[String]) -> ExecResult<DomainValue> {
        if row.len() == 1 {
            if let Some(single) = row.pop() {
                return Ok(single);
            }
        }
        Ok(DomainValue::Tuple(row))
    }
}

/// Every row becomes a tuple, even with a single result
#[derive(Debug, Clone, Copy, Default)]
pub struct TupleRowTransformer;

impl RowTransformer for TupleRowTransformer {
    fn transform_row(&self, row: Vec<DomainValue>, _aliases: &[String]) -> ExecResult<DomainValue> {
        Ok(DomainValue::Tuple(row))
    }
}

/// Applies a query's tuple transformer to each row
pub struct TupleTransformerAdapter {
    transformer: Arc<dyn TupleTransformer>,
}

impl TupleTransformerAdapter {
    pub fn new(transformer: Arc<dyn TupleTransformer>) -> Self {
        Self { transformer }
    }
}

impl RowTransformer for TupleTransformerAdapter {
    fn transform_row(&self, row: Vec<DomainValue>, aliases: &[String]) -> ExecResult<DomainValue> {
        Ok(self.transformer.transform_tuple(row, aliases))
    }
}

/// Per-execution state of row processing
pub struct RowProcessingState<'a> {
    session: &'a SessionContext,
    read_only: Option<bool>,
    collector: Option<Rc<LoadedValuesCollector>>,
    callback: Option<Rc<Callback>>,
    loaded_entities: Vec<Arc<EntityInstance>>,
    rows_processed: usize,
}

impl<'a> RowProcessingState<'a> {
    pub fn new(context: &ExecutionContext<'a>) -> Self {
        Self {
            session: context.session(),
            read_only: context.query_options().read_only,
            collector: context.loaded_values_collector().cloned(),
            callback: context.callback().cloned(),
            loaded_entities: Vec::new(),
            rows_processed: 0,
        }
    }

    pub fn session(&self) -> &'a SessionContext {
        self.session
    }

    pub fn rows_processed(&self) -> usize {
        self.rows_processed
    }

    /// Run the after-load actions for the entities loaded since the last
    /// call
    pub fn finish_up(&mut self) {
        let loaded = std::mem::take(&mut self.loaded_entities);
        if let Some(callback) = &self.callback {
            for entity in &loaded {
                callback.invoke_after_load_actions(entity, self.session);
            }
        }
    }
}

impl fmt::Debug for RowProcessingState<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowProcessingState")
            .field("read_only", &self.read_only)
            .field("loaded_entities", &self.loaded_entities.len())
            .field("rows_processed", &self.rows_processed)
            .finish()
    }
}

/// Reads rows through a resolved mapping and a row transformer
pub struct RowReader {
    mapping: JdbcValuesMapping,
    transformer: Arc<dyn RowTransformer>,
}

impl RowReader {
    pub fn new(mapping: JdbcValuesMapping, transformer: Arc<dyn RowTransformer>) -> Self {
        Self { mapping, transformer }
    }

    pub fn mapping(&self) -> &JdbcValuesMapping {
        &self.mapping
    }

    pub fn read_row(&self, row: &[DataValue], state: &mut RowProcessingState<'_>) -> ExecResult<DomainValue> {
        state.rows_processed += 1;
        let values = self
            .mapping
            .results
            .iter()
            .map(|result| read_result(result, row, state))
            .collect::<ExecResult<Vec<_>>>()?;
        self.transformer.transform_row(values, &self.mapping.aliases)
    }
}

impl fmt::Debug for RowReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowReader").field("mapping", &self.mapping).finish()
    }
}

fn column(row: &[DataValue], index: usize) -> ExecResult<&DataValue> {
    row.get(index)
        .ok_or_else(|| ExecError::Execution(format!("Row has no column {}", index + 1)))
}

fn read_result(result: &ResolvedResult, row: &[DataValue], state: &mut RowProcessingState<'_>) -> ExecResult<DomainValue> {
    match result {
        ResolvedResult::Basic { index, mapping } => {
            let raw = column(row, *index)?;
            let value = match mapping {
                Some(mapping) => mapping.to_domain_value(raw)?,
                None => raw.clone(),
            };
            Ok(DomainValue::Basic(value))
        }
        ResolvedResult::Entity {
            path,
            descriptor,
            id_index,
            attribute_indexes,
            fetches,
        } => {
            let raw_id = column(row, *id_index)?;
            if raw_id.is_null() {
                return Ok(DomainValue::Basic(DataValue::Null));
            }
            let id = descriptor.id_mapping().to_domain_value(raw_id)?;
            let key = EntityKey {
                entity_name: descriptor.name().to_string(),
                id: id.clone(),
            };
            let entity = resolve_entity(descriptor, &key, attribute_indexes, row, state)?;
            if let Some(collector) = &state.collector {
                collector.register_entity(path, descriptor, &key);
            }
            for fetch in fetches {
                read_fetch(fetch, &id, row, state)?;
            }
            Ok(DomainValue::Entity(entity))
        }
    }
}

/// The registered instance for `key`, or a new instance built from the row
fn resolve_entity(
    descriptor: &Arc<EntityDescriptor>,
    key: &EntityKey,
    attribute_indexes: &[usize],
    row: &[DataValue],
    state: &mut RowProcessingState<'_>,
) -> ExecResult<Arc<EntityInstance>> {
    let session = state.session;
    let existing = session.persistence_context().get_entity(key);
    if let Some(existing) = existing {
        return Ok(existing);
    }
    let values = attribute_indexes
        .iter()
        .zip(descriptor.attributes())
        .map(|(index, attribute)| Ok(attribute.mapping.to_domain_value(column(row, *index)?)?))
        .collect::<ExecResult<Vec<_>>>()?;
    let mut context = session.persistence_context_mut();
    let read_only = state.read_only.unwrap_or_else(|| context.is_default_read_only());
    trace!("Loading entity {}#{} (read-only: {})", key.entity_name, key.id, read_only);
    let entity = context.add_entity(Arc::new(EntityInstance::new(
        descriptor.clone(),
        key.id.clone(),
        values,
        read_only,
    )));
    state.loaded_entities.push(entity.clone());
    Ok(entity)
}

fn read_fetch(fetch: &ResolvedFetch, owner_id: &DataValue, row: &[DataValue], state: &mut RowProcessingState<'_>) -> ExecResult<()> {
    let key = CollectionKey {
        role: fetch.descriptor.role().to_string(),
        owner_id: owner_id.clone(),
    };
    let session = state.session;
    let existing = session.persistence_context().get_collection(&key);
    let collection = match existing {
        Some(collection) => collection,
        None => session
            .persistence_context_mut()
            .add_collection(Arc::new(CollectionInstance::new(fetch.descriptor.clone(), owner_id.clone()))),
    };
    if let Some(collector) = &state.collector {
        collector.register_collection(&fetch.path, &fetch.descriptor, &key);
    }
    let raw: Vec<&DataValue> = fetch
        .element_indexes
        .iter()
        .map(|index| column(row, *index))
        .collect::<ExecResult<_>>()?;
    // an outer join without a matching element yields only nulls
    if raw.iter().all(|value| value.is_null()) {
        return Ok(());
    }
    let mappings = fetch.descriptor.element_mappings();
    let element = raw
        .into_iter()
        .enumerate()
        .map(|(i, value)| match mappings.get(i) {
            Some(mapping) => Ok(mapping.to_domain_value(value)?),
            None => Ok(value.clone()),
        })
        .collect::<ExecResult<Vec<_>>>()?;
    collection.add_element(element);
    Ok(())
}

/// Distinct results seen so far, by entity identity or value
#[derive(Debug, Default)]
pub(crate) struct SeenResults {
    seen: HashSet<DomainValue>,
}

impl SeenResults {
    /// Record `value`; false when it was seen before
    pub(crate) fn insert(&mut self, value: &DomainValue) -> bool {
        if self.seen.contains(value) {
            return false;
        }
        self.seen.insert(value.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.seen.len()
    }
}

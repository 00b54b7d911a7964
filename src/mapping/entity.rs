// Entity and Collection Model
//
// Descriptors carry the table-level facts the execution layer needs about a
// mapped entity or collection (tables, key columns, state columns). Instances
// are what row reading materializes into the persistence context.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::common::types::{next_object_id, DataValue, ObjectId};
use crate::mapping::jdbc_mapping::JdbcMapping;

/// One persistent attribute of an entity
#[derive(Debug, Clone)]
pub struct AttributeMapping {
    pub name: String,
    pub column: String,
    pub mapping: JdbcMapping,
}

/// Table-level description of a mapped entity
#[derive(Debug)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    id_column: String,
    id_mapping: JdbcMapping,
    attributes: Vec<AttributeMapping>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, table: impl Into<String>, id_column: impl Into<String>, id_mapping: JdbcMapping) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            id_column: id_column.into(),
            id_mapping,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, column: impl Into<String>, mapping: JdbcMapping) -> Self {
        self.attributes.push(AttributeMapping {
            name: name.into(),
            column: column.into(),
            mapping,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn id_mapping(&self) -> &JdbcMapping {
        &self.id_mapping
    }

    pub fn attributes(&self) -> &[AttributeMapping] {
        &self.attributes
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }
}

/// Table-level description of a mapped collection
#[derive(Debug)]
pub struct CollectionDescriptor {
    role: String,
    table: String,
    key_column: String,
    key_mapping: JdbcMapping,
    element_mappings: Vec<JdbcMapping>,
}

impl CollectionDescriptor {
    pub fn new(
        role: impl Into<String>,
        table: impl Into<String>,
        key_column: impl Into<String>,
        key_mapping: JdbcMapping,
        element_mappings: Vec<JdbcMapping>,
    ) -> Self {
        Self {
            role: role.into(),
            table: table.into(),
            key_column: key_column.into(),
            key_mapping,
            element_mappings,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn key_mapping(&self) -> &JdbcMapping {
        &self.key_mapping
    }

    pub fn element_mappings(&self) -> &[JdbcMapping] {
        &self.element_mappings
    }
}

/// Identity of an entity within a persistence context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub entity_name: String,
    pub id: DataValue,
}

/// Identity of a collection within a persistence context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    pub role: String,
    pub owner_id: DataValue,
}

/// A materialized entity. Instances are shared by reference; two rows that
/// resolve to the same key yield the same instance.
pub struct EntityInstance {
    object_id: ObjectId,
    descriptor: Arc<EntityDescriptor>,
    id: DataValue,
    state: Vec<DataValue>,
    read_only: AtomicBool,
}

impl EntityInstance {
    pub fn new(descriptor: Arc<EntityDescriptor>, id: DataValue, state: Vec<DataValue>, read_only: bool) -> Self {
        Self {
            object_id: next_object_id(),
            descriptor,
            id,
            state,
            read_only: AtomicBool::new(read_only),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn entity_name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn id(&self) -> &DataValue {
        &self.id
    }

    pub fn state(&self) -> &[DataValue] {
        &self.state
    }

    /// Value of a named attribute
    pub fn attribute(&self, name: &str) -> Option<&DataValue> {
        self.descriptor.attribute_index(name).and_then(|i| self.state.get(i))
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    pub fn key(&self) -> EntityKey {
        EntityKey {
            entity_name: self.descriptor.name().to_string(),
            id: self.id.clone(),
        }
    }
}

impl fmt::Debug for EntityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityInstance")
            .field("entity", &self.descriptor.name())
            .field("id", &self.id)
            .field("state", &self.state)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

/// A materialized collection, filled as fetch-joined rows are read
pub struct CollectionInstance {
    key: CollectionKey,
    descriptor: Arc<CollectionDescriptor>,
    elements: Mutex<Vec<Vec<DataValue>>>,
}

impl CollectionInstance {
    pub fn new(descriptor: Arc<CollectionDescriptor>, owner_id: DataValue) -> Self {
        Self {
            key: CollectionKey {
                role: descriptor.role().to_string(),
                owner_id,
            },
            descriptor,
            elements: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    pub fn descriptor(&self) -> &Arc<CollectionDescriptor> {
        &self.descriptor
    }

    /// Add an element unless an equal element is already present
    pub fn add_element(&self, element: Vec<DataValue>) -> bool {
        let mut elements = self.elements.lock();
        if elements.contains(&element) {
            return false;
        }
        elements.push(element);
        true
    }

    pub fn elements(&self) -> Vec<Vec<DataValue>> {
        self.elements.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.elements.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.lock().is_empty()
    }
}

impl fmt::Debug for CollectionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionInstance")
            .field("key", &self.key)
            .field("size", &self.len())
            .finish()
    }
}

// Basic Type Registry
//
// Lookup of JDBC mappings by name and by the runtime class of a value. The
// class lookup is the last step when a parameter binder has no explicit or
// declared type for the value it must write.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::common::types::{DataValue, ValueClass};
use crate::mapping::jdbc_mapping::JdbcMapping;

static DEFAULT_REGISTRY: Lazy<Arc<BasicTypeRegistry>> = Lazy::new(|| Arc::new(BasicTypeRegistry::standard()));

/// Registry of basic JDBC mappings
#[derive(Debug, Clone, Default)]
pub struct BasicTypeRegistry {
    by_class: HashMap<ValueClass, JdbcMapping>,
    by_name: HashMap<String, JdbcMapping>,
}

impl BasicTypeRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the standard mappings, one per value class
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(JdbcMapping::long());
        registry.register(JdbcMapping::double());
        registry.register(JdbcMapping::string());
        registry.register(JdbcMapping::boolean());
        registry.register(JdbcMapping::date());
        registry.register(JdbcMapping::timestamp());
        registry.register(JdbcMapping::blob());
        // integer stays reachable by name without replacing long as the class default
        registry.register_named(JdbcMapping::integer());
        registry
    }

    /// The process-wide standard registry
    pub fn default_instance() -> Arc<BasicTypeRegistry> {
        DEFAULT_REGISTRY.clone()
    }

    /// Register a mapping by name and make it the default for its value class
    pub fn register(&mut self, mapping: JdbcMapping) {
        self.by_class.insert(mapping.value_class(), mapping.clone());
        self.register_named(mapping);
    }

    /// Register a mapping by name only
    pub fn register_named(&mut self, mapping: JdbcMapping) {
        self.by_name.insert(mapping.name().to_string(), mapping);
    }

    pub fn resolve_by_name(&self, name: &str) -> Option<&JdbcMapping> {
        self.by_name.get(name)
    }

    pub fn resolve_by_class(&self, class: ValueClass) -> Option<&JdbcMapping> {
        self.by_class.get(&class)
    }

    /// Best-effort mapping for a runtime value; `None` for NULL
    pub fn resolve_for_value(&self, value: &DataValue) -> Option<&JdbcMapping> {
        value.value_class().and_then(|class| self.resolve_by_class(class))
    }
}

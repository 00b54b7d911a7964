// Mapping Module
//
// Relational type mappings, attribute converters, the basic type registry
// and the entity/collection model row reading materializes into.

pub mod converter;
pub mod entity;
pub mod jdbc_mapping;
pub mod registry;

use thiserror::Error;

use crate::common::types::ValueClass;

pub use self::converter::{BooleanIntegerConverter, TrueFalseConverter, ValueConverter, YesNoConverter};
pub use self::entity::{
    AttributeMapping, CollectionDescriptor, CollectionInstance, CollectionKey, EntityDescriptor, EntityInstance, EntityKey,
};
pub use self::jdbc_mapping::{BindableType, JdbcMapping};
pub use self::registry::BasicTypeRegistry;

/// Error type for mapping operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Converter for {mapping} produces {actual} values but the mapping stores {expected}")]
    IncompatibleConverter {
        mapping: String,
        expected: ValueClass,
        actual: ValueClass,
    },
}

/// Result type for mapping operations
pub type MappingResult<T> = std::result::Result<T, MappingError>;

// JDBC Mappings
//
// A JdbcMapping describes how one column value is written and read: its
// relational type code, the class of value it accepts and an optional
// converter between the domain and relational representations.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::common::types::{DataValue, ValueClass};
use crate::jdbc::SqlType;
use crate::mapping::converter::ValueConverter;
use crate::mapping::{MappingError, MappingResult};

struct JdbcMappingInner {
    name: String,
    sql_type: SqlType,
    value_class: ValueClass,
    converter: Option<Arc<dyn ValueConverter>>,
}

/// Relational type of a single column value. Cheap to clone.
#[derive(Clone)]
pub struct JdbcMapping {
    inner: Arc<JdbcMappingInner>,
}

static INTEGER: Lazy<JdbcMapping> = Lazy::new(|| JdbcMapping::basic("integer", SqlType::Integer, ValueClass::Integer));
static LONG: Lazy<JdbcMapping> = Lazy::new(|| JdbcMapping::basic("long", SqlType::BigInt, ValueClass::Integer));
static DOUBLE: Lazy<JdbcMapping> = Lazy::new(|| JdbcMapping::basic("double", SqlType::Double, ValueClass::Float));
static STRING: Lazy<JdbcMapping> = Lazy::new(|| JdbcMapping::basic("string", SqlType::Varchar, ValueClass::Text));
static BOOLEAN: Lazy<JdbcMapping> = Lazy::new(|| JdbcMapping::basic("boolean", SqlType::Boolean, ValueClass::Boolean));
static DATE: Lazy<JdbcMapping> = Lazy::new(|| JdbcMapping::basic("date", SqlType::Date, ValueClass::Date));
static TIMESTAMP: Lazy<JdbcMapping> = Lazy::new(|| JdbcMapping::basic("timestamp", SqlType::Timestamp, ValueClass::Timestamp));
static BLOB: Lazy<JdbcMapping> = Lazy::new(|| JdbcMapping::basic("blob", SqlType::Blob, ValueClass::Blob));

impl JdbcMapping {
    pub fn basic(name: impl Into<String>, sql_type: SqlType, value_class: ValueClass) -> Self {
        Self {
            inner: Arc::new(JdbcMappingInner {
                name: name.into(),
                sql_type,
                value_class,
                converter: None,
            }),
        }
    }

    /// Attach a converter. The converter's relational class must be the
    /// class this mapping stores.
    pub fn with_converter(&self, name: impl Into<String>, converter: Arc<dyn ValueConverter>) -> MappingResult<Self> {
        if converter.relational_class() != self.inner.value_class {
            return Err(MappingError::IncompatibleConverter {
                mapping: self.inner.name.clone(),
                expected: self.inner.value_class,
                actual: converter.relational_class(),
            });
        }
        Ok(Self {
            inner: Arc::new(JdbcMappingInner {
                name: name.into(),
                sql_type: self.inner.sql_type,
                value_class: self.inner.value_class,
                converter: Some(converter),
            }),
        })
    }

    pub fn integer() -> Self {
        INTEGER.clone()
    }

    pub fn long() -> Self {
        LONG.clone()
    }

    pub fn double() -> Self {
        DOUBLE.clone()
    }

    pub fn string() -> Self {
        STRING.clone()
    }

    pub fn boolean() -> Self {
        BOOLEAN.clone()
    }

    pub fn date() -> Self {
        DATE.clone()
    }

    pub fn timestamp() -> Self {
        TIMESTAMP.clone()
    }

    pub fn blob() -> Self {
        BLOB.clone()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn sql_type(&self) -> SqlType {
        self.inner.sql_type
    }

    /// Class of the relational value this mapping writes
    pub fn value_class(&self) -> ValueClass {
        self.inner.value_class
    }

    pub fn converter(&self) -> Option<&Arc<dyn ValueConverter>> {
        self.inner.converter.as_ref()
    }

    /// Whether `value` may be bound through this mapping
    pub fn accepts(&self, value: &DataValue) -> bool {
        match value.value_class() {
            None => true,
            Some(class) if class == self.inner.value_class => true,
            // integers widen into floating point columns
            Some(ValueClass::Integer) => self.inner.value_class == ValueClass::Float,
            Some(_) => false,
        }
    }

    /// Apply the converter, if any, to a domain value
    pub fn to_relational_value(&self, domain: &DataValue) -> MappingResult<DataValue> {
        match &self.inner.converter {
            Some(converter) => converter.to_relational(domain),
            None => Ok(domain.clone()),
        }
    }

    /// Apply the converter, if any, to a value read from a column
    pub fn to_domain_value(&self, relational: &DataValue) -> MappingResult<DataValue> {
        match &self.inner.converter {
            Some(converter) => converter.to_domain(relational),
            None => Ok(relational.clone()),
        }
    }

    /// Equality of two relational values as this mapping sees them.
    /// Converted mappings compare the domain representations.
    pub fn are_equal(&self, a: &DataValue, b: &DataValue) -> bool {
        if let Some(converter) = &self.inner.converter {
            if let (Ok(da), Ok(db)) = (converter.to_domain(a), converter.to_domain(b)) {
                return values_equal(&da, &db);
            }
        }
        values_equal(a, b)
    }
}

fn values_equal(a: &DataValue, b: &DataValue) -> bool {
    match (a, b) {
        (DataValue::Integer(x), DataValue::Float(y)) | (DataValue::Float(y), DataValue::Integer(x)) => {
            (*x as f64) == *y
        }
        (DataValue::Float(x), DataValue::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => a == b,
    }
}

impl PartialEq for JdbcMapping {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.name == other.inner.name
                && self.inner.sql_type == other.inner.sql_type
                && self.inner.value_class == other.inner.value_class
                && self.inner.converter.is_none()
                && other.inner.converter.is_none())
    }
}

impl fmt::Debug for JdbcMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("JdbcMapping");
        s.field("name", &self.inner.name).field("sql_type", &self.inner.sql_type);
        if let Some(converter) = &self.inner.converter {
            s.field("converter", converter);
        }
        s.finish()
    }
}

/// The ordered column mappings of a parameter type. Basic types span one
/// column; embeddable types span several.
#[derive(Debug, Clone, PartialEq)]
pub struct BindableType {
    name: String,
    columns: Vec<JdbcMapping>,
}

impl BindableType {
    pub fn basic(mapping: JdbcMapping) -> Self {
        Self {
            name: mapping.name().to_string(),
            columns: vec![mapping],
        }
    }

    pub fn composite(name: impl Into<String>, columns: Vec<JdbcMapping>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of columns a single value of this type occupies
    pub fn column_span(&self) -> usize {
        self.columns.len()
    }

    pub fn jdbc_mappings(&self) -> &[JdbcMapping] {
        &self.columns
    }

    pub fn single_mapping(&self) -> Option<&JdbcMapping> {
        match self.columns.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

impl From<JdbcMapping> for BindableType {
    fn from(mapping: JdbcMapping) -> Self {
        BindableType::basic(mapping)
    }
}

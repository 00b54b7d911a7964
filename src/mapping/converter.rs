// Attribute Converters
//
// Converters translate between the domain representation of a value and the
// representation stored in the column.

use std::fmt;

use crate::common::types::{DataValue, ValueClass};
use crate::mapping::{MappingError, MappingResult};

/// Two-way conversion between a domain value and its relational form
pub trait ValueConverter: Send + Sync + fmt::Debug {
    /// Class of the value the domain model works with
    fn domain_class(&self) -> ValueClass;

    /// Class of the value written to and read from the column
    fn relational_class(&self) -> ValueClass;

    fn to_relational(&self, domain: &DataValue) -> MappingResult<DataValue>;

    fn to_domain(&self, relational: &DataValue) -> MappingResult<DataValue>;
}

fn unexpected(converter: &str, value: &DataValue) -> MappingError {
    MappingError::Conversion(format!("{} cannot convert {}", converter, value))
}

/// Stores booleans as the characters `Y` and `N`
#[derive(Debug, Clone, Copy, Default)]
pub struct YesNoConverter;

impl ValueConverter for YesNoConverter {
    fn domain_class(&self) -> ValueClass {
        ValueClass::Boolean
    }

    fn relational_class(&self) -> ValueClass {
        ValueClass::Text
    }

    fn to_relational(&self, domain: &DataValue) -> MappingResult<DataValue> {
        match domain {
            DataValue::Null => Ok(DataValue::Null),
            DataValue::Boolean(true) => Ok(DataValue::Text("Y".to_string())),
            DataValue::Boolean(false) => Ok(DataValue::Text("N".to_string())),
            other => Err(unexpected("YesNoConverter", other)),
        }
    }

    fn to_domain(&self, relational: &DataValue) -> MappingResult<DataValue> {
        match relational {
            DataValue::Null => Ok(DataValue::Null),
            DataValue::Text(s) if s.eq_ignore_ascii_case("y") => Ok(DataValue::Boolean(true)),
            DataValue::Text(s) if s.eq_ignore_ascii_case("n") => Ok(DataValue::Boolean(false)),
            other => Err(unexpected("YesNoConverter", other)),
        }
    }
}

/// Stores booleans as the characters `T` and `F`
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueFalseConverter;

impl ValueConverter for TrueFalseConverter {
    fn domain_class(&self) -> ValueClass {
        ValueClass::Boolean
    }

    fn relational_class(&self) -> ValueClass {
        ValueClass::Text
    }

    fn to_relational(&self, domain: &DataValue) -> MappingResult<DataValue> {
        match domain {
            DataValue::Null => Ok(DataValue::Null),
            DataValue::Boolean(true) => Ok(DataValue::Text("T".to_string())),
            DataValue::Boolean(false) => Ok(DataValue::Text("F".to_string())),
            other => Err(unexpected("TrueFalseConverter", other)),
        }
    }

    fn to_domain(&self, relational: &DataValue) -> MappingResult<DataValue> {
        match relational {
            DataValue::Null => Ok(DataValue::Null),
            DataValue::Text(s) if s.eq_ignore_ascii_case("t") => Ok(DataValue::Boolean(true)),
            DataValue::Text(s) if s.eq_ignore_ascii_case("f") => Ok(DataValue::Boolean(false)),
            other => Err(unexpected("TrueFalseConverter", other)),
        }
    }
}

/// Stores booleans as 1 and 0
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanIntegerConverter;

impl ValueConverter for BooleanIntegerConverter {
    fn domain_class(&self) -> ValueClass {
        ValueClass::Boolean
    }

    fn relational_class(&self) -> ValueClass {
        ValueClass::Integer
    }

    fn to_relational(&self, domain: &DataValue) -> MappingResult<DataValue> {
        match domain {
            DataValue::Null => Ok(DataValue::Null),
            DataValue::Boolean(b) => Ok(DataValue::Integer(if *b { 1 } else { 0 })),
            other => Err(unexpected("BooleanIntegerConverter", other)),
        }
    }

    fn to_domain(&self, relational: &DataValue) -> MappingResult<DataValue> {
        match relational {
            DataValue::Null => Ok(DataValue::Null),
            DataValue::Integer(i) => Ok(DataValue::Boolean(*i != 0)),
            other => Err(unexpected("BooleanIntegerConverter", other)),
        }
    }
}

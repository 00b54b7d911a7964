// Common Value Types
//
// Relational values as they travel between the driver boundary, parameter
// bindings, cached result rows and materialized domain results.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

/// Identity of a long-lived execution object (parameter slot, action, entity instance)
pub type ObjectId = u64;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique object identity
pub fn next_object_id() -> ObjectId {
    NEXT_OBJECT_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

/// A single relational value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Date(String),
    Timestamp(String),
    Blob(Vec<u8>),
}

/// The runtime class of a non-null value, used for type guessing and
/// binding compatibility checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueClass {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    Timestamp,
    Blob,
}

impl fmt::Display for ValueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueClass::Integer => "Integer",
            ValueClass::Float => "Float",
            ValueClass::Text => "Text",
            ValueClass::Boolean => "Boolean",
            ValueClass::Date => "Date",
            ValueClass::Timestamp => "Timestamp",
            ValueClass::Blob => "Blob",
        };
        f.write_str(name)
    }
}

/// Bits a float is compared and hashed by: both zeros are one value and
/// every NaN is one value
fn float_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

impl PartialEq for DataValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DataValue::Null, DataValue::Null) => true,
            (DataValue::Integer(a), DataValue::Integer(b)) => a == b,
            (DataValue::Float(a), DataValue::Float(b)) => float_bits(*a) == float_bits(*b),
            (DataValue::Text(a), DataValue::Text(b)) => a == b,
            (DataValue::Boolean(a), DataValue::Boolean(b)) => a == b,
            (DataValue::Date(a), DataValue::Date(b)) => a == b,
            (DataValue::Timestamp(a), DataValue::Timestamp(b)) => a == b,
            (DataValue::Blob(a), DataValue::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DataValue {}

impl Hash for DataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            DataValue::Null => 0u8.hash(state),
            DataValue::Integer(i) => { 1u8.hash(state); i.hash(state); }
            DataValue::Float(f) => { 2u8.hash(state); float_bits(*f).hash(state); }
            DataValue::Text(s) => { 3u8.hash(state); s.hash(state); }
            DataValue::Boolean(b) => { 4u8.hash(state); b.hash(state); }
            DataValue::Date(s) => { 5u8.hash(state); s.hash(state); }
            DataValue::Timestamp(s) => { 6u8.hash(state); s.hash(state); }
            DataValue::Blob(b) => { 7u8.hash(state); b.hash(state); }
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "NULL"),
            DataValue::Integer(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::Text(s) => write!(f, "'{}'", s),
            DataValue::Boolean(b) => write!(f, "{}", b),
            DataValue::Date(s) => write!(f, "DATE '{}'", s),
            DataValue::Timestamp(s) => write!(f, "TIMESTAMP '{}'", s),
            DataValue::Blob(b) => write!(f, "X'{}'", hex::encode(b)),
        }
    }
}

impl PartialOrd for DataValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (DataValue::Null, DataValue::Null) => Some(Ordering::Equal),
            (DataValue::Null, _) => Some(Ordering::Less),
            (_, DataValue::Null) => Some(Ordering::Greater),

            (DataValue::Integer(a), DataValue::Integer(b)) => a.partial_cmp(b),
            (DataValue::Float(a), DataValue::Float(b)) => a.partial_cmp(b),
            (DataValue::Integer(a), DataValue::Float(b)) => (*a as f64).partial_cmp(b),
            (DataValue::Float(a), DataValue::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (DataValue::Text(a), DataValue::Text(b)) => Some(a.cmp(b)),
            (DataValue::Boolean(a), DataValue::Boolean(b)) => a.partial_cmp(b),
            (DataValue::Date(a), DataValue::Date(b)) => Some(a.cmp(b)),
            (DataValue::Timestamp(a), DataValue::Timestamp(b)) => Some(a.cmp(b)),
            (DataValue::Blob(a), DataValue::Blob(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl DataValue {
    /// Runtime class of the value, `None` for SQL NULL
    pub fn value_class(&self) -> Option<ValueClass> {
        match self {
            DataValue::Null => None,
            DataValue::Integer(_) => Some(ValueClass::Integer),
            DataValue::Float(_) => Some(ValueClass::Float),
            DataValue::Text(_) => Some(ValueClass::Text),
            DataValue::Boolean(_) => Some(ValueClass::Boolean),
            DataValue::Date(_) => Some(ValueClass::Date),
            DataValue::Timestamp(_) => Some(ValueClass::Timestamp),
            DataValue::Blob(_) => Some(ValueClass::Blob),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            DataValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Render the value for log output, truncating long text and blobs
    pub fn to_log_string(&self) -> String {
        const MAX_LOGGED_LEN: usize = 64;
        match self {
            DataValue::Text(s) if s.len() > MAX_LOGGED_LEN => {
                let cut = s.char_indices().nth(MAX_LOGGED_LEN).map(|(i, _)| i).unwrap_or(s.len());
                format!("'{}...'", &s[..cut])
            }
            DataValue::Blob(b) if b.len() > MAX_LOGGED_LEN / 2 => {
                format!("X'{}...' ({} bytes)", hex::encode(&b[..MAX_LOGGED_LEN / 2]), b.len())
            }
            other => other.to_string(),
        }
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Integer(value)
    }
}

impl From<i32> for DataValue {
    fn from(value: i32) -> Self {
        DataValue::Integer(value as i64)
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        DataValue::Float(value)
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Boolean(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::Text(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::Text(value)
    }
}

impl<T: Into<DataValue>> From<Option<T>> for DataValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(DataValue::Null)
    }
}

// Driver Boundary Module
//
// This module defines the relational driver protocol the execution layer is
// written against: connections, plain and prepared statements, callable
// statements and forward-only result sets. Parameter and column positions are
// 1-based, matching the positional `?` placeholder convention.

pub mod error;
pub mod scripted;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::types::DataValue;

pub use self::error::{SqlError, SqlResult};

/// Relational type codes, mirroring the driver's type constants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Null,
    Integer,
    BigInt,
    SmallInt,
    Double,
    Numeric,
    Varchar,
    Char,
    Boolean,
    Date,
    Timestamp,
    Blob,
    RefCursor,
    Other,
}

impl SqlType {
    /// Numeric type code as exposed by the driver
    pub fn code(&self) -> i32 {
        match self {
            SqlType::Null => 0,
            SqlType::Integer => 4,
            SqlType::BigInt => -5,
            SqlType::SmallInt => 5,
            SqlType::Double => 8,
            SqlType::Numeric => 2,
            SqlType::Varchar => 12,
            SqlType::Char => 1,
            SqlType::Boolean => 16,
            SqlType::Date => 91,
            SqlType::Timestamp => 93,
            SqlType::Blob => 2004,
            SqlType::RefCursor => 2012,
            SqlType::Other => 1111,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Cursor mode requested when a statement is prepared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScrollMode {
    #[default]
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

/// Label and type of one result-set column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub label: String,
    pub sql_type: SqlType,
}

impl ColumnMetadata {
    pub fn new(label: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            label: label.into(),
            sql_type,
        }
    }
}

/// Column metadata of a result set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSetMetadata {
    columns: Vec<ColumnMetadata>,
}

impl ResultSetMetadata {
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        Self { columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Metadata of the 0-based column
    pub fn column(&self, index: usize) -> Option<&ColumnMetadata> {
        self.columns.get(index)
    }

    /// 0-based index of the column carrying `label`, compared case-insensitively
    pub fn resolve_column(&self, label: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.label.eq_ignore_ascii_case(label))
    }
}

/// A borrowed database connection. The execution layer never closes it.
pub trait Connection {
    /// Prepare a parameterized statement
    fn prepare_statement(&mut self, sql: &str, scroll_mode: ScrollMode) -> SqlResult<Box<dyn PreparedStatement>>;

    /// Prepare a stored-procedure call
    fn prepare_call(&mut self, sql: &str) -> SqlResult<Box<dyn CallableStatement>>;

    /// Create a plain statement for ad hoc SQL
    fn create_statement(&mut self) -> SqlResult<Box<dyn Statement>>;
}

/// A plain, unparameterized statement
pub trait Statement {
    fn execute_query(&mut self, sql: &str) -> SqlResult<Box<dyn ResultSet>>;

    fn execute_update(&mut self, sql: &str) -> SqlResult<u64>;

    fn close(&mut self) -> SqlResult<()>;
}

/// A statement with positional `?` parameters
pub trait PreparedStatement {
    fn sql(&self) -> &str;

    fn set_value(&mut self, position: usize, value: &DataValue, sql_type: SqlType) -> SqlResult<()>;

    fn set_null(&mut self, position: usize, sql_type: SqlType) -> SqlResult<()>;

    fn set_query_timeout(&mut self, seconds: u32) -> SqlResult<()>;

    fn set_fetch_size(&mut self, rows: u32) -> SqlResult<()>;

    fn set_max_rows(&mut self, rows: u32) -> SqlResult<()>;

    fn execute_query(&mut self) -> SqlResult<Box<dyn ResultSet>>;

    fn execute_update(&mut self) -> SqlResult<u64>;

    fn close(&mut self) -> SqlResult<()>;
}

/// A stored-procedure call
pub trait CallableStatement {
    /// Positional view of the call, used for positional IN binding and
    /// statement settings
    fn as_prepared(&mut self) -> &mut dyn PreparedStatement;

    fn set_named_value(&mut self, name: &str, value: &DataValue, sql_type: SqlType) -> SqlResult<()>;

    fn set_named_null(&mut self, name: &str, sql_type: SqlType) -> SqlResult<()>;

    fn register_out_parameter(&mut self, position: usize, sql_type: SqlType) -> SqlResult<()>;

    fn register_named_out_parameter(&mut self, name: &str, sql_type: SqlType) -> SqlResult<()>;

    fn get_out_value(&mut self, position: usize, sql_type: SqlType) -> SqlResult<DataValue>;

    fn get_named_out_value(&mut self, name: &str, sql_type: SqlType) -> SqlResult<DataValue>;

    fn get_ref_cursor(&mut self, position: usize) -> SqlResult<Box<dyn ResultSet>>;

    fn get_named_ref_cursor(&mut self, name: &str) -> SqlResult<Box<dyn ResultSet>>;

    /// Execute the call; `true` when the first result is a result set
    fn execute(&mut self) -> SqlResult<bool>;

    fn result_set(&mut self) -> SqlResult<Option<Box<dyn ResultSet>>>;

    fn update_count(&mut self) -> SqlResult<Option<u64>>;

    fn close(&mut self) -> SqlResult<()>;
}

/// A forward-only cursor over query results
pub trait ResultSet {
    fn next(&mut self) -> SqlResult<bool>;

    /// Read the 1-based column of the current row
    fn get_value(&mut self, column: usize, sql_type: SqlType) -> SqlResult<DataValue>;

    fn metadata(&self) -> SqlResult<ResultSetMetadata>;

    fn close(&mut self) -> SqlResult<()>;
}

// Common Module
//
// Value types and settings shared by every layer of the execution pipeline.

pub mod types;
pub mod config;

pub use self::types::{DataValue, ValueClass, ObjectId, next_object_id};
pub use self::config::{ExecutorSettings, MissingBindingPolicy};

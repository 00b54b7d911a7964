// sqlexec
//
// SQL execution layer of an object/relational mapper: binds parameters,
// runs selects, mutations and calls through a driver, reads rows into
// domain results and keeps the session state they touch in step.

pub mod cache;
pub mod common;
pub mod dialect;
pub mod exec;
pub mod jdbc;
pub mod mapping;
pub mod session;
pub mod stats;

// Re-export key items for convenient access
pub use common::{DataValue, ExecutorSettings};
pub use exec::{
    ExecError, ExecResult, ExecutionContext, JdbcCallExecutor, JdbcMutation, JdbcSelect, QueryOptions,
    StandardJdbcMutationExecutor, StandardJdbcSelectExecutor,
};
pub use session::{SessionContext, SessionFactory};

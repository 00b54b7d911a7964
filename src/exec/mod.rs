// SQL Execution Module
//
// This module executes translated operations against the driver: parameter
// binding, select execution with result caching and row consumption,
// mutations, stored procedure calls, and the pre/post actions that apply
// lock timeouts and follow-on locks around a select.

pub mod action;
pub mod binder;
pub mod call;
pub mod context;
pub mod domain;
pub mod error;
pub mod follow_on;
pub mod loaded;
pub mod lock_timeout;
pub mod mutation;
pub mod operation;
pub mod options;
pub mod parameter;
pub mod results;
pub mod row;
pub mod scroll;
pub mod select;
pub mod statement;
pub mod values;

// Export key types
pub use self::action::{ActionMemo, JdbcActions, JdbcActionsBuilder, PostAction, PreAction, StatementAccess};
pub use self::binder::{CompositeParameterBinder, ParameterBinder, VersionSeedParameterBinder};
pub use self::call::{
    CallOutputs, CallResult, FunctionReturn, JdbcCall, JdbcCallExecutor, JdbcCallParameterRegistration, ParameterMode,
    RefCursorExtractor, StandardRefCursorExtractor,
};
pub use self::context::{Callback, ExecutionContext};
pub use self::domain::{create_bindings, BindValue, ParameterSlots, QueryParameterBinding, QueryParameterBindings};
pub use self::error::{ExecError, ExecResult, SqlExceptionHelper};
pub use self::follow_on::FollowOnLockingAction;
pub use self::loaded::{LoadedValuesCollector, NavigablePath};
pub use self::lock_timeout::LockTimeoutHandler;
pub use self::mutation::{Expectation, NoExpectation, RowCountExpectation, StandardJdbcMutationExecutor};
pub use self::operation::{JdbcMutation, JdbcOperation, JdbcSelect, LockStrategy, MutationKind};
pub use self::options::{CacheMode, Limit, LockMode, LockOptions, QueryOptions, Timeout, TupleTransformer};
pub use self::parameter::{JdbcParameter, JdbcParameterBinding, JdbcParameterBindings};
pub use self::results::{
    ListResultsConsumer, ResultsConsumer, ScrollableResultsConsumer, SingleResultConsumer, UniqueSemantic,
};
pub use self::row::{
    ColumnsMappingProducer, DomainResult, DomainValue, FromDomainValue, JdbcValuesMappingProducer, RowTransformer,
};
pub use self::scroll::ScrollableResults;
pub use self::select::StandardJdbcSelectExecutor;
pub use self::statement::{StandardStatementCreator, StatementCreator};

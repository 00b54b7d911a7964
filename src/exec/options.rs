// Query Options
//
// Per-execution options: pagination, timeouts, fetch size, read-only
// policy, cache mode, locking, comments and hints, and the tuple
// transformer applied to result rows.

use std::fmt;
use std::sync::Arc;

use crate::exec::row::DomainValue;

/// Pagination requested for a select
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Limit {
    pub first_row: Option<u32>,
    pub max_rows: Option<u32>,
}

impl Limit {
    /// No pagination
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(first_row: Option<u32>, max_rows: Option<u32>) -> Self {
        Self { first_row, max_rows }
    }

    pub fn max_rows(max_rows: u32) -> Self {
        Self {
            first_row: None,
            max_rows: Some(max_rows),
        }
    }

    /// True when neither an offset nor a row limit is requested
    pub fn is_empty(&self) -> bool {
        self.first_row.is_none() && self.max_rows.is_none()
    }

    pub fn first_row_or(&self, default: u32) -> u32 {
        self.first_row.unwrap_or(default)
    }

    pub fn max_rows_or(&self, default: u32) -> u32 {
        self.max_rows.unwrap_or(default)
    }
}

/// How a query interacts with the result cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CacheMode {
    /// Read from and write to the cache
    #[default]
    Normal,
    /// Neither read nor write
    Ignore,
    /// Read only
    Get,
    /// Write only
    Put,
    /// Write only, replacing existing entries
    Refresh,
}

impl CacheMode {
    pub fn is_get_enabled(&self) -> bool {
        matches!(self, CacheMode::Normal | CacheMode::Get)
    }

    pub fn is_put_enabled(&self) -> bool {
        matches!(self, CacheMode::Normal | CacheMode::Put | CacheMode::Refresh)
    }
}

/// Lock requested for the rows a query reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockMode {
    #[default]
    None,
    Read,
    Optimistic,
    OptimisticForceIncrement,
    PessimisticRead,
    PessimisticWrite,
    PessimisticForceIncrement,
}

impl LockMode {
    /// Whether the lock is taken on database rows
    pub fn is_pessimistic(&self) -> bool {
        matches!(
            self,
            LockMode::PessimisticRead | LockMode::PessimisticWrite | LockMode::PessimisticForceIncrement
        )
    }
}

/// How long a lock request may wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Timeout {
    #[default]
    WaitForever,
    NoWait,
    SkipLocked,
    Millis(u64),
}

/// Locking requested for a query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockOptions {
    pub mode: LockMode,
    pub timeout: Timeout,
    /// Force or forbid follow-on locking; `None` lets the executor decide
    pub follow_on_locking: Option<bool>,
}

impl LockOptions {
    pub fn new(mode: LockMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_follow_on_locking(mut self, follow_on: bool) -> Self {
        self.follow_on_locking = Some(follow_on);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mode == LockMode::None && self.timeout == Timeout::WaitForever
    }
}

/// Reshapes one row of domain values into a single result
pub trait TupleTransformer: Send + Sync {
    fn transform_tuple(&self, tuple: Vec<DomainValue>, aliases: &[String]) -> DomainValue;
}

impl<F> TupleTransformer for F
where
    F: Fn(Vec<DomainValue>, &[String]) -> DomainValue + Send + Sync,
{
    fn transform_tuple(&self, tuple: Vec<DomainValue>, aliases: &[String]) -> DomainValue {
        self(tuple, aliases)
    }
}

/// Options of a single query execution
#[derive(Clone, Default)]
pub struct QueryOptions {
    pub limit: Limit,
    /// Statement timeout in seconds
    pub timeout: Option<u32>,
    pub fetch_size: Option<u32>,
    /// Read-only policy for entities this query loads; `None` keeps the
    /// session default
    pub read_only: Option<bool>,
    pub cache_mode: CacheMode,
    /// Query-level opt-in for the result cache
    pub result_caching_enabled: Option<bool>,
    pub result_cache_region: Option<String>,
    pub lock_options: LockOptions,
    pub comment: Option<String>,
    pub database_hints: Vec<String>,
    pub tuple_transformer: Option<Arc<dyn TupleTransformer>>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: Limit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_fetch_size(mut self, rows: u32) -> Self {
        self.fetch_size = Some(rows);
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn with_result_caching(mut self, enabled: bool) -> Self {
        self.result_caching_enabled = Some(enabled);
        self
    }

    pub fn with_lock_options(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = lock_options;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.database_hints.push(hint.into());
        self
    }

    pub fn with_tuple_transformer(mut self, transformer: Arc<dyn TupleTransformer>) -> Self {
        self.tuple_transformer = Some(transformer);
        self
    }

    pub fn is_result_caching_enabled(&self) -> bool {
        self.result_caching_enabled == Some(true)
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("limit", &self.limit)
            .field("timeout", &self.timeout)
            .field("fetch_size", &self.fetch_size)
            .field("read_only", &self.read_only)
            .field("cache_mode", &self.cache_mode)
            .field("result_caching_enabled", &self.result_caching_enabled)
            .field("lock_options", &self.lock_options)
            .field("comment", &self.comment)
            .field("tuple_transformer", &self.tuple_transformer.is_some())
            .finish()
    }
}

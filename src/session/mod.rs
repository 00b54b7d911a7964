// Session Module
//
// The factory holds what every session shares (dialect, settings, result
// cache, statistics, type registry). A session owns one borrowed
// connection, its persistence context and the set of tables with
// unflushed changes.

pub mod coordinator;
pub mod persistence;

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, warn};

use crate::cache::{QueryResultsCache, StandardQueryResultsCache, UpdateTimestampsCache};
use crate::common::config::ExecutorSettings;
use crate::dialect::Dialect;
use crate::exec::error::{ExecResult, SqlExceptionHelper};
use crate::jdbc::Connection;
use crate::mapping::registry::BasicTypeRegistry;
use crate::stats::{StatisticsImpl, StatisticsImplementor};

pub use self::coordinator::JdbcCoordinator;
pub use self::persistence::PersistenceContext;

/// Flushes the pending changes of a session; receives the tables that
/// have unflushed changes
pub type FlushHandler = Rc<dyn Fn(&SessionContext, &[String]) -> ExecResult<()>>;

/// State shared by every session
pub struct SessionFactory {
    dialect: Arc<dyn Dialect>,
    settings: ExecutorSettings,
    query_results_cache: Arc<dyn QueryResultsCache>,
    update_timestamps: Arc<UpdateTimestampsCache>,
    statistics: Arc<dyn StatisticsImplementor>,
    type_registry: Arc<BasicTypeRegistry>,
}

impl SessionFactory {
    pub fn builder(dialect: Arc<dyn Dialect>) -> SessionFactoryBuilder {
        SessionFactoryBuilder::new(dialect)
    }

    /// Open a session over a connection borrowed from the caller
    pub fn open_session(self: &Arc<Self>, connection: Box<dyn Connection>) -> SessionContext {
        SessionContext::new(self.clone(), connection)
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn query_results_cache(&self) -> &dyn QueryResultsCache {
        self.query_results_cache.as_ref()
    }

    pub fn update_timestamps(&self) -> &UpdateTimestampsCache {
        &self.update_timestamps
    }

    pub fn statistics(&self) -> &dyn StatisticsImplementor {
        self.statistics.as_ref()
    }

    pub fn type_registry(&self) -> &BasicTypeRegistry {
        &self.type_registry
    }

    pub fn sql_exception_helper(&self) -> SqlExceptionHelper<'_> {
        SqlExceptionHelper::new(self.dialect.as_ref())
    }
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("dialect", &self.dialect.name())
            .field("settings", &self.settings)
            .field("query_results_region", &self.query_results_cache.region_name())
            .finish()
    }
}

/// Builder for a [`SessionFactory`]
pub struct SessionFactoryBuilder {
    dialect: Arc<dyn Dialect>,
    settings: ExecutorSettings,
    update_timestamps: Option<Arc<UpdateTimestampsCache>>,
    query_results_cache: Option<Arc<dyn QueryResultsCache>>,
    statistics: Option<Arc<dyn StatisticsImplementor>>,
    type_registry: Option<Arc<BasicTypeRegistry>>,
}

impl SessionFactoryBuilder {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self {
            dialect,
            settings: ExecutorSettings::default(),
            update_timestamps: None,
            query_results_cache: None,
            statistics: None,
            type_registry: None,
        }
    }

    pub fn settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn update_timestamps(mut self, timestamps: Arc<UpdateTimestampsCache>) -> Self {
        self.update_timestamps = Some(timestamps);
        self
    }

    pub fn query_results_cache(mut self, cache: Arc<dyn QueryResultsCache>) -> Self {
        self.query_results_cache = Some(cache);
        self
    }

    pub fn statistics(mut self, statistics: Arc<dyn StatisticsImplementor>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    pub fn type_registry(mut self, registry: Arc<BasicTypeRegistry>) -> Self {
        self.type_registry = Some(registry);
        self
    }

    pub fn build(self) -> Arc<SessionFactory> {
        let update_timestamps = self.update_timestamps.unwrap_or_default();
        let query_results_cache = self
            .query_results_cache
            .unwrap_or_else(|| Arc::new(StandardQueryResultsCache::new(update_timestamps.clone())) as Arc<dyn QueryResultsCache>);
        let statistics = self
            .statistics
            .unwrap_or_else(|| Arc::new(StatisticsImpl::new(self.settings.statistics_enabled)) as Arc<dyn StatisticsImplementor>);
        Arc::new(SessionFactory {
            dialect: self.dialect,
            settings: self.settings,
            query_results_cache,
            update_timestamps,
            statistics,
            type_registry: self.type_registry.unwrap_or_else(BasicTypeRegistry::default_instance),
        })
    }
}

/// Per-session state consulted by the executors
pub struct SessionContext {
    factory: Arc<SessionFactory>,
    jdbc_coordinator: JdbcCoordinator,
    persistence_context: RefCell<PersistenceContext>,
    pending_tables: RefCell<BTreeSet<String>>,
    flush_handler: RefCell<Option<FlushHandler>>,
}

impl SessionContext {
    pub fn new(factory: Arc<SessionFactory>, connection: Box<dyn Connection>) -> Self {
        Self {
            factory,
            jdbc_coordinator: JdbcCoordinator::new(connection),
            persistence_context: RefCell::new(PersistenceContext::new()),
            pending_tables: RefCell::new(BTreeSet::new()),
            flush_handler: RefCell::new(None),
        }
    }

    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.factory.dialect()
    }

    pub fn settings(&self) -> &ExecutorSettings {
        self.factory.settings()
    }

    pub fn jdbc_coordinator(&self) -> &JdbcCoordinator {
        &self.jdbc_coordinator
    }

    pub fn persistence_context(&self) -> Ref<'_, PersistenceContext> {
        self.persistence_context.borrow()
    }

    pub fn persistence_context_mut(&self) -> RefMut<'_, PersistenceContext> {
        self.persistence_context.borrow_mut()
    }

    /// Apply `read_only` as the default read-only policy until the
    /// returned guard is dropped; `None` leaves the policy untouched
    pub fn override_default_read_only(&self, read_only: Option<bool>) -> ReadOnlyOverride<'_> {
        let previous = read_only.map(|read_only| {
            let mut context = self.persistence_context.borrow_mut();
            let previous = context.is_default_read_only();
            context.set_default_read_only(read_only);
            previous
        });
        ReadOnlyOverride { session: self, previous }
    }

    /// Record unflushed changes against `table`
    pub fn mark_pending(&self, table: impl Into<String>) {
        self.pending_tables.borrow_mut().insert(table.into().to_ascii_lowercase());
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending_tables.borrow().is_empty()
    }

    pub fn set_flush_handler(&self, handler: FlushHandler) {
        *self.flush_handler.borrow_mut() = Some(handler);
    }

    /// Flush when any of `tables` has unflushed changes. Returns whether a
    /// flush happened. A failed flush leaves the changes pending.
    pub fn auto_flush_if_required<'t, I>(&self, tables: I) -> ExecResult<bool>
    where
        I: IntoIterator<Item = &'t String>,
    {
        let overlaps = {
            let pending = self.pending_tables.borrow();
            !pending.is_empty() && tables.into_iter().any(|t| pending.contains(&t.to_ascii_lowercase()))
        };
        if !overlaps {
            return Ok(false);
        }
        let flushed: Vec<String> = std::mem::take(&mut *self.pending_tables.borrow_mut()).into_iter().collect();
        debug!("Auto-flushing pending changes to {:?}", flushed);
        let handler = self.flush_handler.borrow().clone();
        if let Some(handler) = handler {
            if let Err(e) = handler(self, &flushed) {
                warn!("Auto-flush of {:?} failed: {}", flushed, e);
                self.pending_tables.borrow_mut().extend(flushed);
                return Err(e);
            }
        }
        Ok(true)
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("jdbc_coordinator", &self.jdbc_coordinator)
            .field("pending_tables", &self.pending_tables.borrow())
            .finish()
    }
}

/// Restores the session's default read-only policy when dropped
pub struct ReadOnlyOverride<'a> {
    session: &'a SessionContext,
    previous: Option<bool>,
}

impl Drop for ReadOnlyOverride<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous {
            self.session.persistence_context.borrow_mut().set_default_read_only(previous);
        }
    }
}

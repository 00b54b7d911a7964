// Execution Context
//
// Everything one execution needs from its caller: the session, the query
// options, the identifier statistics are recorded under, and the optional
// collaborators that observe loading.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use log::trace;

use crate::exec::loaded::LoadedValuesCollector;
use crate::exec::options::QueryOptions;
use crate::mapping::entity::EntityInstance;
use crate::session::SessionContext;

/// Action run for each entity a select loaded, once its rows are consumed
pub type AfterLoadAction = Box<dyn Fn(&Arc<EntityInstance>, &SessionContext)>;

/// After-load actions registered for one execution
#[derive(Default)]
pub struct Callback {
    actions: RefCell<Vec<AfterLoadAction>>,
}

impl Callback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_after_load_action<F>(&self, action: F)
    where
        F: Fn(&Arc<EntityInstance>, &SessionContext) + 'static,
    {
        self.actions.borrow_mut().push(Box::new(action));
    }

    pub fn invoke_after_load_actions(&self, entity: &Arc<EntityInstance>, session: &SessionContext) {
        trace!("Invoking after-load actions for {}#{}", entity.entity_name(), entity.id());
        for action in self.actions.borrow().iter() {
            action(entity, session);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.borrow().is_empty()
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("actions", &self.actions.borrow().len())
            .finish()
    }
}

/// Context of a single execution
#[derive(Clone)]
pub struct ExecutionContext<'a> {
    session: &'a SessionContext,
    query_options: QueryOptions,
    query_identifier: Option<String>,
    loaded_values_collector: Option<Rc<LoadedValuesCollector>>,
    callback: Option<Rc<Callback>>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(session: &'a SessionContext) -> Self {
        Self {
            session,
            query_options: QueryOptions::default(),
            query_identifier: None,
            loaded_values_collector: None,
            callback: None,
        }
    }

    pub fn with_query_options(mut self, options: QueryOptions) -> Self {
        self.query_options = options;
        self
    }

    /// Record statistics under `identifier` instead of the SQL text
    pub fn with_query_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.query_identifier = Some(identifier.into());
        self
    }

    pub fn with_loaded_values_collector(mut self, collector: Rc<LoadedValuesCollector>) -> Self {
        self.loaded_values_collector = Some(collector);
        self
    }

    pub fn with_callback(mut self, callback: Rc<Callback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn session(&self) -> &'a SessionContext {
        self.session
    }

    pub fn query_options(&self) -> &QueryOptions {
        &self.query_options
    }

    /// Identifier statistics are recorded under
    pub fn query_identifier<'s>(&'s self, sql: &'s str) -> &'s str {
        self.query_identifier.as_deref().unwrap_or(sql)
    }

    pub fn loaded_values_collector(&self) -> Option<&Rc<LoadedValuesCollector>> {
        self.loaded_values_collector.as_ref()
    }

    pub fn callback(&self) -> Option<&Rc<Callback>> {
        self.callback.as_ref()
    }
}

impl fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("query_options", &self.query_options)
            .field("query_identifier", &self.query_identifier)
            .field("collects_loaded_values", &self.loaded_values_collector.is_some())
            .finish()
    }
}

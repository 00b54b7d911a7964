// Executor Settings
//
// Factory-level switches consulted by the select, mutation and call
// executors. Settings are shared by every session of a factory.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised while loading settings
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Invalid settings document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

/// What a parameter binder does when its slot has no binding at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingBindingPolicy {
    /// Fail with a "parameter not bound" error
    Fail,
    /// Leave the slot untouched and let the database apply its default
    UseDatabaseDefault,
}

/// Configuration for the execution layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Whether query and cache statistics are recorded
    pub statistics_enabled: bool,

    /// Factory-level opt-in for the query result cache
    pub query_cache_enabled: bool,

    /// Pad multi-valued parameter expansions to a stable bind count
    pub in_clause_parameter_padding: bool,

    /// Behavior for parameter slots without any binding
    pub missing_binding_policy: MissingBindingPolicy,

    /// Whether query comments are rendered into the SQL text
    pub comments_enabled: bool,

    /// Fetch size applied to select statements when the query sets none
    pub default_fetch_size: Option<u32>,

    /// Bind stored-procedure parameters by name when the dialect allows it
    pub prefer_named_call_parameters: bool,

    /// Include bound values in trace output
    pub log_parameter_values: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            statistics_enabled: false,
            query_cache_enabled: false,
            in_clause_parameter_padding: false,
            missing_binding_policy: MissingBindingPolicy::Fail,
            comments_enabled: false,
            default_fetch_size: None,
            prefer_named_call_parameters: true,
            log_parameter_values: false,
        }
    }
}

impl ExecutorSettings {
    /// Load settings from a JSON document; absent keys keep their defaults
    pub fn from_json(document: &str) -> Result<Self, SettingsError> {
        let settings: ExecutorSettings = serde_json::from_str(document)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.default_fetch_size == Some(0) {
            return Err(SettingsError::InvalidValue(
                "default_fetch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

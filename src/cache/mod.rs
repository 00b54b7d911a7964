// Query Result Cache
//
// Results of cacheable selects keyed by SQL text, pagination and bound
// parameter values. Entries are validated against the invalidation
// timestamps of the tables the query reads.

pub mod timestamps;

use std::fmt;
use std::sync::Arc;

use linked_hash_map::LinkedHashMap;
use log::trace;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::common::types::DataValue;
use crate::exec::error::{ExecError, ExecResult};
use crate::exec::options::Limit;
use crate::jdbc::ResultSetMetadata;

pub use self::timestamps::UpdateTimestampsCache;

/// Default region of the query result cache
pub const DEFAULT_QUERY_RESULTS_REGION: &str = "default-query-results-region";

/// Identity of a cached query result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    sql: String,
    first_row: Option<u32>,
    max_rows: Option<u32>,
    parameter_values: Vec<DataValue>,
}

impl QueryKey {
    /// Build the key for `sql` executed with `limit`. `parameter_values`
    /// must be in statement position order.
    pub fn new(sql: &str, limit: &Limit, parameter_values: Vec<DataValue>) -> Self {
        Self {
            sql: sql.to_string(),
            first_row: limit.first_row,
            max_rows: limit.max_rows,
            parameter_values,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_values(&self) -> &[DataValue] {
        &self.parameter_values
    }
}

/// Rows and column metadata of a cached result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResults {
    pub metadata: ResultSetMetadata,
    pub rows: Vec<Vec<DataValue>>,
}

/// Storage for cached query results
pub trait QueryResultsCache: Send + Sync {
    fn region_name(&self) -> &str;

    /// Cached results for `key`, if present and newer than the last
    /// invalidation of every table in `spaces`
    fn get(&self, key: &QueryKey, spaces: &[String]) -> ExecResult<Option<CachedResults>>;

    /// Store results; returns whether the entry was written
    fn put(&self, key: QueryKey, results: &CachedResults) -> ExecResult<bool>;

    fn clear(&self);
}

struct CacheEntry {
    timestamp: u64,
    payload: Vec<u8>,
}

/// In-memory result cache with least-recently-used eviction. Rows are
/// stored bincode-encoded so cached data never aliases live results.
pub struct StandardQueryResultsCache {
    region: String,
    max_entries: usize,
    entries: Mutex<LinkedHashMap<QueryKey, CacheEntry>>,
    timestamps: Arc<UpdateTimestampsCache>,
}

impl StandardQueryResultsCache {
    pub fn new(timestamps: Arc<UpdateTimestampsCache>) -> Self {
        Self::with_capacity(DEFAULT_QUERY_RESULTS_REGION, 1024, timestamps)
    }

    pub fn with_capacity(region: impl Into<String>, max_entries: usize, timestamps: Arc<UpdateTimestampsCache>) -> Self {
        Self {
            region: region.into(),
            max_entries: max_entries.max(1),
            entries: Mutex::new(LinkedHashMap::new()),
            timestamps,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl QueryResultsCache for StandardQueryResultsCache {
    fn region_name(&self) -> &str {
        &self.region
    }

    fn get(&self, key: &QueryKey, spaces: &[String]) -> ExecResult<Option<CachedResults>> {
        let mut entries = self.entries.lock();
        let (timestamp, payload) = match entries.get_refresh(key) {
            Some(entry) => (entry.timestamp, entry.payload.clone()),
            None => {
                trace!("Query results were not found in cache");
                return Ok(None);
            }
        };
        if !self.timestamps.is_up_to_date(spaces, timestamp) {
            trace!("Cached query results were not up-to-date");
            entries.remove(key);
            return Ok(None);
        }
        drop(entries);
        let results: CachedResults = bincode::deserialize(&payload)
            .map_err(|e| ExecError::ResultCache(format!("Failed to decode cached results: {}", e)))?;
        trace!("Returning cached query results ({} rows)", results.rows.len());
        Ok(Some(results))
    }

    fn put(&self, key: QueryKey, results: &CachedResults) -> ExecResult<bool> {
        let payload = bincode::serialize(results)
            .map_err(|e| ExecError::ResultCache(format!("Failed to encode query results: {}", e)))?;
        let timestamp = self.timestamps.next_timestamp();
        let mut entries = self.entries.lock();
        entries.insert(key, CacheEntry { timestamp, payload });
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
        trace!("Cached query results ({} rows) at timestamp {}", results.rows.len(), timestamp);
        Ok(true)
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl fmt::Debug for StandardQueryResultsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardQueryResultsCache")
            .field("region", &self.region)
            .field("entries", &self.len())
            .finish()
    }
}

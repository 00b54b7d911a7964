// Statistics
//
// Counters for query executions and result cache traffic, recorded only
// while statistics are enabled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::debug;
use parking_lot::Mutex;

/// Receiver of execution statistics
pub trait StatisticsImplementor: Send + Sync {
    fn is_statistics_enabled(&self) -> bool;

    fn query_executed(&self, sql: &str, rows: usize, time_ms: u64);

    fn query_cache_hit(&self, sql: &str, region: &str);

    fn query_cache_miss(&self, sql: &str, region: &str);

    fn query_cache_put(&self, sql: &str, region: &str);
}

/// Statistics of one SQL statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStatistics {
    pub execution_count: u64,
    pub execution_row_count: u64,
    pub execution_total_time: u64,
    pub execution_max_time: u64,
    pub execution_min_time: Option<u64>,
    pub cache_hit_count: u64,
    pub cache_miss_count: u64,
    pub cache_put_count: u64,
}

impl QueryStatistics {
    /// Average execution time in milliseconds
    pub fn execution_avg_time(&self) -> u64 {
        if self.execution_count == 0 {
            0
        } else {
            self.execution_total_time / self.execution_count
        }
    }
}

/// Default in-memory statistics
#[derive(Debug)]
pub struct StatisticsImpl {
    enabled: AtomicBool,
    query_execution_count: AtomicU64,
    query_cache_hit_count: AtomicU64,
    query_cache_miss_count: AtomicU64,
    query_cache_put_count: AtomicU64,
    query_execution_max_time: AtomicU64,
    per_query: Mutex<HashMap<String, QueryStatistics>>,
}

impl StatisticsImpl {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            query_execution_count: AtomicU64::new(0),
            query_cache_hit_count: AtomicU64::new(0),
            query_cache_miss_count: AtomicU64::new(0),
            query_cache_put_count: AtomicU64::new(0),
            query_execution_max_time: AtomicU64::new(0),
            per_query: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_statistics_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn query_execution_count(&self) -> u64 {
        self.query_execution_count.load(Ordering::Acquire)
    }

    pub fn query_cache_hit_count(&self) -> u64 {
        self.query_cache_hit_count.load(Ordering::Acquire)
    }

    pub fn query_cache_miss_count(&self) -> u64 {
        self.query_cache_miss_count.load(Ordering::Acquire)
    }

    pub fn query_cache_put_count(&self) -> u64 {
        self.query_cache_put_count.load(Ordering::Acquire)
    }

    pub fn query_execution_max_time(&self) -> u64 {
        self.query_execution_max_time.load(Ordering::Acquire)
    }

    /// Statistics recorded for `sql`
    pub fn query_statistics(&self, sql: &str) -> QueryStatistics {
        self.per_query.lock().get(sql).cloned().unwrap_or_default()
    }

    /// Every SQL statement with recorded statistics
    pub fn queries(&self) -> Vec<String> {
        self.per_query.lock().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.query_execution_count.store(0, Ordering::Release);
        self.query_cache_hit_count.store(0, Ordering::Release);
        self.query_cache_miss_count.store(0, Ordering::Release);
        self.query_cache_put_count.store(0, Ordering::Release);
        self.query_execution_max_time.store(0, Ordering::Release);
        self.per_query.lock().clear();
    }

    fn with_query<F: FnOnce(&mut QueryStatistics)>(&self, sql: &str, update: F) {
        let mut per_query = self.per_query.lock();
        update(per_query.entry(sql.to_string()).or_default());
    }
}

impl Default for StatisticsImpl {
    fn default() -> Self {
        Self::new(false)
    }
}

impl StatisticsImplementor for StatisticsImpl {
    fn is_statistics_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn query_executed(&self, sql: &str, rows: usize, time_ms: u64) {
        debug!("Query executed in {} ms, {} rows: {}", time_ms, rows, sql);
        self.query_execution_count.fetch_add(1, Ordering::AcqRel);
        self.query_execution_max_time.fetch_max(time_ms, Ordering::AcqRel);
        self.with_query(sql, |stats| {
            stats.execution_count += 1;
            stats.execution_row_count += rows as u64;
            stats.execution_total_time += time_ms;
            stats.execution_max_time = stats.execution_max_time.max(time_ms);
            stats.execution_min_time = Some(stats.execution_min_time.map_or(time_ms, |min| min.min(time_ms)));
        });
    }

    fn query_cache_hit(&self, sql: &str, _region: &str) {
        self.query_cache_hit_count.fetch_add(1, Ordering::AcqRel);
        self.with_query(sql, |stats| stats.cache_hit_count += 1);
    }

    fn query_cache_miss(&self, sql: &str, _region: &str) {
        self.query_cache_miss_count.fetch_add(1, Ordering::AcqRel);
        self.with_query(sql, |stats| stats.cache_miss_count += 1);
    }

    fn query_cache_put(&self, sql: &str, _region: &str) {
        self.query_cache_put_count.fetch_add(1, Ordering::AcqRel);
        self.with_query(sql, |stats| stats.cache_put_count += 1);
    }
}

// Update Timestamps
//
// Logical invalidation timestamps per table. A cached result is valid only
// if it was written after the last invalidation of every table it reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use parking_lot::RwLock;

/// Table name to last invalidation timestamp
#[derive(Debug, Default)]
pub struct UpdateTimestampsCache {
    clock: AtomicU64,
    timestamps: RwLock<HashMap<String, u64>>,
}

impl UpdateTimestampsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the logical clock
    pub fn next_timestamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark the tables as changed now
    pub fn invalidate(&self, spaces: &[String]) {
        if spaces.is_empty() {
            return;
        }
        let timestamp = self.next_timestamp();
        let mut timestamps = self.timestamps.write();
        for space in spaces {
            debug!("Invalidating space [{}], timestamp: {}", space, timestamp);
            timestamps.insert(space.to_ascii_lowercase(), timestamp);
        }
    }

    /// Whether a result written at `timestamp` is newer than every
    /// invalidation of `spaces`
    pub fn is_up_to_date(&self, spaces: &[String], timestamp: u64) -> bool {
        let timestamps = self.timestamps.read();
        spaces.iter().all(|space| match timestamps.get(&space.to_ascii_lowercase()) {
            Some(invalidated) => *invalidated < timestamp,
            None => true,
        })
    }

    pub fn clear(&self) {
        self.timestamps.write().clear();
    }
}

//! Bounded dedup store for trigger identifiers

use std::collections::HashMap;

/// Maximum number of remembered ids
const CAPACITY: usize = 100;
/// Entries older than this insertion order are dropped on eviction
const EVICT_BELOW: usize = 50;

/// Map from trigger id to insertion order
///
/// When an insertion would exceed [`CAPACITY`], every entry with order
/// below [`EVICT_BELOW`] is dropped and the survivors are renumbered,
/// freeing roughly half the table.
#[derive(Debug, Default)]
pub struct UniqueIdCache {
    entries: HashMap<String, usize>,
}

impl UniqueIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert `id`; returns false if it was already present
    pub fn insert(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        if self.entries.len() >= CAPACITY {
            self.entries.retain(|_, order| {
                if *order >= EVICT_BELOW {
                    *order -= EVICT_BELOW;
                    true
                } else {
                    false
                }
            });
        }
        let order = self.entries.len();
        self.entries.insert(id.to_string(), order);
        true
    }
}

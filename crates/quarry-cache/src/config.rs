use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Buffer of the change-notification channel. Slow subscribers past
    /// this many events start losing them.
    pub change_capacity: usize,
    /// Cached query tuples kept per schema before the oldest is evicted.
    pub max_cached_queries: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            change_capacity: 256,
            max_cached_queries: 1024,
        }
    }
}

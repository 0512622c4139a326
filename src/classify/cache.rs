use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use super::VisualizationLabel;

/// Bounded prompt -> label memo with least-recently-used eviction.
pub struct LabelCache {
    inner: Mutex<LruCache<String, VisualizationLabel>>,
}

impl LabelCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Looks up `prompt` and marks it as most recently used.
    pub fn get(&self, prompt: &str) -> Option<VisualizationLabel> {
        self.inner.lock().get(prompt).copied()
    }

    pub fn insert(&self, prompt: &str, label: VisualizationLabel) {
        self.inner.lock().put(prompt.to_string(), label);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

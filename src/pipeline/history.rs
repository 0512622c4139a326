use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

use crate::classify::VisualizationLabel;

// History item for tracking query execution
#[derive(Debug, Clone, Serialize)]
pub struct QueryHistoryItem {
    pub question: String,
    pub sql: String,
    pub execution_time_ms: u64,
    pub row_count: u64,
    pub visualization_type: VisualizationLabel,
    pub timestamp: DateTime<Utc>,
}

/// Bounded log of recent successful queries, oldest evicted first.
pub struct QueryHistory {
    capacity: usize,
    items: Mutex<VecDeque<QueryHistoryItem>>,
}

impl QueryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, item: QueryHistoryItem) {
        if self.capacity == 0 {
            return;
        }
        let mut items = self.items.lock();
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<QueryHistoryItem> {
        self.items.lock().iter().rev().cloned().collect()
    }
}

//! Retry record - one scheduled backoff for a failed task

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use workstore::{IndexValue, Record, now_ms};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRecord {
    pub task_id: i64,

    /// 1-based attempt index the retry belongs to
    pub attempt: u32,

    /// When the task becomes eligible again (Unix milliseconds)
    pub scheduled_at: i64,

    /// Backoff delay that was applied, in milliseconds
    pub delay_ms: u64,

    /// Outcome of the retried attempt, set after it runs
    pub outcome: Option<String>,
}

impl RetryRecord {
    pub fn new(task_id: i64, attempt: u32, delay_ms: u64) -> Self {
        Self {
            task_id,
            attempt,
            scheduled_at: now_ms() + delay_ms as i64,
            delay_ms,
            outcome: None,
        }
    }

    /// Whether the backoff delay has elapsed
    pub fn is_due(&self, now: i64) -> bool {
        self.scheduled_at <= now
    }
}

impl Record for RetryRecord {
    fn collection_name() -> &'static str {
        "retries"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task".to_string(), IndexValue::Int(self.task_id));
        fields
    }
}

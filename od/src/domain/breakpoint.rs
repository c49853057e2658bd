//! Breakpoint record - a persistent pause requiring external resolution

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use workstore::{IndexValue, Record, now_ms};

/// What to do with the paused task when resolving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Unblock the task back to ready
    Continue,
    /// Cancel the task
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakpoint {
    pub task_id: i64,

    /// Why execution paused
    pub reason: String,

    pub created_at: i64,

    pub resolved_at: Option<i64>,

    /// Note recorded at resolution
    pub resolution: Option<String>,
}

impl Breakpoint {
    pub fn new(task_id: i64, reason: impl Into<String>) -> Self {
        Self {
            task_id,
            reason: reason.into(),
            created_at: now_ms(),
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Record the resolution note and timestamp
    pub fn resolve(&mut self, note: impl Into<String>) {
        self.resolution = Some(note.into());
        self.resolved_at = Some(now_ms());
    }
}

impl Record for Breakpoint {
    fn collection_name() -> &'static str {
        "breakpoints"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task".to_string(), IndexValue::Int(self.task_id));
        fields.insert("resolved".to_string(), IndexValue::Bool(self.is_resolved()));
        fields
    }
}

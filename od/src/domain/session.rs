//! Session domain type and the token ledger
//!
//! A session is the continuous agent context shared across iterations of an
//! execution until a refresh produces a successor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use workstore::{IndexValue, Record, now_ms};

/// Four-way token breakdown reported by the agent per response and
/// accumulated on the session ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
    pub output: u64,
}

impl TokenUsage {
    /// Total tokens counted against the context window
    pub fn total(&self) -> u64 {
        self.input + self.cache_read + self.cache_creation + self.output
    }

    /// Accumulate another breakdown into this one
    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.cache_read += other.cache_read;
        self.cache_creation += other.cache_creation;
        self.output += other.output;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
    Abandoned,
    /// Replaced by a successor session carrying a summary forward
    Refreshed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
            Self::Refreshed => write!(f, "refreshed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Stable UUID key; survives across store ids
    pub key: String,

    pub project_id: i64,

    pub milestone_id: Option<i64>,

    pub status: SessionStatus,

    /// Cumulative token ledger across all iterations
    pub tokens: TokenUsage,

    /// Context-window limit in tokens
    pub window_limit: u64,

    /// Carryover summary set at refresh or close
    pub summary: Option<String>,

    /// Key of the successor session after a refresh
    pub successor: Option<String>,

    /// Start time (Unix milliseconds)
    pub started_at: i64,

    /// End time, set when the session leaves `Active`
    pub ended_at: Option<i64>,
}

impl Session {
    /// Open a new session with a generated key
    pub fn new(project_id: i64, window_limit: u64) -> Self {
        Self {
            key: uuid::Uuid::now_v7().to_string(),
            project_id,
            milestone_id: None,
            status: SessionStatus::Active,
            tokens: TokenUsage::default(),
            window_limit,
            summary: None,
            successor: None,
            started_at: now_ms(),
            ended_at: None,
        }
    }

    pub fn with_milestone(mut self, milestone_id: i64) -> Self {
        self.milestone_id = Some(milestone_id);
        self
    }

    /// Seed the session with a carryover summary from a predecessor
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Fraction of the window consumed
    pub fn utilization(&self) -> f64 {
        if self.window_limit == 0 {
            return 1.0;
        }
        self.tokens.total() as f64 / self.window_limit as f64
    }

    /// Close the session with a terminal status
    pub fn close(&mut self, status: SessionStatus) {
        self.status = status;
        self.ended_at = Some(now_ms());
    }
}

impl Record for Session {
    fn collection_name() -> &'static str {
        "sessions"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("key".to_string(), IndexValue::String(self.key.clone()));
        fields.insert("project".to_string(), IndexValue::Int(self.project_id));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_total_and_add() {
        let mut ledger = TokenUsage {
            input: 100,
            cache_read: 50,
            cache_creation: 10,
            output: 40,
        };
        assert_eq!(ledger.total(), 200);

        ledger.add(&TokenUsage {
            input: 10,
            cache_read: 0,
            cache_creation: 0,
            output: 5,
        });
        assert_eq!(ledger.total(), 215);
        assert_eq!(ledger.input, 110);
    }

    #[test]
    fn test_session_utilization() {
        let mut session = Session::new(1, 1000);
        assert_eq!(session.utilization(), 0.0);

        session.tokens.add(&TokenUsage {
            input: 500,
            cache_read: 0,
            cache_creation: 0,
            output: 0,
        });
        assert!((session.utilization() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_session_zero_limit_is_saturated() {
        let session = Session::new(1, 0);
        assert_eq!(session.utilization(), 1.0);
    }

    #[test]
    fn test_session_close_stamps_end() {
        let mut session = Session::new(1, 1000);
        assert!(session.ended_at.is_none());

        session.close(SessionStatus::Refreshed);
        assert_eq!(session.status, SessionStatus::Refreshed);
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn test_session_keys_unique() {
        let a = Session::new(1, 1000);
        let b = Session::new(1, 1000);
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_session_serde() {
        let session = Session::new(3, 200_000).with_summary("carried over");
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, session.key);
        assert_eq!(back.summary, Some("carried over".to_string()));
        assert_eq!(back.window_limit, 200_000);
    }
}

//! Iteration record - one prompt/response round with the agent

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use workstore::{IndexValue, Record, now_ms};

use super::session::TokenUsage;

/// Outcome chosen by the decision engine for an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Quality and confidence gates passed; stop iterating
    Complete,
    /// Fold feedback into the next prompt and keep going
    RefineAndContinue,
    /// Response failed validation; retry the round
    RetryIteration,
    /// Pause for human review
    EscalateBreakpoint,
    /// Turn budget ran out; deliverable assessment decides the outcome
    Exhausted,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::RefineAndContinue => write!(f, "refine_and_continue"),
            Self::RetryIteration => write!(f, "retry_iteration"),
            Self::EscalateBreakpoint => write!(f, "escalate_breakpoint"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// One prompt/response round within a task execution. Rows never mutate
/// after `ended_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub task_id: i64,

    /// Session the round ran in
    pub session_key: String,

    /// 1-based index within the execution
    pub index: u32,

    pub prompt_digest: String,

    pub response_digest: String,

    pub tokens: TokenUsage,

    /// Whether the response passed structural validation
    pub validation_passed: bool,

    /// Quality score in [0..1]
    pub quality: f64,

    /// Confidence score in [0..1]
    pub confidence: f64,

    pub decision: Option<Decision>,

    /// Set when the supervising LLM was unavailable and the confidence
    /// ensemble degraded to the heuristic signal alone
    pub supervisor_degraded: bool,

    /// Relative paths the agent reported touching
    pub files_touched: Vec<String>,

    pub started_at: i64,

    pub ended_at: Option<i64>,
}

impl Iteration {
    pub fn new(task_id: i64, session_key: impl Into<String>, index: u32) -> Self {
        Self {
            task_id,
            session_key: session_key.into(),
            index,
            prompt_digest: String::new(),
            response_digest: String::new(),
            tokens: TokenUsage::default(),
            validation_passed: false,
            quality: 0.0,
            confidence: 0.0,
            decision: None,
            supervisor_degraded: false,
            files_touched: Vec::new(),
            started_at: now_ms(),
            ended_at: None,
        }
    }

    /// Stamp the end time, sealing the row
    pub fn finish(&mut self, decision: Decision) {
        self.decision = Some(decision);
        self.ended_at = Some(now_ms());
    }

    pub fn is_terminal(&self) -> bool {
        self.ended_at.is_some()
    }
}

impl Record for Iteration {
    fn collection_name() -> &'static str {
        "iterations"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task".to_string(), IndexValue::Int(self.task_id));
        fields.insert("session".to_string(), IndexValue::String(self.session_key.clone()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_new() {
        let iteration = Iteration::new(7, "sess-1", 1);
        assert_eq!(iteration.task_id, 7);
        assert_eq!(iteration.index, 1);
        assert!(!iteration.is_terminal());
        assert!(iteration.decision.is_none());
    }

    #[test]
    fn test_iteration_finish_seals() {
        let mut iteration = Iteration::new(7, "sess-1", 2);
        iteration.finish(Decision::Complete);
        assert!(iteration.is_terminal());
        assert_eq!(iteration.decision, Some(Decision::Complete));
        assert!(iteration.ended_at.is_some());
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(Decision::Complete.to_string(), "complete");
        assert_eq!(Decision::RefineAndContinue.to_string(), "refine_and_continue");
        assert_eq!(Decision::RetryIteration.to_string(), "retry_iteration");
        assert_eq!(Decision::EscalateBreakpoint.to_string(), "escalate_breakpoint");
        assert_eq!(Decision::Exhausted.to_string(), "exhausted");
    }

    #[test]
    fn test_iteration_serde() {
        let mut iteration = Iteration::new(7, "sess-1", 3);
        iteration.quality = 0.82;
        iteration.confidence = 0.9;
        iteration.finish(Decision::RefineAndContinue);

        let json = serde_json::to_string(&iteration).unwrap();
        let back: Iteration = serde_json::from_str(&json).unwrap();
        assert_eq!(back.index, 3);
        assert_eq!(back.decision, Some(Decision::RefineAndContinue));
        assert!((back.quality - 0.82).abs() < f64::EPSILON);
    }
}

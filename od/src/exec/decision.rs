//! Decision engine - pure mapping from iteration signals to the next action
//!
//! The policy is ordered; the first matching rule wins.

use crate::config::DecisionThresholds;
use crate::domain::Decision;

/// Signals feeding one decision
#[derive(Debug, Clone, Copy)]
pub struct DecisionInputs {
    pub validation_passed: bool,
    pub quality: f64,
    pub confidence: f64,
    /// 1-based iteration index
    pub iteration: u32,
    pub max_turns: u32,
    /// Remaining within-execution retries for failed validation
    pub response_retry_budget: u32,
}

/// Decide the next action for an iteration
pub fn decide(inputs: &DecisionInputs, thresholds: &DecisionThresholds) -> Decision {
    if !inputs.validation_passed {
        return if inputs.response_retry_budget > 0 {
            Decision::RetryIteration
        } else {
            Decision::EscalateBreakpoint
        };
    }

    if inputs.quality >= thresholds.quality_gate && inputs.confidence >= thresholds.high_confidence {
        return Decision::Complete;
    }

    if inputs.iteration >= inputs.max_turns {
        return Decision::Exhausted;
    }

    if inputs.confidence < thresholds.medium_confidence {
        return Decision::EscalateBreakpoint;
    }

    Decision::RefineAndContinue
}

//! Execution loop: prompt build, dispatch, validate, score, decide, act

mod confidence;
mod decision;
mod deliverable;
mod engine;
mod prompt;
mod quality;
mod turns;

pub use confidence::{HEURISTIC_WEIGHT, SUPERVISOR_WEIGHT, ensemble_confidence, heuristic_confidence};
pub use decision::{DecisionInputs, decide};
pub use deliverable::{Assessment, ExecOutcome, FileCheck, assess_files, classify_exhausted, syntax_valid};
pub use engine::{ExecutionEngine, ExecutionReport};
pub use prompt::{PromptBundle, digest};
pub use quality::{ResponseValidation, quality_score, validate_response};
pub use turns::resolve_max_turns;

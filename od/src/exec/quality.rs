//! Response validation and quality heuristics
//!
//! Validation is structural and fast, with no external calls. Quality is a
//! deterministic score over surface signals of the response; the supervisor
//! never participates here.

/// Result of structural response validation
#[derive(Debug, Clone)]
pub struct ResponseValidation {
    pub passed: bool,
    pub reason: Option<String>,
}

impl ResponseValidation {
    fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Structural checks: non-empty, minimally sized, and well-formed when the
/// response presents itself as JSON
pub fn validate_response(text: &str) -> ResponseValidation {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ResponseValidation::fail("empty response");
    }
    if trimmed.len() < 8 {
        return ResponseValidation::fail("response too short to be a deliverable");
    }
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_err()
    {
        return ResponseValidation::fail("response looks like JSON but does not parse");
    }
    ResponseValidation::pass()
}

/// Markers that suggest the agent gave up rather than delivered
const FAILURE_MARKERS: &[&str] = &["i cannot", "i am unable", "unable to complete", "error:", "failed to"];

/// Deterministic quality score in [0..1]
pub fn quality_score(text: &str, files_touched: &[String]) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let lower = trimmed.to_lowercase();

    let mut score: f64 = if trimmed.len() >= 40 { 0.3 } else { 0.15 };

    if !files_touched.is_empty() {
        score += 0.2;
    }
    if trimmed.contains("```") || files_touched.iter().any(|f| f.contains('/')) {
        score += 0.15;
    }
    if trimmed.lines().count() >= 3 {
        score += 0.15;
    }
    if !FAILURE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        score += 0.2;
    }

    score.clamp(0.0, 1.0)
}

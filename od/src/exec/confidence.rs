//! Confidence scoring - an ensemble of a heuristic signal and the
//! supervising LLM
//!
//! The supervisor's judgement carries more weight when present; when it is
//! absent or fails, the heuristic stands alone and the degradation is
//! reported to the caller for recording.

use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::agent::Supervisor;

/// Ensemble weights
pub const HEURISTIC_WEIGHT: f64 = 0.4;
pub const SUPERVISOR_WEIGHT: f64 = 0.6;

/// How much of the response the supervisor is shown
const SUPERVISOR_EXCERPT_CHARS: usize = 4_000;

/// Deterministic confidence signal from local evidence
pub fn heuristic_confidence(validation_passed: bool, quality: f64, iteration: u32, max_turns: u32) -> f64 {
    if !validation_passed {
        return 0.1;
    }
    let budget_left = 1.0 - (iteration.saturating_sub(1) as f64 / max_turns.max(1) as f64);
    (0.7 * quality + 0.3 * budget_left).clamp(0.0, 1.0)
}

/// Combine the heuristic with the supervisor's judgement. Returns the score
/// and whether the ensemble degraded to heuristic-only.
pub async fn ensemble_confidence(
    supervisor: &dyn Supervisor,
    llm_timeout: Duration,
    response_text: &str,
    heuristic: f64,
) -> (f64, bool) {
    if supervisor.available() {
        let excerpt: String = response_text.chars().take(SUPERVISOR_EXCERPT_CHARS).collect();
        let prompt = format!(
            "Rate your confidence from 0.0 to 1.0 that the following agent \
             response correctly completes its task. Respond with only the number.\n\n{}",
            excerpt
        );
        match timeout(llm_timeout, supervisor.generate(&prompt, 8)).await {
            Ok(Ok(text)) => {
                if let Some(score) = parse_score(&text) {
                    let combined = (HEURISTIC_WEIGHT * heuristic + SUPERVISOR_WEIGHT * score).clamp(0.0, 1.0);
                    return (combined, false);
                }
                warn!(reply = %text, "Supervisor confidence reply did not contain a score");
            }
            Ok(Err(e)) => warn!(error = %e, "Supervisor confidence call failed"),
            Err(_) => warn!("Supervisor confidence call timed out"),
        }
    }
    (heuristic, true)
}

/// Extract the first float in the reply, clamped to [0..1]
pub fn parse_score(text: &str) -> Option<f64> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|token| !token.is_empty())
        .find_map(|token| token.parse::<f64>().ok())
        .map(|score| score.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockSupervisor;

    #[test]
    fn test_heuristic_failed_validation_floors() {
        assert_eq!(heuristic_confidence(false, 0.9, 1, 30), 0.1);
    }

    #[test]
    fn test_heuristic_tracks_quality_and_budget() {
        let early = heuristic_confidence(true, 0.8, 1, 30);
        let late = heuristic_confidence(true, 0.8, 29, 30);
        assert!(early > late);
        assert!((early - (0.7 * 0.8 + 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("0.8"), Some(0.8));
        assert_eq!(parse_score("Confidence: 0.35 overall"), Some(0.35));
        assert_eq!(parse_score("9.5"), Some(1.0)); // clamped
        assert_eq!(parse_score("no score here"), None);
    }

    #[tokio::test]
    async fn test_ensemble_weights_supervisor() {
        let supervisor = MockSupervisor::with_replies(vec!["0.5".to_string()]);
        let (score, degraded) = ensemble_confidence(&supervisor, Duration::from_secs(5), "resp", 1.0).await;
        assert!(!degraded);
        assert!((score - (0.4 * 1.0 + 0.6 * 0.5)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ensemble_degrades_when_unavailable() {
        let supervisor = MockSupervisor::unavailable();
        let (score, degraded) = ensemble_confidence(&supervisor, Duration::from_secs(5), "resp", 0.42).await;
        assert!(degraded);
        assert_eq!(score, 0.42);
    }

    #[tokio::test]
    async fn test_ensemble_degrades_on_unparseable_reply() {
        let supervisor = MockSupervisor::with_replies(vec!["looks fine to me".to_string()]);
        let (score, degraded) = ensemble_confidence(&supervisor, Duration::from_secs(5), "resp", 0.42).await;
        assert!(degraded);
        assert_eq!(score, 0.42);
    }
}

//! Adaptive max-turns resolution
//!
//! The ladder is checked in priority order: work-item-kind override, then
//! task-type override, then a heuristic estimate from complexity signals,
//! then the configured default. The result is clamped, and multiplied per
//! prior turn-budget exhaustion before re-clamping.

use crate::config::MaxTurnsConfig;
use crate::domain::WorkItem;

/// Resolve the turn budget for an execution of `item`
pub fn resolve_max_turns(item: &WorkItem, config: &MaxTurnsConfig, exhausted_retries: u32) -> u32 {
    let base = config
        .by_work_item_kind
        .get(&item.kind)
        .copied()
        .or_else(|| config.by_task_type.get(&item.task_type).copied())
        .or_else(|| estimate_complexity(item))
        .unwrap_or(config.default);

    let multiplied = (base as f64 * config.retry_multiplier.powi(exhausted_retries as i32)).round() as u32;
    multiplied.clamp(config.min, config.max)
}

/// Heuristic estimate from keyword, file-mention, and scope signals.
/// Returns `None` when the item carries no usable signal.
fn estimate_complexity(item: &WorkItem) -> Option<u32> {
    let text = format!("{} {}", item.title, item.description).to_lowercase();
    let mut signals = 0u32;
    let mut estimate = 8u32;

    for (keyword, weight) in [
        ("migrate", 16u32),
        ("debug", 16),
        ("refactor", 12),
        ("implement", 10),
        ("investigate", 10),
        ("test", 6),
        ("document", 3),
    ] {
        if text.contains(keyword) {
            signals += 1;
            estimate = estimate.max(weight);
        }
    }

    let file_mentions = text
        .split_whitespace()
        .filter(|word| word.contains('/') && word.contains('.'))
        .count() as u32;
    if file_mentions > 0 {
        signals += 1;
        estimate += file_mentions.min(10) * 2;
    }

    let words = text.split_whitespace().count() as u32;
    if words > 100 {
        signals += 1;
        estimate += words.min(400) / 50;
    }

    (signals > 0).then_some(estimate)
}

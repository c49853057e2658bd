//! Effective-priority computation and candidate selection
//!
//! Effective priority is computed on read, never stored. Boosts are the
//! documented set: an approaching deadline, a crowd of waiting dependents,
//! and a promising retry. The result is clamped to [1..10].

use workstore::Row;

use crate::domain::{WorkItem, WorkStatus};
use crate::graph;

/// A deadline within this horizon counts as approaching
pub(crate) const DEADLINE_HORIZON_MS: i64 = 86_400_000;

/// Dependents that must exceed this count to earn the boost
const DEPENDENT_BOOST_THRESHOLD: usize = 3;

/// Compute the effective priority of an item at `now`
pub(crate) fn effective_priority(
    item: &Row<WorkItem>,
    items: &[Row<WorkItem>],
    promising_retry: bool,
    boosting: bool,
    now: i64,
) -> u8 {
    let mut priority = item.data.priority as i32;
    if !boosting {
        return priority.clamp(1, 10) as u8;
    }

    if let Some(deadline) = item.data.deadline()
        && deadline - now <= DEADLINE_HORIZON_MS
    {
        priority += 2;
    }

    let waiting = graph::dependents_of(item.id, items)
        .into_iter()
        .filter(|id| {
            items
                .iter()
                .find(|r| r.id == *id)
                .map(|r| !r.data.status.is_terminal())
                .unwrap_or(false)
        })
        .count();
    if waiting > DEPENDENT_BOOST_THRESHOLD {
        priority += 1;
    }

    if promising_retry {
        priority += 1;
    }

    priority.clamp(1, 10) as u8
}

/// Pick the best candidate: effective priority desc, then created_at asc,
/// then id asc
pub(crate) fn select_best(candidates: &[(i64, u8, i64)]) -> Option<i64> {
    candidates
        .iter()
        .max_by(|(a_id, a_pri, a_created), (b_id, b_pri, b_created)| {
            a_pri
                .cmp(b_pri)
                .then_with(|| b_created.cmp(a_created))
                .then_with(|| b_id.cmp(a_id))
        })
        .map(|(id, _, _)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkItemKind;
    use workstore::now_ms;

    fn row(id: i64, priority: u8, deps: Vec<i64>) -> Row<WorkItem> {
        let mut item = WorkItem::new(1, WorkItemKind::Task, format!("task-{}", id)).with_priority(priority);
        item.set_dependencies(deps);
        Row {
            id,
            version: 1,
            created_at: 1000 + id,
            updated_at: 1000 + id,
            data: item,
        }
    }

    #[test]
    fn test_no_boosts_returns_base() {
        let item = row(1, 5, vec![]);
        let items = vec![item.clone()];
        assert_eq!(effective_priority(&item, &items, false, true, now_ms()), 5);
    }

    #[test]
    fn test_deadline_boost() {
        let now = now_ms();
        let mut item = row(1, 5, vec![]);
        item.data.set_deadline(now + 3_600_000); // one hour out
        let items = vec![item.clone()];
        assert_eq!(effective_priority(&item, &items, false, true, now), 7);
    }

    #[test]
    fn test_distant_deadline_no_boost() {
        let now = now_ms();
        let mut item = row(1, 5, vec![]);
        item.data.set_deadline(now + 7 * 86_400_000); // a week out
        let items = vec![item.clone()];
        assert_eq!(effective_priority(&item, &items, false, true, now), 5);
    }

    #[test]
    fn test_dependent_crowd_boost() {
        let item = row(1, 5, vec![]);
        let items = vec![
            item.clone(),
            row(2, 5, vec![1]),
            row(3, 5, vec![1]),
            row(4, 5, vec![1]),
            row(5, 5, vec![1]),
        ];
        // 4 waiting dependents > 3
        assert_eq!(effective_priority(&item, &items, false, true, now_ms()), 6);
    }

    #[test]
    fn test_three_dependents_is_not_enough() {
        let item = row(1, 5, vec![]);
        let items = vec![item.clone(), row(2, 5, vec![1]), row(3, 5, vec![1]), row(4, 5, vec![1])];
        assert_eq!(effective_priority(&item, &items, false, true, now_ms()), 5);
    }

    #[test]
    fn test_promising_retry_boost() {
        let item = row(1, 5, vec![]);
        let items = vec![item.clone()];
        assert_eq!(effective_priority(&item, &items, true, true, now_ms()), 6);
    }

    #[test]
    fn test_clamped_to_ten() {
        let now = now_ms();
        let mut item = row(1, 9, vec![]);
        item.data.set_deadline(now); // +2
        let items = vec![
            item.clone(),
            row(2, 5, vec![1]),
            row(3, 5, vec![1]),
            row(4, 5, vec![1]),
            row(5, 5, vec![1]),
        ];
        // 9 + 2 + 1 + 1 would be 13
        assert_eq!(effective_priority(&item, &items, true, true, now), 10);
    }

    #[test]
    fn test_boosting_disabled() {
        let now = now_ms();
        let mut item = row(1, 5, vec![]);
        item.data.set_deadline(now);
        let items = vec![item.clone()];
        assert_eq!(effective_priority(&item, &items, true, false, now), 5);
    }

    #[test]
    fn test_select_best_priority_then_fifo() {
        // (id, effective priority, created_at)
        let candidates = vec![(1, 5, 100), (2, 8, 200), (3, 8, 150)];
        // Highest priority wins; among ties, earliest created
        assert_eq!(select_best(&candidates), Some(3));
    }

    #[test]
    fn test_select_best_id_breaks_exact_ties() {
        let candidates = vec![(7, 5, 100), (4, 5, 100)];
        assert_eq!(select_best(&candidates), Some(4));
    }

    #[test]
    fn test_select_best_empty() {
        assert_eq!(select_best(&[]), None);
    }
}

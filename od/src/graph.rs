//! Dependency graph resolution
//!
//! Works over the non-deleted work items of a single project. Dependencies
//! are read through the typed metadata accessor; edges point from an item to
//! the items it depends on. A dependency id that no longer resolves inside
//! the item set (soft-deleted parent of a dangling edge) is treated as
//! satisfied so that non-cascading deletes cannot block a project forever.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use workstore::Row;

use crate::domain::{WorkItem, WorkStatus};

/// Deterministic ordering key: priority desc, created_at asc, id asc
#[derive(Debug, PartialEq, Eq)]
struct OrderKey {
    priority: u8,
    created_at: i64,
    id: i64,
}

impl OrderKey {
    fn of(item: &Row<WorkItem>) -> Self {
        Self {
            priority: item.data.priority,
            created_at: item.created_at,
            id: item.id,
        }
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Kahn's algorithm over the item set. Returns ids in execution order;
/// on a cycle, returns the participating ids as the error.
pub fn topo_order(items: &[Row<WorkItem>]) -> Result<Vec<i64>, Vec<i64>> {
    let by_id: HashMap<i64, &Row<WorkItem>> = items.iter().map(|r| (r.id, r)).collect();

    // In-degree counts only edges that resolve within the set
    let mut in_degree: HashMap<i64, usize> = HashMap::new();
    let mut dependents: HashMap<i64, Vec<i64>> = HashMap::new();
    for item in items {
        let degree = item
            .data
            .dependencies()
            .iter()
            .filter(|dep| by_id.contains_key(dep))
            .count();
        in_degree.insert(item.id, degree);
        for dep in item.data.dependencies() {
            if by_id.contains_key(&dep) {
                dependents.entry(dep).or_default().push(item.id);
            }
        }
    }

    let mut heap: BinaryHeap<OrderKey> = items
        .iter()
        .filter(|r| in_degree[&r.id] == 0)
        .map(|r| OrderKey::of(r))
        .collect();

    let mut order = Vec::with_capacity(items.len());
    while let Some(key) = heap.pop() {
        order.push(key.id);
        for dependent in dependents.get(&key.id).cloned().unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(&dependent) {
                *degree -= 1;
                if *degree == 0 {
                    heap.push(OrderKey::of(by_id[&dependent]));
                }
            }
        }
    }

    if order.len() < items.len() {
        return Err(find_cycle(items).unwrap_or_default());
    }
    Ok(order)
}

/// Three-color depth-first search. Returns the ids of one cycle when the
/// graph has a back edge, following dependency edges.
pub fn find_cycle(items: &[Row<WorkItem>]) -> Option<Vec<i64>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let by_id: HashMap<i64, &Row<WorkItem>> = items.iter().map(|r| (r.id, r)).collect();
    let mut color: HashMap<i64, Color> = items.iter().map(|r| (r.id, Color::White)).collect();

    fn visit(
        node: i64,
        by_id: &HashMap<i64, &Row<WorkItem>>,
        color: &mut HashMap<i64, Color>,
        path: &mut Vec<i64>,
    ) -> Option<Vec<i64>> {
        color.insert(node, Color::Gray);
        path.push(node);

        for dep in by_id[&node].data.dependencies() {
            match color.get(&dep) {
                Some(Color::Gray) => {
                    // Back edge: the cycle is the path suffix from `dep`
                    let start = path.iter().position(|&id| id == dep).unwrap_or(0);
                    return Some(path[start..].to_vec());
                }
                Some(Color::White) => {
                    if let Some(cycle) = visit(dep, by_id, color, path) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }

        path.pop();
        color.insert(node, Color::Black);
        None
    }

    let mut ids: Vec<i64> = items.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    for id in ids {
        if color[&id] == Color::White {
            let mut path = Vec::new();
            if let Some(cycle) = visit(id, &by_id, &mut color, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// An item is ready when every direct dependency that still resolves in the
/// set is completed
pub fn is_ready(item: &Row<WorkItem>, by_id: &HashMap<i64, &Row<WorkItem>>) -> bool {
    item.data.dependencies().iter().all(|dep| {
        by_id
            .get(dep)
            .map(|row| row.data.status == WorkStatus::Completed)
            .unwrap_or(true)
    })
}

/// Ids of items that depend directly on `id`
pub fn dependents_of(id: i64, items: &[Row<WorkItem>]) -> Vec<i64> {
    items
        .iter()
        .filter(|r| r.data.dependencies().contains(&id))
        .map(|r| r.id)
        .collect()
}

/// Restrict the set to the given statuses (for the deadlock pre-check)
pub fn with_statuses(items: &[Row<WorkItem>], statuses: &[WorkStatus]) -> Vec<Row<WorkItem>> {
    let wanted: HashSet<WorkStatus> = statuses.iter().copied().collect();
    items
        .iter()
        .filter(|r| wanted.contains(&r.data.status))
        .cloned()
        .collect()
}

//! Scheduler implementation
//!
//! Owns the work-item state machine and the pull-based dispatch queue.
//! Every transition persists atomically with its cause and emits a
//! `task_state_changed` event; dispatch runs under a process-wide lock so
//! no task can be handed out twice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use workstore::{Filter, Row, Store, Txn, now_ms};

use crate::config::{Config, RetryConfig};
use crate::domain::{Breakpoint, Iteration, RetryRecord, WorkItem, WorkStatus};
use crate::error::{ErrorKind, OrchError, OrchResult};
use crate::events::{Event, EventBus};
use crate::graph;
use crate::model::validate_hierarchy;

use super::queue;
use super::retry::backoff_delay;

/// The transition table. Anything absent here is a `StateError`.
pub fn transition_allowed(from: WorkStatus, to: WorkStatus) -> bool {
    use WorkStatus::*;
    matches!(
        (from, to),
        (Pending, Ready)
            | (Ready, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Blocked)
            | (Failed, Retrying)
            | (Retrying, Ready)
            | (Blocked, Ready)
            // Cancellation is valid from any non-terminal state
            | (Pending, Cancelled)
            | (Ready, Cancelled)
            | (Running, Cancelled)
            | (Blocked, Cancelled)
            | (Retrying, Cancelled)
    )
}

/// The task scheduler
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<Store>,
    events: EventBus,
    retry_config: RetryConfig,
    boosting: bool,
    auto_retry: bool,
    quality_gate: f64,
    /// Guards dispatch so `next` hands out each task at most once
    dispatch: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, events: EventBus, config: &Config) -> Self {
        Self {
            store,
            events,
            retry_config: config.scheduler.retry.clone(),
            boosting: config.scheduler.boosting,
            auto_retry: config.execution.max_turns.auto_retry,
            quality_gate: config.decision.thresholds.quality_gate,
            dispatch: Arc::new(Mutex::new(())),
        }
    }

    /// Register a work item for execution. Idempotent: a live item with the
    /// same (project, kind, title) is returned instead of a duplicate.
    pub async fn schedule(&self, item: WorkItem) -> OrchResult<i64> {
        debug!(project_id = item.project_id, kind = %item.kind, title = %item.title, "schedule: called");

        let id = self.store.transaction(|txn| {
            let existing: Vec<Row<WorkItem>> = txn.query(&[
                Filter::eq("project", item.project_id),
                Filter::eq("kind", item.kind.to_string()),
            ])?;
            if let Some(found) = existing
                .iter()
                .find(|r| r.data.title == item.title && !r.data.status.is_terminal())
            {
                debug!(id = found.id, "schedule: already registered");
                return Ok::<i64, OrchError>(found.id);
            }
            validate_hierarchy(txn, &item)?;
            Ok::<i64, OrchError>(txn.insert(&item)?)
        })?;

        // Items with no outstanding dependencies become ready immediately
        self.promote_ready(item.project_id)?;
        Ok(id)
    }

    /// Hand out the highest-priority ready task, marking it running.
    /// Returns `None` when nothing is dispatchable.
    pub async fn next(&self, project_id: i64) -> OrchResult<Option<Row<WorkItem>>> {
        let _guard = self.dispatch.lock().await;
        self.release_due_retries(project_id)?;

        let items: Vec<Row<WorkItem>> = self.store.query(&[Filter::eq("project", project_id)])?;

        // Fail fast when the waiting subgraph can never make progress
        let waiting = graph::with_statuses(&items, &[WorkStatus::Pending, WorkStatus::Ready]);
        if let Some(cycle) = graph::find_cycle(&waiting) {
            warn!(project_id, ?cycle, "Dependency cycle detected");
            return Err(OrchError::deadlock("scheduler", cycle));
        }

        let promoted = self.promote_ready(project_id)?;
        let items = if promoted.is_empty() {
            items
        } else {
            self.store.query(&[Filter::eq("project", project_id)])?
        };
        let by_id: HashMap<i64, &Row<WorkItem>> = items.iter().map(|r| (r.id, r)).collect();

        let blocked_by_breakpoint: HashSet<i64> = self
            .store
            .query::<Breakpoint>(&[Filter::eq("resolved", false)])?
            .iter()
            .map(|r| r.data.task_id)
            .collect();

        let now = now_ms();
        let mut candidates = Vec::new();
        for row in items.iter().filter(|r| r.data.status == WorkStatus::Ready) {
            if blocked_by_breakpoint.contains(&row.id) {
                continue;
            }
            if !graph::is_ready(row, &by_id) {
                continue;
            }
            let promising = row.data.attempts > 0
                && self
                    .last_iteration_quality(row.id)?
                    .map(|q| q >= self.quality_gate)
                    .unwrap_or(false);
            let effective = queue::effective_priority(row, &items, promising, self.boosting, now);
            candidates.push((row.id, effective, row.created_at));
        }

        let Some(best) = queue::select_best(&candidates) else {
            return Ok(None);
        };

        let (_, row) = self.apply_transition(best, WorkStatus::Running, "dispatched")?;
        info!(task_id = best, "Dispatched task");
        Ok(Some(row))
    }

    /// Mark a running task completed and promote dependents that became
    /// ready, atomically. Re-invocation on a completed task is a no-op.
    pub async fn complete(&self, task_id: i64, changes_summary: Option<String>) -> OrchResult<WorkStatus> {
        let row: Row<WorkItem> = self.store.get(task_id)?;
        if row.data.status == WorkStatus::Completed {
            return Ok(WorkStatus::Completed);
        }
        let project_id = row.data.project_id;

        let (from, promoted) = self.store.transaction(|txn| {
            let row: Row<WorkItem> = txn.get(task_id)?;
            let from = row.data.status;
            if !transition_allowed(from, WorkStatus::Completed) {
                return Err(state_error(task_id, from, WorkStatus::Completed));
            }
            let mut item = row.data.clone();
            item.status = WorkStatus::Completed;
            item.changes_summary = changes_summary.clone();
            note_transition(&mut item, WorkStatus::Completed, "completed");
            txn.update(task_id, row.version, &item)?;
            backfill_retry_outcome(txn, task_id, "completed")?;

            // Promotion is part of the completion transaction
            let items: Vec<Row<WorkItem>> = txn.query(&[Filter::eq("project", project_id)])?;
            let by_id: HashMap<i64, &Row<WorkItem>> = items.iter().map(|r| (r.id, r)).collect();
            let mut promoted = Vec::new();
            for dependent_id in graph::dependents_of(task_id, &items) {
                let dependent = by_id[&dependent_id];
                if dependent.data.status == WorkStatus::Pending && graph::is_ready(dependent, &by_id) {
                    transition_in_txn(txn, dependent_id, WorkStatus::Ready, "dependency completed")?;
                    promoted.push(dependent_id);
                }
            }
            Ok((from, promoted))
        })?;

        self.events.emit(Event::TaskStateChanged {
            task_id,
            from,
            to: WorkStatus::Completed,
            reason: "completed".to_string(),
        });
        for id in promoted {
            self.events.emit(Event::TaskStateChanged {
                task_id: id,
                from: WorkStatus::Pending,
                to: WorkStatus::Ready,
                reason: "dependency completed".to_string(),
            });
        }
        info!(task_id, "Task completed");
        Ok(WorkStatus::Completed)
    }

    /// Record a failure. Retryable kinds with remaining budget move the
    /// task to retrying with backoff; everything else is terminal.
    pub async fn fail(&self, task_id: i64, kind: ErrorKind) -> OrchResult<WorkStatus> {
        warn!(task_id, %kind, "fail: called");

        let (from, attempts, max_attempts) = self.store.transaction(|txn| {
            let row: Row<WorkItem> = txn.get(task_id)?;
            let from = row.data.status;
            if !transition_allowed(from, WorkStatus::Failed) {
                return Err(state_error(task_id, from, WorkStatus::Failed));
            }
            let mut item = row.data.clone();
            item.attempts += 1;
            item.status = WorkStatus::Failed;
            note_transition(&mut item, WorkStatus::Failed, &format!("failed: {}", kind));
            txn.update(task_id, row.version, &item)?;
            backfill_retry_outcome(txn, task_id, &format!("failed: {}", kind))?;
            Ok((from, item.attempts, item.max_attempts))
        })?;

        self.events.emit(Event::TaskStateChanged {
            task_id,
            from,
            to: WorkStatus::Failed,
            reason: format!("failed: {}", kind),
        });

        let task_retryable = match kind {
            ErrorKind::Validation
            | ErrorKind::Authentication
            | ErrorKind::NotFound
            | ErrorKind::Cancelled
            | ErrorKind::State
            | ErrorKind::Deadlock => false,
            ErrorKind::BudgetExhausted => self.auto_retry,
            _ => true,
        };
        if task_retryable && attempts < max_attempts {
            return self.retry(task_id).await;
        }
        Ok(WorkStatus::Failed)
    }

    /// Move a failed task to retrying with a backoff delay and a scheduled
    /// wakeup
    pub async fn retry(&self, task_id: i64) -> OrchResult<WorkStatus> {
        let row: Row<WorkItem> = self.store.get(task_id)?;
        if row.data.attempts >= row.data.max_attempts {
            return Err(OrchError::new(
                ErrorKind::BudgetExhausted,
                "scheduler",
                format!(
                    "task {} used {}/{} attempts",
                    task_id, row.data.attempts, row.data.max_attempts
                ),
            )
            .with_correlation(task_id.to_string()));
        }

        let delay = backoff_delay(&self.retry_config, row.data.attempts);
        let from = self.store.transaction(|txn| {
            let (from, updated) = transition_in_txn(txn, task_id, WorkStatus::Retrying, "retry scheduled")?;
            txn.insert(&RetryRecord::new(task_id, updated.data.attempts, delay.as_millis() as u64))?;
            Ok::<WorkStatus, OrchError>(from)
        })?;

        self.events.emit(Event::TaskStateChanged {
            task_id,
            from,
            to: WorkStatus::Retrying,
            reason: "retry scheduled".to_string(),
        });
        info!(task_id, ?delay, "Retry scheduled");

        // Scheduled wakeup; next() also polls due retries so a missed
        // wakeup only delays, never strands
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = this.promote_due_retry(task_id) {
                warn!(task_id, error = %e, "Retry wakeup failed");
            }
        });
        Ok(WorkStatus::Retrying)
    }

    /// Cancel a task from any non-terminal state
    pub async fn cancel(&self, task_id: i64, reason: &str) -> OrchResult<WorkStatus> {
        let (_, _) = self.apply_transition(task_id, WorkStatus::Cancelled, reason)?;
        info!(task_id, reason, "Task cancelled");
        Ok(WorkStatus::Cancelled)
    }

    /// Pause a running task behind a breakpoint
    pub async fn block(&self, task_id: i64, reason: &str) -> OrchResult<WorkStatus> {
        self.apply_transition(task_id, WorkStatus::Blocked, reason)?;
        Ok(WorkStatus::Blocked)
    }

    /// Release a blocked task back to ready
    pub async fn unblock(&self, task_id: i64) -> OrchResult<WorkStatus> {
        self.apply_transition(task_id, WorkStatus::Ready, "breakpoint resolved")?;
        Ok(WorkStatus::Ready)
    }

    /// Probe the project's waiting subgraph for a cycle
    pub fn detect_deadlock(&self, project_id: i64) -> OrchResult<Option<Vec<i64>>> {
        let items: Vec<Row<WorkItem>> = self.store.query(&[Filter::eq("project", project_id)])?;
        let waiting = graph::with_statuses(&items, &[WorkStatus::Pending, WorkStatus::Ready]);
        Ok(graph::find_cycle(&waiting))
    }

    /// Return retrying tasks whose backoff has elapsed to ready
    pub fn release_due_retries(&self, project_id: i64) -> OrchResult<u32> {
        let retrying: Vec<Row<WorkItem>> = self.store.query(&[
            Filter::eq("project", project_id),
            Filter::eq("status", WorkStatus::Retrying.to_string()),
        ])?;
        let mut released = 0;
        for row in retrying {
            if self.promote_due_retry(row.id)? {
                released += 1;
            }
        }
        Ok(released)
    }

    /// Promote one retrying task if its delay has elapsed
    pub fn promote_due_retry(&self, task_id: i64) -> OrchResult<bool> {
        let row: Row<WorkItem> = match self.store.get(task_id) {
            Ok(row) => row,
            Err(_) => return Ok(false),
        };
        if row.data.status != WorkStatus::Retrying {
            return Ok(false);
        }

        let records: Vec<Row<RetryRecord>> = self.store.query(&[Filter::eq("task", task_id)])?;
        let due = records
            .iter()
            .max_by_key(|r| (r.data.attempt, r.id))
            .map(|r| r.data.is_due(now_ms()))
            .unwrap_or(true);
        if !due {
            return Ok(false);
        }

        // The scheduled wakeup and the dispatcher's poll can race; losing
        // the race is not an error
        match self.apply_transition(task_id, WorkStatus::Ready, "retry delay elapsed") {
            Ok(_) => {
                debug!(task_id, "Retry released");
                Ok(true)
            }
            Err(e) if matches!(e.kind, ErrorKind::State | ErrorKind::Conflict) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Promote pending items whose dependencies are satisfied
    fn promote_ready(&self, project_id: i64) -> OrchResult<Vec<i64>> {
        let promoted = self.store.transaction(|txn| {
            let items: Vec<Row<WorkItem>> = txn.query(&[Filter::eq("project", project_id)])?;
            let by_id: HashMap<i64, &Row<WorkItem>> = items.iter().map(|r| (r.id, r)).collect();
            let mut promoted = Vec::new();
            for row in &items {
                if row.data.status == WorkStatus::Pending && graph::is_ready(row, &by_id) {
                    transition_in_txn(txn, row.id, WorkStatus::Ready, "dependencies satisfied")?;
                    promoted.push(row.id);
                }
            }
            Ok::<Vec<i64>, OrchError>(promoted)
        })?;

        for id in &promoted {
            self.events.emit(Event::TaskStateChanged {
                task_id: *id,
                from: WorkStatus::Pending,
                to: WorkStatus::Ready,
                reason: "dependencies satisfied".to_string(),
            });
        }
        Ok(promoted)
    }

    fn apply_transition(&self, task_id: i64, to: WorkStatus, reason: &str) -> OrchResult<(WorkStatus, Row<WorkItem>)> {
        let (from, row) = self
            .store
            .transaction(|txn| transition_in_txn(txn, task_id, to, reason))?;
        self.events.emit(Event::TaskStateChanged {
            task_id,
            from,
            to,
            reason: reason.to_string(),
        });
        Ok((from, row))
    }

    fn last_iteration_quality(&self, task_id: i64) -> OrchResult<Option<f64>> {
        let iterations: Vec<Row<Iteration>> = self.store.query(&[Filter::eq("task", task_id)])?;
        Ok(iterations
            .iter()
            .max_by_key(|r| (r.data.index, r.id))
            .map(|r| r.data.quality))
    }
}

/// Perform one validated transition inside a transaction
fn transition_in_txn(
    txn: &Txn<'_>,
    task_id: i64,
    to: WorkStatus,
    reason: &str,
) -> OrchResult<(WorkStatus, Row<WorkItem>)> {
    let row: Row<WorkItem> = txn.get(task_id)?;
    let from = row.data.status;
    if !transition_allowed(from, to) {
        return Err(state_error(task_id, from, to));
    }
    let mut item = row.data.clone();
    item.status = to;
    note_transition(&mut item, to, reason);
    let version = txn.update(task_id, row.version, &item)?;
    Ok((
        from,
        Row {
            id: row.id,
            version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            data: item,
        },
    ))
}

/// Persist the cause alongside the transition
fn note_transition(item: &mut WorkItem, to: WorkStatus, reason: &str) {
    item.metadata.insert(
        "last_transition".to_string(),
        serde_json::json!({ "to": to.to_string(), "reason": reason }),
    );
}

/// Set the outcome on the newest open retry record, if any
fn backfill_retry_outcome(txn: &Txn<'_>, task_id: i64, outcome: &str) -> OrchResult<()> {
    let records: Vec<Row<RetryRecord>> = txn.query(&[Filter::eq("task", task_id)])?;
    if let Some(open) = records
        .into_iter()
        .filter(|r| r.data.outcome.is_none())
        .max_by_key(|r| (r.data.attempt, r.id))
    {
        let mut record = open.data.clone();
        record.outcome = Some(outcome.to_string());
        txn.update(open.id, open.version, &record)?;
    }
    Ok(())
}

fn state_error(task_id: i64, from: WorkStatus, to: WorkStatus) -> OrchError {
    OrchError::new(
        ErrorKind::State,
        "scheduler",
        format!("illegal transition {} -> {} for task {}", from, to, task_id),
    )
    .with_correlation(task_id.to_string())
}

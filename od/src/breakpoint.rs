//! BreakpointManager - pauses requiring human review
//!
//! Raising a breakpoint blocks the owning task through the scheduler (the
//! sole mutator of work-item status) and persists a record; resolution
//! either returns the task to ready or cancels it. Tasks with unresolved
//! breakpoints are never dispatched.

use std::sync::Arc;

use tracing::{info, warn};
use workstore::{Filter, Row, Store};

use crate::domain::{Breakpoint, Disposition, WorkStatus};
use crate::error::{ErrorKind, OrchError, OrchResult};
use crate::events::{Event, EventBus};
use crate::scheduler::Scheduler;

/// Handle to a raised breakpoint
#[derive(Debug, Clone, Copy)]
pub struct BreakpointHandle {
    pub id: i64,
    pub task_id: i64,
}

#[derive(Clone)]
pub struct BreakpointManager {
    store: Arc<Store>,
    events: EventBus,
    scheduler: Scheduler,
}

impl BreakpointManager {
    pub fn new(store: Arc<Store>, events: EventBus, scheduler: Scheduler) -> Self {
        Self {
            store,
            events,
            scheduler,
        }
    }

    /// Pause a running task for review
    pub async fn raise(&self, task_id: i64, reason: &str) -> OrchResult<BreakpointHandle> {
        warn!(task_id, reason, "Raising breakpoint");
        self.scheduler.block(task_id, reason).await?;
        let id = self.store.insert(&Breakpoint::new(task_id, reason))?;
        self.events.emit(Event::BreakpointRaised {
            task_id,
            reason: reason.to_string(),
        });
        Ok(BreakpointHandle { id, task_id })
    }

    /// Resolve a breakpoint, unblocking or cancelling the task
    pub async fn resolve(
        &self,
        handle: BreakpointHandle,
        note: &str,
        disposition: Disposition,
    ) -> OrchResult<WorkStatus> {
        let row: Row<Breakpoint> = self.store.get(handle.id)?;
        if row.data.is_resolved() {
            return Err(OrchError::new(
                ErrorKind::State,
                "breakpoint",
                format!("breakpoint {} already resolved", handle.id),
            )
            .with_correlation(handle.task_id.to_string()));
        }

        let mut breakpoint = row.data.clone();
        breakpoint.resolve(note);
        self.store.update(handle.id, row.version, &breakpoint)?;
        info!(breakpoint = handle.id, task_id = handle.task_id, ?disposition, "Breakpoint resolved");

        match disposition {
            Disposition::Continue => self.scheduler.unblock(handle.task_id).await,
            Disposition::Cancel => self.scheduler.cancel(handle.task_id, note).await,
        }
    }

    /// Unresolved breakpoints for a task
    pub fn unresolved_for(&self, task_id: i64) -> OrchResult<Vec<Row<Breakpoint>>> {
        let rows: Vec<Row<Breakpoint>> = self
            .store
            .query(&[Filter::eq("task", task_id), Filter::eq("resolved", false)])?;
        Ok(rows)
    }
}

//! Event bus for state-change notifications
//!
//! Consumers (documentation automation, telemetry sinks) subscribe via a
//! broadcast channel; slow or absent subscribers never block the core.

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::WorkStatus;

/// Events emitted by the core
#[derive(Debug, Clone)]
pub enum Event {
    TaskStateChanged {
        task_id: i64,
        from: WorkStatus,
        to: WorkStatus,
        reason: String,
    },
    EpicCompleted {
        epic_id: i64,
    },
    MilestoneAchieved {
        milestone_id: i64,
    },
    SessionRefreshed {
        old_key: String,
        new_key: String,
        summary_digest: String,
    },
    BreakpointRaised {
        task_id: i64,
        reason: String,
    },
    IterationRecorded {
        task_id: i64,
        index: u32,
    },
}

/// Broadcast bus for core events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit an event; dropped silently when nobody is listening
    pub fn emit(&self, event: Event) {
        debug!(?event, "emit");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

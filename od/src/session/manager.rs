//! SessionManager - bounds context growth and preserves continuity
//!
//! Owns window discovery, the token ledger, zone classification, refresh
//! (summarize and hand off to a successor session), and checkpoints. Only
//! this component issues refreshes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};
use workstore::{Filter, Row, Store, StoreError};

use crate::agent::{AgentClient, Supervisor};
use crate::config::{Config, SessionConfig};
use crate::domain::{Iteration, Session, SessionStatus, TokenUsage};
use crate::error::{ErrorKind, OrchError, OrchResult};
use crate::events::{Event, EventBus};
use crate::exec::digest;

use super::window::{OptimizationProfile, Zone, is_emergency, zone_for};

/// Conservative window when neither the agent nor configuration knows one
const DEFAULT_WINDOW: u64 = 16_384;

/// Bounded retries for the optimistic ledger add
const LEDGER_RETRIES: u32 = 5;

/// Session and context-window manager
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<Store>,
    events: EventBus,
    config: SessionConfig,
    supervisor: Arc<dyn Supervisor>,
    /// Window hint from the agent provider's model configuration
    model_window_hint: Option<u64>,
    llm_timeout: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, events: EventBus, config: &Config, supervisor: Arc<dyn Supervisor>) -> Self {
        Self {
            store,
            events,
            config: config.session.clone(),
            supervisor,
            model_window_hint: config.agent.context_window,
            llm_timeout: Duration::from_secs(config.timeouts.llm_seconds),
        }
    }

    /// Open a session, discovering the window limit: configured fixed limit
    /// first, then the agent-published limit, then the model hint, then a
    /// conservative default
    pub fn open_session(
        &self,
        project_id: i64,
        milestone_id: Option<i64>,
        agent: &dyn AgentClient,
    ) -> OrchResult<Row<Session>> {
        let limit = self
            .config
            .context_window
            .limit
            .fixed()
            .or_else(|| agent.context_window())
            .or(self.model_window_hint)
            .unwrap_or(DEFAULT_WINDOW);

        let mut session = Session::new(project_id, limit);
        if let Some(milestone_id) = milestone_id {
            session = session.with_milestone(milestone_id);
        }
        let id = self.store.insert(&session)?;
        let row = self.store.get(id)?;
        info!(session = %session.key, limit, profile = %self.profile_for(&session), "Opened session");
        Ok(row)
    }

    /// Profile for a session, honoring an explicit configuration override
    pub fn profile_for(&self, session: &Session) -> OptimizationProfile {
        if self.config.optimization_profile != "auto"
            && let Ok(profile) = self.config.optimization_profile.parse()
        {
            return profile;
        }
        OptimizationProfile::from_limit(session.window_limit)
    }

    /// Atomically add an iteration's tokens to the ledger, returning the
    /// new zone. Conflicting writers are retried a bounded number of times.
    pub fn add_iteration_tokens(&self, session_id: i64, tokens: &TokenUsage) -> OrchResult<Zone> {
        for _ in 0..LEDGER_RETRIES {
            let row: Row<Session> = self.store.get(session_id)?;
            let mut session = row.data.clone();
            session.tokens.add(tokens);
            match self.store.update(session_id, row.version, &session) {
                Ok(_) => {
                    let zone = zone_for(session.utilization(), &self.config.context_window.zones);
                    debug!(session = %session.key, utilization = session.utilization(), %zone, "Ledger updated");
                    return Ok(zone);
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchError::new(
            ErrorKind::Conflict,
            "session",
            format!("ledger add for session {} kept conflicting", session_id),
        ))
    }

    /// Whether policy calls for a refresh before the next iteration
    pub fn should_refresh(&self, session: &Session) -> bool {
        if !self.config.context_window.auto_refresh {
            return false;
        }
        let zone = zone_for(session.utilization(), &self.config.context_window.zones);
        zone >= Zone::Orange
    }

    /// Whether utilization has crossed the emergency threshold
    pub fn is_emergency(&self, session: &Session) -> bool {
        is_emergency(session.utilization(), &self.config.context_window.zones)
    }

    /// Produce a summary of the closing session, open a successor carrying
    /// it forward, and mark the old session refreshed. One transaction.
    pub async fn refresh(&self, session_id: i64) -> OrchResult<Row<Session>> {
        let row: Row<Session> = self.store.get(session_id)?;
        if row.data.status != SessionStatus::Active {
            return Err(OrchError::new(
                ErrorKind::State,
                "session",
                format!("cannot refresh {} session {}", row.data.status, row.data.key),
            )
            .with_correlation(row.data.key.clone()));
        }

        let (summary, degraded) = self.summarize(&row.data).await;

        // Cap the carryover so the successor starts well below yellow
        let budget_chars =
            ((self.config.context_window.zones.yellow * row.data.window_limit as f64) * 4.0 / 2.0) as usize;
        let summary: String = summary.chars().take(budget_chars.max(256)).collect();
        let summary_tokens = (summary.len() / 4) as u64;

        let mut successor = Session::new(row.data.project_id, row.data.window_limit).with_summary(summary.clone());
        successor.milestone_id = row.data.milestone_id;
        successor.tokens.input = summary_tokens;

        let old_key = row.data.key.clone();
        let new_key = successor.key.clone();

        let successor_id = self.store.transaction(|txn| {
            let id = txn.insert(&successor)?;
            let current: Row<Session> = txn.get(session_id)?;
            let mut old = current.data.clone();
            old.summary = Some(summary.clone());
            old.successor = Some(new_key.clone());
            old.close(SessionStatus::Refreshed);
            txn.update(session_id, current.version, &old)?;
            Ok::<_, StoreError>(id)
        })?;

        info!(old = %old_key, new = %new_key, degraded, "Session refreshed");
        self.events.emit(Event::SessionRefreshed {
            old_key,
            new_key,
            summary_digest: digest(&summary),
        });
        Ok(self.store.get(successor_id)?)
    }

    /// Append a working-memory snapshot to the session's checkpoint stream
    pub fn checkpoint(&self, session: &Session, snapshot: &serde_json::Value) -> OrchResult<i64> {
        let seq = self.store.append_checkpoint(&session.key, &snapshot.to_string())?;
        debug!(session = %session.key, seq, "Checkpoint appended");
        Ok(seq)
    }

    /// Close an active session with a terminal status
    pub fn close_session(&self, session_id: i64, status: SessionStatus) -> OrchResult<()> {
        let row: Row<Session> = self.store.get(session_id)?;
        if row.data.status != SessionStatus::Active {
            return Ok(());
        }
        let mut session = row.data.clone();
        session.close(status);
        self.store.update(session_id, row.version, &session)?;
        Ok(())
    }

    /// Summarize via the supervisor, falling back to a deterministic
    /// aggregation over iteration digests. Returns (summary, degraded).
    async fn summarize(&self, session: &Session) -> (String, bool) {
        let iterations: Vec<Row<Iteration>> = self
            .store
            .query(&[Filter::eq("session", session.key.clone())])
            .unwrap_or_default();

        if self.supervisor.available() {
            let prompt = summary_prompt(session, &iterations);
            match timeout(self.llm_timeout, self.supervisor.generate(&prompt, 1024)).await {
                Ok(Ok(text)) if !text.trim().is_empty() => return (text, false),
                Ok(Err(e)) => warn!(session = %session.key, error = %e, "Supervisor summary failed"),
                Ok(Ok(_)) => warn!(session = %session.key, "Supervisor returned empty summary"),
                Err(_) => warn!(session = %session.key, "Supervisor summary timed out"),
            }
        }

        (fallback_summary(session, &iterations), true)
    }
}

fn summary_prompt(session: &Session, iterations: &[Row<Iteration>]) -> String {
    let mut lines = vec![
        "Summarize the working state of this execution session for a successor context."
            .to_string(),
        format!("Iterations so far: {}", iterations.len()),
    ];
    if let Some(prior) = &session.summary {
        lines.push(format!("Prior summary: {}", prior));
    }
    for row in iterations {
        lines.push(format!(
            "- iteration {}: quality {:.2}, confidence {:.2}, decision {}",
            row.data.index,
            row.data.quality,
            row.data.confidence,
            row.data
                .decision
                .map(|d| d.to_string())
                .unwrap_or_else(|| "pending".to_string()),
        ));
    }
    lines.join("\n")
}

/// Deterministic aggregation used when the supervisor is absent
fn fallback_summary(session: &Session, iterations: &[Row<Iteration>]) -> String {
    let mut parts = vec![format!(
        "[digest-aggregated] session {}: {} iterations",
        session.key,
        iterations.len()
    )];
    if let Some(prior) = &session.summary {
        parts.push(format!("carried: {}", prior));
    }
    for row in iterations {
        parts.push(format!(
            "iter {} q={:.2} c={:.2} resp={}",
            row.data.index, row.data.quality, row.data.confidence, row.data.response_digest
        ));
    }
    parts.join("; ")
}

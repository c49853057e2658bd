//! ExecutionEngine - drives one task from pickup to a terminal outcome
//!
//! Each iteration: window check, prompt bundle, agent dispatch under
//! timeout, iteration recording and ledger update, structural validation,
//! quality and confidence scoring, then the decision engine. Cancellation
//! is cooperative: checked between iterations and raced against dispatch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;
use workstore::{Filter, Row, Store};

use crate::agent::{AgentClient, AgentError, AgentRequest, AgentResponse, Supervisor};
use crate::breakpoint::BreakpointManager;
use crate::config::Config;
use crate::domain::{Decision, Iteration, Project, RetryRecord, Session, SessionStatus, WorkItem, WorkStatus};
use crate::error::{ErrorKind, OrchError, OrchResult};
use crate::events::{Event, EventBus};
use crate::scheduler::Scheduler;
use crate::session::SessionManager;

use super::confidence::{ensemble_confidence, heuristic_confidence};
use super::decision::{DecisionInputs, decide};
use super::deliverable::{ExecOutcome, assess_files, classify_exhausted};
use super::prompt::{PromptBundle, digest};
use super::quality::{quality_score, validate_response};
use super::turns::resolve_max_turns;

/// Within-execution retries for responses that fail validation
const RESPONSE_RETRY_BUDGET: u32 = 2;

/// Transient dispatch failures tolerated before the task fails
const DISPATCH_RETRY_BUDGET: u32 = 3;

/// Terminal report for one task execution
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub task_id: i64,
    pub outcome: ExecOutcome,
    pub iterations: u32,
    pub quality: f64,
    pub session_key: String,
    pub files_touched: Vec<String>,
}

/// Single-task execution driver
pub struct ExecutionEngine {
    store: Arc<Store>,
    events: EventBus,
    config: Config,
    scheduler: Scheduler,
    sessions: SessionManager,
    breakpoints: BreakpointManager,
    agent: Arc<dyn AgentClient>,
    supervisor: Arc<dyn Supervisor>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        events: EventBus,
        config: Config,
        scheduler: Scheduler,
        sessions: SessionManager,
        breakpoints: BreakpointManager,
        agent: Arc<dyn AgentClient>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            store,
            events,
            config,
            scheduler,
            sessions,
            breakpoints,
            agent,
            supervisor,
            cancel_tx,
            cancel_rx,
        }
    }

    /// Request cooperative cancellation of the running execution
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Drive one running task to a terminal outcome
    pub async fn run(&self, task_id: i64) -> OrchResult<ExecutionReport> {
        let task: Row<WorkItem> = self.store.get(task_id)?;
        if task.data.status != WorkStatus::Running {
            return Err(OrchError::new(
                ErrorKind::State,
                "execution",
                format!("task {} is {}, not running", task_id, task.data.status),
            )
            .with_correlation(task_id.to_string()));
        }
        let project: Row<Project> = self.store.get(task.data.project_id)?;

        let max_turns = resolve_max_turns(
            &task.data,
            &self.config.execution.max_turns,
            self.exhausted_retries(task_id)?,
        );
        let llm_timeout = Duration::from_secs(self.config.timeouts.llm_seconds);
        let agent_timeout = Duration::from_secs(self.config.timeouts.agent_seconds);

        let mut session = self.sessions.open_session(project.id, None, self.agent.as_ref())?;
        let profile = self.sessions.profile_for(&session.data);
        info!(task_id, max_turns, session = %session.data.key, %profile, "Execution started");

        let mut bundle = PromptBundle::new(&task.data, &project.data);
        bundle.summary = session.data.summary.clone();

        let mut files_touched: Vec<String> = Vec::new();
        let mut validation_retries = 0u32;
        let mut dispatch_failures = 0u32;
        let mut last_quality = 0.0f64;
        let mut i = 0u32;

        while i < max_turns {
            i += 1;

            if *self.cancel_rx.borrow() {
                return Err(self.cancel_execution(task_id, session.id).await);
            }

            if self.sessions.should_refresh(&session.data) || self.sessions.is_emergency(&session.data) {
                session = self.sessions.refresh(session.id).await?;
                bundle.summary = session.data.summary.clone();
            }

            bundle.iteration = i;
            let prompt = bundle.render();
            let request = AgentRequest {
                prompt: prompt.clone(),
                idempotency_key: Uuid::now_v7().to_string(),
                max_tokens: self.config.agent.max_tokens,
            };

            let mut iteration = Iteration::new(task_id, session.data.key.clone(), i);
            iteration.prompt_digest = digest(&prompt);

            let response = match self.dispatch(request, agent_timeout).await {
                Dispatch::Cancelled => {
                    return Err(self.cancel_execution(task_id, session.id).await);
                }
                Dispatch::Failed(e) => {
                    dispatch_failures += 1;
                    if e.is_retryable() && dispatch_failures <= DISPATCH_RETRY_BUDGET {
                        warn!(task_id, error = %e, attempt = dispatch_failures, "Dispatch failed, retrying");
                        i -= 1;
                        continue;
                    }
                    let kind = e.kind();
                    self.scheduler.fail(task_id, kind).await?;
                    self.sessions.close_session(session.id, SessionStatus::Abandoned)?;
                    return Err(OrchError::new(kind, "execution", e.to_string()).with_correlation(task_id.to_string()));
                }
                Dispatch::Responded(response) => response,
            };
            dispatch_failures = 0;

            // Initial iteration row and ledger add
            iteration.response_digest = digest(&response.text);
            iteration.tokens = response.tokens;
            iteration.files_touched = response.files_touched.clone();
            let iteration_id = self.store.insert(&iteration)?;
            let iteration_version = 1;
            self.sessions.add_iteration_tokens(session.id, &response.tokens)?;
            session = self.store.get(session.id)?;

            for file in &response.files_touched {
                if !files_touched.contains(file) {
                    files_touched.push(file.clone());
                }
            }

            // Validation, quality, confidence
            let validation = validate_response(&response.text);
            let quality = quality_score(&response.text, &response.files_touched);
            let heuristic = heuristic_confidence(validation.passed, quality, i, max_turns);
            let (confidence, degraded) =
                ensemble_confidence(self.supervisor.as_ref(), llm_timeout, &response.text, heuristic).await;
            last_quality = quality;

            let decision = decide(
                &DecisionInputs {
                    validation_passed: validation.passed,
                    quality,
                    confidence,
                    iteration: i,
                    max_turns,
                    response_retry_budget: RESPONSE_RETRY_BUDGET.saturating_sub(validation_retries),
                },
                &self.config.decision.thresholds,
            );
            debug!(task_id, iteration = i, quality, confidence, %decision, "Iteration scored");

            // Seal the row
            iteration.validation_passed = validation.passed;
            iteration.quality = quality;
            iteration.confidence = confidence;
            iteration.supervisor_degraded = degraded;
            iteration.finish(decision);
            self.store.update(iteration_id, iteration_version, &iteration)?;
            self.events.emit(Event::IterationRecorded { task_id, index: i });

            if i % profile.checkpoint_cadence() == 0 {
                let snapshot = serde_json::json!({
                    "iteration": i,
                    "quality": quality,
                    "confidence": confidence,
                    "files": files_touched,
                });
                self.sessions.checkpoint(&session.data, &snapshot)?;
            }

            match decision {
                Decision::Complete => {
                    let summary = format!("completed after {} iterations; {} files touched", i, files_touched.len());
                    self.scheduler.complete(task_id, Some(summary)).await?;
                    self.sessions.close_session(session.id, SessionStatus::Completed)?;
                    info!(task_id, iterations = i, "Execution complete");
                    return Ok(ExecutionReport {
                        task_id,
                        outcome: ExecOutcome::Success,
                        iterations: i,
                        quality,
                        session_key: session.data.key.clone(),
                        files_touched,
                    });
                }
                Decision::EscalateBreakpoint => {
                    let reason = validation
                        .reason
                        .unwrap_or_else(|| format!("confidence {:.2} below threshold", confidence));
                    self.breakpoints.raise(task_id, &reason).await?;
                    return Ok(ExecutionReport {
                        task_id,
                        outcome: ExecOutcome::Blocked,
                        iterations: i,
                        quality,
                        session_key: session.data.key.clone(),
                        files_touched,
                    });
                }
                Decision::RetryIteration => {
                    validation_retries += 1;
                    let reason = validation.reason.unwrap_or_else(|| "structural check failed".to_string());
                    bundle.push_feedback(format!("The previous response failed validation: {}", reason));
                }
                Decision::RefineAndContinue => {
                    bundle.prior_digest = Some(iteration.response_digest.clone());
                    bundle.push_feedback(format!(
                        "Iteration {} scored quality {:.2} and confidence {:.2}; address the \
                         weakest part of the deliverable and report the files you touch.",
                        i, quality, confidence
                    ));
                }
                Decision::Exhausted => break,
            }
        }

        // Turn budget spent without a completion decision
        self.assess_and_finish(task_id, &project.data, session, i, last_quality, files_touched)
            .await
    }

    /// Deliverable assessment decides the outcome after turn exhaustion
    async fn assess_and_finish(
        &self,
        task_id: i64,
        project: &Project,
        session: Row<Session>,
        iterations: u32,
        last_quality: f64,
        files_touched: Vec<String>,
    ) -> OrchResult<ExecutionReport> {
        let assessment = assess_files(&project.working_dir, &files_touched);
        let outcome = classify_exhausted(&assessment);
        info!(task_id, iterations, %outcome, quality = assessment.quality, "Turn budget exhausted");

        match outcome {
            ExecOutcome::SuccessWithLimits | ExecOutcome::Partial => {
                let summary = format!(
                    "{} at turn limit: {} of {} files usable, composite quality {:.2}",
                    outcome,
                    assessment.present(),
                    assessment.files.len(),
                    assessment.quality,
                );
                self.scheduler.complete(task_id, Some(summary)).await?;
                self.sessions.close_session(session.id, SessionStatus::Completed)?;
            }
            _ => {
                self.scheduler.fail(task_id, ErrorKind::BudgetExhausted).await?;
                self.sessions.close_session(session.id, SessionStatus::Abandoned)?;
            }
        }

        Ok(ExecutionReport {
            task_id,
            outcome,
            iterations,
            quality: if assessment.files.is_empty() {
                last_quality
            } else {
                assessment.quality
            },
            session_key: session.data.key.clone(),
            files_touched,
        })
    }

    /// Dispatch to the agent under timeout, racing cancellation
    async fn dispatch(&self, request: AgentRequest, agent_timeout: Duration) -> Dispatch {
        let mut cancel_rx = self.cancel_rx.clone();
        tokio::select! {
            _ = cancel_rx.changed() => Dispatch::Cancelled,
            result = timeout(agent_timeout, self.agent.send(request)) => match result {
                Err(_) => Dispatch::Failed(AgentError::Timeout(agent_timeout)),
                Ok(Err(e)) => Dispatch::Failed(e),
                Ok(Ok(response)) => Dispatch::Responded(response),
            },
        }
    }

    async fn cancel_execution(&self, task_id: i64, session_id: i64) -> OrchError {
        if let Err(e) = self.scheduler.cancel(task_id, "cancelled by caller").await {
            warn!(task_id, error = %e, "Cancel transition failed");
        }
        if let Err(e) = self.sessions.close_session(session_id, SessionStatus::Abandoned) {
            warn!(session_id, error = %e, "Session abandon failed");
        }
        OrchError::new(ErrorKind::Cancelled, "execution", "task execution cancelled")
            .with_correlation(task_id.to_string())
    }

    /// Prior turn-budget exhaustions, used to widen the next budget
    fn exhausted_retries(&self, task_id: i64) -> OrchResult<u32> {
        let records: Vec<Row<RetryRecord>> = self.store.query(&[Filter::eq("task", task_id)])?;
        Ok(records
            .iter()
            .filter(|r| r.data.outcome.as_deref() == Some("failed: budget_exhausted"))
            .count() as u32)
    }
}

enum Dispatch {
    Cancelled,
    Failed(AgentError),
    Responded(AgentResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::{MockAgent, MockSupervisor};
    use crate::domain::{TokenUsage, WorkItemKind};
    use tempfile::TempDir;

    struct Harness {
        engine: ExecutionEngine,
        scheduler: Scheduler,
        store: Arc<Store>,
        project_id: i64,
        _workdir: TempDir,
    }

    async fn harness(config: Config, agent: MockAgent, supervisor: MockSupervisor) -> Harness {
        let workdir = TempDir::new().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let events = EventBus::default();
        let supervisor: Arc<dyn Supervisor> = Arc::new(supervisor);

        let scheduler = Scheduler::new(store.clone(), events.clone(), &config);
        let sessions = SessionManager::new(store.clone(), events.clone(), &config, supervisor.clone());
        let breakpoints = BreakpointManager::new(store.clone(), events.clone(), scheduler.clone());
        let engine = ExecutionEngine::new(
            store.clone(),
            events,
            config,
            scheduler.clone(),
            sessions,
            breakpoints,
            Arc::new(agent),
            supervisor,
        );

        let project_id = store
            .insert(&crate::domain::Project::new("demo", workdir.path()))
            .unwrap();

        Harness {
            engine,
            scheduler,
            store,
            project_id,
            _workdir: workdir,
        }
    }

    async fn running_task(h: &Harness, title: &str) -> i64 {
        let task_id = h
            .scheduler
            .schedule(WorkItem::new(h.project_id, WorkItemKind::Task, title))
            .await
            .unwrap();
        let dispatched = h.scheduler.next(h.project_id).await.unwrap().unwrap();
        assert_eq!(dispatched.id, task_id);
        task_id
    }

    fn strong_response() -> AgentResponse {
        AgentResponse::text(
            "Implemented the change.\n```rust\nfn handler() {}\n```\nAll checks pass.",
        )
        .with_files(vec!["src/handler.rs".to_string()])
        .with_tokens(TokenUsage {
            input: 500,
            cache_read: 0,
            cache_creation: 0,
            output: 200,
        })
    }

    #[tokio::test]
    async fn test_completes_when_gates_pass() {
        let agent = MockAgent::with_responses(vec![strong_response()]);
        let supervisor = MockSupervisor::with_replies(vec!["0.95".to_string()]);
        let h = harness(Config::default(), agent, supervisor).await;
        let task_id = running_task(&h, "T").await;

        let report = h.engine.run(task_id).await.unwrap();
        assert_eq!(report.outcome, ExecOutcome::Success);
        assert_eq!(report.iterations, 1);

        let task: Row<WorkItem> = h.store.get(task_id).unwrap();
        assert_eq!(task.data.status, WorkStatus::Completed);
        assert!(task.data.changes_summary.unwrap().contains("1 iterations"));

        let iterations: Vec<Row<Iteration>> = h.store.query(&[Filter::eq("task", task_id)]).unwrap();
        assert_eq!(iterations.len(), 1);
        assert_eq!(iterations[0].data.decision, Some(Decision::Complete));
        assert!(iterations[0].data.ended_at.is_some());

        let sessions: Vec<Row<Session>> = h.store.list().unwrap();
        assert_eq!(sessions[0].data.status, SessionStatus::Completed);
        // Ledger received the response tokens
        assert_eq!(sessions[0].data.tokens.total(), 700);
    }

    #[tokio::test]
    async fn test_low_confidence_escalates_to_breakpoint() {
        let agent = MockAgent::with_responses(vec![AgentResponse::text(
            "Attempted the change but much is uncertain here today.",
        )]);
        let supervisor = MockSupervisor::with_replies(vec!["0.2".to_string()]);
        let h = harness(Config::default(), agent, supervisor).await;
        let task_id = running_task(&h, "U").await;

        let report = h.engine.run(task_id).await.unwrap();
        assert_eq!(report.outcome, ExecOutcome::Blocked);

        let task: Row<WorkItem> = h.store.get(task_id).unwrap();
        assert_eq!(task.data.status, WorkStatus::Blocked);
        // The scheduler refuses to hand it out while unresolved
        assert!(h.scheduler.next(h.project_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_responses_retry_then_escalate() {
        let agent = MockAgent::with_responses(vec![
            AgentResponse::text(""),
            AgentResponse::text(""),
            AgentResponse::text(""),
        ]);
        let h = harness(Config::default(), agent, MockSupervisor::new()).await;
        let task_id = running_task(&h, "V").await;

        let report = h.engine.run(task_id).await.unwrap();
        assert_eq!(report.outcome, ExecOutcome::Blocked);
        assert_eq!(report.iterations, 3);

        let iterations: Vec<Row<Iteration>> = h.store.query(&[Filter::eq("task", task_id)]).unwrap();
        assert_eq!(iterations.len(), 3);
        assert_eq!(iterations[0].data.decision, Some(Decision::RetryIteration));
        assert_eq!(iterations[1].data.decision, Some(Decision::RetryIteration));
        assert_eq!(iterations[2].data.decision, Some(Decision::EscalateBreakpoint));
    }

    #[tokio::test]
    async fn test_turn_exhaustion_with_deliverables() {
        let mut config = Config::default();
        config
            .execution
            .max_turns
            .by_work_item_kind
            .insert(WorkItemKind::Task, 3);

        // Medium confidence: every iteration refines, none completes
        let refine = || {
            AgentResponse::text("Progress on the module.\n```rust\nfn step() {}\n```\nMore to do.")
                .with_files(vec!["src/a.rs".to_string(), "src/b.rs".to_string()])
        };
        let agent = MockAgent::with_responses(vec![refine(), refine(), refine()]);
        let supervisor = MockSupervisor::with_replies(vec!["0.5".to_string(); 3]);
        let h = harness(config, agent, supervisor).await;

        // Deliverables really exist in the project working directory
        let project: Row<Project> = h.store.get(h.project_id).unwrap();
        std::fs::create_dir_all(project.data.working_dir.join("src")).unwrap();
        std::fs::write(project.data.working_dir.join("src/a.rs"), "pub fn a() {}").unwrap();
        std::fs::write(project.data.working_dir.join("src/b.rs"), "pub fn b() {}").unwrap();

        let task_id = running_task(&h, "S").await;
        let report = h.engine.run(task_id).await.unwrap();

        assert_eq!(report.outcome, ExecOutcome::SuccessWithLimits);
        assert_eq!(report.iterations, 3);
        assert!(report.quality >= 0.7);

        let task: Row<WorkItem> = h.store.get(task_id).unwrap();
        assert_eq!(task.data.status, WorkStatus::Completed);
        assert!(task.data.changes_summary.unwrap().contains("success_with_limits"));
    }

    #[tokio::test]
    async fn test_turn_exhaustion_without_deliverables_fails() {
        let mut config = Config::default();
        config
            .execution
            .max_turns
            .by_work_item_kind
            .insert(WorkItemKind::Task, 3);
        // Keep the task failed instead of respawning with a wider budget
        config.execution.max_turns.auto_retry = false;

        let refine = || AgentResponse::text("Still thinking about the approach to take here.");
        let agent = MockAgent::with_responses(vec![refine(), refine(), refine()]);
        let supervisor = MockSupervisor::with_replies(vec!["0.8".to_string(); 3]);
        let h = harness(config, agent, supervisor).await;
        let task_id = running_task(&h, "W").await;

        let report = h.engine.run(task_id).await.unwrap();
        assert_eq!(report.outcome, ExecOutcome::Failed);

        let task: Row<WorkItem> = h.store.get(task_id).unwrap();
        assert_eq!(task.data.status, WorkStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_between_iterations() {
        let agent = MockAgent::new(vec![]);
        let h = harness(Config::default(), agent, MockSupervisor::new()).await;
        let task_id = running_task(&h, "X").await;

        h.engine.cancel();
        let err = h.engine.run(task_id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);

        let task: Row<WorkItem> = h.store.get(task_id).unwrap();
        assert_eq!(task.data.status, WorkStatus::Cancelled);

        let sessions: Vec<Row<Session>> = h.store.list().unwrap();
        assert_eq!(sessions[0].data.status, SessionStatus::Abandoned);
    }

    #[tokio::test]
    async fn test_transient_dispatch_failures_are_absorbed() {
        let agent = MockAgent::new(vec![
            Err(AgentError::Unavailable("blip".to_string())),
            Err(AgentError::Unavailable("blip".to_string())),
            Ok(strong_response()),
        ]);
        let supervisor = MockSupervisor::with_replies(vec!["0.95".to_string()]);
        let h = harness(Config::default(), agent, supervisor).await;
        let task_id = running_task(&h, "Y").await;

        let report = h.engine.run(task_id).await.unwrap();
        assert_eq!(report.outcome, ExecOutcome::Success);
        assert_eq!(report.iterations, 1);
    }

    #[tokio::test]
    async fn test_persistent_dispatch_failure_fails_task() {
        let down = || Err(AgentError::Unavailable("down".to_string()));
        let agent = MockAgent::new(vec![down(), down(), down(), down()]);
        let mut config = Config::default();
        // Keep the retry in the future so the status is observable
        config.scheduler.retry.base_delay_seconds = 3600;
        let h = harness(config, agent, MockSupervisor::new()).await;
        let task_id = running_task(&h, "Z").await;

        let err = h.engine.run(task_id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);

        let task: Row<WorkItem> = h.store.get(task_id).unwrap();
        assert_eq!(task.data.status, WorkStatus::Retrying);
        assert_eq!(task.data.attempts, 1);
    }

    #[tokio::test]
    async fn test_refresh_mid_execution() {
        // Tiny window: the first iteration pushes utilization into orange
        let mut config = Config::default();
        config
            .execution
            .max_turns
            .by_work_item_kind
            .insert(WorkItemKind::Task, 3);

        let heavy = AgentResponse::text("Working on it across several files and modules here.")
            .with_tokens(TokenUsage {
                input: 700,
                cache_read: 0,
                cache_creation: 0,
                output: 100,
            });
        let agent = MockAgent::with_responses(vec![heavy]).with_window(1_000);
        let supervisor = MockSupervisor::with_replies(vec![
            "0.7".to_string(),
            "carried summary".to_string(),
            "0.7".to_string(),
            "0.7".to_string(),
        ]);
        let h = harness(config, agent, supervisor).await;
        let task_id = running_task(&h, "R").await;

        let report = h.engine.run(task_id).await.unwrap();
        assert!(report.iterations >= 2);

        let sessions: Vec<Row<Session>> = h.store.list().unwrap();
        assert_eq!(sessions.len(), 2);
        let refreshed = sessions
            .iter()
            .find(|s| s.data.status == SessionStatus::Refreshed)
            .expect("old session should be refreshed");
        assert!(refreshed.data.summary.is_some());
        assert!(refreshed.data.successor.is_some());
        // Successor starts below the yellow threshold
        let successor_key = refreshed.data.successor.clone().unwrap();
        let successor = sessions.iter().find(|s| s.data.key == successor_key).unwrap();
        assert_ne!(successor.data.status, SessionStatus::Refreshed);
    }

    #[tokio::test]
    async fn test_run_requires_running_status() {
        let h = harness(Config::default(), MockAgent::new(vec![]), MockSupervisor::new()).await;
        let task_id = h
            .scheduler
            .schedule(WorkItem::new(h.project_id, WorkItemKind::Task, "idle"))
            .await
            .unwrap();

        let err = h.engine.run(task_id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::State);
    }
}

//! Integration tests for the orchestration core
//!
//! These exercise the public API end to end: scheduler, execution engine,
//! session manager, and breakpoints working against one store.

use std::sync::Arc;

use orchd::agent::mock::{MockAgent, MockSupervisor};
use orchd::{
    AgentResponse, BreakpointHandle, BreakpointManager, Config, Disposition, ErrorKind, EventBus, ExecOutcome,
    ExecutionEngine, Iteration, Project, RetryRecord, Scheduler, SessionManager, SessionStatus, Supervisor, TaskType,
    TokenUsage, WorkItem, WorkItemKind, WorkModel, WorkStatus,
};
use workstore::{Filter, Row, Store};

struct World {
    store: Arc<Store>,
    scheduler: Scheduler,
    model: WorkModel,
    breakpoints: BreakpointManager,
    engine: ExecutionEngine,
    project_id: i64,
    _workdir: tempfile::TempDir,
}

/// Defaults with instant, jitter-free retries for fast tests
fn fast_config() -> Config {
    let mut config = Config::default();
    config.scheduler.retry.base_delay_seconds = 0;
    config.scheduler.retry.jitter = 0.0;
    config
}

fn build_world(config: Config, agent: MockAgent, supervisor: MockSupervisor) -> World {
    let workdir = tempfile::TempDir::new().expect("temp dir");
    let store = Arc::new(Store::open_in_memory().expect("store"));
    let events = EventBus::default();
    let supervisor: Arc<dyn Supervisor> = Arc::new(supervisor);

    let scheduler = Scheduler::new(store.clone(), events.clone(), &config);
    let model = WorkModel::new(store.clone(), events.clone());
    let sessions = SessionManager::new(store.clone(), events.clone(), &config, supervisor.clone());
    let breakpoints = BreakpointManager::new(store.clone(), events.clone(), scheduler.clone());
    let engine = ExecutionEngine::new(
        store.clone(),
        events,
        config,
        scheduler.clone(),
        sessions,
        breakpoints.clone(),
        Arc::new(agent),
        supervisor,
    );

    let project_id = store
        .insert(&Project::new("demo", workdir.path()))
        .expect("project");

    World {
        store,
        scheduler,
        model,
        breakpoints,
        engine,
        project_id,
        _workdir: workdir,
    }
}

fn task(project_id: i64, title: &str, deps: Vec<i64>) -> WorkItem {
    WorkItem::new(project_id, WorkItemKind::Task, title).with_dependencies(deps)
}

fn strong_response(files: Vec<&str>) -> AgentResponse {
    AgentResponse::text("Implemented the change.\n```rust\nfn done() {}\n```\nChecks green.")
        .with_files(files.into_iter().map(String::from).collect())
        .with_tokens(TokenUsage {
            input: 400,
            cache_read: 0,
            cache_creation: 0,
            output: 150,
        })
}

// =============================================================================
// Scenario 1: linear dependency chain completes in order
// =============================================================================

#[tokio::test]
async fn linear_chain_completes_in_order() {
    let agent = MockAgent::with_responses(vec![
        strong_response(vec![]),
        strong_response(vec![]),
        strong_response(vec![]),
    ]);
    let supervisor = MockSupervisor::with_replies(vec!["0.95".to_string(); 3]);
    let world = build_world(fast_config(), agent, supervisor);

    let a = world.scheduler.schedule(task(world.project_id, "A", vec![])).await.unwrap();
    let b = world.scheduler.schedule(task(world.project_id, "B", vec![a])).await.unwrap();
    let c = world.scheduler.schedule(task(world.project_id, "C", vec![b])).await.unwrap();

    let mut completion_order = Vec::new();
    while let Some(row) = world.scheduler.next(world.project_id).await.unwrap() {
        // Dependencies of a dispatched task are completed at that moment
        for dep in row.data.dependencies() {
            let dep_row: Row<WorkItem> = world.store.get(dep).unwrap();
            assert_eq!(dep_row.data.status, WorkStatus::Completed);
        }
        let report = world.engine.run(row.id).await.unwrap();
        assert_eq!(report.outcome, ExecOutcome::Success);
        completion_order.push(row.id);
    }

    assert_eq!(completion_order, vec![a, b, c]);
    for id in [a, b, c] {
        let row: Row<WorkItem> = world.store.get(id).unwrap();
        assert_eq!(row.data.status, WorkStatus::Completed);
    }
}

// =============================================================================
// Scenario 2: cycle is diagnosed
// =============================================================================

#[tokio::test]
async fn cycle_is_diagnosed() {
    let world = build_world(fast_config(), MockAgent::new(vec![]), MockSupervisor::new());

    let a = world.store.insert(&task(world.project_id, "A", vec![])).unwrap();
    let b = world.store.insert(&task(world.project_id, "B", vec![a])).unwrap();
    let c = world.store.insert(&task(world.project_id, "C", vec![b])).unwrap();
    // Close the cycle: A depends on C
    let row: Row<WorkItem> = world.store.get(a).unwrap();
    let mut item = row.data.clone();
    item.set_dependencies(vec![c]);
    world.store.update(a, row.version, &item).unwrap();

    let err = world.scheduler.next(world.project_id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Deadlock);

    // The reported cycle is an actual cycle over the live graph
    assert_eq!(err.cycle.len(), 3);
    for id in [a, b, c] {
        assert!(err.cycle.contains(&id), "cycle missing {}", id);
        let row: Row<WorkItem> = world.store.get(id).unwrap();
        assert_ne!(row.data.status, WorkStatus::Running);
    }
}

// =============================================================================
// Scenario 3: retry with backoff on transient failure
// =============================================================================

#[tokio::test]
async fn retry_with_backoff_completes_on_third_attempt() {
    let mut config = Config::default();
    config.scheduler.retry.base_delay_seconds = 60;
    config.scheduler.retry.jitter = 0.0;

    let world = build_world(config, MockAgent::new(vec![]), MockSupervisor::new());

    let t = world
        .scheduler
        .schedule(task(world.project_id, "T", vec![]))
        .await
        .unwrap();

    // Attempt 1 fails with a transient error
    let picked = world.scheduler.next(world.project_id).await.unwrap().unwrap();
    assert_eq!(picked.id, t);
    world
        .store
        .insert(&Iteration::new(t, "exec-session-1", 1))
        .unwrap();
    let status = world.scheduler.fail(t, ErrorKind::Unavailable).await.unwrap();
    assert_eq!(status, WorkStatus::Retrying);

    let records: Vec<Row<RetryRecord>> = world.store.query(&[Filter::eq("task", t)]).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data.delay_ms, 60_000);

    // Force the delay to elapse, then attempt 2
    expire_retry(&world.store, &records[0]);
    assert_eq!(world.scheduler.release_due_retries(world.project_id).unwrap(), 1);

    let picked = world.scheduler.next(world.project_id).await.unwrap().unwrap();
    assert_eq!(picked.id, t);
    world
        .store
        .insert(&Iteration::new(t, "exec-session-2", 1))
        .unwrap();
    world.scheduler.fail(t, ErrorKind::Unavailable).await.unwrap();

    let records: Vec<Row<RetryRecord>> = world.store.query(&[Filter::eq("task", t)]).unwrap();
    assert_eq!(records.len(), 2);
    let second = records.iter().max_by_key(|r| r.data.attempt).unwrap();
    assert_eq!(second.data.delay_ms, 120_000);

    // Attempt 3 completes
    expire_retry(&world.store, second);
    world.scheduler.release_due_retries(world.project_id).unwrap();
    let picked = world.scheduler.next(world.project_id).await.unwrap().unwrap();
    assert_eq!(picked.id, t);
    world
        .store
        .insert(&Iteration::new(t, "exec-session-3", 1))
        .unwrap();
    world.scheduler.complete(t, Some("fixed".to_string())).await.unwrap();

    let row: Row<WorkItem> = world.store.get(t).unwrap();
    assert_eq!(row.data.status, WorkStatus::Completed);
    assert_eq!(row.data.attempts, 2);

    let iterations: Vec<Row<Iteration>> = world.store.query(&[Filter::eq("task", t)]).unwrap();
    assert_eq!(iterations.len(), 3);
}

fn expire_retry(store: &Store, record: &Row<RetryRecord>) {
    let mut data = record.data.clone();
    data.scheduled_at = workstore::now_ms() - 1;
    store.update(record.id, record.version, &data).unwrap();
}

// =============================================================================
// Scenario 4: turn exhaustion with deliverables
// =============================================================================

#[tokio::test]
async fn story_turn_exhaustion_classified_success_with_limits() {
    let mut config = Config::default();
    // Keep the scenario's shape but a tractable budget: the story override
    // still beats the code_generation task-type override
    config
        .execution
        .max_turns
        .by_work_item_kind
        .insert(WorkItemKind::Story, 5);

    let file_names: Vec<String> = (0..6).map(|i| format!("src/part{}.rs", i)).collect();
    let responses: Vec<AgentResponse> = (0..5)
        .map(|_| strong_response(file_names.iter().map(String::as_str).collect()))
        .collect();
    let agent = MockAgent::with_responses(responses);
    // Confidence stays between the gates: refine every turn, never complete
    let supervisor = MockSupervisor::with_replies(vec!["0.7".to_string(); 8]);
    let world = build_world(config, agent, supervisor);

    let project: Row<Project> = world.store.get(world.project_id).unwrap();
    std::fs::create_dir_all(project.data.working_dir.join("src")).unwrap();
    for name in &file_names {
        std::fs::write(project.data.working_dir.join(name), "pub fn ok() {}").unwrap();
    }

    let epic = world.model.create_epic(world.project_id, "Feature", "").unwrap();
    let story = WorkItem::new(world.project_id, WorkItemKind::Story, "S")
        .with_parent(epic)
        .with_task_type(TaskType::CodeGeneration);
    let story_id = world.scheduler.schedule(story).await.unwrap();

    let picked = world.scheduler.next(world.project_id).await.unwrap().unwrap();
    assert_eq!(picked.id, story_id);

    let report = world.engine.run(story_id).await.unwrap();
    assert_eq!(report.iterations, 5);
    assert_eq!(report.outcome, ExecOutcome::SuccessWithLimits);
    assert!(report.quality >= 0.7);

    let row: Row<WorkItem> = world.store.get(story_id).unwrap();
    assert_eq!(row.data.status, WorkStatus::Completed);
    assert!(row.data.changes_summary.unwrap().contains("success_with_limits"));
}

// =============================================================================
// Scenario 5: context refresh mid-execution
// =============================================================================

#[tokio::test]
async fn context_refresh_hands_off_to_successor() {
    let config = Config::default();
    let supervisor: Arc<dyn Supervisor> =
        Arc::new(MockSupervisor::with_replies(vec!["summary of progress".to_string()]));
    let store = Arc::new(Store::open_in_memory().unwrap());
    let sessions = SessionManager::new(store.clone(), EventBus::default(), &config, supervisor);

    let agent = MockAgent::new(vec![]).with_window(200_000);
    let opened = sessions.open_session(1, None, &agent).unwrap();
    assert_eq!(opened.data.window_limit, 200_000);

    // After iteration k the ledger sits in the orange zone
    sessions
        .add_iteration_tokens(
            opened.id,
            &TokenUsage {
                input: 120_000,
                cache_read: 30_000,
                cache_creation: 5_000,
                output: 6_000,
            },
        )
        .unwrap();
    let current: Row<orchd::Session> = store.get(opened.id).unwrap();
    assert!(sessions.should_refresh(&current.data));

    let successor = sessions.refresh(opened.id).await.unwrap();
    assert_eq!(successor.data.status, SessionStatus::Active);
    assert_eq!(successor.data.summary.as_deref(), Some("summary of progress"));
    // Zone monotonicity across refresh: the successor starts below yellow
    assert!(successor.data.utilization() < 0.50);

    let old: Row<orchd::Session> = store.get(opened.id).unwrap();
    assert_eq!(old.data.status, SessionStatus::Refreshed);
    assert!(old.data.summary.is_some());
    assert_eq!(old.data.successor.as_deref(), Some(successor.data.key.as_str()));
}

// =============================================================================
// Scenario 6: breakpoint blocks and resolves
// =============================================================================

#[tokio::test]
async fn breakpoint_blocks_until_resolved() {
    // Validation passes but the supervisor rates the work poorly
    let agent = MockAgent::with_responses(vec![
        AgentResponse::text("Attempted the migration but the outcome is unclear."),
        strong_response(vec![]),
    ]);
    let supervisor = MockSupervisor::with_replies(vec!["0.2".to_string(), "0.95".to_string()]);
    let world = build_world(fast_config(), agent, supervisor);

    let u = world.scheduler.schedule(task(world.project_id, "U", vec![])).await.unwrap();
    world.scheduler.next(world.project_id).await.unwrap().unwrap();

    let report = world.engine.run(u).await.unwrap();
    assert_eq!(report.outcome, ExecOutcome::Blocked);

    let row: Row<WorkItem> = world.store.get(u).unwrap();
    assert_eq!(row.data.status, WorkStatus::Blocked);

    // Never dispatched while the breakpoint is unresolved
    assert!(world.scheduler.next(world.project_id).await.unwrap().is_none());

    let unresolved = world.breakpoints.unresolved_for(u).unwrap();
    assert_eq!(unresolved.len(), 1);
    let handle = BreakpointHandle {
        id: unresolved[0].id,
        task_id: u,
    };
    let status = world
        .breakpoints
        .resolve(handle, "reviewed: proceed", Disposition::Continue)
        .await
        .unwrap();
    assert_eq!(status, WorkStatus::Ready);

    // The next iteration runs and completes
    let picked = world.scheduler.next(world.project_id).await.unwrap().unwrap();
    assert_eq!(picked.id, u);
    let report = world.engine.run(u).await.unwrap();
    assert_eq!(report.outcome, ExecOutcome::Success);
}

// =============================================================================
// Idempotence and hierarchy
// =============================================================================

#[tokio::test]
async fn schedule_twice_produces_one_record() {
    let world = build_world(fast_config(), MockAgent::new(vec![]), MockSupervisor::new());

    let first = world.scheduler.schedule(task(world.project_id, "T", vec![])).await.unwrap();
    let second = world.scheduler.schedule(task(world.project_id, "T", vec![])).await.unwrap();
    assert_eq!(first, second);

    let items: Vec<Row<WorkItem>> = world.store.query(&[Filter::eq("project", world.project_id)]).unwrap();
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn milestone_achieved_when_epics_complete() {
    let world = build_world(fast_config(), MockAgent::new(vec![]), MockSupervisor::new());

    let epic_a = world.model.create_epic(world.project_id, "A", "").unwrap();
    let epic_b = world.model.create_epic(world.project_id, "B", "").unwrap();
    let milestone = world
        .model
        .create_milestone(world.project_id, "v1", vec![epic_a, epic_b], Some("1.0.0".to_string()))
        .unwrap();

    assert!(world.model.achieve_milestone(milestone).is_err());

    world.model.complete_epic(epic_a).unwrap();
    world.model.complete_epic(epic_b).unwrap();
    world.model.achieve_milestone(milestone).unwrap();
}

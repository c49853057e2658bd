//! orchd - orchestration core for supervised autonomous code-generation
//! agents
//!
//! orchd coordinates a hierarchy of work items (epics, stories, tasks,
//! subtasks) through a persistent scheduler and drives one task at a time
//! through an external agent, one bounded iteration per round. State lives
//! in the store, never in memory: every transition, iteration, and token
//! is persisted before the loop moves on.
//!
//! # Core Concepts
//!
//! - **Pull-based dispatch**: the scheduler hands out the highest-priority
//!   ready task whose dependencies are completed, exactly once
//! - **Deterministic transitions**: the state machine admits a fixed
//!   transition table; anything else is a `StateError`
//! - **Bounded iteration**: adaptive turn budgets with deliverable-based
//!   outcome assessment when the budget runs out
//! - **Context discipline**: per-session token ledgers drive utilization
//!   zones and summarize-and-refresh before the window saturates
//!
//! # Modules
//!
//! - [`domain`] - entity types (projects, work items, sessions, iterations)
//! - [`model`] - hierarchy-enforcing work model
//! - [`graph`] - dependency resolution and cycle detection
//! - [`scheduler`] - state machine, priority queue, retry backoff
//! - [`exec`] - the execution loop and decision engine
//! - [`session`] - context-window management
//! - [`breakpoint`] - pauses requiring human review
//! - [`agent`] - external capability interfaces
//! - [`config`] - configuration types and loading

pub mod agent;
pub mod breakpoint;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod exec;
pub mod graph;
pub mod model;
pub mod scheduler;
pub mod session;

// Re-export commonly used types
pub use agent::{AgentClient, AgentError, AgentRequest, AgentResponse, Supervisor, create_agent, create_supervisor};
pub use breakpoint::{BreakpointHandle, BreakpointManager};
pub use config::{Config, DecisionThresholds, MaxTurnsConfig, ProviderConfig, RetryConfig, ZoneThresholds};
pub use domain::{
    Breakpoint, Decision, Disposition, Iteration, Milestone, MilestoneStatus, Project, ProjectStatus, RetryRecord,
    Session, SessionStatus, TaskType, TokenUsage, WorkItem, WorkItemKind, WorkStatus,
};
pub use error::{ErrorKind, OrchError, OrchResult};
pub use events::{Event, EventBus};
pub use exec::{ExecOutcome, ExecutionEngine, ExecutionReport};
pub use model::WorkModel;
pub use scheduler::{Scheduler, backoff_delay, transition_allowed};
pub use session::{OptimizationProfile, SessionManager, Zone};

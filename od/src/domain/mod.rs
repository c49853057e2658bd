//! Domain types for the orchestration core

mod breakpoint;
mod iteration;
mod milestone;
mod project;
mod retry;
mod session;
mod work_item;

pub use breakpoint::{Breakpoint, Disposition};
pub use iteration::{Decision, Iteration};
pub use milestone::{Milestone, MilestoneStatus};
pub use project::{Project, ProjectStatus};
pub use retry::RetryRecord;
pub use session::{Session, SessionStatus, TokenUsage};
pub use work_item::{TaskType, WorkItem, WorkItemKind, WorkStatus};

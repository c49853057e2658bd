//! WorkItem - the unifying record for epics, stories, tasks, and subtasks

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use workstore::{IndexValue, Record};

/// Granularity of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemKind {
    Epic,
    Story,
    Task,
    Subtask,
}

impl std::fmt::Display for WorkItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Epic => write!(f, "epic"),
            Self::Story => write!(f, "story"),
            Self::Task => write!(f, "task"),
            Self::Subtask => write!(f, "subtask"),
        }
    }
}

impl std::str::FromStr for WorkItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "epic" => Ok(Self::Epic),
            "story" => Ok(Self::Story),
            "task" => Ok(Self::Task),
            "subtask" => Ok(Self::Subtask),
            _ => Err(format!("Unknown work item kind: {}", s)),
        }
    }
}

/// Workflow status of a work item. Transitions are driven solely by the
/// scheduler; see the transition table there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Created, dependencies not yet satisfied
    #[default]
    Pending,
    /// Dependencies satisfied, eligible for dispatch
    Ready,
    /// Picked up by an execution
    Running,
    /// Paused behind an unresolved breakpoint
    Blocked,
    /// Failed, waiting out a backoff delay
    Retrying,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
    /// Terminal cancellation
    Cancelled,
}

impl WorkStatus {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Blocked => write!(f, "blocked"),
            Self::Retrying => write!(f, "retrying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Fine-grained work label used for turn budgeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Validation,
    #[default]
    CodeGeneration,
    Refactoring,
    Debugging,
    ErrorAnalysis,
    Planning,
    Documentation,
    Testing,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::CodeGeneration => write!(f, "code_generation"),
            Self::Refactoring => write!(f, "refactoring"),
            Self::Debugging => write!(f, "debugging"),
            Self::ErrorAnalysis => write!(f, "error_analysis"),
            Self::Planning => write!(f, "planning"),
            Self::Documentation => write!(f, "documentation"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// A unit of work in the project hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Owning project
    pub project_id: i64,

    /// Granularity of this item
    pub kind: WorkItemKind,

    /// Human-readable title
    pub title: String,

    /// What needs to be done
    pub description: String,

    /// Parent item id; semantics depend on kind (epics have none, a
    /// story's parent is an epic, a subtask's parent is a task)
    pub parent_id: Option<i64>,

    /// Base priority in [1..10]
    pub priority: u8,

    /// Current workflow status
    pub status: WorkStatus,

    /// Fine-grained label for turn budgeting
    pub task_type: TaskType,

    /// Execution attempts consumed so far
    pub attempts: u32,

    /// Retry budget
    pub max_attempts: u32,

    /// Opaque metadata; well-known keys have typed accessors
    pub metadata: Map<String, Value>,

    /// Whether completion requires an architecture decision record
    pub requires_adr: bool,

    /// Whether the work touches architecture
    pub has_architectural_changes: bool,

    /// Free-text summary set on completion
    pub changes_summary: Option<String>,
}

impl WorkItem {
    /// Create a new item with defaults (pending, priority 5, 3 attempts)
    pub fn new(project_id: i64, kind: WorkItemKind, title: impl Into<String>) -> Self {
        Self {
            project_id,
            kind,
            title: title.into(),
            description: String::new(),
            parent_id: None,
            priority: 5,
            status: WorkStatus::Pending,
            task_type: TaskType::default(),
            attempts: 0,
            max_attempts: 3,
            metadata: Map::new(),
            requires_adr: false,
            has_architectural_changes: false,
            changes_summary: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the parent item
    pub fn with_parent(mut self, parent_id: i64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set the base priority, clamped to [1..10]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    /// Set the fine-grained task type
    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Set the retry budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Direct dependency ids, read from `metadata.dependencies`
    pub fn dependencies(&self) -> Vec<i64> {
        self.metadata
            .get("dependencies")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default()
    }

    /// Replace the dependency list in `metadata.dependencies`
    pub fn set_dependencies(&mut self, deps: Vec<i64>) {
        self.metadata
            .insert("dependencies".to_string(), Value::from(deps));
    }

    /// Builder form of [`set_dependencies`](Self::set_dependencies)
    pub fn with_dependencies(mut self, deps: Vec<i64>) -> Self {
        self.set_dependencies(deps);
        self
    }

    /// Deadline (Unix milliseconds), read from `metadata.deadline`
    pub fn deadline(&self) -> Option<i64> {
        self.metadata.get("deadline").and_then(Value::as_i64)
    }

    /// Set the deadline in `metadata.deadline`
    pub fn set_deadline(&mut self, deadline_ms: i64) {
        self.metadata.insert("deadline".to_string(), Value::from(deadline_ms));
    }

    /// Whether the retry budget allows another attempt
    pub fn has_retry_budget(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

impl Record for WorkItem {
    fn collection_name() -> &'static str {
        "work_items"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("project".to_string(), IndexValue::Int(self.project_id));
        fields.insert("kind".to_string(), IndexValue::String(self.kind.to_string()));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("task_type".to_string(), IndexValue::String(self.task_type.to_string()));
        if let Some(parent) = self.parent_id {
            fields.insert("parent".to_string(), IndexValue::Int(parent));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_new_defaults() {
        let item = WorkItem::new(1, WorkItemKind::Task, "Build parser");
        assert_eq!(item.status, WorkStatus::Pending);
        assert_eq!(item.priority, 5);
        assert_eq!(item.max_attempts, 3);
        assert!(item.parent_id.is_none());
        assert!(item.dependencies().is_empty());
    }

    #[test]
    fn test_priority_clamped() {
        let item = WorkItem::new(1, WorkItemKind::Task, "t").with_priority(15);
        assert_eq!(item.priority, 10);

        let item = WorkItem::new(1, WorkItemKind::Task, "t").with_priority(0);
        assert_eq!(item.priority, 1);
    }

    #[test]
    fn test_dependencies_accessor_round_trip() {
        let mut item = WorkItem::new(1, WorkItemKind::Task, "t");
        item.set_dependencies(vec![3, 5, 8]);
        assert_eq!(item.dependencies(), vec![3, 5, 8]);
    }

    #[test]
    fn test_dependencies_ignores_malformed_entries() {
        let mut item = WorkItem::new(1, WorkItemKind::Task, "t");
        item.metadata.insert(
            "dependencies".to_string(),
            serde_json::json!([1, "oops", 2]),
        );
        assert_eq!(item.dependencies(), vec![1, 2]);
    }

    #[test]
    fn test_deadline_accessor() {
        let mut item = WorkItem::new(1, WorkItemKind::Task, "t");
        assert!(item.deadline().is_none());
        item.set_deadline(1_700_000_000_000);
        assert_eq!(item.deadline(), Some(1_700_000_000_000));
    }

    #[test]
    fn test_status_terminal() {
        assert!(WorkStatus::Completed.is_terminal());
        assert!(WorkStatus::Failed.is_terminal());
        assert!(WorkStatus::Cancelled.is_terminal());
        assert!(!WorkStatus::Running.is_terminal());
        assert!(!WorkStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_indexed_fields() {
        let item = WorkItem::new(4, WorkItemKind::Story, "t").with_parent(2);
        let fields = item.indexed_fields();
        assert_eq!(fields.get("project"), Some(&IndexValue::Int(4)));
        assert_eq!(fields.get("kind"), Some(&IndexValue::String("story".to_string())));
        assert_eq!(fields.get("status"), Some(&IndexValue::String("pending".to_string())));
        assert_eq!(fields.get("parent"), Some(&IndexValue::Int(2)));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut item = WorkItem::new(1, WorkItemKind::Subtask, "Wire codec")
            .with_parent(9)
            .with_task_type(TaskType::Refactoring)
            .with_priority(8);
        item.set_dependencies(vec![2]);

        let json = serde_json::to_string(&item).unwrap();
        let back: WorkItem = serde_json::from_str(&json).unwrap();

        assert_eq!(back.kind, WorkItemKind::Subtask);
        assert_eq!(back.parent_id, Some(9));
        assert_eq!(back.task_type, TaskType::Refactoring);
        assert_eq!(back.priority, 8);
        assert_eq!(back.dependencies(), vec![2]);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("epic".parse::<WorkItemKind>().unwrap(), WorkItemKind::Epic);
        assert_eq!("SUBTASK".parse::<WorkItemKind>().unwrap(), WorkItemKind::Subtask);
        assert!("phase".parse::<WorkItemKind>().is_err());
    }
}

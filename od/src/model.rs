//! WorkModel - hierarchy-enforcing mutations over the store
//!
//! Creation and milestone operations run inside store transactions so a
//! failed invariant check leaves nothing behind.

use std::sync::Arc;

use tracing::{debug, info};
use workstore::{Filter, Row, Store, Txn};

use crate::domain::{Milestone, MilestoneStatus, Project, WorkItem, WorkItemKind, WorkStatus};
use crate::error::{ErrorKind, OrchError, OrchResult};
use crate::events::{Event, EventBus};

/// Enforces hierarchy and type invariants on create/update
#[derive(Clone)]
pub struct WorkModel {
    store: Arc<Store>,
    events: EventBus,
}

impl WorkModel {
    pub fn new(store: Arc<Store>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Create a project
    pub fn create_project(&self, project: Project) -> OrchResult<i64> {
        debug!(name = %project.name, "create_project: called");
        Ok(self.store.insert(&project)?)
    }

    /// Create an epic; epics never have a parent
    pub fn create_epic(&self, project_id: i64, title: &str, description: &str) -> OrchResult<i64> {
        debug!(project_id, title, "create_epic: called");
        let epic = WorkItem::new(project_id, WorkItemKind::Epic, title).with_description(description);
        self.insert_validated(epic)
    }

    /// Create a story under an epic of the same project
    pub fn create_story(&self, project_id: i64, epic_id: i64, title: &str, description: &str) -> OrchResult<i64> {
        debug!(project_id, epic_id, title, "create_story: called");
        let story = WorkItem::new(project_id, WorkItemKind::Story, title)
            .with_description(description)
            .with_parent(epic_id);
        self.insert_validated(story)
    }

    /// Create a task or subtask; parent rules depend on the kind
    pub fn create_task(&self, item: WorkItem) -> OrchResult<i64> {
        debug!(project_id = item.project_id, kind = %item.kind, title = %item.title, "create_task: called");
        if !matches!(item.kind, WorkItemKind::Task | WorkItemKind::Subtask) {
            return Err(OrchError::new(
                ErrorKind::Validation,
                "work_model",
                format!("create_task accepts task or subtask, got {}", item.kind),
            ));
        }
        self.insert_validated(item)
    }

    /// Create a milestone; every required epic must belong to the project
    pub fn create_milestone(
        &self,
        project_id: i64,
        name: &str,
        required_epics: Vec<i64>,
        version: Option<String>,
    ) -> OrchResult<i64> {
        debug!(project_id, name, ?required_epics, "create_milestone: called");
        let id = self.store.transaction(|txn| {
            for epic_id in &required_epics {
                let epic: Row<WorkItem> = txn.get(*epic_id)?;
                if epic.data.kind != WorkItemKind::Epic || epic.data.project_id != project_id {
                    return Err(OrchError::new(
                        ErrorKind::Validation,
                        "work_model",
                        format!("id {} is not an epic of project {}", epic_id, project_id),
                    ));
                }
            }
            let mut milestone = Milestone::new(project_id, name, required_epics.clone());
            milestone.version = version.clone();
            Ok(txn.insert(&milestone)?)
        })?;
        Ok(id)
    }

    /// Mark an epic completed and notify consumers
    pub fn complete_epic(&self, epic_id: i64) -> OrchResult<WorkStatus> {
        debug!(epic_id, "complete_epic: called");
        let row: Row<WorkItem> = self.store.get(epic_id)?;
        if row.data.kind != WorkItemKind::Epic {
            return Err(OrchError::new(
                ErrorKind::Validation,
                "work_model",
                format!("id {} is a {}, not an epic", epic_id, row.data.kind),
            ));
        }
        if row.data.status == WorkStatus::Completed {
            return Ok(WorkStatus::Completed);
        }

        let mut epic = row.data.clone();
        epic.status = WorkStatus::Completed;
        self.store.update(epic_id, row.version, &epic)?;

        info!(epic_id, "Epic completed");
        self.events.emit(Event::EpicCompleted { epic_id });
        Ok(WorkStatus::Completed)
    }

    /// Achieve a milestone; valid only when every required epic is completed
    pub fn achieve_milestone(&self, milestone_id: i64) -> OrchResult<MilestoneStatus> {
        debug!(milestone_id, "achieve_milestone: called");
        let achieved = self.store.transaction(|txn| {
            let row: Row<Milestone> = txn.get(milestone_id)?;
            if row.data.status == MilestoneStatus::Achieved {
                return Ok(false);
            }

            for epic_id in &row.data.required_epics {
                let epic: Row<WorkItem> = txn.get(*epic_id)?;
                if epic.data.status != WorkStatus::Completed {
                    return Err(OrchError::new(
                        ErrorKind::Validation,
                        "work_model",
                        format!("epic {} is {}, not completed", epic_id, epic.data.status),
                    ));
                }
            }

            let mut milestone = row.data.clone();
            milestone.status = MilestoneStatus::Achieved;
            txn.update(milestone_id, row.version, &milestone)?;
            Ok(true)
        })?;

        if achieved {
            info!(milestone_id, "Milestone achieved");
            self.events.emit(Event::MilestoneAchieved { milestone_id });
        }
        Ok(MilestoneStatus::Achieved)
    }

    /// Items whose parent no longer resolves (soft-deleted); deletes are
    /// non-cascading, so these are surfaced rather than hidden
    pub fn orphans(&self, project_id: i64) -> OrchResult<Vec<Row<WorkItem>>> {
        let items: Vec<Row<WorkItem>> = self.store.query(&[Filter::eq("project", project_id)])?;
        let ids: std::collections::HashSet<i64> = items.iter().map(|r| r.id).collect();
        Ok(items
            .into_iter()
            .filter(|r| r.data.parent_id.map(|p| !ids.contains(&p)).unwrap_or(false))
            .collect())
    }

    fn insert_validated(&self, item: WorkItem) -> OrchResult<i64> {
        let id = self.store.transaction(|txn| {
            validate_hierarchy(txn, &item)?;
            Ok::<i64, OrchError>(txn.insert(&item)?)
        })?;
        Ok(id)
    }
}

/// Check the parent/type rules for a work item inside a transaction
pub(crate) fn validate_hierarchy(txn: &Txn<'_>, item: &WorkItem) -> OrchResult<()> {
    // Project must exist
    let _: Row<Project> = txn.get(item.project_id).map_err(|_| {
        OrchError::new(
            ErrorKind::NotFound,
            "work_model",
            format!("project {} not found", item.project_id),
        )
    })?;

    let parent_kind = |parent_id: i64| -> OrchResult<WorkItemKind> {
        let parent: Row<WorkItem> = txn.get(parent_id).map_err(|_| {
            OrchError::new(
                ErrorKind::NotFound,
                "work_model",
                format!("parent {} not found", parent_id),
            )
        })?;
        if parent.data.project_id != item.project_id {
            return Err(OrchError::new(
                ErrorKind::Validation,
                "work_model",
                format!("parent {} belongs to another project", parent_id),
            ));
        }
        Ok(parent.data.kind)
    };

    let violation = |message: String| OrchError::new(ErrorKind::Validation, "work_model", message);

    match item.kind {
        WorkItemKind::Epic => {
            if item.parent_id.is_some() {
                return Err(violation("an epic cannot have a parent".to_string()));
            }
        }
        WorkItemKind::Story => match item.parent_id {
            Some(parent_id) if parent_kind(parent_id)? == WorkItemKind::Epic => {}
            Some(parent_id) => {
                return Err(violation(format!("story parent {} must be an epic", parent_id)));
            }
            None => return Err(violation("a story requires an epic parent".to_string())),
        },
        WorkItemKind::Task => match item.parent_id {
            None => {}
            Some(parent_id) if parent_kind(parent_id)? == WorkItemKind::Story => {}
            Some(parent_id) => {
                return Err(violation(format!("task parent {} must be a story", parent_id)));
            }
        },
        WorkItemKind::Subtask => match item.parent_id {
            Some(parent_id) if parent_kind(parent_id)? == WorkItemKind::Task => {}
            Some(parent_id) => {
                return Err(violation(format!("subtask parent {} must be a task", parent_id)));
            }
            None => return Err(violation("a subtask requires a task parent".to_string())),
        },
    }
    Ok(())
}

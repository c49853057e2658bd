//! Project domain type

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use workstore::{IndexValue, Record};

/// Project lifecycle status, flipped manually by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// A project owns work items, milestones, and sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub description: String,
    /// Where the agent's deliverables land
    pub working_dir: PathBuf,
    pub status: ProjectStatus,
}

impl Project {
    pub fn new(name: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            working_dir: working_dir.into(),
            status: ProjectStatus::Active,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Record for Project {
    fn collection_name() -> &'static str {
        "projects"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), IndexValue::String(self.name.clone()));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_defaults_active() {
        let project = Project::new("oauth", "/tmp/oauth");
        assert_eq!(project.status, ProjectStatus::Active);
        assert_eq!(project.working_dir, PathBuf::from("/tmp/oauth"));
    }

    #[test]
    fn test_project_serde() {
        let project = Project::new("oauth", "/tmp/oauth").with_description("OAuth work");
        let json = serde_json::to_string(&project).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "oauth");
        assert_eq!(back.description, "OAuth work");
    }
}

//! Milestone domain type
//!
//! A milestone is a zero-duration checkpoint over a set of epics; it is
//! achieved exactly when every required epic is completed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use workstore::{IndexValue, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    #[default]
    Pending,
    Achieved,
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Achieved => write!(f, "achieved"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub project_id: i64,
    pub name: String,
    /// Epic ids that must all be completed
    pub required_epics: Vec<i64>,
    pub status: MilestoneStatus,
    /// Optional version label (e.g. "v1.2.0")
    pub version: Option<String>,
}

impl Milestone {
    pub fn new(project_id: i64, name: impl Into<String>, required_epics: Vec<i64>) -> Self {
        Self {
            project_id,
            name: name.into(),
            required_epics,
            status: MilestoneStatus::Pending,
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl Record for Milestone {
    fn collection_name() -> &'static str {
        "milestones"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("project".to_string(), IndexValue::Int(self.project_id));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields
    }
}

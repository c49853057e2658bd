//! Prompt bundle assembly
//!
//! The bundle gathers task description, project context, the carryover
//! summary, the prior iteration digest, and accumulated feedback, then
//! renders them into the iteration prompt by placeholder replacement.

use std::collections::HashMap;

use crate::domain::{Project, WorkItem};

const PROMPT_TEMPLATE: &str = "\
You are executing one task for project {{project-name}}.
Working directory: {{working-directory}}

# Task: {{task-title}}
{{task-description}}

# Session summary
{{summary}}

# Previous iteration
{{prior-digest}}

# Feedback to address
{{feedback}}

This is iteration {{iteration}}. Produce the deliverables and report every
file you create or modify.
";

/// FNV-1a digest of a prompt or response, stable across processes
pub fn digest(text: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{:016x}", hash)
}

/// Everything that feeds one iteration's prompt
#[derive(Debug, Clone)]
pub struct PromptBundle {
    pub task_title: String,
    pub task_description: String,
    pub project_name: String,
    pub working_dir: String,
    pub summary: Option<String>,
    pub prior_digest: Option<String>,
    pub feedback: Vec<String>,
    pub iteration: u32,
}

impl PromptBundle {
    pub fn new(task: &WorkItem, project: &Project) -> Self {
        Self {
            task_title: task.title.clone(),
            task_description: task.description.clone(),
            project_name: project.name.clone(),
            working_dir: project.working_dir.display().to_string(),
            summary: None,
            prior_digest: None,
            feedback: Vec::new(),
            iteration: 1,
        }
    }

    /// Fold refinement feedback into subsequent prompts
    pub fn push_feedback(&mut self, feedback: impl Into<String>) {
        self.feedback.push(feedback.into());
    }

    /// Render the prompt for the current iteration
    pub fn render(&self) -> String {
        let mut context = HashMap::new();
        context.insert("project-name", self.project_name.clone());
        context.insert("working-directory", self.working_dir.clone());
        context.insert("task-title", self.task_title.clone());
        context.insert("task-description", self.task_description.clone());
        context.insert("summary", self.summary.clone().unwrap_or_else(|| "(none)".to_string()));
        context.insert(
            "prior-digest",
            self.prior_digest.clone().unwrap_or_else(|| "(first iteration)".to_string()),
        );
        context.insert(
            "feedback",
            if self.feedback.is_empty() {
                "(none)".to_string()
            } else {
                self.feedback.join("\n")
            },
        );
        context.insert("iteration", self.iteration.to_string());

        let mut result = PROMPT_TEMPLATE.to_string();
        for (key, value) in &context {
            let placeholder = format!("{{{{{}}}}}", key);
            result = result.replace(&placeholder, value);
        }
        result
    }
}

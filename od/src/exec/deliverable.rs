//! Deliverable assessment
//!
//! When an execution runs out of turns without hitting the completion
//! decision, the artifacts it produced decide the outcome. This is the only
//! place a task is reported as `partial` or `success_with_limits`; a turn
//! cap with acceptable deliverables is never reported as a failure.

use std::fs;
use std::path::Path;

use tracing::debug;

/// Terminal outcome of one task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Completed within limits
    Success,
    /// Hit the turn cap with good deliverables present
    SuccessWithLimits,
    /// Hit the cap with some usable output
    Partial,
    /// Nothing usable was produced
    Failed,
    /// Escalated to a breakpoint
    Blocked,
}

impl std::fmt::Display for ExecOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::SuccessWithLimits => write!(f, "success_with_limits"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Per-file checks
#[derive(Debug, Clone)]
pub struct FileCheck {
    pub path: String,
    pub exists: bool,
    pub non_empty: bool,
    pub syntax_ok: bool,
}

/// Aggregate over the execution's files
#[derive(Debug, Clone)]
pub struct Assessment {
    pub files: Vec<FileCheck>,
    /// Composite quality: 0.5 x valid ratio + 0.3 x non-empty ratio +
    /// 0.2 x min(count, 5)/5
    pub quality: f64,
}

impl Assessment {
    /// Files that exist with content
    pub fn present(&self) -> usize {
        self.files.iter().filter(|f| f.exists && f.non_empty).count()
    }
}

/// Check every file the execution reported touching, relative to the
/// project working directory
pub fn assess_files(working_dir: &Path, files: &[String]) -> Assessment {
    let checks: Vec<FileCheck> = files.iter().map(|path| check_file(working_dir, path)).collect();

    let quality = if checks.is_empty() {
        0.0
    } else {
        let total = checks.len() as f64;
        let valid = checks.iter().filter(|f| f.exists && f.syntax_ok).count() as f64;
        let non_empty = checks.iter().filter(|f| f.exists && f.non_empty).count() as f64;
        let count_signal = (checks.len().min(5)) as f64 / 5.0;
        0.5 * (valid / total) + 0.3 * (non_empty / total) + 0.2 * count_signal
    };

    debug!(files = checks.len(), quality, "Deliverables assessed");
    Assessment { files: checks, quality }
}

/// Classify a turn-exhausted execution from its deliverables
pub fn classify_exhausted(assessment: &Assessment) -> ExecOutcome {
    let present = assessment.present();
    if assessment.quality >= 0.7 && present > 0 {
        ExecOutcome::SuccessWithLimits
    } else if assessment.quality >= 0.5 || present > 0 {
        ExecOutcome::Partial
    } else {
        ExecOutcome::Failed
    }
}

fn check_file(working_dir: &Path, path: &str) -> FileCheck {
    let full = working_dir.join(path);
    match fs::read_to_string(&full) {
        Ok(content) => FileCheck {
            path: path.to_string(),
            exists: true,
            non_empty: !content.trim().is_empty(),
            syntax_ok: syntax_valid(path, &content),
        },
        Err(_) => FileCheck {
            path: path.to_string(),
            exists: false,
            non_empty: false,
            syntax_ok: false,
        },
    }
}

/// Syntax plausibility by extension. Structured formats must parse; code
/// must balance its delimiters; everything else passes on content alone.
pub fn syntax_valid(path: &str, content: &str) -> bool {
    let extension = Path::new(path).extension().and_then(|e| e.to_str()).unwrap_or("");
    match extension {
        "json" => serde_json::from_str::<serde_json::Value>(content).is_ok(),
        "yaml" | "yml" => serde_yaml::from_str::<serde_yaml::Value>(content).is_ok(),
        "rs" | "c" | "h" | "cpp" | "go" | "java" | "js" | "ts" | "py" => balanced_delimiters(content),
        _ => true,
    }
}

/// Check bracket balance outside string literals and line comments
fn balanced_delimiters(content: &str) -> bool {
    let mut stack = Vec::new();
    let mut chars = content.chars().peekable();
    let mut in_string: Option<char> = None;
    let mut in_comment = false;

    while let Some(c) = chars.next() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }
        if let Some(quote) = in_string {
            if c == '\\' {
                chars.next();
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            '/' if chars.peek() == Some(&'/') => in_comment = true,
            '#' => in_comment = true,
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

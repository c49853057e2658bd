//! Orchestration error types
//!
//! Every failure in the core carries one of a closed set of kinds plus the
//! component it came from and a correlation id (task or session) where one
//! exists. Retry loops inspect the kind, never the message.

use thiserror::Error;

use workstore::StoreError;

use crate::agent::AgentError;

/// Closed taxonomy of failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input or response failed structural checks
    Validation,
    /// Credentials or authorization problem
    Authentication,
    /// Referenced entity missing
    NotFound,
    /// Optimistic concurrency mismatch
    Conflict,
    /// Operation exceeded its bound
    Timeout,
    /// Dependency transiently unreachable
    Unavailable,
    /// Malformed response from an external capability
    Protocol,
    /// Illegal state transition; indicates a bug in the caller
    State,
    /// Cycle in the dependency graph
    Deadlock,
    /// Max turns or retries reached
    BudgetExhausted,
    /// User-initiated cancellation
    Cancelled,
}

impl ErrorKind {
    /// Whether the failure may be retried with backoff at the task level
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Conflict | ErrorKind::Timeout | ErrorKind::Unavailable | ErrorKind::Protocol
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Protocol => "protocol_error",
            Self::State => "state_error",
            Self::Deadlock => "deadlock",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

/// An orchestration failure
#[derive(Debug, Error)]
#[error("[{kind}] {component}: {message}")]
pub struct OrchError {
    pub kind: ErrorKind,
    pub message: String,
    pub component: &'static str,
    /// Task id or session key this failure belongs to
    pub correlation: Option<String>,
    /// Recovery hint where one is known
    pub hint: Option<String>,
    /// Participating ids when kind is Deadlock
    pub cycle: Vec<i64>,
}

impl OrchError {
    pub fn new(kind: ErrorKind, component: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            component,
            correlation: None,
            hint: None,
            cycle: Vec::new(),
        }
    }

    /// Build a deadlock error naming the cycle
    pub fn deadlock(component: &'static str, cycle: Vec<i64>) -> Self {
        let ids = cycle.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" -> ");
        Self {
            kind: ErrorKind::Deadlock,
            message: format!("dependency cycle: {}", ids),
            component,
            correlation: None,
            hint: Some("remove one dependency edge from the cycle".to_string()),
            cycle,
        }
    }

    pub fn with_correlation(mut self, correlation: impl Into<String>) -> Self {
        self.correlation = Some(correlation.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Whether the failure may be retried with backoff
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<StoreError> for OrchError {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Conflict { .. } => ErrorKind::Conflict,
            StoreError::Integrity(_) => ErrorKind::Validation,
            StoreError::Unavailable(_) => ErrorKind::Unavailable,
            StoreError::Serde(_) => ErrorKind::Protocol,
        };
        OrchError::new(kind, "store", err.to_string())
    }
}

impl From<AgentError> for OrchError {
    fn from(err: AgentError) -> Self {
        let kind = err.kind();
        OrchError::new(kind, "agent", err.to_string())
    }
}

/// Result alias for core operations
pub type OrchResult<T> = Result<T, OrchError>;

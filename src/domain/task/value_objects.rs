use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents the lifecycle status of a task
///
/// # Status Transitions
/// ```text
/// Pending -> Running -> Completed
///    |          |-----> Failed
///    |          |-----> TimedOut
///    |          `-----> Cancelled
///    `----------------> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is persisted and waiting for an admission slot
    Pending,
    /// Task body is executing
    Running,
    /// Agent returned a result
    Completed,
    /// Agent returned an error or panicked
    Failed,
    /// Task was cancelled before reaching another terminal state
    Cancelled,
    /// Task exceeded its maximum runtime
    TimedOut,
}

impl TaskStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::TimedOut,
    ];

    /// Checks if a transition from current status to next status is valid
    ///
    /// # Valid Transitions
    /// - Pending -> Running
    /// - Pending -> Cancelled
    /// - Running -> Completed | Failed | TimedOut | Cancelled
    ///
    /// # Example
    /// ```
    /// use agent_orchestrator::domain::task::value_objects::TaskStatus;
    ///
    /// assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
    /// assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
    /// ```
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Running, Cancelled)
        )
    }

    /// Statuses from which `next` may be entered
    pub fn predecessors(next: TaskStatus) -> Vec<TaskStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }

    /// Whether no further transition can leave this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::TimedOut
        )
    }

    /// Stable storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown task status: {}", s))
    }
}

/// Name of a registered agent
///
/// Doubles as the agent's mailbox name for message routing.
///
/// # Invariants
/// - Non-empty, at most 64 characters
/// - ASCII alphanumerics, `-`, `_` and `.` only
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentKind(String);

impl AgentKind {
    const MAX_LEN: usize = 64;

    /// Creates a new AgentKind
    ///
    /// # Example
    /// ```
    /// use agent_orchestrator::domain::task::value_objects::AgentKind;
    ///
    /// let kind = AgentKind::new("orchestrator").expect("valid kind");
    /// assert_eq!(kind.as_str(), "orchestrator");
    /// assert!(AgentKind::new("has space").is_err());
    /// ```
    pub fn new(kind: impl Into<String>) -> Result<Self, String> {
        let kind = kind.into();
        if Self::is_valid(&kind) {
            Ok(AgentKind(kind))
        } else {
            Err(format!("Invalid agent kind: {:?}", kind))
        }
    }

    fn is_valid(kind: &str) -> bool {
        !kind.is_empty()
            && kind.len() <= Self::MAX_LEN
            && kind
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }

    /// Returns the kind as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AgentKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AgentKind::new(value)
    }
}

impl From<AgentKind> for String {
    fn from(kind: AgentKind) -> Self {
        kind.0
    }
}

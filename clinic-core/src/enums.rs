//! Queue enums: triage priority and entry status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PRIORITY
// ============================================================================

/// Triage priority of a queue entry.
///
/// EMERGENCY entries always precede NORMAL entries regardless of token age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Emergency,
    #[default]
    Normal,
}

impl Priority {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Priority::Emergency => "EMERGENCY",
            Priority::Normal => "NORMAL",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, PriorityParseError> {
        match s.trim().to_uppercase().as_str() {
            "EMERGENCY" => Ok(Priority::Emergency),
            "NORMAL" => Ok(Priority::Normal),
            _ => Err(PriorityParseError(s.to_string())),
        }
    }

    /// Sort rank, lower is served first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Emergency => 0,
            Priority::Normal => 1,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for Priority {
    type Err = PriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid priority string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityParseError(pub String);

impl fmt::Display for PriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid priority: {}", self.0)
    }
}

impl std::error::Error for PriorityParseError {}

// ============================================================================
// QUEUE STATUS
// ============================================================================

/// Lifecycle status of a queue entry.
///
/// ```text
/// WAITING ──> IN_PROGRESS ──> COMPLETED
///    │
///    └──────> SKIPPED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    #[default]
    Waiting,
    InProgress,
    Completed,
    Skipped,
}

impl QueueStatus {
    /// Statuses covered by the one-active-entry-per-patient constraint.
    pub const ACTIVE: [QueueStatus; 2] = [QueueStatus::Waiting, QueueStatus::InProgress];

    /// Statuses that make up a doctor's history.
    pub const TERMINAL: [QueueStatus; 2] = [QueueStatus::Completed, QueueStatus::Skipped];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "WAITING",
            QueueStatus::InProgress => "IN_PROGRESS",
            QueueStatus::Completed => "COMPLETED",
            QueueStatus::Skipped => "SKIPPED",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, QueueStatusParseError> {
        match s.trim().to_uppercase().as_str() {
            "WAITING" => Ok(QueueStatus::Waiting),
            "IN_PROGRESS" => Ok(QueueStatus::InProgress),
            "COMPLETED" => Ok(QueueStatus::Completed),
            "SKIPPED" => Ok(QueueStatus::Skipped),
            _ => Err(QueueStatusParseError(s.to_string())),
        }
    }

    /// WAITING or IN_PROGRESS.
    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Waiting | QueueStatus::InProgress)
    }

    /// COMPLETED or SKIPPED. Terminal entries are kept as history.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Skipped)
    }

    /// Whether the strict state machine allows `self -> next`.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Waiting, QueueStatus::InProgress)
                | (QueueStatus::Waiting, QueueStatus::Skipped)
                | (QueueStatus::InProgress, QueueStatus::Completed)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for QueueStatus {
    type Err = QueueStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid queue status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatusParseError(pub String);

impl fmt::Display for QueueStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid queue status: {}", self.0)
    }
}

impl std::error::Error for QueueStatusParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [QueueStatus; 4] = [
        QueueStatus::Waiting,
        QueueStatus::InProgress,
        QueueStatus::Completed,
        QueueStatus::Skipped,
    ];

    #[test]
    fn test_priority_db_roundtrip() {
        for p in [Priority::Emergency, Priority::Normal] {
            assert_eq!(Priority::from_db_str(p.as_db_str()), Ok(p));
        }
        assert_eq!("emergency".parse::<Priority>(), Ok(Priority::Emergency));
        assert!("URGENT".parse::<Priority>().is_err());
    }

    #[test]
    fn test_priority_default_and_rank() {
        assert_eq!(Priority::default(), Priority::Normal);
        assert!(Priority::Emergency.rank() < Priority::Normal.rank());
    }

    #[test]
    fn test_status_serde_names() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&QueueStatus::InProgress)?, "\"IN_PROGRESS\"");
        let parsed: QueueStatus = serde_json::from_str("\"SKIPPED\"")?;
        assert_eq!(parsed, QueueStatus::Skipped);
        Ok(())
    }

    #[test]
    fn test_status_parse_rejects_unknown() {
        let err = QueueStatus::from_db_str("DONE").unwrap_err();
        assert_eq!(err.to_string(), "Invalid queue status: DONE");
    }

    #[test]
    fn test_state_machine_edges() {
        let allowed: Vec<(QueueStatus, QueueStatus)> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(
            allowed,
            vec![
                (QueueStatus::Waiting, QueueStatus::InProgress),
                (QueueStatus::Waiting, QueueStatus::Skipped),
                (QueueStatus::InProgress, QueueStatus::Completed),
            ]
        );
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in QueueStatus::TERMINAL {
            assert!(from.is_terminal());
            assert!(ALL.iter().all(|to| !from.can_transition_to(*to)));
        }
        assert!(!QueueStatus::InProgress.can_transition_to(QueueStatus::Waiting));
    }

    #[test]
    fn test_active_partition() {
        for s in ALL {
            assert_ne!(s.is_active(), s.is_terminal());
        }
    }
}

//! Normalization session state machine
//!
//! A session starts `in_progress` and ends `completed`, `failed` or
//! `reverted`. Terminal sessions accept new stages only after an explicit
//! re-open back to `in_progress`.

use chrono::{DateTime, Utc};
use nomen_common::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Stages are being appended
    InProgress,
    /// All configured stages applied without a fatal error
    Completed,
    /// Explicitly rolled back to an earlier stage
    Reverted,
    /// A stage failed and will not be retried automatically
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Reverted => "reverted",
            SessionStatus::Failed => "failed",
        }
    }

    /// Terminal for automatic processing
    pub fn is_terminal(&self) -> bool {
        match self {
            SessionStatus::InProgress => false,
            SessionStatus::Completed | SessionStatus::Reverted | SessionStatus::Failed => true,
        }
    }

    /// Whether a stage may be appended without re-opening first
    pub fn accepts_stages(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            "reverted" => Ok(SessionStatus::Reverted),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(Error::Internal(format!("Unknown session status: {}", other))),
        }
    }
}

/// One catalog item's transformation lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationSession {
    pub id: i64,
    pub catalog_item_id: i64,
    /// Never changes after creation
    pub original_name: String,
    /// Output of the latest retained stage, or `original_name` with no stages
    pub current_name: String,
    pub stages_count: i64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status change record, returned for logging by callers that drive sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub session_id: i64,
    pub old_status: SessionStatus,
    pub new_status: SessionStatus,
    pub transitioned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            SessionStatus::InProgress,
            SessionStatus::Completed,
            SessionStatus::Reverted,
            SessionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("applied".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_only_in_progress_accepts_stages() {
        assert!(SessionStatus::InProgress.accepts_stages());
        assert!(!SessionStatus::Completed.accepts_stages());
        assert!(!SessionStatus::Reverted.accepts_stages());
        assert!(!SessionStatus::Failed.accepts_stages());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&SessionStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}

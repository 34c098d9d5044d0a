use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Lifecycle status of a build job as persisted and polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Analyzing,
    Waiting,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Analyzing => "analyzing",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// `complete` and `failed` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether a job in `self` may be moved to `next`.
    ///
    /// Staying in the same status is always allowed for non-terminal jobs so
    /// that step-only updates can carry the current status along.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Queued, Self::Analyzing)
                | (Self::Queued, Self::Failed)
                | (Self::Analyzing, Self::Waiting)
                | (Self::Analyzing, Self::Running)
                | (Self::Analyzing, Self::Failed)
                | (Self::Waiting, Self::Running)
                | (Self::Waiting, Self::Failed)
                | (Self::Running, Self::Complete)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "analyzing" => Ok(Self::Analyzing),
            "waiting" => Ok(Self::Waiting),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseError::new("job status", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Analyzing,
        JobStatus::Waiting,
        JobStatus::Running,
        JobStatus::Complete,
        JobStatus::Failed,
    ];

    #[test]
    fn string_form_matches_serde() {
        for status in ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn terminal_statuses_accept_nothing() {
        for next in ALL {
            assert!(!JobStatus::Complete.can_transition_to(next));
            assert!(!JobStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Analyzing));
        assert!(JobStatus::Analyzing.can_transition_to(JobStatus::Waiting));
        assert!(JobStatus::Analyzing.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Waiting.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Complete));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn backward_transitions_are_rejected() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Waiting));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Analyzing));
        assert!(!JobStatus::Waiting.can_transition_to(JobStatus::Analyzing));
        assert!(!JobStatus::Analyzing.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Complete));
    }

    #[test]
    fn unknown_status_is_an_error() {
        assert!("paused".parse::<JobStatus>().is_err());
    }
}

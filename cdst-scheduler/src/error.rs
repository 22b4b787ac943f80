/// Terminal, user-visible error kinds. Transient routing failures, slow
/// checkpoint writes, and per-individual evaluation failures are absorbed
/// with log entries and never reach this enum. Cancellation and timeout
/// are scenario dispositions carried on the terminal progress frame, not
/// API errors.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerError {
    InvalidNetwork {
        reason: String,
    },
    InvalidParameters {
        reason: String,
    },
    RateLimitExceeded {
        user_id: String,
        queued: usize,
    },
    CheckpointFailed {
        scenario_id: String,
        reason: String,
    },
    UnknownScenario {
        scenario_id: String,
    },
    NotReady {
        scenario_id: String,
    },
    DuplicateScenario {
        scenario_id: String,
    },
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidNetwork { .. } => "INVALID_NETWORK",
            SchedulerError::InvalidParameters { .. } => "INVALID_PARAMETERS",
            SchedulerError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            SchedulerError::CheckpointFailed { .. } => "CHECKPOINT_FAILED",
            SchedulerError::UnknownScenario { .. } => "UNKNOWN_SCENARIO",
            SchedulerError::NotReady { .. } => "NOT_READY",
            SchedulerError::DuplicateScenario { .. } => "DUPLICATE_SCENARIO",
        }
    }
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::InvalidNetwork { reason } => {
                write!(f, "network snapshot is invalid: {}", reason)
            }
            SchedulerError::InvalidParameters { reason } => {
                write!(f, "scenario parameters are invalid: {}", reason)
            }
            SchedulerError::RateLimitExceeded { user_id, queued } => write!(
                f,
                "user {} already has {} scenarios queued or running",
                user_id, queued
            ),
            SchedulerError::CheckpointFailed {
                scenario_id,
                reason,
            } => write!(f, "checkpoint for scenario {} is unusable: {}", scenario_id, reason),
            SchedulerError::UnknownScenario { scenario_id } => {
                write!(f, "scenario {} does not exist", scenario_id)
            }
            SchedulerError::NotReady { scenario_id } => {
                write!(f, "scenario {} has not reached a terminal state", scenario_id)
            }
            SchedulerError::DuplicateScenario { scenario_id } => {
                write!(f, "scenario {} is already queued or running", scenario_id)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

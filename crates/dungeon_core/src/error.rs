use std::time::Duration;

use thiserror::Error;

use crate::service::{Amount, EncounterId, ParticipantId};

/// Failures reported by the dungeon service or its transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{op} rejected: {reason}")]
    Rejected { op: &'static str, reason: String },
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("{who} holds {available}, needs {needed}")]
    InsufficientBalance {
        who: ParticipantId,
        needed: Amount,
        available: Amount,
    },
    #[error("{who} authorized {granted}, needs {needed}")]
    InsufficientAllowance {
        who: ParticipantId,
        needed: Amount,
        granted: Amount,
    },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    pub fn rejected(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            op,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything that can stop or interrupt a simulation run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("funding identity holds {available}, needs {needed}")]
    FunderShortfall { needed: Amount, available: Amount },
    #[error("encounter {encounter} still rolling after {waited:?}")]
    TimedOut {
        encounter: EncounterId,
        waited: Duration,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HarnessError {
    /// Only a stalled round is survivable; the driver skips the player and
    /// carries on. Everything else aborts the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HarnessError::TimedOut { .. })
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_recoverable() {
        let timeout = HarnessError::TimedOut {
            encounter: 3,
            waited: Duration::from_secs(1),
        };
        assert!(timeout.is_recoverable());

        let shortfall = HarnessError::FunderShortfall {
            needed: 10,
            available: 1,
        };
        assert!(!shortfall.is_recoverable());

        let rejected: HarnessError = ServiceError::rejected("beginCombatRound", "paused").into();
        assert!(!rejected.is_recoverable());
        assert_eq!("beginCombatRound rejected: paused", rejected.to_string());
    }
}

//! Library errors.
//!
//! Expected arbitration outcomes (rejections, preemptions, downgrades) are
//! lifecycle events, not errors. `ArbiterError` covers the cases where the
//! engine itself cannot go on or was misconfigured.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArbiterError {
    /// The arbitration loop has exited; the handle can no longer reach it.
    #[error("arbitration loop has stopped")]
    EngineStopped,

    /// An internal invariant was broken. The loop halts when it sees this.
    #[error("arbitration invariant violated: {0}")]
    InvariantViolated(String),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl ArbiterError {
    /// Whether the loop cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ArbiterError::EngineStopped | ArbiterError::InvariantViolated(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ArbiterError::InvariantViolated("2 exclusive demands active".into());
        assert_eq!(
            err.to_string(),
            "arbitration invariant violated: 2 exclusive demands active"
        );
        assert!(err.is_fatal());
        assert!(!ArbiterError::InvalidConfig("x".into()).is_fatal());
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = ArbiterError::EngineStopped.into();
        assert_eq!(
            err.downcast_ref::<ArbiterError>(),
            Some(&ArbiterError::EngineStopped)
        );
    }
}

use thiserror::Error;

/// Transport failures ("no answer") are kept apart from negative answers
/// reported inside the probe envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe to {0} timed out")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("agent returned HTTP {0}")]
    Status(u16),

    #[error("invalid probe response: {0}")]
    Decode(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("operation failed: {0}")]
    Failed(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("peer {0} unavailable (circuit open)")]
    Unavailable(String),
}

impl ProbeError {
    /// True when the agent never produced an answer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProbeError::Timeout(_)
                | ProbeError::Transport(_)
                | ProbeError::Status(_)
                | ProbeError::Unavailable(_)
        )
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout(
                err.url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "agent".to_string()),
            )
        } else {
            ProbeError::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_answer_errors_are_distinct() {
        assert!(ProbeError::Timeout("x".into()).is_transport());
        assert!(ProbeError::Status(502).is_transport());
        assert!(!ProbeError::Failed("db down".into()).is_transport());
        assert!(!ProbeError::NotImplemented("getRole".into()).is_transport());
    }
}

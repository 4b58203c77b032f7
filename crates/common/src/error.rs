//! Error types for consolegate

use thiserror::Error;

/// Result type alias using consolegate Error
pub type Result<T> = std::result::Result<T, Error>;

/// consolegate error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Ticket store busy for more than {millis}ms")]
    StoreTimeout { millis: u64 },

    #[error("Access ticket expired or already consumed")]
    TicketExpiredOrConsumed,

    #[error("Session id does not match")]
    SessionMismatch,

    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("Agent request timed out after {seconds}s")]
    AgentTimeout { seconds: u64 },

    #[error("Agent protocol error: {0}")]
    Agent(String),

    #[error("Console key material is corrupt after regeneration")]
    KeyMaterialCorrupt,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a missing resource
    pub fn not_found(kind: &str, id: impl ToString) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// Whether this error is an ordinary authentication denial rather than a fault.
    ///
    /// Denials are folded into a `success = false` answer; faults are logged as errors
    /// but end up denied as well.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Error::InvalidRequest(_)
                | Error::NotFound { .. }
                | Error::TicketExpiredOrConsumed
                | Error::SessionMismatch
        )
    }

    /// Whether this error came from dispatching to a host agent
    pub fn is_agent_failure(&self) -> bool {
        matches!(
            self,
            Error::AgentUnavailable(_) | Error::AgentTimeout { .. } | Error::Agent(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_classification() {
        assert!(Error::TicketExpiredOrConsumed.is_denial());
        assert!(Error::not_found("vm", "vm-1").is_denial());
        assert!(!Error::KeyMaterialCorrupt.is_denial());
        assert!(!Error::AgentTimeout { seconds: 30 }.is_denial());
        assert!(Error::AgentTimeout { seconds: 30 }.is_agent_failure());
        assert!(!Error::StoreTimeout { millis: 100 }.is_denial());
        assert!(!Error::StoreTimeout { millis: 100 }.is_agent_failure());
    }

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found("host", 7);
        assert_eq!(err.to_string(), "Resource not found: host with id 7");
    }
}

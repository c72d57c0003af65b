use thiserror::Error;

/// Failure reported by one of the external collaborators (store, object
/// storage, transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Fetch, upload or write failed. Never retried automatically.
    #[error("network error: {0}")]
    TransientNetwork(String),

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("unknown participant: {sender_id}")]
    MissingParticipant { sender_id: String },

    #[error("subscription went stale: {0}")]
    StaleSubscription(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("conversation not open: {0}")]
    NotOpen(String),
}

impl EngineError {
    pub fn user_visible_message(&self) -> String {
        match self {
            EngineError::TransientNetwork(_) => "Network error, please try again".to_string(),
            EngineError::AuthenticationRequired => "Please sign in again".to_string(),
            EngineError::MissingParticipant { .. } => "Some participants are still loading".to_string(),
            EngineError::StaleSubscription(_) => "Reconnecting…".to_string(),
            EngineError::InvalidMessage(reason) => format!("Cannot send: {reason}"),
            EngineError::NotOpen(_) => "Conversation is not open".to_string(),
        }
    }
}

impl From<BackendError> for EngineError {
    fn from(err: BackendError) -> Self {
        EngineError::TransientNetwork(err.to_string())
    }
}

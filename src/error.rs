use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvErrorKind {
    MalformedMessage,
    RequestTimeout,
    BroadcastTimeout,
    StateSyncTimeout,
    ActionRejected,
    EncoderUnavailable,
    EncoderInference,
    InvalidObservation,
    InvalidAction,
    Transport,
    Closed,
}

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("no reply for seqno {seqno} within {timeout_ms} ms")]
    RequestTimeout { seqno: u64, timeout_ms: u64 },

    #[error("no broadcast received within {timeout_ms} ms")]
    BroadcastTimeout { timeout_ms: u64 },

    #[error("no state broadcast with last_action_seqno >= {seqno} within {timeout_ms} ms")]
    StateSyncTimeout { seqno: u64, timeout_ms: u64 },

    #[error("action '{action}' (seqno {seqno}) rejected with status '{status}'")]
    ActionRejected {
        action: String,
        seqno: u64,
        status: String,
    },

    #[error("latent encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("latent encoder inference failed: {0}")]
    EncoderInference(String),

    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    #[error("invalid action index {index} (expected 0..{count})")]
    InvalidAction { index: usize, count: usize },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("environment is closed")]
    Closed,
}

impl EnvError {
    pub fn kind(&self) -> EnvErrorKind {
        match self {
            EnvError::MalformedMessage { .. } => EnvErrorKind::MalformedMessage,
            EnvError::RequestTimeout { .. } => EnvErrorKind::RequestTimeout,
            EnvError::BroadcastTimeout { .. } => EnvErrorKind::BroadcastTimeout,
            EnvError::StateSyncTimeout { .. } => EnvErrorKind::StateSyncTimeout,
            EnvError::ActionRejected { .. } => EnvErrorKind::ActionRejected,
            EnvError::EncoderUnavailable(_) => EnvErrorKind::EncoderUnavailable,
            EnvError::EncoderInference(_) => EnvErrorKind::EncoderInference,
            EnvError::InvalidObservation(_) => EnvErrorKind::InvalidObservation,
            EnvError::InvalidAction { .. } => EnvErrorKind::InvalidAction,
            EnvError::Transport(_) => EnvErrorKind::Transport,
            EnvError::Closed => EnvErrorKind::Closed,
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        EnvError::MalformedMessage {
            reason: reason.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        EnvError::Transport(message.into())
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(err: serde_json::Error) -> Self {
        EnvError::malformed(err.to_string())
    }
}

impl From<zeromq::ZmqError> for EnvError {
    fn from(err: zeromq::ZmqError) -> Self {
        EnvError::transport(err.to_string())
    }
}

pub type EnvResult<T> = Result<T, EnvError>;

// crates/core/src/error.rs
use thiserror::Error;

/// Errors returned by the job registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// A job is already registered under this key. Expected contention, not a failure.
    #[error("{op} is already running for {key}, please wait")]
    Busy { op: String, key: String },

    /// The job's work loop observed its cancellation token.
    #[error("operation was cancelled before completion")]
    ForcedExit,
}

impl JobError {
    pub fn busy(op: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Busy {
            op: op.into(),
            key: key.into(),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

/// Errors returned by the notification bus and noticers.
#[derive(Debug, Error)]
pub enum NoticeError {
    #[error("user is not online: {user}")]
    UserNotOnline { user: String },

    #[error("message type {kind} is not accepted by {user}")]
    MessageTypeNotAccepted { user: String, kind: String },

    #[error("client {client_id} of {user} is not online")]
    ClientNotOnline { user: String, client_id: String },

    #[error("operation was cancelled before completion")]
    ForcedExit,

    #[error("failed to encode message as {format}: {message}")]
    Encode {
        format: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NoticeError {
    pub fn is_forced_exit(&self) -> bool {
        matches!(self, Self::ForcedExit)
    }

    /// Label used for the `result` dimension of the send counter.
    pub(crate) fn metric_label(&self) -> &'static str {
        match self {
            Self::UserNotOnline { .. } => "user_not_online",
            Self::MessageTypeNotAccepted { .. } => "type_not_accepted",
            Self::ClientNotOnline { .. } => "client_not_online",
            Self::ForcedExit => "forced_exit",
            Self::Encode { .. } => "encode",
            Self::Io(_) => "io",
        }
    }
}

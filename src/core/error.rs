use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by an [`AssistantServicePort`](super::ports::service::AssistantServicePort)
/// implementation. Adapters convert every transport-level error into one of these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    CreateIndex,
    IndexBatch,
    DeleteDocument,
    DeleteIndex,
    CreateAssistant,
    RetrieveAssistant,
    UpdateAssistant,
    CreateConversation,
    AppendMessage,
    ListMessages,
    SubmitRun,
    PollRun,
    CancelRun,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::CreateIndex => "create index",
            Operation::IndexBatch => "index batch",
            Operation::DeleteDocument => "delete document",
            Operation::DeleteIndex => "delete index",
            Operation::CreateAssistant => "create assistant",
            Operation::RetrieveAssistant => "retrieve assistant",
            Operation::UpdateAssistant => "update assistant",
            Operation::CreateConversation => "create conversation",
            Operation::AppendMessage => "append message",
            Operation::ListMessages => "list messages",
            Operation::SubmitRun => "submit run",
            Operation::PollRun => "poll run",
            Operation::CancelRun => "cancel run",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Auth,
    NotFound,
    Rejected,
    RemoteJobFailed,
    RunTimedOut,
    Configuration,
}

impl ErrorKind {
    /// Whether the caller may reasonably retry the same call unchanged.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transport | ErrorKind::RunTimedOut)
    }
}

/// Typed failure returned by every component method of the core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("{op} failed: transport error: {message}")]
    Transport { op: Operation, message: String },

    #[error("{op} failed: authentication rejected: {message}")]
    Auth { op: Operation, message: String },

    #[error("{op} failed: not found: {message}")]
    NotFound { op: Operation, message: String },

    #[error("{op} rejected by service ({status}): {message}")]
    Rejected {
        op: Operation,
        status: u16,
        message: String,
    },

    #[error("{op} failed: remote job {job_id} ended with status '{status}': {detail}")]
    RemoteJobFailed {
        op: Operation,
        job_id: String,
        status: String,
        code: Option<String>,
        detail: String,
    },

    #[error("run {run_id} did not finish within {timeout:?}; it may still complete remotely")]
    RunTimedOut { run_id: String, timeout: Duration },

    #[error("index batch {batch_id} did not finish within {timeout:?}")]
    IndexBatchTimedOut { batch_id: String, timeout: Duration },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ChatError {
    pub fn from_service(op: Operation, err: ServiceError) -> Self {
        match err {
            ServiceError::Transport(message) => ChatError::Transport { op, message },
            ServiceError::Auth(message) => ChatError::Auth { op, message },
            ServiceError::NotFound(message) => ChatError::NotFound { op, message },
            ServiceError::Rejected { status, message } => ChatError::Rejected {
                op,
                status,
                message,
            },
            // Undecodable bodies count as transport failures.
            ServiceError::Decode(message) => ChatError::Transport {
                op,
                message: format!("unexpected response: {message}"),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Transport { .. } => ErrorKind::Transport,
            ChatError::Auth { .. } => ErrorKind::Auth,
            ChatError::NotFound { .. } => ErrorKind::NotFound,
            ChatError::Rejected { .. } => ErrorKind::Rejected,
            ChatError::RemoteJobFailed { .. } => ErrorKind::RemoteJobFailed,
            ChatError::RunTimedOut { .. } | ChatError::IndexBatchTimedOut { .. } => {
                ErrorKind::RunTimedOut
            }
            ChatError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        match self {
            ChatError::Transport { op, .. }
            | ChatError::Auth { op, .. }
            | ChatError::NotFound { op, .. }
            | ChatError::Rejected { op, .. }
            | ChatError::RemoteJobFailed { op, .. } => Some(*op),
            ChatError::RunTimedOut { .. } => Some(Operation::PollRun),
            ChatError::IndexBatchTimedOut { .. } => Some(Operation::IndexBatch),
            ChatError::Configuration(_) => None,
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

/// Shorthand for converting a port result at a component boundary.
pub(crate) trait ServiceResultExt<T> {
    fn during(self, op: Operation) -> ChatResult<T>;
}

impl<T> ServiceResultExt<T> for Result<T, ServiceError> {
    fn during(self, op: Operation) -> ChatResult<T> {
        self.map_err(|err| ChatError::from_service(op, err))
    }
}

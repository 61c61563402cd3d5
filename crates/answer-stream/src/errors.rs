/// Message shown when a frame cannot be decoded mid-stream.
pub const GENERIC_GENERATION_ERROR: &str = "An error occurred during generation.";
/// Message shown when a submit could not open the stream and the server gave no reason.
pub const GENERIC_SUBMIT_ERROR: &str = "Failed to send question. Please try again.";
/// Message shown when a regenerate could not open the stream and the server gave no reason.
pub const GENERIC_REGENERATE_ERROR: &str = "Failed to regenerate answer. Please try again.";
/// Message used when the producer flags an error without a message.
pub const GENERIC_PRODUCER_ERROR: &str = "An unknown error occurred.";

/// Errors raised by a transport before or while streaming.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The initial response was not a success.
    #[error("stream open failed (status {status:?}): {}", .message.as_deref().unwrap_or("<no message>"))]
    Open {
        status: Option<u16>,
        /// Server-supplied message from the structured error body, if any.
        message: Option<String>,
        /// Body carried `status: "limit_reached"`.
        quota: bool,
    },
    /// Connection could not be established or broke while reading.
    #[error("network error: {message}")]
    Network { message: String },
    /// A side-channel response had an unexpected shape.
    #[error("protocol error: {message}")]
    Protocol { message: String },
    /// The transport could not be configured.
    #[error("config error: {0}")]
    Config(String),
}

impl TransportError {
    /// Creates a network-level error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns `true` when the server reported a quota/limit failure.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Open { quota: true, .. })
    }

    /// Server-supplied message, when the error carries one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Open { message, .. } => message.as_deref().filter(|m| !m.trim().is_empty()),
            Self::Network { .. } | Self::Protocol { .. } | Self::Config(_) => None,
        }
    }
}

/// A non-empty `data: ` payload that is not valid JSON for the event schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed stream frame: {reason} (payload: {excerpt:?})")]
pub struct ParseError {
    pub reason: String,
    /// Leading part of the offending payload.
    pub excerpt: String,
}

impl ParseError {
    const EXCERPT_CHARS: usize = 80;

    pub(crate) fn new(reason: impl Into<String>, payload: &str) -> Self {
        Self {
            reason: reason.into(),
            excerpt: payload.chars().take(Self::EXCERPT_CHARS).collect(),
        }
    }
}

/// Terminal failure reason carried by `SessionOutcome::Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum SessionFailure {
    /// The stream never opened (non-success status or network failure).
    #[error("transport open failure: {message}")]
    TransportOpen { message: String, quota: bool },
    /// A frame payload could not be decoded.
    #[error("parse failure: {message}")]
    Parse { message: String },
    /// The producer sent an explicit error event.
    #[error("producer failure: {message}")]
    Producer { message: String },
}

impl SessionFailure {
    /// Message handed to the render sink.
    pub fn display_message(&self) -> &str {
        match self {
            Self::TransportOpen { message, .. }
            | Self::Parse { message }
            | Self::Producer { message } => message,
        }
    }

    /// Quota failures are presented as a dismissible notice instead of inline text.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::TransportOpen { quota: true, .. })
    }

    pub(crate) fn from_open_error(err: &TransportError, fallback: &str) -> Self {
        Self::TransportOpen {
            message: err.server_message().unwrap_or(fallback).to_string(),
            quota: err.is_quota(),
        }
    }
}

/// Errors returned by the action coordinator's public API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// Invalid caller input or an action that is not currently allowed.
    #[error("validation error: {0}")]
    Validation(String),
    /// The referenced slot does not belong to this coordinator.
    #[error("unknown conversation slot: {0}")]
    UnknownSlot(crate::model::SlotId),
}

/// Errors from share-link generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShareError {
    /// No completed exchange has both a question and an answer.
    #[error("there is no chat history to share")]
    NoHistory,
    /// The share endpoint answered without a history id.
    #[error("share rejected: {message}")]
    Rejected { message: String },
    /// The configured origin cannot carry a path.
    #[error("invalid share origin: {0}")]
    InvalidOrigin(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from channel refresh polling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// A refresh for this channel is still being polled.
    #[error("a refresh for channel {0} is already running")]
    AlreadyRunning(String),
    /// The refresh task could not be started.
    #[error("refresh failed to start: {message}")]
    Start { message: String },
    /// Polling the task status failed.
    #[error("error checking task status: {message}")]
    Status { message: String },
    /// The task did not finish within the configured number of polls.
    #[error("refresh task {task_id} did not finish after {polls} polls")]
    TimedOut { task_id: String, polls: u32 },
}

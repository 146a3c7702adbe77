use thiserror::Error;

use crate::{
    auth::AuthError, inference::InferenceError, limiters::RateLimitError,
    transport::TransportError,
};

// -----------------------------------------------------------------------------
// ----- FailureKind -----------------------------------------------------------

/// Every failure on the session path falls into exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Handshake refused. Close with policy violation, nothing registered.
    Authentication,
    /// A limiter said no. Expected under load; the session continues.
    AdmissionRejected,
    /// One frame failed. Reported to the client; the session continues.
    Processing,
    /// The session cannot continue. Unregister, close with internal error.
    FatalSession,
    /// No concurrency slot in time. Close with try-again-later.
    ResourceExhausted,
}

impl FailureKind {
    pub const ALL: [FailureKind; 5] = [
        FailureKind::Authentication,
        FailureKind::AdmissionRejected,
        FailureKind::Processing,
        FailureKind::FatalSession,
        FailureKind::ResourceExhausted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Authentication => "authentication",
            FailureKind::AdmissionRejected => "admission_rejected",
            FailureKind::Processing => "processing",
            FailureKind::FatalSession => "fatal_session",
            FailureKind::ResourceExhausted => "resource_exhausted",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

// -----------------------------------------------------------------------------
// ----- HandshakeError --------------------------------------------------------

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("first message was not a valid auth message")]
    InvalidMessage,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("no auth message before the deadline")]
    Timeout,

    #[error("client '{client_id}' already has a live session")]
    AlreadyConnected { client_id: String },

    #[error("peer closed before authenticating")]
    PeerClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl HandshakeError {
    /// Label used for the authentication-failure metric.
    pub fn label(&self) -> &'static str {
        match self {
            HandshakeError::InvalidMessage => "invalid_message",
            HandshakeError::Auth(e) => e.label(),
            HandshakeError::Timeout => "timeout",
            HandshakeError::AlreadyConnected { .. } => "already_connected",
            HandshakeError::PeerClosed => "peer_closed",
            HandshakeError::Transport(_) => "transport",
        }
    }

    pub fn kind(&self) -> FailureKind {
        FailureKind::Authentication
    }
}

// -----------------------------------------------------------------------------
// ----- FrameError ------------------------------------------------------------

/// A single frame could not be processed. The session survives these.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame data is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("frame is empty")]
    Empty,

    #[error("frame is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("no frame received within {0:?}")]
    ReadTimeout(std::time::Duration),

    #[error("pipeline '{0}' is not registered")]
    NoPipeline(String),

    #[error("inference timed out after {0:?}")]
    InferenceTimeout(std::time::Duration),

    #[error("inference task aborted")]
    InferenceAborted,

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl FrameError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Processing
    }
}

// -----------------------------------------------------------------------------
// ----- SessionError ----------------------------------------------------------

/// The session loop cannot continue.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error("failed to encode outbound message: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SessionError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::FatalSession
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_labels_follow_auth_errors() {
        let err = HandshakeError::from(AuthError::Disabled {
            client_id: "cam".into(),
        });
        assert_eq!(err.label(), "disabled");
        assert_eq!(HandshakeError::from(AuthError::UnknownToken).label(), "unknown_token");
        assert_eq!(HandshakeError::Timeout.label(), "timeout");
        assert_eq!(err.kind(), FailureKind::Authentication);
    }

    #[test]
    fn frame_errors_are_processing_failures() {
        let err = FrameError::TooLarge { size: 10, limit: 5 };
        assert_eq!(err.kind(), FailureKind::Processing);
        assert_eq!(err.to_string(), "frame is 10 bytes, limit is 5");
    }

    #[test]
    fn failure_kind_indices_are_dense() {
        for (i, kind) in FailureKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------

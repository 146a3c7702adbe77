use async_trait::async_trait;
use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Scope a credential must carry to open a stream.
pub const STREAM_SCOPE: &str = "video_stream";

// -----------------------------------------------------------------------------
// ----- Identity --------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub client_id: String,
    pub scopes: Vec<String>,
}

impl Identity {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            scopes: vec![STREAM_SCOPE.to_string()],
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

// -----------------------------------------------------------------------------
// ----- Authenticator ---------------------------------------------------------

/// Turns the credential from the handshake into an identity. The gateway only
/// consumes the pass/fail outcome; how the credential is checked lives behind
/// this seam.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<Identity, AuthError>;
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("unknown or invalid credential")]
    UnknownToken,

    #[error("client '{client_id}' lacks the 'video_stream' scope")]
    InsufficientScope { client_id: String },

    #[error("client '{client_id}' is disabled")]
    Disabled { client_id: String },
}

impl AuthError {
    /// Label used when counting authentication failures.
    pub fn label(&self) -> &'static str {
        match self {
            AuthError::UnknownToken => "unknown_token",
            AuthError::InsufficientScope { .. } => "insufficient_scope",
            AuthError::Disabled { .. } => "disabled",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_refusal_reasons() {
        let cam = || "cam".to_string();
        let labels = [
            AuthError::UnknownToken,
            AuthError::InsufficientScope { client_id: cam() },
            AuthError::Disabled { client_id: cam() },
        ]
        .map(|e| e.label());

        assert_eq!(labels, ["unknown_token", "insufficient_scope", "disabled"]);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------

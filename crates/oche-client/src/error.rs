//! Client error types.

use oche_core::CoreError;
use thiserror::Error;

/// Errors from the application layer and its collaborators.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A core state machine rejected the operation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The room session reported a failure.
    #[error("session error: {reason}")]
    Session {
        /// Description of the failure.
        reason: String,
    },

    /// The media platform reported a failure.
    #[error("platform error: {reason}")]
    Platform {
        /// Description of the failure.
        reason: String,
    },

    /// The operation is not allowed for the joined role.
    #[error("forbidden: {reason}")]
    Forbidden {
        /// What was refused.
        reason: String,
    },

    /// The credential endpoint could not be reached or answered badly.
    #[error("token request failed: {0}")]
    Token(#[from] reqwest::Error),

    /// Filesystem failure (config, layout persistence).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON (config, layout persistence).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Shorthand for a session failure.
    pub fn session(reason: impl Into<String>) -> Self {
        Self::Session { reason: reason.into() }
    }

    /// Shorthand for a platform failure.
    pub fn platform(reason: impl Into<String>) -> Self {
        Self::Platform { reason: reason.into() }
    }

    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Fatal errors end the current join or capture. Transient errors leave
    /// the application usable as is.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Core(e) => e.is_fatal(),

            // Fatal to the join attempt
            Self::Token(_) => true,

            // Transient: the call can simply be repeated
            Self::Session { .. }
            | Self::Platform { .. }
            | Self::Forbidden { .. }
            | Self::Io(_)
            | Self::Json(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use oche_core::BlockReason;

    use super::*;

    #[test]
    fn blocked_message_is_transient() {
        let err = ClientError::from(CoreError::from(BlockReason::ProhibitedContent));
        assert!(!err.is_fatal());
    }

    #[test]
    fn connection_failure_is_fatal() {
        let err = ClientError::from(CoreError::Connection { reason: "refused".to_string() });
        assert!(err.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = ClientError::Forbidden { reason: "viewers cannot publish".to_string() };
        insta::assert_snapshot!(err.to_string(), @"forbidden: viewers cannot publish");

        let err = ClientError::from(CoreError::from(BlockReason::Empty));
        insta::assert_snapshot!(err.to_string(), @"sanitization rejected: Blocked: empty");

        let err = ClientError::session("connection refused");
        insta::assert_snapshot!(err.to_string(), @"session error: connection refused");
    }
}

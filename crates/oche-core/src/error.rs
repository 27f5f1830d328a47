//! Core error types.

use thiserror::Error;

use crate::{layout::LayoutError, sanitize::BlockReason, types::TrackSource};

/// Why the platform could not deliver a capture stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureFailure {
    /// The user or the platform refused access.
    #[error("access denied")]
    PermissionDenied,

    /// The device is missing, busy or failed to start.
    #[error("device unavailable: {reason}")]
    Unavailable {
        /// Platform-provided description.
        reason: String,
    },
}

/// Errors produced by the core state machines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Device or media access was refused.
    #[error("permission denied: {reason}")]
    PermissionDenied {
        /// What was refused.
        reason: String,
    },

    /// A capture device could not be started or switched.
    #[error("capture error ({track:?}): {reason}")]
    Capture {
        /// Which local track failed.
        track: TrackSource,
        /// Description of the failure.
        reason: String,
    },

    /// The operation needs a session or an active track that does not exist.
    #[error("not ready: {reason}")]
    NotReady {
        /// What is missing.
        reason: String,
    },

    /// Joining the room failed (credential issuance or initial connect).
    #[error("connection error: {reason}")]
    Connection {
        /// Description of the failure.
        reason: String,
    },

    /// An established connection was lost.
    #[error("transport lost: {reason}")]
    TransportLoss {
        /// Description of the loss.
        reason: String,
    },

    /// Content or a display name was blocked by the sanitizer.
    #[error("sanitization rejected: {0}")]
    SanitizationRejected(#[from] BlockReason),

    /// A layout mutation would violate the grid invariants.
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    /// A structured payload could not be encoded or decoded.
    #[error("codec error: {reason}")]
    Codec {
        /// Description of the codec failure.
        reason: String,
    },

    /// The machine is in the wrong state for the operation.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Description of the state error.
        reason: String,
    },
}

impl CoreError {
    /// Shorthand for [`CoreError::NotReady`].
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotReady { reason: reason.into() }
    }

    /// Shorthand for [`CoreError::InvalidState`].
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState { reason: reason.into() }
    }

    /// Map a platform capture failure onto the core taxonomy.
    pub fn from_capture(track: TrackSource, failure: &CaptureFailure) -> Self {
        match failure {
            CaptureFailure::PermissionDenied => {
                Self::PermissionDenied { reason: format!("{} access", track.publication_name()) }
            },
            CaptureFailure::Unavailable { reason } => {
                Self::Capture { track, reason: reason.clone() }
            },
        }
    }

    /// Returns true if this error must be surfaced and is never retried
    /// automatically.
    ///
    /// Transient errors are either retried by the reconnection policy or
    /// dropped after logging.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::PermissionDenied { .. }
            | Self::Capture { .. }
            | Self::Connection { .. }
            | Self::InvalidState { .. } => true,

            Self::NotReady { .. }
            | Self::TransportLoss { .. }
            | Self::SanitizationRejected(_)
            | Self::Layout(_)
            | Self::Codec { .. } => false,
        }
    }

    /// Returns true if the reconnection policy handles this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportLoss { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_loss_is_retryable_not_fatal() {
        let err = CoreError::TransportLoss { reason: "socket closed".to_string() };
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn sanitization_rejection_is_transient() {
        let err = CoreError::from(BlockReason::ProhibitedContent);
        assert!(!err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn denied_capture_maps_to_permission_denied() {
        let err = CoreError::from_capture(TrackSource::Camera, &CaptureFailure::PermissionDenied);
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = CoreError::from(BlockReason::Empty);
        insta::assert_snapshot!(err.to_string(), @"sanitization rejected: Blocked: empty");

        let err = CoreError::from_capture(
            TrackSource::Microphone,
            &CaptureFailure::Unavailable { reason: "device busy".to_string() },
        );
        insta::assert_snapshot!(err.to_string(), @"capture error (Microphone): device busy");
    }
}

//! Structured system events broadcast on the `events` topic.
//!
//! A system event is appended to the local chat log the moment it happens and
//! broadcast to peers as CBOR. Receivers drop events whose actor is their own
//! identity, so a notice never shows up twice.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEventKind {
    /// Camera and microphone went live.
    StreamStarted,
    /// The live stream ended.
    StreamStopped,
    /// Screen sharing started.
    ScreenShareStarted,
    /// Screen sharing stopped, from the app or from the platform's own control.
    ScreenShareStopped,
}

/// A broadcast notice about a participant's media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEvent {
    /// What happened.
    pub kind: SystemEventKind,
    /// Identity of the participant it happened to.
    pub actor_identity: String,
    /// Display name of that participant (re-sanitized on receipt).
    pub actor_name: String,
}

impl SystemEvent {
    /// Encode as CBOR for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| CoreError::Codec { reason: e.to_string() })?;
        Ok(buf)
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        ciborium::de::from_reader(bytes).map_err(|e| CoreError::Codec { reason: e.to_string() })
    }

    /// Human-readable notice for the chat log.
    pub fn message_text(&self) -> String {
        let name = &self.actor_name;
        match self.kind {
            SystemEventKind::StreamStarted => format!("{name} started streaming"),
            SystemEventKind::StreamStopped => format!("{name} stopped streaming"),
            SystemEventKind::ScreenShareStarted => format!("{name} started sharing their screen"),
            SystemEventKind::ScreenShareStopped => format!("{name} stopped sharing their screen"),
        }
    }
}

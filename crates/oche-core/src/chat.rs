//! Chat message log.
//!
//! The log is the single writer of chat history. It sanitizes everything it
//! stores, stamps messages with a strictly increasing [`MessageId`], and keeps
//! only the most recent `retention` entries (oldest evicted first).
//!
//! Local sends are appended as a local echo immediately. The relay to peers
//! happens afterwards and a relay failure never retracts the echo; the log is
//! eventually consistent with what peers saw, not atomically so.

use std::time::Duration;

use bounded_vec_deque::BoundedVecDeque;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::CoreError,
    sanitize::{self, MAX_CONTENT_CHARS, MAX_NAME_CHARS},
    types::{DataSender, Identity},
};

/// Chat tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum message length in displayed characters.
    pub max_content_chars: usize,
    /// Maximum display name length.
    pub max_name_chars: usize,
    /// Number of messages kept in the log.
    pub retention: usize,
    /// How long a remote typing indicator lives without a refresh.
    pub typing_expiry: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_content_chars: MAX_CONTENT_CHARS,
            max_name_chars: MAX_NAME_CHARS,
            retention: 100,
            typing_expiry: Duration::from_secs(5),
        }
    }
}

/// Strictly increasing message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u64);

/// What kind of entry a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Typed by a participant.
    Message,
    /// Generated by the application (stream and screen share notices).
    System,
}

/// One immutable chat log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Position in the log's sequence.
    pub id: MessageId,
    /// Sanitized display name of the sender.
    pub sender_name: String,
    /// Transport identity of the sender.
    pub sender_identity: Identity,
    /// Sanitized, escaped content.
    pub content: String,
    /// Message or system notice.
    pub kind: MessageKind,
    /// Appended locally before relay.
    pub is_local_echo: bool,
    /// Wall-clock milliseconds at append time.
    pub timestamp_ms: u64,
}

impl ChatMessage {
    /// Whether the UI should render this as the local user's own message.
    pub fn is_own_message(&self) -> bool {
        self.is_local_echo
    }
}

/// Bounded, sanitized chat history.
pub struct ChatLog {
    config: ChatConfig,
    entries: BoundedVecDeque<ChatMessage>,
    next_id: u64,
}

impl ChatLog {
    /// Create an empty log.
    pub fn new(config: ChatConfig) -> Self {
        let entries = BoundedVecDeque::new(config.retention.max(1));
        Self { config, entries, next_id: 1 }
    }

    /// Sanitize and append a locally typed message.
    ///
    /// Returns the appended echo; its `content` is what must be relayed.
    /// Blocked content leaves the log untouched.
    pub fn compose_local(
        &mut self,
        raw: &str,
        sender_name: &str,
        sender_identity: &str,
        now_ms: u64,
    ) -> Result<ChatMessage, CoreError> {
        let sanitized = sanitize::sanitize_content_with(raw, self.config.max_content_chars)
            .inspect_err(|reason| warn!(%reason, "outgoing message blocked"))?;
        let name = sanitize::sanitize_name_with(sender_name, self.config.max_name_chars);

        Ok(self.append(
            name,
            sender_identity.to_string(),
            sanitized.content,
            MessageKind::Message,
            true,
            now_ms,
        ))
    }

    /// Sanitize and append a message received from a peer.
    ///
    /// Packets from the local identity are ignored and return `Ok(None)`.
    pub fn receive(
        &mut self,
        payload: &[u8],
        sender: &DataSender,
        local_identity: Option<&str>,
        now_ms: u64,
    ) -> Result<Option<ChatMessage>, CoreError> {
        if local_identity == Some(sender.identity.as_str()) {
            debug!(identity = %sender.identity, "ignoring chat echo of own message");
            return Ok(None);
        }

        let sanitized = sanitize::sanitize_payload(payload, self.config.max_content_chars)
            .inspect_err(|reason| {
                warn!(%reason, sender = %sender.identity, "inbound message blocked");
            })?;
        let name = sanitize::sanitize_name_with(
            sender.name.as_deref().unwrap_or(&sender.identity),
            self.config.max_name_chars,
        );

        Ok(Some(self.append(
            name,
            sender.identity.clone(),
            sanitized.content,
            MessageKind::Message,
            false,
            now_ms,
        )))
    }

    /// Append an application-generated system notice.
    pub fn push_system(&mut self, text: &str, actor_identity: &str, now_ms: u64) -> ChatMessage {
        self.append(
            "System".to_string(),
            actor_identity.to_string(),
            text.to_string(),
            MessageKind::System,
            false,
            now_ms,
        )
    }

    fn append(
        &mut self,
        sender_name: String,
        sender_identity: Identity,
        content: String,
        kind: MessageKind,
        is_local_echo: bool,
        timestamp_ms: u64,
    ) -> ChatMessage {
        let id = MessageId(self.next_id);
        self.next_id += 1;

        let message =
            ChatMessage { id, sender_name, sender_identity, content, kind, is_local_echo, timestamp_ms };
        if let Some(evicted) = self.entries.push_back(message.clone()) {
            debug!(id = evicted.id.0, "evicted oldest chat message");
        }
        message
    }

    /// Messages oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }

    /// Most recent message.
    pub fn latest(&self) -> Option<&ChatMessage> {
        self.entries.back()
    }

    /// Number of retained messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log holds no messages.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every message. Ids keep increasing afterwards.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Configured limits.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }
}

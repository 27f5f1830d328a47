//! Typing indicators.
//!
//! Two halves:
//!
//! - [`TypingDebouncer`] turns raw local keystrokes into the minimal number of
//!   outgoing `start`/`stop` notifications.
//! - [`TypingTracker`] folds inbound notifications into the set of remote
//!   participants currently typing, expiring entries that are not refreshed.
//!
//! # Invariants
//!
//! - One `start` and one `stop` per typing episode, independent of keystroke
//!   volume
//! - The local user never appears in the tracked set
//! - At most one expiry deadline per remote name

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::timer::{Deadline, TimePoint};

/// Names that always refer to the local user and are never tracked.
const SELF_NAMES: [&str; 2] = ["You", "local"];

/// Debouncer tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Delay between the first keystroke and the `start` notification.
    pub start_delay: Duration,
    /// Inactivity after the last keystroke that ends an episode.
    pub inactivity_timeout: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self { start_delay: Duration::from_millis(300), inactivity_timeout: Duration::from_secs(10) }
    }
}

/// Wire-level typing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    /// The sender started typing.
    Start,
    /// The sender stopped typing.
    Stop,
}

impl TypingSignal {
    /// Payload carried on the typing topic.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Start => b"start",
            Self::Stop => b"stop",
        }
    }

    /// Parse a typing payload.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            b"start" => Some(Self::Start),
            b"stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Quiet,
    Pending,
    Typing,
}

/// Keystroke-to-notification timing policy for the local user.
///
/// ```text
/// keystroke ──► Pending ──(start_delay)──► Typing ──(inactivity)──► Quiet
///                  │                          │
///                  └──── sent: silent ────────┴──── sent: stop ──► Quiet
/// ```
#[derive(Debug, Clone)]
pub struct TypingDebouncer<I> {
    config: TypingConfig,
    phase: Phase,
    start_at: Deadline<I>,
    idle_at: Deadline<I>,
}

impl<I: TimePoint> TypingDebouncer<I> {
    /// Create a quiet debouncer.
    pub fn new(config: TypingConfig) -> Self {
        Self { config, phase: Phase::Quiet, start_at: Deadline::idle(), idle_at: Deadline::idle() }
    }

    /// Record a keystroke.
    ///
    /// Never emits directly: the first keystroke of an episode arms the start
    /// delay, every keystroke pushes the inactivity deadline out.
    pub fn keystroke(&mut self, now: I) {
        if self.phase == Phase::Quiet {
            self.phase = Phase::Pending;
            self.start_at.arm_after(now, self.config.start_delay);
        }
        self.idle_at.arm_after(now, self.config.inactivity_timeout);
    }

    /// The message was sent (or the input cleared): end the episode.
    ///
    /// Emits `stop` only if `start` was emitted for this episode.
    pub fn sent(&mut self) -> Option<TypingSignal> {
        let was_typing = self.phase == Phase::Typing;
        self.reset();
        was_typing.then_some(TypingSignal::Stop)
    }

    /// Fire due deadlines.
    pub fn tick(&mut self, now: I) -> Vec<TypingSignal> {
        let mut signals = Vec::new();

        if self.phase == Phase::Pending && self.start_at.fire(now) {
            self.phase = Phase::Typing;
            signals.push(TypingSignal::Start);
        }

        if self.phase == Phase::Typing && self.idle_at.fire(now) {
            self.reset();
            signals.push(TypingSignal::Stop);
        }

        signals
    }

    /// Earliest deadline the driver must tick at.
    pub fn next_deadline(&self) -> Option<I> {
        match self.phase {
            Phase::Quiet => None,
            Phase::Pending => self.start_at.at(),
            Phase::Typing => self.idle_at.at(),
        }
    }

    /// Whether `start` has been emitted and `stop` has not.
    pub fn is_typing(&self) -> bool {
        self.phase == Phase::Typing
    }

    /// Clear all timers without emitting anything.
    pub fn reset(&mut self) {
        self.phase = Phase::Quiet;
        self.start_at.cancel();
        self.idle_at.cancel();
    }
}

/// Remote participants currently typing, keyed by sanitized display name.
#[derive(Debug, Clone)]
pub struct TypingTracker<I> {
    expiry: Duration,
    typing: BTreeMap<String, I>,
}

impl<I: TimePoint> TypingTracker<I> {
    /// Create an empty tracker whose entries live for `expiry`.
    pub fn new(expiry: Duration) -> Self {
        Self { expiry, typing: BTreeMap::new() }
    }

    /// Apply an inbound notification.
    ///
    /// Returns whether the visible set changed. Notifications from the local
    /// identity, or carrying one of the reserved self names, are dropped.
    pub fn apply(
        &mut self,
        name: &str,
        sender_identity: &str,
        local_identity: Option<&str>,
        signal: TypingSignal,
        now: I,
    ) -> bool {
        if local_identity == Some(sender_identity) || SELF_NAMES.contains(&name) {
            return false;
        }

        match signal {
            TypingSignal::Start => {
                debug!(name, "remote typing started");
                self.typing.insert(name.to_string(), now + self.expiry).is_none()
            },
            TypingSignal::Stop => {
                debug!(name, "remote typing stopped");
                self.typing.remove(name).is_some()
            },
        }
    }

    /// Expire entries whose window elapsed. Returns the expired names.
    pub fn tick(&mut self, now: I) -> Vec<String> {
        let expired: Vec<String> = self
            .typing
            .iter()
            .filter(|&(_, &deadline)| now >= deadline)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &expired {
            self.typing.remove(name);
        }
        expired
    }

    /// Names currently typing, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.typing.keys().map(String::as_str)
    }

    /// Whether `name` is currently typing.
    pub fn is_typing(&self, name: &str) -> bool {
        self.typing.contains_key(name)
    }

    /// Earliest pending expiry.
    pub fn next_deadline(&self) -> Option<I> {
        self.typing.values().copied().min()
    }

    /// Drop every entry and its expiry.
    pub fn clear(&mut self) {
        self.typing.clear();
    }
}

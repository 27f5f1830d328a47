//! Identifiers and small value types shared across the machines.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable participant identity as assigned by the room service.
pub type Identity = String;

/// Server-assigned identifier of a track publication.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackSid(pub String);

impl fmt::Display for TrackSid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackSid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Locally allocated handle for one capture stream.
///
/// The application allocates these before asking the platform to acquire a
/// device, so every acquisition result can be matched back to the controller
/// that requested it (or released if nobody owns it any more).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaptureId(pub u64);

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capture#{}", self.0)
    }
}

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// Audio track.
    Audio,
    /// Video track.
    Video,
}

/// Logical source of a track publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    /// Camera video.
    Camera,
    /// Microphone audio.
    Microphone,
    /// Screen capture video.
    ScreenShare,
    /// Audio captured alongside a screen share.
    ScreenShareAudio,
    /// Anything the room service could not classify.
    Unknown,
}

impl TrackSource {
    /// Media kind carried by this source.
    pub fn kind(self) -> TrackKind {
        match self {
            Self::Microphone | Self::ScreenShareAudio => TrackKind::Audio,
            Self::Camera | Self::ScreenShare | Self::Unknown => TrackKind::Video,
        }
    }

    /// Fixed publication name used for local tracks of this source.
    pub fn publication_name(self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Microphone => "microphone",
            Self::ScreenShare => "screen_share",
            Self::ScreenShareAudio => "screen_share_audio",
            Self::Unknown => "unknown",
        }
    }
}

/// Delivery guarantee requested for a data publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reliability {
    /// Ordered and retransmitted.
    Reliable,
    /// Best effort; may be dropped.
    Lossy,
}

/// Data channel topics understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Chat messages (reliable).
    Chat,
    /// Typing start/stop notifications (lossy).
    Typing,
    /// Structured system events (reliable).
    Events,
}

impl Topic {
    /// Wire name of the topic.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Typing => "typing",
            Self::Events => "events",
        }
    }

    /// Parse a wire topic name. Unknown topics are `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "chat" => Some(Self::Chat),
            "typing" => Some(Self::Typing),
            "events" => Some(Self::Events),
            _ => None,
        }
    }

    /// Delivery guarantee used when publishing on this topic.
    pub fn reliability(self) -> Reliability {
        match self {
            Self::Chat | Self::Events => Reliability::Reliable,
            Self::Typing => Reliability::Lossy,
        }
    }
}

/// Sender attribution attached to an inbound data packet by the room service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSender {
    /// Transport-level identity of the sender.
    pub identity: Identity,
    /// Display name as reported by the room service (untrusted).
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_round_trip() {
        for topic in [Topic::Chat, Topic::Typing, Topic::Events] {
            assert_eq!(Topic::parse(topic.as_str()), Some(topic));
        }
        assert_eq!(Topic::parse("lk-chat-topic"), None);
    }

    #[test]
    fn typing_is_the_only_lossy_topic() {
        assert_eq!(Topic::Typing.reliability(), Reliability::Lossy);
        assert_eq!(Topic::Chat.reliability(), Reliability::Reliable);
        assert_eq!(Topic::Events.reliability(), Reliability::Reliable);
    }

    #[test]
    fn local_publication_names_are_fixed() {
        assert_eq!(TrackSource::Camera.publication_name(), "camera");
        assert_eq!(TrackSource::Microphone.publication_name(), "microphone");
        assert_eq!(TrackSource::ScreenShare.kind(), TrackKind::Video);
    }
}

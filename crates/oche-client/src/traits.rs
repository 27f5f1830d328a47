//! Capability surfaces of the external collaborators.
//!
//! The application never talks to a concrete room service, media stack or
//! credential endpoint. It talks to these traits. Production wires in real
//! implementations; the harness wires in in-memory simulations.
//!
//! Event sources hand out [`Subscription`]s. A subscription is an explicit
//! handle: events flow while it is alive, and dropping it releases the
//! listener on the producer side.

use async_trait::async_trait;
use oche_core::{
    CaptureConstraints, CaptureFailure, CaptureId, DeviceInfo, JoinGrant, Reliability, Role,
    RoomEvent, RoomTables, Topic, TrackSid, TrackSource,
};
use tokio::sync::mpsc;

use crate::error::ClientError;

/// Receiving end of an event stream.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Create a connected sender/subscription pair.
    pub fn channel() -> (mpsc::UnboundedSender<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next event. `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Local participant as assigned by the room service on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipant {
    /// Transport identity.
    pub identity: String,
    /// Display name.
    pub name: String,
}

/// Notifications from the media platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// The device list changed (hot-plug).
    DevicesChanged,
    /// A watched capture was ended by the platform.
    CaptureEnded {
        /// The capture that ended.
        capture: CaptureId,
    },
}

/// Room session: connection, publications and data channels.
#[async_trait]
pub trait Session: Send + Sync {
    /// Open the session.
    async fn connect(&self, server_url: &str, token: &str) -> Result<LocalParticipant, ClientError>;

    /// Close the session.
    async fn disconnect(&self) -> Result<(), ClientError>;

    /// Current membership and publication tables.
    async fn room_tables(&self) -> Result<RoomTables, ClientError>;

    /// Publish a local capture.
    async fn publish_track(
        &self,
        capture: CaptureId,
        name: &str,
        source: TrackSource,
        muted: bool,
    ) -> Result<TrackSid, ClientError>;

    /// Remove a publication.
    async fn unpublish_track(&self, sid: &TrackSid) -> Result<(), ClientError>;

    /// Mute or unmute a publication.
    async fn set_track_muted(&self, sid: &TrackSid, muted: bool) -> Result<(), ClientError>;

    /// Swap the capture feeding a publication without renegotiating.
    async fn replace_track_source(&self, sid: &TrackSid, capture: CaptureId)
    -> Result<(), ClientError>;

    /// Send a data packet to every other participant.
    async fn publish_data(
        &self,
        topic: Topic,
        payload: Vec<u8>,
        reliability: Reliability,
    ) -> Result<(), ClientError>;

    /// Listen for room events.
    fn subscribe(&self) -> Subscription<RoomEvent>;
}

/// Capture devices and streams.
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    /// Open and immediately close a probe capture to unlock device labels.
    async fn probe_permissions(&self) -> Result<(), CaptureFailure>;

    /// List input devices.
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, ClientError>;

    /// Open a camera or microphone as `capture`.
    async fn acquire(
        &self,
        capture: CaptureId,
        constraints: &CaptureConstraints,
    ) -> Result<(), CaptureFailure>;

    /// Open a display capture as `capture`.
    async fn acquire_display(&self, capture: CaptureId) -> Result<(), CaptureFailure>;

    /// Stop a capture and free its device. Unknown captures are ignored.
    async fn release(&self, capture: CaptureId);

    /// Report `capture` through [`PlatformEvent::CaptureEnded`] if the platform
    /// ends it.
    async fn watch_ended(&self, capture: CaptureId);

    /// Listen for platform events.
    fn subscribe(&self) -> Subscription<PlatformEvent>;
}

/// Issues join credentials.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Credentials for joining as `name` with `role`.
    async fn issue(&self, name: &str, role: Role) -> Result<JoinGrant, ClientError>;
}

//! Oche core: pure state machines for a real-time streaming room.
//!
//! Everything in this crate is Sans-IO. Machines take events plus the current
//! time and return actions; the caller performs the I/O and feeds results back
//! as further events. Nothing here sleeps, spawns or touches the network.
//!
//! ## Architecture
//!
//! ```text
//! oche-core
//!   ├─ Environment         (time + randomness abstraction)
//!   ├─ Deadline            (cancelable timers, fired on tick)
//!   ├─ DeviceRegistry      (capture device enumeration + selection)
//!   ├─ TrackController     (camera / microphone capture lifecycle)
//!   ├─ ScreenShareController
//!   ├─ sanitize            (content + display name filtering)
//!   ├─ ChatLog / TypingTracker / TypingDebouncer
//!   ├─ SessionMachine      (connection lifecycle, reconnect, snapshots)
//!   └─ GridLayout          (panel arrangement)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chat;
pub mod device;
pub mod env;
pub mod error;
pub mod layout;
pub mod media;
pub mod participant;
pub mod sanitize;
pub mod screen;
pub mod session;
pub mod system_event;
pub mod timer;
pub mod types;
pub mod typing;

pub use chat::{ChatConfig, ChatLog, ChatMessage, MessageId, MessageKind};
pub use device::{
    AudioConstraints, CaptureConstraints, DeviceInfo, DeviceKind, DeviceRegistry, MediaConfig,
    PermissionState, VideoConstraints,
};
pub use env::Environment;
pub use error::{CaptureFailure, CoreError};
pub use layout::{
    GridItem, GridLayout, LayoutConfig, LayoutError, LayoutTemplate, PanelId, PanelKind, Rect,
};
pub use media::{MediaAction, TrackController, TrackStatus};
pub use participant::{
    ConnectionQuality, Dimensions, ParticipantInfo, ParticipantPermissions, ParticipantRecord,
    ParticipantSnapshot, RenderTargets, RoomTables, TrackPublicationInfo,
};
pub use sanitize::{BlockReason, Sanitized, sanitize_content, sanitize_name};
pub use screen::{ScreenShareController, ScreenShareEnded};
pub use session::{
    ConnectionState, DisconnectReason, JoinGrant, Role, RoomEvent, SessionAction, SessionConfig,
    SessionMachine, SessionStatus, SnapshotChange,
};
pub use system_event::{SystemEvent, SystemEventKind};
pub use timer::{Deadline, TimePoint, earliest};
pub use types::{CaptureId, DataSender, Identity, Reliability, Topic, TrackKind, TrackSid, TrackSource};
pub use typing::{TypingConfig, TypingDebouncer, TypingSignal, TypingTracker};

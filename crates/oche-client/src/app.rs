//! Application state.
//!
//! [`App`] is the one object that owns every core machine: device registry,
//! camera, microphone, screen share, session, chat, typing and layout. It is a
//! pure state machine like the machines it owns. Events go in (user commands,
//! collaborator results, ticks), actions come out, and the caller performs the
//! I/O.
//!
//! Nothing outside the `App` mutates the machines it owns; components read
//! each other's state only through it.

use oche_core::{
    CaptureFailure, CaptureId, ChatLog, CoreError, DataSender, DeviceInfo, DeviceKind,
    DeviceRegistry, DisconnectReason, Environment, GridLayout, JoinGrant, MediaAction, PanelId,
    Rect, Role, RoomEvent, RoomTables, ScreenShareController, SessionAction, SessionMachine,
    SystemEvent, SystemEventKind, Topic, TrackController, TrackSid, TrackSource, TrackStatus,
    TypingDebouncer, TypingSignal, TypingTracker, earliest, sanitize_name,
};
use tracing::{debug, error, info, warn};

use crate::{config::ClientConfig, error::ClientError, traits::LocalParticipant};

/// Camera and microphone, in the order they are started and published.
const LOCAL_KINDS: [DeviceKind; 2] = [DeviceKind::VideoInput, DeviceKind::AudioInput];

/// Inputs to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent<I> {
    /// Probe device access.
    RequestPermissions,
    /// Change the device used by the next capture of `kind`.
    SelectDevice {
        /// Device kind.
        kind: DeviceKind,
        /// Device to select.
        device_id: String,
    },
    /// Select a device and move a running capture onto it.
    SwitchDevice {
        /// Device kind.
        kind: DeviceKind,
        /// Device to switch to.
        device_id: String,
    },
    /// Join the room.
    Join {
        /// Display name.
        name: String,
        /// Requested role.
        role: Role,
    },
    /// Leave the room and release every device.
    Leave,
    /// Start the camera or microphone.
    StartTrack {
        /// Which one.
        kind: DeviceKind,
    },
    /// Stop the camera or microphone.
    StopTrack {
        /// Which one.
        kind: DeviceKind,
    },
    /// Mute or unmute the camera or microphone (starting it if idle).
    ToggleMute {
        /// Which one.
        kind: DeviceKind,
    },
    /// Publish camera and microphone.
    GoLive,
    /// Unpublish camera and microphone.
    EndStream,
    /// Share the screen.
    StartScreenShare,
    /// Stop sharing the screen.
    StopScreenShare,
    /// Send a chat message.
    SendMessage {
        /// Raw message text.
        content: String,
    },
    /// The chat input changed.
    ComposeInput {
        /// Current input text.
        text: String,
    },
    /// Rearrange panels from a template.
    ApplyLayoutTemplate {
        /// Template name.
        name: String,
    },
    /// Drop a panel at a new place.
    MoveLayoutItem {
        /// Panel.
        id: PanelId,
        /// Requested placement.
        rect: Rect,
    },

    /// Result of the permission probe.
    PermissionResult(Result<(), CaptureFailure>),
    /// Result of device enumeration.
    DevicesEnumerated(Vec<DeviceInfo>),
    /// The platform's device list changed.
    DevicesChanged,
    /// Result of the credential request.
    GrantIssued(Result<JoinGrant, String>),
    /// The session connected.
    Connected(LocalParticipant),
    /// The session could not connect.
    ConnectFailed {
        /// Why.
        reason: String,
    },
    /// Fresh room tables.
    RoomTables(RoomTables),
    /// A room event.
    Room(RoomEvent),
    /// The platform delivered a capture.
    CaptureAcquired {
        /// Which.
        capture: CaptureId,
    },
    /// The platform could not deliver a capture.
    CaptureFailed {
        /// Which.
        capture: CaptureId,
        /// Why.
        failure: CaptureFailure,
    },
    /// The platform ended a capture on its own.
    CaptureEnded {
        /// Which.
        capture: CaptureId,
    },
    /// The session published a capture.
    TrackPublished {
        /// Published capture.
        capture: CaptureId,
        /// Assigned sid.
        sid: TrackSid,
    },
    /// The session refused a publication.
    PublishFailed {
        /// Capture that was not published.
        capture: CaptureId,
        /// Why.
        reason: String,
    },
    /// The session swapped a publication onto a new capture.
    SourceReplaced {
        /// The new capture.
        capture: CaptureId,
    },
    /// The session refused a source swap.
    ReplaceFailed {
        /// The rejected capture.
        capture: CaptureId,
        /// Why.
        reason: String,
    },
    /// A data packet could not be relayed.
    DataSendFailed {
        /// Topic of the packet.
        topic: Topic,
        /// Why.
        reason: String,
    },
    /// Time passed.
    Tick {
        /// Current time.
        now: I,
    },
}

/// Side effects requested by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// Probe device access.
    ProbePermissions,
    /// List devices.
    EnumerateDevices,
    /// Request join credentials.
    IssueGrant {
        /// Sanitized display name.
        name: String,
        /// Requested role.
        role: Role,
    },
    /// Session lifecycle.
    Session(SessionAction),
    /// Capture and publication.
    Media(MediaAction),
    /// Relay a data packet on `topic` with the topic's reliability.
    SendData {
        /// Topic.
        topic: Topic,
        /// Payload.
        payload: Vec<u8>,
    },
    /// Persist the panel layout.
    PersistLayout,
}

fn media(actions: Vec<MediaAction>) -> Vec<AppAction> {
    actions.into_iter().map(AppAction::Media).collect()
}

fn sessions(actions: Vec<SessionAction>) -> Vec<AppAction> {
    actions.into_iter().map(AppAction::Session).collect()
}

fn typing_packet(signal: TypingSignal) -> AppAction {
    AppAction::SendData { topic: Topic::Typing, payload: signal.as_bytes().to_vec() }
}

/// Application state for one client.
pub struct App<E: Environment> {
    env: E,
    devices: DeviceRegistry,
    camera: TrackController,
    microphone: TrackController,
    screen: ScreenShareController,
    session: SessionMachine<E::Instant>,
    chat: ChatLog,
    typing: TypingTracker<E::Instant>,
    debouncer: TypingDebouncer<E::Instant>,
    layout: GridLayout,
    display_name: String,
    role: Role,
    live: bool,
    screen_announced: bool,
    next_capture: u64,
    last_error: Option<CoreError>,
}

impl<E: Environment> App<E> {
    /// Create an application with nothing joined and nothing captured.
    pub fn new(env: E, config: &ClientConfig) -> Self {
        Self {
            env,
            devices: DeviceRegistry::new(config.media.clone()),
            camera: TrackController::new(TrackSource::Camera),
            microphone: TrackController::new(TrackSource::Microphone),
            screen: ScreenShareController::new(),
            session: SessionMachine::new(config.session.clone()),
            chat: ChatLog::new(config.chat.clone()),
            typing: TypingTracker::new(config.chat.typing_expiry),
            debouncer: TypingDebouncer::new(config.typing.clone()),
            layout: GridLayout::new(config.layout),
            display_name: String::new(),
            role: Role::Viewer,
            live: false,
            screen_announced: false,
            next_capture: 1,
            last_error: None,
        }
    }

    /// Start from a previously saved layout.
    #[must_use]
    pub fn with_layout(mut self, layout: GridLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// Rejected commands (joining twice, blocked messages, publishing as a
    /// viewer, invalid layout moves) return an error and change nothing.
    /// Failures reported by collaborators never error here; they are recorded
    /// in [`App::last_error`] and in the owning machine.
    pub fn handle(&mut self, event: AppEvent<E::Instant>) -> Result<Vec<AppAction>, ClientError> {
        match event {
            AppEvent::RequestPermissions => Ok(vec![AppAction::ProbePermissions]),
            AppEvent::SelectDevice { kind, device_id } => {
                self.devices.select(kind, &device_id)?;
                Ok(Vec::new())
            },
            AppEvent::SwitchDevice { kind, device_id } => self.handle_switch_device(kind, &device_id),
            AppEvent::Join { name, role } => self.handle_join(&name, role),
            AppEvent::Leave => Ok(self.handle_leave()),
            AppEvent::StartTrack { kind } => Ok(self.start_track(kind)),
            AppEvent::StopTrack { kind } => Ok(media(self.track_mut(kind).stop())),
            AppEvent::ToggleMute { kind } => {
                let capture = self.allocate_capture();
                let constraints = self.devices.constraints(kind);
                Ok(media(self.track_mut(kind).toggle_mute(capture, constraints)))
            },
            AppEvent::GoLive => self.handle_go_live(),
            AppEvent::EndStream => Ok(self.handle_end_stream()),
            AppEvent::StartScreenShare => {
                self.ensure_publisher()?;
                let capture = self.allocate_capture();
                Ok(media(self.screen.start(capture)))
            },
            AppEvent::StopScreenShare => Ok(self.handle_stop_screen_share()),
            AppEvent::SendMessage { content } => self.handle_send_message(&content),
            AppEvent::ComposeInput { text } => Ok(self.handle_compose_input(&text)),
            AppEvent::ApplyLayoutTemplate { name } => {
                self.layout.apply_template(&name).map_err(CoreError::from)?;
                Ok(vec![AppAction::PersistLayout])
            },
            AppEvent::MoveLayoutItem { id, rect } => {
                let target = self.layout.find_nearest_valid_position(id, rect);
                self.layout.update_item(id, target).map_err(CoreError::from)?;
                Ok(vec![AppAction::PersistLayout])
            },

            AppEvent::PermissionResult(result) => Ok(self.handle_permission_result(result)),
            AppEvent::DevicesEnumerated(devices) => {
                for kind in self.devices.apply_enumeration(devices) {
                    debug!(?kind, "selection follows device list");
                }
                Ok(Vec::new())
            },
            AppEvent::DevicesChanged => Ok(vec![AppAction::EnumerateDevices]),
            AppEvent::GrantIssued(result) => Ok(self.handle_grant(result)),
            AppEvent::Connected(local) => Ok(self.handle_connected(local)),
            AppEvent::ConnectFailed { reason } => {
                let now = self.env.now();
                let entropy = self.env.random_u64();
                if let Err(err) = self.session.on_connect_failed(&reason, now, entropy) {
                    self.record(err);
                }
                Ok(Vec::new())
            },
            AppEvent::RoomTables(tables) => {
                let now = self.env.now();
                self.session.on_tables(&tables, now);
                Ok(Vec::new())
            },
            AppEvent::Room(event) => Ok(self.handle_room_event(event)),
            AppEvent::CaptureAcquired { capture } => Ok(self.handle_capture_acquired(capture)),
            AppEvent::CaptureFailed { capture, failure } => {
                self.handle_capture_failed(capture, &failure);
                Ok(Vec::new())
            },
            AppEvent::CaptureEnded { capture } => Ok(self.handle_capture_ended(capture)),
            AppEvent::TrackPublished { capture, sid } => Ok(self.handle_track_published(capture, sid)),
            AppEvent::PublishFailed { capture, reason } => {
                self.handle_publish_failed(capture, &reason);
                Ok(Vec::new())
            },
            AppEvent::SourceReplaced { capture } => Ok(self.handle_source_replaced(capture)),
            AppEvent::ReplaceFailed { capture, reason } => {
                Ok(self.handle_replace_failed(capture, &reason))
            },
            AppEvent::DataSendFailed { topic, reason } => {
                warn!(topic = topic.as_str(), reason, "relay failed; local echo kept");
                Ok(Vec::new())
            },
            AppEvent::Tick { now } => Ok(self.handle_tick(now)),
        }
    }

    fn handle_permission_result(&mut self, result: Result<(), CaptureFailure>) -> Vec<AppAction> {
        match result {
            Ok(()) => {
                if let Err(err) = self.devices.set_permission(true) {
                    self.record(err);
                }
                vec![AppAction::EnumerateDevices]
            },
            Err(CaptureFailure::PermissionDenied) => {
                if let Err(err) = self.devices.set_permission(false) {
                    self.record(err);
                }
                Vec::new()
            },
            Err(failure @ CaptureFailure::Unavailable { .. }) => {
                // no probe device; list whatever exists
                self.record(CoreError::from_capture(TrackSource::Unknown, &failure));
                vec![AppAction::EnumerateDevices]
            },
        }
    }

    fn handle_switch_device(
        &mut self,
        kind: DeviceKind,
        device_id: &str,
    ) -> Result<Vec<AppAction>, ClientError> {
        self.devices.select(kind, device_id)?;
        let capture = self.allocate_capture();
        let constraints = self.devices.constraints(kind);
        Ok(media(self.track_mut(kind).switch_device(capture, constraints)))
    }

    fn handle_join(&mut self, name: &str, role: Role) -> Result<Vec<AppAction>, ClientError> {
        self.session.begin_join()?;
        self.display_name = sanitize_name(name);
        self.role = role;
        info!(name = %self.display_name, ?role, "joining room");
        Ok(vec![AppAction::IssueGrant { name: self.display_name.clone(), role }])
    }

    fn handle_grant(&mut self, result: Result<JoinGrant, String>) -> Vec<AppAction> {
        match result {
            Ok(grant) => sessions(self.session.on_grant(grant)),
            Err(reason) => {
                let err = self.session.on_grant_failed(&reason);
                self.record(err);
                Vec::new()
            },
        }
    }

    fn handle_connected(&mut self, local: LocalParticipant) -> Vec<AppAction> {
        let now = self.env.now();
        let mut actions = sessions(self.session.on_connected(local.identity, now));
        if !self.session.is_connected() {
            return actions;
        }

        if !local.name.trim().is_empty() {
            self.display_name = sanitize_name(&local.name);
        }
        actions.extend(self.republish());
        actions
    }

    /// Publish whatever should be live. Publications do not survive a
    /// reconnect.
    fn republish(&mut self) -> Vec<AppAction> {
        let mut actions = Vec::new();
        if self.live {
            for kind in LOCAL_KINDS {
                if let Ok(more) = self.track_mut(kind).publish() {
                    actions.extend(media(more));
                }
            }
        }
        if self.screen.is_active()
            && let Ok(more) = self.screen.publish()
        {
            actions.extend(media(more));
        }
        actions
    }

    fn handle_leave(&mut self) -> Vec<AppAction> {
        let mut actions = self.release_media();
        actions.extend(sessions(self.session.leave()));
        self.chat.clear();
        self.typing.clear();
        self.debouncer.reset();
        actions
    }

    /// Drop every capture. Publications are assumed gone with the session.
    fn release_media(&mut self) -> Vec<AppAction> {
        self.live = false;
        self.screen_announced = false;

        let mut actions = Vec::new();
        for kind in LOCAL_KINDS {
            let track = self.track_mut(kind);
            actions.extend(media(track.on_session_lost()));
            actions.extend(media(track.stop()));
        }
        actions.extend(media(self.screen.on_session_lost()));
        if let Some(ended) = self.screen.stop() {
            actions.extend(media(ended.actions));
        }
        actions
    }

    fn start_track(&mut self, kind: DeviceKind) -> Vec<AppAction> {
        let capture = self.allocate_capture();
        let constraints = self.devices.constraints(kind);
        media(self.track_mut(kind).start(capture, constraints))
    }

    fn ensure_publisher(&self) -> Result<(), ClientError> {
        if !self.session.is_connected() {
            return Err(CoreError::not_ready("not connected to a room").into());
        }
        if !self.role.can_publish() {
            return Err(ClientError::Forbidden { reason: "viewers cannot publish".to_string() });
        }
        Ok(())
    }

    fn handle_go_live(&mut self) -> Result<Vec<AppAction>, ClientError> {
        self.ensure_publisher()?;
        if self.live {
            return Ok(Vec::new());
        }
        self.live = true;
        info!("going live");

        let mut actions = Vec::new();
        for kind in LOCAL_KINDS {
            if self.track(kind).status() == TrackStatus::Idle {
                actions.extend(self.start_track(kind));
            } else if let Ok(more) = self.track_mut(kind).publish() {
                actions.extend(media(more));
            }
        }
        actions.extend(self.announce(SystemEventKind::StreamStarted));
        Ok(actions)
    }

    fn handle_end_stream(&mut self) -> Vec<AppAction> {
        if !self.live {
            return Vec::new();
        }
        self.live = false;
        info!("stream ended");

        let mut actions = Vec::new();
        for kind in LOCAL_KINDS {
            actions.extend(media(self.track_mut(kind).unpublish()));
        }
        actions.extend(self.announce(SystemEventKind::StreamStopped));
        actions
    }

    fn handle_stop_screen_share(&mut self) -> Vec<AppAction> {
        let Some(ended) = self.screen.stop() else {
            return Vec::new();
        };
        self.screen_ended(ended.actions)
    }

    fn screen_ended(&mut self, teardown: Vec<MediaAction>) -> Vec<AppAction> {
        self.screen_announced = false;
        let mut actions = media(teardown);
        actions.extend(self.announce(SystemEventKind::ScreenShareStopped));
        actions
    }

    fn handle_send_message(&mut self, content: &str) -> Result<Vec<AppAction>, ClientError> {
        let Some(identity) = self.session.local_identity().map(str::to_string) else {
            return Err(CoreError::not_ready("not connected to a room").into());
        };

        let echo =
            self.chat.compose_local(content, &self.display_name, &identity, self.env.unix_millis())?;
        debug!(id = echo.id.0, "local echo appended");

        let mut actions = vec![AppAction::SendData { topic: Topic::Chat, payload: echo.content.into_bytes() }];
        actions.extend(self.debouncer.sent().map(typing_packet));
        Ok(actions)
    }

    fn handle_compose_input(&mut self, text: &str) -> Vec<AppAction> {
        if !self.session.is_connected() {
            return Vec::new();
        }
        if text.trim().is_empty() {
            return self.debouncer.sent().map(typing_packet).into_iter().collect();
        }
        self.debouncer.keystroke(self.env.now());
        Vec::new()
    }

    fn handle_room_event(&mut self, event: RoomEvent) -> Vec<AppAction> {
        let now = self.env.now();
        match event {
            RoomEvent::DataReceived { topic, payload, sender } => {
                match sender {
                    Some(sender) => self.handle_data(&topic, &payload, &sender),
                    None => debug!(topic, "dropping data packet without sender"),
                }
                Vec::new()
            },
            RoomEvent::Disconnected { reason } => self.handle_disconnected(reason, now),
            other => sessions(self.session.on_room_event(&other, now)),
        }
    }

    fn handle_disconnected(&mut self, reason: DisconnectReason, now: E::Instant) -> Vec<AppAction> {
        let was_connected = self.session.is_connected();
        self.session.on_disconnected(reason, now, self.env.random_u64());
        self.typing.clear();
        self.debouncer.reset();

        if reason == DisconnectReason::TransportLoss {
            let mut actions = Vec::new();
            if was_connected {
                for kind in LOCAL_KINDS {
                    actions.extend(media(self.track_mut(kind).on_session_lost()));
                }
                actions.extend(media(self.screen.on_session_lost()));
            }
            return actions;
        }

        self.chat.clear();
        self.release_media()
    }

    fn handle_data(&mut self, topic: &str, payload: &[u8], sender: &DataSender) {
        let local = self.session.local_identity().map(str::to_string);
        let local = local.as_deref();

        match Topic::parse(topic) {
            Some(Topic::Chat) => {
                match self.chat.receive(payload, sender, local, self.env.unix_millis()) {
                    Ok(Some(message)) => debug!(id = message.id.0, from = %sender.identity, "chat message"),
                    Ok(None) => {},
                    Err(err) => debug!(error = %err, "inbound message dropped"),
                }
            },
            Some(Topic::Typing) => {
                let Some(signal) = TypingSignal::parse(payload) else {
                    debug!(from = %sender.identity, "malformed typing payload");
                    return;
                };
                let name = sanitize_name(sender.name.as_deref().unwrap_or(&sender.identity));
                self.typing.apply(&name, &sender.identity, local, signal, self.env.now());
            },
            Some(Topic::Events) => match SystemEvent::decode(payload) {
                Ok(event)
                    if local == Some(sender.identity.as_str())
                        || local == Some(event.actor_identity.as_str()) =>
                {
                    debug!(kind = ?event.kind, "ignoring echo of own system event");
                },
                Ok(event) => {
                    let event = SystemEvent { actor_name: sanitize_name(&event.actor_name), ..event };
                    self.chat.push_system(&event.message_text(), &sender.identity, self.env.unix_millis());
                },
                Err(err) => warn!(error = %err, from = %sender.identity, "malformed system event"),
            },
            None => debug!(topic, "ignoring unknown topic"),
        }
    }

    /// Append a system notice locally and broadcast it.
    fn announce(&mut self, kind: SystemEventKind) -> Vec<AppAction> {
        let Some(identity) = self.session.local_identity().map(str::to_string) else {
            return Vec::new();
        };
        let event = SystemEvent { kind, actor_identity: identity, actor_name: self.display_name.clone() };
        self.chat.push_system(&event.message_text(), &event.actor_identity, self.env.unix_millis());

        match event.encode() {
            Ok(payload) => vec![AppAction::SendData { topic: Topic::Events, payload }],
            Err(err) => {
                warn!(error = %err, ?kind, "system event not broadcast");
                Vec::new()
            },
        }
    }

    fn handle_capture_acquired(&mut self, capture: CaptureId) -> Vec<AppAction> {
        if self.screen.owns(capture) {
            let Some(mut actions) = self.screen.on_acquired(capture) else {
                return Vec::new();
            };
            if self.session.is_connected() {
                match self.screen.publish() {
                    Ok(more) => actions.extend(more),
                    Err(err) => self.record(err),
                }
            }
            return media(actions);
        }

        let live = self.live && self.session.is_connected();
        for kind in LOCAL_KINDS {
            let track = self.track_mut(kind);
            if !track.owns(capture) {
                continue;
            }
            let Some(mut actions) = track.on_acquired(capture) else {
                return Vec::new();
            };
            if live && let Ok(more) = track.publish() {
                actions.extend(more);
            }
            return media(actions);
        }

        debug!(%capture, "releasing capture nobody wants");
        vec![AppAction::Media(MediaAction::Release { capture })]
    }

    fn handle_capture_failed(&mut self, capture: CaptureId, failure: &CaptureFailure) {
        let err = if self.screen.owns(capture) {
            self.screen.on_acquire_failed(capture, failure)
        } else {
            LOCAL_KINDS
                .into_iter()
                .find(|&kind| self.track(kind).owns(capture))
                .and_then(|kind| self.track_mut(kind).on_acquire_failed(capture, failure))
        };
        if let Some(err) = err {
            self.record(err);
        }
    }

    fn handle_capture_ended(&mut self, capture: CaptureId) -> Vec<AppAction> {
        if let Some(ended) = self.screen.on_capture_ended(capture) {
            info!(by_platform = ended.by_platform, "screen share ended");
            return self.screen_ended(ended.actions);
        }
        for kind in LOCAL_KINDS {
            if let Some(actions) = self.track_mut(kind).on_capture_ended(capture) {
                return media(actions);
            }
        }
        Vec::new()
    }

    fn handle_track_published(&mut self, capture: CaptureId, sid: TrackSid) -> Vec<AppAction> {
        if self.screen.owns(capture) {
            let actions = self.screen.on_published(capture, sid);
            if actions.is_empty() && !self.screen_announced {
                self.screen_announced = true;
                return self.announce(SystemEventKind::ScreenShareStarted);
            }
            return media(actions);
        }
        match LOCAL_KINDS.into_iter().find(|&kind| self.track(kind).owns(capture)) {
            Some(kind) => media(self.track_mut(kind).on_published(capture, sid)),
            None => vec![AppAction::Media(MediaAction::Unpublish { sid })],
        }
    }

    fn handle_publish_failed(&mut self, capture: CaptureId, reason: &str) {
        let err = if self.screen.owns(capture) {
            self.screen.on_publish_failed(capture, reason)
        } else {
            LOCAL_KINDS
                .into_iter()
                .find(|&kind| self.track(kind).owns(capture))
                .and_then(|kind| self.track_mut(kind).on_publish_failed(capture, reason))
        };
        if let Some(err) = err {
            self.record(err);
        }
    }

    fn handle_source_replaced(&mut self, capture: CaptureId) -> Vec<AppAction> {
        match LOCAL_KINDS.into_iter().find(|&kind| self.track(kind).owns(capture)) {
            Some(kind) => media(self.track_mut(kind).on_source_replaced(capture)),
            None => {
                debug!(%capture, "releasing replacement nobody wants");
                vec![AppAction::Media(MediaAction::Release { capture })]
            },
        }
    }

    fn handle_replace_failed(&mut self, capture: CaptureId, reason: &str) -> Vec<AppAction> {
        let err = LOCAL_KINDS
            .into_iter()
            .find(|&kind| self.track(kind).owns(capture))
            .and_then(|kind| self.track_mut(kind).on_replace_failed(capture, reason));
        if let Some(err) = err {
            self.record(err);
        }
        if LOCAL_KINDS.into_iter().any(|kind| self.track(kind).owns(capture)) {
            return Vec::new();
        }
        vec![AppAction::Media(MediaAction::Release { capture })]
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<AppAction> {
        let mut actions = sessions(self.session.tick(now));

        for name in self.typing.tick(now) {
            debug!(%name, "typing indicator expired");
        }

        let signals = self.debouncer.tick(now);
        if self.session.is_connected() {
            actions.extend(signals.into_iter().map(typing_packet));
        }
        actions
    }

    fn record(&mut self, err: CoreError) {
        error!(error = %err, "operation failed");
        self.last_error = Some(err);
    }

    fn allocate_capture(&mut self) -> CaptureId {
        let capture = CaptureId(self.next_capture);
        self.next_capture += 1;
        capture
    }

    fn track(&self, kind: DeviceKind) -> &TrackController {
        match kind {
            DeviceKind::VideoInput => &self.camera,
            DeviceKind::AudioInput => &self.microphone,
        }
    }

    fn track_mut(&mut self, kind: DeviceKind) -> &mut TrackController {
        match kind {
            DeviceKind::VideoInput => &mut self.camera,
            DeviceKind::AudioInput => &mut self.microphone,
        }
    }

    /// Earliest deadline any owned machine needs a tick for.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        earliest([
            self.session.next_deadline(),
            self.typing.next_deadline(),
            self.debouncer.next_deadline(),
        ])
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Device registry.
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Camera track.
    pub fn camera(&self) -> &TrackController {
        &self.camera
    }

    /// Microphone track.
    pub fn microphone(&self) -> &TrackController {
        &self.microphone
    }

    /// Screen share.
    pub fn screen(&self) -> &ScreenShareController {
        &self.screen
    }

    /// Session and participant state.
    pub fn session(&self) -> &SessionMachine<E::Instant> {
        &self.session
    }

    /// Chat history.
    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    /// Remote participants currently typing.
    pub fn typing(&self) -> &TypingTracker<E::Instant> {
        &self.typing
    }

    /// Panel layout.
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Sanitized local display name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Role of the current or last join.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether camera and microphone are meant to be published.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Last failure reported by a collaborator.
    pub fn last_error(&self) -> Option<&CoreError> {
        self.last_error.as_ref()
    }
}

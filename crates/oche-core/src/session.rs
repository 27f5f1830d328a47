//! Room session state machine.
//!
//! Owns the connection lifecycle and the canonical participant snapshot.
//!
//! ```text
//!              join            connected
//! Disconnected ────► Connecting ────────► Connected ◄──────┐
//!      ▲                 │ failed            │ transport    │ connected
//!      │                 ▼                   ▼ loss         │
//!      └──────────── Failed       Reconnecting{attempt} ────┘
//!                                      │  ▲
//!                                      └──┘ retry after min(base·2^attempt, cap) + jitter
//! ```
//!
//! Jitter is drawn from caller-supplied entropy and bounded by
//! [`SessionConfig::backoff_jitter`], so clients dropped by the same relay
//! restart do not reconnect in lockstep. The default bound is zero.
//!
//! An explicit leave from any state cancels every pending retry and timer.
//!
//! ## Snapshots
//!
//! Every membership, metadata, permission, track or quality event asks the
//! driver to read the room tables (`SyncParticipants`); the answer comes back
//! through [`SessionMachine::on_tables`]. A periodic reconcile timer issues the
//! same request as a backstop against missed events. Building the snapshot is
//! idempotent.
//!
//! A change in participant count raises a short pulse, except on the first
//! snapshot after connecting, so joining a busy room does not pulse.
//!
//! # Invariants
//!
//! - At most one live session; joining while not disconnected is rejected
//! - Retries never fire after an explicit leave
//! - Timers only run in the states that own them (reconcile and settle while
//!   connected, retry while reconnecting)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::CoreError,
    participant::{
        ConnectionQuality, ParticipantSnapshot, RenderTargets, RoomTables, TrackPublicationInfo,
    },
    timer::{Deadline, TimePoint, earliest},
    types::{DataSender, Identity, TrackSid},
};

/// Session tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// First reconnect delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Upper bound on the reconnect delay.
    pub backoff_cap: Duration,
    /// Upper bound on the random delay added to each reconnect.
    pub backoff_jitter: Duration,
    /// Periodic snapshot rebuild interval while connected.
    pub reconcile_interval: Duration,
    /// How long the participant-count pulse stays raised.
    pub pulse_duration: Duration,
    /// Settle delay before re-evaluating active streams after track events.
    pub stream_settle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            backoff_jitter: Duration::ZERO,
            reconcile_interval: Duration::from_secs(5),
            pulse_duration: Duration::from_millis(800),
            stream_settle: Duration::from_millis(500),
        }
    }
}

/// Role requested from the credential endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May publish media and data.
    Streamer,
    /// Subscribe only.
    #[default]
    Viewer,
}

impl Role {
    /// Whether this role may publish media.
    pub fn can_publish(self) -> bool {
        self == Self::Streamer
    }
}

/// Credentials for joining a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinGrant {
    /// Signed access token.
    pub token: String,
    /// Room service URL.
    pub server_url: String,
    /// Room to join.
    pub room_id: String,
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local user left.
    ClientInitiated,
    /// The connection dropped unexpectedly.
    TransportLoss,
    /// The room service shut down.
    ServerShutdown,
    /// The local participant was removed from the room.
    Kicked,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Obtaining credentials or connecting.
    Connecting,
    /// Live.
    Connected,
    /// Lost and retrying.
    Reconnecting {
        /// Zero-based retry attempt.
        attempt: u32,
    },
}

/// Status string the UI renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Never joined.
    Ready,
    /// Join in progress.
    Connecting,
    /// Live.
    Connected,
    /// Retrying after a transport loss.
    Reconnecting {
        /// Zero-based retry attempt.
        attempt: u32,
    },
    /// Left the room.
    Disconnected,
    /// Join failed or the room ended the session.
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

/// Notifications from the room service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// A peer joined.
    ParticipantConnected {
        /// Peer identity.
        identity: Identity,
    },
    /// A peer left.
    ParticipantDisconnected {
        /// Peer identity.
        identity: Identity,
    },
    /// A peer's name or metadata changed.
    MetadataChanged {
        /// Peer identity.
        identity: Identity,
    },
    /// A peer's token capabilities changed.
    PermissionsChanged {
        /// Peer identity.
        identity: Identity,
    },
    /// A peer published a track.
    TrackPublished {
        /// Publisher identity.
        identity: Identity,
        /// New publication.
        track_sid: TrackSid,
    },
    /// A peer removed a publication.
    TrackUnpublished {
        /// Publisher identity.
        identity: Identity,
        /// Removed publication.
        track_sid: TrackSid,
    },
    /// The local client started receiving a peer's track.
    TrackSubscribed {
        /// Publisher identity.
        identity: Identity,
        /// Publication now received.
        publication: TrackPublicationInfo,
    },
    /// The local client stopped receiving a peer's track.
    TrackUnsubscribed {
        /// Publisher identity.
        identity: Identity,
        /// Publication no longer received.
        track_sid: TrackSid,
    },
    /// A publication was muted or unmuted.
    TrackMuteChanged {
        /// Publisher identity.
        identity: Identity,
        /// Affected publication.
        track_sid: TrackSid,
        /// New mute state.
        muted: bool,
    },
    /// Link quality of a participant changed.
    ConnectionQualityChanged {
        /// Participant identity.
        identity: Identity,
        /// New quality.
        quality: ConnectionQuality,
    },
    /// A data packet arrived.
    DataReceived {
        /// Wire topic.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
        /// Sender attribution, absent for server-originated packets.
        sender: Option<DataSender>,
    },
    /// The session ended.
    Disconnected {
        /// Why.
        reason: DisconnectReason,
    },
}

/// Side effects requested by the session machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open the session.
    Connect {
        /// Room service URL.
        server_url: String,
        /// Access token.
        token: String,
    },
    /// Close the session.
    Disconnect,
    /// Read the room tables and report them back via `on_tables`.
    SyncParticipants,
}

/// What a snapshot refresh changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotChange {
    /// The snapshot differs from the previous one.
    pub changed: bool,
    /// The participant-count pulse was raised.
    pub pulsed: bool,
}

/// Connection lifecycle and participant state.
#[derive(Debug, Clone)]
pub struct SessionMachine<I> {
    config: SessionConfig,
    state: ConnectionState,
    status: SessionStatus,
    grant: Option<JoinGrant>,
    local_identity: Option<Identity>,
    snapshot: ParticipantSnapshot,
    awaiting_first_snapshot: bool,
    render_targets: RenderTargets,
    active_stream: bool,
    pulses: u64,
    retry_at: Deadline<I>,
    reconcile_at: Deadline<I>,
    pulse_until: Deadline<I>,
    settle_at: Deadline<I>,
}

impl<I: TimePoint> SessionMachine<I> {
    /// Create a disconnected session machine.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            status: SessionStatus::Ready,
            grant: None,
            local_identity: None,
            snapshot: ParticipantSnapshot::default(),
            awaiting_first_snapshot: false,
            render_targets: RenderTargets::default(),
            active_stream: false,
            pulses: 0,
            retry_at: Deadline::idle(),
            reconcile_at: Deadline::idle(),
            pulse_until: Deadline::idle(),
            settle_at: Deadline::idle(),
        }
    }

    /// Start a join. Credentials are requested by the caller.
    pub fn begin_join(&mut self) -> Result<(), CoreError> {
        if self.state != ConnectionState::Disconnected {
            return Err(CoreError::invalid_state(format!(
                "cannot join while {:?}",
                self.state
            )));
        }
        self.state = ConnectionState::Connecting;
        self.status = SessionStatus::Connecting;
        Ok(())
    }

    /// Credentials arrived; connect.
    pub fn on_grant(&mut self, grant: JoinGrant) -> Vec<SessionAction> {
        if self.state != ConnectionState::Connecting || self.grant.is_some() {
            debug!("ignoring grant for abandoned join");
            return Vec::new();
        }
        info!(room = %grant.room_id, url = %grant.server_url, "connecting");
        let action = SessionAction::Connect {
            server_url: grant.server_url.clone(),
            token: grant.token.clone(),
        };
        self.grant = Some(grant);
        vec![action]
    }

    /// Credential issuance failed; the join is over.
    pub fn on_grant_failed(&mut self, reason: &str) -> CoreError {
        self.fail_join(reason)
    }

    /// The session is live.
    pub fn on_connected(&mut self, local_identity: Identity, now: I) -> Vec<SessionAction> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => {},
            ConnectionState::Disconnected | ConnectionState::Connected => {
                warn!("connect completed after leave; closing it");
                return vec![SessionAction::Disconnect];
            },
        }

        info!(identity = %local_identity, "connected");
        self.state = ConnectionState::Connected;
        self.status = SessionStatus::Connected;
        self.local_identity = Some(local_identity);
        self.awaiting_first_snapshot = true;
        self.retry_at.cancel();
        self.reconcile_at.arm_after(now, self.config.reconcile_interval);
        self.settle_at.arm_after(now, self.config.stream_settle);

        vec![SessionAction::SyncParticipants]
    }

    /// Connecting failed.
    ///
    /// An initial join fails for good; a reconnect attempt schedules the next
    /// retry, jittered by `entropy`.
    pub fn on_connect_failed(&mut self, reason: &str, now: I, entropy: u64) -> Result<(), CoreError> {
        match self.state {
            ConnectionState::Connecting => Err(self.fail_join(reason)),
            ConnectionState::Reconnecting { attempt } => {
                let attempt = attempt.saturating_add(1);
                self.schedule_retry(attempt, now, entropy);
                warn!(attempt, reason, "reconnect attempt failed");
                Ok(())
            },
            ConnectionState::Disconnected | ConnectionState::Connected => Ok(()),
        }
    }

    /// The session ended, for `reason`.
    ///
    /// Transport loss schedules the first retry, jittered by `entropy`.
    pub fn on_disconnected(&mut self, reason: DisconnectReason, now: I, entropy: u64) {
        match reason {
            DisconnectReason::TransportLoss => {
                if self.state != ConnectionState::Connected {
                    return;
                }
                warn!("transport lost; reconnecting");
                self.reconcile_at.cancel();
                self.pulse_until.cancel();
                self.settle_at.cancel();
                self.render_targets.clear();
                self.active_stream = false;
                self.schedule_retry(0, now, entropy);
            },
            DisconnectReason::ClientInitiated => {
                self.teardown();
                self.status = SessionStatus::Disconnected;
            },
            DisconnectReason::ServerShutdown | DisconnectReason::Kicked => {
                warn!(?reason, "session ended by room service");
                self.teardown();
                self.status = SessionStatus::Failed { reason: format!("{reason:?}") };
            },
        }
    }

    /// Leave the room from any state.
    pub fn leave(&mut self) -> Vec<SessionAction> {
        let was_live = self.grant.is_some() && self.state != ConnectionState::Disconnected;
        self.teardown();
        self.status = SessionStatus::Disconnected;
        if was_live {
            info!("left room");
            vec![SessionAction::Disconnect]
        } else {
            Vec::new()
        }
    }

    /// Fold a room notification in.
    ///
    /// Disconnects are not handled here; they go through
    /// [`SessionMachine::on_disconnected`].
    pub fn on_room_event(&mut self, event: &RoomEvent, now: I) -> Vec<SessionAction> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }

        match event {
            RoomEvent::ParticipantDisconnected { identity } => {
                self.render_targets.remove_participant(identity);
                self.settle_at.arm_after(now, self.config.stream_settle);
            },
            RoomEvent::TrackPublished { .. } | RoomEvent::TrackUnpublished { .. } => {
                self.settle_at.arm_after(now, self.config.stream_settle);
            },
            RoomEvent::TrackSubscribed { identity, publication } => {
                if self.render_targets.attach(identity, publication) {
                    debug!(%identity, sid = %publication.track_sid, "render target attached");
                }
                self.settle_at.arm_after(now, self.config.stream_settle);
            },
            RoomEvent::TrackUnsubscribed { identity, track_sid } => {
                if self.render_targets.detach(identity, track_sid) {
                    debug!(%identity, sid = %track_sid, "render target detached");
                }
                self.settle_at.arm_after(now, self.config.stream_settle);
            },
            RoomEvent::DataReceived { .. } | RoomEvent::Disconnected { .. } => return Vec::new(),
            RoomEvent::ParticipantConnected { .. }
            | RoomEvent::MetadataChanged { .. }
            | RoomEvent::PermissionsChanged { .. }
            | RoomEvent::TrackMuteChanged { .. }
            | RoomEvent::ConnectionQualityChanged { .. } => {},
        }

        vec![SessionAction::SyncParticipants]
    }

    /// Fresh room tables arrived; rebuild the snapshot.
    pub fn on_tables(&mut self, tables: &RoomTables, now: I) -> SnapshotChange {
        if self.state != ConnectionState::Connected {
            return SnapshotChange::default();
        }

        let next = ParticipantSnapshot::build(tables);
        let old_count = self.snapshot.count();
        let new_count = next.count();

        let pulsed = if self.awaiting_first_snapshot {
            self.awaiting_first_snapshot = false;
            false
        } else {
            new_count != old_count && old_count > 0
        };
        if pulsed {
            self.pulses += 1;
            self.pulse_until.arm_after(now, self.config.pulse_duration);
            info!(from = old_count, to = new_count, "participant count changed");
        }

        let changed = next != self.snapshot;
        if changed {
            debug!(participants = new_count, "participant snapshot rebuilt");
            self.snapshot = next;
        }
        SnapshotChange { changed, pulsed }
    }

    /// Fire due timers.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if self.retry_at.fire(now)
            && let ConnectionState::Reconnecting { attempt } = self.state
        {
            match &self.grant {
                Some(grant) => {
                    info!(attempt, "reconnecting");
                    actions.push(SessionAction::Connect {
                        server_url: grant.server_url.clone(),
                        token: grant.token.clone(),
                    });
                },
                None => {
                    self.teardown();
                    self.status = SessionStatus::Failed { reason: "no credentials".to_string() };
                },
            }
        }

        if self.reconcile_at.fire(now) && self.state == ConnectionState::Connected {
            self.reconcile_at.arm_after(now, self.config.reconcile_interval);
            actions.push(SessionAction::SyncParticipants);
        }

        self.pulse_until.fire(now);

        if self.settle_at.fire(now) {
            let active = self.snapshot.has_active_stream();
            if active != self.active_stream {
                info!(active, "active stream changed");
                self.active_stream = active;
            }
        }

        actions
    }

    /// Earliest armed timer.
    pub fn next_deadline(&self) -> Option<I> {
        earliest([
            self.retry_at.at(),
            self.reconcile_at.at(),
            self.pulse_until.at(),
            self.settle_at.at(),
        ])
    }

    /// Reconnect delay for a zero-based attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.config.backoff_base.saturating_mul(factor).min(self.config.backoff_cap)
    }

    /// Reconnect delay for a zero-based attempt, plus the jitter `entropy`
    /// picks within [`SessionConfig::backoff_jitter`].
    pub fn retry_delay(&self, attempt: u32, entropy: u64) -> Duration {
        let span = u64::try_from(self.config.backoff_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(entropy % span.saturating_add(1));
        self.backoff_delay(attempt).saturating_add(jitter)
    }

    /// Lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the session is live.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// UI status.
    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    /// Local identity assigned at connect.
    pub fn local_identity(&self) -> Option<&str> {
        self.local_identity.as_deref()
    }

    /// Credentials of the current session.
    pub fn grant(&self) -> Option<&JoinGrant> {
        self.grant.as_ref()
    }

    /// Current participant snapshot.
    pub fn snapshot(&self) -> &ParticipantSnapshot {
        &self.snapshot
    }

    /// Current render targets.
    pub fn render_targets(&self) -> &RenderTargets {
        &self.render_targets
    }

    /// Whether some remote participant is streaming video to us.
    pub fn has_active_stream(&self) -> bool {
        self.active_stream
    }

    /// Whether the participant-count pulse is raised.
    pub fn pulse_active(&self) -> bool {
        self.pulse_until.is_armed()
    }

    /// Number of pulses raised since creation.
    pub fn pulse_count(&self) -> u64 {
        self.pulses
    }

    fn schedule_retry(&mut self, attempt: u32, now: I, entropy: u64) {
        let delay = self.retry_delay(attempt, entropy);
        self.state = ConnectionState::Reconnecting { attempt };
        self.status = SessionStatus::Reconnecting { attempt };
        self.retry_at.arm_after(now, delay);
        debug!(attempt, delay_ms = delay.as_millis(), "reconnect scheduled");
    }

    fn fail_join(&mut self, reason: &str) -> CoreError {
        warn!(reason, "join failed");
        self.teardown();
        self.status = SessionStatus::Failed { reason: reason.to_string() };
        CoreError::Connection { reason: reason.to_string() }
    }

    fn teardown(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.grant = None;
        self.local_identity = None;
        self.snapshot = ParticipantSnapshot::default();
        self.awaiting_first_snapshot = false;
        self.render_targets.clear();
        self.active_stream = false;
        self.retry_at.cancel();
        self.reconcile_at.cancel();
        self.pulse_until.cancel();
        self.settle_at.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        participant::ParticipantRecord,
        timer::test_clock::TestInstant,
        types::TrackSource,
    };

    fn grant() -> JoinGrant {
        JoinGrant { token: "tok".into(), server_url: "wss://rtc.example".into(), room_id: "oche".into() }
    }

    fn record(identity: &str) -> ParticipantRecord {
        ParticipantRecord {
            identity: identity.to_string(),
            sid: format!("PA_{identity}"),
            ..ParticipantRecord::default()
        }
    }

    fn tables(remotes: &[&str]) -> RoomTables {
        RoomTables { local: Some(record("ft-me")), remotes: remotes.iter().map(|r| record(r)).collect() }
    }

    fn connected() -> SessionMachine<TestInstant> {
        let mut session = SessionMachine::new(SessionConfig::default());
        session.begin_join().unwrap();
        session.on_grant(grant());
        session.on_connected("ft-me".into(), TestInstant::ms(0));
        session
    }

    #[test]
    fn join_flow_reaches_connected_and_syncs() {
        let mut session = SessionMachine::<TestInstant>::new(SessionConfig::default());
        assert_eq!(session.status(), &SessionStatus::Ready);

        session.begin_join().unwrap();
        assert_eq!(session.state(), ConnectionState::Connecting);

        let actions = session.on_grant(grant());
        assert_eq!(
            actions,
            vec![SessionAction::Connect { server_url: "wss://rtc.example".into(), token: "tok".into() }]
        );

        let actions = session.on_connected("ft-me".into(), TestInstant::ms(0));
        assert_eq!(actions, vec![SessionAction::SyncParticipants]);
        assert_eq!(session.status(), &SessionStatus::Connected);
        assert_eq!(session.local_identity(), Some("ft-me"));
    }

    #[test]
    fn second_join_is_rejected() {
        let mut session = connected();
        assert!(matches!(session.begin_join(), Err(CoreError::InvalidState { .. })));
    }

    #[test]
    fn initial_connect_failure_is_final() {
        let mut session = SessionMachine::<TestInstant>::new(SessionConfig::default());
        session.begin_join().unwrap();
        session.on_grant(grant());

        let err = session.on_connect_failed("dns failure", TestInstant::ms(0), 0).unwrap_err();
        assert!(matches!(err, CoreError::Connection { .. }));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.next_deadline(), None);
    }

    #[test]
    fn grant_failure_is_a_connection_error() {
        let mut session = SessionMachine::<TestInstant>::new(SessionConfig::default());
        session.begin_join().unwrap();

        let err = session.on_grant_failed("token endpoint returned 500");
        assert!(err.is_fatal());
        assert_eq!(session.status(), &SessionStatus::Failed { reason: "token endpoint returned 500".into() });
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let session = SessionMachine::<TestInstant>::new(SessionConfig::default());
        let delays: Vec<u64> =
            (0..8).map(|a| u64::try_from(session.backoff_delay(a).as_millis()).unwrap()).collect();

        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000]);
        assert_eq!(session.backoff_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn transport_loss_retries_with_backoff_until_success() {
        let mut session = connected();
        session.on_disconnected(DisconnectReason::TransportLoss, TestInstant::ms(10_000), 0);
        assert_eq!(session.status(), &SessionStatus::Reconnecting { attempt: 0 });
        assert_eq!(session.next_deadline(), Some(TestInstant::ms(11_000)));

        // nothing before the deadline
        assert!(session.tick(TestInstant::ms(10_999)).is_empty());
        let actions = session.tick(TestInstant::ms(11_000));
        assert!(matches!(actions.as_slice(), [SessionAction::Connect { .. }]));

        session.on_connect_failed("refused", TestInstant::ms(11_100), 0).unwrap();
        assert_eq!(session.state(), ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(session.next_deadline(), Some(TestInstant::ms(13_100)));

        session.tick(TestInstant::ms(13_100));
        session.on_connected("ft-me".into(), TestInstant::ms(13_200));
        assert!(session.is_connected());
        assert_eq!(session.status(), &SessionStatus::Connected);
    }

    #[test]
    fn leave_cancels_pending_retries() {
        let mut session = connected();
        session.on_disconnected(DisconnectReason::TransportLoss, TestInstant::ms(0), 0);

        assert_eq!(session.leave(), vec![SessionAction::Disconnect]);
        assert_eq!(session.next_deadline(), None);
        assert!(session.tick(TestInstant::ms(120_000)).is_empty());
        assert_eq!(session.status(), &SessionStatus::Disconnected);
    }

    #[test]
    fn kicked_is_final() {
        let mut session = connected();
        session.on_disconnected(DisconnectReason::Kicked, TestInstant::ms(0), 0);

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(matches!(session.status(), SessionStatus::Failed { .. }));
        assert_eq!(session.next_deadline(), None);
    }

    #[test]
    fn reconcile_timer_resyncs_periodically() {
        let mut session = connected();
        session.on_tables(&tables(&[]), TestInstant::ms(0));

        assert_eq!(session.tick(TestInstant::ms(5_000)), vec![SessionAction::SyncParticipants]);
        assert_eq!(session.tick(TestInstant::ms(9_999)), vec![]);
        assert_eq!(session.tick(TestInstant::ms(10_000)), vec![SessionAction::SyncParticipants]);
    }

    #[test]
    fn first_snapshot_never_pulses() {
        let mut session = connected();
        let change = session.on_tables(&tables(&["ft-a", "ft-b", "ft-c"]), TestInstant::ms(10));

        assert!(change.changed);
        assert!(!change.pulsed);
        assert_eq!(session.pulse_count(), 0);
    }

    #[test]
    fn count_changes_pulse_once_each_way() {
        let mut session = connected();
        session.on_tables(&tables(&[]), TestInstant::ms(0));

        assert!(session.on_tables(&tables(&["ft-bob"]), TestInstant::ms(100)).pulsed);
        assert!(session.pulse_active());
        assert!(!session.on_tables(&tables(&["ft-bob"]), TestInstant::ms(200)).pulsed);

        session.tick(TestInstant::ms(900));
        assert!(!session.pulse_active());

        assert!(session.on_tables(&tables(&[]), TestInstant::ms(1_000)).pulsed);
        assert_eq!(session.pulse_count(), 2);
    }

    #[test]
    fn unchanged_tables_rebuild_identically() {
        let mut session = connected();
        session.on_tables(&tables(&["ft-bob"]), TestInstant::ms(0));
        let first = session.snapshot().clone();

        let change = session.on_tables(&tables(&["ft-bob"]), TestInstant::ms(1));
        assert!(!change.changed);
        assert_eq!(session.snapshot(), &first);
    }

    #[test]
    fn active_stream_is_evaluated_after_settle_delay() {
        let mut session = connected();
        session.tick(TestInstant::ms(500));

        let publication = TrackPublicationInfo {
            track_sid: TrackSid::from("TR_cam"),
            track_name: "camera".into(),
            kind: TrackSource::Camera.kind(),
            source: TrackSource::Camera,
            muted: false,
            subscribed: true,
            encrypted: false,
            dimensions: None,
        };
        let event = RoomEvent::TrackSubscribed { identity: "ft-bob".into(), publication: publication.clone() };
        assert_eq!(session.on_room_event(&event, TestInstant::ms(1_000)), vec![SessionAction::SyncParticipants]);

        let mut bob = record("ft-bob");
        bob.publications.push(publication);
        session.on_tables(&RoomTables { local: Some(record("ft-me")), remotes: vec![bob] }, TestInstant::ms(1_010));

        session.tick(TestInstant::ms(1_499));
        assert!(!session.has_active_stream());
        session.tick(TestInstant::ms(1_500));
        assert!(session.has_active_stream());
        assert_eq!(session.render_targets().camera("ft-bob"), Some(&TrackSid::from("TR_cam")));
    }

    #[test]
    fn transport_loss_drops_active_stream_with_render_targets() {
        let mut session = connected();
        let mut bob = record("ft-bob");
        let publication = TrackPublicationInfo {
            track_sid: TrackSid::from("TR_cam"),
            track_name: "camera".into(),
            kind: TrackSource::Camera.kind(),
            source: TrackSource::Camera,
            muted: false,
            subscribed: true,
            encrypted: false,
            dimensions: None,
        };
        let event = RoomEvent::TrackSubscribed { identity: "ft-bob".into(), publication: publication.clone() };
        session.on_room_event(&event, TestInstant::ms(0));
        bob.publications.push(publication);
        session.on_tables(&RoomTables { local: Some(record("ft-me")), remotes: vec![bob] }, TestInstant::ms(0));
        session.tick(TestInstant::ms(500));
        assert!(session.has_active_stream());

        session.on_disconnected(DisconnectReason::TransportLoss, TestInstant::ms(600), 0);
        assert!(!session.has_active_stream());
        assert_eq!(session.render_targets().camera("ft-bob"), None);
    }

    #[test]
    fn retry_jitter_stays_within_bound() {
        let config = SessionConfig { backoff_jitter: Duration::from_millis(250), ..SessionConfig::default() };
        let session = SessionMachine::<TestInstant>::new(config);

        assert_eq!(session.retry_delay(0, 0), Duration::from_millis(1_000));
        assert_eq!(session.retry_delay(0, 250), Duration::from_millis(1_250));
        assert_eq!(session.retry_delay(0, 251), Duration::from_millis(1_000));
        assert_eq!(session.retry_delay(5, 100), Duration::from_millis(30_100));
        for entropy in [7, 1 << 40, u64::MAX] {
            let delay = session.retry_delay(2, entropy);
            assert!(delay >= Duration::from_secs(4) && delay <= Duration::from_millis(4_250));
        }
    }

    #[test]
    fn jittered_retry_is_armed_from_entropy() {
        let config = SessionConfig { backoff_jitter: Duration::from_millis(250), ..SessionConfig::default() };
        let mut session = SessionMachine::new(config);
        session.begin_join().unwrap();
        session.on_grant(grant());
        session.on_connected("ft-me".into(), TestInstant::ms(0));

        session.on_disconnected(DisconnectReason::TransportLoss, TestInstant::ms(2_000), 130);
        assert_eq!(session.next_deadline(), Some(TestInstant::ms(3_130)));

        session.tick(TestInstant::ms(3_130));
        session.on_connect_failed("refused", TestInstant::ms(3_200), 1_000).unwrap();
        // 1000 % 251 = 247
        assert_eq!(session.next_deadline(), Some(TestInstant::ms(5_447)));
    }

    #[test]
    fn events_are_ignored_while_not_connected() {
        let mut session = SessionMachine::<TestInstant>::new(SessionConfig::default());
        let event = RoomEvent::ParticipantConnected { identity: "ft-bob".into() };

        assert!(session.on_room_event(&event, TestInstant::ms(0)).is_empty());
        assert_eq!(session.on_tables(&tables(&["ft-bob"]), TestInstant::ms(0)), SnapshotChange::default());
    }

    #[test]
    fn late_connect_after_leave_is_closed() {
        let mut session = SessionMachine::<TestInstant>::new(SessionConfig::default());
        session.begin_join().unwrap();
        session.on_grant(grant());
        session.leave();

        assert_eq!(session.on_connected("ft-me".into(), TestInstant::ms(0)), vec![SessionAction::Disconnect]);
        assert!(!session.is_connected());
    }
}

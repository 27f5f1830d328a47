//! In-memory room service.
//!
//! [`SimRoom`] plays the external media relay: it issues join grants, keeps
//! the membership and publication tables, and fans events out to every
//! connected [`SimSession`]. Each remote publication is auto-subscribed, the
//! same way the real service is configured. Faults (transport loss, refused
//! connects, kicks) are injected through the room handle.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use oche_client::{ClientError, LocalParticipant, Session, Subscription};
use oche_core::{
    CaptureId, ConnectionQuality, DataSender, DisconnectReason, Identity, JoinGrant,
    ParticipantPermissions, ParticipantRecord, Reliability, Role, RoomEvent, RoomTables, Topic,
    TrackPublicationInfo, TrackSid, TrackSource,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Prefix the credential endpoint puts in front of every identity.
pub const IDENTITY_PREFIX: &str = "ft-";

/// URL handed out in grants.
const SERVER_URL: &str = "wss://sim.oche.invalid";

type Listeners = Arc<Mutex<Vec<UnboundedSender<RoomEvent>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
struct Ticket {
    identity: Identity,
    name: String,
    role: Role,
}

#[derive(Debug)]
struct Member {
    name: String,
    sid: String,
    role: Role,
    publications: Vec<(TrackPublicationInfo, CaptureId)>,
    listeners: Listeners,
}

impl Member {
    fn permissions(&self) -> ParticipantPermissions {
        ParticipantPermissions {
            can_publish: self.role.can_publish(),
            can_subscribe: true,
            can_publish_data: true,
            hidden: false,
            recorder: false,
        }
    }

    fn record(&self, identity: &str, subscribed: bool) -> ParticipantRecord {
        ParticipantRecord {
            identity: identity.to_string(),
            sid: self.sid.clone(),
            name: Some(self.name.clone()),
            metadata: None,
            connection_quality: ConnectionQuality::Good,
            publications: self
                .publications
                .iter()
                .map(|(p, _)| TrackPublicationInfo { subscribed, ..p.clone() })
                .collect(),
            permissions: Some(self.permissions()),
        }
    }

    fn emit(&self, event: &RoomEvent) {
        lock(&self.listeners).retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[derive(Debug)]
struct RoomState {
    name: String,
    tickets: BTreeMap<String, Ticket>,
    members: BTreeMap<Identity, Member>,
    next_id: u64,
    refuse_connects: u32,
    token_outage: bool,
}

impl RoomState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn broadcast(&self, from: &str, event: &RoomEvent) {
        for member in self.members.iter().filter(|(id, _)| id.as_str() != from).map(|(_, m)| m) {
            member.emit(event);
        }
    }

    fn remove(&mut self, identity: &str, reason: Option<DisconnectReason>) -> bool {
        let Some(member) = self.members.remove(identity) else {
            return false;
        };
        if let Some(reason) = reason {
            member.emit(&RoomEvent::Disconnected { reason });
        }
        self.broadcast(
            identity,
            &RoomEvent::ParticipantDisconnected { identity: identity.to_string() },
        );
        true
    }
}

/// Shared handle to one simulated room.
#[derive(Debug, Clone)]
pub struct SimRoom {
    state: Arc<Mutex<RoomState>>,
}

impl SimRoom {
    /// Empty room called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RoomState {
                name: name.into(),
                tickets: BTreeMap::new(),
                members: BTreeMap::new(),
                next_id: 0,
                refuse_connects: 0,
                token_outage: false,
            })),
        }
    }

    /// A fresh session handle for one client.
    pub fn session(&self) -> SimSession {
        SimSession {
            room: self.clone(),
            me: Arc::new(Mutex::new(None)),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Issue a grant for `name` joining with `role`.
    pub fn issue(&self, name: &str, role: Role) -> Result<JoinGrant, ClientError> {
        let mut state = lock(&self.state);
        if state.token_outage {
            return Err(ClientError::session("token endpoint unavailable"));
        }
        if name.trim().is_empty() {
            return Err(ClientError::session("participant name is required"));
        }

        let token = format!("tok-{}", state.next_id());
        let ticket = Ticket { identity: format!("{IDENTITY_PREFIX}{name}"), name: name.to_string(), role };
        state.tickets.insert(token.clone(), ticket);
        Ok(JoinGrant { token, server_url: SERVER_URL.to_string(), room_id: state.name.clone() })
    }

    /// Drop `identity`'s connection as if the network went away.
    pub fn drop_connection(&self, identity: &str) -> bool {
        let dropped = lock(&self.state).remove(identity, Some(DisconnectReason::TransportLoss));
        if dropped {
            info!(identity, "simulated transport loss");
        }
        dropped
    }

    /// Remove `identity` from the room.
    pub fn kick(&self, identity: &str) -> bool {
        lock(&self.state).remove(identity, Some(DisconnectReason::Kicked))
    }

    /// Shut the room down, disconnecting everyone.
    pub fn shutdown(&self) {
        let mut state = lock(&self.state);
        let identities: Vec<Identity> = state.members.keys().cloned().collect();
        for identity in identities {
            state.remove(&identity, Some(DisconnectReason::ServerShutdown));
        }
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next_connects(&self, count: u32) {
        lock(&self.state).refuse_connects = count;
    }

    /// Make grant issuance fail until switched off again.
    pub fn set_token_outage(&self, outage: bool) {
        lock(&self.state).token_outage = outage;
    }

    /// Connected identities, sorted.
    pub fn identities(&self) -> Vec<Identity> {
        lock(&self.state).members.keys().cloned().collect()
    }

    /// Number of connected participants.
    pub fn participant_count(&self) -> usize {
        lock(&self.state).members.len()
    }

    /// Publications of `identity`.
    pub fn publications(&self, identity: &str) -> Vec<TrackPublicationInfo> {
        lock(&self.state)
            .members
            .get(identity)
            .map(|m| m.publications.iter().map(|(p, _)| p.clone()).collect())
            .unwrap_or_default()
    }

    /// Capture currently feeding `sid`.
    pub fn source_of(&self, sid: &TrackSid) -> Option<CaptureId> {
        lock(&self.state)
            .members
            .values()
            .flat_map(|m| &m.publications)
            .find(|(p, _)| &p.track_sid == sid)
            .map(|(_, capture)| *capture)
    }

    /// Deliver a data packet to everyone as if `identity` sent it from outside
    /// the simulation.
    pub fn inject_data(&self, identity: &str, name: &str, topic: &str, payload: &[u8]) {
        let state = lock(&self.state);
        state.broadcast(
            identity,
            &RoomEvent::DataReceived {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                sender: Some(DataSender { identity: identity.to_string(), name: Some(name.to_string()) }),
            },
        );
    }
}

/// One client's view of a [`SimRoom`].
#[derive(Debug, Clone)]
pub struct SimSession {
    room: SimRoom,
    me: Arc<Mutex<Option<Identity>>>,
    listeners: Listeners,
}

impl SimSession {
    /// Identity while connected.
    pub fn identity(&self) -> Option<Identity> {
        lock(&self.me).clone()
    }

    /// Run `f` on this session's member entry, failing if the room no longer
    /// knows it.
    fn with_member<R>(
        &self,
        f: impl FnOnce(&mut RoomState, &Identity) -> Result<R, ClientError>,
    ) -> Result<R, ClientError> {
        let identity = self.identity().ok_or_else(|| ClientError::session("not connected"))?;
        let mut state = lock(&self.room.state);
        if !state.members.get(&identity).is_some_and(|m| Arc::ptr_eq(&m.listeners, &self.listeners)) {
            return Err(ClientError::session("connection lost"));
        }
        f(&mut *state, &identity)
    }
}

#[async_trait]
impl Session for SimSession {
    async fn connect(&self, server_url: &str, token: &str) -> Result<LocalParticipant, ClientError> {
        let mut state = lock(&self.room.state);
        if server_url != SERVER_URL {
            return Err(ClientError::session(format!("unknown server {server_url}")));
        }
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(ClientError::session("connection refused"));
        }
        let ticket = state.tickets.get(token).cloned().ok_or_else(|| ClientError::session("invalid token"))?;

        // a second connection with the same identity replaces the first
        state.remove(&ticket.identity, Some(DisconnectReason::Kicked));

        let sid = format!("PA_{}", state.next_id());
        let member = Member {
            name: ticket.name.clone(),
            sid,
            role: ticket.role,
            publications: Vec::new(),
            listeners: Arc::clone(&self.listeners),
        };

        for (identity, other) in &state.members {
            for (publication, _) in &other.publications {
                member.emit(&RoomEvent::TrackSubscribed {
                    identity: identity.clone(),
                    publication: TrackPublicationInfo { subscribed: true, ..publication.clone() },
                });
            }
        }
        state.broadcast(
            &ticket.identity,
            &RoomEvent::ParticipantConnected { identity: ticket.identity.clone() },
        );
        state.members.insert(ticket.identity.clone(), member);
        *lock(&self.me) = Some(ticket.identity.clone());

        info!(identity = %ticket.identity, room = %state.name, "participant joined");
        Ok(LocalParticipant { identity: ticket.identity, name: ticket.name })
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        let result = self.with_member(|state, identity| {
            state.remove(identity, None);
            Ok(())
        });
        *lock(&self.me) = None;
        result
    }

    async fn room_tables(&self) -> Result<RoomTables, ClientError> {
        self.with_member(|state, identity| {
            let local = state.members.get(identity).map(|m| m.record(identity, false));
            let remotes = state
                .members
                .iter()
                .filter(|(id, _)| *id != identity)
                .map(|(id, m)| m.record(id, true))
                .collect();
            Ok(RoomTables { local, remotes })
        })
    }

    async fn publish_track(
        &self,
        capture: CaptureId,
        name: &str,
        source: TrackSource,
        muted: bool,
    ) -> Result<TrackSid, ClientError> {
        self.with_member(|state, identity| {
            let track_sid = TrackSid(format!("TR_{}", state.next_id()));
            let member = state.members.get_mut(identity).ok_or_else(|| ClientError::session("connection lost"))?;
            if !member.role.can_publish() {
                return Err(ClientError::Forbidden { reason: "token does not allow publishing".into() });
            }
            if member.publications.iter().any(|(p, _)| p.track_name == name) {
                return Err(ClientError::session(format!("{name} already published")));
            }

            let publication = TrackPublicationInfo {
                track_sid: track_sid.clone(),
                track_name: name.to_string(),
                kind: source.kind(),
                source,
                muted,
                subscribed: false,
                encrypted: false,
                dimensions: None,
            };
            member.publications.push((publication.clone(), capture));

            state.broadcast(
                identity,
                &RoomEvent::TrackPublished { identity: identity.clone(), track_sid: track_sid.clone() },
            );
            state.broadcast(
                identity,
                &RoomEvent::TrackSubscribed {
                    identity: identity.clone(),
                    publication: TrackPublicationInfo { subscribed: true, ..publication },
                },
            );
            debug!(%identity, %track_sid, name, "track published");
            Ok(track_sid)
        })
    }

    async fn unpublish_track(&self, sid: &TrackSid) -> Result<(), ClientError> {
        self.with_member(|state, identity| {
            let member = state.members.get_mut(identity).ok_or_else(|| ClientError::session("connection lost"))?;
            let before = member.publications.len();
            member.publications.retain(|(p, _)| &p.track_sid != sid);
            if member.publications.len() == before {
                return Err(ClientError::session(format!("unknown track {sid}")));
            }

            state.broadcast(
                identity,
                &RoomEvent::TrackUnsubscribed { identity: identity.clone(), track_sid: sid.clone() },
            );
            state.broadcast(
                identity,
                &RoomEvent::TrackUnpublished { identity: identity.clone(), track_sid: sid.clone() },
            );
            Ok(())
        })
    }

    async fn set_track_muted(&self, sid: &TrackSid, muted: bool) -> Result<(), ClientError> {
        self.with_member(|state, identity| {
            let member = state.members.get_mut(identity).ok_or_else(|| ClientError::session("connection lost"))?;
            let (publication, _) = member
                .publications
                .iter_mut()
                .find(|(p, _)| &p.track_sid == sid)
                .ok_or_else(|| ClientError::session(format!("unknown track {sid}")))?;
            publication.muted = muted;

            state.broadcast(
                identity,
                &RoomEvent::TrackMuteChanged { identity: identity.clone(), track_sid: sid.clone(), muted },
            );
            Ok(())
        })
    }

    async fn replace_track_source(&self, sid: &TrackSid, capture: CaptureId) -> Result<(), ClientError> {
        self.with_member(|state, identity| {
            let member = state.members.get_mut(identity).ok_or_else(|| ClientError::session("connection lost"))?;
            let (_, source) = member
                .publications
                .iter_mut()
                .find(|(p, _)| &p.track_sid == sid)
                .ok_or_else(|| ClientError::session(format!("unknown track {sid}")))?;
            *source = capture;
            Ok(())
        })
    }

    async fn publish_data(
        &self,
        topic: Topic,
        payload: Vec<u8>,
        reliability: Reliability,
    ) -> Result<(), ClientError> {
        self.with_member(|state, identity| {
            let name = state.members.get(identity).map(|m| m.name.clone());
            debug!(%identity, topic = topic.as_str(), ?reliability, bytes = payload.len(), "data relayed");
            state.broadcast(
                identity,
                &RoomEvent::DataReceived {
                    topic: topic.as_str().to_string(),
                    payload,
                    sender: Some(DataSender { identity: identity.clone(), name }),
                },
            );
            Ok(())
        })
    }

    fn subscribe(&self) -> Subscription<RoomEvent> {
        let (tx, subscription) = Subscription::channel();
        lock(&self.listeners).push(tx);
        subscription
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn join(room: &SimRoom, name: &str, role: Role) -> (SimSession, Subscription<RoomEvent>) {
        let session = room.session();
        let events = session.subscribe();
        let grant = room.issue(name, role).unwrap();
        session.connect(&grant.server_url, &grant.token).await.unwrap();
        (session, events)
    }

    fn drain(events: &mut Subscription<RoomEvent>) -> Vec<RoomEvent> {
        std::iter::from_fn(|| events.try_recv()).collect()
    }

    #[tokio::test]
    async fn identity_carries_prefix() {
        let room = SimRoom::new("fuelldart");
        let (session, _events) = join(&room, "phil", Role::Viewer).await;

        assert_eq!(session.identity().as_deref(), Some("ft-phil"));
        assert_eq!(room.identities(), vec!["ft-phil".to_string()]);
    }

    #[tokio::test]
    async fn late_joiner_is_subscribed_to_existing_tracks() {
        let room = SimRoom::new("fuelldart");
        let (streamer, _s) = join(&room, "phil", Role::Streamer).await;
        let sid = streamer.publish_track(CaptureId(1), "camera", TrackSource::Camera, false).await.unwrap();

        let (_viewer, mut events) = join(&room, "gary", Role::Viewer).await;
        let events = drain(&mut events);

        assert!(matches!(
            events.as_slice(),
            [RoomEvent::TrackSubscribed { identity, publication }]
                if identity == "ft-phil" && publication.track_sid == sid && publication.subscribed
        ));
    }

    #[tokio::test]
    async fn viewer_cannot_publish_media_but_can_chat() {
        let room = SimRoom::new("fuelldart");
        let (viewer, _v) = join(&room, "gary", Role::Viewer).await;
        let (_streamer, mut events) = join(&room, "phil", Role::Streamer).await;

        let err = viewer.publish_track(CaptureId(1), "camera", TrackSource::Camera, false).await.unwrap_err();
        assert!(matches!(err, ClientError::Forbidden { .. }));

        viewer.publish_data(Topic::Chat, b"180!".to_vec(), Reliability::Reliable).await.unwrap();
        assert!(matches!(
            drain(&mut events).as_slice(),
            [RoomEvent::DataReceived { topic, sender: Some(sender), .. }]
                if topic == "chat" && sender.identity == "ft-gary"
        ));
    }

    #[tokio::test]
    async fn dropped_session_is_told_and_peers_see_departure() {
        let room = SimRoom::new("fuelldart");
        let (dropped, mut mine) = join(&room, "phil", Role::Viewer).await;
        let (_peer, mut theirs) = join(&room, "gary", Role::Viewer).await;
        drain(&mut mine);

        assert!(room.drop_connection("ft-phil"));

        assert_eq!(drain(&mut mine), vec![RoomEvent::Disconnected { reason: DisconnectReason::TransportLoss }]);
        assert_eq!(
            drain(&mut theirs),
            vec![RoomEvent::ParticipantDisconnected { identity: "ft-phil".into() }]
        );
        assert!(dropped.room_tables().await.is_err());
    }

    #[tokio::test]
    async fn duplicate_identity_replaces_older_connection() {
        let room = SimRoom::new("fuelldart");
        let (first, mut first_events) = join(&room, "phil", Role::Viewer).await;
        let (_second, _events) = join(&room, "phil", Role::Viewer).await;

        assert_eq!(
            drain(&mut first_events),
            vec![RoomEvent::Disconnected { reason: DisconnectReason::Kicked }]
        );
        assert!(first.room_tables().await.is_err());
        assert_eq!(room.participant_count(), 1);
    }

    #[tokio::test]
    async fn refused_connects_are_counted_down() {
        let room = SimRoom::new("fuelldart");
        room.refuse_next_connects(1);
        let grant = room.issue("phil", Role::Viewer).unwrap();
        let session = room.session();

        assert!(session.connect(&grant.server_url, &grant.token).await.is_err());
        assert!(session.connect(&grant.server_url, &grant.token).await.is_ok());
    }

    #[tokio::test]
    async fn tables_mark_remote_tracks_subscribed() {
        let room = SimRoom::new("fuelldart");
        let (streamer, _s) = join(&room, "phil", Role::Streamer).await;
        streamer.publish_track(CaptureId(1), "screen_share", TrackSource::ScreenShare, false).await.unwrap();
        let (viewer, _v) = join(&room, "gary", Role::Viewer).await;

        let tables = viewer.room_tables().await.unwrap();
        assert_eq!(tables.local.unwrap().identity, "ft-gary");
        assert_eq!(tables.remotes.len(), 1);
        assert!(tables.remotes[0].publications[0].subscribed);

        let own = streamer.room_tables().await.unwrap();
        assert!(!own.local.unwrap().publications[0].subscribed);
    }
}

//! Participant snapshots and render targets.
//!
//! The room service exposes raw membership and publication tables. A
//! [`ParticipantSnapshot`] is the canonical, deterministic view derived from
//! them: local participant first, then remotes sorted by identity, every name
//! sanitized. Building a snapshot is a pure function of the tables, so
//! rebuilding from an unchanged room yields an identical snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    sanitize::sanitize_name,
    types::{Identity, TrackKind, TrackSid, TrackSource},
};

/// Publication names that mark a video track as a screen share.
const SCREEN_TRACK_NAMES: [&str; 2] = ["screen_share", "screen"];

/// Link quality reported by the room service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    /// Excellent.
    Excellent,
    /// Good.
    Good,
    /// Poor.
    Poor,
    /// Connection lost.
    Lost,
    /// Not reported yet.
    #[default]
    Unknown,
}

/// Video dimensions of a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Capabilities granted to a participant by its join token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantPermissions {
    /// May publish media.
    pub can_publish: bool,
    /// May subscribe to media.
    pub can_subscribe: bool,
    /// May publish data packets.
    pub can_publish_data: bool,
    /// Hidden from other participants.
    pub hidden: bool,
    /// Recorder bot.
    pub recorder: bool,
}

/// One track publication as seen by the local client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPublicationInfo {
    /// Server-assigned sid.
    pub track_sid: TrackSid,
    /// Publication name chosen by the publisher.
    pub track_name: String,
    /// Audio or video.
    pub kind: TrackKind,
    /// Logical source tag.
    pub source: TrackSource,
    /// Publisher muted the track.
    pub muted: bool,
    /// The local client receives this track.
    pub subscribed: bool,
    /// End-to-end encrypted.
    pub encrypted: bool,
    /// Video dimensions, when known.
    pub dimensions: Option<Dimensions>,
}

impl TrackPublicationInfo {
    /// Whether this publication carries a screen share rather than a camera.
    pub fn is_screen_share(&self) -> bool {
        self.source == TrackSource::ScreenShare
            || SCREEN_TRACK_NAMES.contains(&self.track_name.as_str())
    }
}

/// A participant as reported by the room service (untrusted, unsorted).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipantRecord {
    /// Stable identity; empty if not assigned yet.
    pub identity: String,
    /// Server sid; empty if not assigned yet.
    pub sid: String,
    /// Display name, if set.
    pub name: Option<String>,
    /// Opaque metadata string.
    pub metadata: Option<String>,
    /// Link quality.
    pub connection_quality: ConnectionQuality,
    /// Audio and video publications.
    pub publications: Vec<TrackPublicationInfo>,
    /// Token capabilities.
    pub permissions: Option<ParticipantPermissions>,
}

/// Raw membership tables read from the session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoomTables {
    /// The local participant, once connected.
    pub local: Option<ParticipantRecord>,
    /// Everyone else.
    pub remotes: Vec<ParticipantRecord>,
}

/// Canonical view of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    /// Stable identity.
    pub identity: Identity,
    /// Server sid.
    pub sid: String,
    /// Sanitized display name (identity if unnamed).
    pub name: String,
    /// Opaque metadata.
    pub metadata: Option<String>,
    /// This is the local participant.
    pub is_local: bool,
    /// Link quality.
    pub connection_quality: ConnectionQuality,
    /// Has an unmuted camera publication.
    pub camera_enabled: bool,
    /// Has an unmuted microphone publication.
    pub microphone_enabled: bool,
    /// Has an unmuted screen share publication.
    pub screen_share_enabled: bool,
    /// Audio publications.
    pub audio_tracks: Vec<TrackPublicationInfo>,
    /// Video publications.
    pub video_tracks: Vec<TrackPublicationInfo>,
    /// Token capabilities.
    pub permissions: Option<ParticipantPermissions>,
}

impl ParticipantInfo {
    fn from_record(record: &ParticipantRecord, is_local: bool) -> Self {
        let (audio_tracks, video_tracks): (Vec<_>, Vec<_>) =
            record.publications.iter().cloned().partition(|p| p.kind == TrackKind::Audio);

        Self {
            identity: record.identity.clone(),
            sid: record.sid.clone(),
            name: sanitize_name(record.name.as_deref().unwrap_or(&record.identity)),
            metadata: record.metadata.clone(),
            is_local,
            connection_quality: record.connection_quality,
            camera_enabled: any_live(record, |p| p.kind == TrackKind::Video && !p.is_screen_share()),
            microphone_enabled: any_live(record, |p| p.source == TrackSource::Microphone),
            screen_share_enabled: any_live(record, |p| {
                p.kind == TrackKind::Video && p.is_screen_share()
            }),
            audio_tracks,
            video_tracks,
            permissions: record.permissions,
        }
    }
}

fn any_live(record: &ParticipantRecord, pred: impl Fn(&TrackPublicationInfo) -> bool) -> bool {
    record.publications.iter().any(|p| !p.muted && pred(p))
}

/// Deterministic participant list consumed by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipantSnapshot {
    participants: Vec<ParticipantInfo>,
}

impl ParticipantSnapshot {
    /// Build the snapshot from raw tables.
    ///
    /// Remotes without identity or sid are skipped, duplicates collapse to one
    /// entry, and a remote claiming the local identity is dropped.
    pub fn build(tables: &RoomTables) -> Self {
        let local = tables.local.as_ref().filter(|l| !l.identity.is_empty());
        let local_identity = local.map(|l| l.identity.as_str());

        let remotes: BTreeMap<&str, &ParticipantRecord> = tables
            .remotes
            .iter()
            .filter(|r| !r.identity.is_empty() && !r.sid.is_empty())
            .filter(|r| Some(r.identity.as_str()) != local_identity)
            .map(|r| (r.identity.as_str(), r))
            .collect();

        let participants = local
            .map(|l| ParticipantInfo::from_record(l, true))
            .into_iter()
            .chain(remotes.values().map(|r| ParticipantInfo::from_record(r, false)))
            .collect();

        Self { participants }
    }

    /// All participants, local first.
    pub fn participants(&self) -> &[ParticipantInfo] {
        &self.participants
    }

    /// Total participant count, local included.
    pub fn count(&self) -> usize {
        self.participants.len()
    }

    /// Remote participant count.
    pub fn remote_count(&self) -> usize {
        self.participants.iter().filter(|p| !p.is_local).count()
    }

    /// Look up a participant by identity.
    pub fn get(&self, identity: &str) -> Option<&ParticipantInfo> {
        self.participants.iter().find(|p| p.identity == identity)
    }

    /// The local participant.
    pub fn local(&self) -> Option<&ParticipantInfo> {
        self.participants.first().filter(|p| p.is_local)
    }

    /// True iff some remote participant has a subscribed video publication.
    pub fn has_active_stream(&self) -> bool {
        self.participants
            .iter()
            .filter(|p| !p.is_local)
            .any(|p| p.video_tracks.iter().any(|t| t.subscribed))
    }
}

/// Where subscribed remote video is rendered.
///
/// Camera tracks render per participant; screen shares go to one dedicated
/// target holding the most recent share.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderTargets {
    cameras: BTreeMap<Identity, TrackSid>,
    screen_share: Option<(Identity, TrackSid)>,
}

impl RenderTargets {
    /// Attach a subscribed track. Audio is ignored. Returns whether anything
    /// changed.
    pub fn attach(&mut self, identity: &str, track: &TrackPublicationInfo) -> bool {
        if track.kind != TrackKind::Video {
            return false;
        }
        let target = (identity.to_string(), track.track_sid.clone());

        if track.is_screen_share() {
            let changed = self.screen_share.as_ref() != Some(&target);
            self.screen_share = Some(target);
            changed
        } else {
            self.cameras.insert(target.0, target.1.clone()) != Some(target.1)
        }
    }

    /// Detach an unsubscribed track. Returns whether anything changed.
    pub fn detach(&mut self, identity: &str, sid: &TrackSid) -> bool {
        if self.screen_share.as_ref().is_some_and(|(who, s)| who == identity && s == sid) {
            self.screen_share = None;
            return true;
        }
        if self.cameras.get(identity) == Some(sid) {
            self.cameras.remove(identity);
            return true;
        }
        false
    }

    /// Drop everything rendered for a participant that left.
    pub fn remove_participant(&mut self, identity: &str) {
        self.cameras.remove(identity);
        if self.screen_share.as_ref().is_some_and(|(who, _)| who == identity) {
            self.screen_share = None;
        }
    }

    /// Camera track rendered for `identity`.
    pub fn camera(&self, identity: &str) -> Option<&TrackSid> {
        self.cameras.get(identity)
    }

    /// Camera targets, sorted by identity.
    pub fn cameras(&self) -> impl Iterator<Item = (&str, &TrackSid)> {
        self.cameras.iter().map(|(who, sid)| (who.as_str(), sid))
    }

    /// The screen share target.
    pub fn screen_share(&self) -> Option<(&str, &TrackSid)> {
        self.screen_share.as_ref().map(|(who, sid)| (who.as_str(), sid))
    }

    /// Detach everything.
    pub fn clear(&mut self) {
        self.cameras.clear();
        self.screen_share = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn publication(sid: &str, name: &str, source: TrackSource, subscribed: bool) -> TrackPublicationInfo {
        TrackPublicationInfo {
            track_sid: TrackSid::from(sid),
            track_name: name.to_string(),
            kind: source.kind(),
            source,
            muted: false,
            subscribed,
            encrypted: false,
            dimensions: None,
        }
    }

    fn record(identity: &str, publications: Vec<TrackPublicationInfo>) -> ParticipantRecord {
        ParticipantRecord {
            identity: identity.to_string(),
            sid: format!("PA_{identity}"),
            name: Some(identity.to_uppercase()),
            publications,
            ..ParticipantRecord::default()
        }
    }

    #[test]
    fn local_first_then_remotes_by_identity() {
        let tables = RoomTables {
            local: Some(record("ft-me", vec![])),
            remotes: vec![record("ft-zed", vec![]), record("ft-amy", vec![])],
        };
        let snapshot = ParticipantSnapshot::build(&tables);

        let order: Vec<_> = snapshot.participants().iter().map(|p| p.identity.as_str()).collect();
        assert_eq!(order, vec!["ft-me", "ft-amy", "ft-zed"]);
        assert!(snapshot.local().unwrap().is_local);
        assert_eq!(snapshot.remote_count(), 2);
    }

    #[test]
    fn incomplete_duplicate_and_self_entries_are_dropped() {
        let mut anonymous = record("", vec![]);
        anonymous.sid = "PA_x".into();
        let mut unsid = record("ft-nosid", vec![]);
        unsid.sid.clear();

        let tables = RoomTables {
            local: Some(record("ft-me", vec![])),
            remotes: vec![anonymous, unsid, record("ft-me", vec![]), record("ft-bob", vec![]), record("ft-bob", vec![])],
        };
        let snapshot = ParticipantSnapshot::build(&tables);

        assert_eq!(snapshot.count(), 2);
        assert_eq!(snapshot.participants().iter().filter(|p| p.identity == "ft-me").count(), 1);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let tables = RoomTables {
            local: Some(record("ft-me", vec![publication("TR_1", "camera", TrackSource::Camera, false)])),
            remotes: vec![
                record("ft-bob", vec![publication("TR_2", "microphone", TrackSource::Microphone, true)]),
                record("ft-amy", vec![publication("TR_3", "camera", TrackSource::Camera, true)]),
            ],
        };

        assert_eq!(ParticipantSnapshot::build(&tables), ParticipantSnapshot::build(&tables));
    }

    #[test]
    fn names_are_sanitized_and_default_to_identity() {
        let mut evil = record("ft-evil", vec![]);
        evil.name = Some("<script>x</script>Eve".into());
        let mut unnamed = record("ft-quiet", vec![]);
        unnamed.name = None;

        let snapshot = ParticipantSnapshot::build(&RoomTables { local: None, remotes: vec![evil, unnamed] });
        assert_eq!(snapshot.get("ft-evil").unwrap().name, "xEve");
        assert_eq!(snapshot.get("ft-quiet").unwrap().name, "ft-quiet");
    }

    #[test]
    fn capability_flags_follow_unmuted_publications() {
        let mut mic = publication("TR_m", "microphone", TrackSource::Microphone, true);
        mic.muted = true;
        let tables = RoomTables {
            local: None,
            remotes: vec![record(
                "ft-bob",
                vec![
                    publication("TR_c", "camera", TrackSource::Camera, true),
                    publication("TR_s", "screen", TrackSource::Unknown, true),
                    mic,
                ],
            )],
        };
        let bob = ParticipantSnapshot::build(&tables).get("ft-bob").unwrap().clone();

        assert!(bob.camera_enabled);
        assert!(bob.screen_share_enabled);
        assert!(!bob.microphone_enabled);
        assert_eq!(bob.video_tracks.len(), 2);
        assert_eq!(bob.audio_tracks.len(), 1);
    }

    #[test]
    fn active_stream_needs_subscribed_remote_video() {
        let audio_only = RoomTables {
            local: Some(record("ft-me", vec![publication("TR_1", "camera", TrackSource::Camera, true)])),
            remotes: vec![record("ft-bob", vec![publication("TR_2", "microphone", TrackSource::Microphone, true)])],
        };
        assert!(!ParticipantSnapshot::build(&audio_only).has_active_stream());

        let unsubscribed = RoomTables {
            local: None,
            remotes: vec![record("ft-bob", vec![publication("TR_3", "camera", TrackSource::Camera, false)])],
        };
        assert!(!ParticipantSnapshot::build(&unsubscribed).has_active_stream());

        let live = RoomTables {
            local: None,
            remotes: vec![record("ft-bob", vec![publication("TR_3", "camera", TrackSource::Camera, true)])],
        };
        assert!(ParticipantSnapshot::build(&live).has_active_stream());
    }

    #[test]
    fn screen_shares_route_to_dedicated_target() {
        let mut targets = RenderTargets::default();
        let cam = publication("TR_c", "camera", TrackSource::Camera, true);
        let screen = publication("TR_s", "screen_share", TrackSource::ScreenShare, true);
        let mic = publication("TR_m", "microphone", TrackSource::Microphone, true);

        assert!(targets.attach("ft-bob", &cam));
        assert!(targets.attach("ft-bob", &screen));
        assert!(!targets.attach("ft-bob", &mic));

        assert_eq!(targets.camera("ft-bob"), Some(&TrackSid::from("TR_c")));
        assert_eq!(targets.screen_share(), Some(("ft-bob", &TrackSid::from("TR_s"))));

        assert!(targets.detach("ft-bob", &TrackSid::from("TR_s")));
        assert_eq!(targets.screen_share(), None);
        assert_eq!(targets.cameras().count(), 1);

        targets.remove_participant("ft-bob");
        assert_eq!(targets.cameras().count(), 0);
    }
}

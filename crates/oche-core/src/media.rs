//! Local capture track lifecycle.
//!
//! One [`TrackController`] per local source (camera, microphone, screen). Each
//! runs `Idle → Starting → Active → Idle`; mute is orthogonal to `Active` and
//! only toggles the outgoing signal, never the capture itself.
//!
//! ## Ownership
//!
//! The controller is the only owner of its capture and publication. Every
//! platform or session result is matched against the [`CaptureId`] it was
//! issued for; results for captures the controller no longer owns are
//! reported as stale so the caller can release them.
//!
//! ## Device switch
//!
//! ```text
//! Active(old) ──switch──► Acquire(new)
//!                              │ ok
//!                              ▼
//!             published? ── ReplaceSource(sid, new) ──ok──► Release(old)
//!                 │ no                         │ failed
//!                 ▼                            ▼
//!            Release(old)               Release(new), old kept
//! ```
//!
//! The publication sid never changes across a switch, so subscribers see no
//! renegotiation. The old capture is released only after the new one is live.
//!
//! A switch superseded after its `ReplaceSource` went out is retired: the
//! controller keeps owning that capture until the session answers, then
//! releases it and points the publication back at the live capture unless a
//! newer replacement is already with the session.

use tracing::{debug, info, warn};

use crate::{
    device::CaptureConstraints,
    error::{CaptureFailure, CoreError},
    types::{CaptureId, TrackSid, TrackSource},
};

/// Side effects requested by a track controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaAction {
    /// Open a camera or microphone.
    Acquire {
        /// Handle the result must be reported against.
        capture: CaptureId,
        /// Which device and quality to open.
        constraints: CaptureConstraints,
    },
    /// Open a screen capture (the platform shows its own picker).
    AcquireDisplay {
        /// Handle the result must be reported against.
        capture: CaptureId,
    },
    /// Register a listener for the platform ending this capture on its own.
    WatchEnded {
        /// Capture to watch.
        capture: CaptureId,
    },
    /// Stop the capture and free the device.
    Release {
        /// Capture to release.
        capture: CaptureId,
    },
    /// Add the capture to the session's outgoing publications.
    Publish {
        /// Capture to publish.
        capture: CaptureId,
        /// Fixed logical publication name.
        name: &'static str,
        /// Logical source tag.
        source: TrackSource,
        /// Publish muted.
        muted: bool,
    },
    /// Remove a publication; the local capture keeps running.
    Unpublish {
        /// Publication to remove.
        sid: TrackSid,
    },
    /// Mute or unmute a publication without touching the capture.
    SetMuted {
        /// Publication to change.
        sid: TrackSid,
        /// New mute state.
        muted: bool,
    },
    /// Swap the capture feeding a publication in place.
    ReplaceSource {
        /// Publication whose source changes.
        sid: TrackSid,
        /// New capture.
        capture: CaptureId,
    },
}

/// Observable state of one local track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    /// No capture.
    Idle,
    /// Waiting for the platform to deliver the capture.
    Starting,
    /// Capturing.
    Active {
        /// Outgoing signal muted.
        muted: bool,
        /// Present in the session's publications.
        published: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Publication {
    None,
    Pending,
    Published(TrackSid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Switch {
    capture: CaptureId,
    device_id: Option<String>,
    /// `ReplaceSource` was issued for `capture`.
    replacing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveTrack {
    capture: CaptureId,
    device_id: Option<String>,
    muted: bool,
    publication: Publication,
    switching_to: Option<Switch>,
    /// Superseded replacements the session has not answered yet.
    retired: Vec<CaptureId>,
}

impl ActiveTrack {
    fn is_switching_to(&self, capture: CaptureId) -> bool {
        self.switching_to.as_ref().is_some_and(|switch| switch.capture == capture)
    }

    fn take_retired(&mut self, capture: CaptureId) -> bool {
        let before = self.retired.len();
        self.retired.retain(|retired| *retired != capture);
        self.retired.len() != before
    }

    fn adopt(&mut self, switch: Switch) -> CaptureId {
        self.device_id = switch.device_id;
        std::mem::replace(&mut self.capture, switch.capture)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    Starting { request: CaptureId, device_id: Option<String> },
    Active(ActiveTrack),
}

/// Lifecycle of one local capture track.
#[derive(Debug, Clone)]
pub struct TrackController {
    source: TrackSource,
    state: State,
    last_error: Option<CoreError>,
}

impl TrackController {
    /// Create an idle controller for `source`.
    pub fn new(source: TrackSource) -> Self {
        Self { source, state: State::Idle, last_error: None }
    }

    /// Source this controller captures.
    pub fn source(&self) -> TrackSource {
        self.source
    }

    /// Observable status.
    pub fn status(&self) -> TrackStatus {
        match &self.state {
            State::Idle => TrackStatus::Idle,
            State::Starting { .. } => TrackStatus::Starting,
            State::Active(track) => TrackStatus::Active {
                muted: track.muted,
                published: matches!(track.publication, Publication::Published(_)),
            },
        }
    }

    /// Last capture error, cleared by the next successful start.
    pub fn last_error(&self) -> Option<&CoreError> {
        self.last_error.as_ref()
    }

    /// Current live capture.
    pub fn capture(&self) -> Option<CaptureId> {
        match &self.state {
            State::Active(track) => Some(track.capture),
            _ => None,
        }
    }

    /// Device currently feeding the capture.
    pub fn device_id(&self) -> Option<&str> {
        match &self.state {
            State::Active(track) => track.device_id.as_deref(),
            _ => None,
        }
    }

    /// Current publication sid.
    pub fn publication(&self) -> Option<&TrackSid> {
        match &self.state {
            State::Active(ActiveTrack { publication: Publication::Published(sid), .. }) => Some(sid),
            _ => None,
        }
    }

    /// Whether `capture` is the live capture or an outstanding request of this
    /// controller.
    pub fn owns(&self, capture: CaptureId) -> bool {
        match &self.state {
            State::Idle => false,
            State::Starting { request, .. } => *request == capture,
            State::Active(track) => {
                track.capture == capture
                    || track.is_switching_to(capture)
                    || track.retired.contains(&capture)
            },
        }
    }

    /// Begin capturing a device with `constraints`. No-op unless idle.
    pub fn start(&mut self, request: CaptureId, constraints: CaptureConstraints) -> Vec<MediaAction> {
        if !self.begin(request, constraints.device_id().map(str::to_string)) {
            return Vec::new();
        }
        vec![MediaAction::Acquire { capture: request, constraints }]
    }

    /// Begin capturing the display. No-op unless idle.
    pub fn start_display(&mut self, request: CaptureId) -> Vec<MediaAction> {
        if !self.begin(request, None) {
            return Vec::new();
        }
        vec![MediaAction::AcquireDisplay { capture: request }]
    }

    fn begin(&mut self, request: CaptureId, device_id: Option<String>) -> bool {
        if self.state != State::Idle {
            return false;
        }
        self.state = State::Starting { request, device_id };
        debug!(source = ?self.source, %request, "acquiring capture");
        true
    }

    /// The platform delivered a capture.
    ///
    /// Returns `None` if this controller does not own `capture`.
    pub fn on_acquired(&mut self, capture: CaptureId) -> Option<Vec<MediaAction>> {
        match &mut self.state {
            State::Starting { request, device_id } if *request == capture => {
                let device_id = device_id.take();
                info!(source = ?self.source, %capture, "capture active");
                self.state = State::Active(ActiveTrack {
                    capture,
                    device_id,
                    muted: false,
                    publication: Publication::None,
                    switching_to: None,
                    retired: Vec::new(),
                });
                self.last_error = None;
                Some(Vec::new())
            },
            State::Active(track)
                if track.switching_to.as_ref().is_some_and(|s| s.capture == capture && !s.replacing) =>
            {
                match &track.publication {
                    Publication::Published(sid) => {
                        let sid = sid.clone();
                        if let Some(switch) = &mut track.switching_to {
                            switch.replacing = true;
                        }
                        Some(vec![MediaAction::ReplaceSource { sid, capture }])
                    },
                    Publication::None | Publication::Pending => {
                        // a pending publish of the old capture is unpublished on arrival
                        track.publication = Publication::None;
                        let Some(switch) = track.switching_to.take() else {
                            return Some(Vec::new());
                        };
                        let old = track.adopt(switch);
                        info!(source = ?self.source, from = %old, to = %capture, "capture switched");
                        Some(vec![MediaAction::Release { capture: old }])
                    },
                }
            },
            _ => None,
        }
    }

    /// The platform could not deliver `capture`.
    ///
    /// A failed start returns to idle; a failed switch keeps the running
    /// capture untouched. Either way the error is returned and remembered.
    pub fn on_acquire_failed(
        &mut self,
        capture: CaptureId,
        failure: &CaptureFailure,
    ) -> Option<CoreError> {
        let err = CoreError::from_capture(self.source, failure);
        match &mut self.state {
            State::Starting { request, .. } if *request == capture => {
                self.state = State::Idle;
            },
            State::Active(track) if track.is_switching_to(capture) => {
                track.switching_to = None;
            },
            _ => return None,
        }

        warn!(source = ?self.source, %capture, error = %err, "capture failed");
        self.last_error = Some(err.clone());
        Some(err)
    }

    /// Switch the running capture to another device.
    ///
    /// Does nothing unless active. A switch already in flight is superseded:
    /// a capture still being acquired is released when it arrives, one
    /// already handed to the session is retired.
    pub fn switch_device(
        &mut self,
        request: CaptureId,
        constraints: CaptureConstraints,
    ) -> Vec<MediaAction> {
        let State::Active(track) = &mut self.state else {
            return Vec::new();
        };
        if track.device_id.as_deref() == constraints.device_id() && track.switching_to.is_none() {
            return Vec::new();
        }

        if let Some(previous) = track.switching_to.take()
            && previous.replacing
        {
            debug!(source = ?self.source, capture = %previous.capture, "replacement superseded");
            track.retired.push(previous.capture);
        }
        track.switching_to = Some(Switch {
            capture: request,
            device_id: constraints.device_id().map(str::to_string),
            replacing: false,
        });
        debug!(source = ?self.source, %request, "acquiring replacement capture");
        vec![MediaAction::Acquire { capture: request, constraints }]
    }

    /// The session swapped the publication onto `capture`.
    ///
    /// For a retired capture the publication is moved back onto the live
    /// capture, unless a newer replacement is already with the session, and
    /// the retired capture is released.
    pub fn on_source_replaced(&mut self, capture: CaptureId) -> Vec<MediaAction> {
        let State::Active(track) = &mut self.state else {
            return Vec::new();
        };
        if let Some(switch) = track.switching_to.take_if(|switch| switch.capture == capture) {
            let old = track.adopt(switch);
            info!(source = ?self.source, from = %old, to = %capture, "capture switched");
            return vec![MediaAction::Release { capture: old }];
        }
        if !track.take_retired(capture) {
            return Vec::new();
        }

        debug!(source = ?self.source, %capture, "superseded replacement landed");
        let mut actions = Vec::new();
        if !track.switching_to.as_ref().is_some_and(|switch| switch.replacing)
            && let Publication::Published(sid) = &track.publication
        {
            actions.push(MediaAction::ReplaceSource { sid: sid.clone(), capture: track.capture });
        }
        actions.push(MediaAction::Release { capture });
        actions
    }

    /// The session refused the swap; drop the replacement, keep the old one.
    pub fn on_replace_failed(&mut self, capture: CaptureId, reason: &str) -> Option<CoreError> {
        let State::Active(track) = &mut self.state else {
            return None;
        };
        if track.take_retired(capture) || !track.is_switching_to(capture) {
            return None;
        }
        track.switching_to = None;

        let err = CoreError::Capture { track: self.source, reason: reason.to_string() };
        warn!(source = ?self.source, %capture, error = %err, "source replacement failed");
        self.last_error = Some(err.clone());
        Some(err)
    }

    /// Toggle mute. An idle track is started instead.
    pub fn toggle_mute(
        &mut self,
        request: CaptureId,
        constraints: CaptureConstraints,
    ) -> Vec<MediaAction> {
        match &mut self.state {
            State::Idle => self.start(request, constraints),
            State::Starting { .. } => Vec::new(),
            State::Active(track) => {
                track.muted = !track.muted;
                debug!(source = ?self.source, muted = track.muted, "mute toggled");
                match &track.publication {
                    Publication::Published(sid) => {
                        vec![MediaAction::SetMuted { sid: sid.clone(), muted: track.muted }]
                    },
                    Publication::None | Publication::Pending => Vec::new(),
                }
            },
        }
    }

    /// Publish the active capture under its fixed name.
    pub fn publish(&mut self) -> Result<Vec<MediaAction>, CoreError> {
        let State::Active(track) = &mut self.state else {
            return Err(CoreError::not_ready(format!(
                "no active {} track to publish",
                self.source.publication_name()
            )));
        };
        if track.publication != Publication::None {
            return Ok(Vec::new());
        }

        track.publication = Publication::Pending;
        Ok(vec![MediaAction::Publish {
            capture: track.capture,
            name: self.source.publication_name(),
            source: self.source,
            muted: track.muted,
        }])
    }

    /// The session accepted the publication.
    ///
    /// If the publication is no longer wanted it is removed again.
    pub fn on_published(&mut self, capture: CaptureId, sid: TrackSid) -> Vec<MediaAction> {
        match &mut self.state {
            State::Active(track)
                if track.capture == capture && track.publication == Publication::Pending =>
            {
                info!(source = ?self.source, %sid, "track published");
                track.publication = Publication::Published(sid);
                Vec::new()
            },
            _ => vec![MediaAction::Unpublish { sid }],
        }
    }

    /// The session refused the publication.
    pub fn on_publish_failed(&mut self, capture: CaptureId, reason: &str) -> Option<CoreError> {
        let State::Active(track) = &mut self.state else {
            return None;
        };
        if track.capture != capture || track.publication != Publication::Pending {
            return None;
        }
        track.publication = Publication::None;
        Some(CoreError::not_ready(format!(
            "publishing {} failed: {reason}",
            self.source.publication_name()
        )))
    }

    /// Remove the publication but keep capturing for local preview.
    pub fn unpublish(&mut self) -> Vec<MediaAction> {
        let State::Active(track) = &mut self.state else {
            return Vec::new();
        };
        match std::mem::replace(&mut track.publication, Publication::None) {
            Publication::Published(sid) => vec![MediaAction::Unpublish { sid }],
            Publication::None | Publication::Pending => Vec::new(),
        }
    }

    /// The session went away; every publication with it.
    ///
    /// A replacement waiting on the session is adopted directly and retired
    /// captures are released, since no answer will move a publication now.
    pub fn on_session_lost(&mut self) -> Vec<MediaAction> {
        let State::Active(track) = &mut self.state else {
            return Vec::new();
        };
        track.publication = Publication::None;

        let mut actions: Vec<MediaAction> =
            track.retired.drain(..).map(|capture| MediaAction::Release { capture }).collect();
        if let Some(switch) = track.switching_to.take_if(|switch| switch.replacing) {
            let old = track.adopt(switch);
            info!(source = ?self.source, from = %old, to = %track.capture, "capture switched offline");
            actions.push(MediaAction::Release { capture: old });
        }
        actions
    }

    /// Stop capturing: unpublish, then release the device.
    pub fn stop(&mut self) -> Vec<MediaAction> {
        let mut actions = Vec::new();
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => {},
            State::Starting { request, .. } => {
                debug!(source = ?self.source, %request, "start abandoned");
            },
            State::Active(track) => {
                if let Publication::Published(sid) = track.publication {
                    actions.push(MediaAction::Unpublish { sid });
                }
                actions.push(MediaAction::Release { capture: track.capture });
                if let Some(switch) = track.switching_to.filter(|switch| switch.replacing) {
                    actions.push(MediaAction::Release { capture: switch.capture });
                }
                actions.extend(track.retired.into_iter().map(|capture| MediaAction::Release { capture }));
                info!(source = ?self.source, capture = %track.capture, "capture stopped");
            },
        }
        actions
    }

    /// The platform ended `capture` on its own.
    ///
    /// Returns `None` if `capture` is not the live capture (stale notice).
    pub fn on_capture_ended(&mut self, capture: CaptureId) -> Option<Vec<MediaAction>> {
        if self.capture() != Some(capture) {
            return None;
        }
        info!(source = ?self.source, %capture, "capture ended by platform");
        Some(self.stop())
    }
}

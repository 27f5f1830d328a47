//! Screen share lifecycle.
//!
//! Same shape as a camera track, single-kind and without device switching.
//! The difference: the platform can end a screen capture by itself (the
//! user presses the browser's or OS's own "stop sharing" control). The
//! controller registers a termination listener as soon as the capture is
//! live, and treats a platform-initiated end exactly like its own stop, so
//! the caller emits the same "stopped sharing" notice either way.

use tracing::info;

use crate::{
    error::{CaptureFailure, CoreError},
    media::{MediaAction, TrackController, TrackStatus},
    types::{CaptureId, TrackSid, TrackSource},
};

/// A share that just ended, plus the teardown the caller must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenShareEnded {
    /// Unpublish (if published) then release.
    pub actions: Vec<MediaAction>,
    /// The platform ended the capture, not the application.
    pub by_platform: bool,
}

/// Screen capture controller.
#[derive(Debug, Clone)]
pub struct ScreenShareController {
    track: TrackController,
}

impl Default for ScreenShareController {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenShareController {
    /// Create an idle controller.
    pub fn new() -> Self {
        Self { track: TrackController::new(TrackSource::ScreenShare) }
    }

    /// Observable status.
    pub fn status(&self) -> TrackStatus {
        self.track.status()
    }

    /// Whether a share is live.
    pub fn is_active(&self) -> bool {
        matches!(self.status(), TrackStatus::Active { .. })
    }

    /// Whether `capture` belongs to this controller.
    pub fn owns(&self, capture: CaptureId) -> bool {
        self.track.owns(capture)
    }

    /// Live capture.
    pub fn capture(&self) -> Option<CaptureId> {
        self.track.capture()
    }

    /// Current publication.
    pub fn publication(&self) -> Option<&TrackSid> {
        self.track.publication()
    }

    /// Last capture error.
    pub fn last_error(&self) -> Option<&CoreError> {
        self.track.last_error()
    }

    /// Ask the platform for a display capture.
    pub fn start(&mut self, request: CaptureId) -> Vec<MediaAction> {
        self.track.start_display(request)
    }

    /// The display capture is live; start watching for a platform-side end.
    pub fn on_acquired(&mut self, capture: CaptureId) -> Option<Vec<MediaAction>> {
        let mut actions = self.track.on_acquired(capture)?;
        actions.insert(0, MediaAction::WatchEnded { capture });
        Some(actions)
    }

    /// The platform refused or the user cancelled the picker.
    pub fn on_acquire_failed(
        &mut self,
        capture: CaptureId,
        failure: &CaptureFailure,
    ) -> Option<CoreError> {
        self.track.on_acquire_failed(capture, failure)
    }

    /// Publish the live share.
    pub fn publish(&mut self) -> Result<Vec<MediaAction>, CoreError> {
        self.track.publish()
    }

    /// The session accepted the publication.
    pub fn on_published(&mut self, capture: CaptureId, sid: TrackSid) -> Vec<MediaAction> {
        self.track.on_published(capture, sid)
    }

    /// The session refused the publication.
    pub fn on_publish_failed(&mut self, capture: CaptureId, reason: &str) -> Option<CoreError> {
        self.track.on_publish_failed(capture, reason)
    }

    /// Session lost; the publication went with it.
    pub fn on_session_lost(&mut self) -> Vec<MediaAction> {
        self.track.on_session_lost()
    }

    /// Application-initiated stop.
    ///
    /// Returns `None` if nothing was being shared (a pending picker is simply
    /// abandoned).
    pub fn stop(&mut self) -> Option<ScreenShareEnded> {
        let was_active = self.is_active();
        let actions = self.track.stop();
        was_active.then(|| {
            info!("screen share stopped");
            ScreenShareEnded { actions, by_platform: false }
        })
    }

    /// The platform ended `capture`.
    ///
    /// Stale notices for captures that are no longer live return `None`.
    pub fn on_capture_ended(&mut self, capture: CaptureId) -> Option<ScreenShareEnded> {
        let actions = self.track.on_capture_ended(capture)?;
        Some(ScreenShareEnded { actions, by_platform: true })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn live_share() -> ScreenShareController {
        let mut screen = ScreenShareController::new();
        screen.start(CaptureId(5));
        screen.on_acquired(CaptureId(5)).unwrap();
        screen.publish().unwrap();
        screen.on_published(CaptureId(5), TrackSid::from("TR_screen"));
        screen
    }

    #[test]
    fn acquisition_registers_end_listener() {
        let mut screen = ScreenShareController::new();
        assert_eq!(screen.start(CaptureId(5)), vec![MediaAction::AcquireDisplay { capture: CaptureId(5) }]);

        let actions = screen.on_acquired(CaptureId(5)).unwrap();
        assert_eq!(actions, vec![MediaAction::WatchEnded { capture: CaptureId(5) }]);
        assert!(screen.is_active());
    }

    #[test]
    fn publishes_under_screen_share_name() {
        let mut screen = ScreenShareController::new();
        screen.start(CaptureId(5));
        screen.on_acquired(CaptureId(5)).unwrap();

        let actions = screen.publish().unwrap();
        assert!(matches!(
            actions.as_slice(),
            [MediaAction::Publish { name: "screen_share", source: TrackSource::ScreenShare, .. }]
        ));
    }

    #[test]
    fn platform_end_matches_app_stop() {
        let mut by_platform = live_share();
        let mut by_app = live_share();

        let ended = by_platform.on_capture_ended(CaptureId(5)).unwrap();
        let stopped = by_app.stop().unwrap();

        assert!(ended.by_platform);
        assert!(!stopped.by_platform);
        assert_eq!(ended.actions, stopped.actions);
        assert_eq!(
            ended.actions,
            vec![
                MediaAction::Unpublish { sid: TrackSid::from("TR_screen") },
                MediaAction::Release { capture: CaptureId(5) },
            ]
        );
        assert_eq!(by_platform.status(), TrackStatus::Idle);
    }

    #[test]
    fn stale_end_notice_is_ignored() {
        let mut screen = live_share();
        screen.stop();

        assert_eq!(screen.on_capture_ended(CaptureId(5)), None);
    }

    #[test]
    fn stop_without_share_is_silent() {
        let mut screen = ScreenShareController::new();
        assert_eq!(screen.stop(), None);

        screen.start(CaptureId(1));
        assert_eq!(screen.stop(), None);
        assert!(!screen.owns(CaptureId(1)));
    }
}

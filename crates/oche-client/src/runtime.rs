//! Async driver.
//!
//! The [`Runtime`] owns the [`App`] and the collaborators. It feeds events in,
//! executes the returned actions against the collaborator traits, and feeds
//! every result back as a further event until the queue drains. Deadlines are
//! served by sleeping until the earliest one the application reports.

use std::{collections::VecDeque, time::Duration};

use oche_core::{Environment, MediaAction, SessionAction};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    app::{App, AppAction, AppEvent},
    error::ClientError,
    layout_store::LayoutStore,
    traits::{MediaPlatform, PlatformEvent, Session, Subscription, TokenProvider},
};

/// Drives an [`App`] against real (or simulated) collaborators.
pub struct Runtime<E, S, P, T>
where
    E: Environment,
{
    app: App<E>,
    env: E,
    session: S,
    platform: P,
    tokens: T,
    layout_store: Option<LayoutStore>,
    room_events: Subscription<oche_core::RoomEvent>,
    platform_events: Subscription<PlatformEvent>,
}

impl<E, S, P, T> Runtime<E, S, P, T>
where
    E: Environment,
    S: Session,
    P: MediaPlatform,
    T: TokenProvider,
{
    /// Wire `app` to its collaborators and subscribe to their events.
    pub fn new(app: App<E>, session: S, platform: P, tokens: T) -> Self {
        let env = app.env().clone();
        let room_events = session.subscribe();
        let platform_events = platform.subscribe();
        Self { app, env, session, platform, tokens, layout_store: None, room_events, platform_events }
    }

    /// Persist layout changes to `store`.
    #[must_use]
    pub fn with_layout_store(mut self, store: LayoutStore) -> Self {
        self.layout_store = Some(store);
        self
    }

    /// Application state.
    pub fn app(&self) -> &App<E> {
        &self.app
    }

    /// Room session collaborator.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Media platform collaborator.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Handle `event` and everything that follows from it.
    ///
    /// # Errors
    ///
    /// Returns the application's rejection of `event` itself. Failures further
    /// down the chain are recorded by the application and only logged here.
    pub async fn dispatch(&mut self, event: AppEvent<E::Instant>) -> Result<(), ClientError> {
        let actions = self.app.handle(event)?;
        self.execute_all(actions).await;
        Ok(())
    }

    /// Process every queued room and platform event. Returns how many were
    /// handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let event = if let Some(event) = self.room_events.try_recv() {
                AppEvent::Room(event)
            } else if let Some(event) = self.platform_events.try_recv() {
                platform_event(event)
            } else {
                return handled;
            };
            self.dispatch_logged(event).await;
            handled += 1;
        }
    }

    /// Deliver a tick at the current time.
    pub async fn tick(&mut self) {
        let now = self.env.now();
        self.dispatch_logged(AppEvent::Tick { now }).await;
    }

    /// Run until the command channel closes.
    ///
    /// Commands, room events and platform events are handled as they arrive;
    /// between them the runtime sleeps until the application's next deadline.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<AppEvent<E::Instant>>) {
        info!("runtime started");
        loop {
            let env = self.env.clone();
            let wait = self.app.next_deadline().map(|deadline| {
                let now = env.now();
                if deadline > now { deadline - now } else { Duration::ZERO }
            });
            let sleep = async {
                match wait {
                    Some(duration) => env.sleep(duration).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(event) => {
                        if let Err(err) = self.dispatch(event).await {
                            warn!(error = %err, "command rejected");
                        }
                    },
                    None => break,
                },
                Some(event) = self.room_events.recv() => {
                    self.dispatch_logged(AppEvent::Room(event)).await;
                },
                Some(event) = self.platform_events.recv() => {
                    self.dispatch_logged(platform_event(event)).await;
                },
                () = sleep => self.tick().await,
            }
        }
        info!("runtime stopped");
    }

    async fn dispatch_logged(&mut self, event: AppEvent<E::Instant>) {
        if let Err(err) = self.dispatch(event).await {
            warn!(error = %err, "event rejected");
        }
    }

    async fn execute_all(&mut self, actions: Vec<AppAction>) {
        let mut queue: VecDeque<AppAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            let Some(follow_up) = self.execute(action).await else {
                continue;
            };
            match self.app.handle(follow_up) {
                Ok(more) => queue.extend(more),
                Err(err) => warn!(error = %err, "follow-up event rejected"),
            }
        }
    }

    async fn execute(&mut self, action: AppAction) -> Option<AppEvent<E::Instant>> {
        match action {
            AppAction::ProbePermissions => {
                Some(AppEvent::PermissionResult(self.platform.probe_permissions().await))
            },
            AppAction::EnumerateDevices => match self.platform.enumerate_devices().await {
                Ok(devices) => Some(AppEvent::DevicesEnumerated(devices)),
                Err(err) => {
                    warn!(error = %err, "device enumeration failed");
                    None
                },
            },
            AppAction::IssueGrant { name, role } => {
                let result = self.tokens.issue(&name, role).await.map_err(|e| e.to_string());
                Some(AppEvent::GrantIssued(result))
            },
            AppAction::Session(action) => self.execute_session(action).await,
            AppAction::Media(action) => self.execute_media(action).await,
            AppAction::SendData { topic, payload } => {
                match self.session.publish_data(topic, payload, topic.reliability()).await {
                    Ok(()) => None,
                    Err(err) => Some(AppEvent::DataSendFailed { topic, reason: err.to_string() }),
                }
            },
            AppAction::PersistLayout => {
                if let Some(store) = &self.layout_store
                    && let Err(err) = store.save(self.app.layout())
                {
                    warn!(error = %err, path = %store.path().display(), "layout not saved");
                }
                None
            },
        }
    }

    async fn execute_session(&mut self, action: SessionAction) -> Option<AppEvent<E::Instant>> {
        match action {
            SessionAction::Connect { server_url, token } => {
                match self.session.connect(&server_url, &token).await {
                    Ok(local) => Some(AppEvent::Connected(local)),
                    Err(err) => Some(AppEvent::ConnectFailed { reason: err.to_string() }),
                }
            },
            SessionAction::Disconnect => {
                if let Err(err) = self.session.disconnect().await {
                    debug!(error = %err, "disconnect failed");
                }
                None
            },
            SessionAction::SyncParticipants => match self.session.room_tables().await {
                Ok(tables) => Some(AppEvent::RoomTables(tables)),
                Err(err) => {
                    debug!(error = %err, "participant sync skipped");
                    None
                },
            },
        }
    }

    async fn execute_media(&mut self, action: MediaAction) -> Option<AppEvent<E::Instant>> {
        match action {
            MediaAction::Acquire { capture, constraints } => {
                Some(match self.platform.acquire(capture, &constraints).await {
                    Ok(()) => AppEvent::CaptureAcquired { capture },
                    Err(failure) => AppEvent::CaptureFailed { capture, failure },
                })
            },
            MediaAction::AcquireDisplay { capture } => {
                Some(match self.platform.acquire_display(capture).await {
                    Ok(()) => AppEvent::CaptureAcquired { capture },
                    Err(failure) => AppEvent::CaptureFailed { capture, failure },
                })
            },
            MediaAction::WatchEnded { capture } => {
                self.platform.watch_ended(capture).await;
                None
            },
            MediaAction::Release { capture } => {
                self.platform.release(capture).await;
                None
            },
            MediaAction::Publish { capture, name, source, muted } => {
                Some(match self.session.publish_track(capture, name, source, muted).await {
                    Ok(sid) => AppEvent::TrackPublished { capture, sid },
                    Err(err) => AppEvent::PublishFailed { capture, reason: err.to_string() },
                })
            },
            MediaAction::Unpublish { sid } => {
                if let Err(err) = self.session.unpublish_track(&sid).await {
                    debug!(error = %err, %sid, "unpublish failed");
                }
                None
            },
            MediaAction::SetMuted { sid, muted } => {
                if let Err(err) = self.session.set_track_muted(&sid, muted).await {
                    warn!(error = %err, %sid, muted, "mute change failed");
                }
                None
            },
            MediaAction::ReplaceSource { sid, capture } => {
                Some(match self.session.replace_track_source(&sid, capture).await {
                    Ok(()) => AppEvent::SourceReplaced { capture },
                    Err(err) => AppEvent::ReplaceFailed { capture, reason: err.to_string() },
                })
            },
        }
    }
}

fn platform_event<I>(event: PlatformEvent) -> AppEvent<I> {
    match event {
        PlatformEvent::DevicesChanged => AppEvent::DevicesChanged,
        PlatformEvent::CaptureEnded { capture } => AppEvent::CaptureEnded { capture },
    }
}

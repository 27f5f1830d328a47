//! Simulated capture platform.
//!
//! Devices are a plain list that tests plug and unplug. Captures are tracked
//! by id so tests can assert that every acquired device was released, and
//! a live display capture can be ended "from the browser chrome" with
//! [`SimPlatform::end_capture_natively`].

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use oche_client::{ClientError, MediaPlatform, PlatformEvent, Subscription};
use oche_core::{CaptureConstraints, CaptureFailure, CaptureId, DeviceInfo, DeviceKind};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// What a live capture is reading from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// A camera or microphone.
    Device(String),
    /// The screen.
    Display,
}

#[derive(Debug, Default)]
struct PlatformState {
    devices: Vec<DeviceInfo>,
    denied: bool,
    live: BTreeMap<CaptureId, CaptureSource>,
    watched: BTreeSet<CaptureId>,
    released: Vec<CaptureId>,
    listeners: Vec<UnboundedSender<PlatformEvent>>,
}

impl PlatformState {
    fn emit(&mut self, event: &PlatformEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Shared handle to the simulated platform.
#[derive(Debug, Clone, Default)]
pub struct SimPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl SimPlatform {
    /// Platform exposing `devices`.
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        let state = PlatformState { devices, ..PlatformState::default() };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// One labelled camera and one unlabelled microphone.
    pub fn with_default_devices() -> Self {
        Self::new(vec![
            DeviceInfo { id: "cam-1".into(), label: "Board Cam".into(), kind: DeviceKind::VideoInput },
            DeviceInfo { id: "mic-1".into(), label: String::new(), kind: DeviceKind::AudioInput },
        ])
    }

    fn lock(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse (or allow again) every access request.
    pub fn deny_permissions(&self, denied: bool) {
        self.lock().denied = denied;
    }

    /// Attach a device.
    pub fn plug(&self, device: DeviceInfo) {
        let mut state = self.lock();
        state.devices.push(device);
        state.emit(&PlatformEvent::DevicesChanged);
    }

    /// Detach a device. Captures reading from it keep running.
    pub fn unplug(&self, device_id: &str) {
        let mut state = self.lock();
        state.devices.retain(|d| d.id != device_id);
        state.emit(&PlatformEvent::DevicesChanged);
    }

    /// End `capture` the way the platform's own stop control does.
    ///
    /// Returns false if the capture is not live.
    pub fn end_capture_natively(&self, capture: CaptureId) -> bool {
        let mut state = self.lock();
        if state.live.remove(&capture).is_none() {
            return false;
        }
        if state.watched.remove(&capture) {
            state.emit(&PlatformEvent::CaptureEnded { capture });
        }
        debug!(%capture, "capture ended natively");
        true
    }

    /// Live captures and what they read from.
    pub fn live_captures(&self) -> BTreeMap<CaptureId, CaptureSource> {
        self.lock().live.clone()
    }

    /// The live display capture, if any.
    pub fn active_display_capture(&self) -> Option<CaptureId> {
        self.lock().live.iter().find(|(_, s)| **s == CaptureSource::Display).map(|(id, _)| *id)
    }

    /// Device feeding `capture`.
    pub fn device_of(&self, capture: CaptureId) -> Option<String> {
        match self.lock().live.get(&capture) {
            Some(CaptureSource::Device(id)) => Some(id.clone()),
            _ => None,
        }
    }

    /// Every capture released so far, in order.
    pub fn released(&self) -> Vec<CaptureId> {
        self.lock().released.clone()
    }
}

#[async_trait]
impl MediaPlatform for SimPlatform {
    async fn probe_permissions(&self) -> Result<(), CaptureFailure> {
        let state = self.lock();
        if state.denied {
            return Err(CaptureFailure::PermissionDenied);
        }
        if state.devices.is_empty() {
            return Err(CaptureFailure::Unavailable { reason: "no capture devices".into() });
        }
        Ok(())
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, ClientError> {
        Ok(self.lock().devices.clone())
    }

    async fn acquire(
        &self,
        capture: CaptureId,
        constraints: &CaptureConstraints,
    ) -> Result<(), CaptureFailure> {
        let mut state = self.lock();
        if state.denied {
            return Err(CaptureFailure::PermissionDenied);
        }

        let kind = match constraints {
            CaptureConstraints::Video(_) => DeviceKind::VideoInput,
            CaptureConstraints::Audio(_) => DeviceKind::AudioInput,
        };
        let device = state
            .devices
            .iter()
            .filter(|d| d.kind == kind)
            .find(|d| constraints.device_id().is_none_or(|id| id == d.id))
            .map(|d| d.id.clone())
            .ok_or_else(|| CaptureFailure::Unavailable { reason: "requested device not found".into() })?;

        debug!(%capture, device, "device capture started");
        state.live.insert(capture, CaptureSource::Device(device));
        Ok(())
    }

    async fn acquire_display(&self, capture: CaptureId) -> Result<(), CaptureFailure> {
        let mut state = self.lock();
        if state.denied {
            return Err(CaptureFailure::PermissionDenied);
        }
        state.live.insert(capture, CaptureSource::Display);
        Ok(())
    }

    async fn release(&self, capture: CaptureId) {
        let mut state = self.lock();
        if state.live.remove(&capture).is_some() {
            state.watched.remove(&capture);
            state.released.push(capture);
        }
    }

    async fn watch_ended(&self, capture: CaptureId) {
        let mut state = self.lock();
        if state.live.contains_key(&capture) {
            state.watched.insert(capture);
        }
    }

    fn subscribe(&self) -> Subscription<PlatformEvent> {
        let (tx, subscription) = Subscription::channel();
        self.lock().listeners.push(tx);
        subscription
    }
}

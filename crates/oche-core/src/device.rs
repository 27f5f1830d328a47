//! Capture device registry.
//!
//! Tracks which input devices exist, which one of each kind is selected, and
//! whether the platform has granted media access. Selection is pure state:
//! changing it never touches a capture that is already running.
//!
//! ## Hot-plug
//!
//! A device-change notification triggers re-enumeration. The previous
//! selection survives if that device is still listed; otherwise the registry
//! falls back to the first device of that kind.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CoreError;

/// Kind of capture input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Microphone.
    AudioInput,
    /// Camera.
    VideoInput,
}

impl DeviceKind {
    fn fallback_label(self) -> &'static str {
        match self {
            Self::AudioInput => "Microphone",
            Self::VideoInput => "Camera",
        }
    }
}

/// One enumerated input device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Platform device id.
    pub id: String,
    /// Human-readable label. Empty until permission is granted on some
    /// platforms.
    pub label: String,
    /// Input kind.
    pub kind: DeviceKind,
}

/// Media access state as last reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    /// Not probed yet.
    #[default]
    Unknown,
    /// Access granted; labels are available.
    Granted,
    /// Access refused.
    Denied,
}

/// Capture quality defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Ideal capture width in pixels.
    pub video_width: u32,
    /// Ideal capture height in pixels.
    pub video_height: u32,
    /// Ideal frame rate.
    pub video_frame_rate: u32,
    /// Acoustic echo cancellation.
    pub echo_cancellation: bool,
    /// Background noise suppression.
    pub noise_suppression: bool,
    /// Automatic gain control.
    pub auto_gain_control: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video_width: 1280,
            video_height: 720,
            video_frame_rate: 30,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Camera capture constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    /// Exact device to open, or the platform default.
    pub device_id: Option<String>,
    /// Ideal width.
    pub width: u32,
    /// Ideal height.
    pub height: u32,
    /// Ideal frame rate.
    pub frame_rate: u32,
}

/// Microphone capture constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    /// Exact device to open, or the platform default.
    pub device_id: Option<String>,
    /// Acoustic echo cancellation.
    pub echo_cancellation: bool,
    /// Background noise suppression.
    pub noise_suppression: bool,
    /// Automatic gain control.
    pub auto_gain_control: bool,
}

/// Constraints handed to the platform when acquiring a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureConstraints {
    /// Open a camera.
    Video(VideoConstraints),
    /// Open a microphone.
    Audio(AudioConstraints),
}

impl CaptureConstraints {
    /// Device id requested by these constraints.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Video(v) => v.device_id.as_deref(),
            Self::Audio(a) => a.device_id.as_deref(),
        }
    }
}

/// Enumerated devices and the current selection per kind.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    config: MediaConfig,
    permission: PermissionState,
    audio_inputs: Vec<DeviceInfo>,
    video_inputs: Vec<DeviceInfo>,
    selected_audio: Option<String>,
    selected_video: Option<String>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new(config: MediaConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Record the result of the permission probe.
    pub fn set_permission(&mut self, granted: bool) -> Result<(), CoreError> {
        if granted {
            self.permission = PermissionState::Granted;
            Ok(())
        } else {
            self.permission = PermissionState::Denied;
            Err(CoreError::PermissionDenied { reason: "media device access".to_string() })
        }
    }

    /// Last known permission state.
    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    /// Replace the device lists with a fresh enumeration.
    ///
    /// Returns the kinds whose selection changed.
    pub fn apply_enumeration(&mut self, devices: Vec<DeviceInfo>) -> Vec<DeviceKind> {
        let (audio, video): (Vec<_>, Vec<_>) =
            devices.into_iter().partition(|d| d.kind == DeviceKind::AudioInput);

        self.audio_inputs = with_fallback_labels(audio);
        self.video_inputs = with_fallback_labels(video);

        let mut changed = Vec::new();
        for kind in [DeviceKind::AudioInput, DeviceKind::VideoInput] {
            let previous = self.selection(kind).map(str::to_string);
            let next = match previous {
                Some(id) if self.find(kind, &id).is_some() => Some(id),
                _ => self.devices(kind).first().map(|d| d.id.clone()),
            };
            if next.as_deref() != self.selection(kind) {
                info!(?kind, from = ?self.selection(kind), to = ?next, "device selection changed");
                *self.selection_mut(kind) = next;
                changed.push(kind);
            }
        }

        debug!(
            audio = self.audio_inputs.len(),
            video = self.video_inputs.len(),
            "devices enumerated"
        );
        changed
    }

    /// Select a device. Running captures are not affected.
    pub fn select(&mut self, kind: DeviceKind, device_id: &str) -> Result<(), CoreError> {
        if self.find(kind, device_id).is_none() {
            return Err(CoreError::invalid_state(format!("unknown {kind:?} device {device_id}")));
        }
        *self.selection_mut(kind) = Some(device_id.to_string());
        Ok(())
    }

    /// Devices of one kind, in platform order.
    pub fn devices(&self, kind: DeviceKind) -> &[DeviceInfo] {
        match kind {
            DeviceKind::AudioInput => &self.audio_inputs,
            DeviceKind::VideoInput => &self.video_inputs,
        }
    }

    /// Currently selected device of one kind.
    pub fn selected(&self, kind: DeviceKind) -> Option<&DeviceInfo> {
        self.selection(kind).and_then(|id| self.find(kind, id))
    }

    /// Capture constraints derived from the current selection.
    pub fn constraints(&self, kind: DeviceKind) -> CaptureConstraints {
        self.constraints_for(kind, self.selection(kind).map(str::to_string))
    }

    /// Capture constraints for an explicit device.
    pub fn constraints_for(&self, kind: DeviceKind, device_id: Option<String>) -> CaptureConstraints {
        match kind {
            DeviceKind::VideoInput => CaptureConstraints::Video(VideoConstraints {
                device_id,
                width: self.config.video_width,
                height: self.config.video_height,
                frame_rate: self.config.video_frame_rate,
            }),
            DeviceKind::AudioInput => CaptureConstraints::Audio(AudioConstraints {
                device_id,
                echo_cancellation: self.config.echo_cancellation,
                noise_suppression: self.config.noise_suppression,
                auto_gain_control: self.config.auto_gain_control,
            }),
        }
    }

    fn find(&self, kind: DeviceKind, id: &str) -> Option<&DeviceInfo> {
        self.devices(kind).iter().find(|d| d.id == id)
    }

    fn selection(&self, kind: DeviceKind) -> Option<&str> {
        match kind {
            DeviceKind::AudioInput => self.selected_audio.as_deref(),
            DeviceKind::VideoInput => self.selected_video.as_deref(),
        }
    }

    fn selection_mut(&mut self, kind: DeviceKind) -> &mut Option<String> {
        match kind {
            DeviceKind::AudioInput => &mut self.selected_audio,
            DeviceKind::VideoInput => &mut self.selected_video,
        }
    }
}

/// Label shown for a device at `index` (0-based) in its kind's list.
pub fn display_label(device: &DeviceInfo, index: usize) -> String {
    if device.label.trim().is_empty() {
        format!("{} {}", device.kind.fallback_label(), index + 1)
    } else {
        device.label.clone()
    }
}

fn with_fallback_labels(devices: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    devices
        .into_iter()
        .enumerate()
        .map(|(index, device)| DeviceInfo { label: display_label(&device, index), ..device })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn cam(id: &str, label: &str) -> DeviceInfo {
        DeviceInfo { id: id.into(), label: label.into(), kind: DeviceKind::VideoInput }
    }

    fn mic(id: &str) -> DeviceInfo {
        DeviceInfo { id: id.into(), label: String::new(), kind: DeviceKind::AudioInput }
    }

    #[test]
    fn first_enumeration_auto_selects() {
        let mut reg = DeviceRegistry::new(MediaConfig::default());
        let changed = reg.apply_enumeration(vec![cam("c1", "Front"), cam("c2", "Back"), mic("m1")]);

        assert_eq!(changed, vec![DeviceKind::AudioInput, DeviceKind::VideoInput]);
        assert_eq!(reg.selected(DeviceKind::VideoInput).unwrap().id, "c1");
        assert_eq!(reg.selected(DeviceKind::AudioInput).unwrap().id, "m1");
    }

    #[test]
    fn empty_labels_get_numbered_fallbacks() {
        let mut reg = DeviceRegistry::new(MediaConfig::default());
        reg.apply_enumeration(vec![mic("m1"), mic("m2"), cam("c1", "")]);

        let labels: Vec<_> =
            reg.devices(DeviceKind::AudioInput).iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["Microphone 1", "Microphone 2"]);
        assert_eq!(reg.devices(DeviceKind::VideoInput)[0].label, "Camera 1");
    }

    #[test]
    fn hot_plug_preserves_surviving_selection() {
        let mut reg = DeviceRegistry::new(MediaConfig::default());
        reg.apply_enumeration(vec![cam("c1", "Front"), cam("c2", "Back")]);
        reg.select(DeviceKind::VideoInput, "c2").unwrap();

        let changed = reg.apply_enumeration(vec![cam("c3", "USB"), cam("c2", "Back")]);
        assert!(changed.is_empty());
        assert_eq!(reg.selected(DeviceKind::VideoInput).unwrap().id, "c2");
    }

    #[test]
    fn hot_unplug_falls_back_to_first() {
        let mut reg = DeviceRegistry::new(MediaConfig::default());
        reg.apply_enumeration(vec![cam("c1", "Front"), cam("c2", "Back")]);
        reg.select(DeviceKind::VideoInput, "c2").unwrap();

        let changed = reg.apply_enumeration(vec![cam("c1", "Front")]);
        assert_eq!(changed, vec![DeviceKind::VideoInput]);
        assert_eq!(reg.selected(DeviceKind::VideoInput).unwrap().id, "c1");
    }

    #[test]
    fn selecting_unknown_device_fails() {
        let mut reg = DeviceRegistry::new(MediaConfig::default());
        reg.apply_enumeration(vec![cam("c1", "Front")]);

        assert!(reg.select(DeviceKind::VideoInput, "nope").is_err());
        assert!(reg.select(DeviceKind::AudioInput, "c1").is_err());
    }

    #[test]
    fn denied_permission_is_surfaced() {
        let mut reg = DeviceRegistry::new(MediaConfig::default());
        let err = reg.set_permission(false).unwrap_err();

        assert!(matches!(err, CoreError::PermissionDenied { .. }));
        assert_eq!(reg.permission(), PermissionState::Denied);
    }

    #[test]
    fn constraints_follow_selection() {
        let mut reg = DeviceRegistry::new(MediaConfig::default());
        reg.apply_enumeration(vec![cam("c1", "Front"), mic("m1")]);

        assert_eq!(
            reg.constraints(DeviceKind::VideoInput),
            CaptureConstraints::Video(VideoConstraints {
                device_id: Some("c1".into()),
                width: 1280,
                height: 720,
                frame_rate: 30,
            })
        );
        let CaptureConstraints::Audio(audio) = reg.constraints(DeviceKind::AudioInput) else {
            panic!("expected audio constraints");
        };
        assert!(audio.echo_cancellation && audio.noise_suppression && audio.auto_gain_control);
    }
}

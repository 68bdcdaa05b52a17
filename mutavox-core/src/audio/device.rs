//! Audio device enumeration and sample-rate probing.
//!
//! Hardware can be hot-plugged at any moment, so enumeration is recomputed on
//! every call — descriptors are snapshots, never cached across calls. Devices
//! are addressed by their enumeration index within a role (input list or
//! output list); an index is only meaningful against the latest report.

use serde::{Deserialize, Serialize};

/// Whether a device is being opened for capture or playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceRole {
    Input,
    Output,
}

/// Immutable snapshot of one audio device, copied out to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceDescriptor {
    /// Enumeration index within the device's role list.
    pub index: usize,
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Host API the device is exposed through (e.g. "WASAPI", "ALSA").
    pub host_api: String,
    /// Maximum capture channel count, 0 for pure outputs.
    pub max_input_channels: u16,
    /// Maximum playback channel count, 0 for pure inputs.
    pub max_output_channels: u16,
}

/// Device enumeration + support probing, behind a trait so the supervisor's
/// negotiation can run against scripted hardware in tests.
pub trait DeviceCatalog: Send {
    /// Enumerate available devices: ordered `(inputs, outputs)` lists.
    fn list_devices(&self) -> (Vec<AudioDeviceDescriptor>, Vec<AudioDeviceDescriptor>);

    /// Whether the device at `index` (within `role`'s list) supports `rate`.
    ///
    /// A probe failure is a boolean answer consumed by negotiation, never an
    /// error; probing has no side effects on the device.
    fn probe_sample_rate(&self, index: usize, rate: u32, role: DeviceRole) -> bool;
}

/// Production catalog over cpal's supported-config queries.
///
/// Stateless by design: every call talks to the host afresh.
#[cfg(feature = "audio-cpal")]
#[derive(Debug, Default)]
pub struct CpalDeviceCatalog;

#[cfg(feature = "audio-cpal")]
impl CpalDeviceCatalog {
    pub fn new() -> Self {
        Self
    }

    fn describe(
        device: &cpal::Device,
        index: usize,
        host_api: &str,
        fallback: &str,
    ) -> AudioDeviceDescriptor {
        use cpal::traits::DeviceTrait;

        let name = device
            .name()
            .unwrap_or_else(|_| format!("{fallback} {}", index + 1));
        let max_input_channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);
        let max_output_channels = device
            .supported_output_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);

        AudioDeviceDescriptor {
            index,
            name,
            host_api: host_api.to_string(),
            max_input_channels,
            max_output_channels,
        }
    }
}

#[cfg(feature = "audio-cpal")]
impl DeviceCatalog for CpalDeviceCatalog {
    fn list_devices(&self) -> (Vec<AudioDeviceDescriptor>, Vec<AudioDeviceDescriptor>) {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let host_api = host.id().name();

        let inputs = match host.input_devices() {
            Ok(devices) => devices
                .enumerate()
                .map(|(index, device)| Self::describe(&device, index, host_api, "Input Device"))
                .collect(),
            Err(e) => {
                tracing::warn!("failed to enumerate input devices: {e}");
                Vec::new()
            }
        };

        let outputs = match host.output_devices() {
            Ok(devices) => devices
                .enumerate()
                .map(|(index, device)| Self::describe(&device, index, host_api, "Output Device"))
                .collect(),
            Err(e) => {
                tracing::warn!("failed to enumerate output devices: {e}");
                Vec::new()
            }
        };

        (inputs, outputs)
    }

    fn probe_sample_rate(&self, index: usize, rate: u32, role: DeviceRole) -> bool {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let device = match role {
            DeviceRole::Input => host.input_devices().ok().and_then(|mut d| d.nth(index)),
            DeviceRole::Output => host.output_devices().ok().and_then(|mut d| d.nth(index)),
        };
        let Some(device) = device else {
            return false;
        };

        let rate = cpal::SampleRate(rate);
        match role {
            DeviceRole::Input => device
                .supported_input_configs()
                .map(|mut configs| configs.any(|c| c.try_with_sample_rate(rate).is_some()))
                .unwrap_or(false),
            DeviceRole::Output => device
                .supported_output_configs()
                .map(|mut configs| configs.any(|c| c.try_with_sample_rate(rate).is_some()))
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_serializes_with_camel_case_fields() {
        let descriptor = AudioDeviceDescriptor {
            index: 2,
            name: "USB Audio CODEC".into(),
            host_api: "WASAPI".into(),
            max_input_channels: 2,
            max_output_channels: 0,
        };

        let json = serde_json::to_value(&descriptor).expect("serialize descriptor");
        assert_eq!(json["index"], 2);
        assert_eq!(json["hostApi"], "WASAPI");
        assert_eq!(json["maxInputChannels"], 2);
        assert_eq!(json["maxOutputChannels"], 0);
    }

    #[test]
    fn device_role_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(DeviceRole::Input).expect("serialize role"),
            "input"
        );
        assert_eq!(
            serde_json::to_value(DeviceRole::Output).expect("serialize role"),
            "output"
        );
    }
}

//! Live audio settings shared between the control plane, the supervisor,
//! and the stream callbacks.
//!
//! Device/rate/chunk keys force a full stream rebuild when changed; gain and
//! pass-through keys are read per block and take effect immediately without
//! touching the stream. The split is encoded in [`keys::REBUILD`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Setting keys recognized by this subsystem. Keys outside this module are
/// ignored by the supervisor (they belong to other collaborators).
pub mod keys {
    pub const AUDIO_ENABLED: &str = "audioEnabled";
    pub const INPUT_DEVICE_ID: &str = "inputDeviceId";
    pub const OUTPUT_DEVICE_ID: &str = "outputDeviceId";
    pub const MONITOR_DEVICE_ID: &str = "monitorDeviceId";
    pub const CHUNK_SIZE: &str = "chunkSize";
    pub const SAMPLE_RATE: &str = "sampleRate";
    pub const INPUT_GAIN: &str = "inputGain";
    pub const OUTPUT_GAIN: &str = "outputGain";
    pub const MONITOR_GAIN: &str = "monitorGain";
    pub const PASS_THROUGH: &str = "passThrough";
    pub const EXCLUSIVE_MODE: &str = "exclusiveMode";

    /// Keys whose change tears down and rebuilds the active stream.
    pub const REBUILD: &[&str] = &[
        AUDIO_ENABLED,
        INPUT_DEVICE_ID,
        OUTPUT_DEVICE_ID,
        MONITOR_DEVICE_ID,
        CHUNK_SIZE,
        SAMPLE_RATE,
    ];
}

/// Engine-facing settings snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AudioSettings {
    /// Master switch for the streaming loop (Idle ↔ Negotiating).
    pub audio_enabled: bool,
    /// Input device index within the input enumeration, `None` = unselected.
    pub input_device_id: Option<usize>,
    /// Output device index within the output enumeration.
    pub output_device_id: Option<usize>,
    /// Optional monitor device index within the output enumeration.
    pub monitor_device_id: Option<usize>,
    /// Reference chunk size in 128-frame units at the 48 kHz reference rate.
    pub chunk_size: u32,
    /// Unified sample rate requested for every active role (Hz).
    pub sample_rate: u32,
    /// Linear gain applied to raw input before processing.
    pub input_gain: f32,
    /// Linear gain applied when writing the processed block to the output.
    pub output_gain: f32,
    /// Linear gain applied on the monitor leg.
    pub monitor_gain: f32,
    /// Bypass the conversion pipeline, echoing input to output.
    pub pass_through: bool,
    /// Host-API-specific exclusive-mode capability flag, forwarded opaquely
    /// to the audio backend. Backends without the concept ignore it.
    pub exclusive_mode: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            audio_enabled: false,
            input_device_id: None,
            output_device_id: None,
            monitor_device_id: None,
            chunk_size: 192,
            sample_rate: 48_000,
            input_gain: 1.0,
            output_gain: 1.0,
            monitor_gain: 1.0,
            pass_through: false,
            exclusive_mode: false,
        }
    }
}

impl AudioSettings {
    /// Clamp out-of-range values loaded from disk or pushed by a client.
    pub fn normalize(&mut self) {
        self.chunk_size = self.chunk_size.clamp(1, 2048);
        self.input_gain = self.input_gain.clamp(0.0, 10.0);
        self.output_gain = self.output_gain.clamp(0.0, 10.0);
        self.monitor_gain = self.monitor_gain.clamp(0.0, 10.0);
        if !SAMPLE_RATE_CANDIDATES.contains(&self.sample_rate) {
            self.sample_rate = 48_000;
        }
    }
}

/// Candidate rates enumerated when negotiation fails, and the set of rates a
/// client may request.
pub const SAMPLE_RATE_CANDIDATES: &[u32] = &[16_000, 32_000, 44_100, 48_000, 96_000, 192_000];

/// Shared, live-mutable settings. Callbacks take short read locks per block;
/// the control plane writes through [`SharedSettings::apply_value`].
#[derive(Debug, Clone, Default)]
pub struct SharedSettings(Arc<RwLock<AudioSettings>>);

impl SharedSettings {
    pub fn new(settings: AudioSettings) -> Self {
        Self(Arc::new(RwLock::new(settings)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, AudioSettings> {
        self.0.read()
    }

    pub fn snapshot(&self) -> AudioSettings {
        self.0.read().clone()
    }

    pub fn replace(&self, settings: AudioSettings) {
        *self.0.write() = settings;
    }

    /// Apply one `(key, value)` update coming from the control plane.
    ///
    /// Returns the previous value for the key, or `None` when the key is not
    /// recognized or the value has the wrong shape (the update is dropped).
    pub fn apply_value(&self, key: &str, value: &Value) -> Option<Value> {
        let mut settings = self.0.write();
        let old = match key {
            keys::AUDIO_ENABLED => {
                let new = value.as_bool()?;
                Some(Value::from(std::mem::replace(
                    &mut settings.audio_enabled,
                    new,
                )))
            }
            keys::INPUT_DEVICE_ID => replace_device_id(&mut settings.input_device_id, value),
            keys::OUTPUT_DEVICE_ID => replace_device_id(&mut settings.output_device_id, value),
            keys::MONITOR_DEVICE_ID => replace_device_id(&mut settings.monitor_device_id, value),
            keys::CHUNK_SIZE => {
                let new = u32::try_from(value.as_u64()?).ok()?;
                Some(Value::from(std::mem::replace(&mut settings.chunk_size, new)))
            }
            keys::SAMPLE_RATE => {
                let new = u32::try_from(value.as_u64()?).ok()?;
                Some(Value::from(std::mem::replace(
                    &mut settings.sample_rate,
                    new,
                )))
            }
            keys::INPUT_GAIN => {
                let new = value.as_f64()? as f32;
                Some(Value::from(std::mem::replace(&mut settings.input_gain, new)))
            }
            keys::OUTPUT_GAIN => {
                let new = value.as_f64()? as f32;
                Some(Value::from(std::mem::replace(
                    &mut settings.output_gain,
                    new,
                )))
            }
            keys::MONITOR_GAIN => {
                let new = value.as_f64()? as f32;
                Some(Value::from(std::mem::replace(
                    &mut settings.monitor_gain,
                    new,
                )))
            }
            keys::PASS_THROUGH => {
                let new = value.as_bool()?;
                Some(Value::from(std::mem::replace(
                    &mut settings.pass_through,
                    new,
                )))
            }
            keys::EXCLUSIVE_MODE => {
                let new = value.as_bool()?;
                Some(Value::from(std::mem::replace(
                    &mut settings.exclusive_mode,
                    new,
                )))
            }
            _ => None,
        };
        if old.is_some() {
            settings.normalize();
        }
        old
    }
}

fn replace_device_id(slot: &mut Option<usize>, value: &Value) -> Option<Value> {
    let new = if value.is_null() {
        None
    } else {
        Some(usize::try_from(value.as_u64()?).ok()?)
    };
    let old = std::mem::replace(slot, new);
    Some(old.map(Value::from).unwrap_or(Value::Null))
}

/// Load settings from a JSON file, falling back to defaults on any error.
pub fn load_settings(path: &Path) -> AudioSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AudioSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

/// Persist settings as pretty-printed JSON, creating parent directories.
pub fn save_settings(path: &Path, settings: &AudioSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

//! Telemetry and error events emitted by the audio path.
//!
//! One `TelemetryEvent` is produced per processed audio block (and per
//! supervisor-level fault). Events are ephemeral — the control plane renders
//! them, nothing persists them.

use serde::{Deserialize, Serialize};

use crate::audio::device::AudioDeviceDescriptor;

/// Per-stage processing latency in milliseconds:
/// `[preprocess, inference, postprocess]`.
pub type StageTimings = [f32; 3];

/// Timings reported when no block was processed (config faults, errors).
pub const ZERO_TIMINGS: StageTimings = [0.0, 0.0, 0.0];

/// Emitted once per processed audio block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the processed block in [0.0, 1.0].
    pub volume: f32,
    /// Stage latencies for this block, milliseconds.
    pub timings: StageTimings,
    /// Fault tag for this block, if any.
    pub error: Option<ErrorSignal>,
}

/// Closed fault taxonomy for the audio path.
///
/// `DeviceMissing`/`SampleRateMismatch` are configuration faults handled by
/// the supervisor (backoff + rebuild). `StreamRuntimeError` is a driver
/// fault, handled the same way. The remaining kinds are per-block faults:
/// the block degrades to silence and the stream keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    DeviceMissing,
    SampleRateMismatch,
    StreamRuntimeError,
    NoPipelineLoaded,
    PipelineNotInitialized,
    NoModelSelected,
    GenericAudioError,
    GenericError,
}

/// A tagged, human-readable fault paired with each telemetry emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSignal {
    pub kind: ErrorKind,
    pub message: String,
}

pub(crate) const MSG_DEVICE_MISSING: &str = "Input or output device is not selected.";
pub(crate) const MSG_GENERIC_AUDIO_ERROR: &str = "A server audio error occurred.";
pub(crate) const MSG_NO_PIPELINE_LOADED: &str =
    "Voice conversion pipeline is not loaded. Did you load a correct model?";

impl ErrorSignal {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn device_missing() -> Self {
        Self::new(ErrorKind::DeviceMissing, MSG_DEVICE_MISSING)
    }

    /// Sample-rate negotiation failure carrying the per-role supported
    /// subsets for diagnostic display.
    pub fn sample_rate_mismatch(input: &[u32], output: &[u32], monitor: &[u32]) -> Self {
        Self::new(
            ErrorKind::SampleRateMismatch,
            format!(
                "Specified sample rate is not supported by all selected audio devices.\n\
                 Available sample rates:\n  [Input]: {input:?}\n  [Output]: {output:?}\n  [Monitor]: {monitor:?}"
            ),
        )
    }

    pub fn stream_runtime(detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::StreamRuntimeError, detail.to_string())
    }

    pub fn generic_audio_error() -> Self {
        Self::new(ErrorKind::GenericAudioError, MSG_GENERIC_AUDIO_ERROR)
    }

    pub fn no_pipeline_loaded() -> Self {
        Self::new(ErrorKind::NoPipelineLoaded, MSG_NO_PIPELINE_LOADED)
    }
}

/// On-demand snapshot of available audio hardware, per role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    pub inputs: Vec<AudioDeviceDescriptor>,
    pub outputs: Vec<AudioDeviceDescriptor>,
}

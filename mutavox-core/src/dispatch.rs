//! Synchronous gateway from the audio callback into the conversion pipeline.
//!
//! `dispatch` is the last line of defense before the real-time callback: it
//! never panics past its boundary and always returns a well-formed block. A
//! failed block degrades to silence for that block only — individual blocks
//! are never retried, real-time audio cannot tolerate replay.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::error;

use crate::convert::{stub::rms, ConvertFault, ConverterHandle};
use crate::ipc::events::{ErrorKind, ErrorSignal, StageTimings, TelemetryEvent, ZERO_TIMINGS};
use crate::settings::SharedSettings;

/// Broadcast capacity: telemetry buffered for slow control-plane consumers.
const BROADCAST_CAP: usize = 256;

/// Outcome of one dispatch: always a usable block, possibly silence + fault.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub samples: Vec<f32>,
    pub volume: f32,
    pub timings: StageTimings,
    pub error: Option<ErrorSignal>,
}

impl DispatchResult {
    /// Single-sample silent block tagged with `signal`.
    fn silent(signal: ErrorSignal) -> Self {
        Self {
            samples: vec![0.0],
            volume: 0.0,
            timings: ZERO_TIMINGS,
            error: Some(signal),
        }
    }
}

/// Serializes every audio block into the shared conversion pipeline and
/// fans telemetry out to subscribers.
pub struct RequestDispatcher {
    settings: SharedSettings,
    converter: ConverterHandle,
    telemetry_tx: broadcast::Sender<TelemetryEvent>,
    seq: AtomicU64,
}

impl RequestDispatcher {
    pub fn new(settings: SharedSettings, converter: ConverterHandle) -> Self {
        let (telemetry_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            settings,
            converter,
            telemetry_tx,
            seq: AtomicU64::new(0),
        }
    }

    /// Subscribe to per-block telemetry.
    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.telemetry_tx.subscribe()
    }

    /// The converter slot this dispatcher serializes on. Model-loading code
    /// swaps through this same handle, which is what guarantees no block is
    /// processed against a half-swapped model.
    pub fn converter(&self) -> &ConverterHandle {
        &self.converter
    }

    /// Process one mono block.
    ///
    /// Holds the converter lock for the duration of the pipeline call; does
    /// not block beyond the pipeline's own processing time.
    pub fn dispatch(&self, frame: &[f32]) -> DispatchResult {
        if self.settings.read().pass_through {
            return DispatchResult {
                samples: frame.to_vec(),
                volume: rms(frame),
                timings: ZERO_TIMINGS,
                error: None,
            };
        }

        let mut guard = self.converter.lock();
        let Some(converter) = guard.as_mut() else {
            error!("voice conversion pipeline is not loaded");
            return DispatchResult::silent(ErrorSignal::no_pipeline_loaded());
        };

        match converter.process(frame) {
            Ok(block) => DispatchResult {
                samples: block.samples,
                volume: block.volume,
                timings: block.timings,
                error: None,
            },
            Err(fault) => {
                error!(fault = %fault, "pipeline fault — degrading block to silence");
                DispatchResult::silent(fault_signal(fault))
            }
        }
    }

    /// Broadcast one telemetry sample. Send failures (no subscribers) are
    /// ignored — telemetry is advisory.
    pub fn emit(&self, volume: f32, timings: StageTimings, error: Option<ErrorSignal>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.telemetry_tx.send(TelemetryEvent {
            seq,
            volume,
            timings,
            error,
        });
    }
}

fn fault_signal(fault: ConvertFault) -> ErrorSignal {
    match fault {
        ConvertFault::NotInitialized => {
            ErrorSignal::new(ErrorKind::PipelineNotInitialized, fault.to_string())
        }
        ConvertFault::NoModelSelected => {
            ErrorSignal::new(ErrorKind::NoModelSelected, fault.to_string())
        }
        ConvertFault::Internal(e) => ErrorSignal::new(ErrorKind::GenericError, format!("{e:#}")),
    }
}

impl crate::audio::EngineCallbacks for RequestDispatcher {
    fn on_request(&self, frame: &[f32]) -> DispatchResult {
        self.dispatch(frame)
    }

    fn emit_telemetry(&self, volume: f32, timings: StageTimings, error: Option<ErrorSignal>) {
        self.emit(volume, timings, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use serde_json::Value;

    use crate::convert::{ConvertedBlock, StubConverter, VoiceConverter};
    use crate::settings::{keys, SharedSettings};

    struct FaultingConverter {
        fault: fn() -> ConvertFault,
    }

    impl VoiceConverter for FaultingConverter {
        fn process(&mut self, _frame: &[f32]) -> std::result::Result<ConvertedBlock, ConvertFault> {
            Err((self.fault)())
        }
    }

    fn pass_through_settings() -> SharedSettings {
        let settings = SharedSettings::default();
        settings.apply_value(keys::PASS_THROUGH, &Value::Bool(true));
        settings
    }

    #[test]
    fn pass_through_echoes_frame_with_rms_volume() {
        let dispatcher = RequestDispatcher::new(pass_through_settings(), ConverterHandle::empty());
        let frame: Vec<f32> = (0..480)
            .map(|i| if i % 2 == 0 { 0.25 } else { -0.25 })
            .collect();

        let result = dispatcher.dispatch(&frame);
        assert_eq!(result.samples, frame);
        assert_relative_eq!(result.volume, 0.25, epsilon = 1e-5);
        assert_eq!(result.timings, ZERO_TIMINGS);
        assert!(result.error.is_none());
    }

    #[test]
    fn no_pipeline_yields_silent_block_and_signal() {
        let dispatcher = RequestDispatcher::new(SharedSettings::default(), ConverterHandle::empty());

        let result = dispatcher.dispatch(&[0.3; 480]);
        assert_eq!(result.samples, vec![0.0]);
        assert_eq!(result.volume, 0.0);
        assert_eq!(
            result.error.map(|e| e.kind),
            Some(ErrorKind::NoPipelineLoaded)
        );
    }

    #[test]
    fn loaded_stub_converter_processes_blocks() {
        let dispatcher = RequestDispatcher::new(
            SharedSettings::default(),
            ConverterHandle::with_converter(StubConverter::new()),
        );

        let frame = vec![0.5; 480];
        let result = dispatcher.dispatch(&frame);
        assert_eq!(result.samples, frame);
        assert_relative_eq!(result.volume, 0.5, epsilon = 1e-5);
        assert!(result.error.is_none());
    }

    #[test]
    fn pipeline_state_faults_map_to_their_error_kinds() {
        let cases: [(fn() -> ConvertFault, ErrorKind); 3] = [
            (
                || ConvertFault::NotInitialized,
                ErrorKind::PipelineNotInitialized,
            ),
            (|| ConvertFault::NoModelSelected, ErrorKind::NoModelSelected),
            (
                || ConvertFault::Internal(anyhow::anyhow!("weight tensor shape mismatch")),
                ErrorKind::GenericError,
            ),
        ];

        for (fault, expected_kind) in cases {
            let dispatcher = RequestDispatcher::new(
                SharedSettings::default(),
                ConverterHandle::with_converter(FaultingConverter { fault }),
            );
            let result = dispatcher.dispatch(&[0.1; 64]);
            assert_eq!(result.samples, vec![0.0]);
            assert_eq!(result.error.map(|e| e.kind), Some(expected_kind));
        }
    }

    #[test]
    fn emit_broadcasts_with_increasing_seq() {
        let dispatcher = RequestDispatcher::new(SharedSettings::default(), ConverterHandle::empty());
        let mut rx = dispatcher.subscribe_telemetry();

        dispatcher.emit(0.2, [1.0, 2.0, 3.0], None);
        dispatcher.emit(0.0, ZERO_TIMINGS, Some(ErrorSignal::generic_audio_error()));

        let first = rx.try_recv().expect("first event");
        let second = rx.try_recv().expect("second event");
        assert_eq!(first.seq, 0);
        assert!(first.error.is_none());
        assert_eq!(second.seq, 1);
        assert_eq!(
            second.error.map(|e| e.kind),
            Some(ErrorKind::GenericAudioError)
        );
    }
}

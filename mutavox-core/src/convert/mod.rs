//! Voice-conversion pipeline abstraction.
//!
//! The `VoiceConverter` trait is the sole boundary between this core and the
//! inference subsystem — the core is agnostic to what happens inside a
//! `process` call. Faults cross the boundary as a tagged result, never as a
//! panic: the audio callback consumes them without unwinding.
//!
//! `&mut self` on `process` expresses that converters are stateful (feature
//! caches, crossfade tails, hidden states). All mutation is serialised
//! through `ConverterHandle`'s `parking_lot::Mutex`, which is also the lock
//! model-swap operations must hold — no block is ever processed against a
//! half-swapped model.

pub mod stub;

pub use stub::StubConverter;

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::ipc::events::StageTimings;

/// One processed block plus the telemetry the pipeline measured for it.
#[derive(Debug, Clone)]
pub struct ConvertedBlock {
    /// Mono f32 samples in [-1.0, 1.0] at the stream rate.
    pub samples: Vec<f32>,
    /// RMS level of the processed block.
    pub volume: f32,
    /// Stage latencies in milliseconds.
    pub timings: StageTimings,
}

/// Closed fault set a converter may report per block.
#[derive(Debug, Error)]
pub enum ConvertFault {
    /// The pipeline exists but has not finished initializing.
    #[error("pipeline is not initialized")]
    NotInitialized,

    /// No model has been selected into the pipeline.
    #[error("no voice-conversion model is selected")]
    NoModelSelected,

    /// Anything else — carried for diagnostics, mapped to a generic fault.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Contract for voice-conversion backends.
pub trait VoiceConverter: Send + 'static {
    /// Convert one mono block. The output block length may differ from the
    /// input length (converters may buffer internally).
    fn process(&mut self, frame: &[f32]) -> std::result::Result<ConvertedBlock, ConvertFault>;
}

/// Process-wide exclusivity boundary around the loaded converter.
///
/// `None` means no pipeline is loaded. Dispatch holds the lock for the
/// duration of each `process` call; `swap` (model load/unload) holds the same
/// lock, so audio blocks stall for the bounded duration of a swap instead of
/// racing it.
#[derive(Clone, Default)]
pub struct ConverterHandle(Arc<Mutex<Option<Box<dyn VoiceConverter>>>>);

impl ConverterHandle {
    /// Create an empty handle (no pipeline loaded).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a handle with `converter` already loaded.
    pub fn with_converter<C: VoiceConverter>(converter: C) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(converter)))))
    }

    /// Replace the loaded converter, returning the previous one. Blocks
    /// until any in-flight `process` call finishes.
    pub fn swap(
        &self,
        converter: Option<Box<dyn VoiceConverter>>,
    ) -> Option<Box<dyn VoiceConverter>> {
        std::mem::replace(&mut *self.0.lock(), converter)
    }

    pub fn is_loaded(&self) -> bool {
        self.0.lock().is_some()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<Box<dyn VoiceConverter>>> {
        self.0.lock()
    }
}

impl std::fmt::Debug for ConverterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterHandle").finish_non_exhaustive()
    }
}

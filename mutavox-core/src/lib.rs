//! # mutavox-core
//!
//! Reusable real-time voice-conversion streaming engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! StreamSupervisor (own thread, reconfiguration loop)
//!     └─► DeviceCatalog (enumerate + probe) ──► StreamConfig
//!         └─► DuplexEngine (cpal input+output, optional monitor)
//!                 │ per block (RT callback thread)
//!                 ▼
//!         RequestDispatcher ──► VoiceConverter (external pipeline)
//!                 │                       │
//!          TelemetryEvent          MonitorRelay ─► monitor callback
//!          (broadcast)             (single slot, freshness wins)
//! ```
//!
//! The supervisor rebuilds the whole stream on every relevant settings
//! change; the dispatcher guarantees every callback gets a well-formed
//! (possibly silent) block no matter what the pipeline does.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod convert;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod ipc;
pub mod settings;
pub mod supervisor;

// Convenience re-exports for downstream crates
pub use audio::device::{AudioDeviceDescriptor, DeviceCatalog, DeviceRole};
pub use audio::monitor::MonitorRelay;
pub use audio::{EngineCallbacks, StreamBackend, StreamConfig, StreamSession};
pub use convert::{ConvertFault, ConvertedBlock, ConverterHandle, StubConverter, VoiceConverter};
pub use dispatch::{DispatchResult, RequestDispatcher};
pub use download::{AssetFetcher, AssetHashStore, FetchOutcome, FetchRequest};
pub use error::MutavoxError;
pub use ipc::events::{DeviceReport, ErrorKind, ErrorSignal, StageTimings, TelemetryEvent};
pub use settings::{AudioSettings, SharedSettings};
pub use supervisor::{StreamSupervisor, SupervisorHandle, SupervisorState, SupervisorTiming};

#[cfg(feature = "audio-cpal")]
pub use audio::device::CpalDeviceCatalog;
#[cfg(feature = "audio-cpal")]
pub use audio::DuplexEngine;

/// On-demand device report for the control plane. Enumeration is recomputed
/// on every call — hardware can change between calls.
pub fn device_report(catalog: &dyn DeviceCatalog) -> DeviceReport {
    let (inputs, outputs) = catalog.list_devices();
    DeviceReport { inputs, outputs }
}

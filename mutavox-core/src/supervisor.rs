//! `StreamSupervisor` — top-level control loop for the streaming engine.
//!
//! ## State machine
//!
//! ```text
//! Idle ──enabled──► Negotiating ──ok──► Streaming (blocking run_stream)
//!   ▲                   │ fail              │ stop-flag / error
//!   │                   ▼                   ▼
//!   └─────────────── Faulted ◄──────────────┘
//!                    (backoff, then re-evaluate from the top)
//! ```
//!
//! The loop never carries a stream object across a reconfiguration: every
//! cycle re-enumerates devices, re-negotiates the rate, and rebuilds the
//! stream from scratch — minor cold-start latency traded for correctness
//! under hot-swapped hardware. Reconfiguration is not latency-sensitive, so
//! coarse polling of the control flags is a deliberate choice; cadences live
//! in [`SupervisorTiming`] and only affect responsiveness, not behavior.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::audio::device::{DeviceCatalog, DeviceRole};
use crate::audio::monitor::MonitorRelay;
use crate::audio::{EngineCallbacks, StreamBackend, StreamConfig, StreamSession};
use crate::ipc::events::{ErrorSignal, ZERO_TIMINGS};
use crate::settings::{keys, AudioSettings, SharedSettings, SAMPLE_RATE_CANDIDATES};

/// Block sizes are configured in 128-frame units at a 48 kHz reference rate
/// and scaled linearly to the negotiated rate.
const REFERENCE_RATE: u32 = 48_000;
const FRAMES_PER_CHUNK_UNIT: u32 = 128;

/// Frames per callback for `chunk_size` reference units at `sample_rate`.
pub fn block_frame_size(chunk_size: u32, sample_rate: u32) -> u32 {
    ((chunk_size as f64 * FRAMES_PER_CHUNK_UNIT as f64 / REFERENCE_RATE as f64)
        * sample_rate as f64) as u32
}

/// Observable supervisor state, for the control plane and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SupervisorState {
    Idle,
    Negotiating,
    Streaming,
    Faulted,
}

/// Poll cadences and backoff (defaults: 1 s idle poll, 2 s fault backoff).
/// Tests shrink these to run at millisecond scale.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTiming {
    /// Sleep between control-flag checks while Idle.
    pub idle_poll: Duration,
    /// Sleep after entering Faulted, before re-negotiating.
    pub fault_backoff: Duration,
    /// How often the blocking stream loop re-checks its stop flag.
    pub stream_poll: Duration,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_secs(1),
            fault_backoff: Duration::from_secs(2),
            stream_poll: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Default)]
struct SupervisorControl {
    /// Mirrors the `audioEnabled` setting (Idle ↔ Negotiating).
    enabled: AtomicBool,
    /// Ends the process-lifetime loop. Only set by `shutdown()`.
    shutdown: AtomicBool,
}

/// Why negotiation could not produce a [`StreamConfig`].
#[derive(Debug, PartialEq, Eq)]
enum NegotiationFailure {
    DeviceMissing,
    SampleRateMismatch {
        input: Vec<u32>,
        output: Vec<u32>,
        monitor: Vec<u32>,
    },
}

impl NegotiationFailure {
    fn to_signal(&self) -> ErrorSignal {
        match self {
            Self::DeviceMissing => ErrorSignal::device_missing(),
            Self::SampleRateMismatch {
                input,
                output,
                monitor,
            } => ErrorSignal::sample_rate_mismatch(input, output, monitor),
        }
    }
}

/// Resolve devices and force one unified sample rate across every role.
///
/// The configured rate is validated per role; on any failure the full
/// candidate table is enumerated so the diagnostic reports what each device
/// actually supports. No alternative rate is ever picked silently.
fn negotiate(
    catalog: &dyn DeviceCatalog,
    settings: &AudioSettings,
) -> std::result::Result<StreamConfig, NegotiationFailure> {
    let (inputs, outputs) = catalog.list_devices();

    let input = settings
        .input_device_id
        .and_then(|id| inputs.iter().find(|d| d.index == id))
        .cloned();
    let output = settings
        .output_device_id
        .and_then(|id| outputs.iter().find(|d| d.index == id))
        .cloned();
    let (Some(input), Some(output)) = (input, output) else {
        return Err(NegotiationFailure::DeviceMissing);
    };

    // An unresolved monitor is not a fault — the stream runs without one.
    let monitor = settings
        .monitor_device_id
        .and_then(|id| outputs.iter().find(|d| d.index == id))
        .cloned();

    let rate = settings.sample_rate;
    let input_ok = catalog.probe_sample_rate(input.index, rate, DeviceRole::Input);
    let output_ok = catalog.probe_sample_rate(output.index, rate, DeviceRole::Output);
    let monitor_ok = monitor
        .as_ref()
        .map(|m| catalog.probe_sample_rate(m.index, rate, DeviceRole::Output))
        .unwrap_or(true);

    if !(input_ok && output_ok && monitor_ok) {
        let mut input_rates = Vec::new();
        let mut output_rates = Vec::new();
        let mut monitor_rates = Vec::new();
        for &candidate in SAMPLE_RATE_CANDIDATES {
            if catalog.probe_sample_rate(input.index, candidate, DeviceRole::Input) {
                input_rates.push(candidate);
            }
            if catalog.probe_sample_rate(output.index, candidate, DeviceRole::Output) {
                output_rates.push(candidate);
            }
            if let Some(m) = &monitor {
                if catalog.probe_sample_rate(m.index, candidate, DeviceRole::Output) {
                    monitor_rates.push(candidate);
                }
            }
        }
        return Err(NegotiationFailure::SampleRateMismatch {
            input: input_rates,
            output: output_rates,
            monitor: monitor_rates,
        });
    }

    Ok(StreamConfig {
        block_frame: block_frame_size(settings.chunk_size, rate),
        input,
        output,
        monitor,
        sample_rate: rate,
        exclusive_mode: settings.exclusive_mode,
    })
}

/// Owns the reconfiguration loop. Construct, take a [`SupervisorHandle`],
/// then `spawn()` (or `run()` on a dedicated thread).
pub struct StreamSupervisor {
    catalog: Box<dyn DeviceCatalog>,
    backend: Box<dyn StreamBackend>,
    settings: SharedSettings,
    callbacks: Arc<dyn EngineCallbacks>,
    relay: Arc<MonitorRelay>,
    control: Arc<SupervisorControl>,
    stream_run: Arc<AtomicBool>,
    state: Arc<Mutex<SupervisorState>>,
    timing: SupervisorTiming,
}

impl StreamSupervisor {
    pub fn new(
        catalog: Box<dyn DeviceCatalog>,
        backend: Box<dyn StreamBackend>,
        settings: SharedSettings,
        callbacks: Arc<dyn EngineCallbacks>,
    ) -> Self {
        let control = Arc::new(SupervisorControl::default());
        control
            .enabled
            .store(settings.read().audio_enabled, Ordering::Release);

        Self {
            catalog,
            backend,
            settings,
            callbacks,
            relay: Arc::new(MonitorRelay::new()),
            control,
            stream_run: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SupervisorState::Idle)),
            timing: SupervisorTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: SupervisorTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Control handle usable from any thread.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            control: Arc::clone(&self.control),
            stream_run: Arc::clone(&self.stream_run),
            state: Arc::clone(&self.state),
        }
    }

    /// Run the loop on a background thread. The returned handle controls it;
    /// call `shutdown()` then join for a clean exit.
    pub fn spawn(self) -> crate::error::Result<(SupervisorHandle, thread::JoinHandle<()>)> {
        let handle = self.handle();
        let join = thread::Builder::new()
            .name("mutavox-supervisor".into())
            .spawn(move || self.run())?;
        Ok((handle, join))
    }

    /// Blocking process-lifetime loop. Returns only after `shutdown()`.
    pub fn run(mut self) {
        info!("stream supervisor started");

        loop {
            if self.control.shutdown.load(Ordering::Acquire) {
                break;
            }
            if !self.control.enabled.load(Ordering::Acquire) {
                self.set_state(SupervisorState::Idle);
                thread::sleep(self.timing.idle_poll);
                continue;
            }

            self.set_state(SupervisorState::Negotiating);
            let snapshot = self.settings.snapshot();
            let config = match negotiate(self.catalog.as_ref(), &snapshot) {
                Ok(config) => config,
                Err(failure) => {
                    let signal = failure.to_signal();
                    error!(kind = ?signal.kind, "negotiation failed: {}", signal.message);
                    self.callbacks
                        .emit_telemetry(0.0, ZERO_TIMINGS, Some(signal));
                    self.fault_backoff();
                    continue;
                }
            };

            info!(
                input = config.input.name.as_str(),
                output = config.output.name.as_str(),
                monitor = config.monitor.as_ref().map(|d| d.name.as_str()),
                sample_rate = config.sample_rate,
                block_frame = config.block_frame,
                "stream negotiated"
            );

            self.stream_run.store(true, Ordering::Release);
            self.set_state(SupervisorState::Streaming);

            let session = StreamSession {
                callbacks: Arc::clone(&self.callbacks),
                settings: self.settings.clone(),
                relay: Arc::clone(&self.relay),
                stream_run: Arc::clone(&self.stream_run),
                poll_interval: self.timing.stream_poll,
            };

            // Blocks for the entire Streaming state.
            if let Err(e) = self.backend.run_stream(&config, &session) {
                error!("stream runtime error: {e}");
                self.callbacks.emit_telemetry(
                    0.0,
                    ZERO_TIMINGS,
                    Some(ErrorSignal::stream_runtime(&e)),
                );
                self.fault_backoff();
            }
            // Clean return: a settings change cleared the run flag. The loop
            // re-evaluates the enabled flag and re-negotiates from scratch.
        }

        self.set_state(SupervisorState::Idle);
        info!("stream supervisor stopped");
    }

    fn fault_backoff(&self) {
        self.set_state(SupervisorState::Faulted);
        thread::sleep(self.timing.fault_backoff);
        // Configuration is always re-evaluated after backoff, never assumed
        // stale — the loop restarts from the flag checks.
    }

    fn set_state(&self, state: SupervisorState) {
        *self.state.lock() = state;
    }
}

/// Cross-thread control surface for a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    control: Arc<SupervisorControl>,
    stream_run: Arc<AtomicBool>,
    state: Arc<Mutex<SupervisorState>>,
}

impl SupervisorHandle {
    /// Settings-change notification from the control plane.
    ///
    /// `audioEnabled` toggles the loop between Idle and Negotiating; any
    /// rebuild key signals the active stream to stop so the next cycle picks
    /// up the new configuration. Keys outside this subsystem are ignored.
    pub fn update_setting(&self, key: &str, new_value: &Value, _old_value: &Value) {
        if key == keys::AUDIO_ENABLED {
            self.control
                .enabled
                .store(new_value.as_bool().unwrap_or(false), Ordering::Release);
        }
        if keys::REBUILD.contains(&key) {
            self.stream_run.store(false, Ordering::Release);
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    /// End the process-lifetime loop (also stops any active stream).
    pub fn shutdown(&self) {
        self.control.shutdown.store(true, Ordering::Release);
        self.stream_run.store(false, Ordering::Release);
    }
}

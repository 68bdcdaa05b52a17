//! Full-duplex audio streaming via the cpal backend.
//!
//! # Design constraints
//!
//! cpal exposes no combined duplex stream, so the engine pairs one input and
//! one output stream at the same negotiated rate and block size and hands
//! processed blocks from the input callback to the output callback through a
//! lock-free SPSC ring. The input callback is the primary processing path:
//! it runs gain staging, downmix, the pipeline dispatch, and telemetry for
//! every block — the pipeline call is synchronous there, which is what
//! serializes all audio through the shared converter lock. The output and
//! monitor callbacks only copy buffers and must stay allocation-light.
//!
//! Every callback produces a deterministic buffer no matter what fails
//! upstream: ring underruns and missing monitor frames degrade to silence,
//! never to an unfilled buffer.
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). All streams are therefore built, played, and dropped inside
//! `run_stream`, on the supervisor thread that blocks for the stream's
//! lifetime. Stop is cooperative: the supervisor clears the session's run
//! flag and `run_stream` returns after closing the device handles.
//!
//! Streams are opened in f32 (the processing path's native format); a device
//! that cannot open f32 at the negotiated rate surfaces as a stream error
//! and is handled by the supervisor's fault path.

pub mod device;
pub mod monitor;

use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

#[cfg(feature = "audio-cpal")]
use std::sync::atomic::Ordering;

use crate::dispatch::DispatchResult;
use crate::error::Result;
use crate::ipc::events::{ErrorSignal, StageTimings};
use crate::settings::SharedSettings;
use monitor::MonitorRelay;

#[cfg(feature = "audio-cpal")]
use crate::error::MutavoxError;
#[cfg(feature = "audio-cpal")]
use crate::ipc::events::ZERO_TIMINGS;
#[cfg(feature = "audio-cpal")]
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
#[cfg(feature = "audio-cpal")]
use parking_lot::Mutex;
#[cfg(feature = "audio-cpal")]
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};
#[cfg(feature = "audio-cpal")]
use tracing::{debug, error, info, warn};

use device::AudioDeviceDescriptor;

/// Everything needed to open one duplex (plus optional monitor) stream.
///
/// Invariant: input, output, and monitor all run at `sample_rate` — the
/// design rejects independent per-endpoint rates to keep cross-rate
/// resampling artifacts out of the processing path.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub input: AudioDeviceDescriptor,
    pub output: AudioDeviceDescriptor,
    pub monitor: Option<AudioDeviceDescriptor>,
    /// Unified sample rate for every role (Hz).
    pub sample_rate: u32,
    /// Frames delivered per callback invocation.
    pub block_frame: u32,
    /// Opaque exclusive-mode capability flag (see settings).
    pub exclusive_mode: bool,
}

/// The explicit callback pair the engine requires from its host: one
/// processing entry point and one telemetry sink.
pub trait EngineCallbacks: Send + Sync + 'static {
    /// Process one mono block; must never panic and always return a
    /// well-formed (possibly silent) block.
    fn on_request(&self, frame: &[f32]) -> DispatchResult;

    /// Report one telemetry sample to whoever is listening.
    fn emit_telemetry(&self, volume: f32, timings: StageTimings, error: Option<ErrorSignal>);
}

/// Shared context for one streaming cycle, owned by the supervisor.
#[derive(Clone)]
pub struct StreamSession {
    pub callbacks: Arc<dyn EngineCallbacks>,
    pub settings: SharedSettings,
    pub relay: Arc<MonitorRelay>,
    /// Cleared by the supervisor to request a cooperative stop.
    pub stream_run: Arc<AtomicBool>,
    /// How often the blocking run loop re-checks `stream_run`.
    pub poll_interval: Duration,
}

/// Seam between the supervisor and the audio driver, so reconfiguration
/// logic can be exercised against a scripted backend in tests.
pub trait StreamBackend: Send {
    /// Open the streams described by `config`, block until the session's run
    /// flag clears, and release all device handles before returning.
    fn run_stream(&mut self, config: &StreamConfig, session: &StreamSession) -> Result<()>;
}

/// Downmix interleaved input to mono with input gain applied.
pub(crate) fn downmix_into(data: &[f32], channels: usize, gain: f32, mono: &mut Vec<f32>) {
    let channels = channels.max(1);
    let frames = data.len() / channels;
    mono.clear();
    mono.reserve(frames);
    for frame in data.chunks_exact(channels) {
        let sum: f32 = frame.iter().sum();
        mono.push(sum / channels as f32 * gain);
    }
}

/// Replicate a mono frame across `channels` with gain, zero-filling any
/// remainder of `out` the frame does not cover.
pub(crate) fn replicate_into(frame: &[f32], channels: usize, gain: f32, out: &mut [f32]) {
    let channels = channels.max(1);
    let frames = out.len() / channels;
    for (i, slot) in out.chunks_exact_mut(channels).enumerate() {
        let value = if i < frame.len() { frame[i] * gain } else { 0.0 };
        slot.fill(value);
    }
    // Trailing partial frame, if the buffer is not channel-aligned.
    let aligned = frames * channels;
    out[aligned..].fill(0.0);
}

/// cpal implementation of [`StreamBackend`].
///
/// Stateless: streams live only inside `run_stream`, so every cycle starts
/// from freshly opened device handles.
#[cfg(feature = "audio-cpal")]
#[derive(Debug, Default)]
pub struct DuplexEngine;

#[cfg(feature = "audio-cpal")]
impl DuplexEngine {
    pub fn new() -> Self {
        Self
    }

    fn resolve_device(
        host: &cpal::Host,
        descriptor: &AudioDeviceDescriptor,
        role: device::DeviceRole,
    ) -> Result<cpal::Device> {
        let found = match role {
            device::DeviceRole::Input => host
                .input_devices()
                .map_err(|e| MutavoxError::AudioDevice(e.to_string()))?
                .nth(descriptor.index),
            device::DeviceRole::Output => host
                .output_devices()
                .map_err(|e| MutavoxError::AudioDevice(e.to_string()))?
                .nth(descriptor.index),
        };
        found.ok_or_else(|| {
            MutavoxError::AudioDevice(format!(
                "device '{}' (index {}) disappeared before the stream opened",
                descriptor.name, descriptor.index
            ))
        })
    }

    fn stream_config(channels: u16, sample_rate: u32, block_frame: u32) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(block_frame),
        }
    }
}

#[cfg(feature = "audio-cpal")]
impl StreamBackend for DuplexEngine {
    fn run_stream(&mut self, config: &StreamConfig, session: &StreamSession) -> Result<()> {
        let host = cpal::default_host();

        if config.exclusive_mode {
            debug!("exclusive mode requested — cpal backend has no equivalent, ignoring");
        }

        let input_device = Self::resolve_device(&host, &config.input, device::DeviceRole::Input)?;
        let output_device =
            Self::resolve_device(&host, &config.output, device::DeviceRole::Output)?;

        let in_channels = config.input.max_input_channels.max(1);
        let out_channels = config.output.max_output_channels.max(1);

        info!(
            input = config.input.name.as_str(),
            output = config.output.name.as_str(),
            monitor = config.monitor.as_ref().map(|d| d.name.as_str()),
            sample_rate = config.sample_rate,
            block_frame = config.block_frame,
            "opening duplex stream"
        );

        // Ring sized for several blocks of interleaved output so a slow
        // output callback does not immediately drop processed audio.
        let ring_capacity =
            (config.block_frame as usize * out_channels as usize * 8).next_power_of_two();
        let (mut out_producer, mut out_consumer) = HeapRb::<f32>::new(ring_capacity).split();

        // Last observed stage timings, reported alongside driver errors.
        let last_timings: Arc<Mutex<StageTimings>> = Arc::new(Mutex::new(ZERO_TIMINGS));

        let err_fn = |callbacks: Arc<dyn EngineCallbacks>,
                      last_timings: Arc<Mutex<StageTimings>>,
                      leg: &'static str| {
            move |err: cpal::StreamError| {
                error!("audio stream error on {leg} leg: {err}");
                callbacks.emit_telemetry(
                    0.0,
                    *last_timings.lock(),
                    Some(ErrorSignal::generic_audio_error()),
                );
            }
        };

        // ── Primary (processing) callback ────────────────────────────────
        let input_stream = {
            let callbacks = Arc::clone(&session.callbacks);
            let settings = session.settings.clone();
            let relay = config.monitor.is_some().then(|| Arc::clone(&session.relay));
            let last_timings = Arc::clone(&last_timings);
            let channels = in_channels as usize;
            let out_ch = out_channels as usize;
            let mut mono: Vec<f32> = Vec::new();
            let mut interleaved: Vec<f32> = Vec::new();

            input_device
                .build_input_stream(
                    &Self::stream_config(in_channels, config.sample_rate, config.block_frame),
                    move |data: &[f32], _info| {
                        let (input_gain, output_gain) = {
                            let s = settings.read();
                            (s.input_gain, s.output_gain)
                        };
                        downmix_into(data, channels, input_gain, &mut mono);

                        let result = callbacks.on_request(&mono);
                        *last_timings.lock() = result.timings;
                        callbacks.emit_telemetry(result.volume, result.timings, result.error);

                        if let Some(relay) = &relay {
                            relay.push(result.samples.clone());
                        }

                        interleaved.clear();
                        interleaved.reserve(result.samples.len() * out_ch);
                        for &sample in &result.samples {
                            let value = sample * output_gain;
                            for _ in 0..out_ch {
                                interleaved.push(value);
                            }
                        }
                        let written = out_producer.push_slice(&interleaved);
                        if written < interleaved.len() {
                            warn!(
                                "output ring full: dropped {} samples",
                                interleaved.len() - written
                            );
                        }
                    },
                    err_fn(
                        Arc::clone(&session.callbacks),
                        Arc::clone(&last_timings),
                        "input",
                    ),
                    None,
                )
                .map_err(|e| MutavoxError::AudioStream(e.to_string()))?
        };

        // ── Output callback: drain the ring, silence on underrun ─────────
        let output_stream = output_device
            .build_output_stream(
                &Self::stream_config(out_channels, config.sample_rate, config.block_frame),
                move |data: &mut [f32], _info| {
                    let filled = out_consumer.pop_slice(data);
                    data[filled..].fill(0.0);
                },
                err_fn(
                    Arc::clone(&session.callbacks),
                    Arc::clone(&last_timings),
                    "output",
                ),
                None,
            )
            .map_err(|e| MutavoxError::AudioStream(e.to_string()))?;

        // ── Monitor callback: independently clocked, drains the relay ────
        let monitor_stream = match &config.monitor {
            Some(descriptor) => {
                let monitor_device =
                    Self::resolve_device(&host, descriptor, device::DeviceRole::Output)?;
                let mon_channels = descriptor.max_output_channels.max(1);
                let channels = mon_channels as usize;
                let relay = Arc::clone(&session.relay);
                let settings = session.settings.clone();

                let stream = monitor_device
                    .build_output_stream(
                        &Self::stream_config(mon_channels, config.sample_rate, config.block_frame),
                        move |data: &mut [f32], _info| {
                            let monitor_gain = settings.read().monitor_gain;
                            match relay.take() {
                                Some(frame) => {
                                    replicate_into(&frame, channels, monitor_gain, data)
                                }
                                None => data.fill(0.0),
                            }
                        },
                        err_fn(
                            Arc::clone(&session.callbacks),
                            Arc::clone(&last_timings),
                            "monitor",
                        ),
                        None,
                    )
                    .map_err(|e| MutavoxError::AudioStream(e.to_string()))?;
                Some(stream)
            }
            None => None,
        };

        input_stream
            .play()
            .map_err(|e| MutavoxError::AudioStream(e.to_string()))?;
        output_stream
            .play()
            .map_err(|e| MutavoxError::AudioStream(e.to_string()))?;
        if let Some(stream) = &monitor_stream {
            stream
                .play()
                .map_err(|e| MutavoxError::AudioStream(e.to_string()))?;
        }

        while session.stream_run.load(Ordering::Acquire) {
            std::thread::sleep(session.poll_interval);
        }

        // Streams drop here, releasing the device handles on this thread.
        drop(monitor_stream);
        drop(output_stream);
        drop(input_stream);
        info!("duplex stream closed");
        Ok(())
    }
}

//! `StubConverter` — placeholder backend that echoes audio without a model.
//!
//! Used during development and in the convert-file utility so the full
//! engine path (gain staging, dispatch, telemetry, monitor relay) can be
//! exercised end-to-end before a real pipeline is wired in.

use std::time::Instant;

use tracing::debug;

use crate::convert::{ConvertFault, ConvertedBlock, VoiceConverter};

/// Echo-style stub converter: output == input, real measured timings.
pub struct StubConverter {
    blocks_processed: u64,
}

impl StubConverter {
    pub fn new() -> Self {
        Self {
            blocks_processed: 0,
        }
    }
}

impl Default for StubConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceConverter for StubConverter {
    fn process(&mut self, frame: &[f32]) -> std::result::Result<ConvertedBlock, ConvertFault> {
        let started = Instant::now();
        let samples = frame.to_vec();
        let volume = rms(&samples);
        let elapsed_ms = started.elapsed().as_secs_f32() * 1000.0;

        self.blocks_processed += 1;
        if self.blocks_processed % 500 == 0 {
            debug!(blocks = self.blocks_processed, "stub converter heartbeat");
        }

        Ok(ConvertedBlock {
            samples,
            volume,
            timings: [0.0, elapsed_ms, 0.0],
        })
    }
}

/// Root-mean-square of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_input_and_reports_its_rms() {
        let mut converter = StubConverter::new();
        let frame: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();

        let block = converter.process(&frame).expect("stub never faults");
        assert_eq!(block.samples, frame);
        // RMS of a ±0.5 square wave is 0.5.
        assert!((block.volume - 0.5).abs() < 1e-5, "volume={}", block.volume);
    }

    #[test]
    fn rms_of_empty_slice_is_zero() {
        assert_eq!(rms(&[]), 0.0);
    }
}

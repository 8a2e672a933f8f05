//! Energy-based voice activity detection.
//!
//! RMS thresholding over one frame at a time. This is the fallback
//! detector real deployments keep behind a model-driven VAD; it is fully
//! deterministic and needs no model files.

use crate::buffer::AudioFrame;
use crate::stages::{Detector, StageResult};

/// Configuration for [`EnergyVad`].
#[derive(Debug, Clone, Copy)]
pub struct EnergyVadConfig {
    /// RMS threshold for detecting speech (0.0 to 1.0).
    pub speech_threshold: f32,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.02,
        }
    }
}

/// RMS-threshold voice activity detector.
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    /// Creates a detector with the given configuration.
    pub fn new(config: EnergyVadConfig) -> Self {
        Self {
            threshold: config.speech_threshold,
        }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(EnergyVadConfig::default())
    }
}

impl Detector for EnergyVad {
    fn evaluate(&mut self, frame: &AudioFrame) -> StageResult {
        let level = calculate_rms(&frame.samples);
        if level > self.threshold {
            StageResult::Detected {
                confidence: level.min(1.0),
                label: "speech".to_string(),
            }
        } else {
            StageResult::NotDetected
        }
    }
}

/// Root-mean-square level of PCM samples, normalized to 0.0..=1.0.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = f64::from(s) / f64::from(i16::MAX);
            normalized * normalized
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

//! Placeholder speech synthesis.
//!
//! Renders a fixed tone whose duration tracks the text length (100 ms per
//! character), which is enough to exercise the SPEAKING stage end to end.
//! Real deployments substitute a model-backed [`Synthesizer`].

use crate::defaults;
use crate::stages::{FailureReason, Synthesizer};
use std::f32::consts::TAU;

/// Tone frequency in Hz.
const TONE_HZ: f32 = 440.0;
/// Peak amplitude as a fraction of full scale.
const AMPLITUDE: f32 = 0.2;
/// Synthesis duration per character, in milliseconds.
const MS_PER_CHAR: u64 = 100;

/// Tone generator standing in for a real TTS engine.
pub struct ToneSynthesizer {
    sample_rate: u32,
}

impl ToneSynthesizer {
    /// Creates a synthesizer producing PCM at the given rate.
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self::new(defaults::SAMPLE_RATE)
    }
}

impl Synthesizer for ToneSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<Vec<i16>, FailureReason> {
        if text.trim().is_empty() {
            return Err(FailureReason::EmptyInput);
        }
        let duration_ms = text.chars().count() as u64 * MS_PER_CHAR;
        let total_samples = (u64::from(self.sample_rate) * duration_ms / 1_000) as usize;
        let samples = (0..total_samples)
            .map(|i| {
                let t = i as f32 / self.sample_rate as f32;
                let value = (TAU * TONE_HZ * t).sin() * AMPLITUDE;
                (value * f32::from(i16::MAX)) as i16
            })
            .collect();
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_tracks_text_length() {
        let mut tts = ToneSynthesizer::new(16_000);
        let short = tts.synthesize("hi").unwrap();
        let long = tts.synthesize("hello there").unwrap();
        // 100 ms per char at 16 kHz = 1600 samples per char.
        assert_eq!(short.len(), 2 * 1600);
        assert_eq!(long.len(), 11 * 1600);
    }

    #[test]
    fn test_output_is_not_silent() {
        let mut tts = ToneSynthesizer::default();
        let samples = tts.synthesize("ok").unwrap();
        assert!(samples.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_empty_text_fails() {
        let mut tts = ToneSynthesizer::default();
        assert_eq!(tts.synthesize("   "), Err(FailureReason::EmptyInput));
    }
}

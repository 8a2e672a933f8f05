//! Pipeline configuration with TOML loading and construction-time validation.

use crate::defaults;
use crate::error::{Result, VoxpipeError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Root configuration structure for a pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub audio: AudioConfig,
    pub wake: WakeConfig,
    pub endpoint: EndpointConfig,
    pub stage: StageConfig,
}

/// Audio framing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz, agreed with all stages.
    pub sample_rate: u32,
    /// Nominal frame duration in milliseconds.
    pub frame_duration_ms: u32,
    /// Buffer cap in frames; the oldest samples beyond it are dropped.
    pub buffer_capacity_frames: usize,
}

/// Wake-word gating configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WakeConfig {
    /// Minimum keyword confidence that triggers a wake (0.0 to 1.0].
    pub confidence_threshold: f32,
}

/// End-of-utterance configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Sustained silence that ends an utterance, in milliseconds.
    pub silence_duration_ms: u32,
    /// Hard cap on utterance duration, in milliseconds.
    pub max_utterance_ms: u32,
}

/// Stage invocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageConfig {
    /// Per-call timeout for a single stage invocation, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_duration_ms: defaults::FRAME_DURATION_MS,
            buffer_capacity_frames: defaults::BUFFER_CAPACITY_FRAMES,
        }
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: defaults::WAKE_CONFIDENCE_THRESHOLD,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            silence_duration_ms: defaults::ENDPOINT_SILENCE_MS,
            max_utterance_ms: defaults::MAX_UTTERANCE_MS,
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::STAGE_TIMEOUT_MS,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    ///
    /// Missing fields use default values; invalid TOML is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Load configuration from a file, or return defaults if the file is
    /// missing. Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Validates the configuration. Called once when the controller is
    /// constructed; an invalid configuration prevents the pipeline from
    /// starting at all.
    pub fn validate(&self) -> Result<()> {
        if !defaults::SUPPORTED_SAMPLE_RATES.contains(&self.audio.sample_rate) {
            return Err(invalid(
                "audio.sample_rate",
                format!("unsupported rate {}", self.audio.sample_rate),
            ));
        }
        if self.audio.frame_duration_ms == 0 || self.audio.frame_duration_ms > 1_000 {
            return Err(invalid(
                "audio.frame_duration_ms",
                format!("must be 1..=1000, got {}", self.audio.frame_duration_ms),
            ));
        }
        if self.audio.buffer_capacity_frames == 0 {
            return Err(invalid("audio.buffer_capacity_frames", "must be at least 1"));
        }
        if self.wake.confidence_threshold <= 0.0 || self.wake.confidence_threshold > 1.0 {
            return Err(invalid(
                "wake.confidence_threshold",
                format!("must be in (0.0, 1.0], got {}", self.wake.confidence_threshold),
            ));
        }
        if self.endpoint.silence_duration_ms == 0 {
            return Err(invalid("endpoint.silence_duration_ms", "must be at least 1"));
        }
        if self.endpoint.max_utterance_ms < self.audio.frame_duration_ms {
            return Err(invalid(
                "endpoint.max_utterance_ms",
                "must cover at least one frame",
            ));
        }
        if self.stage.timeout_ms == 0 {
            return Err(invalid("stage.timeout_ms", "must be at least 1"));
        }
        Ok(())
    }

    /// Number of samples in one frame at the configured rate and duration.
    pub fn frame_samples(&self) -> usize {
        (self.audio.sample_rate as u64 * self.audio.frame_duration_ms as u64 / 1_000) as usize
    }
}

fn invalid(key: &str, message: impl Into<String>) -> VoxpipeError {
    VoxpipeError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

//! Default values shared across configuration and the pipeline.

/// Audio sample rate in Hz (mono PCM).
pub const SAMPLE_RATE: u32 = 16_000;

/// Sample rates the buffer and stages agree to work with.
pub const SUPPORTED_SAMPLE_RATES: &[u32] =
    &[8_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000];

/// Nominal duration of one audio frame in milliseconds.
pub const FRAME_DURATION_MS: u32 = 100;

/// Maximum number of frames the chunk buffer retains before dropping
/// the oldest samples.
pub const BUFFER_CAPACITY_FRAMES: usize = 64;

/// Minimum keyword-spotting confidence that triggers a wake.
pub const WAKE_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Sustained silence that ends an utterance, in milliseconds.
/// Matches the endpointing window the reference models were tuned for.
pub const ENDPOINT_SILENCE_MS: u32 = 1_000;

/// Hard cap on utterance duration so a cycle always completes, in
/// milliseconds.
pub const MAX_UTTERANCE_MS: u32 = 20_000;

/// Per-call timeout for a single stage invocation, in milliseconds.
pub const STAGE_TIMEOUT_MS: u64 = 5_000;

/// How long the processing worker parks when no frame is buffered, in
/// milliseconds.
pub const WORKER_POLL_INTERVAL_MS: u64 = 10;

/// How long `Drop` waits for the processing worker to exit before
/// detaching it, in milliseconds.
pub const SHUTDOWN_DEADLINE_MS: u64 = 2_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sample_rate_is_supported() {
        assert!(SUPPORTED_SAMPLE_RATES.contains(&SAMPLE_RATE));
    }

    #[test]
    fn test_frame_duration_nonzero() {
        assert!(FRAME_DURATION_MS > 0);
    }

    #[test]
    fn test_endpoint_shorter_than_utterance_cap() {
        assert!(ENDPOINT_SILENCE_MS < MAX_UTTERANCE_MS);
    }
}

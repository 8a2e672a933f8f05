//! Chunk buffer that turns arbitrarily-sized audio fragments into
//! fixed-size frames.
//!
//! Producers (network handlers, capture callbacks) append from any thread;
//! the single processing worker drains complete frames. When producers
//! outpace the consumer the oldest samples are dropped and counted, so the
//! worker can report the overflow without ever blocking a producer.

use crate::error::{Result, VoxpipeError};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A frame of raw audio samples.
///
/// Produced by [`AudioChunkBuffer`], consumed by the state machine and
/// discarded after one processing cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// PCM samples (16-bit signed integers, mono).
    pub samples: Vec<i16>,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(samples: Vec<i16>, sequence: u64) -> Self {
        Self { samples, sequence }
    }
}

struct BufferInner {
    samples: VecDeque<i16>,
    dropped: u64,
    next_sequence: u64,
}

/// Accumulates incoming audio fragments into fixed-size frames.
pub struct AudioChunkBuffer {
    inner: Mutex<BufferInner>,
    frame_samples: usize,
    max_samples: usize,
}

impl AudioChunkBuffer {
    /// Creates a buffer producing frames of `frame_samples` samples,
    /// retaining at most `capacity_frames` frames worth of audio.
    pub fn new(frame_samples: usize, capacity_frames: usize) -> Result<Self> {
        if frame_samples == 0 {
            return Err(VoxpipeError::ConfigInvalidValue {
                key: "frame_samples".to_string(),
                message: "frame size must be at least 1 sample".to_string(),
            });
        }
        if capacity_frames == 0 {
            return Err(VoxpipeError::ConfigInvalidValue {
                key: "capacity_frames".to_string(),
                message: "buffer must hold at least 1 frame".to_string(),
            });
        }
        Ok(Self {
            inner: Mutex::new(BufferInner {
                samples: VecDeque::new(),
                dropped: 0,
                next_sequence: 0,
            }),
            frame_samples,
            max_samples: frame_samples * capacity_frames,
        })
    }

    /// Appends samples to the buffer. Never blocks beyond the internal
    /// lock; if the cap is exceeded the oldest samples are dropped and
    /// counted.
    pub fn push(&self, samples: &[i16]) {
        let mut inner = self.lock();
        inner.samples.extend(samples.iter().copied());
        let excess = inner.samples.len().saturating_sub(self.max_samples);
        if excess > 0 {
            inner.samples.drain(..excess);
            inner.dropped += excess as u64;
        }
    }

    /// Returns a full frame if enough samples are buffered, else `None`.
    pub fn try_take_frame(&self) -> Option<AudioFrame> {
        let mut inner = self.lock();
        if inner.samples.len() < self.frame_samples {
            return None;
        }
        let samples: Vec<i16> = inner.samples.drain(..self.frame_samples).collect();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        Some(AudioFrame::new(samples, sequence))
    }

    /// Drains the overflow counter: how many samples were dropped since
    /// the last call.
    pub fn take_dropped(&self) -> u64 {
        let mut inner = self.lock();
        std::mem::take(&mut inner.dropped)
    }

    /// Discards all buffered samples. The remainder at shutdown is never
    /// processed.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.samples.clear();
    }

    /// Number of samples currently buffered.
    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    /// Returns true when no samples are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of samples in one frame.
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferInner> {
        // A poisoned lock only means a producer panicked mid-append; the
        // sample queue itself is still structurally sound.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_rejects_zero_frame_size() {
        assert!(AudioChunkBuffer::new(0, 4).is_err());
    }

    #[test]
    fn test_rejects_zero_capacity() {
        assert!(AudioChunkBuffer::new(160, 0).is_err());
    }

    #[test]
    fn test_no_frame_until_enough_samples() {
        let buffer = AudioChunkBuffer::new(4, 8).unwrap();
        buffer.push(&[1, 2, 3]);
        assert!(buffer.try_take_frame().is_none());
        buffer.push(&[4]);
        let frame = buffer.try_take_frame().unwrap();
        assert_eq!(frame.samples, vec![1, 2, 3, 4]);
        assert_eq!(frame.sequence, 0);
    }

    #[test]
    fn test_frames_are_nonoverlapping_and_ordered() {
        let buffer = AudioChunkBuffer::new(2, 8).unwrap();
        buffer.push(&[1, 2, 3, 4, 5, 6]);

        let a = buffer.try_take_frame().unwrap();
        let b = buffer.try_take_frame().unwrap();
        let c = buffer.try_take_frame().unwrap();
        assert_eq!(a.samples, vec![1, 2]);
        assert_eq!(b.samples, vec![3, 4]);
        assert_eq!(c.samples, vec![5, 6]);
        assert_eq!((a.sequence, b.sequence, c.sequence), (0, 1, 2));
        assert!(buffer.try_take_frame().is_none());
    }

    #[test]
    fn test_overflow_drops_oldest_and_counts() {
        // Capacity: 2 frames of 3 samples = 6 samples.
        let buffer = AudioChunkBuffer::new(3, 2).unwrap();
        buffer.push(&[1, 2, 3, 4, 5, 6]);
        buffer.push(&[7, 8, 9]);

        assert_eq!(buffer.take_dropped(), 3);
        assert_eq!(buffer.take_dropped(), 0, "counter drains on read");

        // Oldest samples (1..=3) were dropped; ordering of the rest holds.
        let frame = buffer.try_take_frame().unwrap();
        assert_eq!(frame.samples, vec![4, 5, 6]);
        let frame = buffer.try_take_frame().unwrap();
        assert_eq!(frame.samples, vec![7, 8, 9]);
    }

    #[test]
    fn test_clear_discards_remainder() {
        let buffer = AudioChunkBuffer::new(4, 8).unwrap();
        buffer.push(&[1, 2, 3]);
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.push(&[9, 9, 9, 9]);
        assert_eq!(buffer.try_take_frame().unwrap().samples, vec![9, 9, 9, 9]);
    }

    #[test]
    fn test_concurrent_producers_lose_no_samples_below_cap() {
        let buffer = Arc::new(AudioChunkBuffer::new(10, 1000).unwrap());
        let mut handles = Vec::new();
        for t in 0..4 {
            let buffer = buffer.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    buffer.push(&[t as i16; 5]);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.len(), 4 * 100 * 5);
        assert_eq!(buffer.take_dropped(), 0);

        let mut frames = 0;
        while buffer.try_take_frame().is_some() {
            frames += 1;
        }
        assert_eq!(frames, 4 * 100 * 5 / 10);
    }
}

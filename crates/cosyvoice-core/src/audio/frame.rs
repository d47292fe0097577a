//! Audio frames and the events that carry them from network to device

use bytes::Bytes;
use std::time::{Duration, SystemTime};

use crate::error::Error;

/// Bytes per 16-bit sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Headerless PCM layout shared by the synthesis service and the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    /// 16-bit little-endian mono at the given rate
    pub fn mono16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Playback time of `bytes` bytes in this format
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let rate = self.bytes_per_second();
        if rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / rate as f64)
    }

    /// Byte count covering `duration`, rounded down to a whole sample
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let bytes = (duration.as_secs_f64() * self.bytes_per_second() as f64) as usize;
        bytes - bytes % (BYTES_PER_SAMPLE * self.channels as usize)
    }
}

/// One immutable unit of PCM handed from the client to the sink.
///
/// Every frame is exactly the configured frame size except the final frame
/// of a stream, which may be shorter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Bytes,
}

impl AudioFrame {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(Bytes::from(data))
    }
}

/// Ordered event sequence for one utterance.
///
/// Exactly one `EndOfStream` ends every request and nothing follows it. An
/// `Error` is always followed by that `EndOfStream`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Frame {
        frame: AudioFrame,
        /// True only for the first frame of the request
        is_first: bool,
        /// Wall-clock arrival of the first network byte, set on the first frame
        first_byte_at: Option<SystemTime>,
    },
    EndOfStream,
    Error(Error),
}

impl StreamEvent {
    pub fn frame(frame: AudioFrame, is_first: bool, first_byte_at: Option<SystemTime>) -> Self {
        StreamEvent::Frame {
            frame,
            is_first,
            first_byte_at,
        }
    }
}

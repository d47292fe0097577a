//! Re-chunking of arbitrarily sized network reads into fixed-size frames

use bytes::BytesMut;
use tracing::debug;

use super::frame::AudioFrame;

/// Accumulates network bytes and slices them into frames.
///
/// Between calls to [`next_frame`](Self::next_frame) returning `None`, the
/// pending buffer always holds fewer than `frame_size` bytes.
pub struct FrameAssembler {
    frame_size: usize,
    pending: BytesMut,
    frames_emitted: usize,
    bytes_received: usize,
}

impl FrameAssembler {
    /// Create an assembler producing frames of `frame_size` bytes
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be positive");
        Self {
            frame_size,
            pending: BytesMut::with_capacity(frame_size * 2),
            frames_emitted: 0,
            bytes_received: 0,
        }
    }

    /// Append one network read
    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes_received += chunk.len();
        self.pending.extend_from_slice(chunk);
    }

    /// Check if a full frame is ready
    pub fn can_emit_frame(&self) -> bool {
        self.pending.len() >= self.frame_size
    }

    /// Slice off exactly one full frame, if available
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        if !self.can_emit_frame() {
            return None;
        }
        let data = self.pending.split_to(self.frame_size).freeze();
        self.frames_emitted += 1;
        Some(AudioFrame::new(data))
    }

    /// Take whatever is left as one short final frame
    pub fn take_remaining(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let data = self.pending.split().freeze();
        debug!("Flushing short final frame of {} bytes", data.len());
        self.frames_emitted += 1;
        Some(AudioFrame::new(data))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Get current assembler statistics
    pub fn stats(&self) -> AssemblerStats {
        AssemblerStats {
            bytes_received: self.bytes_received,
            bytes_pending: self.pending.len(),
            frames_emitted: self.frames_emitted,
        }
    }
}

/// Assembler statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerStats {
    pub bytes_received: usize,
    pub bytes_pending: usize,
    pub frames_emitted: usize,
}

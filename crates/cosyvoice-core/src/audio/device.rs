//! Output device abstraction and the scoped device session

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::frame::PcmFormat;
use crate::error::{Error, Result};

/// Factory for hardware output tracks.
pub trait AudioOutput {
    type Track: AudioTrack;

    /// Smallest buffer, in bytes of `format`, the device can stream with
    fn min_buffer_size(&self, format: &PcmFormat) -> Result<usize>;

    /// Open a stopped track with a buffer of `buffer_size` bytes
    fn open(&mut self, format: &PcmFormat, buffer_size: usize) -> Result<Self::Track>;
}

/// One open hardware stream. Not safe for concurrent use; callers serialize.
pub trait AudioTrack {
    /// Blocking write. Returns the number of bytes accepted, which may be
    /// fewer than requested when the device stalls.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    fn play(&mut self) -> Result<()>;

    /// Block until queued samples have been rendered
    fn flush(&mut self) -> Result<()>;

    /// Stop rendering and drop anything still queued
    fn stop(&mut self);

    /// Release the hardware handle
    fn release(&mut self);
}

/// Device exclusivity, the desktop analogue of audio focus.
pub trait AudioFocus: Send + Sync {
    fn request(&self) -> Result<()>;
    fn abandon(&self);
}

/// Held exclusivity grant; abandoned exactly once when dropped.
pub struct FocusGuard {
    focus: Arc<dyn AudioFocus>,
}

impl FocusGuard {
    pub fn acquire(focus: Arc<dyn AudioFocus>) -> Result<Self> {
        focus.request()?;
        debug!("Audio focus acquired");
        Ok(Self { focus })
    }
}

impl Drop for FocusGuard {
    fn drop(&mut self) {
        self.focus.abandon();
        debug!("Audio focus abandoned");
    }
}

static PROCESS_FOCUS_HELD: AtomicBool = AtomicBool::new(false);

/// Process-wide exclusive grant on the output device.
///
/// A second request while one is held fails instead of mixing streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessFocus;

impl AudioFocus for ProcessFocus {
    fn request(&self) -> Result<()> {
        PROCESS_FOCUS_HELD
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::DeviceInitFailure("audio output is held by another session".into()))
    }

    fn abandon(&self) {
        PROCESS_FOCUS_HELD.store(false, Ordering::Release);
    }
}

/// The live device for one stream.
///
/// Owns the track and the focus grant. Whichever way the session ends,
/// the track is stopped and released before focus is abandoned.
pub struct DeviceSession<T: AudioTrack> {
    track: T,
    format: PcmFormat,
    playing: bool,
    closed: bool,
    bytes_written: usize,
    // Declared last so it drops after the track is closed
    _focus: FocusGuard,
}

impl<T: AudioTrack> DeviceSession<T> {
    /// Acquire focus, then open a track sized `buffer_multiple` times the
    /// device minimum. Focus is returned if opening fails.
    pub fn open<O>(
        output: &mut O,
        focus: Arc<dyn AudioFocus>,
        format: PcmFormat,
        buffer_multiple: usize,
    ) -> Result<Self>
    where
        O: AudioOutput<Track = T>,
    {
        let focus = FocusGuard::acquire(focus)?;
        let min_buffer = output.min_buffer_size(&format)?;
        let buffer_size = min_buffer * buffer_multiple.max(1);
        let track = output.open(&format, buffer_size)?;

        info!(
            "Opened output at {} Hz, buffer {} bytes ({:?})",
            format.sample_rate,
            buffer_size,
            format.duration_of(buffer_size)
        );

        Ok(Self {
            track,
            format,
            playing: false,
            closed: false,
            bytes_written: 0,
            _focus: focus,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        if !self.playing {
            self.track.play()?;
            self.playing = true;
        }
        Ok(())
    }

    /// Write all of `data`. A short write is retried once; a second short
    /// write means the device is gone.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let written = self.track.write(data)?;
        if written < data.len() {
            let rest = &data[written..];
            warn!(
                "Short device write ({} of {} bytes), retrying remainder",
                written,
                data.len()
            );
            let retried = self.track.write(rest)?;
            if retried < rest.len() {
                return Err(Error::DeviceWriteFailure(format!(
                    "device accepted {} of {} bytes after retry",
                    written + retried,
                    data.len()
                )));
            }
        }

        self.bytes_written += data.len();
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Let queued audio finish, wait `grace`, then stop and release.
    pub fn drain(mut self, grace: Duration) -> Result<()> {
        let flushed = self.track.flush();
        if let Err(ref e) = flushed {
            warn!("Device flush failed: {}", e);
        }
        std::thread::sleep(grace);
        self.close();
        debug!(
            "Drained session after {} bytes ({:?})",
            self.bytes_written,
            self.format.duration_of(self.bytes_written)
        );
        flushed
    }

    /// Stop and release immediately, discarding queued audio.
    pub fn abort(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.playing = false;
        self.track.stop();
        self.track.release();
    }
}

impl<T: AudioTrack> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}

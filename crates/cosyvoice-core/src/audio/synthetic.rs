//! In-memory output device and focus provider
//!
//! Records every device call so playback can run headless and be inspected
//! afterwards. Faults can be injected to exercise the error paths.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::device::{AudioFocus, AudioOutput, AudioTrack};
use super::frame::PcmFormat;
use crate::error::{Error, Result};

/// Everything the synthetic device has been asked to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackLog {
    pub opened: usize,
    pub started: usize,
    pub flushed: usize,
    pub stopped: usize,
    pub released: usize,
    pub write_calls: usize,
    pub buffer_sizes: Vec<usize>,
    /// Bytes accepted by each successful write, in order
    pub writes: Vec<usize>,
    /// Every byte accepted, in order
    pub played: Vec<u8>,
}

impl PlaybackLog {
    /// Tracks opened but not yet released
    pub fn open_tracks(&self) -> usize {
        self.opened - self.released
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_open: bool,
    fail_writes: bool,
    write_limits: VecDeque<usize>,
    write_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Shared {
    log: Mutex<PlaybackLog>,
    faults: Mutex<Faults>,
}

/// Output device that keeps everything it is given.
#[derive(Debug, Clone)]
pub struct SyntheticOutput {
    shared: Arc<Shared>,
    min_buffer: usize,
}

impl SyntheticOutput {
    pub fn new() -> Self {
        Self::with_min_buffer(1024)
    }

    pub fn with_min_buffer(min_buffer: usize) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            min_buffer,
        }
    }

    /// Snapshot of the call log
    pub fn log(&self) -> PlaybackLog {
        self.shared.log.lock().clone()
    }

    pub fn fail_next_open(&self) {
        self.shared.faults.lock().fail_open = true;
    }

    /// Every write from now on errors out
    pub fn fail_writes(&self) {
        self.shared.faults.lock().fail_writes = true;
    }

    /// Cap the next write at `limit` bytes; calls queue up
    pub fn limit_next_write(&self, limit: usize) {
        self.shared.faults.lock().write_limits.push_back(limit);
    }

    /// Block each write for `delay`, imitating a device rendering in real time
    pub fn set_write_delay(&self, delay: Duration) {
        self.shared.faults.lock().write_delay = Some(delay);
    }
}

impl Default for SyntheticOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for SyntheticOutput {
    type Track = SyntheticTrack;

    fn min_buffer_size(&self, _format: &PcmFormat) -> Result<usize> {
        Ok(self.min_buffer)
    }

    fn open(&mut self, _format: &PcmFormat, buffer_size: usize) -> Result<SyntheticTrack> {
        if std::mem::take(&mut self.shared.faults.lock().fail_open) {
            return Err(Error::DeviceInitFailure("synthetic open failure".into()));
        }
        let mut log = self.shared.log.lock();
        log.opened += 1;
        log.buffer_sizes.push(buffer_size);
        Ok(SyntheticTrack {
            shared: self.shared.clone(),
            released: false,
        })
    }
}

/// Track handed out by [`SyntheticOutput`]
#[derive(Debug)]
pub struct SyntheticTrack {
    shared: Arc<Shared>,
    released: bool,
}

impl AudioTrack for SyntheticTrack {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.released {
            return Err(Error::DeviceWriteFailure("write after release".into()));
        }

        let (fail, limit, delay) = {
            let mut faults = self.shared.faults.lock();
            (faults.fail_writes, faults.write_limits.pop_front(), faults.write_delay)
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut log = self.shared.log.lock();
        log.write_calls += 1;
        if fail {
            return Err(Error::DeviceWriteFailure("synthetic write failure".into()));
        }

        let accepted = limit.map_or(data.len(), |limit| limit.min(data.len()));
        log.writes.push(accepted);
        log.played.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn play(&mut self) -> Result<()> {
        self.shared.log.lock().started += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.shared.log.lock().flushed += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.log.lock().stopped += 1;
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.log.lock().released += 1;
        }
    }
}

#[derive(Debug, Default)]
struct FocusState {
    held: bool,
    requests: usize,
    abandons: usize,
}

/// Focus provider that counts grants and refuses a second concurrent one.
#[derive(Debug, Clone, Default)]
pub struct SyntheticFocus {
    state: Arc<Mutex<FocusState>>,
}

impl SyntheticFocus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    /// `(requests, abandons)` so far
    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.requests, state.abandons)
    }
}

impl AudioFocus for SyntheticFocus {
    fn request(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.held {
            return Err(Error::DeviceInitFailure("focus already held".into()));
        }
        state.held = true;
        state.requests += 1;
        Ok(())
    }

    fn abandon(&self) {
        let mut state = self.state.lock();
        state.held = false;
        state.abandons += 1;
    }
}

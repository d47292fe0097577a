//! Playback side of the pipeline: pre-roll, device writes, teardown

use bytes::BytesMut;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use super::device::{AudioFocus, AudioOutput, DeviceSession};
use super::frame::{AudioFrame, PcmFormat, StreamEvent};
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::status::{PlaybackStatus, StatusNotifier};

/// Playback tuning taken from [`StreamConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub format: PcmFormat,
    /// Bytes accumulated before the device starts; zero writes through
    pub pre_roll_bytes: usize,
    pub buffer_multiple: usize,
    pub drain_grace: Duration,
}

impl From<&StreamConfig> for SinkConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            format: PcmFormat::mono16(config.sample_rate),
            pre_roll_bytes: config.pre_roll_bytes,
            buffer_multiple: config.buffer_multiple,
            drain_grace: config.drain_grace(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// No device open
    Idle,
    /// Device open, collecting pre-roll
    Buffering,
    /// Writing frames through as they arrive
    Playing,
    /// Letting queued audio finish before release
    Draining,
    /// Device failed mid-stream; remaining frames are discarded
    Error,
}

impl fmt::Display for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkState::Idle => "idle",
            SinkState::Buffering => "buffering",
            SinkState::Playing => "playing",
            SinkState::Draining => "draining",
            SinkState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Consumes [`StreamEvent`]s and drives one output device.
///
/// All calls must come from a single thread; device writes block.
pub struct StreamingAudioSink<O: AudioOutput> {
    output: O,
    focus: Arc<dyn AudioFocus>,
    config: SinkConfig,
    status: StatusNotifier,
    state: SinkState,
    session: Option<DeviceSession<O::Track>>,
    pre_roll: BytesMut,
    first_byte_at: Option<SystemTime>,
    bytes_played: usize,
}

impl<O: AudioOutput> StreamingAudioSink<O> {
    pub fn new(
        output: O,
        focus: Arc<dyn AudioFocus>,
        config: SinkConfig,
        status: StatusNotifier,
    ) -> Self {
        let pre_roll = BytesMut::with_capacity(config.pre_roll_bytes);
        Self {
            output,
            focus,
            config,
            status,
            state: SinkState::Idle,
            session: None,
            pre_roll,
            first_byte_at: None,
            bytes_played: 0,
        }
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Bytes written to the device for the current or most recent stream
    pub fn bytes_played(&self) -> usize {
        self.bytes_played
    }

    /// Handle one event. Errors are returned for the caller to display; the
    /// device has already been torn down when they are.
    pub fn on_event(&mut self, event: StreamEvent) -> Result<()> {
        match event {
            StreamEvent::Frame {
                frame,
                is_first,
                first_byte_at,
            } => self.on_frame(frame, is_first, first_byte_at),
            StreamEvent::EndOfStream => self.on_end_of_stream(),
            StreamEvent::Error(err) => {
                self.abort(err.clone());
                Err(err)
            }
        }
    }

    /// Whether a device session is open for the current stream
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Silence the current stream now and publish `reason`. Frames of that
    /// stream arriving afterwards are discarded.
    pub fn abort(&mut self, reason: Error) {
        match reason {
            Error::Cancelled => info!("Stream cancelled in state {}", self.state),
            _ => warn!("Stream failed in state {}: {}", self.state, reason),
        }
        self.teardown();
        self.state = SinkState::Idle;
        self.status.set(PlaybackStatus::Error(reason));
    }

    /// Tear down any active session. Safe to call repeatedly.
    ///
    /// A device error already published is left in place.
    pub fn shutdown(&mut self) {
        let active = self.session.is_some();
        if !active && self.state == SinkState::Idle {
            return;
        }
        info!("Shutting down playback in state {}", self.state);
        self.teardown();
        self.state = SinkState::Idle;
        if active {
            self.status.set(PlaybackStatus::Idle);
        }
    }

    fn on_frame(
        &mut self,
        frame: AudioFrame,
        is_first: bool,
        first_byte_at: Option<SystemTime>,
    ) -> Result<()> {
        if is_first && self.state != SinkState::Idle {
            if self.session.is_some() {
                warn!("New stream arrived while {}, tearing down previous session", self.state);
            }
            self.teardown();
            self.state = SinkState::Idle;
        }

        match self.state {
            SinkState::Error => {
                debug!("Discarding {} byte frame after device failure", frame.len());
                return Ok(());
            }
            // Only a first frame opens the device
            SinkState::Idle if !is_first => {
                debug!("Discarding {} byte frame of a torn down stream", frame.len());
                return Ok(());
            }
            SinkState::Idle => {
                if let Err(e) = self.begin(first_byte_at) {
                    return Err(self.fail(e));
                }
            }
            _ => {}
        }

        let result = match self.state {
            SinkState::Buffering => {
                self.pre_roll.extend_from_slice(frame.as_bytes());
                if self.pre_roll.len() >= self.config.pre_roll_bytes {
                    self.start_playback()
                } else {
                    Ok(())
                }
            }
            SinkState::Playing => self.write(frame.as_bytes()),
            _ => Ok(()),
        };
        result.map_err(|e| self.fail(e))
    }

    fn on_end_of_stream(&mut self) -> Result<()> {
        match self.state {
            SinkState::Idle | SinkState::Draining => Ok(()),
            SinkState::Error => {
                self.state = SinkState::Idle;
                Ok(())
            }
            SinkState::Buffering => {
                debug!(
                    "Stream ended below pre-roll threshold ({} of {} bytes), flushing",
                    self.pre_roll.len(),
                    self.config.pre_roll_bytes
                );
                if let Err(e) = self.start_playback() {
                    let e = self.fail(e);
                    self.state = SinkState::Idle;
                    return Err(e);
                }
                self.drain()
            }
            SinkState::Playing => self.drain(),
        }
    }

    fn begin(&mut self, first_byte_at: Option<SystemTime>) -> Result<()> {
        let session = DeviceSession::open(
            &mut self.output,
            self.focus.clone(),
            self.config.format,
            self.config.buffer_multiple,
        )?;
        self.session = Some(session);
        self.pre_roll.clear();
        self.first_byte_at = first_byte_at;
        self.bytes_played = 0;
        self.state = SinkState::Buffering;
        Ok(())
    }

    /// Start the device and write the pre-roll in one burst.
    fn start_playback(&mut self) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::DeviceWriteFailure("no open session".into()))?;
        session.start()?;
        session.write_all(&self.pre_roll)?;

        self.bytes_played += self.pre_roll.len();
        self.pre_roll.clear();
        self.state = SinkState::Playing;
        self.status.set(PlaybackStatus::Playing);

        match self.first_byte_at.and_then(|at| at.elapsed().ok()) {
            Some(latency) => info!("Playback started {:?} after first byte", latency),
            None => info!("Playback started"),
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::DeviceWriteFailure("no open session".into()))?;
        session.write_all(data)?;
        self.bytes_played += data.len();
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.state = SinkState::Draining;
        let result = match self.session.take() {
            Some(session) => session.drain(self.config.drain_grace),
            None => Ok(()),
        };
        self.state = SinkState::Idle;

        info!(
            "Stream finished: {} bytes played ({:?})",
            self.bytes_played,
            self.config.format.duration_of(self.bytes_played)
        );
        match result {
            Ok(()) => {
                self.status.set(PlaybackStatus::Idle);
                Ok(())
            }
            Err(e) => {
                self.status.set(PlaybackStatus::Error(e.clone()));
                Err(e)
            }
        }
    }

    /// Device-side failure: silence and release now, wait for the stream to end.
    fn fail(&mut self, err: Error) -> Error {
        warn!("Playback failed in state {}: {}", self.state, err);
        self.teardown();
        self.state = SinkState::Error;
        self.status.set(PlaybackStatus::Error(err.clone()));
        err
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Aborting session after {} bytes", session.bytes_written());
            session.abort();
        }
        self.pre_roll.clear();
    }
}

impl<O: AudioOutput> Drop for StreamingAudioSink<O> {
    fn drop(&mut self) {
        self.teardown();
    }
}

//! Hardware output through cpal

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig, SupportedBufferSize,
    SupportedStreamConfig,
};
use parking_lot::{Condvar, Mutex};
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::device::{AudioOutput, AudioTrack};
use super::frame::{PcmFormat, BYTES_PER_SAMPLE};
use super::resample::StreamResampler;
use crate::config::StreamConfig as PipelineConfig;
use crate::error::{Error, Result};

/// Default output device of the default host
pub struct CpalOutput {
    device: Device,
    write_stall: Duration,
}

impl CpalOutput {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceInitFailure("No output device available".into()))?;

        info!(
            "Using output device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        Ok(Self {
            device,
            write_stall: Duration::from_secs(2),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new()?.with_write_stall(config.write_stall()))
    }

    /// How long a write may block without the device taking samples
    pub fn with_write_stall(mut self, stall: Duration) -> Self {
        self.write_stall = stall;
        self
    }

    /// Prefer a config running at the stream's rate; otherwise fall back to
    /// the device default and resample on write.
    fn choose_config(&self, format: &PcmFormat) -> Result<SupportedStreamConfig> {
        let wanted = cpal::SampleRate(format.sample_rate);
        let ranges = self
            .device
            .supported_output_configs()
            .map_err(|e| Error::DeviceInitFailure(format!("Failed to query output configs: {}", e)))?;

        let mut best: Option<SupportedStreamConfig> = None;
        for range in ranges {
            let usable = matches!(range.sample_format(), SampleFormat::F32 | SampleFormat::I16)
                && range.min_sample_rate() <= wanted
                && wanted <= range.max_sample_rate();
            if !usable {
                continue;
            }
            let candidate = range.with_sample_rate(wanted);
            if best.as_ref().map_or(true, |b| candidate.channels() < b.channels()) {
                best = Some(candidate);
            }
        }

        match best {
            Some(config) => Ok(config),
            None => {
                let config = self.device.default_output_config().map_err(|e| {
                    Error::DeviceInitFailure(format!("Failed to get output config: {}", e))
                })?;
                debug!(
                    "Device cannot run at {} Hz, converting to {} Hz",
                    format.sample_rate,
                    config.sample_rate().0
                );
                Ok(config)
            }
        }
    }
}

impl AudioOutput for CpalOutput {
    type Track = CpalTrack;

    fn min_buffer_size(&self, format: &PcmFormat) -> Result<usize> {
        let config = self.choose_config(format)?;
        let device_frames = match config.buffer_size() {
            SupportedBufferSize::Range { min, .. } => *min as usize,
            SupportedBufferSize::Unknown => 0,
        };
        let ratio = format.sample_rate as f64 / config.sample_rate().0 as f64;
        let source_samples = (device_frames as f64 * ratio).ceil() as usize;

        // Backends often report tiny or unknown minimums
        let floor = format.bytes_for(Duration::from_millis(20));
        Ok((source_samples * BYTES_PER_SAMPLE).max(floor))
    }

    fn open(&mut self, format: &PcmFormat, buffer_size: usize) -> Result<CpalTrack> {
        let supported = self.choose_config(format)?;
        let config: StreamConfig = supported.config();
        let resampler = StreamResampler::new(format.sample_rate, config.sample_rate.0)?;
        // Queue holds device-rate samples
        let source_samples = buffer_size / BYTES_PER_SAMPLE;
        let capacity = ((source_samples as f64 * resampler.ratio()).ceil() as usize).max(1);
        let shared = Arc::new(TrackShared::new(capacity));

        let stream = match supported.sample_format() {
            SampleFormat::I16 => build_stream::<i16>(&self.device, &config, shared.clone())?,
            SampleFormat::F32 => build_stream::<f32>(&self.device, &config, shared.clone())?,
            other => {
                return Err(Error::DeviceInitFailure(format!(
                    "Unsupported device sample format {:?}",
                    other
                )))
            }
        };

        // Some backends start streams on creation
        if let Err(e) = stream.pause() {
            debug!("Could not pause new output stream: {}", e);
        }

        debug!(
            "Output stream: {} Hz, {} channel(s), {:?}, queue {} samples{}",
            config.sample_rate.0,
            config.channels,
            supported.sample_format(),
            capacity,
            if resampler.is_passthrough() { "" } else { ", resampling" }
        );

        Ok(CpalTrack {
            stream: Some(stream),
            shared,
            resampler,
            pending_byte: None,
            write_stall: self.write_stall,
        })
    }
}

struct TrackShared {
    queue: Mutex<HeapRb<f32>>,
    space: Condvar,
    failed: AtomicBool,
}

impl TrackShared {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(HeapRb::new(capacity)),
            space: Condvar::new(),
            failed: AtomicBool::new(false),
        }
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    shared: Arc<TrackShared>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let on_error = shared.clone();

    let err_fn = move |err| {
        error!("Audio output stream error: {}", err);
        on_error.failed.store(true, Ordering::Release);
        on_error.space.notify_all();
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut queue = shared.queue.lock();
                for frame in data.chunks_mut(channels) {
                    // Underrun plays silence
                    let value = queue.try_pop().unwrap_or(0.0);
                    frame.fill(T::from_sample(value));
                }
                drop(queue);
                shared.space.notify_all();
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::DeviceInitFailure(format!("Failed to build output stream: {}", e)))
}

/// One open cpal stream fed through a bounded sample queue.
pub struct CpalTrack {
    stream: Option<Stream>,
    shared: Arc<TrackShared>,
    resampler: StreamResampler,
    // Odd byte carried over to the next write
    pending_byte: Option<u8>,
    write_stall: Duration,
}

impl CpalTrack {
    fn check_stream(&self) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::DeviceWriteFailure("track already released".into()));
        }
        if self.shared.failed.load(Ordering::Acquire) {
            return Err(Error::DeviceWriteFailure("output stream reported an error".into()));
        }
        Ok(())
    }

    /// Queue samples, blocking while the queue is full. Gives up once the
    /// device has taken nothing for `write_stall`.
    fn enqueue(&self, samples: &[f32]) -> usize {
        let mut queued = 0;
        let mut deadline = Instant::now() + self.write_stall;
        let mut queue = self.shared.queue.lock();

        loop {
            let pushed = queue.push_slice(&samples[queued..]);
            queued += pushed;
            if queued == samples.len() || self.shared.failed.load(Ordering::Acquire) {
                break;
            }
            if pushed > 0 {
                deadline = Instant::now() + self.write_stall;
            }
            if self.shared.space.wait_until(&mut queue, deadline).timed_out() {
                queued += queue.push_slice(&samples[queued..]);
                break;
            }
        }
        queued
    }
}

impl AudioTrack for CpalTrack {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_stream()?;

        let lead = self.pending_byte.take();
        let mut bytes = lead.into_iter().chain(data.iter().copied());
        let mut samples = Vec::with_capacity(data.len() / BYTES_PER_SAMPLE + 1);
        let mut tail = None;
        while let Some(lo) = bytes.next() {
            match bytes.next() {
                Some(hi) => samples.push(i16::from_le_bytes([lo, hi]).to_sample::<f32>()),
                None => tail = Some(lo),
            }
        }

        let converted = self.resampler.push(&samples)?;
        let queued = self.enqueue(&converted);
        if queued == converted.len() {
            self.pending_byte = tail;
            return Ok(data.len());
        }

        warn!("Device stalled after {} of {} samples", queued, converted.len());
        // Map the unqueued device samples back onto the input; approximate
        // when resampling
        let missing = ((converted.len() - queued) as f64 / self.resampler.ratio()).ceil() as usize;
        let accepted = samples.len().saturating_sub(missing);
        if accepted == 0 {
            self.pending_byte = lead;
        }
        Ok((accepted * BYTES_PER_SAMPLE).saturating_sub(lead.map_or(0, |_| 1)))
    }

    fn play(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::DeviceInitFailure("track already released".into()))?;
        stream
            .play()
            .map_err(|e| Error::DeviceInitFailure(format!("Failed to start output stream: {}", e)))
    }

    fn flush(&mut self) -> Result<()> {
        self.check_stream()?;

        let tail = self.resampler.finish()?;
        if self.enqueue(&tail) < tail.len() {
            return Err(Error::DeviceWriteFailure(
                "device stalled while queueing the final samples".into(),
            ));
        }

        let mut queue = self.shared.queue.lock();
        let mut remaining = queue.occupied_len();
        let mut deadline = Instant::now() + self.write_stall;

        while remaining > 0 {
            if self.shared.failed.load(Ordering::Acquire) {
                return Err(Error::DeviceWriteFailure("output stream failed while draining".into()));
            }
            if self.shared.space.wait_until(&mut queue, deadline).timed_out() {
                return Err(Error::DeviceWriteFailure(format!(
                    "device stopped draining with {} samples queued",
                    queue.occupied_len()
                )));
            }
            let now = queue.occupied_len();
            if now < remaining {
                deadline = Instant::now() + self.write_stall;
            }
            remaining = now;
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                debug!("Failed to pause output stream: {}", e);
            }
        }
        self.shared.queue.lock().clear();
        self.resampler.reset();
        self.pending_byte = None;
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            debug!("Released output stream");
        }
        self.shared.space.notify_all();
    }
}

//! Stream-rate to device-rate conversion for hardware output

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::error::{Error, Result};

/// Input frames per resampler call (about 43 ms at 24 kHz)
const CHUNK_FRAMES: usize = 1024;

/// Incremental mono resampler fed by device writes.
///
/// Input is consumed in fixed chunks; a partial chunk waits for the next
/// push or for [`finish`](Self::finish). The filter delay is trimmed so the
/// output lines up with the input and has `ceil(input * ratio)` samples.
/// With equal rates samples pass through untouched.
pub struct StreamResampler {
    inner: Option<SincFixedIn<f32>>,
    ratio: f64,
    pending: Vec<f32>,
    delay_left: usize,
    consumed: usize,
    produced: usize,
}

impl StreamResampler {
    pub fn new(source_rate: u32, device_rate: u32) -> Result<Self> {
        if source_rate == 0 || device_rate == 0 {
            return Err(Error::DeviceInitFailure(
                "Sample rates must be greater than 0".into(),
            ));
        }

        let ratio = device_rate as f64 / source_rate as f64;
        if source_rate == device_rate {
            return Ok(Self {
                inner: None,
                ratio,
                pending: Vec::new(),
                delay_left: 0,
                consumed: 0,
                produced: 0,
            });
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_FRAMES, 1)
            .map_err(|e| Error::DeviceInitFailure(format!("Failed to create resampler: {}", e)))?;
        let delay_left = inner.output_delay();

        debug!(
            "Created resampler: {} Hz -> {} Hz, delay {} samples",
            source_rate, device_rate, delay_left
        );

        Ok(Self {
            inner: Some(inner),
            ratio,
            pending: Vec::with_capacity(CHUNK_FRAMES),
            delay_left,
            consumed: 0,
            produced: 0,
        })
    }

    /// Device samples per stream sample
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Convert `input`, returning whatever full chunks produced.
    pub fn push(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend_from_slice(input);
        let mut out = Vec::with_capacity((self.pending.len() as f64 * self.ratio) as usize);

        while self.pending.len() >= inner.input_frames_next() {
            let needed = inner.input_frames_next();
            let chunk = [self.pending.drain(..needed).collect::<Vec<f32>>()];
            let frames = inner
                .process(&chunk[..], None)
                .map_err(|e| Error::DeviceWriteFailure(format!("Resampling failed: {}", e)))?;
            self.consumed += needed;
            emit(
                &frames[0],
                &mut self.delay_left,
                &mut self.produced,
                usize::MAX,
                &mut out,
            );
        }
        Ok(out)
    }

    /// Convert the buffered remainder and the filter tail, then reset for
    /// the next stream.
    pub fn finish(&mut self) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };

        let total_in = self.consumed + self.pending.len();
        let expected = (total_in as f64 * self.ratio).ceil() as usize;
        let mut out = Vec::new();

        if !self.pending.is_empty() {
            let rest = [std::mem::take(&mut self.pending)];
            let frames = inner
                .process_partial(Some(&rest[..]), None)
                .map_err(|e| Error::DeviceWriteFailure(format!("Resampling failed: {}", e)))?;
            emit(&frames[0], &mut self.delay_left, &mut self.produced, expected, &mut out);
        }

        // Zero input pushes the delayed samples out
        for _ in 0..4 {
            if self.produced >= expected {
                break;
            }
            let frames = inner
                .process_partial::<Vec<f32>>(None, None)
                .map_err(|e| Error::DeviceWriteFailure(format!("Resampling failed: {}", e)))?;
            emit(&frames[0], &mut self.delay_left, &mut self.produced, expected, &mut out);
        }

        self.reset();
        Ok(out)
    }

    /// Drop buffered input and filter state
    pub fn reset(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
            self.delay_left = inner.output_delay();
        }
        self.pending.clear();
        self.consumed = 0;
        self.produced = 0;
    }
}

/// Append `frames` to `out`, skipping leftover filter delay and stopping
/// once `produced` reaches `limit`.
fn emit(
    frames: &[f32],
    delay_left: &mut usize,
    produced: &mut usize,
    limit: usize,
    out: &mut Vec<f32>,
) {
    let skip = (*delay_left).min(frames.len());
    *delay_left -= skip;
    let take = (frames.len() - skip).min(limit.saturating_sub(*produced));
    out.extend_from_slice(&frames[skip..skip + take]);
    *produced += take;
}

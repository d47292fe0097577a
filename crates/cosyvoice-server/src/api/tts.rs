//! Streaming synthesis endpoint
//!
//! Mirrors the production voice service: a form POST with `tts_text` and
//! `person`, answered with raw 16-bit mono PCM written in chunks whose sizes
//! never line up with any frame boundary.

use axum::{
    body::Body,
    extract::{Form, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use cosyvoice_core::Error;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::synth::ToneSynth;

#[derive(Debug, Deserialize)]
pub struct SynthesisForm {
    #[serde(default)]
    pub tts_text: String,
    #[serde(default)]
    pub person: String,
}

pub async fn synthesize(
    State(state): State<AppState>,
    Form(form): Form<SynthesisForm>,
) -> Result<Response, ApiError> {
    if form.tts_text.trim().is_empty() {
        return Err(Error::InvalidRequest("tts_text must not be empty".into()).into());
    }
    if form.person.trim().is_empty() {
        return Err(Error::InvalidRequest("person must not be empty".into()).into());
    }

    let id = Uuid::new_v4();
    let seq = state.next_request();
    let config = state.config.clone();
    let started = Instant::now();

    let synth = ToneSynth::new(config.sample_rate, config.ms_per_char);
    let pcm = Bytes::from(synth.render(&form.tts_text, &form.person));
    info!(
        request_id = %id,
        "Request #{}: {} chars for {:?}, {} bytes of PCM",
        seq,
        form.tts_text.chars().count(),
        form.person,
        pcm.len()
    );

    let sizes = ChunkSizes::new(config.min_chunk_bytes, config.max_chunk_bytes, seq);
    let interval = Duration::from_millis(config.chunk_interval_ms);

    let body = async_stream::stream! {
        let mut offset = 0;
        let mut chunks = 0usize;
        for size in sizes {
            if offset >= pcm.len() {
                break;
            }
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
            let end = (offset + size).min(pcm.len());
            chunks += 1;
            yield Ok::<_, Infallible>(pcm.slice(offset..end));
            offset = end;
        }
        debug!(request_id = %id, "Sent {} chunks in {:?}", chunks, started.elapsed());
    };

    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        headers.insert("x-request-id", value);
    }
    Ok(response)
}

/// Endless pseudo-random chunk sizes in `min..=max`, seeded per request
struct ChunkSizes {
    min: usize,
    max: usize,
    rng: StdRng,
}

impl ChunkSizes {
    fn new(min: usize, max: usize, seed: u64) -> Self {
        Self {
            min,
            max: max.max(min),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Iterator for ChunkSizes {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        Some(self.rng.gen_range(self.min..=self.max))
    }
}

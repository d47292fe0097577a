//! CosyVoice Core - Streaming speech delivery and real-time playback
//!
//! This crate fetches synthesized speech from a remote voice server as a raw
//! PCM stream and plays it with the lowest practical latency.
//!
//! # Architecture
//!
//! Data flows one way:
//! - [`SynthesisStreamClient`] posts the utterance and re-chunks the body
//!   into fixed-size frames
//! - a bounded channel carries the frames to a dedicated playback thread
//! - [`StreamingAudioSink`] pre-rolls, then writes through to the device,
//!   draining and releasing it when the stream ends
//!
//! Cancellation flows the other way through a [`CancelHandle`]. Progress is
//! published as a single [`PlaybackStatus`] value.
//!
//! # Example
//!
//! ```ignore
//! use cosyvoice_core::{SpeechPipeline, StreamConfig};
//!
//! let config = StreamConfig::load(None)?;
//! let pipeline = SpeechPipeline::with_default_device(config)?;
//! pipeline.speak("안녕하세요").await?;
//! ```

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod status;

pub use audio::{
    AudioFocus, AudioFrame, AudioOutput, AudioTrack, FrameAssembler, PcmFormat, SinkConfig,
    SinkState, StreamEvent, StreamingAudioSink, SyntheticFocus, SyntheticOutput,
};
pub use client::{CancelHandle, FrameSink, SynthesisRequest, SynthesisStreamClient};
pub use config::{ServerConfig, StreamConfig};
pub use error::{Error, Result};
pub use pipeline::SpeechPipeline;
pub use status::{PlaybackStatus, StatusNotifier};

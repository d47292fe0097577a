//! Audio frames, device access and streaming playback

mod device;
mod frame;
#[cfg(feature = "audio-io")]
mod output;
#[cfg(feature = "audio-io")]
mod resample;
mod sink;
mod streaming;
pub mod synthetic;

pub use device::{AudioFocus, AudioOutput, AudioTrack, DeviceSession, FocusGuard, ProcessFocus};
pub use frame::{AudioFrame, PcmFormat, StreamEvent, BYTES_PER_SAMPLE};
#[cfg(feature = "audio-io")]
pub use output::{CpalOutput, CpalTrack};
#[cfg(feature = "audio-io")]
pub use resample::StreamResampler;
pub use sink::{SinkConfig, SinkState, StreamingAudioSink};
pub use streaming::{AssemblerStats, FrameAssembler};
pub use synthetic::{PlaybackLog, SyntheticFocus, SyntheticOutput};

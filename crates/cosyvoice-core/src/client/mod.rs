//! Synthesis client: one streamed HTTP request per utterance

mod cancel;
mod request;
mod sink;
mod synthesis;

pub use cancel::CancelHandle;
pub use request::SynthesisRequest;
pub use sink::FrameSink;
pub use synthesis::SynthesisStreamClient;

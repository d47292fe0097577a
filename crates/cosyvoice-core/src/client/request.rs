//! Per-utterance synthesis request

use reqwest::Url;
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::{Error, Result};

/// Form field carrying the utterance
pub const TEXT_FIELD: &str = "tts_text";
/// Form field carrying the speaker key
pub const SPEAKER_FIELD: &str = "person";

/// Immutable description of one utterance to synthesize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    id: Uuid,
    text: String,
    speaker: String,
    endpoint: Url,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, speaker: impl Into<String>, endpoint: &str) -> Result<Self> {
        let text = text.into();
        let speaker = speaker.into();

        if text.trim().is_empty() {
            return Err(Error::InvalidRequest("utterance text is empty".into()));
        }
        if speaker.trim().is_empty() {
            return Err(Error::InvalidRequest("speaker is empty".into()));
        }
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::InvalidRequest(format!("invalid endpoint {:?}: {}", endpoint, e)))?;

        Ok(Self {
            id: Uuid::new_v4(),
            text,
            speaker,
            endpoint,
        })
    }

    /// Request against the configured endpoint and default speaker
    pub fn from_config(text: impl Into<String>, config: &StreamConfig) -> Result<Self> {
        Self::new(text, config.speaker.clone(), &config.endpoint)
    }

    /// Same utterance for a different speaker
    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Result<Self> {
        let speaker = speaker.into();
        if speaker.trim().is_empty() {
            return Err(Error::InvalidRequest("speaker is empty".into()));
        }
        self.speaker = speaker;
        Ok(self)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn speaker(&self) -> &str {
        &self.speaker
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub(crate) fn form(&self) -> [(&'static str, &str); 2] {
        [(TEXT_FIELD, self.text.as_str()), (SPEAKER_FIELD, self.speaker.as_str())]
    }
}

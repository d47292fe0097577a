//! Placeholder voice: a speaker-dependent tone sized to the utterance

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

/// Ramp applied at both ends so playback starts and stops without a click
const FADE_MS: u32 = 10;
const AMPLITUDE: f32 = 0.3;

/// Renders 16-bit little-endian mono PCM.
#[derive(Debug, Clone, Copy)]
pub struct ToneSynth {
    sample_rate: u32,
    ms_per_char: u32,
}

impl ToneSynth {
    pub fn new(sample_rate: u32, ms_per_char: u32) -> Self {
        Self {
            sample_rate,
            ms_per_char,
        }
    }

    /// Pitch for a speaker, stable across runs
    pub fn pitch_for(speaker: &str) -> f32 {
        let mut seed = [0u8; 32];
        for (i, b) in speaker.bytes().enumerate() {
            seed[i % 32] = seed[i % 32].rotate_left(3) ^ b;
        }
        StdRng::from_seed(seed).gen_range(160.0..360.0)
    }

    pub fn sample_count(&self, text: &str) -> usize {
        let chars = text.chars().filter(|c| !c.is_whitespace()).count() as u64;
        (self.sample_rate as u64 * self.ms_per_char as u64 * chars / 1000) as usize
    }

    pub fn render(&self, text: &str, speaker: &str) -> Vec<u8> {
        let total = self.sample_count(text);
        let pitch = Self::pitch_for(speaker);
        let fade = (self.sample_rate * FADE_MS / 1000).max(1) as usize;
        let rate = self.sample_rate as f32;

        let mut pcm = Vec::with_capacity(total * 2);
        for n in 0..total {
            let edge = n.min(total - 1 - n);
            let gain = if edge < fade { edge as f32 / fade as f32 } else { 1.0 };
            let value = (TAU * pitch * n as f32 / rate).sin() * AMPLITUDE * gain;
            let sample = (value * i16::MAX as f32) as i16;
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        pcm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_scales_with_text() {
        let synth = ToneSynth::new(24000, 120);
        // 5 characters at 120 ms each is 600 ms
        assert_eq!(synth.render("안녕하세요", "mom").len(), 28800);
        assert_eq!(synth.sample_count("a b"), 5760);
    }

    #[test]
    fn test_whitespace_only_renders_nothing() {
        let synth = ToneSynth::new(24000, 120);
        assert!(synth.render("   ", "mom").is_empty());
    }

    #[test]
    fn test_speakers_get_distinct_stable_pitch() {
        assert_eq!(ToneSynth::pitch_for("mom"), ToneSynth::pitch_for("mom"));
        assert_ne!(ToneSynth::pitch_for("mom"), ToneSynth::pitch_for("grandpa"));
        let pitch = ToneSynth::pitch_for("anyone");
        assert!((160.0..360.0).contains(&pitch));
    }

    #[test]
    fn test_fades_in_from_silence() {
        let pcm = ToneSynth::new(24000, 120).render("hi", "mom");
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 0);
        let last = pcm.len() - 2;
        assert_eq!(i16::from_le_bytes([pcm[last], pcm[last + 1]]), 0);
    }
}

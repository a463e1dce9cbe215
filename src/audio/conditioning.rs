//! Software conditioning applied to microphone audio before it is sent
//! upstream: automatic gain and an RMS noise gate.
//!
//! [`FrameConditioner`] chains the whole capture path for one device:
//!
//! ```text
//! interleaved f32 @ device rate
//!   → downmix_to_mono → resample → AutoGain → NoiseGate → pcm_s16le bytes
//! ```

use crate::config::AudioConfig;

use super::resample::{downmix_to_mono, encode_pcm16le, resample};

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

// ---------------------------------------------------------------------------
// NoiseGate
// ---------------------------------------------------------------------------

/// Zeroes frames whose RMS is below `threshold`.
///
/// Frames are 30 ms at the rate the gate was built for.
#[derive(Debug, Clone)]
pub struct NoiseGate {
    threshold: f32,
    frame_size: usize,
}

impl NoiseGate {
    pub fn new(threshold: f32, sample_rate: u32) -> Self {
        Self {
            threshold,
            frame_size: (sample_rate as usize * 30 / 1000).max(1),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn apply(&self, samples: &mut [f32]) {
        for frame in samples.chunks_mut(self.frame_size) {
            if rms(frame) < self.threshold {
                frame.iter_mut().for_each(|s| *s = 0.0);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AutoGain
// ---------------------------------------------------------------------------

/// Slowly steers the signal level towards a target RMS.
#[derive(Debug, Clone)]
pub struct AutoGain {
    target_rms: f32,
    max_gain: f32,
    smoothing: f32,
    gain: f32,
}

impl Default for AutoGain {
    fn default() -> Self {
        Self {
            target_rms: 0.1,
            max_gain: 8.0,
            smoothing: 0.2,
            gain: 1.0,
        }
    }
}

impl AutoGain {
    /// Below this level the chunk is treated as silence and the gain holds.
    const SILENCE_RMS: f32 = 1e-4;

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn apply(&mut self, samples: &mut [f32]) {
        let level = rms(samples);
        if level > Self::SILENCE_RMS {
            let wanted = (self.target_rms / level).clamp(1.0 / self.max_gain, self.max_gain);
            self.gain += (wanted - self.gain) * self.smoothing;
        }
        for s in samples.iter_mut() {
            *s = (*s * self.gain).clamp(-1.0, 1.0);
        }
    }
}

// ---------------------------------------------------------------------------
// FrameConditioner
// ---------------------------------------------------------------------------

/// Turns raw device buffers into the PCM frames the voice channel expects.
#[derive(Debug, Clone)]
pub struct FrameConditioner {
    source_rate: u32,
    source_channels: u16,
    target_rate: u32,
    auto_gain: Option<AutoGain>,
    noise_gate: Option<NoiseGate>,
}

impl FrameConditioner {
    pub fn new(source_rate: u32, source_channels: u16, config: &AudioConfig) -> Self {
        Self {
            source_rate,
            source_channels,
            target_rate: config.sample_rate,
            auto_gain: config.auto_gain.then(AutoGain::default),
            noise_gate: config
                .noise_gate
                .then(|| NoiseGate::new(config.noise_gate_threshold, config.sample_rate)),
        }
    }

    /// Returns an empty vector when the buffer yields no samples.
    pub fn process(&mut self, interleaved: &[f32]) -> Vec<u8> {
        let mono = downmix_to_mono(interleaved, self.source_channels);
        let mut samples = resample(&mono, self.source_rate, self.target_rate);
        if let Some(gain) = self.auto_gain.as_mut() {
            gain.apply(&mut samples);
        }
        if let Some(gate) = &self.noise_gate {
            gate.apply(&mut samples);
        }
        encode_pcm16le(&samples)
    }
}

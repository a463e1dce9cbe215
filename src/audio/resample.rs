//! Channel down-mix and sample-rate conversion for captured audio.
//!
//! Both providers expect mono audio at one fixed rate (16 kHz by default),
//! while microphones usually deliver 44.1 or 48 kHz, often stereo.
//! Resampling is linear interpolation; speech for a conversational agent
//! does not need anything better.

/// Average interleaved channels down to mono.
///
/// `channels == 0` yields an empty vector; `channels == 1` copies.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Resample mono `samples` from `source_rate` to `target_rate`.
///
/// Output length is `ceil(len * target / source)`.  Equal rates copy the
/// input; a zero rate on either side yields an empty vector.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }
    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let idx = pos as usize;
            if idx >= last {
                return samples[last.min(idx)];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        })
        .collect()
}

/// Encode `[-1.0, 1.0]` samples as signed 16-bit little-endian PCM.
/// Out-of-range samples are clamped.
pub fn encode_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

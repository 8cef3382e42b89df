//! Sample-format helpers shared by the mixer and the encoders.
//!
//! All functions work on interleaved f32 buffers in `[-1.0, 1.0]` with no
//! platform dependencies.

/// Convert interleaved audio from `in_channels` to `out_channels`.
///
/// Downmixing to mono averages all channels per frame. Mono is duplicated
/// into both sides of a stereo output. Extra channels beyond stereo are
/// dropped.
pub fn to_channels(samples: &[f32], in_channels: u16, out_channels: u16) -> Vec<f32> {
    let in_channels = in_channels.max(1) as usize;
    let out_channels = out_channels.max(1) as usize;
    if in_channels == out_channels {
        return samples.to_vec();
    }
    if out_channels == 1 {
        return downmix_to_mono(samples, in_channels);
    }

    let frame_count = samples.len() / in_channels;
    let mut output = vec![0.0f32; frame_count * out_channels];
    for frame in 0..frame_count {
        for ch in 0..out_channels {
            let source_ch = if in_channels == 1 { 0 } else { ch.min(in_channels - 1) };
            output[frame * out_channels + ch] = samples[frame * in_channels + source_ch];
        }
    }
    output
}

/// Downmix interleaved multi-channel audio to mono by averaging channels per frame.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let frame_count = samples.len() / channels;
    let scale = 1.0 / channels as f32;
    let mut mono = Vec::with_capacity(frame_count);
    for frame in 0..frame_count {
        let sum: f32 = samples[frame * channels..(frame + 1) * channels].iter().sum();
        mono.push(sum * scale);
    }
    mono
}

/// Linear interpolation resampling for interleaved audio.
///
/// Returns the input unchanged if the rates match.
pub fn resample(samples: &[f32], channels: u16, source_rate: u32, target_rate: u32) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if source_rate == target_rate || source_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let frame_count = samples.len() / channels;
    let ratio = f64::from(target_rate) / f64::from(source_rate);
    let output_frames = (frame_count as f64 * ratio) as usize;
    if output_frames == 0 {
        return Vec::new();
    }

    let mut output = vec![0.0f32; output_frames * channels];
    for i in 0..output_frames {
        let source_index = i as f64 / ratio;
        let index = source_index as usize;
        let fraction = (source_index - index as f64) as f32;

        for ch in 0..channels {
            if index + 1 < frame_count {
                output[i * channels + ch] = samples[index * channels + ch] * (1.0 - fraction)
                    + samples[(index + 1) * channels + ch] * fraction;
            } else if index < frame_count {
                output[i * channels + ch] = samples[index * channels + ch];
            }
        }
    }
    output
}

/// Convert f32 samples to 16-bit little-endian PCM, clamping out-of-range values.
pub fn to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

/// Decode 16-bit little-endian PCM back into f32 samples.
pub fn from_pcm16_le(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Peak absolute level of samples.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mono_to_stereo_duplicates() {
        assert_eq!(to_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_to_mono_averages() {
        let mono = to_channels(&[0.2, 0.8, 0.4, 0.6], 2, 1);
        assert_eq!(mono.len(), 2);
        assert_relative_eq!(mono[0], 0.5);
        assert_relative_eq!(mono[1], 0.5);
    }

    #[test]
    fn surround_to_stereo_keeps_front_pair() {
        let six = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(to_channels(&six, 6, 2), vec![1.0, 2.0]);
    }

    #[test]
    fn resample_same_rate_is_passthrough() {
        let samples = vec![1.0, 2.0, 3.0];
        assert_eq!(resample(&samples, 1, 48000, 48000), samples);
    }

    #[test]
    fn resample_upsample_2x() {
        let result = resample(&[0.0, 1.0], 1, 24000, 48000);
        assert_eq!(result.len(), 4);
        assert_relative_eq!(result[0], 0.0);
        assert_relative_eq!(result[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn resample_stereo_downsample() {
        let samples: Vec<f32> = (0..200).map(|i| i as f32 / 200.0).collect();
        let result = resample(&samples, 2, 48000, 24000);
        assert_eq!(result.len(), 100);
    }

    #[test]
    fn pcm16_conversion_clamps() {
        let pcm = to_pcm16_le(&[0.0, 1.0, -1.0, 2.0, -3.0]);
        assert_eq!(pcm.len(), 10);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 0);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[4], pcm[5]]), -i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[6], pcm[7]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[8], pcm[9]]), -i16::MAX);
    }

    #[test]
    fn pcm16_decode_inverts_encode() {
        let decoded = from_pcm16_le(&to_pcm16_le(&[0.5, -0.25]));
        assert_relative_eq!(decoded[0], 0.5, epsilon = 1e-4);
        assert_relative_eq!(decoded[1], -0.25, epsilon = 1e-4);
    }

    #[test]
    fn peak_is_absolute() {
        assert_eq!(peak_level(&[]), 0.0);
        assert_relative_eq!(peak_level(&[0.1, -0.5, 0.3]), 0.5);
    }
}

//! Sample decoding and channel mapping.

use super::{AudioFormat, FormatTag};

/// Converts an f32 sample to i16.
///
/// Input should be in the range [-1.0, 1.0]; values outside are clamped.
/// Scales by 32767 so that ±1.0 map symmetrically.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts an i16 sample to f32 in the range [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

#[inline]
fn u8_to_f32(sample: u8) -> f32 {
    (f32::from(sample) - 128.0) / 128.0
}

#[inline]
fn i24_to_f32(bytes: [u8; 3]) -> f32 {
    // Sign-extend through the top byte of an i32.
    let value = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
    value as f32 / 8_388_608.0
}

#[inline]
fn i32_to_f32(sample: i32) -> f32 {
    (f64::from(sample) / 2_147_483_648.0) as f32
}

/// Decodes little-endian interleaved PCM bytes into f32 samples.
///
/// A trailing partial sample is ignored. Returns an empty vector for layouts
/// [`AudioFormat::is_playable`] rejects.
pub fn decode_to_f32(format: &AudioFormat, bytes: &[u8]) -> Vec<f32> {
    if !format.is_playable() {
        return Vec::new();
    }

    match (format.format_tag, format.bits_per_sample) {
        (FormatTag::Pcm, 8) => bytes.iter().map(|&b| u8_to_f32(b)).collect(),
        (FormatTag::Pcm, 16) => bytes
            .chunks_exact(2)
            .map(|c| i16_to_f32(i16::from_le_bytes([c[0], c[1]])))
            .collect(),
        (FormatTag::Pcm, 24) => bytes
            .chunks_exact(3)
            .map(|c| i24_to_f32([c[0], c[1], c[2]]))
            .collect(),
        (FormatTag::Pcm, 32) => bytes
            .chunks_exact(4)
            .map(|c| i32_to_f32(i32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
        (FormatTag::IeeeFloat, 32) => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        _ => Vec::new(),
    }
}

/// Maps interleaved samples from one channel count to another.
///
/// Mono is duplicated into every output channel, and any layout folded to
/// mono is averaged. Otherwise channels are copied by index, with missing
/// outputs left silent and extra inputs dropped.
pub fn remap_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let from = usize::from(from);
    let to = usize::from(to);
    let frames = samples.len() / from;
    let mut output = Vec::with_capacity(frames * to);

    for frame in samples.chunks_exact(from) {
        if from == 1 {
            output.extend(std::iter::repeat(frame[0]).take(to));
        } else if to == 1 {
            output.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for channel in 0..to {
                output.push(frame.get(channel).copied().unwrap_or(0.0));
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_full_range() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_f32_to_i16_clamping() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_i16_to_f32_full_range() {
        let max = i16_to_f32(32767);
        assert!((max - 0.99997).abs() < 0.001);
        assert!((i16_to_f32(-32768) + 1.0).abs() < 0.001);
        assert_eq!(i16_to_f32(0), 0.0);
    }

    #[test]
    fn test_decode_pcm16() {
        let format = AudioFormat::pcm(8000, 1, 16);
        let bytes: Vec<u8> = [0i16, 16384, -32768]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let samples = decode_to_f32(&format, &bytes);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - 0.5).abs() < 0.001);
        assert!((samples[2] + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_decode_pcm8_is_unsigned() {
        let format = AudioFormat::pcm(8000, 1, 8);
        let samples = decode_to_f32(&format, &[128, 0, 255]);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] + 1.0).abs() < 0.001);
        assert!(samples[2] > 0.99);
    }

    #[test]
    fn test_decode_pcm24_sign_extends() {
        let format = AudioFormat::pcm(8000, 1, 24);
        // -1 in 24-bit two's complement, then +0x400000 (half scale)
        let samples = decode_to_f32(&format, &[0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x40]);
        assert!(samples[0] < 0.0 && samples[0] > -0.001);
        assert!((samples[1] - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_decode_float() {
        let format = AudioFormat::ieee_float(8000, 1);
        let bytes: Vec<u8> = [0.25f32, -0.75]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        assert_eq!(decode_to_f32(&format, &bytes), vec![0.25, -0.75]);
    }

    #[test]
    fn test_decode_ignores_partial_sample() {
        let format = AudioFormat::pcm(8000, 1, 16);
        assert_eq!(decode_to_f32(&format, &[0, 0, 7]).len(), 1);
    }

    #[test]
    fn test_remap_mono_to_stereo() {
        assert_eq!(remap_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_remap_stereo_to_mono_averages() {
        let out = remap_channels(&[0.5, -0.5, 0.2, 0.4], 2, 1);
        assert_eq!(out.len(), 2);
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_remap_stereo_to_quad_pads_silence() {
        let out = remap_channels(&[0.1, 0.2], 2, 4);
        assert_eq!(out, vec![0.1, 0.2, 0.0, 0.0]);
    }

    #[test]
    fn test_remap_same_count_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(remap_channels(&samples, 3, 3), samples);
    }
}

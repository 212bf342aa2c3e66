//! Sample rate conversion.
//!
//! Linear interpolation only. Output backends use it to bring submitted
//! buffers to the device rate; pitch changes are applied separately at
//! render time.

/// Linear interpolation between `a` and `b`.
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Resamples interleaved audio from one sample rate to another.
///
/// Channels are interpolated independently. A trailing partial frame is
/// dropped. Output length is `ceil(frames * to_rate / from_rate)` frames.
pub fn resample_interleaved(
    samples: &[f32],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || channels == 0 || from_rate == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / channels;
    if frames == 0 {
        return Vec::new();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let output_frames = (frames as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_frames * channels);

    for i in 0..output_frames {
        let src_pos = i as f64 / ratio;
        let src_idx = (src_pos.floor() as usize).min(frames - 1);
        let next_idx = (src_idx + 1).min(frames - 1);
        let frac = (src_pos - src_idx as f64).clamp(0.0, 1.0) as f32;

        for channel in 0..channels {
            let a = samples[src_idx * channels + channel];
            let b = samples[next_idx * channels + channel];
            output.push(lerp(a, b, frac));
        }
    }

    output
}

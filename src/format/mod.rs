//! PCM layout descriptions and sample conversion utilities.
//!
//! [`AudioFormat`] is the key the voice pool matches voices on, so it is a
//! plain value type with `Eq` and `Hash`. The conversion helpers are used by
//! output backends that need the data as `f32` frames:
//! - Sample decoding (PCM bytes → f32, f32 ↔ i16)
//! - Channel mapping (any count → any count)
//! - Sample rate conversion (resampling)

mod convert;
mod resample;

use std::fmt;
use std::time::Duration;

pub use convert::{decode_to_f32, f32_to_i16, i16_to_f32, remap_channels};
pub use resample::{lerp, resample_interleaved};

/// Sample encoding of a PCM stream, using the WAVE format tag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormatTag {
    /// Integer PCM (WAVE tag 1). 8-bit samples are unsigned, wider ones signed.
    #[default]
    Pcm,
    /// IEEE 754 floating point samples (WAVE tag 3).
    IeeeFloat,
}

impl FormatTag {
    /// Returns the WAVE format tag value.
    #[must_use]
    pub fn wave_tag(self) -> u16 {
        match self {
            Self::Pcm => 1,
            Self::IeeeFloat => 3,
        }
    }

    /// Maps a WAVE format tag value, returning `None` for encodings this
    /// crate cannot play.
    #[must_use]
    pub fn from_wave_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(Self::Pcm),
            3 => Some(Self::IeeeFloat),
            _ => None,
        }
    }
}

/// Describes the byte layout of PCM audio.
///
/// Two formats compare equal only if every field matches; a voice created
/// for one format is never reused for another.
///
/// # Example
///
/// ```
/// use stream_playback::AudioFormat;
///
/// let format = AudioFormat::pcm(48000, 2, 16);
/// assert_eq!(format.block_align, 4);
/// assert_eq!(format.byte_rate, 192_000);
/// assert_eq!(format.align_down(1001), 1000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Sample encoding.
    pub format_tag: FormatTag,
    /// Interleaved channel count.
    pub channels: u16,
    /// Frames per second.
    pub sample_rate: u32,
    /// Bytes per second of audio.
    pub byte_rate: u32,
    /// Bytes per frame (all channels of one sample instant).
    pub block_align: u16,
    /// Bits per single-channel sample.
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Creates an integer PCM format, deriving block align and byte rate.
    #[must_use]
    pub fn pcm(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self::with_tag(FormatTag::Pcm, sample_rate, channels, bits_per_sample)
    }

    /// Creates a 32-bit float format.
    #[must_use]
    pub fn ieee_float(sample_rate: u32, channels: u16) -> Self {
        Self::with_tag(FormatTag::IeeeFloat, sample_rate, channels, 32)
    }

    fn with_tag(format_tag: FormatTag, sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        let block_align = channels * bits_per_sample.div_ceil(8);
        Self {
            format_tag,
            channels,
            sample_rate,
            byte_rate: sample_rate * u32::from(block_align),
            block_align,
            bits_per_sample,
        }
    }

    /// Bytes per single-channel sample.
    #[must_use]
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample.div_ceil(8))
    }

    /// Rounds a byte offset down to a frame boundary.
    #[must_use]
    pub fn align_down(&self, bytes: u64) -> u64 {
        let align = u64::from(self.block_align.max(1));
        bytes - bytes % align
    }

    /// Number of whole frames in `bytes`.
    #[must_use]
    pub fn frames_in(&self, bytes: u64) -> u64 {
        bytes / u64::from(self.block_align.max(1))
    }

    /// Playback duration of `bytes` of audio in this format.
    #[must_use]
    pub fn duration_of(&self, bytes: u64) -> Duration {
        if self.byte_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / f64::from(self.byte_rate))
    }

    /// Frame-aligned byte offset corresponding to `duration`.
    #[must_use]
    pub fn bytes_for(&self, duration: Duration) -> u64 {
        let bytes = (duration.as_secs_f64() * f64::from(self.byte_rate)) as u64;
        self.align_down(bytes)
    }

    /// Returns true if the output backends can decode this layout.
    #[must_use]
    pub fn is_playable(&self) -> bool {
        let width_ok = match self.format_tag {
            FormatTag::Pcm => matches!(self.bits_per_sample, 8 | 16 | 24 | 32),
            FormatTag::IeeeFloat => self.bits_per_sample == 32,
        };
        width_ok
            && self.channels > 0
            && self.sample_rate > 0
            && usize::from(self.block_align) == self.bytes_per_sample() * usize::from(self.channels)
    }
}

impl Default for AudioFormat {
    /// 16-bit PCM stereo at 44.1 kHz.
    fn default() -> Self {
        Self::pcm(44100, 2, 16)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoding = match self.format_tag {
            FormatTag::Pcm => "PCM",
            FormatTag::IeeeFloat => "float",
        };
        write!(
            f,
            "{encoding} {}-bit {}Hz {}ch",
            self.bits_per_sample, self.sample_rate, self.channels
        )
    }
}

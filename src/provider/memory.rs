//! In-memory buffer provider.

use std::sync::Arc;
use std::time::Duration;

use super::{BufferProvider, Produced};
use crate::format::f32_to_i16;
use crate::{AudioFormat, FormatTag, ProviderError};

/// A provider that serves PCM bytes held in memory.
///
/// Useful for tests, generated tones, and sounds small enough to keep
/// resident but long enough to stream. The optional chunk limit caps how
/// many bytes each `produce_next` call writes, which mimics decoders that
/// return less than requested.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stream_playback::{AudioFormat, BufferProvider, MemoryProvider, Produced};
///
/// let format = AudioFormat::pcm(8000, 1, 16);
/// let mut provider = MemoryProvider::sine(format, 440.0, Duration::from_millis(100));
/// assert_eq!(provider.total_size(), 1600);
///
/// let mut slot = [0u8; 1024];
/// assert_eq!(provider.produce_next(&mut slot), Produced::Bytes(1024));
/// assert_eq!(provider.produce_next(&mut slot), Produced::Bytes(576));
/// assert_eq!(provider.produce_next(&mut slot), Produced::EndOfData);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    format: AudioFormat,
    data: Arc<[u8]>,
    cursor: usize,
    chunk_limit: Option<usize>,
}

impl MemoryProvider {
    /// Creates a provider serving `data` in the given format.
    pub fn new(format: AudioFormat, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            format,
            data: data.into(),
            cursor: 0,
            chunk_limit: None,
        }
    }

    /// Creates a provider holding `duration` of silence.
    pub fn silence(format: AudioFormat, duration: Duration) -> Self {
        let mut data = Vec::new();
        let frames = format.frames_in(format.bytes_for(duration));
        for _ in 0..frames * u64::from(format.channels) {
            encode_sample(&format, 0.0, &mut data);
        }
        Self::new(format, data)
    }

    /// Creates a provider holding a sine tone at `frequency` Hz, written to
    /// every channel at 0.5 amplitude.
    pub fn sine(format: AudioFormat, frequency: f64, duration: Duration) -> Self {
        let mut data = Vec::new();
        let frames = format.frames_in(format.bytes_for(duration));
        let sample_rate = f64::from(format.sample_rate.max(1));

        for i in 0..frames {
            let t = i as f64 / sample_rate;
            let value = (0.5 * (2.0 * std::f64::consts::PI * frequency * t).sin()) as f32;
            for _ in 0..format.channels {
                encode_sample(&format, value, &mut data);
            }
        }

        Self::new(format, data)
    }

    /// Limits every `produce_next` call to at most `bytes` bytes.
    #[must_use]
    pub fn with_chunk_limit(mut self, bytes: usize) -> Self {
        self.chunk_limit = Some(bytes.max(1));
        self
    }

    /// Returns the full backing data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes not yet produced.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }
}

impl BufferProvider for MemoryProvider {
    fn produce_next(&mut self, out: &mut [u8]) -> Produced {
        if self.remaining() == 0 {
            return Produced::EndOfData;
        }

        let mut len = out.len().min(self.remaining());
        if let Some(limit) = self.chunk_limit {
            len = len.min(limit);
        }

        out[..len].copy_from_slice(&self.data[self.cursor..self.cursor + len]);
        self.cursor += len;
        Produced::Bytes(len)
    }

    fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn current_position(&self) -> u64 {
        self.cursor as u64
    }

    fn seek(&mut self, position: u64) -> Result<(), ProviderError> {
        let total = self.total_size();
        if position > total {
            return Err(ProviderError::OutOfRange { position, total });
        }
        self.cursor = position as usize;
        Ok(())
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

/// Appends one sample in the format's little-endian encoding.
fn encode_sample(format: &AudioFormat, value: f32, out: &mut Vec<u8>) {
    let value = value.clamp(-1.0, 1.0);
    match (format.format_tag, format.bits_per_sample) {
        (FormatTag::IeeeFloat, _) => out.extend_from_slice(&value.to_le_bytes()),
        (FormatTag::Pcm, 8) => out.push(((value * 127.0) + 128.0) as u8),
        (FormatTag::Pcm, 24) => {
            let scaled = (value * 8_388_607.0) as i32;
            out.extend_from_slice(&scaled.to_le_bytes()[..3]);
        }
        (FormatTag::Pcm, 32) => {
            let scaled = (f64::from(value) * 2_147_483_647.0) as i32;
            out.extend_from_slice(&scaled.to_le_bytes());
        }
        (FormatTag::Pcm, _) => out.extend_from_slice(&f32_to_i16(value).to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_provider_serves_in_order() {
        let mut provider = MemoryProvider::new(AudioFormat::default(), (0..10u8).collect::<Vec<_>>());
        let mut out = [0u8; 4];

        assert_eq!(provider.produce_next(&mut out), Produced::Bytes(4));
        assert_eq!(out, [0, 1, 2, 3]);
        assert_eq!(provider.produce_next(&mut out), Produced::Bytes(4));
        assert_eq!(provider.produce_next(&mut out), Produced::Bytes(2));
        assert_eq!(&out[..2], &[8, 9]);
        assert_eq!(provider.produce_next(&mut out), Produced::EndOfData);
    }

    #[test]
    fn test_memory_provider_chunk_limit() {
        let mut provider = MemoryProvider::new(AudioFormat::default(), vec![0u8; 100]).with_chunk_limit(30);
        let mut out = [0u8; 64];
        assert_eq!(provider.produce_next(&mut out), Produced::Bytes(30));
        assert_eq!(provider.current_position(), 30);
    }

    #[test]
    fn test_memory_provider_rewind() {
        let mut provider = MemoryProvider::new(AudioFormat::default(), vec![1u8; 8]);
        let mut out = [0u8; 8];
        provider.produce_next(&mut out);
        assert_eq!(provider.produce_next(&mut out), Produced::EndOfData);
        provider.rewind();
        assert_eq!(provider.produce_next(&mut out), Produced::Bytes(8));
    }

    #[test]
    fn test_memory_provider_seek() {
        let mut provider = MemoryProvider::new(AudioFormat::default(), vec![0u8; 40]);
        provider.seek(20).unwrap();
        assert_eq!(provider.current_position(), 20);
        assert_eq!(provider.remaining(), 20);

        let err = provider.seek(41).unwrap_err();
        assert!(matches!(err, ProviderError::OutOfRange { position: 41, total: 40 }));
        assert_eq!(provider.current_position(), 20);
    }

    #[test]
    fn test_silence_length() {
        let format = AudioFormat::pcm(16000, 1, 16);
        let provider = MemoryProvider::silence(format, Duration::from_millis(100));
        assert_eq!(provider.total_size(), 3200);
        assert!(provider.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_silence_8bit_is_midpoint() {
        let format = AudioFormat::pcm(8000, 1, 8);
        let provider = MemoryProvider::silence(format, Duration::from_millis(10));
        assert_eq!(provider.total_size(), 80);
        assert!(provider.data().iter().all(|&b| b == 128));
    }

    #[test]
    fn test_sine_writes_every_channel() {
        let format = AudioFormat::pcm(8000, 2, 16);
        let provider = MemoryProvider::sine(format, 1000.0, Duration::from_millis(10));
        assert_eq!(provider.total_size(), 320);

        let samples: Vec<i16> = provider
            .data()
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        for frame in samples.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert!(samples.iter().any(|&s| s > 10_000));
        assert!(samples.iter().all(|&s| s.unsigned_abs() <= 16_384));
    }

    #[test]
    fn test_sine_float_format() {
        let format = AudioFormat::ieee_float(8000, 1);
        let provider = MemoryProvider::sine(format, 1000.0, Duration::from_millis(10));
        assert_eq!(provider.total_size(), 320);
    }
}

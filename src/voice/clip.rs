//! Resident audio played through a single voice.

use std::sync::Arc;
use std::time::Duration;

use crate::{AudioFormat, BufferProvider, Produced};

/// Fully-resident PCM audio.
///
/// Cloning is cheap: the bytes are shared. A voice playing a clip keeps its
/// own clone until it stops, so the caller may drop theirs at any time.
#[derive(Debug, Clone)]
pub struct Clip {
    format: AudioFormat,
    data: Arc<[u8]>,
}

impl Clip {
    /// Wraps PCM bytes in the given format.
    pub fn new(format: AudioFormat, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            format,
            data: data.into(),
        }
    }

    /// Reads a provider from its current position to the end.
    ///
    /// Transient zero-byte reads are retried a bounded number of times
    /// before the clip is cut short.
    pub fn from_provider(provider: &mut dyn BufferProvider) -> Self {
        const MAX_EMPTY_READS: usize = 64;

        let format = provider.format();
        let mut data = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        let mut empty_reads = 0;

        loop {
            match provider.produce_next(&mut chunk) {
                Produced::EndOfData => break,
                Produced::Bytes(0) => {
                    empty_reads += 1;
                    if empty_reads >= MAX_EMPTY_READS {
                        tracing::warn!("provider stalled while loading clip, truncating at {} bytes", data.len());
                        break;
                    }
                }
                Produced::Bytes(n) => {
                    empty_reads = 0;
                    data.extend_from_slice(&chunk[..n.min(chunk.len())]);
                }
            }
        }

        Self::new(format, data)
    }

    /// Layout of the bytes.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// The PCM bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn shared_data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the clip holds no audio.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback duration at normal pitch.
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryProvider;

    #[test]
    fn test_clip_from_provider_reads_everything() {
        let bytes: Vec<u8> = (0..200u8).collect();
        let mut provider =
            MemoryProvider::new(AudioFormat::default(), bytes.clone()).with_chunk_limit(17);
        let clip = Clip::from_provider(&mut provider);
        assert_eq!(clip.data(), &bytes[..]);
        assert_eq!(clip.format(), AudioFormat::default());
    }

    #[test]
    fn test_clip_duration() {
        let clip = Clip::new(AudioFormat::default(), vec![0u8; 176_400]);
        assert_eq!(clip.duration(), Duration::from_secs(1));
        assert_eq!(clip.len(), 176_400);
        assert!(!clip.is_empty());
    }

    #[test]
    fn test_clip_clone_shares_data() {
        let clip = Clip::new(AudioFormat::default(), vec![1u8; 4]);
        let copy = clip.clone();
        assert!(Arc::ptr_eq(&clip.shared_data(), &copy.shared_data()));
    }
}

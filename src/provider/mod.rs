//! The pull interface streams read audio from.
//!
//! A [`BufferProvider`] is whatever produces PCM bytes on demand: a file
//! decoder, a network reader, a synthesizer. [`MemoryProvider`] is the
//! in-memory implementation used by tests and demos.

mod memory;

pub use memory::MemoryProvider;

use crate::{AudioFormat, ProviderError};

/// Outcome of one [`BufferProvider::produce_next`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Produced {
    /// This many bytes were written to the front of the output slice.
    ///
    /// Zero means "nothing available right now"; the stream retries.
    Bytes(usize),
    /// The provider has no more data until it is rewound or seeked.
    EndOfData,
}

impl Produced {
    /// Maps the negative-sentinel convention used by many decoders:
    /// negative means end of data, anything else is a byte count.
    #[must_use]
    pub fn from_raw(written: isize) -> Self {
        usize::try_from(written).map_or(Self::EndOfData, Self::Bytes)
    }

    /// Returns true for [`Produced::EndOfData`].
    #[must_use]
    pub fn is_end(self) -> bool {
        matches!(self, Self::EndOfData)
    }
}

/// A source of PCM bytes for an [`AudioStream`](crate::AudioStream).
///
/// `produce_next` is called from the pool's worker thread. `seek`, `rewind`
/// and `format` are called either from the worker or from the caller thread
/// while the stream is paused, never concurrently with a fill.
///
/// Implementations must tolerate output slices whose length is not a
/// multiple of their internal frame size, and must return
/// [`Produced::EndOfData`] rather than fail when exhausted. `total_size`
/// must be the real length: a non-looping stream ends once that many bytes
/// have started playing.
pub trait BufferProvider: Send {
    /// Writes up to `out.len()` bytes of audio into `out`.
    fn produce_next(&mut self, out: &mut [u8]) -> Produced;

    /// Moves back to the first byte.
    fn rewind(&mut self);

    /// Total length of the audio in bytes.
    fn total_size(&self) -> u64;

    /// Byte offset of the next byte `produce_next` will write.
    fn current_position(&self) -> u64;

    /// Moves to an absolute, frame-aligned byte offset.
    fn seek(&mut self, position: u64) -> Result<(), ProviderError>;

    /// Returns to a known-good default state after a failed seek.
    fn reset(&mut self) {
        self.rewind();
    }

    /// Layout of the bytes this provider produces.
    fn format(&self) -> AudioFormat;
}

impl<P: BufferProvider + ?Sized> BufferProvider for Box<P> {
    fn produce_next(&mut self, out: &mut [u8]) -> Produced {
        (**self).produce_next(out)
    }

    fn rewind(&mut self) {
        (**self).rewind();
    }

    fn total_size(&self) -> u64 {
        (**self).total_size()
    }

    fn current_position(&self) -> u64 {
        (**self).current_position()
    }

    fn seek(&mut self, position: u64) -> Result<(), ProviderError> {
        (**self).seek(position)
    }

    fn reset(&mut self) {
        (**self).reset();
    }

    fn format(&self) -> AudioFormat {
        (**self).format()
    }
}

//! Identifier types for voices and streams.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_VOICE: AtomicU64 = AtomicU64::new(1);
static NEXT_STREAM: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a playback voice.
///
/// Hardware callbacks carry a `VoiceId` back to the caller thread, where the
/// pool uses it to find the voice the event belongs to. Ids are never reused
/// within a process.
///
/// # Example
///
/// ```
/// use stream_playback::VoiceId;
///
/// let a = VoiceId::next();
/// let b = VoiceId::next();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(u64);

impl VoiceId {
    /// Allocates a fresh id.
    pub fn next() -> Self {
        Self(NEXT_VOICE.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw id value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice#{}", self.0)
    }
}

/// Unique identifier for an audio stream, used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    /// Allocates a fresh id.
    pub fn next() -> Self {
        Self(NEXT_STREAM.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

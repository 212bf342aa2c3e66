//! Error types for stream-playback.
//!
//! Errors are split into two categories:
//! - **Call errors** ([`PlaybackError`]): the requested operation did not happen
//! - **Runtime degradations**: seek or submission failures while a stream is
//!   running, surfaced via [`EventCallback`](crate::EventCallback) and logged
//!
//! [`ProviderError`] is what a [`BufferProvider`](crate::BufferProvider)
//! reports when it cannot seek.

use crate::VoiceId;

/// Errors returned by pool, voice, and stream operations.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// No default output device is configured on this system.
    #[error("no default output device configured")]
    NoOutputDevice,

    /// The requested output device was not found.
    #[error("output device not found: {name}")]
    DeviceNotFound {
        /// Name of the device that wasn't found.
        name: String,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    BackendError(String),

    /// The output backend cannot play this PCM layout.
    #[error("unsupported audio format: {format}")]
    UnsupportedFormat {
        /// Description of the rejected format.
        format: String,
    },

    /// A voice rejected a buffer submission.
    #[error("buffer submission to {voice} failed: {reason}")]
    SubmitFailed {
        /// Voice the buffer was submitted to.
        voice: VoiceId,
        /// Why the submission failed.
        reason: String,
    },

    /// A voice's hardware queue has no room for another buffer.
    #[error("voice queue is full ({capacity} buffers)")]
    QueueFull {
        /// Maximum number of queued buffers.
        capacity: usize,
    },

    /// The streaming configuration is inconsistent.
    #[error("invalid streaming configuration: {reason}")]
    InvalidConfig {
        /// Which constraint was violated.
        reason: String,
    },

    /// The voice pool's worker has been shut down.
    #[error("voice pool has been shut down")]
    PoolShutDown,

    /// The worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

impl PlaybackError {
    /// Creates a backend error from anything displayable.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::BackendError(err.to_string())
    }

    /// Creates a submission failure for the given voice.
    pub fn submit_failed(voice: VoiceId, reason: impl Into<String>) -> Self {
        Self::SubmitFailed {
            voice,
            reason: reason.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Errors a [`BufferProvider`](crate::BufferProvider) may report from `seek`.
///
/// A failed seek never stops the stream: it is logged, a
/// [`PlaybackEvent::SeekFailed`](crate::PlaybackEvent::SeekFailed) is emitted,
/// and the provider is asked to reset itself.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The requested offset lies beyond the end of the data.
    #[error("seek to byte {position} is out of range (total {total})")]
    OutOfRange {
        /// Requested byte offset.
        position: u64,
        /// Total bytes available.
        total: u64,
    },

    /// The provider does not support seeking or the seek failed.
    #[error("seek failed: {reason}")]
    SeekFailed {
        /// Why the seek failed.
        reason: String,
    },

    /// I/O error from the underlying reader.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Custom error for user-implemented providers.
    #[error("{0}")]
    Custom(String),
}

impl ProviderError {
    /// Creates a custom provider error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a seek failure with the given reason.
    pub fn seek_failed(reason: impl Into<String>) -> Self {
        Self::SeekFailed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_error_display() {
        let err = PlaybackError::DeviceNotFound {
            name: "USB DAC".to_string(),
        };
        assert_eq!(err.to_string(), "output device not found: USB DAC");
    }

    #[test]
    fn test_submit_failed_names_voice() {
        let err = PlaybackError::submit_failed(VoiceId::from_raw(7), "device lost");
        assert_eq!(err.to_string(), "buffer submission to voice#7 failed: device lost");
    }

    #[test]
    fn test_invalid_config() {
        let err = PlaybackError::invalid_config("slot_count must be at least 2");
        assert!(err.to_string().contains("slot_count"));
    }

    #[test]
    fn test_provider_error_custom() {
        let err = ProviderError::custom("decoder gave up");
        assert_eq!(err.to_string(), "decoder gave up");
    }

    #[test]
    fn test_provider_error_out_of_range() {
        let err = ProviderError::OutOfRange {
            position: 10,
            total: 4,
        };
        assert_eq!(err.to_string(), "seek to byte 10 is out of range (total 4)");
    }

    #[test]
    fn test_provider_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: ProviderError = io_err.into();
        assert!(err.to_string().contains("short read"));
    }
}

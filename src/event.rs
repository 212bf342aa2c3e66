//! Runtime events for monitoring playback.
//!
//! Events are non-fatal notifications. Playback continues (or degrades to
//! silence) after any event is emitted; they're for logging/metrics and UI
//! updates, not error handling.

use std::sync::Arc;

use crate::{AudioFormat, StreamId, VoiceId};

/// Runtime events emitted by voices and streams.
///
/// The callback may run on the caller thread (while [`VoicePool::pump`] is
/// dispatching hardware events) or on the pool's worker thread (while a fill
/// runs). Keep it short and non-blocking.
///
/// [`VoicePool::pump`]: crate::VoicePool::pump
///
/// # Example
///
/// ```
/// use stream_playback::PlaybackEvent;
///
/// fn handle_event(event: PlaybackEvent) {
///     match event {
///         PlaybackEvent::StreamEnded { stream } => {
///             eprintln!("{stream} finished");
///         }
///         PlaybackEvent::SeekFailed { stream, position, error } => {
///             eprintln!("{stream} could not seek to {position}: {error}");
///         }
///         other => eprintln!("{other:?}"),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// The pool created a new hardware voice.
    VoiceCreated {
        /// Id of the new voice.
        voice: VoiceId,
        /// Format the voice plays.
        format: AudioFormat,
    },

    /// A non-looping stream played its last byte.
    StreamEnded {
        /// Stream that ended.
        stream: StreamId,
    },

    /// A looping stream wrapped back to the start of its provider.
    StreamRewound {
        /// Stream that wrapped.
        stream: StreamId,
    },

    /// The provider rejected a seek and was reset.
    ///
    /// The stream keeps running from wherever the provider reset to.
    SeekFailed {
        /// Stream whose provider failed.
        stream: StreamId,
        /// Requested byte offset.
        position: u64,
        /// Description of the error.
        error: String,
    },

    /// A voice rejected a buffer.
    ///
    /// The affected bytes are skipped. No retry happens beyond the next
    /// scheduled fill.
    SubmitFailed {
        /// Voice that rejected the buffer.
        voice: VoiceId,
        /// Description of the error.
        error: String,
    },

    /// A provider swap changed the stream's format; the stream will bind a
    /// new voice on the next `prepare` or `play`.
    FormatChanged {
        /// Stream whose format changed.
        stream: StreamId,
        /// Format before the swap.
        previous: AudioFormat,
        /// Format after the swap.
        current: AudioFormat,
    },
}

/// Callback type for receiving runtime events.
///
/// Register an event callback via [`VoicePoolBuilder::on_event()`].
///
/// [`VoicePoolBuilder::on_event()`]: crate::VoicePoolBuilder::on_event
pub type EventCallback = Arc<dyn Fn(PlaybackEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use stream_playback::{event_callback, PlaybackEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(PlaybackEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

//! # stream-playback
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Streaming audio playback over a pool of hardware voices.
//!
//! `stream-playback` plays audio that is too large (or too live) to hold in
//! memory by pulling it from a [`BufferProvider`] a slot at a time on a
//! background worker, while a small ring of slots stays queued on the
//! hardware. Short sounds can be played straight from memory as [`Clip`]s on
//! the same voices.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use stream_playback::{AudioFormat, AudioStream, MemoryProvider, VoicePool};
//!
//! let pool = VoicePool::builder()
//!     .slot_size(32 * 1024)
//!     .on_event(|e| tracing::info!(?e, "playback event"))
//!     .build()?;
//!
//! let format = AudioFormat::pcm(44100, 2, 16);
//! let stream = AudioStream::new(&pool, MemoryProvider::sine(format, 440.0, Duration::from_secs(3)));
//! stream.set_looping(true);
//! stream.play()?;
//!
//! // Drive hardware callbacks from your main loop
//! loop {
//!     pool.pump();
//!     std::thread::sleep(Duration::from_millis(10));
//! #   break;
//! }
//! # Ok::<(), stream_playback::PlaybackError>(())
//! ```
//!
//! ## Architecture
//!
//! The crate keeps three kinds of threads apart:
//!
//! - **Backend threads**: render callbacks that only post buffer events
//! - **Worker thread**: one per pool, runs fills and provider rewinds in FIFO order
//! - **Caller thread**: controls streams and applies buffer events via [`VoicePool::pump`]
//!
//! Stream position only moves when the hardware reports that a slot started
//! playing, so it tracks what is audible rather than what was read.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod config;
mod error;
mod event;
pub mod format;
mod id;
mod pool;
mod provider;
mod stream;
pub mod voice;

pub use builder::VoicePoolBuilder;
pub use config::{
    StreamingConfig, DEFAULT_LOW_WATER_MARK, DEFAULT_SLOT_COUNT, DEFAULT_SLOT_SIZE,
    MAX_FREQUENCY_RATIO, MIN_FREQUENCY_RATIO,
};
pub use error::{PlaybackError, ProviderError};
pub use event::{event_callback, EventCallback, PlaybackEvent};
pub use format::{AudioFormat, FormatTag};
pub use id::{StreamId, VoiceId};
pub use pool::VoicePool;
pub use provider::{BufferProvider, MemoryProvider, Produced};
pub use stream::{AudioStream, PlaybackState, StreamStats};
pub use voice::{
    default_output_device_name, list_output_devices, BufferEdge, Clip, CpalDevice, LoopCount,
    MockDevice, MockVoiceHandle, OutputDevice, PlaybackVoice, SubmitBuffer, VoiceBackend,
    VoiceEvent, VoiceNotifier,
};

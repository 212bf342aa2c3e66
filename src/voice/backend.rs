//! Output backend traits.
//!
//! An [`OutputDevice`] creates one [`VoiceBackend`] per voice. Backends run
//! their own callback threads and must not touch engine state from them;
//! the only way back into the engine is the [`VoiceNotifier`] each backend
//! receives at creation, which posts [`VoiceEvent`]s onto the pool's queue
//! for the caller thread to dispatch.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::{AudioFormat, PlaybackError, VoiceId};

/// Which edge of a buffer's playback an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEdge {
    /// The buffer's first frame reached the output.
    Start,
    /// The buffer finished playing, or was flushed.
    End,
}

/// A hardware notification, queued for the caller thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceEvent {
    /// Voice that raised the event.
    pub voice: VoiceId,
    /// Tag of the buffer the event refers to.
    pub tag: u64,
    /// Start or end.
    pub edge: BufferEdge,
}

/// Posts buffer events from a backend's callback thread.
///
/// Sending never blocks. If the pool is gone the event is silently dropped.
#[derive(Debug, Clone)]
pub struct VoiceNotifier {
    voice: VoiceId,
    tx: UnboundedSender<VoiceEvent>,
}

impl VoiceNotifier {
    pub(crate) fn new(voice: VoiceId, tx: UnboundedSender<VoiceEvent>) -> Self {
        Self { voice, tx }
    }

    /// Voice this notifier reports for.
    pub fn voice(&self) -> VoiceId {
        self.voice
    }

    /// Reports that the buffer with `tag` began playing.
    pub fn buffer_started(&self, tag: u64) {
        self.post(tag, BufferEdge::Start);
    }

    /// Reports that the buffer with `tag` finished or was flushed.
    pub fn buffer_ended(&self, tag: u64) {
        self.post(tag, BufferEdge::End);
    }

    fn post(&self, tag: u64, edge: BufferEdge) {
        let event = VoiceEvent {
            voice: self.voice,
            tag,
            edge,
        };
        if self.tx.send(event).is_err() {
            tracing::trace!(voice = %self.voice, "event queue closed, dropping {:?}", edge);
        }
    }
}

/// How many times a submitted buffer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    /// Play once.
    Once,
    /// Play this many times in total.
    Times(u32),
    /// Repeat until the loop is exited or the voice stops.
    Infinite,
}

impl LoopCount {
    /// Maps a caller-facing repeat count: 0 means forever.
    #[must_use]
    pub fn from_times(times: u32) -> Self {
        match times {
            0 => Self::Infinite,
            1 => Self::Once,
            n => Self::Times(n),
        }
    }

    /// Plays remaining after the current one, or `None` for infinite.
    #[must_use]
    pub fn repeats(self) -> Option<u32> {
        match self {
            Self::Once => Some(0),
            Self::Times(n) => Some(n.saturating_sub(1)),
            Self::Infinite => None,
        }
    }

    /// Returns true unless the buffer plays exactly once.
    #[must_use]
    pub fn is_looping(self) -> bool {
        !matches!(self, Self::Once)
    }
}

/// A buffer handed to a backend.
#[derive(Debug, Clone)]
pub struct SubmitBuffer {
    /// PCM bytes in the voice's format.
    pub data: Arc<[u8]>,
    /// Opaque tag echoed back in this buffer's events.
    pub tag: u64,
    /// How many times to play it.
    pub loops: LoopCount,
}

/// One hardware output voice.
///
/// A voice plays submitted buffers in order. `queued_buffer_count` counts
/// every buffer submitted and not yet ended, including the one playing.
/// `flush` drops every queued buffer; the backend may report
/// [`BufferEdge::End`] for them.
pub trait VoiceBackend: Send {
    /// Queues a buffer behind any already queued.
    fn submit(&mut self, buffer: SubmitBuffer) -> Result<(), PlaybackError>;

    /// Starts or resumes output.
    fn start(&mut self) -> Result<(), PlaybackError>;

    /// Halts output, keeping queued buffers.
    fn stop(&mut self);

    /// Drops every queued buffer.
    fn flush(&mut self);

    /// Lets the current looping buffer finish its pass and stop repeating.
    fn exit_loop(&mut self);

    /// Sets linear gain.
    fn set_volume(&mut self, volume: f32);

    /// Sets playback speed as a frequency ratio (1.0 = unchanged).
    fn set_frequency_ratio(&mut self, ratio: f32);

    /// Buffers submitted and not yet ended.
    fn queued_buffer_count(&self) -> usize;
}

/// Creates voices on an output device.
pub trait OutputDevice: Send + Sync {
    /// Creates a stopped voice for `format`. Events must go through `notifier`.
    fn create_voice(
        &self,
        format: AudioFormat,
        notifier: VoiceNotifier,
    ) -> Result<Box<dyn VoiceBackend>, PlaybackError>;

    /// Human-readable device name.
    fn name(&self) -> String;
}

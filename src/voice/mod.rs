//! Pooled playback voices and the output backends behind them.
//!
//! A [`PlaybackVoice`] owns one hardware voice and is bound to at most one
//! thing at a time: a resident [`Clip`] or an [`AudioStream`]. Voices are
//! handed out by the [`VoicePool`] and return to it when they stop.
//!
//! [`AudioStream`]: crate::AudioStream
//! [`VoicePool`]: crate::VoicePool

mod backend;
mod clip;
mod cpal_device;
mod mock;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub use backend::{
    BufferEdge, LoopCount, OutputDevice, SubmitBuffer, VoiceBackend, VoiceEvent, VoiceNotifier,
};
pub use clip::Clip;
pub use cpal_device::{default_output_device_name, list_output_devices, CpalDevice};
pub use mock::{MockDevice, MockVoiceHandle};

use crate::pool::PoolShared;
use crate::stream::StreamShared;
use crate::{AudioFormat, PlaybackError, StreamingConfig, VoiceId};

/// What a voice is currently playing.
enum Binding {
    Idle,
    /// The clip is kept alive until the voice stops.
    OneShot {
        clip: Clip,
        loops: LoopCount,
    },
    Stream(Weak<StreamShared>),
}

/// A pooled hardware voice.
///
/// Obtained from [`VoicePool::acquire`](crate::VoicePool::acquire) or the
/// pool's one-shot helpers. Hardware events for the voice are dispatched by
/// [`VoicePool::pump`](crate::VoicePool::pump) on the caller thread.
pub struct PlaybackVoice {
    id: VoiceId,
    format: AudioFormat,
    backend: Mutex<Box<dyn VoiceBackend>>,
    binding: Mutex<Binding>,
    /// Flush generation. Every submission is tagged with it; events carrying
    /// an older tag belong to flushed buffers.
    epoch: AtomicU64,
    notifier: VoiceNotifier,
    pool: Weak<PoolShared>,
    config: Arc<StreamingConfig>,
}

impl PlaybackVoice {
    pub(crate) fn new(
        format: AudioFormat,
        backend: Box<dyn VoiceBackend>,
        notifier: VoiceNotifier,
        pool: Weak<PoolShared>,
        config: Arc<StreamingConfig>,
    ) -> Self {
        Self {
            id: notifier.voice(),
            format,
            backend: Mutex::new(backend),
            binding: Mutex::new(Binding::Idle),
            epoch: AtomicU64::new(0),
            notifier,
            pool,
            config,
        }
    }

    /// Id used in events and logs.
    pub fn id(&self) -> VoiceId {
        self.id
    }

    /// Format this voice was created for.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// True while bound to a clip or a stream.
    pub fn is_active(&self) -> bool {
        !matches!(*self.binding.lock(), Binding::Idle)
    }

    /// True while bound to a stream.
    pub fn is_streaming(&self) -> bool {
        matches!(*self.binding.lock(), Binding::Stream(_))
    }

    /// Buffers submitted and not yet finished, as reported by the hardware.
    pub fn queued_buffer_count(&self) -> usize {
        self.backend.lock().queued_buffer_count()
    }

    /// Plays `clip` once.
    ///
    /// Ignored if the voice is already active. The voice returns to the pool
    /// when the clip finishes.
    pub fn play_one_shot(&self, clip: &Clip, pitch: f32, volume: f32) -> Result<(), PlaybackError> {
        self.play_clip(clip, pitch, volume, LoopCount::Once)
    }

    /// Plays `clip` `times` times in total, or forever if `times` is 0.
    ///
    /// Ignored if the voice is already active.
    pub fn play_loop(
        &self,
        clip: &Clip,
        pitch: f32,
        volume: f32,
        times: u32,
    ) -> Result<(), PlaybackError> {
        self.play_clip(clip, pitch, volume, LoopCount::from_times(times))
    }

    fn play_clip(
        &self,
        clip: &Clip,
        pitch: f32,
        volume: f32,
        loops: LoopCount,
    ) -> Result<(), PlaybackError> {
        if clip.format() != self.format {
            return Err(PlaybackError::UnsupportedFormat {
                format: format!("{} on a {} voice", clip.format(), self.format),
            });
        }

        let mut binding = self.binding.lock();
        if !matches!(*binding, Binding::Idle) {
            tracing::debug!(voice = %self.id, "voice already active, ignoring play request");
            return Ok(());
        }

        {
            let mut backend = self.backend.lock();
            backend.set_frequency_ratio(self.config.clamp_pitch(pitch));
            backend.set_volume(volume);
            backend.submit(SubmitBuffer {
                data: clip.shared_data(),
                tag: self.epoch.load(Ordering::Acquire),
                loops,
            })?;
            if let Err(err) = backend.start() {
                self.epoch.fetch_add(1, Ordering::AcqRel);
                backend.flush();
                return Err(err);
            }
        }

        *binding = Binding::OneShot {
            clip: clip.clone(),
            loops,
        };
        tracing::trace!(voice = %self.id, bytes = clip.len(), ?loops, "playing clip");
        Ok(())
    }

    /// Halts playback, exits any loop, drops queued buffers, unbinds, and
    /// returns the voice to its pool's idle set. No-op on an idle voice.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.binding.lock(), Binding::Idle);
        if matches!(previous, Binding::Idle) {
            return;
        }

        {
            let mut backend = self.backend.lock();
            backend.stop();
            if let Binding::OneShot { loops, .. } = &previous {
                if loops.is_looping() {
                    backend.exit_loop();
                }
            }
            self.epoch.fetch_add(1, Ordering::AcqRel);
            backend.flush();
        }

        if let Binding::Stream(stream) = &previous {
            if let Some(stream) = stream.upgrade() {
                stream.detach_voice(self.id);
            }
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.release_voice(self.id);
        }
        tracing::debug!(voice = %self.id, "voice stopped");
    }

    /// Sets linear gain.
    pub fn set_volume(&self, volume: f32) {
        self.backend.lock().set_volume(volume);
    }

    /// Sets pitch as a frequency ratio, clamped to the configured range.
    pub fn set_pitch(&self, pitch: f32) {
        let ratio = self.config.clamp_pitch(pitch);
        self.backend.lock().set_frequency_ratio(ratio);
    }

    pub(crate) fn attach_stream(&self, stream: &Arc<StreamShared>) {
        let mut binding = self.binding.lock();
        assert!(
            matches!(*binding, Binding::Idle),
            "{} is already bound and cannot take a stream",
            self.id
        );
        *binding = Binding::Stream(Arc::downgrade(stream));
    }

    /// Returns false for events raised by buffers dropped in a flush.
    pub(crate) fn accepts(&self, tag: u64) -> bool {
        tag == self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn on_buffer_start(&self) {
        let stream = match &*self.binding.lock() {
            Binding::Stream(stream) => stream.upgrade(),
            _ => None,
        };
        if let Some(stream) = stream {
            stream.on_buffer_start();
        }
    }

    pub(crate) fn on_buffer_end(&self) {
        let (one_shot, stream) = match &*self.binding.lock() {
            Binding::Idle => (false, None),
            Binding::OneShot { .. } => (true, None),
            Binding::Stream(stream) => (false, stream.upgrade()),
        };

        if one_shot {
            self.stop();
        } else if let Some(stream) = stream {
            stream.on_buffer_end();
        }
    }

    /// Queues a stream slot. Fails if the voice is no longer bound to a stream.
    pub(crate) fn submit_stream_buffer(&self, data: Arc<[u8]>) -> Result<(), PlaybackError> {
        let binding = self.binding.lock();
        if !matches!(*binding, Binding::Stream(_)) {
            return Err(PlaybackError::submit_failed(self.id, "voice is not bound to a stream"));
        }
        self.backend.lock().submit(SubmitBuffer {
            data,
            tag: self.epoch.load(Ordering::Acquire),
            loops: LoopCount::Once,
        })
    }

    pub(crate) fn pause(&self) {
        self.backend.lock().stop();
    }

    pub(crate) fn resume(&self) -> Result<(), PlaybackError> {
        self.backend.lock().start()
    }

    pub(crate) fn flush(&self) {
        let mut backend = self.backend.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        backend.flush();
    }

    /// Posts a buffer-end carrying the current tag, so the caller thread runs
    /// end-of-buffer handling even though nothing is queued.
    pub(crate) fn post_drained(&self) {
        self.notifier.buffer_ended(self.epoch.load(Ordering::Acquire));
    }
}

impl std::fmt::Debug for PlaybackVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let binding = match &*self.binding.lock() {
            Binding::Idle => "idle".to_string(),
            Binding::OneShot { clip, loops } => format!("clip of {} bytes, {loops:?}", clip.len()),
            Binding::Stream(_) => "stream".to_string(),
        };
        f.debug_struct("PlaybackVoice")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("binding", &binding)
            .finish_non_exhaustive()
    }
}

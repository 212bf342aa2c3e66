//! Streaming playback through a read-ahead slot ring.
//!
//! An [`AudioStream`] pulls bytes from a [`BufferProvider`] on the pool's
//! worker thread, a slot at a time, and queues each filled slot on its
//! voice. Position only moves when the hardware reports that a slot started
//! playing, so it always reflects what is audible.
//!
//! ## Threads
//!
//! - **Caller thread**: `play`/`pause`/`stop`/seek, and buffer start/end
//!   handling via [`VoicePool::pump`]
//! - **Worker thread**: fills and provider rewinds, one task at a time
//!
//! All bookkeeping sits behind one lock. At most one fill per stream is in
//! flight; `pause` waits on a condition variable until it finishes.

mod ring;
mod state;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

pub use state::{PlaybackState, StreamStats};

use crate::voice::PlaybackVoice;
use crate::{
    AudioFormat, BufferProvider, PlaybackError, PlaybackEvent, Produced, StreamId, VoiceId,
    VoicePool,
};

use ring::SlotRing;
use state::{Phase, Rewind};

struct StreamCore {
    phase: Phase,
    ring: SlotRing,
    position: u64,
    total: u64,
    format: AudioFormat,
    voice: Option<Arc<PlaybackVoice>>,
    looping: bool,
    volume: f32,
    pitch: f32,
    rewind: Rewind,
    /// A non-looping provider reported end of data.
    exhausted: bool,
    /// Bumped by stop, seek, and provider changes; queued rewinds compare it.
    generation: u64,
    stats: StreamStats,
}

/// State shared between the stream handle, its voice, and worker tasks.
pub(crate) struct StreamShared {
    id: StreamId,
    pool: VoicePool,
    core: Mutex<StreamCore>,
    fill_done: Condvar,
    provider: Mutex<Box<dyn BufferProvider>>,
}

impl StreamShared {
    fn emit(&self, event: PlaybackEvent) {
        self.pool.shared().emit(event);
    }

    fn assert_not_worker(&self, operation: &str) {
        assert!(
            !self.pool.shared().is_worker_thread(),
            "AudioStream::{operation} must not be called from the playback worker"
        );
    }

    fn prepare(self: &Arc<Self>) -> Result<(), PlaybackError> {
        let mut core = self.core.lock();
        if core.voice.is_some() {
            return Ok(());
        }

        let voice = self.pool.acquire(core.format)?;
        voice.attach_stream(self);
        voice.set_volume(core.volume);
        voice.set_pitch(core.pitch);
        core.ring.realign();
        tracing::debug!(stream = %self.id, voice = %voice.id(), "stream prepared");
        core.voice = Some(voice);
        Ok(())
    }

    fn play(self: &Arc<Self>) -> Result<(), PlaybackError> {
        self.prepare()?;

        let mut core = self.core.lock();
        if core.phase == Phase::Pausing {
            self.wait_for_fill(&mut core);
        }
        let phase = core.phase;
        match phase {
            Phase::Playing | Phase::Filling | Phase::Ended => Ok(()),
            Phase::Paused | Phase::Pausing => self.start_locked(&mut core),
        }
    }

    /// Resumes output and kicks off a fill. The phase must be `Paused`.
    fn start_locked(self: &Arc<Self>, core: &mut StreamCore) -> Result<(), PlaybackError> {
        let Some(voice) = core.voice.clone() else {
            tracing::warn!(stream = %self.id, "voice detached before playback could start");
            return Ok(());
        };

        voice.set_volume(core.volume);
        voice.set_pitch(core.pitch);
        voice.resume()?;
        core.phase = Phase::Playing;
        if let Err(err) = self.schedule_fill(core) {
            voice.pause();
            core.phase = Phase::Paused;
            return Err(err);
        }
        tracing::debug!(stream = %self.id, position = core.position, "stream playing");
        Ok(())
    }

    /// Stops output, waiting out any in-flight fill. Returns true if the
    /// stream was playing.
    fn halt(&self, core: &mut MutexGuard<'_, StreamCore>) -> bool {
        let was_playing = core.phase.is_playing();
        match core.phase {
            Phase::Playing => core.phase = Phase::Paused,
            Phase::Filling | Phase::Pausing => self.wait_for_fill(core),
            Phase::Paused | Phase::Ended => return false,
        }
        if let Some(voice) = &core.voice {
            voice.pause();
        }
        was_playing
    }

    fn wait_for_fill(&self, core: &mut MutexGuard<'_, StreamCore>) {
        if core.phase == Phase::Filling {
            core.phase = Phase::Pausing;
        }
        while core.phase == Phase::Pausing {
            self.fill_done.wait(core);
        }
    }

    fn pause(&self) {
        self.assert_not_worker("pause");
        let mut core = self.core.lock();
        if self.halt(&mut core) {
            tracing::debug!(stream = %self.id, position = core.position, "stream paused");
        }
    }

    fn stop(&self) {
        self.assert_not_worker("stop");
        let mut core = self.core.lock();
        self.halt(&mut core);

        self.provider.lock().rewind();
        if let Some(voice) = &core.voice {
            voice.flush();
        }
        core.ring.realign();
        core.position = 0;
        core.rewind = Rewind::None;
        core.exhausted = false;
        core.generation += 1;
        if core.phase == Phase::Ended {
            core.phase = Phase::Paused;
        }
        tracing::debug!(stream = %self.id, "stream stopped");
    }

    fn set_current_position(self: &Arc<Self>, requested: u64) {
        self.assert_not_worker("set_current_position");
        let mut core = self.core.lock();
        let total = core.total;
        if requested > total {
            tracing::debug!(stream = %self.id, requested, total, "seek past end clamped");
        }
        let mut position = core.format.align_down(requested.min(total));
        let was_playing = self.halt(&mut core);

        {
            let mut provider = self.provider.lock();
            if let Err(err) = provider.seek(position) {
                tracing::warn!(stream = %self.id, position, %err, "seek failed, resetting provider");
                self.emit(PlaybackEvent::SeekFailed {
                    stream: self.id,
                    position,
                    error: err.to_string(),
                });
                provider.reset();
                position = provider.current_position().min(total);
            }
        }

        core.position = position;
        if let Some(voice) = &core.voice {
            voice.flush();
        }
        core.ring.realign();
        core.rewind = Rewind::None;
        core.exhausted = false;
        core.generation += 1;

        if position >= total {
            core.phase = Phase::Ended;
            tracing::debug!(stream = %self.id, position, "seek reached end");
            return;
        }
        if core.phase == Phase::Ended {
            core.phase = Phase::Paused;
        }
        tracing::debug!(stream = %self.id, position, "stream seeked");

        if was_playing {
            if let Err(err) = self.start_locked(&mut core) {
                tracing::warn!(stream = %self.id, %err, "could not resume after seek");
            }
        }
    }

    fn assert_paused(core: &StreamCore) {
        assert!(
            !core.phase.is_playing() && !core.phase.fill_in_flight(),
            "the provider may only be changed while the stream is paused"
        );
    }

    /// Re-reads the provider after a change. Returns a voice to stop once
    /// the lock is released, if the format changed.
    fn refresh_provider(&self, core: &mut StreamCore) -> Option<Arc<PlaybackVoice>> {
        let (position, total, format) = {
            let provider = self.provider.lock();
            (provider.current_position(), provider.total_size(), provider.format())
        };

        core.position = position;
        core.total = total;
        core.rewind = Rewind::None;
        core.exhausted = false;
        core.generation += 1;
        core.ring.realign();
        if core.phase == Phase::Ended && position < total {
            core.phase = Phase::Paused;
        }

        let mut released = None;
        if let Some(voice) = &core.voice {
            voice.flush();
        }
        if format != core.format {
            tracing::debug!(stream = %self.id, from = %core.format, to = %format, "stream format changed");
            self.emit(PlaybackEvent::FormatChanged {
                stream: self.id,
                previous: core.format,
                current: format,
            });
            released = core.voice.take();
            core.format = format;
        }
        released
    }

    pub(crate) fn detach_voice(&self, id: VoiceId) {
        let mut core = self.core.lock();
        if core.voice.as_ref().map(|v| v.id()) != Some(id) {
            return;
        }
        core.voice = None;
        core.ring.realign();
        match core.phase {
            Phase::Playing => core.phase = Phase::Paused,
            Phase::Filling => core.phase = Phase::Pausing,
            _ => {}
        }
        tracing::debug!(stream = %self.id, voice = %id, "voice detached from stream");
    }

    fn schedule_fill(self: &Arc<Self>, core: &mut StreamCore) -> Result<(), PlaybackError> {
        core.phase = Phase::Filling;
        let stream = Arc::clone(self);
        if let Err(err) = self.pool.enqueue(move || stream.run_fill()) {
            core.phase = Phase::Playing;
            return Err(err);
        }
        Ok(())
    }

    /// Leaves the fill gate and wakes any `pause` waiting on it.
    fn finish_fill(&self, core: &mut StreamCore) {
        match core.phase {
            Phase::Filling => core.phase = Phase::Playing,
            Phase::Pausing => core.phase = Phase::Paused,
            _ => {}
        }
        self.fill_done.notify_all();
    }

    /// One fill step, run on the worker thread.
    fn run_fill(self: &Arc<Self>) {
        let capacity = self.pool.config().capacity();

        let (index, mut storage) = {
            let mut core = self.core.lock();
            if core.phase != Phase::Filling {
                self.finish_fill(&mut core);
                return;
            }
            let queued = core.voice.as_ref().map(|v| v.queued_buffer_count());
            match queued {
                Some(queued) if queued < capacity && core.ring.has_room() => {}
                _ => {
                    self.finish_fill(&mut core);
                    return;
                }
            }
            let index = core.ring.read_ahead_index();
            (index, core.ring.take_slot(index))
        };

        // The provider is called without the stream lock so that the
        // caller thread can keep dispatching buffer events meanwhile.
        let (produced, total) = {
            let mut provider = self.provider.lock();
            let produced = provider.produce_next(&mut storage);
            (produced, provider.total_size())
        };

        let mut core = self.core.lock();
        core.ring.restore_slot(index, storage);
        core.total = total;
        core.stats.fills += 1;

        let keep_filling = match produced {
            Produced::EndOfData => self.on_end_of_data(&mut core),
            Produced::Bytes(0) => {
                core.stats.stalls += 1;
                tracing::trace!(stream = %self.id, "provider stalled, retrying");
                true
            }
            Produced::Bytes(len) => self.submit_slot(&mut core, len),
        };

        if keep_filling && core.phase == Phase::Filling {
            let stream = Arc::clone(self);
            match self.pool.enqueue(move || stream.run_fill()) {
                Ok(()) => return,
                Err(err) => tracing::warn!(stream = %self.id, %err, "could not queue next fill"),
            }
        }
        self.finish_fill(&mut core);
    }

    /// Commits and submits the slot just filled. Returns true if another
    /// fill should follow immediately.
    fn submit_slot(&self, core: &mut StreamCore, len: usize) -> bool {
        let config = self.pool.config();
        let len = if len > config.slot_size {
            tracing::warn!(stream = %self.id, len, "provider overran its slot, truncating");
            config.slot_size
        } else {
            len
        };
        let Some(voice) = core.voice.clone() else {
            return false;
        };

        let index = core.ring.commit(len);
        let data: Arc<[u8]> = Arc::from(core.ring.slot_bytes(index, len));
        match voice.submit_stream_buffer(data) {
            Ok(()) => {
                core.stats.slots_submitted += 1;
                tracing::trace!(stream = %self.id, slot = index, bytes = len, "slot submitted");
                core.ring.has_room() && voice.queued_buffer_count() < config.capacity()
            }
            Err(err) => {
                // The bytes are lost. Position is left alone; it only moves
                // when a slot starts.
                core.ring.rollback();
                core.stats.submit_failures += 1;
                tracing::warn!(stream = %self.id, %err, bytes = len, "slot submission failed");
                self.emit(PlaybackEvent::SubmitFailed {
                    voice: voice.id(),
                    error: err.to_string(),
                });
                false
            }
        }
    }

    /// Handles end of data from the provider. Returns true if the fill
    /// should be retried.
    fn on_end_of_data(&self, core: &mut StreamCore) -> bool {
        let queued = core.voice.as_ref().map_or(0, |v| v.queued_buffer_count());

        if !core.looping {
            core.exhausted = true;
            if core.ring.caught_up() && queued == 0 {
                if let Some(voice) = &core.voice {
                    voice.post_drained();
                }
            }
            return false;
        }

        match core.rewind {
            Rewind::Pending => true,
            Rewind::Armed => false,
            Rewind::None if core.ring.caught_up() && core.total > 0 => {
                // The last slot of the pass already started, so the wrap
                // point is behind us: rewind right away.
                self.provider.lock().rewind();
                core.position = 0;
                core.stats.rewinds += 1;
                tracing::debug!(stream = %self.id, queued, "looping stream rewound at end of data");
                self.emit(PlaybackEvent::StreamRewound { stream: self.id });
                true
            }
            Rewind::None => {
                core.rewind = Rewind::Armed;
                tracing::trace!(stream = %self.id, "rewind armed");
                false
            }
        }
    }

    fn run_rewind(&self, generation: u64) {
        let mut core = self.core.lock();
        if core.generation != generation || core.rewind != Rewind::Pending {
            tracing::trace!(stream = %self.id, "stale rewind skipped");
            return;
        }
        self.provider.lock().rewind();
        core.rewind = Rewind::None;
        tracing::trace!(stream = %self.id, "provider rewound");
    }

    /// Hardware started the slot at the consumption index.
    pub(crate) fn on_buffer_start(self: &Arc<Self>) {
        let mut core = self.core.lock();
        let Some(size) = core.ring.start_next() else {
            tracing::trace!(stream = %self.id, "buffer start with no outstanding slot");
            return;
        };

        core.position = (core.position + size as u64).min(core.total);
        core.stats.bytes_played += size as u64;
        core.stats.slots_started += 1;

        if core.rewind == Rewind::Armed && core.ring.caught_up() {
            core.rewind = Rewind::Pending;
            core.position = 0;
            core.stats.rewinds += 1;

            let generation = core.generation;
            let stream = Arc::clone(self);
            if let Err(err) = self.pool.enqueue(move || stream.run_rewind(generation)) {
                tracing::warn!(stream = %self.id, %err, "could not queue provider rewind");
                core.rewind = Rewind::None;
            }
            tracing::debug!(stream = %self.id, "looping stream wrapped");
            self.emit(PlaybackEvent::StreamRewound { stream: self.id });
        }
    }

    /// Hardware finished a slot.
    pub(crate) fn on_buffer_end(self: &Arc<Self>) {
        let mut core = self.core.lock();
        if core.phase == Phase::Ended {
            return;
        }
        let Some(voice) = core.voice.clone() else {
            return;
        };

        let queued = voice.queued_buffer_count();
        let drained = core.exhausted && core.ring.caught_up() && queued == 0;
        if !core.looping && (core.position >= core.total || drained) {
            if core.phase.fill_in_flight() {
                self.wait_for_fill(&mut core);
            }
            voice.pause();
            core.phase = Phase::Ended;
            tracing::info!(stream = %self.id, position = core.position, "stream ended");
            self.emit(PlaybackEvent::StreamEnded { stream: self.id });
            return;
        }

        if core.phase == Phase::Playing && queued <= self.pool.config().low_water_mark {
            if let Err(err) = self.schedule_fill(&mut core) {
                tracing::warn!(stream = %self.id, %err, "could not schedule refill");
            }
        }
    }
}

/// A stream of audio pulled from a [`BufferProvider`] and played through a
/// pooled voice.
///
/// Created unbound; [`prepare`](Self::prepare) or [`play`](Self::play)
/// binds a voice matching the provider's format. Dropping the stream stops
/// it and returns the voice to the pool.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stream_playback::{AudioFormat, AudioStream, MemoryProvider, MockDevice, PlaybackState, VoicePool};
///
/// let device = MockDevice::new();
/// let pool = VoicePool::new(device.clone()).unwrap();
/// let format = AudioFormat::pcm(8000, 1, 16);
/// let stream = AudioStream::new(&pool, MemoryProvider::sine(format, 440.0, Duration::from_millis(50)));
///
/// stream.play().unwrap();
/// for _ in 0..64 {
///     pool.wait_for_worker().unwrap();
///     device.advance_all();
///     pool.pump();
/// }
/// assert_eq!(stream.state(), PlaybackState::Ended);
/// assert_eq!(stream.current_position(), stream.total_size());
/// ```
pub struct AudioStream {
    shared: Arc<StreamShared>,
}

impl AudioStream {
    /// Creates an unbound, paused stream reading from `provider`.
    pub fn new(pool: &VoicePool, provider: impl BufferProvider + 'static) -> Self {
        let provider: Box<dyn BufferProvider> = Box::new(provider);
        let config = pool.config();
        let format = provider.format();
        let total = provider.total_size();
        let position = provider.current_position();
        let id = StreamId::next();

        tracing::debug!(stream = %id, %format, total, "stream created");
        Self {
            shared: Arc::new(StreamShared {
                id,
                pool: pool.clone(),
                core: Mutex::new(StreamCore {
                    phase: Phase::Paused,
                    ring: SlotRing::new(config.slot_count, config.slot_size),
                    position,
                    total,
                    format,
                    voice: None,
                    looping: false,
                    volume: 1.0,
                    pitch: 1.0,
                    rewind: Rewind::None,
                    exhausted: false,
                    generation: 0,
                    stats: StreamStats::default(),
                }),
                fill_done: Condvar::new(),
                provider: Mutex::new(provider),
            }),
        }
    }

    /// Id used in events and logs.
    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    /// Binds a voice for the provider's format if none is bound.
    ///
    /// # Panics
    ///
    /// If a new voice has to be created from inside an async runtime; see
    /// [`VoicePool::acquire`].
    pub fn prepare(&self) -> Result<(), PlaybackError> {
        self.shared.prepare()
    }

    /// Starts or resumes playback.
    ///
    /// No-op while already playing or after the stream has ended; use
    /// [`stop`](Self::stop) or a seek to play an ended stream again.
    ///
    /// # Panics
    ///
    /// Same as [`prepare`](Self::prepare) when no voice is bound yet.
    pub fn play(&self) -> Result<(), PlaybackError> {
        self.shared.play()
    }

    /// Halts playback, blocking until any in-flight fill completes.
    ///
    /// # Panics
    ///
    /// If called from the pool's worker thread.
    pub fn pause(&self) {
        self.shared.pause();
    }

    /// Pauses, rewinds the provider, drops queued audio, and resets the
    /// position to 0.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Seeks to a byte offset, clamped to the total size and rounded down to
    /// a frame boundary. Seeking to the end marks the stream as ended.
    /// Playback resumes afterwards if it was running.
    ///
    /// A provider that fails to seek is reset and a
    /// [`PlaybackEvent::SeekFailed`] is emitted.
    pub fn set_current_position(&self, position: u64) {
        self.shared.set_current_position(position);
    }

    /// Seeks to a time offset.
    pub fn set_current_time(&self, time: Duration) {
        let position = self.format().bytes_for(time);
        self.set_current_position(position);
    }

    /// Byte offset of the audio currently playing.
    pub fn current_position(&self) -> u64 {
        self.shared.core.lock().position
    }

    /// Total length in bytes, as last reported by the provider.
    pub fn total_size(&self) -> u64 {
        self.shared.core.lock().total
    }

    /// Time offset of the audio currently playing.
    pub fn current_time(&self) -> Duration {
        let core = self.shared.core.lock();
        core.format.duration_of(core.position)
    }

    /// Total length as a duration.
    pub fn total_duration(&self) -> Duration {
        let core = self.shared.core.lock();
        core.format.duration_of(core.total)
    }

    /// Format of the current provider.
    pub fn format(&self) -> AudioFormat {
        self.shared.core.lock().format
    }

    /// Sets linear gain, applied immediately if a voice is bound.
    pub fn set_volume(&self, volume: f32) {
        let mut core = self.shared.core.lock();
        core.volume = volume;
        if let Some(voice) = &core.voice {
            voice.set_volume(volume);
        }
    }

    /// Current gain.
    pub fn volume(&self) -> f32 {
        self.shared.core.lock().volume
    }

    /// Sets pitch as a frequency ratio, clamped to the configured range.
    pub fn set_pitch(&self, pitch: f32) {
        let pitch = self.shared.pool.config().clamp_pitch(pitch);
        let mut core = self.shared.core.lock();
        core.pitch = pitch;
        if let Some(voice) = &core.voice {
            voice.set_pitch(pitch);
        }
    }

    /// Current pitch.
    pub fn pitch(&self) -> f32 {
        self.shared.core.lock().pitch
    }

    /// True if the stream wraps to the start at the end of the provider.
    pub fn is_looping(&self) -> bool {
        self.shared.core.lock().looping
    }

    /// Enables or disables looping.
    pub fn set_looping(&self, looping: bool) {
        let mut core = self.shared.core.lock();
        core.looping = looping;
        if !looping && core.rewind == Rewind::Armed {
            core.rewind = Rewind::None;
        }
    }

    /// Observable playback state.
    pub fn state(&self) -> PlaybackState {
        let core = self.shared.core.lock();
        match (core.phase, core.voice.is_some()) {
            (Phase::Ended, _) => PlaybackState::Ended,
            (_, false) => PlaybackState::Unprepared,
            (Phase::Playing | Phase::Filling, true) => PlaybackState::Playing,
            (Phase::Paused | Phase::Pausing, true) => PlaybackState::Paused,
        }
    }

    /// True while output is running.
    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// True once non-looping playback has reached the end.
    pub fn is_ended(&self) -> bool {
        self.state() == PlaybackState::Ended
    }

    /// Progress counters and ring indices.
    pub fn stats(&self) -> StreamStats {
        let core = self.shared.core.lock();
        StreamStats {
            read_ahead_index: core.ring.read_ahead_index(),
            consumption_index: core.ring.consumption_index(),
            lead: core.ring.lead(),
            ..core.stats
        }
    }

    /// Id of the bound voice, if any.
    pub fn voice_id(&self) -> Option<VoiceId> {
        self.shared.core.lock().voice.as_ref().map(|v| v.id())
    }

    /// Replaces the provider. The stream must be paused.
    ///
    /// Queued audio from the old provider is dropped. If the format changed,
    /// the voice is released and a matching one is bound on the next
    /// `prepare` or `play`.
    ///
    /// # Panics
    ///
    /// If the stream is playing.
    pub fn set_provider(&self, provider: impl BufferProvider + 'static) {
        let released = {
            let mut core = self.shared.core.lock();
            StreamShared::assert_paused(&core);
            *self.shared.provider.lock() = Box::new(provider);
            self.shared.refresh_provider(&mut core)
        };
        if let Some(voice) = released {
            voice.stop();
        }
    }

    /// Gives access to the provider while paused. Call
    /// [`did_set_provider`](Self::did_set_provider) afterwards if the
    /// provider's format, position, or length changed.
    ///
    /// # Panics
    ///
    /// If the stream is playing.
    pub fn with_provider<R>(&self, f: impl FnOnce(&mut dyn BufferProvider) -> R) -> R {
        let core = self.shared.core.lock();
        StreamShared::assert_paused(&core);
        let mut provider = self.shared.provider.lock();
        f(&mut **provider)
    }

    /// Re-reads the provider's position, length, and format after it was
    /// changed in place. The stream must be paused.
    ///
    /// # Panics
    ///
    /// If the stream is playing.
    pub fn did_set_provider(&self) {
        let released = {
            let mut core = self.shared.core.lock();
            StreamShared::assert_paused(&core);
            self.shared.refresh_provider(&mut core)
        };
        if let Some(voice) = released {
            voice.stop();
        }
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        if self.shared.pool.shared().is_worker_thread() {
            tracing::warn!(stream = %self.shared.id, "stream dropped on the playback worker");
        } else {
            self.shared.pause();
        }

        let voice = {
            let mut core = self.shared.core.lock();
            core.generation += 1;
            core.rewind = Rewind::None;
            core.voice.take()
        };
        if let Some(voice) = voice {
            voice.stop();
        }
        tracing::debug!(stream = %self.shared.id, "stream dropped");
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("position", &self.current_position())
            .field("total", &self.total_size())
            .finish_non_exhaustive()
    }
}

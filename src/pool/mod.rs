//! Voice pool: voice recycling, the worker thread, and hardware event dispatch.

mod worker;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use crate::builder::VoicePoolBuilder;
use crate::voice::{BufferEdge, Clip, OutputDevice, PlaybackVoice, VoiceEvent, VoiceNotifier};
use crate::{AudioFormat, EventCallback, PlaybackError, PlaybackEvent, StreamingConfig, VoiceId};

use worker::{Task, Worker};

#[derive(Default)]
struct VoiceSets {
    idle: Vec<Arc<PlaybackVoice>>,
    active: Vec<Arc<PlaybackVoice>>,
}

/// State shared by the pool handle, its voices, and its streams.
pub(crate) struct PoolShared {
    device: Arc<dyn OutputDevice>,
    config: Arc<StreamingConfig>,
    voices: Mutex<VoiceSets>,
    worker: Worker,
    events_tx: UnboundedSender<VoiceEvent>,
    events_rx: Mutex<UnboundedReceiver<VoiceEvent>>,
    event_callback: Option<EventCallback>,
}

impl PoolShared {
    pub(crate) fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub(crate) fn enqueue(&self, task: Task) -> Result<(), PlaybackError> {
        self.worker.enqueue(task)
    }

    pub(crate) fn is_worker_thread(&self) -> bool {
        self.worker.is_current()
    }

    pub(crate) fn emit(&self, event: PlaybackEvent) {
        if let Some(callback) = &self.event_callback {
            callback(event);
        }
    }

    /// Moves a voice from the active set to the idle set. Idempotent.
    pub(crate) fn release_voice(&self, id: VoiceId) {
        let mut voices = self.voices.lock();
        if let Some(index) = voices.active.iter().position(|v| v.id() == id) {
            let voice = voices.active.remove(index);
            voices.idle.push(voice);
            tracing::trace!(voice = %id, idle = voices.idle.len(), "voice returned to pool");
        }
    }

    fn find_active(&self, id: VoiceId) -> Option<Arc<PlaybackVoice>> {
        self.voices
            .lock()
            .active
            .iter()
            .find(|v| v.id() == id)
            .cloned()
    }
}

/// Creates and recycles playback voices, and runs the streaming worker.
///
/// One pool owns one worker thread; every stream created on the pool is
/// filled by that thread, in FIFO order. Hardware callbacks are queued and
/// take effect only when the owning thread calls [`pump`](Self::pump).
///
/// Cloning is cheap and yields another handle to the same pool.
///
/// # Example
///
/// ```
/// use stream_playback::{AudioFormat, Clip, MockDevice, VoicePool};
///
/// let device = MockDevice::new();
/// let pool = VoicePool::new(device.clone()).unwrap();
///
/// let clip = Clip::new(AudioFormat::default(), vec![0u8; 4096]);
/// let voice = pool.play_one_shot(&clip, 1.0, 1.0).unwrap();
/// assert!(voice.is_active());
///
/// // Let the mock hardware start and finish the buffer.
/// device.advance_all();
/// device.advance_all();
/// pool.pump();
/// assert!(!voice.is_active());
/// assert_eq!(pool.idle_count(), 1);
/// ```
#[derive(Clone)]
pub struct VoicePool {
    shared: Arc<PoolShared>,
}

impl VoicePool {
    /// Returns a builder for configuring a pool.
    pub fn builder() -> VoicePoolBuilder {
        VoicePoolBuilder::new()
    }

    /// Creates a pool with default settings on the given device.
    pub fn new(device: impl OutputDevice + 'static) -> Result<Self, PlaybackError> {
        Self::builder().device(device).build()
    }

    pub(crate) fn from_parts(
        device: Arc<dyn OutputDevice>,
        config: StreamingConfig,
        event_callback: Option<EventCallback>,
    ) -> Result<Self, PlaybackError> {
        config.validate()?;
        let worker = Worker::spawn(&config.worker_thread_name)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tracing::info!(
            device = %device.name(),
            slot_size = config.slot_size,
            slot_count = config.slot_count,
            "voice pool created"
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                device,
                config: Arc::new(config),
                voices: Mutex::new(VoiceSets::default()),
                worker,
                events_tx,
                events_rx: Mutex::new(events_rx),
                event_callback,
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    /// Returns an idle voice for `format`, creating one if none matches.
    ///
    /// The voice moves to the active set and stays there until it stops or
    /// is [released](Self::release).
    ///
    /// # Panics
    ///
    /// Creating a voice on [`CpalDevice`](crate::CpalDevice) blocks until its
    /// output thread is up, which panics inside an async runtime. Call this
    /// from a plain thread or `tokio::task::spawn_blocking`.
    pub fn acquire(&self, format: AudioFormat) -> Result<Arc<PlaybackVoice>, PlaybackError> {
        {
            let mut voices = self.shared.voices.lock();
            if let Some(index) = voices.idle.iter().position(|v| v.format() == format) {
                let voice = voices.idle.remove(index);
                voices.active.push(Arc::clone(&voice));
                tracing::trace!(voice = %voice.id(), "reusing idle voice");
                return Ok(voice);
            }
        }

        let id = VoiceId::next();
        let notifier = VoiceNotifier::new(id, self.shared.events_tx.clone());
        let backend = self.shared.device.create_voice(format, notifier.clone())?;
        let voice = Arc::new(PlaybackVoice::new(
            format,
            backend,
            notifier,
            Arc::downgrade(&self.shared),
            Arc::clone(&self.shared.config),
        ));
        self.shared.voices.lock().active.push(Arc::clone(&voice));

        tracing::info!(voice = %id, %format, "created voice");
        self.shared.emit(PlaybackEvent::VoiceCreated { voice: id, format });
        Ok(voice)
    }

    /// Stops `voice` if it is playing and returns it to the idle set.
    pub fn release(&self, voice: &PlaybackVoice) {
        voice.stop();
        self.shared.release_voice(voice.id());
    }

    /// Plays `clip` once on a pooled voice.
    ///
    /// Acquires a voice, so the same runtime restriction as
    /// [`acquire`](Self::acquire) applies.
    pub fn play_one_shot(
        &self,
        clip: &Clip,
        pitch: f32,
        volume: f32,
    ) -> Result<Arc<PlaybackVoice>, PlaybackError> {
        let voice = self.acquire(clip.format())?;
        if let Err(err) = voice.play_one_shot(clip, pitch, volume) {
            self.shared.release_voice(voice.id());
            return Err(err);
        }
        Ok(voice)
    }

    /// Plays `clip` `times` times (0 = forever) on a pooled voice.
    ///
    /// Call [`PlaybackVoice::stop`] on the returned voice to end an
    /// infinite loop.
    pub fn play_loop(
        &self,
        clip: &Clip,
        pitch: f32,
        volume: f32,
        times: u32,
    ) -> Result<Arc<PlaybackVoice>, PlaybackError> {
        let voice = self.acquire(clip.format())?;
        if let Err(err) = voice.play_loop(clip, pitch, volume, times) {
            self.shared.release_voice(voice.id());
            return Err(err);
        }
        Ok(voice)
    }

    /// Runs `task` on the worker thread after everything already queued.
    pub fn enqueue<F>(&self, task: F) -> Result<(), PlaybackError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Box::new(task))
    }

    /// Dispatches queued hardware events on the calling thread.
    ///
    /// Buffer starts advance stream positions, buffer ends free one-shot
    /// voices or schedule refills. Call this regularly from the thread that
    /// drives playback (a game loop, a UI tick). Returns the number of
    /// events taken off the queue, including stale ones that were ignored.
    pub fn pump(&self) -> usize {
        assert!(
            !self.shared.is_worker_thread(),
            "VoicePool::pump must not be called from the playback worker"
        );

        let mut handled = 0;
        loop {
            let event = match self.shared.events_rx.lock().try_recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            handled += 1;
            self.dispatch(event);
        }
        handled
    }

    fn dispatch(&self, event: VoiceEvent) {
        let Some(voice) = self.shared.find_active(event.voice) else {
            tracing::trace!(voice = %event.voice, "event for inactive voice ignored");
            return;
        };
        if !voice.accepts(event.tag) {
            tracing::trace!(voice = %event.voice, tag = event.tag, "stale event ignored");
            return;
        }

        match event.edge {
            BufferEdge::Start => voice.on_buffer_start(),
            BufferEdge::End => voice.on_buffer_end(),
        }
    }

    /// Blocks until every task queued before this call has run.
    ///
    /// Must not be called from the worker thread or from inside an async
    /// runtime.
    pub fn wait_for_worker(&self) -> Result<(), PlaybackError> {
        assert!(
            !self.shared.is_worker_thread(),
            "VoicePool::wait_for_worker must not be called from the playback worker"
        );
        let (tx, rx) = oneshot::channel();
        self.enqueue(move || {
            let _ = tx.send(());
        })?;
        rx.blocking_recv().map_err(|_| PlaybackError::PoolShutDown)
    }

    /// Stops every active voice and shuts the worker down.
    ///
    /// Tasks already queued still run; later enqueues fail with
    /// [`PlaybackError::PoolShutDown`].
    pub fn shutdown(&self) {
        let active: Vec<_> = self.shared.voices.lock().active.clone();
        for voice in active {
            voice.stop();
        }
        self.shared.worker.shutdown();
    }

    /// Voices waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.shared.voices.lock().idle.len()
    }

    /// Voices handed out and not yet returned.
    pub fn active_count(&self) -> usize {
        self.shared.voices.lock().active.len()
    }

    /// Worker tasks queued and not yet started.
    pub fn pending_tasks(&self) -> usize {
        self.shared.worker.pending()
    }

    /// Name of the output device.
    pub fn device_name(&self) -> String {
        self.shared.device.name()
    }

    /// Settings shared by every stream on this pool.
    pub fn config(&self) -> &StreamingConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for VoicePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePool")
            .field("device", &self.device_name())
            .field("idle", &self.idle_count())
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

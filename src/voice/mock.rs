//! Deterministic output device for testing without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::backend::{OutputDevice, SubmitBuffer, VoiceBackend, VoiceNotifier};
use crate::{AudioFormat, PlaybackError, VoiceId};

/// An output device whose voices only play when told to.
///
/// Each [`advance_all`](MockDevice::advance_all) call moves every running
/// voice one step: the front buffer either starts (reporting a buffer-start)
/// or finishes (reporting a buffer-end and leaving the queue). Nothing
/// happens between calls, so tests control every interleaving of hardware
/// events and worker fills. This makes it suitable for CI environments.
///
/// # Example
///
/// ```
/// use stream_playback::{MockDevice, VoicePool};
///
/// let device = MockDevice::new();
/// let pool = VoicePool::builder().device(device.clone()).build().unwrap();
/// assert_eq!(device.voice_count(), 0);
/// # drop(pool);
/// ```
#[derive(Clone, Default)]
pub struct MockDevice {
    voices: Arc<Mutex<Vec<Arc<Mutex<MockVoiceState>>>>>,
    fail_submissions: Arc<AtomicBool>,
    fail_creation: Arc<AtomicBool>,
}

impl MockDevice {
    /// Creates a device with no voices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps every running voice once. Returns how many voices did something.
    pub fn advance_all(&self) -> usize {
        let voices: Vec<_> = self.voices.lock().clone();
        voices.iter().filter(|voice| voice.lock().step()).count()
    }

    /// Steps every running voice `steps` times back to back, as a backend
    /// does when one render callback crosses a buffer boundary. The events
    /// pile up until the next pump. Returns the total number of voice steps.
    pub fn advance_burst(&self, steps: usize) -> usize {
        (0..steps).map(|_| self.advance_all()).sum()
    }

    /// Makes every later submission fail (or succeed again).
    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Makes every later voice creation fail (or succeed again).
    pub fn fail_voice_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }

    /// Number of voices created so far.
    pub fn voice_count(&self) -> usize {
        self.voices.lock().len()
    }

    /// Handles to every voice created so far, oldest first.
    pub fn voices(&self) -> Vec<MockVoiceHandle> {
        self.voices
            .lock()
            .iter()
            .map(|state| MockVoiceHandle {
                state: Arc::clone(state),
            })
            .collect()
    }

    /// Handle to the voice with the given id.
    pub fn voice(&self, id: VoiceId) -> Option<MockVoiceHandle> {
        self.voices().into_iter().find(|handle| handle.id() == id)
    }
}

impl OutputDevice for MockDevice {
    fn create_voice(
        &self,
        format: AudioFormat,
        notifier: VoiceNotifier,
    ) -> Result<Box<dyn VoiceBackend>, PlaybackError> {
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(PlaybackError::backend("mock voice creation failure"));
        }
        if !format.is_playable() {
            return Err(PlaybackError::UnsupportedFormat {
                format: format.to_string(),
            });
        }

        let state = Arc::new(Mutex::new(MockVoiceState::new(format, notifier)));
        self.voices.lock().push(Arc::clone(&state));

        Ok(Box::new(MockVoice {
            state,
            fail_submissions: Arc::clone(&self.fail_submissions),
        }))
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

/// Read-only view of a mock voice, for assertions.
#[derive(Clone)]
pub struct MockVoiceHandle {
    state: Arc<Mutex<MockVoiceState>>,
}

impl MockVoiceHandle {
    /// Id of the voice.
    pub fn id(&self) -> VoiceId {
        self.state.lock().notifier.voice()
    }

    /// Format the voice was created for.
    pub fn format(&self) -> AudioFormat {
        self.state.lock().format
    }

    /// Concatenated bytes of every buffer pass that started, in order.
    pub fn played_bytes(&self) -> Vec<u8> {
        self.state.lock().played.clone()
    }

    /// Buffers submitted and not yet ended.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Largest queue length ever observed.
    pub fn max_queued(&self) -> usize {
        self.state.lock().max_queued
    }

    /// True between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Current gain.
    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    /// Current frequency ratio.
    pub fn frequency_ratio(&self) -> f32 {
        self.state.lock().frequency_ratio
    }

    /// Accepted submissions so far.
    pub fn submissions(&self) -> usize {
        self.state.lock().submissions
    }

    /// Flushes so far.
    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }
}

struct MockBuffer {
    data: Arc<[u8]>,
    tag: u64,
    repeats_left: Option<u32>,
    playing: bool,
    announced: bool,
}

struct MockVoiceState {
    format: AudioFormat,
    notifier: VoiceNotifier,
    queue: VecDeque<MockBuffer>,
    running: bool,
    volume: f32,
    frequency_ratio: f32,
    played: Vec<u8>,
    submissions: usize,
    flushes: usize,
    max_queued: usize,
}

impl MockVoiceState {
    fn new(format: AudioFormat, notifier: VoiceNotifier) -> Self {
        Self {
            format,
            notifier,
            queue: VecDeque::new(),
            running: false,
            volume: 1.0,
            frequency_ratio: 1.0,
            played: Vec::new(),
            submissions: 0,
            flushes: 0,
            max_queued: 0,
        }
    }

    fn step(&mut self) -> bool {
        if !self.running {
            return false;
        }
        let Some(front) = self.queue.front_mut() else {
            return false;
        };

        if !front.playing {
            front.playing = true;
            self.played.extend_from_slice(&front.data);
            if !front.announced {
                front.announced = true;
                self.notifier.buffer_started(front.tag);
            }
            return true;
        }

        match front.repeats_left {
            Some(0) => {}
            Some(n) => {
                front.repeats_left = Some(n - 1);
                front.playing = false;
                return true;
            }
            None => {
                front.playing = false;
                return true;
            }
        }

        let tag = front.tag;
        self.queue.pop_front();
        self.notifier.buffer_ended(tag);
        true
    }
}

struct MockVoice {
    state: Arc<Mutex<MockVoiceState>>,
    fail_submissions: Arc<AtomicBool>,
}

impl VoiceBackend for MockVoice {
    fn submit(&mut self, buffer: SubmitBuffer) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(PlaybackError::submit_failed(
                state.notifier.voice(),
                "mock submission failure",
            ));
        }

        state.queue.push_back(MockBuffer {
            data: buffer.data,
            tag: buffer.tag,
            repeats_left: buffer.loops.repeats(),
            playing: false,
            announced: false,
        });
        state.submissions += 1;
        state.max_queued = state.max_queued.max(state.queue.len());
        Ok(())
    }

    fn start(&mut self) -> Result<(), PlaybackError> {
        self.state.lock().running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().running = false;
    }

    fn flush(&mut self) {
        let mut state = self.state.lock();
        state.flushes += 1;
        let drained: Vec<u64> = state.queue.drain(..).map(|b| b.tag).collect();
        for tag in drained {
            state.notifier.buffer_ended(tag);
        }
    }

    fn exit_loop(&mut self) {
        if let Some(front) = self.state.lock().queue.front_mut() {
            front.repeats_left = Some(0);
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().volume = volume;
    }

    fn set_frequency_ratio(&mut self, ratio: f32) {
        self.state.lock().frequency_ratio = ratio;
    }

    fn queued_buffer_count(&self) -> usize {
        self.state.lock().queue.len()
    }
}

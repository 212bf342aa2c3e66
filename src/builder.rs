//! Builder pattern for `VoicePool`.

use std::sync::Arc;

use crate::voice::{CpalDevice, OutputDevice};
use crate::{event_callback, EventCallback, PlaybackError, PlaybackEvent, StreamingConfig, VoicePool};

/// Builder for configuring and starting a voice pool.
///
/// Use [`VoicePool::builder()`] to create a new builder.
///
/// # Example
///
/// ```
/// use stream_playback::{MockDevice, VoicePool};
///
/// let pool = VoicePool::builder()
///     .device(MockDevice::new())
///     .slot_size(16 * 1024)
///     .slot_count(6)
///     .on_event(|e| tracing::debug!(?e, "playback event"))
///     .build()
///     .unwrap();
/// assert_eq!(pool.config().capacity(), 5);
/// ```
///
/// Without [`device`](Self::device), `build` opens the system's default
/// output device through CPAL.
#[must_use]
pub struct VoicePoolBuilder {
    device: Option<Arc<dyn OutputDevice>>,
    config: StreamingConfig,
    event_callback: Option<EventCallback>,
}

impl Default for VoicePoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VoicePoolBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            device: None,
            config: StreamingConfig::default(),
            event_callback: None,
        }
    }

    /// Plays through the given device.
    pub fn device(mut self, device: impl OutputDevice + 'static) -> Self {
        self.device = Some(Arc::new(device));
        self
    }

    /// Plays through a device shared with other pools.
    pub fn shared_device(mut self, device: Arc<dyn OutputDevice>) -> Self {
        self.device = Some(device);
        self
    }

    /// Replaces the whole streaming configuration.
    pub fn config(mut self, config: StreamingConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the bytes requested per fill.
    pub fn slot_size(mut self, bytes: usize) -> Self {
        self.config.slot_size = bytes;
        self
    }

    /// Sets the number of ring slots per stream.
    pub fn slot_count(mut self, count: usize) -> Self {
        self.config.slot_count = count;
        self
    }

    /// Sets the queued-buffer count at or below which a refill is scheduled.
    ///
    /// Must stay below `slot_count - 1`.
    pub fn low_water_mark(mut self, count: usize) -> Self {
        self.config.low_water_mark = count;
        self
    }

    /// Sets the name of the worker thread.
    pub fn worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.worker_thread_name = name.into();
        self
    }

    /// Registers a callback for runtime events.
    ///
    /// Events are informational (stream end, rewinds, seek or submission
    /// failures). Playback continues after any event.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(PlaybackEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Validates the configuration, opens the device if needed, and starts
    /// the worker thread.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for inconsistent settings, `NoOutputDevice`
    /// if no device was given and none is configured, and `WorkerSpawn` if
    /// the thread cannot start.
    pub fn build(self) -> Result<VoicePool, PlaybackError> {
        self.config.validate()?;
        let device: Arc<dyn OutputDevice> = match self.device {
            Some(device) => device,
            None => Arc::new(CpalDevice::open_default()?),
        };
        VoicePool::from_parts(device, self.config, self.event_callback)
    }
}

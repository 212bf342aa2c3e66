//! Configuration for streaming playback.

use crate::PlaybackError;

/// Default size of one ring slot in bytes.
pub const DEFAULT_SLOT_SIZE: usize = 65536;

/// Default number of ring slots per stream.
pub const DEFAULT_SLOT_COUNT: usize = 4;

/// Default queued-buffer count at or below which a refill is scheduled.
pub const DEFAULT_LOW_WATER_MARK: usize = 1;

/// Default upper bound for pitch (frequency ratio).
pub const MAX_FREQUENCY_RATIO: f32 = 2.0;

/// Lower bound for pitch (frequency ratio).
pub const MIN_FREQUENCY_RATIO: f32 = 1.0 / 1024.0;

/// Configuration shared by a voice pool and every stream it serves.
///
/// Use [`StreamingConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use stream_playback::StreamingConfig;
///
/// let config = StreamingConfig {
///     slot_size: 16 * 1024,
///     slot_count: 8,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// assert_eq!(config.capacity(), 7);
/// ```
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Bytes requested from the provider per fill.
    ///
    /// Larger slots mean fewer fills and more latency on seek.
    /// Default: 65536
    pub slot_size: usize,

    /// Number of ring slots per stream.
    ///
    /// At most `slot_count - 1` slots are ever submitted and not yet started.
    /// Default: 4
    pub slot_count: usize,

    /// Queued-buffer count at or below which a buffer-end schedules a refill.
    ///
    /// Default: 1
    pub low_water_mark: usize,

    /// Upper bound applied to pitch.
    ///
    /// Default: 2.0
    pub max_frequency_ratio: f32,

    /// Name given to the pool's worker thread.
    ///
    /// Default: `"stream-playback-worker"`
    pub worker_thread_name: String,
}

impl StreamingConfig {
    /// Maximum number of slots a stream keeps in flight.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slot_count.saturating_sub(1)
    }

    /// Checks that the settings can drive a stream.
    pub fn validate(&self) -> Result<(), PlaybackError> {
        if self.slot_count < 2 {
            return Err(PlaybackError::invalid_config(format!(
                "slot_count must be at least 2 (got {})",
                self.slot_count
            )));
        }
        if self.slot_size == 0 {
            return Err(PlaybackError::invalid_config("slot_size must be non-zero"));
        }
        if self.low_water_mark >= self.capacity() {
            return Err(PlaybackError::invalid_config(format!(
                "low_water_mark {} leaves no room below capacity {}",
                self.low_water_mark,
                self.capacity()
            )));
        }
        if self.max_frequency_ratio.is_nan() || self.max_frequency_ratio < 1.0 {
            return Err(PlaybackError::invalid_config(format!(
                "max_frequency_ratio must be at least 1.0 (got {})",
                self.max_frequency_ratio
            )));
        }
        Ok(())
    }

    /// Clamps a requested pitch into the supported range.
    #[must_use]
    pub fn clamp_pitch(&self, pitch: f32) -> f32 {
        if pitch.is_nan() {
            return 1.0;
        }
        pitch.clamp(MIN_FREQUENCY_RATIO, self.max_frequency_ratio)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            slot_size: DEFAULT_SLOT_SIZE,
            slot_count: DEFAULT_SLOT_COUNT,
            low_water_mark: DEFAULT_LOW_WATER_MARK,
            max_frequency_ratio: MAX_FREQUENCY_RATIO,
            worker_thread_name: "stream-playback-worker".to_string(),
        }
    }
}

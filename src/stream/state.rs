//! Stream state machine types.

/// Internal phase of a stream. One lock guards it together with the rest of
/// the stream's bookkeeping; the condition variable wakes `pause` when a
/// fill leaves `Pausing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Hardware stopped, no fill in flight.
    Paused,
    /// Hardware running, no fill in flight.
    Playing,
    /// Hardware running, a fill is queued or running.
    Filling,
    /// A pause is waiting for the in-flight fill to finish.
    Pausing,
    /// Non-looping playback reached the end.
    Ended,
}

impl Phase {
    pub(crate) fn is_playing(self) -> bool {
        matches!(self, Self::Playing | Self::Filling)
    }

    pub(crate) fn fill_in_flight(self) -> bool {
        matches!(self, Self::Filling | Self::Pausing)
    }
}

/// Deferred rewind of a looping stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rewind {
    None,
    /// The provider hit its end; rewind once playback catches up.
    Armed,
    /// Position has been reset and the provider rewind is queued.
    Pending,
}

/// Observable playback state of an [`AudioStream`](crate::AudioStream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No voice bound yet.
    Unprepared,
    /// A voice is bound and output is halted.
    Paused,
    /// Output is running.
    Playing,
    /// Non-looping playback reached the end of the provider.
    Ended,
}

/// Counters describing a stream's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Net position gain: bytes of every slot that started playing.
    pub bytes_played: u64,
    /// Provider calls made by fills.
    pub fills: u64,
    /// Slots handed to the voice.
    pub slots_submitted: u64,
    /// Slots the hardware started.
    pub slots_started: u64,
    /// Loop wraps.
    pub rewinds: u64,
    /// Provider calls that returned zero bytes.
    pub stalls: u64,
    /// Slots the voice rejected.
    pub submit_failures: u64,
    /// Slot the worker fills next.
    pub read_ahead_index: usize,
    /// Slot the hardware starts next.
    pub consumption_index: usize,
    /// Slots submitted and not yet started.
    pub lead: usize,
}

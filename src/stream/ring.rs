//! Fixed ring of byte slots between the worker and the hardware queue.

/// N slots with two monotonic counters.
///
/// `filled` counts slots committed by the worker and `started` counts slots
/// the hardware began playing. The read-ahead index is `filled % N`, the
/// consumption index is `started % N`, and `filled - started` never exceeds
/// `N - 1`.
pub(crate) struct SlotRing {
    slots: Vec<Vec<u8>>,
    sizes: Vec<usize>,
    filled: u64,
    started: u64,
}

impl SlotRing {
    pub(crate) fn new(slot_count: usize, slot_size: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| vec![0u8; slot_size]).collect(),
            sizes: vec![0; slot_count],
            filled: 0,
            started: 0,
        }
    }

    fn len(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Slot the worker fills next.
    pub(crate) fn read_ahead_index(&self) -> usize {
        (self.filled % self.len()) as usize
    }

    /// Slot the hardware starts next.
    pub(crate) fn consumption_index(&self) -> usize {
        (self.started % self.len()) as usize
    }

    /// Slots committed and not yet started.
    pub(crate) fn lead(&self) -> usize {
        (self.filled - self.started) as usize
    }

    /// True if another slot may be committed.
    pub(crate) fn has_room(&self) -> bool {
        self.lead() + 1 < self.slots.len()
    }

    /// True when every committed slot has started.
    pub(crate) fn caught_up(&self) -> bool {
        self.filled == self.started
    }

    /// Lends the slot's storage out so it can be written without holding
    /// the stream lock. Must be handed back with [`restore_slot`].
    ///
    /// [`restore_slot`]: Self::restore_slot
    pub(crate) fn take_slot(&mut self, index: usize) -> Vec<u8> {
        std::mem::take(&mut self.slots[index])
    }

    pub(crate) fn restore_slot(&mut self, index: usize, storage: Vec<u8>) {
        self.slots[index] = storage;
    }

    /// The first `len` bytes of a slot.
    pub(crate) fn slot_bytes(&self, index: usize, len: usize) -> &[u8] {
        &self.slots[index][..len]
    }

    /// Records `len` bytes at the read-ahead slot and advances it.
    pub(crate) fn commit(&mut self, len: usize) -> usize {
        debug_assert!(self.has_room(), "slot ring overrun");
        let index = self.read_ahead_index();
        self.sizes[index] = len;
        self.filled += 1;
        index
    }

    /// Undoes the last commit.
    pub(crate) fn rollback(&mut self) {
        debug_assert!(self.filled > self.started);
        self.filled -= 1;
    }

    /// Advances the consumption index, returning the size recorded at the
    /// slot that started. `None` if nothing was committed.
    pub(crate) fn start_next(&mut self) -> Option<usize> {
        if self.caught_up() {
            return None;
        }
        let size = self.sizes[self.consumption_index()];
        self.started += 1;
        Some(size)
    }

    /// Forgets every committed slot, aligning consumption to read-ahead.
    pub(crate) fn realign(&mut self) {
        self.started = self.filled;
    }
}

use crate::store::FrameStore;

/// Lowest frame id handed out. `0` means "no response wanted".
pub const FIRST_FRAME_ID: u8 = 1;

/// Highest frame id handed out before wrapping.
pub const LAST_FRAME_ID: u8 = 254;

/// Cycles frame ids over `1..=254`.
///
/// Owned by the supervisor and only touched under its connection lock, so
/// the sequence survives reconnects.
#[derive(Debug, Clone)]
pub struct FrameIdAllocator {
    last: u8,
}

impl Default for FrameIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameIdAllocator {
    pub fn new() -> Self {
        // 255 is the wrap sentinel: the first allocation yields 1.
        Self { last: u8::MAX }
    }

    /// Next id in the cycle, without touching any store.
    pub fn next_id(&mut self) -> u8 {
        self.last = if self.last >= LAST_FRAME_ID {
            FIRST_FRAME_ID
        } else {
            self.last + 1
        };
        self.last
    }

    /// Next id, after evicting any unclaimed frames still tagged with it.
    pub fn allocate(&mut self, store: &FrameStore) -> u8 {
        let id = self.next_id();
        store.evict_stale_id(id);
        id
    }

    /// The most recently issued id, if any.
    pub fn last(&self) -> Option<u8> {
        (self.last != u8::MAX).then_some(self.last)
    }
}

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error};
use xbridge_frame::{Address64, Frame};

#[derive(Debug)]
struct Entry {
    frame: Frame,
    arrived: Instant,
}

#[derive(Debug, Default)]
struct StoreState {
    entries: VecDeque<Entry>,
    closed: bool,
}

/// Holding area for decoded frames awaiting a consumer.
///
/// Each entry is handed to at most one caller: whichever lookup matches it
/// first removes it. Lookups block on an internal condition variable until a
/// match arrives, the timeout elapses, or the store is closed.
#[derive(Debug)]
pub struct FrameStore {
    state: Mutex<StoreState>,
    arrived: Condvar,
    max_age: Option<Duration>,
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStore {
    /// A store that keeps unclaimed frames indefinitely.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            arrived: Condvar::new(),
            max_age: None,
        }
    }

    /// A store that drops unclaimed frames older than `max_age` on insert.
    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
            ..Self::new()
        }
    }

    /// Add a frame and wake all waiters.
    pub fn insert(&self, frame: Frame) {
        let now = Instant::now();
        let mut state = self.lock();
        if state.closed {
            debug!(%frame, "store closed, dropping frame");
            return;
        }

        if let Some(max_age) = self.max_age {
            state.entries.retain(|entry| {
                let keep = now.saturating_duration_since(entry.arrived) <= max_age;
                if !keep {
                    debug!(frame = %entry.frame, "aged out unclaimed frame");
                }
                keep
            });
        }

        state.entries.push_back(Entry {
            frame,
            arrived: now,
        });
        self.arrived.notify_all();
    }

    /// Remove and return the first frame carrying `frame_id`.
    pub fn take_by_id(&self, frame_id: u8, timeout: Duration) -> Option<Frame> {
        self.take_matching(timeout, |frame| frame.frame_id == Some(frame_id))
    }

    /// Remove and return the first unsolicited frame received from `address`.
    pub fn take_by_address(&self, address: Address64, timeout: Duration) -> Option<Frame> {
        self.take_matching(timeout, |frame| frame.source_address() == Some(address))
    }

    /// Like [`FrameStore::take_by_address`], restricted to one api id.
    pub fn take_by_api_and_address(
        &self,
        api_id: u8,
        address: Address64,
        timeout: Duration,
    ) -> Option<Frame> {
        self.take_matching(timeout, |frame| {
            frame.api_id == api_id && frame.source_address() == Some(address)
        })
    }

    /// Remove and return the oldest frame that carries no frame id
    /// (unsolicited receive and IO frames).
    pub fn take_unsolicited(&self, timeout: Duration) -> Option<Frame> {
        self.take_matching(timeout, |frame| frame.frame_id.is_none())
    }

    /// Remove every stored frame tagged with `frame_id`.
    ///
    /// Called right before the id is reissued, so a late reply to an
    /// abandoned request cannot be matched to the new one.
    pub fn evict_stale_id(&self, frame_id: u8) -> usize {
        let mut removed = 0;
        let mut state = self.lock();
        while let Some(pos) = state
            .entries
            .iter()
            .position(|entry| entry.frame.frame_id == Some(frame_id))
        {
            state.entries.remove(pos);
            removed += 1;
            error!(frame_id, "removed frame with old id");
        }
        removed
    }

    /// Reject further inserts and wake every waiter.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.entries.clear();
        self.arrived.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_matching(&self, timeout: Duration, matches: impl Fn(&Frame) -> bool) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(pos) = state.entries.iter().position(|entry| matches(&entry.frame)) {
                return state.entries.remove(pos).map(|entry| entry.frame);
            }
            if state.closed {
                return None;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .arrived
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use xbridge_frame::api;

    use super::*;

    fn at_response(id: u8) -> Frame {
        Frame::new(api::AT_RESPONSE, Some(id), &b"MY\x00\xff\xfe"[..])
    }

    fn rx_from(address: Address64, api_id: u8, data: &[u8]) -> Frame {
        let mut payload = address.to_bytes().to_vec();
        payload.extend_from_slice(&[0x28, 0x00]);
        payload.extend_from_slice(data);
        Frame::new(api_id, None, payload)
    }

    #[test]
    fn take_by_id_leaves_other_ids() {
        let store = FrameStore::new();
        store.insert(at_response(1));
        store.insert(at_response(2));

        let got = store.take_by_id(2, Duration::ZERO).unwrap();
        assert_eq!(got.frame_id, Some(2));
        assert_eq!(store.len(), 1);

        // Delivered once only.
        assert!(store.take_by_id(2, Duration::from_millis(20)).is_none());
        assert!(store.take_by_id(1, Duration::ZERO).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn take_by_id_waits_for_arrival() {
        let store = Arc::new(FrameStore::new());
        let producer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                store.insert(at_response(7));
            })
        };

        let got = store.take_by_id(7, Duration::from_secs(2));
        producer.join().unwrap();
        assert_eq!(got.unwrap().frame_id, Some(7));
    }

    #[test]
    fn take_by_id_times_out() {
        let store = FrameStore::new();
        let start = Instant::now();
        assert!(store.take_by_id(9, Duration::from_millis(40)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn take_by_address_matches_source() {
        let a = Address64(0x0013_A200_4000_0001);
        let b = Address64(0x0013_A200_4000_0002);
        let store = FrameStore::new();
        store.insert(rx_from(a, api::RX_PACKET_64, b"one"));
        store.insert(rx_from(b, api::RX_PACKET_64, b"two"));

        let got = store.take_by_address(b, Duration::ZERO).unwrap();
        assert_eq!(got.received_data(), Some(&b"two"[..]));
        assert!(store.take_by_address(b, Duration::ZERO).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn take_by_api_and_address_filters_kind() {
        let a = Address64(0x0013_A200_4000_0001);
        let store = FrameStore::new();
        store.insert(rx_from(a, api::RX_PACKET_64, b"data"));
        store.insert(rx_from(a, api::RX_IO_64, &[0x01, 0x02, 0x00]));

        let io = store
            .take_by_api_and_address(api::RX_IO_64, a, Duration::ZERO)
            .unwrap();
        assert_eq!(io.api_id, api::RX_IO_64);
        assert!(store
            .take_by_api_and_address(api::RX_IO_64, a, Duration::ZERO)
            .is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn take_unsolicited_skips_responses() {
        let a = Address64(0x0013_A200_4000_0001);
        let store = FrameStore::new();
        store.insert(at_response(1));
        store.insert(rx_from(a, api::RX_PACKET_64, b"hello"));

        let got = store.take_unsolicited(Duration::ZERO).unwrap();
        assert_eq!(got.source_address(), Some(a));
        assert!(store.take_unsolicited(Duration::ZERO).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn evict_stale_id_removes_all_copies() {
        let store = FrameStore::new();
        store.insert(at_response(5));
        store.insert(at_response(6));
        store.insert(at_response(5));

        assert_eq!(store.evict_stale_id(5), 2);
        assert!(store.take_by_id(5, Duration::ZERO).is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.evict_stale_id(5), 0);
    }

    #[test]
    fn close_wakes_waiters() {
        let store = Arc::new(FrameStore::new());
        let waiter = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let start = Instant::now();
                let got = store.take_by_id(1, Duration::from_secs(10));
                (got, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(30));
        store.close();

        let (got, waited) = waiter.join().unwrap();
        assert!(got.is_none());
        assert!(waited < Duration::from_secs(5));
        assert!(store.is_closed());

        store.insert(at_response(1));
        assert!(store.is_empty());
    }

    #[test]
    fn unclaimed_frames_age_out_on_insert() {
        let store = FrameStore::with_max_age(Duration::from_millis(20));
        store.insert(at_response(1));
        thread::sleep(Duration::from_millis(40));
        store.insert(at_response(2));

        assert!(store.take_by_id(1, Duration::ZERO).is_none());
        assert!(store.take_by_id(2, Duration::ZERO).is_some());
    }
}

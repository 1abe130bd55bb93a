use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TextState {
    buf: Vec<u8>,
    closed: bool,
}

/// Accumulates bytes received outside API frames.
///
/// Transparent-mode replies (`OK\r`, parameter values, node discovery
/// listings) arrive here. Only one dialog reads at a time; the supervisor's
/// mode lock guarantees that.
#[derive(Debug, Default)]
pub struct TextBuffer {
    state: Mutex<TextState>,
    changed: Condvar,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append passthrough bytes and wake any waiter.
    pub fn push(&self, bytes: &[u8]) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.buf.extend_from_slice(bytes);
        self.changed.notify_all();
    }

    /// Take everything accumulated so far.
    pub fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().buf)
    }

    /// Wait until `terminator` shows up, then return the bytes before it.
    ///
    /// The reply and its terminator are consumed; anything after the
    /// terminator stays buffered. Returns `None` on timeout or when the
    /// buffer is closed.
    pub fn wait_for(&self, terminator: &[u8], timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(idx) = find(&state.buf, terminator) {
                let reply = state.buf[..idx].to_vec();
                state.buf.drain(..idx + terminator.len());
                return Some(reply);
            }
            if state.closed {
                return None;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, TextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Render passthrough bytes one character per byte.
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn wait_for_splits_on_terminator() {
        let text = TextBuffer::new();
        text.push(b"2\rOK");

        assert_eq!(text.wait_for(b"\r", Duration::ZERO).unwrap(), b"2");
        assert_eq!(text.drain(), b"OK");
    }

    #[test]
    fn wait_for_multi_byte_terminator() {
        let text = TextBuffer::new();
        text.push(b"FFFE\r0013A200\r40000001\r\r\r");

        let listing = text.wait_for(b"\r\r\r", Duration::ZERO).unwrap();
        assert_eq!(listing, b"FFFE\r0013A200\r40000001");
        assert!(text.is_empty());
    }

    #[test]
    fn wait_for_blocks_until_reply() {
        let text = Arc::new(TextBuffer::new());
        let producer = {
            let text = Arc::clone(&text);
            thread::spawn(move || {
                for chunk in [&b"O"[..], &b"K"[..], &b"\r"[..]] {
                    thread::sleep(Duration::from_millis(10));
                    text.push(chunk);
                }
            })
        };

        let reply = text.wait_for(b"OK\r", Duration::from_secs(2));
        producer.join().unwrap();
        assert_eq!(reply.unwrap(), b"");
    }

    #[test]
    fn wait_for_times_out_and_keeps_partial_reply() {
        let text = TextBuffer::new();
        text.push(b"O");
        assert!(text.wait_for(b"OK\r", Duration::from_millis(20)).is_none());
        assert_eq!(text.len(), 1);
    }

    #[test]
    fn close_wakes_waiter() {
        let text = Arc::new(TextBuffer::new());
        let waiter = {
            let text = Arc::clone(&text);
            thread::spawn(move || text.wait_for(b"OK\r", Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        text.close();

        assert!(waiter.join().unwrap().is_none());
        text.push(b"late");
        assert!(text.is_empty());
    }

    #[test]
    fn latin1_maps_bytes_to_chars() {
        assert_eq!(latin1(b"OK"), "OK");
        assert_eq!(latin1(&[0xE9]), "\u{e9}");
    }
}

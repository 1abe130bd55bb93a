use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, error, trace, warn};

use crate::api;
use crate::codec::{decode_frame, Frame, ESCAPE, ESCAPE_XOR, FRAME_OVERHEAD, START_DELIMITER, XOFF, XON};
use crate::modem::ModemStatus;

/// How long a started frame may stay incomplete before the pending window is dropped.
pub const DEFAULT_PARTIAL_FRAME_TIMEOUT: Duration = Duration::from_millis(5000);

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// One unit of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A decoded API frame destined for correlation.
    Frame(Frame),
    /// Bytes received outside any frame (transparent-mode replies).
    Text(Bytes),
    /// A modem status event. Reported for logging only.
    ModemStatus(ModemStatus),
}

enum Scan {
    /// The leading frame is not complete yet.
    Partial,
    /// A full frame: `consumed` escaped bytes, `unescaped` delimiter through checksum.
    Complete { consumed: usize, unescaped: Vec<u8> },
}

/// Rebuilds frames from an arbitrarily chunked inbound byte stream.
///
/// Handles partial input internally: bytes of an incomplete frame stay in
/// the pending window until more input arrives or the frame has been pending
/// longer than the partial-frame timeout, at which point the window is
/// discarded to resynchronise on the next delimiter.
#[derive(Debug)]
pub struct StreamReassembler {
    pending: BytesMut,
    frame_start: Option<Instant>,
    partial_timeout: Duration,
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_PARTIAL_FRAME_TIMEOUT)
    }

    pub fn with_timeout(partial_timeout: Duration) -> Self {
        Self {
            pending: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            frame_start: None,
            partial_timeout,
        }
    }

    /// Number of bytes waiting in the pending window.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// When the currently pending frame started, if any.
    pub fn frame_start(&self) -> Option<Instant> {
        self.frame_start
    }

    /// Feed a batch of raw bytes observed at `now`.
    ///
    /// An empty batch is a timer tick: it only applies the partial-frame
    /// timeout to whatever is already pending.
    pub fn feed(&mut self, data: &[u8], now: Instant) -> Vec<Inbound> {
        for (i, b) in data.iter().enumerate() {
            trace!(index = i, byte = format_args!("0x{b:02x}"), "read byte");
        }
        self.pending.extend_from_slice(data);
        if self.frame_start.is_none() && data.contains(&START_DELIMITER) {
            self.frame_start = Some(now);
        }

        self.strip_flow_control();

        let mut out = Vec::new();
        while !self.pending.is_empty() {
            if self.pending[0] != START_DELIMITER {
                let run = self
                    .pending
                    .iter()
                    .position(|&b| b == START_DELIMITER)
                    .unwrap_or(self.pending.len());
                out.push(Inbound::Text(self.pending.split_to(run).freeze()));
                continue;
            }

            match self.scan_frame() {
                Scan::Partial => {
                    self.expire_partial(now);
                    break;
                }
                Scan::Complete {
                    consumed,
                    unescaped,
                } => {
                    self.pending.advance(consumed);
                    if let Some(inbound) = Self::classify(&unescaped) {
                        out.push(inbound);
                    }
                    self.frame_start = if self.pending.contains(&START_DELIMITER) {
                        Some(now)
                    } else {
                        None
                    };
                }
            }
        }
        out
    }

    fn strip_flow_control(&mut self) {
        if !self.pending.iter().any(|&b| b == XON || b == XOFF) {
            return;
        }
        let mut kept = BytesMut::with_capacity(self.pending.len());
        for (pos, &b) in self.pending.iter().enumerate() {
            match b {
                XON => error!(position = pos, "XON in input stream"),
                XOFF => error!(position = pos, "XOFF in input stream"),
                _ => kept.extend_from_slice(&[b]),
            }
        }
        self.pending = kept;
    }

    fn expire_partial(&mut self, now: Instant) {
        let Some(start) = self.frame_start else {
            return;
        };
        let age = now.saturating_duration_since(start);
        if age <= self.partial_timeout {
            return;
        }

        error!(
            age_ms = age.as_millis() as u64,
            pending = self.pending.len(),
            "removing partial frame"
        );
        for b in self.pending.iter() {
            error!(byte = format_args!("0x{b:02x}"), "discarded byte");
        }
        self.pending.clear();
        self.frame_start = None;
    }

    fn scan_frame(&self) -> Scan {
        let buf = &self.pending[..];
        let mut loc = 1usize;
        let mut unescaped = Vec::with_capacity(buf.len().min(64));
        unescaped.push(START_DELIMITER);

        for _ in 0..2 {
            match next_unescaped(buf, &mut loc) {
                Some(b) => unescaped.push(b),
                None => return Scan::Partial,
            }
        }

        let size = usize::from(u16::from_be_bytes([unescaped[1], unescaped[2]])) + FRAME_OVERHEAD;
        while unescaped.len() < size {
            match next_unescaped(buf, &mut loc) {
                Some(b) => unescaped.push(b),
                None => return Scan::Partial,
            }
        }

        Scan::Complete {
            consumed: loc,
            unescaped,
        }
    }

    fn classify(unescaped: &[u8]) -> Option<Inbound> {
        let frame = match decode_frame(unescaped) {
            Ok(frame) => frame,
            Err(err) => {
                error!(%err, "dropping inbound frame");
                return None;
            }
        };
        debug!(api_id = format_args!("0x{:02x}", frame.api_id), "received frame");

        if frame.api_id != api::MODEM_STATUS {
            return Some(Inbound::Frame(frame));
        }
        match frame.payload.first() {
            Some(&status) => {
                let status = ModemStatus::from_byte(status);
                warn!(%status, "status frame");
                Some(Inbound::ModemStatus(status))
            }
            None => {
                error!("invalid status frame");
                None
            }
        }
    }
}

fn next_unescaped(buf: &[u8], loc: &mut usize) -> Option<u8> {
    let b = *buf.get(*loc)?;
    if b == ESCAPE {
        let next = *buf.get(*loc + 1)?;
        *loc += 2;
        Some(next ^ ESCAPE_XOR)
    } else {
        *loc += 1;
        Some(b)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::codec::{encode, encode_frame};

    fn frames(events: &[Inbound]) -> Vec<&Frame> {
        events
            .iter()
            .filter_map(|e| match e {
                Inbound::Frame(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    fn text(events: &[Inbound]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                Inbound::Text(t) => Some(t.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn single_frame_in_one_batch() {
        let wire = encode(api::AT_RESPONSE, Some(7), &[0x4D, 0x59, 0x00, 0xFF, 0xFE]).unwrap();
        let mut r = StreamReassembler::new();

        let events = r.feed(&wire, Instant::now());

        let got = frames(&events);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].frame_id, Some(7));
        assert_eq!(got[0].payload.as_ref(), &[0x4D, 0x59, 0x00, 0xFF, 0xFE]);
        assert_eq!(r.pending_len(), 0);
        assert_eq!(r.frame_start(), None);
    }

    #[test]
    fn byte_by_byte_including_escapes() {
        // 0x7D and 0x11 force escapes, so an escape pair straddles batches.
        let wire = encode(api::TX_STATUS, Some(0x7D), &[0x11]).unwrap();
        let mut r = StreamReassembler::new();
        let now = Instant::now();

        let mut events = Vec::new();
        for b in wire.iter() {
            events.extend(r.feed(&[*b], now));
        }

        let got = frames(&events);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].frame_id, Some(0x7D));
        assert_eq!(got[0].payload.as_ref(), &[0x11]);
        assert!(text(&events).is_empty());
    }

    #[test]
    fn several_frames_in_one_batch() {
        let mut wire = BytesMut::new();
        for id in 1..=3u8 {
            encode_frame(&Frame::new(api::AT_RESPONSE, Some(id), vec![0x49, 0x44, 0x00]), &mut wire)
                .unwrap();
        }
        let mut r = StreamReassembler::new();

        let events = r.feed(&wire, Instant::now());

        let ids: Vec<_> = frames(&events).iter().map(|f| f.frame_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn passthrough_text_around_frames() {
        let mut wire = b"OK\r".to_vec();
        wire.extend_from_slice(&encode(api::AT_RESPONSE, Some(1), b"MY\x00").unwrap());
        wire.extend_from_slice(b"2\r");
        let mut r = StreamReassembler::new();

        let events = r.feed(&wire, Instant::now());

        assert_eq!(text(&events), b"OK\r2\r");
        assert_eq!(frames(&events).len(), 1);
        assert!(matches!(events[0], Inbound::Text(_)));
    }

    #[test]
    fn flow_control_bytes_are_stripped() {
        let mut wire = vec![XON, b'O'];
        wire.push(XOFF);
        wire.extend_from_slice(b"K\r");
        let mut r = StreamReassembler::new();

        let events = r.feed(&wire, Instant::now());

        assert_eq!(text(&events), b"OK\r");
    }

    #[test]
    fn modem_status_is_not_a_frame() {
        let wire = encode(api::MODEM_STATUS, None, &[0x02]).unwrap();
        let mut r = StreamReassembler::new();

        let events = r.feed(&wire, Instant::now());

        assert_eq!(events, vec![Inbound::ModemStatus(ModemStatus::Associated)]);
    }

    #[test]
    fn bad_checksum_is_dropped_and_parsing_continues() {
        let mut bad = encode(api::AT_RESPONSE, Some(1), b"ID\x00").unwrap().to_vec();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let good = encode(api::AT_RESPONSE, Some(2), b"ID\x00").unwrap();
        let mut wire = bad;
        wire.extend_from_slice(&good);
        let mut r = StreamReassembler::new();

        let events = r.feed(&wire, Instant::now());

        let got = frames(&events);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].frame_id, Some(2));
    }

    #[test]
    fn partial_frame_waits_for_more_input() {
        let wire = encode(api::AT_RESPONSE, Some(5), b"SH\x00\x00\x13\xa2\x00").unwrap();
        let split = wire.len() / 2;
        let t0 = Instant::now();
        let mut r = StreamReassembler::new();

        assert!(r.feed(&wire[..split], t0).is_empty());
        assert_eq!(r.pending_len(), split);
        assert_eq!(r.frame_start(), Some(t0));

        // Still inside the timeout: nothing dropped.
        assert!(r.feed(&[], t0 + Duration::from_millis(4000)).is_empty());
        assert_eq!(r.pending_len(), split);

        let events = r.feed(&wire[split..], t0 + Duration::from_millis(4500));
        assert_eq!(frames(&events).len(), 1);
    }

    #[test]
    fn partial_frame_timeout_resynchronises() {
        let t0 = Instant::now();
        let mut r = StreamReassembler::new();

        // Declares 16 bytes of frame data, delivers 2.
        assert!(r.feed(&[0x7E, 0x00, 0x10, 0x88, 0x01], t0).is_empty());
        assert!(r.feed(&[], t0 + Duration::from_millis(5001)).is_empty());
        assert_eq!(r.pending_len(), 0);
        assert_eq!(r.frame_start(), None);

        let wire = encode(api::AT_RESPONSE, Some(9), b"CE\x00\x01").unwrap();
        let events = r.feed(&wire, t0 + Duration::from_millis(5100));
        let got = frames(&events);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].frame_id, Some(9));
    }

    #[test]
    fn frame_start_restarts_when_another_delimiter_is_pending() {
        let first = encode(api::AT_RESPONSE, Some(1), b"ID\x00").unwrap();
        let second = encode(api::AT_RESPONSE, Some(2), b"ID\x00").unwrap();
        let mut wire = first.to_vec();
        wire.extend_from_slice(&second[..3]);
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(10);
        let mut r = StreamReassembler::new();

        r.feed(&wire[..2], t0);
        let events = r.feed(&wire[2..], t1);

        assert_eq!(frames(&events).len(), 1);
        assert_eq!(r.frame_start(), Some(t1));
        assert_eq!(r.pending_len(), 3);
    }

    #[test]
    fn custom_timeout_is_honoured() {
        let t0 = Instant::now();
        let mut r = StreamReassembler::with_timeout(Duration::from_millis(100));

        r.feed(&[0x7E, 0x00], t0);
        r.feed(&[], t0 + Duration::from_millis(150));

        assert_eq!(r.pending_len(), 0);
    }
}

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::address::Address64;
use crate::api;
use crate::error::{FrameError, Result};
use crate::hex;

/// Start delimiter, never escaped.
pub const START_DELIMITER: u8 = 0x7E;

/// Escape prefix.
pub const ESCAPE: u8 = 0x7D;

/// Software flow control: resume.
pub const XON: u8 = 0x11;

/// Software flow control: pause.
pub const XOFF: u8 = 0x13;

/// Value XORed into an escaped byte.
pub const ESCAPE_XOR: u8 = 0x20;

/// Delimiter (1) + length (2) + checksum (1).
pub const FRAME_OVERHEAD: usize = 4;

/// Largest frame data (api id + frame id + payload) the length prefix can express.
pub const MAX_FRAME_DATA: usize = u16::MAX as usize;

/// Offset of the received data in a 64-bit receive packet:
/// source address (8) + RSSI (1) + options (1).
const RX64_DATA_OFFSET: usize = 10;

/// A decoded API frame.
///
/// `payload` excludes the delimiter, length prefix, api id, frame id and
/// checksum; those only exist on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The api id (frame kind).
    pub api_id: u8,
    /// Correlation id, present only for frame-id-bearing kinds.
    pub frame_id: Option<u8>,
    /// The frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(api_id: u8, frame_id: Option<u8>, payload: impl Into<Bytes>) -> Self {
        Self {
            api_id,
            frame_id,
            payload: payload.into(),
        }
    }

    /// Length of the frame data as declared by the length prefix.
    pub fn data_len(&self) -> usize {
        1 + usize::from(self.frame_id.is_some()) + self.payload.len()
    }

    /// Source address of an unsolicited 64-bit-addressed receive frame.
    pub fn source_address(&self) -> Option<Address64> {
        if !api::has_source_address(self.api_id) {
            return None;
        }
        Address64::from_slice(&self.payload)
    }

    /// User data of a 64-bit receive packet (after address, RSSI and options).
    pub fn received_data(&self) -> Option<&[u8]> {
        if self.api_id != api::RX_PACKET_64 {
            return None;
        }
        self.payload.get(RX64_DATA_OFFSET..)
    }

    /// Payload as one-character-per-byte (Latin-1) text.
    ///
    /// For 64-bit receive packets this is the received data only, which is
    /// what byte-oriented passthrough conversations with a peer consume.
    pub fn ascii_payload(&self) -> String {
        let bytes = self.received_data().unwrap_or(self.payload.as_ref());
        bytes.iter().map(|&b| char::from(b)).collect()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "api=0x{:02x} ({})",
            self.api_id,
            api::api_name(self.api_id)
        )?;
        if let Some(id) = self.frame_id {
            write!(f, " frame_id={id}")?;
        }
        write!(f, " payload={}", hex::encode(&self.payload))
    }
}

/// Checksum over frame data: `0xFF - (sum & 0xFF)`.
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    0xFF - sum
}

/// Returns true for bytes that must be escaped after the start delimiter.
pub fn needs_escape(byte: u8) -> bool {
    matches!(byte, XON | XOFF | ESCAPE | START_DELIMITER)
}

fn put_escaped(dst: &mut BytesMut, byte: u8) {
    if needs_escape(byte) {
        dst.put_u8(ESCAPE);
        dst.put_u8(byte ^ ESCAPE_XOR);
    } else {
        dst.put_u8(byte);
    }
}

/// Encode a frame into the escaped wire format.
///
/// Wire format:
/// ```text
/// ┌───────┬──────────────┬────────┬────────────┬──────────┬──────────┐
/// │ 0x7E  │ Length (2B)  │ Api id │ [Frame id] │ Payload  │ Checksum │
/// │       │ big-endian   │        │            │          │          │
/// └───────┴──────────────┴────────┴────────────┴──────────┴──────────┘
///          └──────────────── escaped ─────────────────────────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let data_len = frame.data_len();
    if data_len > MAX_FRAME_DATA {
        return Err(FrameError::PayloadTooLarge {
            size: data_len,
            max: MAX_FRAME_DATA,
        });
    }

    let mut sum = frame.api_id;
    if let Some(id) = frame.frame_id {
        sum = sum.wrapping_add(id);
    }
    sum = frame.payload.iter().fold(sum, |acc, &b| acc.wrapping_add(b));

    // Worst case every byte after the delimiter is escaped.
    dst.reserve(1 + 2 * (data_len + 3));
    dst.put_u8(START_DELIMITER);
    for b in (data_len as u16).to_be_bytes() {
        put_escaped(dst, b);
    }
    put_escaped(dst, frame.api_id);
    if let Some(id) = frame.frame_id {
        put_escaped(dst, id);
    }
    for &b in frame.payload.iter() {
        put_escaped(dst, b);
    }
    put_escaped(dst, 0xFF - sum);
    Ok(())
}

/// Encode api id, optional frame id and payload into a fresh buffer.
pub fn encode(api_id: u8, frame_id: Option<u8>, payload: &[u8]) -> Result<Bytes> {
    let frame = Frame::new(api_id, frame_id, Bytes::copy_from_slice(payload));
    let mut dst = BytesMut::new();
    encode_frame(&frame, &mut dst)?;
    Ok(dst.freeze())
}

/// Remove byte stuffing from one escaped frame (delimiter included).
pub fn unescape(escaped: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut iter = escaped.iter().copied();
    if let Some(first) = iter.next() {
        out.push(first);
    }
    while let Some(b) = iter.next() {
        if b == ESCAPE {
            let next = iter.next().ok_or(FrameError::DanglingEscape)?;
            out.push(next ^ ESCAPE_XOR);
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

/// Decode one unescaped frame (delimiter through checksum).
///
/// Validates the declared length and the checksum, then splits off the frame
/// id when the api id is frame-id-bearing.
pub fn decode_frame(unescaped: &[u8]) -> Result<Frame> {
    // delimiter + length + api id + checksum
    const MIN_FRAME: usize = FRAME_OVERHEAD + 1;

    if let Some(&first) = unescaped.first() {
        if first != START_DELIMITER {
            return Err(FrameError::MissingDelimiter(first));
        }
    }
    if unescaped.len() < MIN_FRAME {
        return Err(FrameError::ShortFrame {
            expected: MIN_FRAME,
            actual: unescaped.len(),
        });
    }

    let declared = usize::from(u16::from_be_bytes([unescaped[1], unescaped[2]]));
    if declared + FRAME_OVERHEAD != unescaped.len() {
        return Err(FrameError::ShortFrame {
            expected: declared + FRAME_OVERHEAD,
            actual: unescaped.len(),
        });
    }

    let last = unescaped.len() - 1;
    let expected = checksum(&unescaped[3..last]);
    let found = unescaped[last];
    if expected != found {
        return Err(FrameError::InvalidChecksum { expected, found });
    }

    let api_id = unescaped[3];
    let (frame_id, payload_start) = if api::has_frame_id(api_id) {
        if unescaped.len() < MIN_FRAME + 1 {
            return Err(FrameError::ShortFrame {
                expected: MIN_FRAME + 1,
                actual: unescaped.len(),
            });
        }
        (Some(unescaped[4]), 5)
    } else {
        (None, 4)
    };

    Ok(Frame::new(
        api_id,
        frame_id,
        Bytes::copy_from_slice(&unescaped[payload_start..last]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: &Frame) -> Frame {
        let mut wire = BytesMut::new();
        encode_frame(frame, &mut wire).unwrap();
        decode_frame(&unescape(&wire).unwrap()).unwrap()
    }

    #[test]
    fn local_at_query_wire_bytes() {
        let wire = encode(api::AT_COMMAND, Some(7), b"MY").unwrap();
        assert_eq!(
            wire.as_ref(),
            &[0x7E, 0x00, 0x04, 0x08, 0x07, 0x4D, 0x59, 0x4A]
        );
    }

    #[test]
    fn at_response_decodes() {
        let bytes = [0x7E, 0x00, 0x07, 0x88, 0x07, 0x4D, 0x59, 0x00, 0xFF, 0xFE, 0xCD];
        let frame = decode_frame(&bytes).unwrap();
        assert_eq!(frame.api_id, api::AT_RESPONSE);
        assert_eq!(frame.frame_id, Some(7));
        assert_eq!(frame.payload.as_ref(), &[0x4D, 0x59, 0x00, 0xFF, 0xFE]);
    }

    #[test]
    fn roundtrip_with_and_without_frame_id() {
        let with_id = Frame::new(api::TX_REQUEST_64, Some(42), b"hello".to_vec());
        assert_eq!(roundtrip(&with_id), with_id);

        let without_id = Frame::new(api::RX_PACKET_64, None, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(roundtrip(&without_id), without_id);

        let empty = Frame::new(api::MODEM_STATUS, None, Bytes::new());
        assert_eq!(roundtrip(&empty), empty);
    }

    #[test]
    fn reserved_bytes_survive_and_are_escaped() {
        let payload = vec![0x7E, 0x7D, 0x11, 0x13, 0x00, 0x7E];
        let frame = Frame::new(api::TX_REQUEST_64, Some(0x7D), payload);
        let mut wire = BytesMut::new();
        encode_frame(&frame, &mut wire).unwrap();

        assert_eq!(wire[0], START_DELIMITER);
        let mut i = 1;
        while i < wire.len() {
            assert!(
                !matches!(wire[i], START_DELIMITER | XON | XOFF),
                "unescaped reserved byte 0x{:02x} at {i}",
                wire[i]
            );
            if wire[i] == ESCAPE {
                assert!(i + 1 < wire.len());
                assert!(needs_escape(wire[i + 1] ^ ESCAPE_XOR));
                i += 2;
            } else {
                i += 1;
            }
        }

        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn length_prefix_is_escaped() {
        // 0x11 bytes of frame data: the low length byte would read as XON.
        let frame = Frame::new(api::TX_REQUEST_64, Some(1), vec![0x41; 15]);
        assert_eq!(frame.data_len(), 0x11);
        let wire = encode(frame.api_id, frame.frame_id, &frame.payload).unwrap();
        assert_eq!(&wire[..4], &[0x7E, 0x00, ESCAPE, 0x11 ^ ESCAPE_XOR]);
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn every_checksum_region_flip_is_detected() {
        let frame = Frame::new(api::AT_RESPONSE, Some(9), vec![0x4D, 0x59, 0x00, 0x12, 0x34]);
        let mut wire = BytesMut::new();
        encode_frame(&frame, &mut wire).unwrap();
        let clean = unescape(&wire).unwrap();

        for idx in 3..clean.len() {
            for flip in [0x01u8, 0x80, 0xFF] {
                let mut corrupted = clean.clone();
                corrupted[idx] ^= flip;
                assert!(
                    matches!(
                        decode_frame(&corrupted),
                        Err(FrameError::InvalidChecksum { .. })
                    ),
                    "flip 0x{flip:02x} at {idx} not detected"
                );
            }
        }
    }

    #[test]
    fn short_frames_rejected() {
        assert!(matches!(
            decode_frame(&[0x7E, 0x00, 0x00, 0xFF]),
            Err(FrameError::ShortFrame { .. })
        ));
        // Declared length longer than the bytes present.
        assert!(matches!(
            decode_frame(&[0x7E, 0x00, 0x05, 0x08, 0x01, 0xF6]),
            Err(FrameError::ShortFrame { .. })
        ));
        // Frame-id-bearing kind with no room for the id.
        assert!(matches!(
            decode_frame(&[0x7E, 0x00, 0x01, 0x88, 0x77]),
            Err(FrameError::ShortFrame { .. })
        ));
    }

    #[test]
    fn missing_delimiter_rejected() {
        assert!(matches!(
            decode_frame(&[0x00, 0x00, 0x01, 0x8A, 0x75]),
            Err(FrameError::MissingDelimiter(0x00))
        ));
    }

    #[test]
    fn dangling_escape_rejected() {
        assert!(matches!(
            unescape(&[0x7E, 0x00, ESCAPE]),
            Err(FrameError::DanglingEscape)
        ));
    }

    #[test]
    fn oversized_frame_rejected() {
        let frame = Frame::new(api::TX_REQUEST_64, Some(1), vec![0u8; MAX_FRAME_DATA]);
        let mut wire = BytesMut::new();
        assert!(matches!(
            encode_frame(&frame, &mut wire),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn receive_frame_accessors() {
        let mut payload = vec![0x00, 0x13, 0xA2, 0x00, 0x40, 0x9A, 0x96, 0x0C, 0x28, 0x00];
        payload.extend_from_slice(b"ping\xe9");
        let frame = Frame::new(api::RX_PACKET_64, None, payload);

        assert_eq!(
            frame.source_address(),
            Some(Address64::from_parts(0x0013_A200, 0x409A_960C))
        );
        assert_eq!(frame.received_data(), Some(&b"ping\xe9"[..]));
        assert_eq!(frame.ascii_payload(), "ping\u{e9}");

        let response = Frame::new(api::AT_RESPONSE, Some(1), b"MY\x00".to_vec());
        assert_eq!(response.source_address(), None);
        assert_eq!(response.received_data(), None);
        assert_eq!(response.ascii_payload(), "MY\u{0}");
    }

    #[test]
    fn display_is_compact() {
        let frame = Frame::new(api::AT_COMMAND, Some(3), b"ID".to_vec());
        assert_eq!(frame.to_string(), "api=0x08 (AT_COMMAND) frame_id=3 payload=4944");
    }
}

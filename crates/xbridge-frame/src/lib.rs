//! Binary API framing for XBee-style radio modules.
//!
//! Every API frame on the wire is:
//! - A start delimiter `0x7E`
//! - A 2-byte big-endian length (api id + frame id + payload)
//! - The api id, an optional frame id, and the payload
//! - A checksum byte
//!
//! Everything after the delimiter is byte-stuffed: `0x11`, `0x13`, `0x7D`
//! and `0x7E` travel as `0x7D, byte ^ 0x20`.
//!
//! [`StreamReassembler`] turns an arbitrarily chunked byte stream back into
//! frames, passing any non-frame bytes through as text.

pub mod address;
pub mod api;
pub mod codec;
pub mod error;
pub mod hex;
pub mod modem;
pub mod reader;
pub mod reassembler;
pub mod writer;

pub use address::Address64;
pub use api::{api_name, has_frame_id, has_source_address};
pub use codec::{checksum, decode_frame, encode, encode_frame, unescape, Frame};
pub use error::{FrameError, Result};
pub use modem::ModemStatus;
pub use reader::InboundReader;
pub use reassembler::{Inbound, StreamReassembler, DEFAULT_PARTIAL_FRAME_TIMEOUT};
pub use writer::FrameWriter;

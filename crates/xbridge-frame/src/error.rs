/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame does not start with the `0x7E` delimiter.
    #[error("missing start delimiter (found 0x{0:02x})")]
    MissingDelimiter(u8),

    /// The frame is shorter than its header or declared length requires.
    #[error("short frame ({actual} bytes, expected {expected})")]
    ShortFrame { expected: usize, actual: usize },

    /// The checksum byte does not match the frame contents.
    #[error("invalid checksum (expected 0x{expected:02x}, found 0x{found:02x})")]
    InvalidChecksum { expected: u8, found: u8 },

    /// An escape byte was the last byte of the input.
    #[error("dangling escape byte at end of frame")]
    DanglingEscape,

    /// The frame data exceeds what the 16-bit length prefix can express.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed by the gateway.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

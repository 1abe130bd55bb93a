use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use crate::error::{FrameError, Result};
use crate::reassembler::{Inbound, StreamReassembler, DEFAULT_PARTIAL_FRAME_TIMEOUT};

const READ_CHUNK_SIZE: usize = 1024;

/// Reads inbound traffic from any `Read` stream.
///
/// Each call to [`InboundReader::read_batch`] performs at most one read.
/// A read that times out (`WouldBlock`/`TimedOut`) is treated as a tick:
/// the reassembler still gets a chance to expire a stale partial frame, so
/// set a read timeout on the stream if partial frames must be dropped while
/// the line is quiet.
pub struct InboundReader<T> {
    inner: T,
    reassembler: StreamReassembler,
}

impl<T: Read> InboundReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_timeout(inner, DEFAULT_PARTIAL_FRAME_TIMEOUT)
    }

    /// Create a reader with an explicit partial-frame timeout.
    pub fn with_timeout(inner: T, partial_timeout: Duration) -> Self {
        Self {
            inner,
            reassembler: StreamReassembler::with_timeout(partial_timeout),
        }
    }

    /// Read once and return whatever complete units that produced.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    /// The returned batch may be empty.
    pub fn read_batch(&mut self) -> Result<Vec<Inbound>> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => return Ok(self.reassembler.feed(&chunk[..n], Instant::now())),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(self.reassembler.feed(&[], Instant::now()));
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Bytes of an incomplete frame currently held back.
    pub fn pending_len(&self) -> usize {
        self.reassembler.pending_len()
    }
}

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use xbridge_frame::Frame;

use crate::error::{EngineError, Result};

/// Transparent-mode escape sequence.
pub const ESCAPE_SEQUENCE: &[u8] = b"+++";

/// Reply that acknowledges the escape and `ATCN`.
pub const OK_REPLY: &[u8] = b"OK\r";

/// Leaves transparent command mode.
pub const EXIT_COMMAND: &[u8] = b"ATCN\r";

/// Default guard time around the escape sequence.
pub const DEFAULT_GUARD_TIME: Duration = Duration::from_millis(1200);

/// Literal command text for transparent (AT) mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransparentCommand {
    /// Bytes written verbatim.
    pub text: Bytes,
    /// End of the expected reply.
    pub terminator: Bytes,
    /// Silence kept before writing.
    pub pre_delay: Duration,
    /// Silence kept after writing.
    pub post_delay: Duration,
}

impl TransparentCommand {
    /// A command with no pacing, except `+++` which gets the default guard time.
    pub fn new(text: impl Into<Bytes>, terminator: impl Into<Bytes>) -> Self {
        let text = text.into();
        let guard = if text.as_ref() == ESCAPE_SEQUENCE {
            DEFAULT_GUARD_TIME
        } else {
            Duration::ZERO
        };
        Self {
            text,
            terminator: terminator.into(),
            pre_delay: guard,
            post_delay: guard,
        }
    }

    /// The escape sequence, with `guard` silence on both sides.
    pub fn escape(guard: Duration) -> Self {
        Self {
            text: Bytes::from_static(ESCAPE_SEQUENCE),
            terminator: Bytes::from_static(OK_REPLY),
            pre_delay: guard,
            post_delay: guard,
        }
    }

    /// `ATCN\r`, expecting `OK\r`.
    pub fn exit() -> Self {
        Self::new(Bytes::from_static(EXIT_COMMAND), Bytes::from_static(OK_REPLY))
    }

    pub fn is_escape(&self) -> bool {
        self.text.as_ref() == ESCAPE_SEQUENCE
    }
}

/// One outbound unit, consumed exactly once by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteItem {
    Frame(Frame),
    Command(TransparentCommand),
}

impl WriteItem {
    pub fn pre_delay(&self) -> Duration {
        match self {
            Self::Frame(_) => Duration::ZERO,
            Self::Command(cmd) => cmd.pre_delay,
        }
    }

    pub fn post_delay(&self) -> Duration {
        match self {
            Self::Frame(_) => Duration::ZERO,
            Self::Command(cmd) => cmd.post_delay,
        }
    }
}

impl fmt::Display for WriteItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(frame) => write!(f, "frame {frame}"),
            Self::Command(cmd) => write!(f, "command {:?}", crate::text::latin1(&cmd.text)),
        }
    }
}

impl From<Frame> for WriteItem {
    fn from(frame: Frame) -> Self {
        Self::Frame(frame)
    }
}

impl From<TransparentCommand> for WriteItem {
    fn from(cmd: TransparentCommand) -> Self {
        Self::Command(cmd)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<WriteItem>,
    closed: bool,
}

/// FIFO of outbound items drained by the sender worker.
#[derive(Debug, Default)]
pub struct WriteQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item. Fails with `NotConnected` once the queue is closed.
    pub fn push(&self, item: impl Into<WriteItem>) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(EngineError::NotConnected);
        }
        state.items.push_back(item.into());
        self.available.notify_one();
        Ok(())
    }

    /// Block until an item is available. Returns `None` once closed.
    pub fn pop(&self) -> Option<WriteItem> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Drop pending items and wake the sender.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.items.clear();
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use xbridge_frame::{FrameError, FrameWriter, Inbound, InboundReader};
use xbridge_transport::{SerialStream, TransportError};

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::queue::{WriteItem, WriteQueue};
use crate::store::FrameStore;
use crate::text::TextBuffer;

/// Cancellation signal shared by a set of threads.
///
/// Sleeps taken through [`ShutdownSignal::sleep`] end early once the signal
/// fires. A thread parked in a blocking read does not observe it; the
/// stream must be shut down for that.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration`. Returns `false` if the signal fired first.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut triggered = flag.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *triggered {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            triggered = cvar
                .wait_timeout(triggered, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Sets the worker's error flag on every exit path, panics included.
struct ExitGuard(Arc<AtomicBool>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl Worker {
    fn join(self) {
        if self.handle.join().is_err() {
            warn!(worker = self.name, "worker panicked");
        }
    }
}

/// Cloneable view of one live connection: its containers and worker flags.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) store: Arc<FrameStore>,
    pub(crate) text: Arc<TextBuffer>,
    pub(crate) queue: Arc<WriteQueue>,
    reader_failed: Arc<AtomicBool>,
    sender_failed: Arc<AtomicBool>,
    id: u64,
}

impl Session {
    /// Both workers running and neither has reported an error.
    pub fn is_healthy(&self) -> bool {
        !self.reader_failed.load(Ordering::SeqCst) && !self.sender_failed.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub fn text(&self) -> &TextBuffer {
        &self.text
    }

    pub fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    /// Identifies the connection this session belongs to.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A transport connection with its reader and sender workers.
///
/// Dropping the link tears it down: the stream is force-closed, the
/// containers are closed, and both workers are joined.
#[derive(Debug)]
pub struct Link {
    stream: SerialStream,
    session: Session,
    shutdown: ShutdownSignal,
    reader: Option<Worker>,
    sender: Option<Worker>,
}

impl Link {
    /// Start workers bound to a freshly connected stream.
    pub fn start(stream: SerialStream, config: &SupervisorConfig, id: u64) -> Result<Self> {
        stream.set_read_timeout(Some(config.read_tick))?;
        let read_half = stream.try_clone()?;
        let write_half = stream.try_clone()?;

        let session = Session {
            store: Arc::new(FrameStore::with_max_age(config.frame_max_age)),
            text: Arc::new(TextBuffer::new()),
            queue: Arc::new(WriteQueue::new()),
            reader_failed: Arc::new(AtomicBool::new(false)),
            sender_failed: Arc::new(AtomicBool::new(false)),
            id,
        };
        let shutdown = ShutdownSignal::new();

        let mut link = Self {
            stream,
            session: session.clone(),
            shutdown: shutdown.clone(),
            reader: None,
            sender: None,
        };

        let reader = InboundReader::with_timeout(read_half, config.partial_frame_timeout);
        link.reader = Some(spawn_worker("xbridge-reader", {
            let session = session.clone();
            let shutdown = shutdown.clone();
            move || run_reader(reader, &session, &shutdown)
        })?);

        let writer = FrameWriter::new(write_half);
        link.sender = Some(spawn_worker("xbridge-sender", move || {
            run_sender(writer, &session, &shutdown)
        })?);

        info!(peer = %link.stream.peer_label(), connection = id, "link started");
        Ok(link)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_healthy(&self) -> bool {
        self.session.is_healthy()
            && self.reader.as_ref().is_some_and(|w| !w.handle.is_finished())
            && self.sender.as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    fn teardown(&mut self) {
        self.shutdown.trigger();
        // Only a closed stream unblocks a reader parked in read().
        if let Err(err) = self.stream.shutdown() {
            debug!(%err, "stream shutdown failed");
        }
        self.session.queue.close();
        self.session.store.close();
        self.session.text.close();

        for worker in [self.reader.take(), self.sender.take()].into_iter().flatten() {
            worker.join();
        }
        debug!(connection = self.session.id, "link stopped");
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn spawn_worker(
    name: &'static str,
    body: impl FnOnce() + Send + 'static,
) -> std::result::Result<Worker, TransportError> {
    let handle = thread::Builder::new().name(name.to_string()).spawn(body)?;
    Ok(Worker { name, handle })
}

/// Reader worker: feed inbound bytes to the reassembler and route the results.
pub(crate) fn run_reader<R: Read>(
    mut reader: InboundReader<R>,
    session: &Session,
    shutdown: &ShutdownSignal,
) {
    let _exit = ExitGuard(Arc::clone(&session.reader_failed));
    loop {
        if shutdown.is_triggered() {
            return;
        }
        match reader.read_batch() {
            Ok(batch) => {
                for inbound in batch {
                    match inbound {
                        Inbound::Frame(frame) => session.store.insert(frame),
                        Inbound::Text(text) => session.text.push(&text),
                        Inbound::ModemStatus(_) => {}
                    }
                }
            }
            Err(FrameError::ConnectionClosed) => {
                if !shutdown.is_triggered() {
                    warn!("gateway closed the connection");
                }
                return;
            }
            Err(err) => {
                if !shutdown.is_triggered() {
                    warn!(%err, "read failed");
                }
                return;
            }
        }
    }
}

/// Sender worker: drain the write queue, honouring each item's pacing.
pub(crate) fn run_sender<W: Write>(
    mut writer: FrameWriter<W>,
    session: &Session,
    shutdown: &ShutdownSignal,
) {
    let _exit = ExitGuard(Arc::clone(&session.sender_failed));
    while let Some(item) = session.queue.pop() {
        if !shutdown.sleep(item.pre_delay()) {
            return;
        }

        debug!(%item, "write");
        let written = match &item {
            WriteItem::Frame(frame) => writer.write_frame(frame),
            WriteItem::Command(cmd) => writer.write_raw(&cmd.text),
        };
        if let Err(err) = written {
            warn!(%err, "write failed");
            return;
        }

        if !shutdown.sleep(item.post_delay()) {
            return;
        }
    }
}

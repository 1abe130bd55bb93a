//! Connection supervision and the public command API.
//!
//! A background thread keeps one [`Link`] alive: it connects, negotiates API
//! mode, runs the optional provisioner, marks the connection ready and
//! reconnects whenever a worker fails. Callers on any thread issue commands
//! through [`Supervisor`]; each command is serialized with every other command
//! and with transparent-mode dialogs.
//!
//! Lock order is always connection, then mode. The connection lock guards
//! link validity and frame-id allocation; the mode lock keeps API frames out
//! of the serial line while a transparent-mode dialog owns it.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use xbridge_frame::{api, Address64, Frame};
use xbridge_transport::{Connector, EndpointConnector};

use crate::command;
use crate::config::SupervisorConfig;
use crate::dialog::NegotiationPlan;
use crate::error::{EngineError, Result};
use crate::ids::FrameIdAllocator;
use crate::module::ModuleCommands;
use crate::provision::Provisioner;
use crate::queue::{TransparentCommand, OK_REPLY};
use crate::text::latin1;
use crate::worker::{Link, Session, ShutdownSignal};

/// Node discovery: the module lists neighbours and ends with an empty line.
const DISCOVER_COMMAND: &[u8] = b"ATND\r";
const DISCOVER_TERMINATOR: &[u8] = b"\r\r\r";

/// Software reset. The module leaves command mode by itself.
const RESET_COMMAND: &[u8] = b"ATFR\r";

/// Where the supervisor is in its connect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Connected, switching the module into API mode.
    Negotiating,
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Negotiating => f.write_str("negotiating"),
            Self::Ready => f.write_str("ready"),
        }
    }
}

struct Connection {
    state: ConnectionState,
    link: Option<Link>,
    ids: FrameIdAllocator,
    next_link_id: u64,
}

impl Connection {
    fn is_healthy(&self) -> bool {
        self.link.as_ref().is_some_and(Link::is_healthy)
    }

    fn current_session(&self) -> Option<&Session> {
        self.link
            .as_ref()
            .filter(|link| link.is_healthy())
            .map(Link::session)
    }

    /// Mark the connection down and hand back the link. Dropping the link
    /// joins its workers, so callers drop it after releasing the lock.
    fn teardown(&mut self) -> Option<Link> {
        self.state = ConnectionState::Disconnected;
        self.link.take()
    }
}

/// Who is asking: external callers need a ready connection, the supervisor
/// itself works on the session it is negotiating.
#[derive(Clone, Copy)]
enum Gate<'a> {
    Ready,
    Pinned(&'a Session),
}

struct Shared {
    config: SupervisorConfig,
    connector: Box<dyn Connector>,
    negotiation: NegotiationPlan,
    provisioner: Option<Box<dyn Provisioner>>,
    connection: Mutex<Connection>,
    state_changed: Condvar,
    mode: Mutex<()>,
    shutdown: ShutdownSignal,
}

impl Shared {
    fn lock_connection(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_mode(&self) -> MutexGuard<'_, ()> {
        self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, conn: &mut Connection, state: ConnectionState) {
        if conn.state != state {
            debug!(from = %conn.state, to = %state, "connection state");
            conn.state = state;
        }
        self.state_changed.notify_all();
    }

    /// The session a request may be submitted on, or `NotConnected`.
    fn lease(&self, conn: &Connection, gate: Gate<'_>) -> Result<Session> {
        let current = conn.current_session();
        let session = match (gate, current) {
            (Gate::Ready, Some(session)) if conn.state == ConnectionState::Ready => {
                Some(session.clone())
            }
            (Gate::Pinned(pinned), Some(session))
                if session.id() == pinned.id() && conn.state != ConnectionState::Disconnected =>
            {
                Some(session.clone())
            }
            _ => None,
        };
        session.ok_or_else(|| {
            warn!(state = %conn.state, "not connected");
            EngineError::NotConnected
        })
    }

    /// Queue a frame built with a fresh id (or id `0` without `wants_reply`)
    /// and return the session and id to wait on.
    fn submit(
        &self,
        gate: Gate<'_>,
        wants_reply: bool,
        build: impl FnOnce(u8) -> Result<Frame>,
    ) -> Result<(Session, u8)> {
        let mut conn = self.lock_connection();
        let session = self.lease(&conn, gate)?;
        let _mode = self.lock_mode();
        let id = if wants_reply {
            conn.ids.allocate(&session.store)
        } else {
            0
        };
        let frame = build(id)?;
        debug!(%frame, "queueing frame");
        session.queue.push(frame)?;
        Ok((session, id))
    }

    fn await_reply(&self, session: &Session, id: u8, timeout: Duration) -> Result<Frame> {
        match session.store.take_by_id(id, timeout) {
            Some(frame) => Ok(frame),
            None if session.store.is_closed() => Err(EngineError::NotConnected),
            None => {
                warn!(frame_id = id, "timeout waiting for response frame");
                Err(EngineError::Timeout(timeout))
            }
        }
    }

    fn await_text(&self, session: &Session, terminator: &[u8]) -> Result<Vec<u8>> {
        let timeout = self.config.dialog_timeout;
        match session.text.wait_for(terminator, timeout) {
            Some(reply) => Ok(reply),
            None if session.text.is_closed() => Err(EngineError::NotConnected),
            None => Err(EngineError::Timeout(timeout)),
        }
    }

    fn send_data(&self, gate: Gate<'_>, address: Address64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(EngineError::InvalidCommand("data payload is empty".into()));
        }
        let (session, id) = self.submit(gate, true, |id| command::tx_request(id, address, data))?;
        let frame = self.await_reply(&session, id, self.config.response_timeout)?;
        if frame.api_id != api::TX_STATUS {
            error!(%frame, "unexpected reply to transmit request");
            return Err(EngineError::Protocol(format!(
                "expected transmit status, got api 0x{:02x}",
                frame.api_id
            )));
        }
        command::parse_tx_status(&frame)
    }

    fn local_at_query(&self, gate: Gate<'_>, at: &[u8]) -> Result<Bytes> {
        command::validate_at_command(at)?;
        let (session, id) = self.submit(gate, true, |id| command::local_at(id, at))?;
        let frame = self.await_reply(&session, id, self.config.response_timeout)?;
        if frame.api_id != api::AT_RESPONSE {
            error!(%frame, "unexpected reply to AT command");
            return Err(EngineError::Protocol(format!(
                "expected AT response, got api 0x{:02x}",
                frame.api_id
            )));
        }
        command::parse_at_response(at, &frame)
    }

    fn remote_at_query(
        &self,
        gate: Gate<'_>,
        address: Address64,
        at: &[u8],
        ack: bool,
    ) -> Result<Option<Bytes>> {
        command::validate_at_command(at)?;
        let (session, id) = self.submit(gate, ack, |id| command::remote_at(id, address, at))?;
        if !ack {
            return Ok(None);
        }
        let frame = self.await_reply(&session, id, self.config.remote_response_timeout)?;
        if frame.api_id != api::REMOTE_AT_RESPONSE {
            error!(%frame, "unexpected reply to remote AT command");
            return Err(EngineError::Protocol(format!(
                "expected remote AT response, got api 0x{:02x}",
                frame.api_id
            )));
        }
        command::parse_remote_at_response(at, &frame).map(Some)
    }

    /// Escape to command mode, run one command, and (unless `skip_exit`)
    /// return to API mode. The mode lock is held throughout.
    fn dialog(
        &self,
        gate: Gate<'_>,
        at: &[u8],
        terminator: &[u8],
        skip_exit: bool,
    ) -> Result<String> {
        if at.is_empty() || terminator.is_empty() {
            return Err(EngineError::InvalidCommand(
                "dialog command and terminator must not be empty".into(),
            ));
        }
        let conn = self.lock_connection();
        let session = self.lease(&conn, gate)?;
        let _mode = self.lock_mode();
        drop(conn);

        let flushed = session.text.drain();
        if !flushed.is_empty() {
            warn!(data = %latin1(&flushed), "data flushed");
        }

        if !self.shutdown.sleep(self.config.pre_escape_wait) {
            return Err(EngineError::NotConnected);
        }
        session
            .queue
            .push(TransparentCommand::escape(self.config.guard_time))?;
        debug!("waiting for OK after +++");
        self.await_text(&session, OK_REPLY).inspect_err(|err| {
            error!(%err, "timeout waiting for OK after +++");
        })?;

        session.queue.push(TransparentCommand::new(
            Bytes::copy_from_slice(at),
            Bytes::copy_from_slice(terminator),
        ))?;
        let reply = self.await_text(&session, terminator).inspect_err(|err| {
            error!(command = %latin1(at).trim_end(), %err, "timeout waiting for command reply");
        })?;

        if !skip_exit {
            match session
                .queue
                .push(TransparentCommand::exit())
                .and_then(|()| self.await_text(&session, OK_REPLY))
            {
                Ok(rest) if rest.is_empty() => {}
                Ok(rest) => error!(data = %latin1(&rest), "unexpected data before OK after ATCN"),
                Err(err) => error!(%err, "timeout waiting for OK after ATCN"),
            }
        }

        let reply = latin1(&reply);
        debug!(command = %latin1(at).trim_end(), reply = %reply, "dialog finished");
        Ok(reply)
    }

    fn receive(&self, timeout: Duration, take: impl FnOnce(&Session) -> Option<Frame>) -> Result<Frame> {
        let session = {
            let conn = self.lock_connection();
            self.lease(&conn, Gate::Ready)?
        };
        match take(&session) {
            Some(frame) => Ok(frame),
            None if session.store.is_closed() => Err(EngineError::NotConnected),
            None => Err(EngineError::Timeout(timeout)),
        }
    }

    /// Sleep that ends with `NotConnected` once the supervisor is stopped.
    fn pause(&self, duration: Duration) -> Result<()> {
        if self.shutdown.sleep(duration) {
            Ok(())
        } else {
            Err(EngineError::NotConnected)
        }
    }

    /// Tear down the current link outside the connection lock.
    fn retire(&self) {
        let link = {
            let mut conn = self.lock_connection();
            let link = conn.teardown();
            self.set_state(&mut conn, ConnectionState::Disconnected);
            link
        };
        drop(link);
    }

    /// Connect, negotiate and provision one link. The connection lock is not
    /// held while connecting, so callers keep failing fast meanwhile.
    fn establish(&self) -> Result<()> {
        self.retire();

        debug!(endpoint = %self.connector.describe(), "trying to connect to serial gateway");
        let stream = self.connector.connect()?;
        let link_id = {
            let mut conn = self.lock_connection();
            conn.next_link_id += 1;
            conn.next_link_id
        };
        let link = Link::start(stream, &self.config, link_id)?;
        let session = link.session().clone();

        {
            let mut conn = self.lock_connection();
            if self.shutdown.is_triggered() {
                drop(conn);
                drop(link);
                return Err(EngineError::NotConnected);
            }
            conn.link = Some(link);
            self.set_state(&mut conn, ConnectionState::Negotiating);
        }

        let module = SessionCommands {
            shared: self,
            session: &session,
        };
        let outcome = self.negotiation.run(&module).and_then(|_| match &self.provisioner {
            Some(provisioner) => provisioner.provision(&module),
            None => Ok(()),
        });

        {
            let mut conn = self.lock_connection();
            let current = conn
                .current_session()
                .is_some_and(|s| s.id() == session.id());
            if current && outcome.is_ok() {
                self.set_state(&mut conn, ConnectionState::Ready);
                info!(endpoint = %self.connector.describe(), connection = session.id(), "connection ready");
                return Ok(());
            }
        }

        self.retire();
        match outcome {
            Ok(()) => Err(EngineError::NotConnected),
            Err(err) => Err(err),
        }
    }

    fn run(&self) {
        let mut should_reconnect = true;
        while !self.shutdown.is_triggered() {
            let healthy = self.lock_connection().is_healthy();
            if !should_reconnect && !healthy {
                warn!(endpoint = %self.connector.describe(), "connection lost");
                should_reconnect = true;
            }

            if should_reconnect {
                if !self.shutdown.sleep(self.config.resync_pause) {
                    break;
                }
                match self.establish() {
                    Ok(()) => should_reconnect = false,
                    Err(err) => {
                        warn!(endpoint = %self.connector.describe(), %err, "connection attempt failed");
                        if !self.shutdown.sleep(self.config.reconnect_backoff) {
                            break;
                        }
                        continue;
                    }
                }
            }

            if !self.shutdown.sleep(self.config.poll_interval) {
                break;
            }
        }

        self.retire();
        info!("supervisor stopped");
    }
}

/// Module access bound to one not-yet-ready session, used by negotiation and
/// provisioning.
struct SessionCommands<'a> {
    shared: &'a Shared,
    session: &'a Session,
}

impl ModuleCommands for SessionCommands<'_> {
    fn local_at_query(&self, command: &[u8]) -> Result<Bytes> {
        self.shared
            .local_at_query(Gate::Pinned(self.session), command)
    }

    fn transparent_at_dialog(
        &self,
        command: &[u8],
        terminator: &[u8],
        skip_exit: bool,
    ) -> Result<String> {
        self.shared
            .dialog(Gate::Pinned(self.session), command, terminator, skip_exit)
    }

    fn pause(&self, duration: Duration) -> Result<()> {
        self.shared.pause(duration)
    }
}

/// Configures and starts a [`Supervisor`].
pub struct SupervisorBuilder {
    config: SupervisorConfig,
    connector: Option<Box<dyn Connector>>,
    negotiation: NegotiationPlan,
    provisioner: Option<Box<dyn Provisioner>>,
}

impl SupervisorBuilder {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            connector: None,
            negotiation: NegotiationPlan::default(),
            provisioner: None,
        }
    }

    /// Replace the default endpoint connector.
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    pub fn with_negotiation(mut self, plan: NegotiationPlan) -> Self {
        self.negotiation = plan;
        self
    }

    pub fn with_provisioner(mut self, provisioner: impl Provisioner + 'static) -> Self {
        self.provisioner = Some(Box::new(provisioner));
        self
    }

    /// Start the supervising thread. The first connect attempt happens
    /// in the background; use [`Supervisor::wait_ready`] to block on it.
    pub fn spawn(self) -> Result<Supervisor> {
        let connector = self.connector.unwrap_or_else(|| {
            Box::new(EndpointConnector::new(
                self.config.endpoint.clone(),
                self.config.connect_timeout,
            ))
        });
        let shared = Arc::new(Shared {
            config: self.config,
            connector,
            negotiation: self.negotiation,
            provisioner: self.provisioner,
            connection: Mutex::new(Connection {
                state: ConnectionState::Disconnected,
                link: None,
                ids: FrameIdAllocator::new(),
                next_link_id: 0,
            }),
            state_changed: Condvar::new(),
            mode: Mutex::new(()),
            shutdown: ShutdownSignal::new(),
        });

        let handle = thread::Builder::new()
            .name("xbridge-supervisor".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || shared.run()
            })?;
        info!(endpoint = %shared.connector.describe(), "supervisor started");

        Ok(Supervisor {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }
}

/// Keeps a connection to one module alive and issues commands over it.
///
/// All methods are safe to call from any thread. Commands fail with
/// [`EngineError::NotConnected`] straight away unless the connection is
/// ready; they never wait for a reconnect.
pub struct Supervisor {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("endpoint", &self.shared.connector.describe())
            .field("state", &self.state())
            .finish()
    }
}

impl Supervisor {
    pub fn builder(config: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(config)
    }

    /// Start with the default connector, negotiation and no provisioning.
    pub fn spawn(config: SupervisorConfig) -> Result<Self> {
        SupervisorBuilder::new(config).spawn()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock_connection().state
    }

    /// Block until the connection is ready, the timeout passes, or the
    /// supervisor stops.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut conn = self.shared.lock_connection();
        loop {
            if conn.state == ConnectionState::Ready {
                return Ok(());
            }
            if self.shared.shutdown.is_triggered() {
                return Err(EngineError::NotConnected);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EngineError::Timeout(timeout));
            }
            conn = self
                .shared
                .state_changed
                .wait_timeout(conn, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Stop the supervising thread and close the connection. Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown.trigger();
        self.shared.state_changed.notify_all();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("supervisor thread panicked");
            }
        }
    }

    /// Send `data` to `address` and wait for a successful transmit status.
    pub fn send_data(&self, address: Address64, data: &[u8]) -> Result<()> {
        self.shared.send_data(Gate::Ready, address, data)
    }

    /// Run a local AT command (`b"MY"`, or `b"ID\xaf\xae"` to set) and
    /// return the value bytes of the reply.
    pub fn local_at_query(&self, command: &[u8]) -> Result<Bytes> {
        self.shared.local_at_query(Gate::Ready, command)
    }

    /// Run an AT command on a remote node. With `ack == false` the request is
    /// sent with frame id 0 and `Ok(None)` returns once it is queued.
    pub fn remote_at_query(
        &self,
        address: Address64,
        command: &[u8],
        ack: bool,
    ) -> Result<Option<Bytes>> {
        self.shared
            .remote_at_query(Gate::Ready, address, command, ack)
    }

    /// Command-mode exchange with the local module. See [`ModuleCommands`].
    pub fn transparent_at_dialog(
        &self,
        command: &[u8],
        terminator: &[u8],
        skip_exit: bool,
    ) -> Result<String> {
        self.shared
            .dialog(Gate::Ready, command, terminator, skip_exit)
    }

    /// List neighbouring nodes with `ATND`.
    pub fn discover_nodes(&self) -> Result<String> {
        self.transparent_at_dialog(DISCOVER_COMMAND, DISCOVER_TERMINATOR, false)
    }

    /// Software-reset the module with `ATFR`.
    pub fn reset_module(&self) -> Result<String> {
        self.transparent_at_dialog(RESET_COMMAND, b"\r", true)
    }

    /// Next unsolicited frame from `address`, of any kind.
    pub fn recv_from_address(&self, address: Address64, timeout: Duration) -> Result<Frame> {
        self.shared.receive(timeout, |session| {
            session.store.take_by_address(address, timeout)
        })
    }

    /// Next unsolicited frame of kind `api_id` from `address`.
    pub fn recv_by_api_and_address(
        &self,
        api_id: u8,
        address: Address64,
        timeout: Duration,
    ) -> Result<Frame> {
        self.shared.receive(timeout, |session| {
            session
                .store
                .take_by_api_and_address(api_id, address, timeout)
        })
    }

    /// Next unsolicited frame from any node.
    pub fn recv_any(&self, timeout: Duration) -> Result<Frame> {
        self.shared
            .receive(timeout, |session| session.store.take_unsolicited(timeout))
    }
}

impl ModuleCommands for Supervisor {
    fn local_at_query(&self, command: &[u8]) -> Result<Bytes> {
        Supervisor::local_at_query(self, command)
    }

    fn transparent_at_dialog(
        &self,
        command: &[u8],
        terminator: &[u8],
        skip_exit: bool,
    ) -> Result<String> {
        Supervisor::transparent_at_dialog(self, command, terminator, skip_exit)
    }

    fn pause(&self, duration: Duration) -> Result<()> {
        self.shared.pause(duration)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! A non-blocking client TCP connection driven by the endpoint.
//!
//! [`ClientTcpSocket`] is a [`Transport`]: its private epoll set holds the socket and a write
//! wakeup descriptor. Writers on any thread push whole messages onto a bounded queue and
//! signal the wakeup; the worker thread that handles the transport flushes the queue as far as
//! the socket accepts, resuming partially sent messages on the next write readiness.
//!
//! # States
//!
//! ```text
//! Disconnected --connect--> Connecting --success--> Connected --request_close--> Disconnecting
//!      ^                        |                       |                            |
//!      +-------- failure -------+------ peer closed ----+------ queue drained -------+
//! ```
//!
//! Callbacks go to a [`SocketHandler`] and always run on the worker thread handling the socket,
//! with no socket lock held, so they may write or close from inside the callback.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use micro_reactor::{Interest, Readiness, Transport, TransportCore, WakeupFd};
use parking_lot::{Condvar, Mutex};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, trace, warn};

use crate::ensure;
use crate::protocol::SocketError;

const SOCKET_TOKEN: u64 = 1;
const WRITE_TOKEN: u64 = 2;
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Outcome of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionResult {
    Success = 0,
    UnknownError = 1,
    CouldNotConnect = 2,
    HostUnknown = 3,
    Timeout = 4,
}

impl ConnectionResult {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == ConnectionResult::Success
    }

    fn from_io_error(e: &io::Error) -> Self {
        match e.raw_os_error() {
            Some(libc::ECONNREFUSED) => ConnectionResult::CouldNotConnect,
            Some(libc::ENETUNREACH | libc::EHOSTUNREACH) => ConnectionResult::HostUnknown,
            Some(libc::ETIMEDOUT) => ConnectionResult::Timeout,
            _ => ConnectionResult::UnknownError,
        }
    }
}

impl fmt::Display for ConnectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionResult::Success => "success",
            ConnectionResult::UnknownError => "unknown error",
            ConnectionResult::CouldNotConnect => "could not connect",
            ConnectionResult::HostUnknown => "host unknown",
            ConnectionResult::Timeout => "timeout",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl SocketState {
    pub fn as_str(self) -> &'static str {
        match self {
            SocketState::Disconnected => "disconnected",
            SocketState::Connecting => "connecting",
            SocketState::Connected => "connected",
            SocketState::Disconnecting => "disconnecting",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSocketConfig {
    write_queue_size: usize,
    nodelay: bool,
}

impl ClientSocketConfig {
    pub fn new() -> Self {
        Self { write_queue_size: 32, nodelay: true }
    }

    /// Number of messages that may wait for the socket before `write` reports a full queue.
    pub fn write_queue_size(mut self, write_queue_size: usize) -> Self {
        self.write_queue_size = write_queue_size.max(1);
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for ClientSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives the events of a [`ClientTcpSocket`].
pub trait SocketHandler: Send + Sync {
    /// The connection attempt finished. On failure `lost` holds the queued messages that were
    /// never sent.
    fn on_connection_result(&self, socket: &ClientTcpSocket, result: ConnectionResult, lost: Vec<Bytes>);

    /// The connection went away, either closed by the peer or after `request_close` drained.
    fn on_disconnected(&self, _socket: &ClientTcpSocket) {}

    /// Called once per queued message; `sent` is the number of its bytes that reached the
    /// socket.
    fn on_write_result(&self, _socket: &ClientTcpSocket, _error: Option<io::Error>, _written: Bytes, _sent: usize) {}

    fn on_received_data(&self, socket: &ClientTcpSocket, data: &[u8]);

    fn on_error(&self, _socket: &ClientTcpSocket, error: SocketError) {
        error!(cause = %error, "unhandled socket error");
    }
}

#[derive(Debug, Default)]
struct SocketIo {
    socket: Option<Socket>,
    /// Bumped for every connection attempt, so events of a released socket are recognized.
    generation: u64,
    current: Option<Bytes>,
    current_sent: usize,
    write_ready: bool,
    /// The result of the current connection attempt has not reached the handler yet.
    awaiting_result: bool,
    close_after_connect: bool,
}

pub struct ClientTcpSocket {
    core: TransportCore,
    weak_self: Weak<ClientTcpSocket>,
    host: String,
    port: u16,
    config: ClientSocketConfig,
    handler: Arc<dyn SocketHandler>,
    state: Mutex<SocketState>,
    state_changed: Condvar,
    queue: Mutex<VecDeque<Bytes>>,
    write_wakeup: WakeupFd,
    io: Mutex<SocketIo>,
    bytes_sent: AtomicU64,
}

impl ClientTcpSocket {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        config: ClientSocketConfig,
        handler: Arc<dyn SocketHandler>,
    ) -> Result<Arc<Self>, SocketError> {
        let host = host.into();
        ensure!(!host.is_empty(), SocketError::invalid_address(&host, "empty host"));
        ensure!(port > 0, SocketError::invalid_address(format!("{host}:{port}"), "invalid port"));

        let core = TransportCore::new(format!("{host}:{port}"))?;
        let write_wakeup = WakeupFd::new()?;
        core.poller().add_fd(write_wakeup.as_raw_fd(), WRITE_TOKEN, Interest::READABLE)?;

        Ok(Arc::new_cyclic(|weak_self| Self {
            core,
            weak_self: Weak::clone(weak_self),
            host,
            port,
            config,
            handler,
            state: Mutex::new(SocketState::Disconnected),
            state_changed: Condvar::new(),
            queue: Mutex::new(VecDeque::new()),
            write_wakeup,
            io: Mutex::new(SocketIo::default()),
            bytes_sent: AtomicU64::new(0),
        }))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> SocketState {
        *self.state.lock()
    }

    /// Total number of bytes written to the socket since creation.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn can_send_messages(&self) -> bool {
        matches!(self.state(), SocketState::Connecting | SocketState::Connected)
    }

    /// Blocks until the socket reaches `state`.
    pub fn wait_state(&self, state: SocketState) {
        let mut current = self.state.lock();
        while *current != state {
            self.state_changed.wait(&mut current);
        }
    }

    /// Like [`ClientTcpSocket::wait_state`], giving up after `timeout`.
    pub fn wait_state_for(&self, state: SocketState, timeout: Duration) -> bool {
        let mut current = self.state.lock();
        let result = self.state_changed.wait_while_for(&mut current, |current| *current != state, timeout);
        !result.timed_out()
    }

    fn set_state(&self, state: SocketState) {
        let mut current = self.state.lock();
        trace!(peer = %self.core.peer_name(), from = current.as_str(), to = state.as_str(), "socket state");
        *current = state;
        self.state_changed.notify_all();
    }

    /// Starts a non-blocking connect.
    ///
    /// The result is reported through [`SocketHandler::on_connection_result`] from the worker
    /// thread handling this transport, so the socket must be registered with an endpoint.
    pub fn connect(&self) -> Result<(), SocketError> {
        {
            let mut state = self.state.lock();
            ensure!(
                *state == SocketState::Disconnected,
                SocketError::InvalidState { expected: SocketState::Disconnected.as_str(), actual: state.as_str() }
            );
            *state = SocketState::Connecting;
            let mut io = self.io.lock();
            io.awaiting_result = true;
            io.close_after_connect = false;
            drop(io);
            self.state_changed.notify_all();
        }

        let result = self.start_connect();
        if result.is_err() {
            self.set_state(SocketState::Disconnected);
        }
        result
    }

    fn start_connect(&self) -> Result<(), SocketError> {
        let Some(address) = self.resolve() else {
            warn!(host = %self.host, "host is not valid");
            self.report_failure(ConnectionResult::HostUnknown)?;
            return Ok(());
        };

        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_nodelay(self.config.nodelay)?;

        let connected = match socket.connect(&address.into()) {
            Ok(()) => true,
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => false,
            Err(e) => {
                debug!(%address, cause = %e, "connect failed");
                self.report_failure(ConnectionResult::from_io_error(&e))?;
                return Ok(());
            }
        };

        self.core.poller().add_fd_one_shot(socket.as_raw_fd(), SOCKET_TOKEN, Interest::BOTH)?;
        {
            let mut io = self.io.lock();
            io.socket = Some(socket);
            io.generation += 1;
            io.current = None;
            io.current_sent = 0;
            io.write_ready = false;
        }

        if connected {
            // the result is still delivered from the worker thread
            self.set_state(SocketState::Connected);
            self.post_connection_result(ConnectionResult::Success, Vec::new())?;
        } else {
            trace!(%address, "connection in progress");
        }
        Ok(())
    }

    /// Resolves the host, preferring IPv4 addresses.
    fn resolve(&self) -> Option<SocketAddr> {
        let addresses: Vec<SocketAddr> = (self.host.as_str(), self.port).to_socket_addrs().ok()?.collect();
        addresses.iter().find(|address| address.is_ipv4()).or_else(|| addresses.first()).copied()
    }

    fn report_failure(&self, result: ConnectionResult) -> Result<(), SocketError> {
        self.set_state(SocketState::Disconnected);
        let lost = self.drain_queue();
        self.post_connection_result(result, lost)
    }

    fn post_connection_result(&self, result: ConnectionResult, lost: Vec<Bytes>) -> Result<(), SocketError> {
        let weak = Weak::clone(&self.weak_self);
        self.core.do_async("connection result", move || {
            if let Some(socket) = weak.upgrade() {
                socket.deliver_connection_result(result, lost);
            }
        })?;
        Ok(())
    }

    /// Hands a connection result to the handler, then performs a close requested meanwhile.
    fn deliver_connection_result(&self, result: ConnectionResult, lost: Vec<Bytes>) {
        let close = {
            let mut io = self.io.lock();
            io.awaiting_result = false;
            std::mem::take(&mut io.close_after_connect)
        };
        self.handler.on_connection_result(self, result, lost);
        if close && result.is_success() {
            debug!(peer = %self.core.peer_name(), "closing after connect");
            self.request_close();
        }
    }

    fn drain_queue(&self) -> Vec<Bytes> {
        self.queue.lock().drain(..).collect()
    }

    /// Queues one message. Returns `Ok(false)` when the write queue is full.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<bool, SocketError> {
        ensure!(self.can_send_messages(), SocketError::NotConnected);

        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.config.write_queue_size {
                return Ok(false);
            }
            queue.push_back(data.into());
        }
        self.write_wakeup.signal()?;
        Ok(true)
    }

    /// Closes the connection once every queued message has been sent.
    ///
    /// While connecting, the close waits until the connection result was reported.
    pub fn request_close(&self) {
        let mut state = self.state.lock();
        if !matches!(*state, SocketState::Connecting | SocketState::Connected) {
            return;
        }
        {
            let mut io = self.io.lock();
            if *state == SocketState::Connecting || io.awaiting_result {
                io.close_after_connect = true;
                return;
            }
        }

        trace!(peer = %self.core.peer_name(), from = state.as_str(), to = SocketState::Disconnecting.as_str(), "socket state");
        *state = SocketState::Disconnecting;
        self.state_changed.notify_all();
        drop(state);
        if let Err(e) = self.write_wakeup.signal() {
            error!(cause = %e, "failed to signal close request");
        }
    }

    fn is_generation(&self, generation: u64) -> bool {
        self.io.lock().generation == generation
    }

    fn handle_socket_event(&self, readiness: Readiness) -> Result<(), SocketError> {
        let generation = self.io.lock().generation;
        let broken = readiness.is_error() || readiness.is_hup();

        if broken {
            if self.state() == SocketState::Connecting {
                self.handle_connection_result()?;
            }
            // keep what the peer sent before it went away, queued writes are lost
            if readiness.is_readable() && self.is_generation(generation) {
                self.handle_read_ready()?;
            }
            if self.is_generation(generation) {
                debug!(peer = %self.core.peer_name(), ?readiness, "socket hung up");
                self.handle_disconnection();
            }
            return Ok(());
        }

        if readiness.is_writable() {
            self.handle_write_ready()?;
        }
        if readiness.is_readable() && self.is_generation(generation) {
            self.handle_read_ready()?;
        }

        if !self.is_generation(generation) {
            // a callback reconnected, the new socket is armed already
            return Ok(());
        }
        if self.state() != SocketState::Disconnected {
            self.rearm_socket()?;
        }
        Ok(())
    }

    /// Re-arms the one-shot registration, asking for write readiness only while blocked.
    fn rearm_socket(&self) -> Result<(), SocketError> {
        let io = self.io.lock();
        if let Some(socket) = io.socket.as_ref() {
            let interest = if io.write_ready { Interest::READABLE } else { Interest::BOTH };
            self.core.poller().restart_fd_one_shot(socket.as_raw_fd(), SOCKET_TOKEN, interest)?;
        }
        Ok(())
    }

    fn handle_wakeup_event(&self) -> Result<(), SocketError> {
        self.write_wakeup.read()?;
        if self.io.lock().write_ready {
            self.flush()?;
            if !self.io.lock().write_ready {
                self.rearm_socket()?;
            }
        }
        self.finish_close_if_drained();
        Ok(())
    }

    fn handle_write_ready(&self) -> Result<(), SocketError> {
        if self.state() == SocketState::Connecting {
            self.handle_connection_result()?;
        }
        if self.state() != SocketState::Disconnected {
            self.io.lock().write_ready = true;
            self.flush()?;
            self.finish_close_if_drained();
        }
        Ok(())
    }

    fn handle_connection_result(&self) -> Result<(), SocketError> {
        let pending = {
            let io = self.io.lock();
            match io.socket.as_ref() {
                Some(socket) => socket.take_error()?,
                None => return Ok(()),
            }
        };

        match pending {
            None => {
                info!(peer = %self.core.peer_name(), "connected");
                self.set_state(SocketState::Connected);
                self.deliver_connection_result(ConnectionResult::Success, Vec::new());
            }
            Some(e) => {
                let result = ConnectionResult::from_io_error(&e);
                debug!(peer = %self.core.peer_name(), cause = %e, %result, "connection failed");
                self.release_socket();
                self.set_state(SocketState::Disconnected);
                let lost = self.drain_queue();
                self.deliver_connection_result(result, lost);
            }
        }
        Ok(())
    }

    /// Writes queued messages until the queue is empty or the socket would block.
    fn flush(&self) -> Result<(), SocketError> {
        loop {
            let mut io = self.io.lock();
            if !io.write_ready {
                return Ok(());
            }
            if io.current.is_none() {
                let Some(message) = self.queue.lock().pop_front() else {
                    return Ok(());
                };
                io.current = Some(message);
                io.current_sent = 0;
            }

            let (Some(socket), Some(message)) = (io.socket.as_ref(), io.current.clone()) else {
                return Ok(());
            };

            match socket.send_with_flags(&message[io.current_sent..], libc::MSG_NOSIGNAL) {
                Ok(sent) => {
                    io.current_sent += sent;
                    self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                    if io.current_sent == message.len() {
                        io.current = None;
                        io.current_sent = 0;
                        drop(io);
                        let len = message.len();
                        self.handler.on_write_result(self, None, message, len);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    io.write_ready = false;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let sent = io.current_sent;
                    io.write_ready = false;
                    io.current = None;
                    io.current_sent = 0;
                    drop(io);

                    let broken = matches!(e.raw_os_error(), Some(libc::EPIPE | libc::ECONNRESET));
                    warn!(peer = %self.core.peer_name(), cause = %e, sent, "write failed");
                    self.handler.on_write_result(self, Some(e), message, sent);
                    if broken {
                        self.handle_disconnection();
                    }
                    return Ok(());
                }
            }
        }
    }

    fn finish_close_if_drained(&self) {
        if self.state() != SocketState::Disconnecting {
            return;
        }
        let drained = self.io.lock().current.is_none() && self.queue.lock().is_empty();
        if drained {
            debug!(peer = %self.core.peer_name(), "closing drained connection");
            self.release_socket();
            self.set_state(SocketState::Disconnected);
            self.handler.on_disconnected(self);
        }
    }

    fn handle_read_ready(&self) -> Result<(), SocketError> {
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        loop {
            let result = {
                let io = self.io.lock();
                let Some(mut socket) = io.socket.as_ref() else {
                    return Ok(());
                };
                socket.read(&mut buffer)
            };

            match result {
                Ok(0) => {
                    self.handle_disconnection();
                    return Ok(());
                }
                Ok(len) => self.handler.on_received_data(self, &buffer[..len]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if matches!(e.raw_os_error(), Some(libc::EBADF | libc::EINVAL)) => {
                    // late event for a descriptor closed meanwhile
                    trace!(cause = %e, "read on closed socket");
                    return Ok(());
                }
                Err(e) if e.raw_os_error() == Some(libc::ECONNRESET) => {
                    self.handle_disconnection();
                    return Ok(());
                }
                Err(e) => return Err(SocketError::io(e)),
            }
        }
    }

    fn handle_disconnection(&self) {
        if self.state() == SocketState::Disconnected {
            return;
        }
        info!(peer = %self.core.peer_name(), "disconnected");
        self.release_socket();
        self.set_state(SocketState::Disconnected);
        self.handler.on_disconnected(self);
    }

    fn release_socket(&self) {
        let mut io = self.io.lock();
        if let Some(socket) = io.socket.take() {
            if let Err(e) = self.core.poller().remove_fd(socket.as_raw_fd()) {
                warn!(cause = %e, "failed to deregister socket");
            }
        }
        io.current = None;
        io.current_sent = 0;
        io.write_ready = false;
    }
}

impl Transport for ClientTcpSocket {
    fn core(&self) -> &TransportCore {
        &self.core
    }

    fn handle_events(&self) {
        let mut failures = Vec::new();
        let result = self.core.dispatch(|token, readiness| {
            let result = match token {
                SOCKET_TOKEN => self.handle_socket_event(readiness),
                WRITE_TOKEN => self.handle_wakeup_event(),
                _ => {
                    warn!(token, ?readiness, "unexpected token");
                    Ok(())
                }
            };
            if let Err(e) = result {
                failures.push(e);
            }
        });

        if let Err(e) = result {
            failures.push(e.into());
        }
        for failure in failures {
            self.handler.on_error(self, failure);
        }
    }

    fn close_peer(&self) {
        let previous = self.state();
        self.release_socket();
        self.queue.lock().clear();
        self.set_state(SocketState::Disconnected);
        if previous != SocketState::Disconnected {
            self.handler.on_disconnected(self);
        }
    }

    fn status(&self) -> String {
        let state = self.state.try_lock().map_or("locked", |state| state.as_str());
        let queued = self.queue.try_lock().map_or(0, |queue| queue.len());
        format!("client socket {} state {} queued {} sent {}", self.core.peer_name(), state, queued, self.bytes_sent())
    }
}

impl fmt::Debug for ClientTcpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTcpSocket")
            .field("core", &self.core)
            .field("state", &self.state())
            .field("bytes_sent", &self.bytes_sent())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use micro_reactor::{Endpoint, EndpointConfig};
    use std::net::TcpListener;
    use std::sync::mpsc::{self, Receiver, Sender};

    const WAIT: Duration = Duration::from_secs(10);

    struct NullHandler;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Connected(ConnectionResult, Vec<Bytes>),
        Written(Bytes),
        Disconnected,
    }

    struct RecordingHandler {
        tx: Sender<Event>,
    }

    impl SocketHandler for RecordingHandler {
        fn on_connection_result(&self, _socket: &ClientTcpSocket, result: ConnectionResult, lost: Vec<Bytes>) {
            self.tx.send(Event::Connected(result, lost)).unwrap();
        }

        fn on_disconnected(&self, _socket: &ClientTcpSocket) {
            self.tx.send(Event::Disconnected).unwrap();
        }

        fn on_write_result(&self, _socket: &ClientTcpSocket, error: Option<io::Error>, written: Bytes, _sent: usize) {
            assert!(error.is_none(), "{error:?}");
            self.tx.send(Event::Written(written)).unwrap();
        }

        fn on_received_data(&self, _socket: &ClientTcpSocket, _data: &[u8]) {}
    }

    fn recording_socket(port: u16, config: ClientSocketConfig) -> (Arc<ClientTcpSocket>, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let socket = ClientTcpSocket::new("127.0.0.1", port, config, Arc::new(RecordingHandler { tx })).unwrap();
        (socket, rx)
    }

    fn start_endpoint(name: &str) -> Endpoint {
        let endpoint = Endpoint::new(EndpointConfig::new(name).num_threads(1)).unwrap();
        endpoint.spinup_with_config().unwrap();
        endpoint
    }

    fn refused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    impl SocketHandler for NullHandler {
        fn on_connection_result(&self, _socket: &ClientTcpSocket, _result: ConnectionResult, _lost: Vec<Bytes>) {}

        fn on_received_data(&self, _socket: &ClientTcpSocket, _data: &[u8]) {}
    }

    #[test]
    fn test_invalid_addresses() {
        let handler: Arc<dyn SocketHandler> = Arc::new(NullHandler);
        assert!(matches!(
            ClientTcpSocket::new("", 80, ClientSocketConfig::new(), Arc::clone(&handler)),
            Err(SocketError::InvalidAddress { .. })
        ));
        assert!(matches!(
            ClientTcpSocket::new("localhost", 0, ClientSocketConfig::new(), handler),
            Err(SocketError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_write_requires_connection() {
        let socket = ClientTcpSocket::new("localhost", 80, ClientSocketConfig::new(), Arc::new(NullHandler)).unwrap();
        assert_eq!(socket.state(), SocketState::Disconnected);
        assert!(!socket.can_send_messages());
        assert!(matches!(socket.write("data"), Err(SocketError::NotConnected)));
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(ConnectionResult::Success.code(), 0);
        assert_eq!(ConnectionResult::HostUnknown.code(), 3);
        assert_eq!(ConnectionResult::from_io_error(&io::Error::from_raw_os_error(libc::ECONNREFUSED)), ConnectionResult::CouldNotConnect);
        assert_eq!(ConnectionResult::from_io_error(&io::Error::from_raw_os_error(libc::EIO)), ConnectionResult::UnknownError);
    }

    #[test]
    fn test_request_close_drains_queued_writes() {
        let endpoint = start_endpoint("socket-drain");
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (socket, rx) = recording_socket(listener.local_addr().unwrap().port(), ClientSocketConfig::new());
        endpoint.notify_new_transport(Arc::clone(&socket) as Arc<dyn Transport>).unwrap();

        socket.connect().unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Event::Connected(ConnectionResult::Success, Vec::new()));
        let (mut peer, _) = listener.accept().unwrap();

        for message in ["one ", "two ", "three"] {
            assert!(socket.write(message).unwrap());
        }
        socket.request_close();
        assert!(matches!(socket.write("late"), Err(SocketError::NotConnected)));

        let mut received = String::new();
        peer.read_to_string(&mut received).unwrap();
        assert_eq!(received, "one two three");

        let events: Vec<Event> = (0..4).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(
            events,
            vec![
                Event::Written(Bytes::from_static(b"one ")),
                Event::Written(Bytes::from_static(b"two ")),
                Event::Written(Bytes::from_static(b"three")),
                Event::Disconnected,
            ]
        );
        assert_eq!(socket.state(), SocketState::Disconnected);
        assert_eq!(socket.bytes_sent(), 13);
    }

    #[test]
    fn test_full_queue_rejects_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        // not registered, so nothing flushes the queue
        let (socket, _rx) = recording_socket(listener.local_addr().unwrap().port(), ClientSocketConfig::new().write_queue_size(2));
        socket.connect().unwrap();
        assert!(socket.can_send_messages());

        assert!(socket.write("a").unwrap());
        assert!(socket.write("b").unwrap());
        assert!(!socket.write("c").unwrap());
        assert!(socket.status().contains("queued 2"), "{}", socket.status());
    }

    #[test]
    fn test_failed_connect_returns_queued_messages() {
        let endpoint = start_endpoint("socket-lost");
        let (socket, rx) = recording_socket(refused_port(), ClientSocketConfig::new());

        // queue before registering so the failure cannot be handled in between
        socket.connect().unwrap();
        let queued: Vec<Bytes> =
            [Bytes::from_static(b"first"), Bytes::from_static(b"second")].into_iter().filter(|message| matches!(socket.write(message.clone()), Ok(true))).collect();
        endpoint.notify_new_transport(Arc::clone(&socket) as Arc<dyn Transport>).unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Event::Connected(ConnectionResult::CouldNotConnect, queued));
        assert_eq!(socket.state(), SocketState::Disconnected);
        assert!(socket.status().contains("queued 0"), "{}", socket.status());
    }

    #[test]
    fn test_refused_connection_result() {
        let endpoint = start_endpoint("socket-refused");
        let (socket, rx) = recording_socket(refused_port(), ClientSocketConfig::new());
        endpoint.notify_new_transport(Arc::clone(&socket) as Arc<dyn Transport>).unwrap();

        socket.connect().unwrap();
        let Event::Connected(result, lost) = rx.recv_timeout(WAIT).unwrap() else {
            panic!("expected a connection result");
        };
        assert_eq!(result, ConnectionResult::CouldNotConnect);
        assert_eq!(result.code(), 2);
        assert!(lost.is_empty());
        // a refused connect is not a disconnect
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_close_while_connecting_reports_result_first() {
        let endpoint = start_endpoint("socket-early-close");
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (socket, rx) = recording_socket(listener.local_addr().unwrap().port(), ClientSocketConfig::new());

        socket.connect().unwrap();
        socket.request_close();
        endpoint.notify_new_transport(Arc::clone(&socket) as Arc<dyn Transport>).unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Event::Connected(ConnectionResult::Success, Vec::new()));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Event::Disconnected);
        assert_eq!(socket.state(), SocketState::Disconnected);
    }
}

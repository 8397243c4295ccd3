//! One pooled client connection.
//!
//! A connection owns a [`ClientTcpSocket`] registered with the endpoint for the lifetime of
//! the client and performs one request at a time on it: connect if needed, write the request
//! head, then the body in slices of [`SEND_SIZE`] bytes, and feed the response to a
//! [`ResponseParser`]. The socket reconnects transparently when a previous response required
//! the connection to be closed.

use std::io;
use std::sync::{Arc, Weak};
use std::time::Instant;

use bytes::Bytes;
use micro_reactor::Transport;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::callbacks::{HttpClientCallbacks, HttpClientError};
use super::request::{HttpRequest, build_request_head};
use super::Pool;
use crate::parser::{MessageEvents, ResponseEvents, ResponseParser};
use crate::protocol::SocketError;
use crate::socket::{ClientSocketConfig, ClientTcpSocket, ConnectionResult, SocketHandler, SocketState};

/// Largest body slice queued on the socket at once.
pub const SEND_SIZE: usize = 65536;

/// A request waiting for or owned by a connection.
pub(crate) struct PendingRequest {
    pub(crate) request: HttpRequest,
    pub(crate) callbacks: Box<dyn HttpClientCallbacks>,
}

impl PendingRequest {
    pub(crate) fn fail(mut self, error: HttpClientError) {
        self.callbacks.on_done(&self.request, error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nothing left to write.
    Idle,
    /// The request head is queued.
    Headers,
    /// Body slices are queued.
    Body,
}

struct InFlight {
    pending: PendingRequest,
    deadline: Option<Instant>,
    timeout_posted: bool,
}

struct ExchangeState {
    phase: Phase,
    current: Option<InFlight>,
    parser: ResponseParser,
    upload_offset: usize,
    reconnect_pending: bool,
    /// Response callbacks are running with the request moved out of `current`.
    delivering: bool,
}

impl ExchangeState {
    fn is_busy(&self) -> bool {
        self.current.is_some() || self.delivering
    }
}

/// The socket handler of one connection.
pub(crate) struct Exchange {
    index: usize,
    pool: Weak<Pool>,
    state: Mutex<ExchangeState>,
}

/// Adapts parser events to the callbacks of the request in flight.
struct ResponseSink<'a> {
    pending: &'a mut PendingRequest,
    done: Option<bool>,
}

impl MessageEvents for ResponseSink<'_> {
    fn on_header(&mut self, line: &[u8]) {
        self.pending.callbacks.on_header(&self.pending.request, line);
    }

    fn on_data(&mut self, data: &[u8]) {
        self.pending.callbacks.on_data(&self.pending.request, data);
    }

    fn on_done(&mut self, require_close: bool) {
        self.done = Some(require_close);
    }
}

impl ResponseEvents for ResponseSink<'_> {
    fn on_response_start(&mut self, version: &str, code: u16) {
        self.pending.callbacks.on_response_start(&self.pending.request, version, code);
    }
}

impl Exchange {
    fn new(index: usize, pool: Weak<Pool>) -> Self {
        Self {
            index,
            pool,
            state: Mutex::new(ExchangeState {
                phase: Phase::Idle,
                current: None,
                parser: ResponseParser::new(),
                upload_offset: 0,
                reconnect_pending: false,
                delivering: false,
            }),
        }
    }

    fn write_head(&self, socket: &ClientTcpSocket, state: &mut ExchangeState) -> Result<(), HttpClientError> {
        let Some(current) = state.current.as_ref() else {
            return Ok(());
        };
        let head = build_request_head(&current.pending.request).map_err(|e| {
            warn!(connection = self.index, cause = %e, "cannot build request");
            HttpClientError::SendFailed
        })?;
        trace!(connection = self.index, head = %head, "sending request");

        state.phase = Phase::Headers;
        match socket.write(head) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(connection = self.index, "socket queue full");
                Err(HttpClientError::SendFailed)
            }
            Err(e) => {
                warn!(connection = self.index, cause = %e, "cannot send request");
                Err(HttpClientError::SendFailed)
            }
        }
    }

    /// Queues the next body slice, or switches to `Idle` once the body is sent.
    fn write_body(&self, socket: &ClientTcpSocket, state: &mut ExchangeState) -> Result<(), HttpClientError> {
        let body = state.current.as_ref().and_then(|current| current.pending.request.content()).map(|content| content.body().clone());
        let Some(body) = body else {
            state.phase = Phase::Idle;
            return Ok(());
        };

        let remaining = body.len().saturating_sub(state.upload_offset);
        if remaining == 0 {
            state.phase = Phase::Idle;
            return Ok(());
        }

        let chunk = body.slice(state.upload_offset..state.upload_offset + remaining.min(SEND_SIZE));
        state.phase = Phase::Body;
        match socket.write(chunk) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(HttpClientError::SendFailed),
        }
    }

    /// Ends the request in flight, then hands the connection back to the pool.
    fn end_request(&self, socket: &ClientTcpSocket, error: HttpClientError, require_close: bool) {
        let finished = {
            let mut state = self.state.lock();
            state.phase = Phase::Idle;
            state.upload_offset = 0;
            state.parser.clear();
            state.current.take()
        };

        if require_close || !error.is_success() {
            socket.request_close();
        }

        let Some(finished) = finished else {
            return;
        };
        debug!(connection = self.index, %error, "request done");
        finished.pending.fail(error);

        if let Some(pool) = self.pool.upgrade() {
            pool.connection_done(self.index);
        }
    }

    /// Ends the request if its deadline passed.
    fn expire(&self, socket: &ClientTcpSocket, now: Instant) {
        let expired = self.state.lock().current.as_ref().and_then(|current| current.deadline).is_some_and(|deadline| deadline <= now);
        if expired {
            debug!(connection = self.index, "request timed out");
            self.end_request(socket, HttpClientError::Timeout, true);
        }
    }
}

impl SocketHandler for Exchange {
    fn on_connection_result(&self, socket: &ClientTcpSocket, result: ConnectionResult, lost: Vec<Bytes>) {
        if !lost.is_empty() {
            debug!(connection = self.index, lost = lost.len(), "messages lost on connect");
        }
        if result.is_success() {
            let outcome = {
                let mut state = self.state.lock();
                if state.current.is_some() && state.phase == Phase::Headers {
                    self.write_head(socket, &mut state)
                } else {
                    Ok(())
                }
            };
            if let Err(error) = outcome {
                self.end_request(socket, error, true);
            }
        } else {
            warn!(connection = self.index, %result, "connection failed");
            self.end_request(socket, result.into(), false);
        }
    }

    fn on_disconnected(&self, socket: &ClientTcpSocket) {
        let closing = self.pool.upgrade().is_none_or(|pool| pool.is_closing());
        let (in_flight, reconnect) = {
            let mut state = self.state.lock();
            let reconnect = std::mem::take(&mut state.reconnect_pending) && !closing;
            (state.current.is_some() && !reconnect, reconnect)
        };

        if in_flight {
            // the peer went away before the response completed
            self.end_request(socket, HttpClientError::Unknown, false);
        } else if reconnect {
            if let Err(e) = socket.connect() {
                warn!(connection = self.index, cause = %e, "reconnect failed");
                self.end_request(socket, HttpClientError::CouldNotConnect, false);
            }
        }
    }

    fn on_write_result(&self, socket: &ClientTcpSocket, error: Option<io::Error>, _written: Bytes, sent: usize) {
        if let Some(e) = error {
            warn!(connection = self.index, cause = %e, "write failed");
            self.end_request(socket, HttpClientError::SendFailed, true);
            return;
        }

        let outcome = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Headers => {
                    state.upload_offset = 0;
                    self.write_body(socket, &mut state)
                }
                Phase::Body => {
                    state.upload_offset += sent;
                    self.write_body(socket, &mut state)
                }
                Phase::Idle => Ok(()),
            }
        };
        if let Err(error) = outcome {
            self.end_request(socket, error, true);
        }
    }

    fn on_received_data(&self, socket: &ClientTcpSocket, data: &[u8]) {
        if socket.state() == SocketState::Disconnecting {
            trace!(connection = self.index, len = data.len(), "dropping data of a closing connection");
            return;
        }

        let (mut in_flight, mut parser) = {
            let mut state = self.state.lock();
            let Some(in_flight) = state.current.take() else {
                warn!(connection = self.index, len = data.len(), "data received without a request");
                return;
            };
            state.delivering = true;
            (in_flight, std::mem::replace(&mut state.parser, ResponseParser::new()))
        };

        // callbacks run unlocked, they may call back into the client
        let mut sink = ResponseSink { pending: &mut in_flight.pending, done: None };
        let outcome = parser.feed(data, &mut sink).map(|()| sink.done);

        {
            let mut state = self.state.lock();
            state.current = Some(in_flight);
            state.parser = parser;
            state.delivering = false;
        }

        match outcome {
            Ok(Some(require_close)) => self.end_request(socket, HttpClientError::None, require_close),
            Ok(None) => {}
            Err(e) => {
                warn!(connection = self.index, cause = %e, "invalid response");
                self.end_request(socket, HttpClientError::ParseFailed, true);
            }
        }
    }

    fn on_error(&self, socket: &ClientTcpSocket, error: SocketError) {
        warn!(connection = self.index, cause = %error, "socket error");
        self.end_request(socket, HttpClientError::Unknown, true);
    }
}

/// A pool slot: the socket plus the state of the request it serves.
pub(crate) struct HttpConnection {
    socket: Arc<ClientTcpSocket>,
    exchange: Arc<Exchange>,
}

impl HttpConnection {
    pub(crate) fn new(index: usize, pool: Weak<Pool>, host: &str, port: u16, config: ClientSocketConfig) -> Result<Self, SocketError> {
        let exchange = Arc::new(Exchange::new(index, pool));
        let socket = ClientTcpSocket::new(host, port, config, Arc::clone(&exchange) as Arc<dyn SocketHandler>)?;
        Ok(Self { socket, exchange })
    }

    pub(crate) fn socket(&self) -> &Arc<ClientTcpSocket> {
        &self.socket
    }

    /// Starts `pending` on this connection. The connection must be idle.
    pub(crate) fn perform(&self, pending: PendingRequest) {
        let socket = self.socket.as_ref();
        let exchange = self.exchange.as_ref();

        let outcome = {
            let mut state = exchange.state.lock();
            if state.is_busy() {
                warn!(connection = exchange.index, verb = %pending.request.verb(), "connection is busy");
                drop(state);
                pending.fail(HttpClientError::Unknown);
                return;
            }

            state.parser.clear();
            state.parser.set_expect_body(pending.request.expect_response_body());
            let deadline = pending.request.timeout().map(|timeout| Instant::now() + timeout);
            state.current = Some(InFlight { pending, deadline, timeout_posted: false });
            state.phase = Phase::Headers;
            state.upload_offset = 0;

            match socket.state() {
                SocketState::Connected => exchange.write_head(socket, &mut state),
                // the head goes out with the connection result
                SocketState::Connecting => Ok(()),
                SocketState::Disconnecting => {
                    state.reconnect_pending = true;
                    Ok(())
                }
                SocketState::Disconnected => socket.connect().map_err(|e| {
                    warn!(connection = exchange.index, cause = %e, "cannot connect");
                    HttpClientError::CouldNotConnect
                }),
            }
        };

        if let Err(error) = outcome {
            exchange.end_request(socket, error, false);
        }
    }

    /// Posts a timeout to the connection's own thread if its request is overdue.
    pub(crate) fn check_timeout(&self, now: Instant) {
        {
            let mut state = self.exchange.state.lock();
            let Some(current) = state.current.as_mut() else {
                return;
            };
            if current.timeout_posted || current.deadline.is_none_or(|deadline| deadline > now) {
                return;
            }
            current.timeout_posted = true;
        }

        let socket = Arc::downgrade(&self.socket);
        let exchange = Arc::clone(&self.exchange);
        let posted = self.socket.core().do_async("request timeout", move || {
            if let Some(socket) = socket.upgrade() {
                exchange.expire(&socket, Instant::now());
            }
        });
        if let Err(e) = posted {
            warn!(cause = %e, "cannot post request timeout");
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.exchange.state.lock().is_busy()
    }
}

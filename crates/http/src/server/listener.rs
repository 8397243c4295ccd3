use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::Arc;

use micro_reactor::{EndpointHandle, Interest, Transport, TransportCore};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};

use super::RequestHandler;
use super::connection::ServerConnection;
use crate::protocol::SocketError;

const LISTENER_TOKEN: u64 = 1;
const BACKLOG: i32 = 1024;

/// A listening socket registered with an endpoint.
///
/// Every accepted peer becomes a [`ServerConnection`] registered with the same endpoint.
pub struct HttpListener {
    core: TransportCore,
    listener: TcpListener,
    local_addr: SocketAddr,
    endpoint: EndpointHandle,
    handler: Arc<dyn RequestHandler>,
}

impl HttpListener {
    /// Binds `address` and starts accepting on the endpoint's worker threads.
    pub fn bind(endpoint: &EndpointHandle, address: impl ToSocketAddrs, handler: Arc<dyn RequestHandler>) -> Result<Arc<Self>, SocketError> {
        let address = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SocketError::invalid_address("<none>", "address resolved to nothing"))?;

        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&address.into())?;
        socket.listen(BACKLOG)?;
        socket.set_nonblocking(true)?;
        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr()?;

        let core = TransportCore::new(format!("listener {local_addr}"))?;
        core.poller().add_fd(listener.as_raw_fd(), LISTENER_TOKEN, Interest::READABLE)?;

        let listener = Arc::new(Self { core, listener, local_addr, endpoint: endpoint.clone(), handler });
        endpoint.notify_new_transport(Arc::clone(&listener) as Arc<dyn Transport>)?;
        info!(address = %local_addr, "listening");
        Ok(listener)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting. Connections already accepted stay open.
    pub fn close(&self) -> Result<(), SocketError> {
        self.core.close_when_handler_finished();
        // wakes the transport so the endpoint sees the request
        self.core.do_async("close listener", || {})?;
        Ok(())
    }

    fn accept_all(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    trace!(%peer, "accepted");
                    let registered = ServerConnection::new(stream, peer, Arc::clone(&self.handler))
                        .and_then(|connection| self.endpoint.notify_new_transport(connection).map_err(SocketError::from));
                    if let Err(e) = registered {
                        warn!(%peer, cause = %e, "cannot register connection");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // out of descriptors and the like: retried on the next readiness
                    warn!(address = %self.local_addr, cause = %e, "accept failed");
                    return;
                }
            }
        }
    }
}

impl Transport for HttpListener {
    fn core(&self) -> &TransportCore {
        &self.core
    }

    fn handle_events(&self) {
        let result = self.core.dispatch(|token, readiness| {
            if token == LISTENER_TOKEN {
                self.accept_all();
            } else {
                warn!(token, ?readiness, "unexpected token");
            }
        });
        if let Err(e) = result {
            warn!(address = %self.local_addr, cause = %e, "listener dispatch failed");
        }
    }

    fn close_peer(&self) {
        if let Err(e) = self.core.poller().remove_fd(self.listener.as_raw_fd()) {
            debug!(cause = %e, "listener already deregistered");
        }
        info!(address = %self.local_addr, "stopped listening");
    }

    fn status(&self) -> String {
        format!("http listener {} zombie {}", self.local_addr, self.core.is_zombie())
    }
}

impl fmt::Debug for HttpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpListener").field("local_addr", &self.local_addr).field("core", &self.core).finish_non_exhaustive()
    }
}

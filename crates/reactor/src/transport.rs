//! The transport abstraction: one peer connection driven by the endpoint.
//!
//! Every transport owns a [`TransportCore`]. The core holds a private epoll set which the
//! transport fills with its own descriptors (a socket, usually) plus a wakeup descriptor used by
//! [`TransportCore::do_async`]. The endpoint only ever sees the descriptor of that private set:
//! when anything inside it becomes ready, the endpoint hands the transport to one of its worker
//! threads through [`Transport::handle_events`].
//!
//! Because the endpoint registration is one-shot, two calls to `handle_events` for the same
//! transport never overlap. Other threads must not touch the transport state directly, they
//! post a closure with `do_async` which then runs inside the next `handle_events`.

use std::collections::VecDeque;
use std::fmt;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::epoll::{Epoller, Events, Interest, Readiness};
use crate::error::ReactorError;
use crate::fd::WakeupFd;

pub type TransportId = u64;

type AsyncTask = Box<dyn FnOnce() + Send>;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by every transport implementation.
pub struct TransportCore {
    id: TransportId,
    peer_name: Mutex<String>,
    poller: Epoller,
    wakeup: WakeupFd,
    pending: Mutex<VecDeque<(&'static str, AsyncTask)>>,
    zombie: AtomicBool,
    close_requested: AtomicBool,
}

impl TransportCore {
    /// Token of the `do_async` wakeup descriptor inside the private epoll set.
    pub const ASYNC_TOKEN: u64 = 0;

    const MAX_EVENTS: usize = 8;

    pub fn new(peer_name: impl Into<String>) -> Result<Self, ReactorError> {
        let poller = Epoller::new()?;
        let wakeup = WakeupFd::new()?;
        poller.add_fd(wakeup.as_raw_fd(), Self::ASYNC_TOKEN, Interest::READABLE)?;

        Ok(Self {
            id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
            peer_name: Mutex::new(peer_name.into()),
            poller,
            wakeup,
            pending: Mutex::new(VecDeque::new()),
            zombie: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn peer_name(&self) -> String {
        self.peer_name.lock().clone()
    }

    pub fn set_peer_name(&self, peer_name: impl Into<String>) {
        *self.peer_name.lock() = peer_name.into();
    }

    /// The private epoll set, for registering the transport's own descriptors.
    ///
    /// Tokens other than [`TransportCore::ASYNC_TOKEN`] are free for the transport to use.
    pub fn poller(&self) -> &Epoller {
        &self.poller
    }

    /// The descriptor the endpoint polls on behalf of this transport.
    pub fn poll_fd(&self) -> RawFd {
        self.poller.as_raw_fd()
    }

    /// Posts `task` to run on the transport's next dispatch.
    pub fn do_async(&self, name: &'static str, task: impl FnOnce() + Send + 'static) -> Result<(), ReactorError> {
        self.pending.lock().push_back((name, Box::new(task)));
        self.wakeup.signal()
    }

    pub fn has_async(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    pub fn is_zombie(&self) -> bool {
        self.zombie.load(Ordering::Acquire)
    }

    pub(crate) fn set_zombie(&self) {
        self.zombie.store(true, Ordering::Release);
    }

    /// Asks the endpoint to close this transport once the current dispatch returns.
    pub fn close_when_handler_finished(&self) {
        self.close_requested.store(true, Ordering::Release);
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    /// Runs the posted closures in submission order.
    pub fn run_pending(&self) -> Result<(), ReactorError> {
        self.wakeup.read()?;
        loop {
            // the lock is released before the task runs so it may post more work
            let next = self.pending.lock().pop_front();
            let Some((name, task)) = next else {
                return Ok(());
            };
            trace!(transport = self.id, task = name, "running async task");
            task();
        }
    }

    /// Collects the ready descriptors of the private epoll set without blocking.
    ///
    /// Posted closures are run first, every other readiness is passed to `on_event` in the
    /// order the kernel reported it.
    pub fn dispatch(&self, mut on_event: impl FnMut(u64, Readiness)) -> Result<(), ReactorError> {
        let mut events = Events::with_capacity(Self::MAX_EVENTS);
        self.poller.poll(&mut events, 0)?;

        let mut run_async = false;
        for (token, readiness) in events.iter() {
            if token == Self::ASYNC_TOKEN {
                run_async = true;
            } else {
                on_event(token, readiness);
            }
        }

        if run_async {
            self.run_pending()?;
        }
        Ok(())
    }
}

impl fmt::Debug for TransportCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCore")
            .field("id", &self.id)
            .field("peer_name", &*self.peer_name.lock())
            .field("zombie", &self.is_zombie())
            .field("close_requested", &self.close_requested())
            .finish_non_exhaustive()
    }
}

/// One peer connection registered with an [`crate::Endpoint`].
pub trait Transport: Send + Sync {
    fn core(&self) -> &TransportCore;

    /// Handles whatever became ready in the private epoll set.
    ///
    /// Runs on a worker thread, never concurrently with another `handle_events` of the same
    /// transport.
    fn handle_events(&self);

    /// Releases the peer once the endpoint dropped the registration.
    fn close_peer(&self) {}

    /// One-line description used by the endpoint's diagnostic dumps.
    fn status(&self) -> String {
        let core = self.core();
        format!("transport {} peer '{}' zombie {} async {}", core.id(), core.peer_name(), core.is_zombie(), core.has_async())
    }

    fn do_async(&self, name: &'static str, task: impl FnOnce() + Send + 'static) -> Result<(), ReactorError>
    where
        Self: Sized,
    {
        self.core().do_async(name, task)
    }

    fn is_zombie(&self) -> bool {
        self.core().is_zombie()
    }

    fn peer_name(&self) -> String {
        self.core().peer_name()
    }
}

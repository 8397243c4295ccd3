use std::collections::VecDeque;
use std::os::fd::AsRawFd;
use std::sync::Weak;

use micro_reactor::{Interest, Transport, TransportCore, WakeupFd};
use parking_lot::Mutex;
use tracing::{trace, warn};

use super::Pool;
use super::callbacks::HttpClientError;
use super::connection::PendingRequest;
use crate::protocol::SocketError;

const QUEUE_TOKEN: u64 = 1;

/// Bounded hand-off between the threads enqueuing requests and the connection pool.
///
/// The queue is a transport of its own: a push signals the wakeup descriptor and the worker
/// thread that picks up the event moves the requests into the pool.
pub(crate) struct RequestQueue {
    core: TransportCore,
    wakeup: WakeupFd,
    capacity: usize,
    requests: Mutex<VecDeque<PendingRequest>>,
    pool: Weak<Pool>,
}

impl RequestQueue {
    pub(crate) fn new(name: &str, capacity: usize, pool: Weak<Pool>) -> Result<Self, SocketError> {
        let core = TransportCore::new(format!("{name} queue"))?;
        let wakeup = WakeupFd::new()?;
        core.poller().add_fd(wakeup.as_raw_fd(), QUEUE_TOKEN, Interest::READABLE)?;

        Ok(Self { core, wakeup, capacity: capacity.max(1), requests: Mutex::new(VecDeque::new()), pool })
    }

    /// Pushes a request, handing it back when the queue is full.
    pub(crate) fn push(&self, pending: PendingRequest) -> Result<(), PendingRequest> {
        {
            let mut requests = self.requests.lock();
            if requests.len() >= self.capacity {
                return Err(pending);
            }
            requests.push_back(pending);
        }

        if let Err(e) = self.wakeup.signal() {
            // the request stays queued and goes out with the next signal
            warn!(cause = %e, "failed to signal request queue");
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn drain(&self) -> Vec<PendingRequest> {
        self.requests.lock().drain(..).collect()
    }

    fn forward_requests(&self) -> Result<(), SocketError> {
        self.wakeup.read()?;
        loop {
            let next = self.requests.lock().pop_front();
            let Some(pending) = next else {
                return Ok(());
            };
            trace!(verb = %pending.request.verb(), url = %pending.request.url(), "dequeued request");
            match self.pool.upgrade() {
                Some(pool) => pool.handle_queue_event(pending),
                None => pending.fail(HttpClientError::Unknown),
            }
        }
    }
}

impl Transport for RequestQueue {
    fn core(&self) -> &TransportCore {
        &self.core
    }

    fn handle_events(&self) {
        let mut failures: Vec<SocketError> = Vec::new();
        let result = self.core.dispatch(|token, readiness| {
            if token != QUEUE_TOKEN {
                warn!(token, ?readiness, "unexpected token");
                return;
            }
            if let Err(e) = self.forward_requests() {
                failures.push(e);
            }
        });

        if let Err(e) = result {
            failures.push(e.into());
        }
        for failure in failures {
            warn!(cause = %failure, "request queue failure");
        }
    }

    fn close_peer(&self) {
        for pending in self.drain() {
            pending.fail(HttpClientError::Unknown);
        }
    }

    fn status(&self) -> String {
        let queued = self.requests.try_lock().map_or(0, |requests| requests.len());
        format!("request queue {} queued {} capacity {}", self.core.peer_name(), queued, self.capacity)
    }
}

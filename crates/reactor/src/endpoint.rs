//! The endpoint reactor.
//!
//! An [`Endpoint`] owns one epoll instance shared by a fixed pool of worker threads. Each
//! registered descriptor is described by an [`EpollData`]: the endpoint's own wakeup
//! descriptor, a periodic timer, or a transport. Transport and timer registrations are
//! one-shot, so the thread that received a notification owns the descriptor until it re-arms
//! it, and no two threads ever handle the same descriptor at once.
//!
//! # Locks
//!
//! - the transport table (live transports, per-host counters) is guarded by one mutex
//! - the registration set (token to [`EpollData`]) is guarded by a second mutex, held only
//!   long enough to pin an entry, never across a handler
//!
//! # Shutdown
//!
//! [`Endpoint::shutdown`] asks every transport to close after its current handler, stops the
//! timers, waits until the transport table is empty, wakes the workers and joins them. There is
//! no deadline on the wait: a transport that never finishes its handler keeps shutdown waiting.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::counter::WaitCounter;
use crate::ensure;
use crate::epoll::{Epoller, Events, Interest, Readiness};
use crate::error::ReactorError;
use crate::fd::{TimerFd, WakeupFd};
use crate::transport::{Transport, TransportId};

/// Callback of a periodic timer, receiving the number of periods elapsed since the last call.
pub type OnTimer = Box<dyn Fn(u64) + Send + Sync>;

type TransportHook = Arc<dyn Fn(&dyn Transport) + Send + Sync>;

/// Identifies a timer added with [`EndpointHandle::add_periodic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

const WAKEUP_TOKEN: u64 = 0;
const IDLE_DUMP_INTERVAL: Duration = Duration::from_millis(100);

/// One registered descriptor.
pub enum EpollData {
    Wakeup { fd: RawFd },
    Timer { timer: TimerFd, on_timer: OnTimer },
    Transport { fd: RawFd, transport: Arc<dyn Transport> },
}

impl EpollData {
    pub fn fd(&self) -> RawFd {
        match self {
            EpollData::Wakeup { fd } | EpollData::Transport { fd, .. } => *fd,
            EpollData::Timer { timer, .. } => timer.as_raw_fd(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            EpollData::Wakeup { .. } => "wakeup",
            EpollData::Timer { .. } => "timer",
            EpollData::Transport { .. } => "transport",
        }
    }
}

impl fmt::Debug for EpollData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpollData").field("kind", &self.kind()).field("fd", &self.fd()).finish()
    }
}

/// Endpoint settings.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    name: String,
    num_threads: usize,
    poll_timeout: Duration,
    max_events: usize,
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), num_threads: 1, poll_timeout: Duration::from_millis(100), max_events: 64 }
    }

    /// Number of worker threads started by [`Endpoint::spinup_with_config`].
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Upper bound of a single blocking poll, after which idle threads re-check for shutdown.
    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new("endpoint")
    }
}

#[derive(Default)]
struct TransportTable {
    mapping: HashMap<TransportId, (Arc<dyn Transport>, u64)>,
    by_host: BTreeMap<String, usize>,
}

#[derive(Default)]
struct Hooks {
    on_open: Option<TransportHook>,
    on_close: Option<TransportHook>,
}

struct Shared {
    config: EndpointConfig,
    poller: Epoller,
    wakeup: WakeupFd,
    transports: Mutex<TransportTable>,
    data_set: Mutex<HashMap<u64, Arc<EpollData>>>,
    next_token: AtomicU64,
    num_transports: WaitCounter,
    threads_active: WaitCounter,
    shutdown: AtomicBool,
    disallow_timers: AtomicBool,
    hooks: Mutex<Hooks>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// A cloneable handle used by transports and clients to register with an endpoint.
#[derive(Clone)]
pub struct EndpointHandle {
    shared: Arc<Shared>,
}

/// Owner of the reactor. Dropping it shuts the reactor down.
pub struct Endpoint {
    handle: EndpointHandle,
}

impl Endpoint {
    pub fn new(config: EndpointConfig) -> Result<Self, ReactorError> {
        let poller = Epoller::new()?;
        let wakeup = WakeupFd::new()?;

        let shared = Arc::new(Shared {
            config,
            poller,
            wakeup,
            transports: Mutex::new(TransportTable::default()),
            data_set: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(WAKEUP_TOKEN + 1),
            num_transports: WaitCounter::new(),
            threads_active: WaitCounter::new(),
            shutdown: AtomicBool::new(false),
            disallow_timers: AtomicBool::new(false),
            hooks: Mutex::new(Hooks::default()),
            threads: Mutex::new(Vec::new()),
        });

        // the wakeup is level-triggered: once signaled it wakes every worker until drained
        let wakeup_fd = shared.wakeup.as_raw_fd();
        shared.data_set.lock().insert(WAKEUP_TOKEN, Arc::new(EpollData::Wakeup { fd: wakeup_fd }));
        shared.poller.add_fd(wakeup_fd, WAKEUP_TOKEN, Interest::READABLE)?;

        Ok(Self { handle: EndpointHandle { shared } })
    }

    pub fn handle(&self) -> EndpointHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.handle.shared.config.name()
    }

    /// Starts the number of worker threads configured in [`EndpointConfig`], waiting for them.
    pub fn spinup_with_config(&self) -> Result<(), ReactorError> {
        self.spinup(self.handle.shared.config.num_threads, true)
    }

    /// Starts `num_threads` worker threads.
    ///
    /// With `synchronous`, returns only once every thread entered its event loop.
    pub fn spinup(&self, num_threads: usize, synchronous: bool) -> Result<(), ReactorError> {
        let shared = &self.handle.shared;
        let mut threads = shared.threads.lock();
        ensure!(threads.is_empty(), ReactorError::AlreadyRunning { name: shared.config.name.clone() });

        shared.shutdown.store(false, Ordering::Release);
        shared.disallow_timers.store(false, Ordering::Release);
        shared.threads_active.reset();

        for index in 0..num_threads {
            let worker = Arc::clone(shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", shared.config.name))
                .spawn(move || worker.run_event_thread())
                .map_err(|e| ReactorError::io("spawn event thread", e))?;
            threads.push(handle);
        }
        drop(threads);

        info!(endpoint = %shared.config.name, num_threads, "endpoint spun up");
        if synchronous {
            shared.threads_active.wait_until(|active| active >= num_threads);
        }
        Ok(())
    }

    /// Runs an event loop on the calling thread until [`Endpoint::shutdown`] is called elsewhere.
    pub fn use_this_thread(&self) {
        self.handle.shared.run_event_thread();
    }

    /// Stops the endpoint. Calling it again, or on an endpoint that never ran, is harmless.
    pub fn shutdown(&self) {
        self.handle.shared.shutdown_endpoint();
    }

    /// Adds a repeating timer. The callback receives the number of periods elapsed since it last
    /// ran, so a slow callback sees a backlog count instead of losing ticks.
    pub fn add_periodic(&self, period: Duration, on_timer: impl Fn(u64) + Send + Sync + 'static) -> Result<TimerId, ReactorError> {
        self.handle.add_periodic(period, on_timer)
    }

    pub fn remove_periodic(&self, id: TimerId) -> Result<(), ReactorError> {
        self.handle.remove_periodic(id)
    }

    pub fn on_transport_open(&self, hook: impl Fn(&dyn Transport) + Send + Sync + 'static) {
        self.handle.shared.hooks.lock().on_open = Some(Arc::new(hook));
    }

    pub fn on_transport_close(&self, hook: impl Fn(&dyn Transport) + Send + Sync + 'static) {
        self.handle.shared.hooks.lock().on_close = Some(Arc::new(hook));
    }

    pub fn notify_new_transport(&self, transport: Arc<dyn Transport>) -> Result<(), ReactorError> {
        self.handle.notify_new_transport(transport)
    }

    pub fn notify_close_transport(&self, transport: &Arc<dyn Transport>) -> Result<(), ReactorError> {
        self.handle.notify_close_transport(transport)
    }

    pub fn num_connections(&self) -> usize {
        self.handle.num_connections()
    }

    pub fn num_connections_by_host(&self) -> BTreeMap<String, usize> {
        self.handle.num_connections_by_host()
    }

    pub fn threads_active(&self) -> usize {
        self.handle.shared.threads_active.get()
    }

    /// Blocks until no transport is registered, dumping the live transports every 100ms.
    pub fn sleep_until_idle(&self) {
        self.handle.shared.sleep_until_idle();
    }

    pub fn dump_state(&self) {
        self.handle.shared.dump_state();
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name())
            .field("num_connections", &self.num_connections())
            .field("threads_active", &self.threads_active())
            .finish()
    }
}

impl EndpointHandle {
    pub fn add_periodic(&self, period: Duration, on_timer: impl Fn(u64) + Send + Sync + 'static) -> Result<TimerId, ReactorError> {
        ensure!(!self.is_shutting_down(), ReactorError::ShuttingDown { name: self.shared.config.name.clone() });
        let timer = TimerFd::periodic(period)?;
        let token = self.shared.next_token();
        debug!(endpoint = %self.shared.config.name, ?period, token, "adding periodic timer");
        self.shared.start_polling(token, Arc::new(EpollData::Timer { timer, on_timer: Box::new(on_timer) }))?;
        Ok(TimerId(token))
    }

    /// Stops a timer. Its descriptor closes as soon as no worker runs its callback anymore.
    pub fn remove_periodic(&self, id: TimerId) -> Result<(), ReactorError> {
        let removed = {
            let mut data_set = self.shared.data_set.lock();
            match data_set.get(&id.0).map(AsRef::as_ref) {
                Some(EpollData::Timer { .. }) => data_set.remove(&id.0),
                _ => None,
            }
        };
        let Some(data) = removed else {
            return Err(ReactorError::UnknownTimer { id: id.0 });
        };

        if let Err(e) = self.shared.poller.remove_fd(data.fd()) {
            warn!(fd = data.fd(), cause = %e, "failed to deregister timer");
        }
        debug!(endpoint = %self.shared.config.name, token = id.0, "removed periodic timer");
        Ok(())
    }

    /// Registers a transport. The transport is polled until it is closed.
    pub fn notify_new_transport(&self, transport: Arc<dyn Transport>) -> Result<(), ReactorError> {
        let shared = &self.shared;
        ensure!(!self.is_shutting_down(), ReactorError::ShuttingDown { name: shared.config.name.clone() });

        let core = transport.core();
        let id = core.id();
        let peer = core.peer_name();
        let token = shared.next_token();

        {
            let mut table = shared.transports.lock();
            ensure!(!table.mapping.contains_key(&id), ReactorError::AlreadyRegistered { fd: core.poll_fd() });
            table.mapping.insert(id, (Arc::clone(&transport), token));
            *table.by_host.entry(peer.clone()).or_default() += 1;
            shared.num_transports.increment();
        }

        let data = Arc::new(EpollData::Transport { fd: core.poll_fd(), transport: Arc::clone(&transport) });
        if let Err(e) = shared.start_polling(token, data) {
            shared.forget_transport(id, &peer);
            return Err(e);
        }
        if !shared.transports.lock().mapping.contains_key(&id) {
            // closed while the descriptor was being added
            shared.stop_polling(token, core.poll_fd());
        }

        trace!(endpoint = %shared.config.name, transport = id, %peer, "new transport");
        let hook = shared.hooks.lock().on_open.clone();
        if let Some(hook) = hook {
            hook(transport.as_ref());
        }
        Ok(())
    }

    /// Deregisters a transport, marks it as a zombie and closes its peer.
    pub fn notify_close_transport(&self, transport: &Arc<dyn Transport>) -> Result<(), ReactorError> {
        self.shared.close_transport(transport.as_ref())
    }

    pub fn num_connections(&self) -> usize {
        self.shared.num_transports.get()
    }

    pub fn num_connections_by_host(&self) -> BTreeMap<String, usize> {
        self.shared.transports.lock().by_host.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.disallow_timers.load(Ordering::Acquire)
    }
}

impl fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointHandle").field("name", &self.shared.config.name).finish()
    }
}

impl Shared {
    fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Publishes the registration before arming its descriptor, so the first event always finds it.
    fn start_polling(&self, token: u64, data: Arc<EpollData>) -> Result<(), ReactorError> {
        let fd = data.fd();
        {
            let mut data_set = self.data_set.lock();
            ensure!(!data_set.contains_key(&token), ReactorError::AlreadyRegistered { fd });
            data_set.insert(token, data);
        }
        if let Err(e) = self.poller.add_fd_one_shot(fd, token, Interest::READABLE) {
            self.data_set.lock().remove(&token);
            return Err(e);
        }
        Ok(())
    }

    fn stop_polling(&self, token: u64, fd: RawFd) {
        if let Err(e) = self.poller.remove_fd(fd) {
            warn!(fd, cause = %e, "failed to deregister descriptor");
        }
        self.data_set.lock().remove(&token);
    }

    fn restart_polling(&self, token: u64, fd: RawFd) {
        // a descriptor removed concurrently reports ENOENT, which is expected here
        if let Err(e) = self.poller.restart_fd_one_shot(fd, token, Interest::READABLE) {
            if e.raw_os_error() == Some(libc::ENOENT) {
                trace!(fd, "descriptor removed before re-arm");
            } else {
                error!(fd, cause = %e, "failed to re-arm descriptor");
            }
        }
    }

    /// Drops a table entry whose descriptor never got registered.
    fn forget_transport(&self, id: TransportId, peer: &str) {
        let mut table = self.transports.lock();
        if table.mapping.remove(&id).is_some() {
            Self::release_host(&mut table, peer);
            self.num_transports.decrement();
        }
    }

    fn release_host(table: &mut TransportTable, peer: &str) {
        if let Some(count) = table.by_host.get_mut(peer) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                table.by_host.remove(peer);
            }
        }
    }

    fn close_transport(&self, transport: &dyn Transport) -> Result<(), ReactorError> {
        let core = transport.core();
        let id = core.id();
        let (registered, token) = {
            let mut table = self.transports.lock();
            let Some(entry) = table.mapping.remove(&id) else {
                error!(transport = id, status = %transport.status(), "closing transport that is not registered");
                return Err(ReactorError::NotRegistered { id });
            };
            Self::release_host(&mut table, &core.peer_name());
            self.num_transports.decrement();
            entry
        };

        core.set_zombie();
        self.stop_polling(token, core.poll_fd());

        let hook = self.hooks.lock().on_close.clone();
        if let Some(hook) = hook {
            hook(transport);
        }

        trace!(endpoint = %self.config.name, transport = id, "closed transport");
        // outside the lock: closing may call back into the endpoint
        registered.close_peer();
        Ok(())
    }

    fn run_event_thread(&self) {
        self.threads_active.increment();
        debug!(endpoint = %self.config.name, "event thread started");

        let timeout_ms = i32::try_from(self.config.poll_timeout.as_millis()).unwrap_or(i32::MAX);
        let mut events = Events::with_capacity(self.config.max_events);

        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.poller.poll(&mut events, timeout_ms) {
                error!(endpoint = %self.config.name, cause = %e, "poll failed, event thread exits");
                break;
            }
            for (token, readiness) in events.iter() {
                if self.handle_epoll_event(token, readiness) {
                    break;
                }
            }
        }

        debug!(endpoint = %self.config.name, "event thread shutting down");
        self.threads_active.decrement();
    }

    /// Dispatches one event, returning `true` for the shutdown wakeup.
    fn handle_epoll_event(&self, token: u64, readiness: Readiness) -> bool {
        // pin the registration so it outlives a concurrent deregistration
        let pinned = self.data_set.lock().get(&token).cloned();
        let Some(data) = pinned else {
            trace!(token, ?readiness, "event for a removed registration");
            return false;
        };
        trace!(token, kind = data.kind(), ?readiness, "handling event");

        match data.as_ref() {
            EpollData::Transport { fd, transport } => {
                self.handle_transport_event(transport.as_ref());
                if !transport.is_zombie() {
                    self.restart_polling(token, *fd);
                }
                false
            }
            EpollData::Timer { timer, on_timer } => {
                Self::handle_timer_event(timer, on_timer);
                if !self.disallow_timers.load(Ordering::Acquire) {
                    self.restart_polling(token, timer.as_raw_fd());
                }
                false
            }
            EpollData::Wakeup { .. } => true,
        }
    }

    fn handle_transport_event(&self, transport: &dyn Transport) {
        transport.handle_events();

        let core = transport.core();
        if core.close_requested() && !core.is_zombie() {
            if let Err(e) = self.close_transport(transport) {
                warn!(transport = core.id(), cause = %e, "failed to close transport");
            }
        }
    }

    fn handle_timer_event(timer: &TimerFd, on_timer: &OnTimer) {
        match timer.read_expirations() {
            Ok(Some(expirations)) => on_timer(expirations),
            Ok(None) => {}
            Err(e) => error!(fd = timer.as_raw_fd(), cause = %e, "timer read failed"),
        }
    }

    fn sleep_until_idle(&self) {
        while !self.num_transports.wait_until_for(|n| n == 0, IDLE_DUMP_INTERVAL) {
            let live: Vec<Arc<dyn Transport>> =
                self.transports.lock().mapping.values().map(|(transport, _)| Arc::clone(transport)).collect();
            warn!(endpoint = %self.config.name, transports = live.len(), "waiting for transports to close");
            for transport in live {
                warn!("{}", transport.status());
            }
            self.dump_state();
        }
    }

    fn dump_state(&self) {
        let table = self.transports.lock();
        info!(
            endpoint = %self.config.name,
            transports = self.num_transports.get(),
            registrations = self.data_set.lock().len(),
            threads_active = self.threads_active.get(),
            by_host = ?table.by_host,
            "endpoint state"
        );
    }

    fn shutdown_endpoint(&self) {
        info!(endpoint = %self.config.name, transports = self.num_transports.get(), "endpoint shutdown");

        // pinned so timer descriptors stay open until the workers are gone
        let data_set_copy: Vec<(u64, Arc<EpollData>)> =
            self.data_set.lock().iter().map(|(token, data)| (*token, Arc::clone(data))).collect();

        self.disallow_timers.store(true, Ordering::Release);

        let live: Vec<Arc<dyn Transport>> = self.transports.lock().mapping.values().map(|(transport, _)| Arc::clone(transport)).collect();
        for transport in live {
            let target = Arc::clone(&transport);
            let posted = transport.core().do_async("killtransport", move || target.core().close_when_handler_finished());
            if let Err(e) = posted {
                error!(transport = transport.core().id(), cause = %e, "failed to post transport close");
            }
        }

        for (token, data) in &data_set_copy {
            if let EpollData::Timer { timer, .. } = data.as_ref() {
                self.stop_polling(*token, timer.as_raw_fd());
            }
        }

        if self.threads_active.get() == 0 {
            // no event loop runs the posted closes
            let live: Vec<Arc<dyn Transport>> =
                self.transports.lock().mapping.values().map(|(transport, _)| Arc::clone(transport)).collect();
            for transport in live {
                if let Err(e) = self.close_transport(transport.as_ref()) {
                    warn!(transport = transport.core().id(), cause = %e, "failed to close idle transport");
                }
            }
        }

        self.sleep_until_idle();

        self.shutdown.store(true, Ordering::Release);
        if let Err(e) = self.wakeup.signal() {
            error!(endpoint = %self.config.name, cause = %e, "failed to signal shutdown wakeup");
        }
        self.threads_active.wait_until(|active| active == 0);

        // timer descriptors close here, nobody polls them anymore
        drop(data_set_copy);

        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                error!(endpoint = %self.config.name, "event thread panicked");
            }
        }

        // undo the signal so the endpoint can be spun up again
        if let Err(e) = self.wakeup.read() {
            error!(endpoint = %self.config.name, cause = %e, "failed to reset shutdown wakeup");
        }
        debug!(endpoint = %self.config.name, "endpoint stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportCore;
    use std::sync::atomic::AtomicUsize;

    struct QuietTransport {
        core: TransportCore,
    }

    impl Transport for QuietTransport {
        fn core(&self) -> &TransportCore {
            &self.core
        }

        fn handle_events(&self) {
            self.core.dispatch(|_, _| {}).unwrap();
        }
    }

    #[test]
    fn test_spinup_twice_fails() {
        let endpoint = Endpoint::new(EndpointConfig::new("twice")).unwrap();
        endpoint.spinup(2, true).unwrap();
        assert_eq!(endpoint.threads_active(), 2);

        let result = endpoint.spinup(1, true);
        assert!(matches!(result, Err(ReactorError::AlreadyRunning { .. })));

        endpoint.shutdown();
        assert_eq!(endpoint.threads_active(), 0);

        // restartable after shutdown
        endpoint.spinup(1, true).unwrap();
        endpoint.shutdown();
    }

    #[test]
    fn test_register_twice_fails() {
        let endpoint = Endpoint::new(EndpointConfig::new("dup")).unwrap();
        let transport: Arc<dyn Transport> = Arc::new(QuietTransport { core: TransportCore::new("peer").unwrap() });

        endpoint.notify_new_transport(Arc::clone(&transport)).unwrap();
        assert!(endpoint.notify_new_transport(Arc::clone(&transport)).is_err());
        assert_eq!(endpoint.num_connections(), 1);

        endpoint.notify_close_transport(&transport).unwrap();
        assert!(transport.is_zombie());
        assert!(matches!(endpoint.notify_close_transport(&transport), Err(ReactorError::NotRegistered { .. })));
        assert_eq!(endpoint.num_connections(), 0);
    }

    #[test]
    fn test_hooks_run_on_open_and_close() {
        let endpoint = Endpoint::new(EndpointConfig::new("hooks")).unwrap();
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        {
            let opened = Arc::clone(&opened);
            endpoint.on_transport_open(move |_| {
                opened.fetch_add(1, Ordering::SeqCst);
            });
            let closed = Arc::clone(&closed);
            endpoint.on_transport_close(move |_| {
                closed.fetch_add(1, Ordering::SeqCst);
            });
        }

        let transport: Arc<dyn Transport> = Arc::new(QuietTransport { core: TransportCore::new("peer").unwrap() });
        endpoint.notify_new_transport(Arc::clone(&transport)).unwrap();
        endpoint.notify_close_transport(&transport).unwrap();

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        // a transport that is no longer registered is not reported again
        assert!(endpoint.notify_close_transport(&transport).is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_after_shutdown_fails() {
        let endpoint = Endpoint::new(EndpointConfig::new("late")).unwrap();
        endpoint.spinup(1, true).unwrap();
        endpoint.shutdown();

        let transport: Arc<dyn Transport> = Arc::new(QuietTransport { core: TransportCore::new("peer").unwrap() });
        assert!(matches!(endpoint.notify_new_transport(Arc::clone(&transport)), Err(ReactorError::ShuttingDown { .. })));
        assert!(matches!(endpoint.add_periodic(Duration::from_millis(10), |_| {}), Err(ReactorError::ShuttingDown { .. })));
        assert_eq!(endpoint.num_connections(), 0);
        assert!(endpoint.num_connections_by_host().is_empty());

        endpoint.spinup(1, true).unwrap();
        endpoint.notify_new_transport(Arc::clone(&transport)).unwrap();
        assert_eq!(endpoint.num_connections(), 1);
        endpoint.shutdown();
        assert_eq!(endpoint.num_connections(), 0);
    }

    #[test]
    fn test_removed_timer_stops_ticking() {
        let endpoint = Endpoint::new(EndpointConfig::new("untimer")).unwrap();
        endpoint.spinup(1, true).unwrap();
        let registrations = endpoint.handle.shared.data_set.lock().len();

        let ticks = Arc::new(AtomicUsize::new(0));
        let counting = Arc::clone(&ticks);
        let id = endpoint
            .add_periodic(Duration::from_millis(5), move |_| {
                counting.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        while ticks.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        endpoint.remove_periodic(id).unwrap();
        assert_eq!(endpoint.handle.shared.data_set.lock().len(), registrations);
        // a tick already being handled may still land
        thread::sleep(Duration::from_millis(20));
        let stopped = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), stopped);

        assert!(matches!(endpoint.remove_periodic(id), Err(ReactorError::UnknownTimer { .. })));
        endpoint.shutdown();
    }
}

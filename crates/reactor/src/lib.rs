//! A multi-threaded epoll reactor for non-blocking network services.
//!
//! The crate provides the bottom layer of the micro stack: an [`Endpoint`] owning a pool of
//! worker threads that all poll one epoll instance, and the [`Transport`] trait implemented by
//! every connection the endpoint drives (client sockets, accepted server connections, request
//! queues).
//!
//! # Architecture
//!
//! - [`epoll`]: the multiplexer, a thin wrapper over `epoll_create1`/`epoll_ctl`/`epoll_wait`
//! - [`fd`]: eventfd based wakeups and timerfd based periodic timers
//! - [`transport`]: the per-connection core (private epoll set, `do_async` queue, zombie flag)
//! - [`endpoint`]: registration table, worker threads, timers and the shutdown protocol
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use micro_reactor::{Endpoint, EndpointConfig};
//!
//! let endpoint = Endpoint::new(EndpointConfig::new("example").num_threads(4)).unwrap();
//! endpoint.spinup_with_config().unwrap();
//! endpoint
//!     .add_periodic(Duration::from_millis(500), |ticks| println!("{ticks} tick(s)"))
//!     .unwrap();
//! // ... register transports ...
//! endpoint.shutdown();
//! ```
//!
//! # Limitations
//!
//! - Linux only (epoll, eventfd, timerfd)
//! - shutdown waits for transports without a deadline

mod counter;
mod utils;

pub mod endpoint;
pub mod epoll;
pub mod error;
pub mod fd;
pub mod transport;

pub(crate) use utils::ensure;

pub use endpoint::{Endpoint, EndpointConfig, EndpointHandle, EpollData, OnTimer, TimerId};
pub use epoll::{Epoller, Events, Interest, Readiness};
pub use error::ReactorError;
pub use fd::{TimerFd, WakeupFd};
pub use transport::{Transport, TransportCore, TransportId};

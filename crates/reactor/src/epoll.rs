//! Thin wrapper around a Linux epoll instance.
//!
//! Descriptors are registered with a `u64` token which is handed back by [`Epoller::poll`]
//! together with the [`Readiness`] mask. Two registration flavours exist:
//!
//! - [`Epoller::add_fd`]: level notification, delivered for as long as the descriptor is ready
//! - [`Epoller::add_fd_one_shot`]: at most one notification, then the descriptor stays silent
//!   until [`Epoller::restart_fd_one_shot`] re-arms it
//!
//! The one-shot flavour is what lets several threads poll the same instance: a descriptor that
//! fired is owned by the thread that received it until that thread re-arms it.

use std::fmt;
use std::io;
use std::ops::BitOr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use crate::error::ReactorError;

/// Readiness kinds a registration is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);
    pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);
    pub const BOTH: Interest = Interest(libc::EPOLLIN as u32 | libc::EPOLLOUT as u32);

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Self) -> Self::Output {
        Interest(self.0 | rhs.0)
    }
}

/// The event mask reported for a descriptor.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Readiness(u32);

impl Readiness {
    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_readable(self) -> bool {
        self.0 & libc::EPOLLIN as u32 != 0
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.0 & libc::EPOLLOUT as u32 != 0
    }

    #[inline]
    pub fn is_priority(self) -> bool {
        self.0 & libc::EPOLLPRI as u32 != 0
    }

    #[inline]
    pub fn is_error(self) -> bool {
        self.0 & libc::EPOLLERR as u32 != 0
    }

    #[inline]
    pub fn is_hup(self) -> bool {
        self.0 & libc::EPOLLHUP as u32 != 0
    }

    #[inline]
    pub fn is_read_hup(self) -> bool {
        self.0 & libc::EPOLLRDHUP as u32 != 0
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.is_readable(), 'I'),
            (self.is_writable(), 'O'),
            (self.is_priority(), 'P'),
            (self.is_error(), 'E'),
            (self.is_hup(), 'H'),
            (self.is_read_hup(), 'R'),
        ];
        let mask: String = flags.iter().filter(|(set, _)| *set).map(|(_, c)| *c).collect();
        write!(f, "Readiness({mask})")
    }
}

/// Reusable buffer receiving the events of one [`Epoller::poll`] call.
pub struct Events {
    buffer: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { buffer: vec![libc::epoll_event { events: 0, u64: 0 }; capacity], len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over the `(token, readiness)` pairs in the order the kernel reported them.
    pub fn iter(&self) -> impl Iterator<Item = (u64, Readiness)> + '_ {
        self.buffer[..self.len].iter().map(|event| {
            let token = event.u64;
            let bits = event.events;
            (token, Readiness(bits))
        })
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[derive(Debug)]
pub struct Epoller {
    fd: OwnedFd,
}

impl Epoller {
    pub fn new() -> Result<Self, ReactorError> {
        // SAFETY: epoll_create1 takes no pointers.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(ReactorError::last_os_error("epoll_create1"));
        }
        // SAFETY: fd was just returned by epoll_create1 and nothing else owns it.
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    /// Registers `fd` for level notification.
    pub fn add_fd(&self, fd: RawFd, token: u64, interest: Interest) -> Result<(), ReactorError> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest.bits(), "epoll_ctl(add)")
    }

    /// Registers `fd` for a single notification.
    pub fn add_fd_one_shot(&self, fd: RawFd, token: u64, interest: Interest) -> Result<(), ReactorError> {
        let bits = interest.bits() | libc::EPOLLONESHOT as u32;
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, bits, "epoll_ctl(add one-shot)")
    }

    /// Re-arms a one-shot registration after its notification was handled.
    pub fn restart_fd_one_shot(&self, fd: RawFd, token: u64, interest: Interest) -> Result<(), ReactorError> {
        let bits = interest.bits() | libc::EPOLLONESHOT as u32;
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, bits, "epoll_ctl(restart one-shot)")
    }

    /// Deregisters `fd`. Removing a descriptor that is not registered is not an error.
    pub fn remove_fd(&self, fd: RawFd) -> Result<(), ReactorError> {
        // SAFETY: EPOLL_CTL_DEL ignores the event pointer, null is accepted since Linux 2.6.9.
        let res = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(ReactorError::io("epoll_ctl(del)", err));
            }
        }
        Ok(())
    }

    /// Blocks until at least one registration is ready or `timeout_ms` elapsed.
    ///
    /// A wait interrupted by a signal is restarted.
    pub fn poll(&self, events: &mut Events, timeout_ms: i32) -> Result<usize, ReactorError> {
        let capacity = i32::try_from(events.buffer.len()).unwrap_or(i32::MAX);
        loop {
            // SAFETY: the buffer holds `capacity` initialised epoll_event values and outlives the call.
            let res = unsafe { libc::epoll_wait(self.fd.as_raw_fd(), events.buffer.as_mut_ptr(), capacity, timeout_ms) };
            if res >= 0 {
                events.len = res.unsigned_abs() as usize;
                return Ok(events.len);
            }

            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                events.len = 0;
                return Err(ReactorError::io("epoll_wait", err));
            }
        }
    }

    fn ctl(&self, op: i32, fd: RawFd, token: u64, bits: u32, op_name: &'static str) -> Result<(), ReactorError> {
        let mut event = libc::epoll_event { events: bits, u64: token };
        // SAFETY: `event` is a valid epoll_event for the duration of the call.
        let res = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &raw mut event) };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EEXIST) {
                return Err(ReactorError::AlreadyRegistered { fd });
            }
            return Err(ReactorError::io(op_name, err));
        }
        Ok(())
    }
}

impl AsRawFd for Epoller {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

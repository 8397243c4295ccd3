//! Non-blocking eventfd and timerfd descriptors.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use crate::ensure;
use crate::error::ReactorError;

/// Reads one native-endian `u64` counter, returning `None` when nothing is pending.
fn read_counter(mut file: &File, op: &'static str) -> Result<Option<u64>, ReactorError> {
    let mut buf = [0u8; 8];
    loop {
        match file.read(&mut buf) {
            Ok(8) => return Ok(Some(u64::from_ne_bytes(buf))),
            Ok(n) => {
                return Err(ReactorError::io(op, io::Error::other(format!("wrong number of bytes: {n}"))));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(ReactorError::io(op, e)),
        }
    }
}

/// An eventfd used to break threads out of a blocking poll.
///
/// Once signaled the descriptor stays readable until [`WakeupFd::read`] drains it.
#[derive(Debug)]
pub struct WakeupFd {
    file: File,
}

impl WakeupFd {
    pub fn new() -> Result<Self, ReactorError> {
        // SAFETY: eventfd takes no pointers.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(ReactorError::last_os_error("eventfd"));
        }
        // SAFETY: fd was just returned by eventfd and nothing else owns it.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { file: File::from(owned) })
    }

    pub fn signal(&self) -> Result<(), ReactorError> {
        let mut file = &self.file;
        loop {
            match file.write(&1u64.to_ne_bytes()) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // the counter is saturated, the descriptor is readable anyway
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(ReactorError::io("eventfd write", e)),
            }
        }
    }

    /// Drains the descriptor, returning the number of signals accumulated since the last read.
    pub fn read(&self) -> Result<u64, ReactorError> {
        Ok(read_counter(&self.file, "eventfd read")?.unwrap_or(0))
    }
}

impl AsRawFd for WakeupFd {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// A periodic monotonic timer.
#[derive(Debug)]
pub struct TimerFd {
    file: File,
    period: Duration,
}

impl TimerFd {
    /// Creates a timer firing every `period`, the first expiration one period from now.
    pub fn periodic(period: Duration) -> Result<Self, ReactorError> {
        ensure!(!period.is_zero(), ReactorError::invalid_period("period must be greater than zero"));
        let seconds = libc::time_t::try_from(period.as_secs())
            .map_err(|e| ReactorError::invalid_period(format!("{period:?}: {e}")))?;
        let interval = libc::timespec { tv_sec: seconds, tv_nsec: libc::c_long::from(period.subsec_nanos() as i32) };

        // SAFETY: timerfd_create takes no pointers.
        let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC) };
        if fd < 0 {
            return Err(ReactorError::last_os_error("timerfd_create"));
        }
        // SAFETY: fd was just returned by timerfd_create and nothing else owns it.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };

        let spec = libc::itimerspec { it_interval: interval, it_value: interval };
        // SAFETY: `spec` is valid for the duration of the call, the old value pointer may be null.
        let res = unsafe { libc::timerfd_settime(owned.as_raw_fd(), 0, &raw const spec, ptr::null_mut()) };
        if res < 0 {
            return Err(ReactorError::last_os_error("timerfd_settime"));
        }

        Ok(Self { file: File::from(owned), period })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of expirations since the last read, `None` when the timer has not fired yet.
    pub fn read_expirations(&self) -> Result<Option<u64>, ReactorError> {
        read_counter(&self.file, "timerfd read")
    }
}

impl AsRawFd for TimerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

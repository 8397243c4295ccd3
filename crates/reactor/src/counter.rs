use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::error;

/// A counter other threads can block on until it reaches a wanted value.
#[derive(Debug, Default)]
pub(crate) struct WaitCounter {
    value: Mutex<usize>,
    changed: Condvar,
}

impl WaitCounter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> usize {
        *self.value.lock()
    }

    pub(crate) fn reset(&self) {
        *self.value.lock() = 0;
        self.changed.notify_all();
    }

    pub(crate) fn increment(&self) -> usize {
        let mut value = self.value.lock();
        *value += 1;
        self.changed.notify_all();
        *value
    }

    /// Decrements the counter, refusing to go below zero.
    pub(crate) fn decrement(&self) -> usize {
        let mut value = self.value.lock();
        match value.checked_sub(1) {
            Some(v) => *value = v,
            None => error!("counter decremented below zero"),
        }
        self.changed.notify_all();
        *value
    }

    pub(crate) fn wait_until(&self, predicate: impl Fn(usize) -> bool) {
        let mut value = self.value.lock();
        while !predicate(*value) {
            self.changed.wait(&mut value);
        }
    }

    /// Like [`WaitCounter::wait_until`] but gives up after `timeout`, returning whether the predicate held.
    pub(crate) fn wait_until_for(&self, predicate: impl Fn(usize) -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut value = self.value.lock();
        while !predicate(*value) {
            if self.changed.wait_until(&mut value, deadline).timed_out() {
                return predicate(*value);
            }
        }
        true
    }
}

//! Millisecond time sources for the polled engines.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic millisecond counter.
pub trait MsClock {
    fn now_ms(&self) -> u64;

    /// Milliseconds elapsed since `start_ms`.
    fn elapsed_since(&self, start_ms: u64) -> u64 {
        self.now_ms().wrapping_sub(start_ms)
    }
}

/// Wall clock, counted from construction. Clones share the same origin.
#[derive(Debug, Clone, Copy)]
pub struct HostClock {
    origin: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        HostClock { origin: Instant::now() }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MsClock for HostClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Virtual clock advanced explicitly by the caller. Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<u64>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl MsClock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

//! Polled timing gates.
//!
//! Nothing here schedules anything. Callers poll, the gate compares the
//! elapsed time since the last restart against a threshold.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Millisecond time source.
pub trait Clock: std::fmt::Debug + Send {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time since construction.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven clock. Clones share the same time, so a test can keep one
/// handle and give another to the engine.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    current_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_ms(&self, ms: u64) {
        self.current_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set_ms(&self, ms: u64) {
        self.current_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }
}

/// The handling-delay and auto-setup-delay checks shared by handler and prober.
#[derive(Debug)]
pub struct TimingGate {
    clock: Box<dyn Clock>,
    started_ms: u64,
    handling_delay_ms: u64,
    auto_setup_delay_ms: u64,
    auto_setup_done: bool,
}

impl TimingGate {
    pub fn new(clock: Box<dyn Clock>, handling_delay_ms: u64, auto_setup_delay_ms: u64) -> Self {
        let started_ms = clock.now_ms();
        Self {
            clock,
            started_ms,
            handling_delay_ms,
            auto_setup_delay_ms,
            auto_setup_done: false,
        }
    }

    pub fn restart(&mut self) {
        self.started_ms = self.clock.now_ms();
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.started_ms)
    }

    pub fn handling_elapsed(&self) -> bool {
        let elapsed = self.elapsed_ms();
        tracing::trace!(elapsed, wait = self.handling_delay_ms, "handling delay poll");
        elapsed >= self.handling_delay_ms
    }

    /// True exactly once: on the first poll after the auto-setup delay has run out.
    pub fn auto_setup_due(&mut self) -> bool {
        if !self.auto_setup_pending() {
            return false;
        }
        let elapsed = self.elapsed_ms();
        tracing::trace!(elapsed, wait = self.auto_setup_delay_ms, "auto setup poll");
        if elapsed >= self.auto_setup_delay_ms {
            self.auto_setup_done = true;
            return true;
        }
        false
    }

    pub fn auto_setup_pending(&self) -> bool {
        !self.auto_setup_done && self.auto_setup_delay_ms > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let handle = clock.clone();
        handle.advance_ms(25);
        assert_eq!(clock.now_ms(), 25);
    }

    #[test]
    fn handling_gate_opens_after_delay() {
        let clock = ManualClock::new();
        let mut gate = TimingGate::new(Box::new(clock.clone()), 100, 0);
        assert!(!gate.handling_elapsed());
        clock.advance_ms(99);
        assert!(!gate.handling_elapsed());
        clock.advance_ms(1);
        assert!(gate.handling_elapsed());
        gate.restart();
        assert!(!gate.handling_elapsed());
    }

    #[test]
    fn auto_setup_fires_once() {
        let clock = ManualClock::new();
        let mut gate = TimingGate::new(Box::new(clock.clone()), 0, 50);
        assert!(!gate.auto_setup_due());
        clock.advance_ms(50);
        assert!(gate.auto_setup_due());
        assert!(!gate.auto_setup_due());
        assert!(!gate.auto_setup_pending());
    }

    #[test]
    fn zero_auto_setup_never_pending() {
        let mut gate = TimingGate::new(Box::new(ManualClock::new()), 0, 0);
        assert!(!gate.auto_setup_pending());
        assert!(!gate.auto_setup_due());
    }
}

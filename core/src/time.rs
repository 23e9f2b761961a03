//! Time sources.
//!
//! All timing is in ticks of the selected [`Clock`]. [`TickRate`] converts
//! between ticks and wall-clock units.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::Cell;

/// A monotonic tick counter.
pub trait Clock {
    /// Current tick count.
    fn now(&self) -> u64;

    fn ticks_per_sec(&self) -> u64;

    fn name(&self) -> &'static str;

    /// Whether this source is usable on the running machine.
    fn probe(&self) -> bool;

    fn rate(&self) -> TickRate {
        TickRate::new(self.ticks_per_sec())
    }
}

/// Tick conversions for one clock frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRate {
    ticks_per_sec: u64,
}

impl TickRate {
    pub const fn new(ticks_per_sec: u64) -> Self {
        Self { ticks_per_sec }
    }

    #[inline]
    pub fn ticks_per_sec(&self) -> u64 {
        self.ticks_per_sec
    }

    /// Convert milliseconds to ticks
    #[inline]
    pub fn ms_to_ticks(&self, ms: u64) -> u64 {
        ms.saturating_mul(self.ticks_per_sec) / 1_000
    }

    /// Convert ticks to milliseconds
    #[inline]
    pub fn ticks_to_ms(&self, ticks: u64) -> u64 {
        if self.ticks_per_sec == 0 {
            return 0;
        }
        ticks.saturating_mul(1_000) / self.ticks_per_sec
    }

    #[inline]
    pub fn secs_to_ticks(&self, secs: u64) -> u64 {
        secs.saturating_mul(self.ticks_per_sec)
    }
}

/// Read TSC (Time Stamp Counter).
#[cfg(target_arch = "x86_64")]
#[inline]
pub fn read_tsc() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        core::arch::asm!(
            "rdtsc",
            out("eax") lo,
            out("edx") hi,
            options(nostack, nomem, preserves_flags)
        );
    }
    ((hi as u64) << 32) | (lo as u64)
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
pub fn read_tsc() -> u64 {
    0
}

/// x86 time stamp counter with a frequency calibrated by the platform.
#[derive(Debug, Clone, Copy)]
pub struct TscClock {
    freq: u64,
}

impl TscClock {
    /// `tsc_freq` in Hz, as measured by platform init.
    pub const fn new(tsc_freq: u64) -> Self {
        Self { freq: tsc_freq }
    }
}

impl Clock for TscClock {
    fn now(&self) -> u64 {
        read_tsc()
    }

    fn ticks_per_sec(&self) -> u64 {
        self.freq
    }

    fn name(&self) -> &'static str {
        "tsc"
    }

    fn probe(&self) -> bool {
        self.freq != 0 && read_tsc() != 0
    }
}

/// Clock advanced explicitly by its owner.
///
/// Clones share the same counter, so a test can keep one handle and give
/// another to the timer subsystem.
#[derive(Debug, Clone)]
pub struct ManualClock {
    ticks: Rc<Cell<u64>>,
    ticks_per_sec: u64,
}

impl ManualClock {
    pub fn new(ticks_per_sec: u64) -> Self {
        Self {
            ticks: Rc::new(Cell::new(0)),
            ticks_per_sec,
        }
    }

    pub fn advance(&self, ticks: u64) {
        self.ticks.set(self.ticks.get().saturating_add(ticks));
    }

    pub fn set(&self, ticks: u64) {
        self.ticks.set(ticks);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.ticks.get()
    }

    fn ticks_per_sec(&self) -> u64 {
        self.ticks_per_sec
    }

    fn name(&self) -> &'static str {
        "manual"
    }

    fn probe(&self) -> bool {
        self.ticks_per_sec != 0
    }
}

/// Pick the first usable clock.
///
/// # Panics
///
/// If no candidate probes successfully. Nothing can be timed without a
/// clock and there is no one to report to, so this halts.
pub fn select(candidates: Vec<Rc<dyn Clock>>) -> Rc<dyn Clock> {
    for clock in candidates {
        if clock.probe() {
            log::info!(
                "[TIME] using {} clock ({} ticks/s)",
                clock.name(),
                clock.ticks_per_sec()
            );
            return clock;
        }
        log::debug!("[TIME] {} clock unusable", clock.name());
    }
    panic!("no usable timer source");
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn tick_conversions() {
        let rate = TickRate::new(2_000_000_000);
        assert_eq!(rate.ms_to_ticks(5), 10_000_000);
        assert_eq!(rate.ticks_to_ms(3_000_000_000), 1_500);
        assert_eq!(rate.secs_to_ticks(30), 60_000_000_000);
        assert_eq!(TickRate::new(0).ticks_to_ms(100), 0);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(1_000);
        let handle = clock.clone();
        handle.advance(250);
        assert_eq!(clock.now(), 250);
        clock.set(10);
        assert_eq!(handle.now(), 10);
    }

    #[test]
    fn select_skips_unusable_sources() {
        let dead: Rc<dyn Clock> = Rc::new(ManualClock::new(0));
        let live: Rc<dyn Clock> = Rc::new(ManualClock::new(1_000));
        let chosen = select(vec![dead, live.clone()]);
        assert!(Rc::ptr_eq(&chosen, &live));
    }

    #[test]
    #[should_panic(expected = "no usable timer source")]
    fn no_usable_clock_is_fatal() {
        select(vec![Rc::new(TscClock::new(0)) as Rc<dyn Clock>]);
    }
}

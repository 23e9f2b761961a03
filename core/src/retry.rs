//! Retry timers.
//!
//! Timers used by unreliable transports to schedule retransmission. Each
//! expiry doubles the delay until the next one, up to
//! `base << backoff_limit`. The subsystem never gives up by itself; the
//! expired callback sees the retry count and decides when enough is
//! enough.
//!
//! The timer list is serviced by [`Timers`], a permanent process.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt;

use crate::process::{Process, ProcessLink};
use crate::time::{Clock, TickRate};

/// Default cap on the backoff shift.
pub const BACKOFF_LIMIT: u32 = 7;

/// Delay after the `retries`th consecutive expiry: `base << min(retries,
/// limit)`, saturating.
pub fn backoff(base: u64, retries: u32, limit: u32) -> u64 {
    let shift = retries.min(limit);
    if shift >= 64 || (base != 0 && base.leading_zeros() < shift) {
        return u64::MAX;
    }
    base << shift
}

/// Callback run on each expiry with the timer and its retry count.
pub type Expired = Box<dyn Fn(&RetryTimer, u32)>;

pub struct RetryTimer {
    running: Cell<bool>,
    expiry: Cell<u64>,
    retries: Cell<u32>,
    base: Cell<u64>,
    expired: Expired,
}

impl RetryTimer {
    /// Stopped timer with initial delay `base` ticks.
    ///
    /// The callback usually holds a `Weak` to the owning object; the timer
    /// never keeps its owner alive.
    pub fn new(base: u64, expired: impl Fn(&RetryTimer, u32) + 'static) -> Rc<Self> {
        Rc::new(Self {
            running: Cell::new(false),
            expiry: Cell::new(0),
            retries: Cell::new(0),
            base: Cell::new(base),
            expired: Box::new(expired),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Expiries since the last start or reset.
    pub fn retries(&self) -> u32 {
        self.retries.get()
    }

    /// Tick count at which the timer next expires.
    pub fn expiry(&self) -> u64 {
        self.expiry.get()
    }

    pub fn base(&self) -> u64 {
        self.base.get()
    }

    pub fn set_base(&self, base: u64) {
        self.base.set(base);
    }
}

impl fmt::Debug for RetryTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTimer")
            .field("running", &self.running.get())
            .field("expiry", &self.expiry.get())
            .field("retries", &self.retries.get())
            .field("base", &self.base.get())
            .finish()
    }
}

/// The timer list and the process that services it.
pub struct Timers {
    clock: Rc<dyn Clock>,
    timers: RefCell<Vec<Rc<RetryTimer>>>,
    link: ProcessLink,
    backoff_limit: u32,
    default_timeout: u64,
}

impl Timers {
    pub fn new(clock: Rc<dyn Clock>, backoff_limit: u32) -> Self {
        Self {
            clock,
            timers: RefCell::new(Vec::new()),
            link: ProcessLink::new(),
            backoff_limit,
            default_timeout: 0,
        }
    }

    /// Base delay (ticks) given to timers started with a base of zero.
    pub fn with_default_timeout(mut self, ticks: u64) -> Self {
        self.default_timeout = ticks;
        self
    }

    pub fn default_timeout(&self) -> u64 {
        self.default_timeout
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn rate(&self) -> TickRate {
        self.clock.rate()
    }

    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    pub fn backoff_limit(&self) -> u32 {
        self.backoff_limit
    }

    /// Start `timer`: clear its retry count and expire `base` ticks from now.
    /// A timer without a base of its own takes the default timeout.
    pub fn start(&self, timer: &Rc<RetryTimer>) {
        if timer.base() == 0 {
            timer.set_base(self.default_timeout);
        }
        self.arm(timer, timer.base());
    }

    /// Start `timer` with a new base delay.
    pub fn start_fixed(&self, timer: &Rc<RetryTimer>, timeout: u64) {
        timer.set_base(timeout);
        self.start(timer);
    }

    /// Start `timer` so that it expires on the next step.
    pub fn start_nodelay(&self, timer: &Rc<RetryTimer>) {
        self.arm(timer, 0);
    }

    /// Clear the retry count and recompute the expiry of a timer without
    /// (re)scheduling it.
    pub fn reset(&self, timer: &RetryTimer) {
        timer.retries.set(0);
        timer.expiry.set(self.now().saturating_add(timer.base()));
    }

    pub fn stop(&self, timer: &RetryTimer) {
        if !timer.running.replace(false) {
            return;
        }
        let target = timer as *const RetryTimer;
        self.timers
            .borrow_mut()
            .retain(|t| !core::ptr::eq(Rc::as_ptr(t), target));
    }

    pub fn active(&self) -> usize {
        self.timers.borrow().len()
    }

    fn arm(&self, timer: &Rc<RetryTimer>, delay: u64) {
        timer.retries.set(0);
        timer.expiry.set(self.now().saturating_add(delay));
        if !timer.running.replace(true) {
            self.timers.borrow_mut().push(timer.clone());
        }
    }
}

impl Process for Timers {
    fn link(&self) -> &ProcessLink {
        &self.link
    }

    fn step(&self) {
        let now = self.now();
        let due: Vec<Rc<RetryTimer>> = self
            .timers
            .borrow()
            .iter()
            .filter(|t| t.expiry() <= now)
            .cloned()
            .collect();

        for timer in due {
            // An earlier callback in this round may have stopped or
            // restarted it.
            if !timer.is_running() || timer.expiry() > now {
                continue;
            }
            let retries = timer.retries.get().saturating_add(1);
            timer.retries.set(retries);
            let delay = backoff(timer.base(), retries, self.backoff_limit);
            timer.expiry.set(now.saturating_add(delay));
            log::trace!("[RETRY] {:p} expired (retry {}, next in {})", timer, retries, delay);
            (timer.expired)(&*timer, retries);
        }
    }

    fn name(&self) -> &'static str {
        "retry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    fn timers() -> (ManualClock, Timers) {
        let clock = ManualClock::new(1_000);
        let timers = Timers::new(Rc::new(clock.clone()), BACKOFF_LIMIT);
        (clock, timers)
    }

    fn counting_timer(base: u64) -> (Rc<RetryTimer>, Rc<Cell<u32>>) {
        let fired = Rc::new(Cell::new(0));
        let hook = fired.clone();
        let timer = RetryTimer::new(base, move |_, retries| hook.set(retries));
        (timer, fired)
    }

    #[test]
    fn backoff_is_truncated_binary_exponential() {
        assert_eq!(backoff(1024, 0, BACKOFF_LIMIT), 1024);
        assert_eq!(backoff(1024, 1, BACKOFF_LIMIT), 2048);
        assert_eq!(backoff(1024, 7, BACKOFF_LIMIT), 1024 << 7);
        assert_eq!(backoff(1024, 50, BACKOFF_LIMIT), 1024 << 7);
        assert_eq!(backoff(u64::MAX / 2, 3, BACKOFF_LIMIT), u64::MAX);
        assert_eq!(backoff(0, 9, BACKOFF_LIMIT), 0);
    }

    #[test]
    fn successive_expiries_double_the_delay() {
        let (clock, timers) = timers();
        let (timer, fired) = counting_timer(1024);
        timers.start(&timer);

        let mut delay = 1024;
        let mut delays = Vec::new();
        for n in 1..=10u32 {
            clock.advance(delay);
            timers.step();
            assert_eq!(fired.get(), n);
            delay = timer.expiry() - clock.now();
            delays.push(delay);
            assert_eq!(delay, 1024 << n.min(BACKOFF_LIMIT));
        }
        assert_eq!(&delays[..5], &[2048, 4096, 8192, 16384, 32768]);
        assert!(timer.is_running());
    }

    #[test]
    fn nothing_fires_before_expiry() {
        let (clock, timers) = timers();
        let (timer, fired) = counting_timer(100);
        timers.start(&timer);

        clock.advance(99);
        timers.step();
        assert_eq!(fired.get(), 0);
        clock.advance(1);
        timers.step();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn reset_clears_retries_without_scheduling() {
        let (clock, timers) = timers();
        let (timer, _fired) = counting_timer(100);

        timers.reset(&timer);
        assert!(!timer.is_running());
        assert_eq!(timer.expiry(), 100);

        timers.start(&timer);
        clock.advance(100);
        timers.step();
        assert_eq!(timer.retries(), 1);

        timers.reset(&timer);
        assert_eq!(timer.retries(), 0);
        assert_eq!(timer.expiry(), clock.now() + 100);
        assert_eq!(timers.active(), 1);
    }

    #[test]
    fn stop_and_start_are_idempotent() {
        let (clock, timers) = timers();
        let (timer, fired) = counting_timer(10);

        timers.start(&timer);
        timers.start(&timer);
        assert_eq!(timers.active(), 1);

        timers.stop(&timer);
        timers.stop(&timer);
        assert_eq!(timers.active(), 0);

        clock.advance(1_000);
        timers.step();
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn nodelay_fires_on_next_step_and_callback_can_stop() {
        let (_clock, timers) = timers();
        let timers = Rc::new(timers);
        let weak = Rc::downgrade(&timers);
        let timer = RetryTimer::new(50, move |timer, _| {
            if let Some(timers) = weak.upgrade() {
                timers.stop(timer);
            }
        });

        timers.start_nodelay(&timer);
        timers.step();
        assert_eq!(timer.retries(), 1);
        assert!(!timer.is_running());
        assert_eq!(timers.active(), 0);
    }

    #[test]
    fn zero_base_takes_the_default_timeout() {
        let (clock, timers) = timers();
        let timers = timers.with_default_timeout(300);
        let (timer, fired) = counting_timer(0);

        timers.start(&timer);
        assert_eq!(timer.base(), 300);
        clock.advance(299);
        timers.step();
        assert_eq!(fired.get(), 0);
        clock.advance(1);
        timers.step();
        assert_eq!(fired.get(), 1);
        assert_eq!(timer.expiry(), clock.now() + 600);

        let (own, _) = counting_timer(20);
        timers.start(&own);
        assert_eq!(own.base(), 20);
    }

    #[test]
    fn start_fixed_replaces_base() {
        let (clock, timers) = timers();
        let (timer, fired) = counting_timer(10);
        timers.start_fixed(&timer, 500);
        assert_eq!(timer.base(), 500);
        clock.advance(499);
        timers.step();
        assert_eq!(fired.get(), 0);
        clock.advance(1);
        timers.step();
        assert_eq!(fired.get(), 1);
    }
}

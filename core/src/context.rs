//! Top-level owner of the run queue, timers and openers.
//!
//! Everything that would otherwise be global state lives here, so several
//! independent instances can coexist (one per test, for example).

use alloc::rc::Rc;

use crate::config::Config;
use crate::logger;
use crate::open::Openers;
use crate::process::{Process, Scheduler};
use crate::retry::Timers;
use crate::time::{Clock, TickRate};

pub struct Context {
    scheduler: Scheduler,
    timers: Rc<Timers>,
    openers: Rc<Openers>,
    config: Config,
    step_warning: u64,
}

impl Context {
    /// Create a context timed by `clock`. The timer process is scheduled
    /// for the lifetime of the context.
    pub fn new(clock: Rc<dyn Clock>, config: Config) -> Self {
        if logger::init(config.log_level).is_err() {
            // Backend already installed; only the level changes.
            log::set_max_level(config.log_level);
        }

        let rate = clock.rate();
        let timers = Rc::new(
            Timers::new(clock, config.retry.backoff_limit)
                .with_default_timeout(rate.ms_to_ticks(config.retry.default_timeout_ms)),
        );
        let step_warning = rate.ms_to_ticks(config.timeouts.step_warning_ms);

        let scheduler = Scheduler::new();
        let permanent: Rc<dyn Process> = timers.clone();
        scheduler.add(&permanent);

        log::debug!("[CTX] ready ({:?})", config);
        Self {
            scheduler,
            timers,
            openers: Rc::new(Openers::new()),
            config,
            step_warning,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn timers(&self) -> &Rc<Timers> {
        &self.timers
    }

    pub fn openers(&self) -> &Rc<Openers> {
        &self.openers
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn now(&self) -> u64 {
        self.timers.now()
    }

    pub fn rate(&self) -> TickRate {
        self.timers.rate()
    }

    /// Run one scheduler step.
    pub fn step(&self) {
        let start = self.now();
        self.scheduler.step();
        let elapsed = self.now().saturating_sub(start);
        if self.step_warning != 0 && elapsed > self.step_warning {
            log::warn!(
                "[CTX] slow step: {} ms",
                self.rate().ticks_to_ms(elapsed)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::FnProcess;
    use crate::retry::RetryTimer;
    use crate::time::ManualClock;
    use core::cell::Cell;

    #[test]
    fn timers_run_as_a_permanent_process() {
        let clock = ManualClock::new(1_000);
        let ctx = Context::new(Rc::new(clock.clone()), Config::default());
        assert_eq!(ctx.scheduler().len(), 1);

        let fired = Rc::new(Cell::new(0));
        let hook = fired.clone();
        let timer = RetryTimer::new(10, move |_, n| hook.set(n));
        ctx.timers().start(&timer);

        clock.advance(10);
        ctx.step();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn config_sets_default_timeout_and_logging() {
        let config = Config::default().with_retry(crate::config::RetryConfig {
            default_timeout_ms: 250,
            ..Default::default()
        });
        let ctx = Context::new(Rc::new(ManualClock::new(1_000_000)), config);
        assert_eq!(ctx.timers().default_timeout(), 250_000);

        let timer = RetryTimer::new(0, |_, _| {});
        ctx.timers().start(&timer);
        assert_eq!(timer.base(), 250_000);
        assert!(logger::is_installed());
    }

    #[test]
    fn contexts_are_independent() {
        let a = Context::new(Rc::new(ManualClock::new(1_000)), Config::default());
        let b = Context::new(Rc::new(ManualClock::new(1_000)), Config::default());

        let ran = Rc::new(Cell::new(0));
        let counter = ran.clone();
        let p: Rc<dyn Process> = Rc::new(FnProcess::new("count", move || {
            counter.set(counter.get() + 1)
        }));
        a.scheduler().add(&p);

        for _ in 0..4 {
            a.step();
            b.step();
        }
        assert_eq!(ran.get(), 2);
        assert_eq!(b.scheduler().len(), 1);
    }
}

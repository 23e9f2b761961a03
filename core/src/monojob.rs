//! Foreground jobs.
//!
//! A [`Monojob`] supervises a single job while the caller runs the
//! scheduler, relaying progress to a [`Console`] and turning a cancel
//! keypress into `kill`.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::Cell;

use crate::context::Context;
use crate::downloader::Downloader;
use crate::error::{Error, Result, Status};
use crate::interface::Interface;
use crate::job::{Job, Progress};
use crate::open::Location;

/// User-facing side of a foreground job.
pub trait Console {
    /// True if the user asked to cancel.
    fn poll_cancel(&mut self) -> bool;

    fn progress(&mut self, description: &str, progress: &Progress);

    fn finished(&mut self, description: &str, rc: Status) {
        let _ = (description, rc);
    }
}

/// Console that never cancels and shows nothing.
#[derive(Debug, Default)]
pub struct NullConsole;

impl Console for NullConsole {
    fn poll_cancel(&mut self) -> bool {
        false
    }

    fn progress(&mut self, _description: &str, _progress: &Progress) {}
}

/// Supervisor for one job at a time.
#[derive(Default)]
pub struct Monojob {
    job: Interface<dyn Job>,
    rc: Cell<Option<Status>>,
}

impl Monojob {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Job endpoint to hand to the operation being supervised.
    pub fn endpoint(self: &Rc<Self>) -> Rc<dyn Job> {
        self.clone()
    }

    /// Outcome, once the job has finished.
    pub fn status(&self) -> Option<Status> {
        self.rc.get()
    }

    /// Run `ctx` until the job finishes, is cancelled, or `timeout` ticks
    /// pass.
    pub fn wait(
        &self,
        ctx: &Context,
        description: &str,
        timeout: Option<u64>,
        console: &mut dyn Console,
    ) -> Status {
        let start = ctx.now();
        let interval = ctx.rate().ms_to_ticks(ctx.config().progress_interval_ms);
        let mut last_report = start;

        log::debug!("[MONOJOB] waiting for {}", description);
        let rc = loop {
            if let Some(rc) = self.rc.get() {
                break rc;
            }

            if console.poll_cancel() {
                log::info!("[MONOJOB] {} cancelled", description);
                self.job.kill();
                // Jobs that ignore kill are detached by force.
                if self.rc.get().is_none() {
                    self.abort(Error::Canceled);
                }
                continue;
            }

            let now = ctx.now();
            if let Some(limit) = timeout {
                if now.saturating_sub(start) >= limit {
                    log::warn!("[MONOJOB] {} timed out", description);
                    self.abort(Error::TimedOut);
                    continue;
                }
            }

            if now.saturating_sub(last_report) >= interval {
                let mut progress = Progress::default();
                if self.job.progress(&mut progress).is_ok() {
                    console.progress(description, &progress);
                }
                last_report = now;
            }

            ctx.step();
        };

        console.finished(description, rc);
        rc
    }

    fn abort(&self, e: Error) {
        self.job.restart(Err(e));
        if self.rc.get().is_none() {
            self.rc.set(Some(Err(e)));
        }
    }
}

impl Job for Monojob {
    fn port(&self) -> Option<&Interface<dyn Job>> {
        Some(&self.job)
    }

    fn done(&self, rc: Status) {
        if self.rc.get().is_none() {
            self.rc.set(Some(rc));
        }
        self.job.restart(rc);
    }
}

/// Download `location` in the foreground, returning the image.
pub fn fetch(ctx: &Context, location: &Location, console: &mut dyn Console) -> Result<Vec<u8>> {
    let monojob = Monojob::new();
    let downloader = Downloader::create(ctx.openers(), &monojob.endpoint(), location)?;

    let description = alloc::format!("{}", location);
    let timeout = ctx.config().timeouts.job(ctx.rate());
    monojob.wait(ctx, &description, timeout, console)?;

    downloader.take_image().ok_or(Error::NotFound)
}

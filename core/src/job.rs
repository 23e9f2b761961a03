//! Job control interfaces.
//!
//! A job interface carries supervision of a long-running operation,
//! independent of where its data goes. The supervisor plugs its own job
//! endpoint into the operation's before starting it and then waits for
//! `done`. Cancelling is `kill`, which must eventually produce
//! `done(Err(Canceled))`.

use alloc::rc::Rc;
use alloc::string::String;

use crate::error::Status;
use crate::interface::{Interface, Operations};
use crate::refcnt::Refcnt;

/// Progress report filled in by the job being asked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// Amount of work done
    pub completed: u64,
    /// Total amount of work, or 0 if not known
    pub total: u64,
    /// Optional status message (e.g. "connecting")
    pub message: Option<String>,
}

impl Progress {
    /// Completion as a percentage, if the total is known.
    pub fn percentage(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let done = u128::from(self.completed.min(self.total));
        Some((done * 100 / u128::from(self.total)) as u8)
    }
}

/// Operations a job endpoint accepts. All default to doing nothing.
pub trait Job {
    fn port(&self) -> Option<&Interface<dyn Job>>;

    fn refcnt(&self) -> Option<&Refcnt> {
        None
    }

    fn is_null(&self) -> bool {
        false
    }

    /// The job finished with `rc`.
    fn done(&self, rc: Status) {
        let _ = rc;
    }

    /// Stop the job. It should finish with `Err(Canceled)`.
    fn kill(&self) {}

    /// Fill in `progress`; the status is the job's ongoing state.
    fn progress(&self, progress: &mut Progress) -> Status {
        let _ = progress;
        Ok(())
    }
}

/// The null job endpoint.
#[derive(Debug, Default)]
pub struct NullJob;

impl Job for NullJob {
    fn port(&self) -> Option<&Interface<dyn Job>> {
        None
    }

    fn is_null(&self) -> bool {
        true
    }
}

impl Operations for dyn Job {
    fn intf_null() -> Rc<Self> {
        Rc::new(NullJob)
    }

    fn intf_is_null(&self) -> bool {
        self.is_null()
    }

    fn intf_port(&self) -> Option<&Interface<Self>> {
        self.port()
    }

    fn intf_refcnt(&self) -> Option<&Refcnt> {
        self.refcnt()
    }

    fn intf_close(&self, rc: Status) {
        self.done(rc)
    }
}

impl Interface<dyn Job> {
    /// Report completion to the supervisor.
    pub fn done(&self, rc: Status) {
        match rc {
            Ok(()) => log::debug!("[JOB] {:p} done", self),
            Err(e) => log::debug!("[JOB] {:p} done: {}", self, e),
        }
        self.close(rc)
    }

    pub fn kill(&self) {
        log::debug!("[JOB] {:p} kill", self);
        self.dest().kill()
    }

    pub fn progress(&self, progress: &mut Progress) -> Status {
        self.dest().progress(progress)
    }
}

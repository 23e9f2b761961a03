//! Cooperative process scheduler.
//!
//! A single FIFO run queue of steppable units. [`Scheduler::step`] runs the
//! process at the head after moving it to the tail, so every queued process
//! gets one step per round. There is no preemption: a step that does not
//! return promptly stalls everything.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::{Cell, RefCell};
use core::fmt;

use crate::interface::same_endpoint;
use crate::refcnt::{self, Refcnt};

/// Run-queue membership of a process.
#[derive(Debug, Default)]
pub struct ProcessLink {
    queued: Cell<bool>,
}

impl ProcessLink {
    pub const fn new() -> Self {
        Self {
            queued: Cell::new(false),
        }
    }

    pub fn is_queued(&self) -> bool {
        self.queued.get()
    }
}

/// A unit of repeated work.
///
/// A process suspends by returning from `step`, keeping whatever it needs
/// to resume in its own structure.
pub trait Process {
    fn link(&self) -> &ProcessLink;

    /// Do one bounded slice of work.
    fn step(&self);

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;

    /// Counter of the object owning this process, kept referenced while it
    /// is scheduled.
    fn refcnt(&self) -> Option<&Refcnt> {
        None
    }
}

/// The run queue.
#[derive(Default)]
pub struct Scheduler {
    queue: RefCell<VecDeque<Rc<dyn Process>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `process`. Does nothing if it is already scheduled.
    pub fn add(&self, process: &Rc<dyn Process>) {
        let link = process.link();
        if link.is_queued() {
            return;
        }
        log::debug!("[PROC] adding {}", process.name());
        link.queued.set(true);
        refcnt::get(process.refcnt());
        self.queue.borrow_mut().push_back(process.clone());
    }

    /// Unschedule `process`. Does nothing if it is not scheduled.
    pub fn del(&self, process: &dyn Process) {
        let link = process.link();
        if !link.is_queued() {
            return;
        }
        log::debug!("[PROC] removing {}", process.name());
        link.queued.set(false);

        let removed = {
            let mut queue = self.queue.borrow_mut();
            let target = process as *const dyn Process as *const ();
            queue
                .iter()
                .position(|p| Rc::as_ptr(p) as *const () == target)
                .and_then(|idx| queue.remove(idx))
        };
        // Dropping the reference may release the owner, which may touch
        // the queue again.
        if let Some(removed) = removed {
            refcnt::put(removed.refcnt());
        }
    }

    /// Run one step of the process at the head of the queue.
    pub fn step(&self) {
        let process = {
            let mut queue = self.queue.borrow_mut();
            let Some(process) = queue.pop_front() else {
                return;
            };
            queue.push_back(process.clone());
            process
        };

        // Keep the owner alive even if the step unschedules it.
        refcnt::get(process.refcnt());
        log::trace!("[PROC] stepping {}", process.name());
        process.step();
        refcnt::put(process.refcnt());
    }

    pub fn is_running(&self, process: &dyn Process) -> bool {
        process.link().is_queued()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Position of `process` in the run queue, head first.
    pub fn position(&self, process: &Rc<dyn Process>) -> Option<usize> {
        self.queue
            .borrow()
            .iter()
            .position(|p| same_endpoint(p, process))
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.queue.borrow();
        f.debug_list().entries(queue.iter().map(|p| p.name())).finish()
    }
}

/// Process backed by a closure.
pub struct FnProcess<F: Fn()> {
    link: ProcessLink,
    name: &'static str,
    step: F,
}

impl<F: Fn()> FnProcess<F> {
    pub fn new(name: &'static str, step: F) -> Self {
        Self {
            link: ProcessLink::new(),
            name,
            step,
        }
    }
}

impl<F: Fn()> Process for FnProcess<F> {
    fn link(&self) -> &ProcessLink {
        &self.link
    }

    fn step(&self) {
        (self.step)()
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    type Trace = Rc<RefCell<Vec<&'static str>>>;

    fn recorder(name: &'static str, trace: &Trace) -> Rc<dyn Process> {
        let trace = trace.clone();
        Rc::new(FnProcess::new(name, move || trace.borrow_mut().push(name)))
    }

    #[test]
    fn add_is_idempotent() {
        let sched = Scheduler::new();
        let trace = Trace::default();
        let p = recorder("p", &trace);

        sched.add(&p);
        sched.add(&p);
        assert_eq!(sched.len(), 1);
        assert!(sched.is_running(&*p));

        sched.del(&*p);
        sched.del(&*p);
        assert!(sched.is_empty());
        assert!(!sched.is_running(&*p));
    }

    #[test]
    fn one_round_runs_each_process_once_in_order() {
        let sched = Scheduler::new();
        let trace = Trace::default();
        let procs: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|n| recorder(n, &trace))
            .collect();
        for p in &procs {
            sched.add(p);
        }

        for _ in 0..procs.len() {
            sched.step();
        }

        assert_eq!(&*trace.borrow(), &["a", "b", "c", "d"]);
        for (i, p) in procs.iter().enumerate() {
            assert_eq!(sched.position(p), Some(i));
        }
    }

    #[test]
    fn step_on_empty_queue_is_harmless() {
        let sched = Scheduler::new();
        sched.step();
        assert!(sched.is_empty());
    }

    #[test]
    fn scheduled_owner_is_referenced() {
        struct Owned {
            link: ProcessLink,
            refcnt: Refcnt,
        }

        impl Process for Owned {
            fn link(&self) -> &ProcessLink {
                &self.link
            }

            fn step(&self) {}

            fn name(&self) -> &'static str {
                "owned"
            }

            fn refcnt(&self) -> Option<&Refcnt> {
                Some(&self.refcnt)
            }
        }

        let sched = Scheduler::new();
        let owned = Rc::new(Owned {
            link: ProcessLink::new(),
            refcnt: Refcnt::new(),
        });
        let p: Rc<dyn Process> = owned.clone();

        sched.add(&p);
        assert_eq!(owned.refcnt.count(), 1);
        // Creator lets go; the run queue keeps it alive.
        owned.refcnt.put();
        assert!(!owned.refcnt.is_released());

        sched.step();
        assert_eq!(owned.refcnt.count(), 0);

        sched.del(&*p);
        assert!(owned.refcnt.is_released());
    }

    #[test]
    fn process_removing_itself_mid_step() {
        let sched = Rc::new(Scheduler::new());
        let trace = Trace::default();
        let slot: Rc<RefCell<Option<Rc<dyn Process>>>> = Rc::default();

        let me = slot.clone();
        let queue = sched.clone();
        let log = trace.clone();
        let once: Rc<dyn Process> = Rc::new(FnProcess::new("once", move || {
            log.borrow_mut().push("once");
            if let Some(me) = me.borrow_mut().take() {
                queue.del(&*me);
            }
        }));
        *slot.borrow_mut() = Some(once.clone());
        let other = recorder("other", &trace);

        sched.add(&once);
        sched.add(&other);
        for _ in 0..3 {
            sched.step();
        }

        assert_eq!(&*trace.borrow(), &["once", "other", "other"]);
        assert_eq!(sched.len(), 1);
    }
}

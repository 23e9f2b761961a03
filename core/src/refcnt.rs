//! Reference counting.
//!
//! A [`Refcnt`] counts the logical holders of an object: the interfaces
//! plugged into it, the run queue while it is scheduled, and any dispatch
//! in flight. The count starts at zero, which stands for the single
//! implicit holder that created the object. The release hook runs on the
//! `put` that takes the count below zero, and never again.
//!
//! Memory is owned by `Rc`. The counter lets an object release its
//! resources the instant its last holder lets go, even while a caller
//! further up the stack still has an `Rc` to it.

use alloc::boxed::Box;
use core::cell::Cell;
use core::fmt;

/// Hook invoked when the last holder releases the object.
pub type Release = Box<dyn FnOnce()>;

pub struct Refcnt {
    count: Cell<isize>,
    release: Cell<Option<Release>>,
    released: Cell<bool>,
}

impl Refcnt {
    /// Counter with the implicit creator reference and no release hook.
    pub const fn new() -> Self {
        Self {
            count: Cell::new(0),
            release: Cell::new(None),
            released: Cell::new(false),
        }
    }

    /// Counter whose release hook is `release`.
    pub fn with_release(release: impl FnOnce() + 'static) -> Self {
        let refcnt = Self::new();
        refcnt.set_release(release);
        refcnt
    }

    /// Install (or replace) the release hook.
    pub fn set_release(&self, release: impl FnOnce() + 'static) {
        self.release.set(Some(Box::new(release)));
    }

    /// Take an additional reference.
    pub fn get(&self) -> &Self {
        self.count.set(self.count.get() + 1);
        self
    }

    /// Drop a reference.
    ///
    /// Returns `true` if this call released the object.
    pub fn put(&self) -> bool {
        let count = self.count.get() - 1;
        self.count.set(count);

        if count >= 0 || self.released.get() {
            return false;
        }

        self.released.set(true);
        if let Some(release) = self.release.take() {
            release();
        }
        true
    }

    /// Current count. Zero means one holder.
    pub fn count(&self) -> isize {
        self.count.get()
    }

    pub fn is_released(&self) -> bool {
        self.released.get()
    }
}

impl Default for Refcnt {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Refcnt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refcnt")
            .field("count", &self.count.get())
            .field("released", &self.released.get())
            .finish()
    }
}

/// Take a reference on an optional counter. Absent counters belong to
/// permanent objects and are never released.
pub fn get(refcnt: Option<&Refcnt>) -> Option<&Refcnt> {
    refcnt.map(Refcnt::get)
}

/// Drop a reference on an optional counter.
pub fn put(refcnt: Option<&Refcnt>) {
    if let Some(refcnt) = refcnt {
        refcnt.put();
    }
}

//! Object interfaces.
//!
//! An [`Interface`] is one end of a connection between two objects. It
//! always points at *some* destination endpoint: a fresh interface points
//! at the null endpoint of its kind, and detaching means plugging back into
//! null. Operations are dispatched by taking a counted reference on the
//! destination ([`Interface::dest`]) and calling through the operation
//! table of its kind ([`crate::xfer::Xfer`], [`crate::job::Job`]).
//!
//! # Reentrancy
//!
//! Plugging drops a reference, and dropping the last reference may run an
//! object's release hook, which may in turn plug or shut down other
//! interfaces (including this one). No internal borrow is held across a
//! release or an operation call, and every dispatch keeps its destination
//! counted until the call returns.

use alloc::rc::Rc;
use core::cell::{Cell, RefCell};
use core::fmt;
use core::ops::Deref;

use crate::error::Status;
use crate::refcnt::Refcnt;

/// An operation-table kind that interfaces can carry (`dyn Xfer`, `dyn Job`).
pub trait Operations {
    /// Fresh handle on the null endpoint of this kind.
    fn intf_null() -> Rc<Self>;

    fn intf_is_null(&self) -> bool;

    /// Interface through which this endpoint receives operations.
    fn intf_port(&self) -> Option<&Interface<Self>>;

    fn intf_refcnt(&self) -> Option<&Refcnt>;

    /// Notify this endpoint that the interface plugged into it is closing.
    fn intf_close(&self, rc: Status);
}

/// One end of a connection between two objects.
pub struct Interface<T: ?Sized + Operations> {
    dest: RefCell<Rc<T>>,
    nullified: Cell<bool>,
}

impl<T: ?Sized + Operations> Interface<T> {
    /// Interface plugged into the null endpoint.
    pub fn new() -> Self {
        Self {
            dest: RefCell::new(T::intf_null()),
            nullified: Cell::new(false),
        }
    }

    /// Take a counted reference on the current destination.
    pub fn dest(&self) -> Dest<T> {
        let dest = self.dest.borrow().clone();
        Dest::new(dest)
    }

    /// Whether the destination is anything other than the null endpoint.
    pub fn is_plugged(&self) -> bool {
        !self.dest.borrow().intf_is_null()
    }

    /// Whether this interface currently points at `endpoint`.
    pub fn points_to(&self, endpoint: &Rc<T>) -> bool {
        same_endpoint(&self.dest.borrow(), endpoint)
    }

    /// Plug this interface into a new destination.
    ///
    /// The reference on the old destination is dropped after the new one
    /// is in place, so any release it triggers sees a consistent interface.
    pub fn plug(&self, dest: Rc<T>) {
        if let Some(refcnt) = dest.intf_refcnt() {
            refcnt.get();
        }
        let old = self.dest.replace(dest);
        log::trace!("[INTF] {:p} replug", self);
        release(old);
    }

    /// Plug into the null endpoint.
    pub fn unplug(&self) {
        log::trace!("[INTF] {:p} unplug", self);
        self.plug(T::intf_null());
    }

    /// Ignore all further operations arriving through this interface.
    pub fn nullify(&self) {
        self.nullified.set(true);
    }

    /// Accept operations again after [`Interface::nullify`].
    pub fn reinit(&self) {
        self.nullified.set(false);
    }

    pub fn is_nullified(&self) -> bool {
        self.nullified.get()
    }

    /// Tell the destination that this interface is closing.
    ///
    /// This does not disconnect anything; see [`Interface::shutdown`].
    pub fn close(&self, rc: Status) {
        let dest = self.dest();
        log::trace!("[INTF] {:p} close ({:?})", self, rc);
        dest.intf_close(rc);
    }

    /// Block further operations, notify the destination of close, and
    /// unplug.
    pub fn shutdown(&self, rc: Status) {
        log::trace!("[INTF] {:p} shutting down ({:?})", self, rc);
        self.nullify();

        // The reference held by this interface moves to the temporary.
        let dest = self.dest.replace(T::intf_null());
        {
            let tmp = Dest::new(dest.clone());
            tmp.intf_close(rc);
        }
        release(dest);
    }

    /// Shut down, then accept operations again.
    pub fn restart(&self, rc: Status) {
        self.shutdown(rc);
        log::trace!("[INTF] {:p} restarting", self);
        self.reinit();
    }
}

impl<T: ?Sized + Operations> Default for Interface<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + Operations> Drop for Interface<T> {
    fn drop(&mut self) {
        // The Rc goes with us; the logical reference must go too.
        if let Some(refcnt) = self.dest.get_mut().intf_refcnt() {
            refcnt.put();
        }
    }
}

impl<T: ?Sized + Operations> fmt::Debug for Interface<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("plugged", &self.is_plugged())
            .field("nullified", &self.nullified.get())
            .finish()
    }
}

/// Counted reference on an interface destination.
///
/// Holds a [`Refcnt`] reference for as long as it lives. If the endpoint's
/// port has been nullified, operations are routed to the null endpoint.
pub struct Dest<T: ?Sized + Operations> {
    held: Rc<T>,
    ops: Rc<T>,
}

impl<T: ?Sized + Operations> Dest<T> {
    fn new(held: Rc<T>) -> Self {
        if let Some(refcnt) = held.intf_refcnt() {
            refcnt.get();
        }
        let blocked = held.intf_port().map_or(false, Interface::is_nullified);
        let ops = if blocked { T::intf_null() } else { held.clone() };
        Self { held, ops }
    }

    /// The endpoint this reference was taken on, regardless of blocking.
    pub fn endpoint(&self) -> &Rc<T> {
        &self.held
    }

    /// Whether operations are being diverted to the null endpoint.
    pub fn is_blocked(&self) -> bool {
        !same_endpoint(&self.held, &self.ops)
    }
}

impl<T: ?Sized + Operations> Deref for Dest<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.ops
    }
}

impl<T: ?Sized + Operations> Drop for Dest<T> {
    fn drop(&mut self) {
        if let Some(refcnt) = self.held.intf_refcnt() {
            refcnt.put();
        }
    }
}

/// Drop both the logical and the memory reference on an endpoint.
fn release<T: ?Sized + Operations>(endpoint: Rc<T>) {
    if let Some(refcnt) = endpoint.intf_refcnt() {
        refcnt.put();
    }
    drop(endpoint);
}

/// Address identity, ignoring vtable metadata.
pub fn same_endpoint<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    core::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

/// Plug two endpoints into each other.
///
/// `a`'s port is pointed at `b` and `b`'s port at `a`. Endpoints without a
/// port (such as the null endpoint) are left alone.
pub fn plug_plug<T: ?Sized + Operations>(a: &Rc<T>, b: &Rc<T>) {
    if let Some(port) = a.intf_port() {
        port.plug(b.clone());
    }
    if let Some(port) = b.intf_port() {
        port.plug(a.clone());
    }
}

/// Insert a filter between `this` and whatever its port points at.
///
/// Afterwards `this` ↔ `upper` and `lower` ↔ old destination.
pub fn insert<T: ?Sized + Operations>(this: &Rc<T>, upper: &Rc<T>, lower: &Rc<T>) {
    let Some(port) = this.intf_port() else {
        return;
    };
    let dest = port.dest();
    plug_plug(this, upper);
    plug_plug(lower, dest.endpoint());
}

/// Interfaces of any kind, for shutting several down together.
pub trait Shutdown {
    fn nullify(&self);
    fn shutdown(&self, rc: Status);
    fn reinit(&self);
}

impl<T: ?Sized + Operations> Shutdown for Interface<T> {
    fn nullify(&self) {
        Interface::nullify(self)
    }

    fn shutdown(&self, rc: Status) {
        Interface::shutdown(self, rc)
    }

    fn reinit(&self) {
        Interface::reinit(self)
    }
}

/// Shut down several interfaces.
///
/// All are nullified before any is shut down, so close notifications
/// bouncing back through a sibling interface are ignored.
pub fn shutdown_all(rc: Status, intfs: &[&dyn Shutdown]) {
    for intf in intfs {
        intf.nullify();
    }
    for intf in intfs {
        intf.shutdown(rc);
    }
}

/// Shut down several interfaces, then accept operations again on all.
pub fn restart_all(rc: Status, intfs: &[&dyn Shutdown]) {
    shutdown_all(rc, intfs);
    for intf in intfs {
        intf.reinit();
    }
}

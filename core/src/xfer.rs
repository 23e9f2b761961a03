//! Data transfer interfaces.
//!
//! An xfer interface is one end of a byte-stream conduit. Data moves by
//! [`Xfer::deliver`] calls along a chain of objects (socket → filter →
//! consumer); flow control is cooperative through [`Xfer::window`], and a
//! layer can substitute a new source for its consumer with
//! [`Xfer::redirect`].
//!
//! Every operation has a default, so an object only implements the ones it
//! cares about. The defaults are also what the null endpoint does.

use alloc::format;
use alloc::rc::Rc;
use core::fmt;

use bitflags::bitflags;
use smoltcp::wire::IpEndpoint;

use crate::error::{Error, Result, Status};
use crate::interface::{shutdown_all, Interface, Operations};
use crate::iobuf::IoBuffer;
use crate::open::Location;
use crate::refcnt::Refcnt;

bitflags! {
    /// Delivery flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct XferFlags: u32 {
        /// `offset` is an absolute position rather than relative to the
        /// current one
        const ABS_OFFSET = 0x0001;
        /// Data is out-of-band (e.g. a protocol control message)
        const OUT_OF_BAND = 0x0002;
    }
}

/// Identifies the network device a datagram arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetDevId(pub u32);

/// Metadata travelling with a delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    pub flags: XferFlags,
    /// Position of the data, relative to the current position unless
    /// [`XferFlags::ABS_OFFSET`] is set
    pub offset: i64,
    pub src: Option<IpEndpoint>,
    pub dest: Option<IpEndpoint>,
    pub netdev: Option<NetDevId>,
}

impl Metadata {
    /// Metadata positioning data at an absolute offset.
    pub fn absolute(offset: i64) -> Self {
        Self {
            flags: XferFlags::ABS_OFFSET,
            offset,
            ..Self::default()
        }
    }
}

/// Operations an xfer endpoint accepts.
pub trait Xfer {
    /// Interface through which this endpoint is connected. The null
    /// endpoint has none.
    fn port(&self) -> Option<&Interface<dyn Xfer>>;

    fn refcnt(&self) -> Option<&Refcnt> {
        None
    }

    fn is_null(&self) -> bool {
        false
    }

    /// The peer is closing. Every receiver must tear down its own side;
    /// the default restarts this endpoint's port.
    fn close(&self, rc: Status) {
        if let Some(port) = self.port() {
            port.restart(rc);
        }
    }

    /// Bytes this endpoint will currently accept.
    fn window(&self) -> usize {
        usize::MAX
    }

    /// Unsolicited change of the peer's window. Never sent in response to
    /// a `deliver`.
    fn window_changed(&self) {}

    fn alloc_iob(&self, len: usize) -> Result<IoBuffer> {
        Ok(IoBuffer::alloc(len))
    }

    /// Take ownership of `iobuf`, whatever the outcome.
    fn deliver(&self, iobuf: IoBuffer, meta: &Metadata) -> Status {
        drop(iobuf);
        let _ = meta;
        Err(Error::BrokenPipe)
    }

    /// Re-point this endpoint at a new data source.
    fn redirect(&self, location: &Location) -> Status {
        let _ = location;
        Err(Error::NotSupported)
    }
}

/// The null xfer endpoint.
#[derive(Debug, Default)]
pub struct NullXfer;

impl Xfer for NullXfer {
    fn port(&self) -> Option<&Interface<dyn Xfer>> {
        None
    }

    fn is_null(&self) -> bool {
        true
    }

    fn close(&self, _rc: Status) {}
}

impl Operations for dyn Xfer {
    fn intf_null() -> Rc<Self> {
        Rc::new(NullXfer)
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
        self.close(rc)
    }
}

impl Interface<dyn Xfer> {
    pub fn window(&self) -> usize {
        self.dest().window()
    }

    pub fn window_changed(&self) {
        self.dest().window_changed()
    }

    pub fn alloc_iob(&self, len: usize) -> Result<IoBuffer> {
        let dest = self.dest();
        let iobuf = dest.alloc_iob(len);
        if iobuf.is_err() {
            log::debug!("[XFER] {:p} alloc_iob {} failed", self, len);
        }
        iobuf
    }

    /// Deliver a buffer. Ownership passes to the destination even on
    /// failure.
    pub fn deliver(&self, iobuf: IoBuffer, meta: &Metadata) -> Status {
        let dest = self.dest();
        log::trace!("[XFER] {:p} deliver {}", self, iobuf.len());
        let rc = dest.deliver(iobuf, meta);
        if let Err(e) = rc {
            log::debug!("[XFER] {:p} deliver failed: {}", self, e);
        }
        rc
    }

    pub fn deliver_iob(&self, iobuf: IoBuffer) -> Status {
        self.deliver(iobuf, &Metadata::default())
    }

    /// Copy `data` into a buffer allocated by the destination and deliver it.
    pub fn deliver_raw_meta(&self, data: &[u8], meta: &Metadata) -> Status {
        let mut iobuf = self.alloc_iob(data.len()).map_err(|_| Error::NoMemory)?;
        iobuf.put_slice(data);
        self.deliver(iobuf, meta)
    }

    pub fn deliver_raw(&self, data: &[u8]) -> Status {
        self.deliver_raw_meta(data, &Metadata::default())
    }

    /// Deliver a formatted string, e.g. `port.printf(format_args!(...))`.
    pub fn printf(&self, args: fmt::Arguments<'_>) -> Status {
        let text = format!("{}", args);
        self.deliver_raw(text.as_bytes())
    }

    /// Move the destination's position by delivering an empty buffer at an
    /// absolute offset.
    pub fn seek(&self, offset: i64) -> Status {
        log::trace!("[XFER] {:p} seek to {}", self, offset);
        let iobuf = self.alloc_iob(0).map_err(|_| Error::NoMemory)?;
        self.deliver(iobuf, &Metadata::absolute(offset))
    }

    pub fn redirect(&self, location: &Location) -> Status {
        let dest = self.dest();
        log::debug!("[XFER] {:p} redirect to {}", self, location);
        let rc = dest.redirect(location);
        if let Err(e) = rc {
            log::debug!("[XFER] {:p} redirect failed: {}", self, e);
        }
        rc
    }
}

/// Enforce strictly in-order delivery.
///
/// `pos` is the consumer's current position and advances by `len` on
/// success. Zero-length deliveries (seeks) are always accepted.
pub fn check_order(meta: &Metadata, pos: &mut usize, len: usize) -> Status {
    if len == 0 {
        return Ok(());
    }

    let base = if meta.flags.contains(XferFlags::ABS_OFFSET) {
        0
    } else {
        *pos as i64
    };
    if base.checked_add(meta.offset) != Some(*pos as i64) {
        return Err(Error::Protocol);
    }

    *pos += len;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// FILTERS
// ═══════════════════════════════════════════════════════════════════════════

/// An object sitting in the middle of a pipeline.
///
/// The upper interface faces the consumer, the lower one faces the data
/// source. Each operation arriving on one face is by default forwarded
/// through the other; a filter overrides only what it transforms. A close
/// arriving on either face shuts both down.
pub trait Filter: 'static {
    fn upper(&self) -> &Interface<dyn Xfer>;
    fn lower(&self) -> &Interface<dyn Xfer>;

    fn refcnt(&self) -> Option<&Refcnt> {
        None
    }

    fn close_from_upper(&self, rc: Status) {
        shutdown_all(rc, &[self.upper(), self.lower()]);
    }

    fn close_from_lower(&self, rc: Status) {
        shutdown_all(rc, &[self.upper(), self.lower()]);
    }

    fn window_for_upper(&self) -> usize {
        self.lower().window()
    }

    fn window_for_lower(&self) -> usize {
        self.upper().window()
    }

    fn window_changed_from_upper(&self) {
        self.lower().window_changed()
    }

    fn window_changed_from_lower(&self) {
        self.upper().window_changed()
    }

    fn alloc_iob_for_upper(&self, len: usize) -> Result<IoBuffer> {
        self.lower().alloc_iob(len)
    }

    fn alloc_iob_for_lower(&self, len: usize) -> Result<IoBuffer> {
        self.upper().alloc_iob(len)
    }

    fn deliver_from_upper(&self, iobuf: IoBuffer, meta: &Metadata) -> Status {
        self.lower().deliver(iobuf, meta)
    }

    fn deliver_from_lower(&self, iobuf: IoBuffer, meta: &Metadata) -> Status {
        self.upper().deliver(iobuf, meta)
    }

    fn redirect_from_upper(&self, location: &Location) -> Status {
        self.lower().redirect(location)
    }

    fn redirect_from_lower(&self, location: &Location) -> Status {
        self.upper().redirect(location)
    }
}

/// Endpoint through which the consumer reaches a filter.
pub struct UpperFace<F: Filter>(pub Rc<F>);

/// Endpoint through which the data source reaches a filter.
pub struct LowerFace<F: Filter>(pub Rc<F>);

impl<F: Filter> UpperFace<F> {
    pub fn endpoint(filter: &Rc<F>) -> Rc<dyn Xfer> {
        Rc::new(Self(filter.clone()))
    }
}

impl<F: Filter> LowerFace<F> {
    pub fn endpoint(filter: &Rc<F>) -> Rc<dyn Xfer> {
        Rc::new(Self(filter.clone()))
    }
}

impl<F: Filter> Xfer for UpperFace<F> {
    fn port(&self) -> Option<&Interface<dyn Xfer>> {
        Some(self.0.upper())
    }

    fn refcnt(&self) -> Option<&Refcnt> {
        self.0.refcnt()
    }

    fn close(&self, rc: Status) {
        self.0.close_from_upper(rc)
    }

    fn window(&self) -> usize {
        self.0.window_for_upper()
    }

    fn window_changed(&self) {
        self.0.window_changed_from_upper()
    }

    fn alloc_iob(&self, len: usize) -> Result<IoBuffer> {
        self.0.alloc_iob_for_upper(len)
    }

    fn deliver(&self, iobuf: IoBuffer, meta: &Metadata) -> Status {
        self.0.deliver_from_upper(iobuf, meta)
    }

    fn redirect(&self, location: &Location) -> Status {
        self.0.redirect_from_upper(location)
    }
}

impl<F: Filter> Xfer for LowerFace<F> {
    fn port(&self) -> Option<&Interface<dyn Xfer>> {
        Some(self.0.lower())
    }

    fn refcnt(&self) -> Option<&Refcnt> {
        self.0.refcnt()
    }

    fn close(&self, rc: Status) {
        self.0.close_from_lower(rc)
    }

    fn window(&self) -> usize {
        self.0.window_for_lower()
    }

    fn window_changed(&self) {
        self.0.window_changed_from_lower()
    }

    fn alloc_iob(&self, len: usize) -> Result<IoBuffer> {
        self.0.alloc_iob_for_lower(len)
    }

    fn deliver(&self, iobuf: IoBuffer, meta: &Metadata) -> Status {
        self.0.deliver_from_lower(iobuf, meta)
    }

    fn redirect(&self, location: &Location) -> Status {
        self.0.redirect_from_lower(location)
    }
}

/// Splice `filter` between `consumer` and whatever the consumer's port is
/// connected to.
pub fn insert_filter<F: Filter>(consumer: &Rc<dyn Xfer>, filter: &Rc<F>) {
    crate::interface::insert(
        consumer,
        &UpperFace::endpoint(filter),
        &LowerFace::endpoint(filter),
    );
}

//! TCP connections as xfer endpoints.
//!
//! A [`TcpConnection`] wraps one smoltcp socket. Upstream it is an ordinary
//! xfer endpoint: it accepts data within the free send space and delivers
//! received data within the consumer's window. The socket is returned to
//! the stack when the last holder of the connection lets go.

use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::Cell;
use core::fmt;

use smoltcp::iface::SocketHandle;
use smoltcp::phy::Device;
use smoltcp::socket::tcp;
use smoltcp::wire::IpEndpoint;

use bootplug_core::{
    plug_plug, Error, Interface, IoBuffer, Metadata, Refcnt, RetryTimer, SocketKind, SocketOpener,
    Status, Xfer,
};

use crate::stack::NetStack;

/// Largest chunk handed upstream in one delivery.
const MAX_DELIVERY: usize = 1460;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// SYN sent, waiting for the handshake
    Connecting,
    Established,
    /// FIN sent, waiting for the socket to wind down
    Closing,
    /// Reset queued, released on the next service
    Aborting,
    Closed,
}

pub struct TcpConnection<D: Device + 'static> {
    pub(crate) refcnt: Refcnt,
    xfer: Interface<dyn Xfer>,
    stack: Rc<NetStack<D>>,
    handle: SocketHandle,
    peer: IpEndpoint,
    local: Cell<Option<IpEndpoint>>,
    state: Cell<ConnState>,
    /// Send window last reported upstream
    window: Cell<usize>,
    timer: Rc<RetryTimer>,
}

impl<D: Device + 'static> TcpConnection<D> {
    /// Connect to `peer` and plug the connection into `parent`.
    pub fn open(
        stack: &Rc<NetStack<D>>,
        parent: &Rc<dyn Xfer>,
        peer: IpEndpoint,
        local: Option<IpEndpoint>,
    ) -> Status {
        let handle = stack.connect(peer, local)?;
        let base = stack.timeouts().tcp_connect(stack.timers().rate());

        let conn = Rc::new_cyclic(|me: &Weak<Self>| {
            let owner = Rc::downgrade(stack);
            let expired = me.clone();
            Self {
                refcnt: Refcnt::with_release(move || {
                    log::debug!("[TCP] socket {} released", handle);
                    if let Some(stack) = owner.upgrade() {
                        stack.remove_socket(handle);
                    }
                }),
                xfer: Interface::new(),
                stack: stack.clone(),
                handle,
                peer,
                local: Cell::new(None),
                state: Cell::new(ConnState::Connecting),
                window: Cell::new(0),
                timer: RetryTimer::new(base, move |_, retries| {
                    if let Some(conn) = expired.upgrade() {
                        conn.expired(retries);
                    }
                }),
            }
        });
        log::info!("[TCP] {} connecting to {}", conn, peer);

        stack.attach(&conn);
        stack.timers().start(&conn.timer);

        let xfer: Rc<dyn Xfer> = conn.clone();
        plug_plug(parent, &xfer);
        conn.refcnt.put();
        Ok(())
    }

    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    pub fn peer(&self) -> IpEndpoint {
        self.peer
    }

    pub fn local(&self) -> Option<IpEndpoint> {
        self.local.get()
    }

    fn with_socket<R>(&self, f: impl FnOnce(&mut tcp::Socket<'static>) -> R) -> R {
        self.stack.with_tcp_socket(self.handle, f)
    }

    fn expired(&self, retries: u32) {
        match self.state.get() {
            ConnState::Connecting => {
                let limit = self.stack.timeouts().connect_retries;
                if retries >= limit {
                    log::warn!("[TCP] {} no answer from {}", self, self.peer);
                    self.finish(Err(Error::TimedOut));
                } else {
                    log::debug!("[TCP] {} still connecting ({}/{})", self, retries, limit);
                }
            }
            ConnState::Closing => {
                log::warn!("[TCP] {} close timed out, resetting", self);
                self.stack.timers().stop(&self.timer);
                self.with_socket(|s| s.abort());
                self.state.set(ConnState::Aborting);
            }
            _ => self.stack.timers().stop(&self.timer),
        }
    }

    /// Bring the xfer side up to date with the socket.
    pub(crate) fn service(&self) {
        match self.state.get() {
            ConnState::Connecting => self.service_connecting(),
            ConnState::Established => self.service_established(),
            ConnState::Closing => {
                let state = self.with_socket(|s| s.state());
                if matches!(state, tcp::State::Closed | tcp::State::TimeWait) {
                    self.release();
                }
            }
            ConnState::Aborting => self.release(),
            ConnState::Closed => {}
        }
    }

    fn service_connecting(&self) {
        let (state, local) = self.with_socket(|s| (s.state(), s.local_endpoint()));
        match state {
            tcp::State::Established => {
                self.stack.timers().stop(&self.timer);
                self.local.set(local);
                self.state.set(ConnState::Established);
                log::info!("[TCP] {} connected", self);
                self.update_window();
            }
            tcp::State::Closed => {
                log::warn!("[TCP] {} refused by {}", self, self.peer);
                self.finish(Err(Error::ConnectionRefused));
            }
            _ => {}
        }
    }

    fn service_established(&self) {
        while self.state.get() == ConnState::Established {
            let window = self.xfer.window();
            if window == 0 {
                break;
            }
            let Some(data) = self.receive(window) else {
                break;
            };
            let meta = Metadata {
                src: Some(self.peer),
                dest: self.local.get(),
                netdev: Some(self.stack.netdev()),
                ..Metadata::default()
            };
            if let Err(e) = self.xfer.deliver_raw_meta(&data, &meta) {
                log::warn!("[TCP] {} consumer refused data: {}", self, e);
                self.finish(Err(e));
            }
        }
        if self.state.get() != ConnState::Established {
            return;
        }

        let (state, may_recv, queued) = self.with_socket(|s| (s.state(), s.may_recv(), s.recv_queue()));
        if state == tcp::State::Closed {
            log::warn!("[TCP] {} reset by peer", self);
            self.finish(Err(Error::ConnectionReset));
        } else if !may_recv && queued == 0 {
            log::debug!("[TCP] {} peer finished sending", self);
            self.finish(Ok(()));
        } else {
            self.update_window();
        }
    }

    /// Dequeue up to `window` received bytes.
    fn receive(&self, window: usize) -> Option<Vec<u8>> {
        let limit = window.min(MAX_DELIVERY);
        let data = self.with_socket(|s| {
            if !s.can_recv() {
                return None;
            }
            s.recv(|buf| {
                let n = buf.len().min(limit);
                (n, buf[..n].to_vec())
            })
            .ok()
        })?;
        (!data.is_empty()).then_some(data)
    }

    /// Tell the consumer about send space that has opened up.
    fn update_window(&self) {
        let window = self.window();
        let old = self.window.replace(window);
        if window > old {
            self.xfer.window_changed();
        }
    }

    /// End the connection and notify the consumer. A clean finish of an
    /// established connection sends FIN; anything else resets.
    fn finish(&self, rc: Status) {
        let state = self.state.get();
        if !matches!(state, ConnState::Connecting | ConnState::Established) {
            return;
        }
        self.stack.timers().stop(&self.timer);

        if rc.is_ok() && state == ConnState::Established {
            self.with_socket(|s| s.close());
            self.state.set(ConnState::Closing);
            let timeout = self.stack.timeouts().tcp_close(self.stack.timers().rate());
            self.stack.timers().start_fixed(&self.timer, timeout);
        } else {
            self.with_socket(|s| s.abort());
            self.state.set(ConnState::Aborting);
        }
        self.window.set(0);
        self.xfer.shutdown(rc);
    }

    /// Give the socket back.
    fn release(&self) {
        log::debug!("[TCP] {} closed", self);
        self.state.set(ConnState::Closed);
        self.stack.timers().stop(&self.timer);
        self.stack.detach(self);
    }
}

impl<D: Device + 'static> fmt::Display for TcpConnection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local.get() {
            Some(local) => write!(f, "{}->{}", local, self.peer),
            None => write!(f, "socket {}", self.handle),
        }
    }
}

impl<D: Device + 'static> Xfer for TcpConnection<D> {
    fn port(&self) -> Option<&Interface<dyn Xfer>> {
        Some(&self.xfer)
    }

    fn refcnt(&self) -> Option<&Refcnt> {
        Some(&self.refcnt)
    }

    fn close(&self, rc: Status) {
        log::debug!("[TCP] {} closed by consumer ({:?})", self, rc);
        self.finish(rc);
    }

    fn window(&self) -> usize {
        if self.state.get() != ConnState::Established {
            return 0;
        }
        self.with_socket(|s| {
            if s.may_send() {
                s.send_capacity() - s.send_queue()
            } else {
                0
            }
        })
    }

    fn deliver(&self, iobuf: IoBuffer, _meta: &Metadata) -> Status {
        if self.state.get() != ConnState::Established {
            return Err(Error::NotConnected);
        }
        let len = iobuf.len();
        let space = self.window();
        if len > space {
            // Part of the stream would be lost; the connection cannot go on.
            log::warn!("[TCP] {} send overrun, {} bytes with room for {}", self, len, space);
            self.finish(Err(Error::NoSpace));
            return Err(Error::NoSpace);
        }
        let sent = self.with_socket(|s| s.send_slice(iobuf.data())).unwrap_or(0);
        if sent < len {
            log::warn!("[TCP] {} socket took {} of {} bytes", self, sent, len);
            self.finish(Err(Error::NotConnected));
            return Err(Error::NotConnected);
        }
        self.window.set(self.window());
        Ok(())
    }
}

/// Opens stream sockets on a [`NetStack`].
pub struct TcpOpener<D: Device + 'static> {
    stack: Rc<NetStack<D>>,
}

impl<D: Device + 'static> TcpOpener<D> {
    pub fn new(stack: Rc<NetStack<D>>) -> Self {
        Self { stack }
    }
}

impl<D: Device + 'static> SocketOpener for TcpOpener<D> {
    fn kind(&self) -> SocketKind {
        SocketKind::Stream
    }

    fn open(&self, parent: &Rc<dyn Xfer>, peer: IpEndpoint, local: Option<IpEndpoint>) -> Status {
        TcpConnection::open(&self.stack, parent, peer, local)
    }
}

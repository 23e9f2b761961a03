//! Network stack process.
//!
//! Owns the smoltcp interface, its socket set and the device. Scheduled as
//! a process: every step polls the interface, then services each open TCP
//! connection so received data and state changes reach the xfer layer.

use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use smoltcp::iface::{Config as IfaceConfig, Interface as IpInterface, SocketHandle, SocketSet};
use smoltcp::phy::Device;
use smoltcp::socket::tcp;
use smoltcp::time::Instant;
use smoltcp::wire::{EthernetAddress, HardwareAddress, IpCidr, IpEndpoint, IpListenEndpoint, Ipv4Address};

use bootplug_core::{Context, Error, NetDevId, Openers, Process, ProcessLink, Result, Timeouts, Timers};

use crate::tcp::{TcpConnection, TcpOpener};

/// TCP receive buffer per connection.
pub const TCP_RX_BUFFER: usize = 64 * 1024;
/// TCP transmit buffer per connection.
pub const TCP_TX_BUFFER: usize = 16 * 1024;
/// First port of the ephemeral range.
pub const EPHEMERAL_PORT_START: u16 = 49152;

/// Interface addressing.
#[derive(Debug, Clone, Copy)]
pub struct StackConfig {
    pub mac: [u8; 6],
    pub address: IpCidr,
    pub gateway: Option<Ipv4Address>,
    pub netdev: NetDevId,
}

struct Inner<D> {
    iface: IpInterface,
    device: D,
    sockets: SocketSet<'static>,
}

pub struct NetStack<D: Device + 'static> {
    inner: RefCell<Inner<D>>,
    connections: RefCell<Vec<Rc<TcpConnection<D>>>>,
    timers: Rc<Timers>,
    timeouts: Timeouts,
    netdev: NetDevId,
    next_port: Cell<u16>,
    link: ProcessLink,
}

impl<D: Device + 'static> NetStack<D> {
    pub fn new(mut device: D, config: StackConfig, timers: Rc<Timers>, timeouts: Timeouts) -> Rc<Self> {
        let hardware = HardwareAddress::Ethernet(EthernetAddress(config.mac));
        let mut iface_config = IfaceConfig::new(hardware);
        iface_config.random_seed = timers.now();

        let mut iface = IpInterface::new(iface_config, &mut device, instant(&timers));
        iface.update_ip_addrs(|addrs| {
            if addrs.push(config.address).is_err() {
                log::warn!("[NET] no room for address {}", config.address);
            }
        });
        if let Some(gateway) = config.gateway {
            if iface.routes_mut().add_default_ipv4_route(gateway).is_err() {
                log::warn!("[NET] route table full, no default route via {}", gateway);
            }
        }
        log::info!(
            "[NET] {:?} up: {} ({})",
            config.netdev,
            config.address,
            EthernetAddress(config.mac)
        );

        Rc::new(Self {
            inner: RefCell::new(Inner {
                iface,
                device,
                sockets: SocketSet::new(vec![]),
            }),
            connections: RefCell::new(Vec::new()),
            timers,
            timeouts,
            netdev: config.netdev,
            next_port: Cell::new(EPHEMERAL_PORT_START),
            link: ProcessLink::new(),
        })
    }

    /// Register the TCP opener with `openers`.
    pub fn register(self: &Rc<Self>, openers: &Openers) {
        openers.register_socket(Rc::new(TcpOpener::new(self.clone())));
    }

    /// Schedule the stack in `ctx` and make TCP sockets openable there.
    pub fn start(self: &Rc<Self>, ctx: &Context) {
        self.register(ctx.openers());
        let process: Rc<dyn Process> = self.clone();
        ctx.scheduler().add(&process);
    }

    pub fn timers(&self) -> &Rc<Timers> {
        &self.timers
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn netdev(&self) -> NetDevId {
        self.netdev
    }

    pub fn connection_count(&self) -> usize {
        self.connections.borrow().len()
    }

    /// Sockets in the socket set, listeners included.
    pub fn socket_count(&self) -> usize {
        self.inner.borrow().sockets.iter().count()
    }

    /// Run the interface once.
    pub fn poll(&self) -> bool {
        let now = instant(&self.timers);
        let mut inner = self.inner.borrow_mut();
        let Inner {
            iface,
            device,
            sockets,
        } = &mut *inner;
        iface.poll(now, device, sockets)
    }

    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.inner.borrow_mut().device)
    }

    /// Add a TCP socket not managed by a connection (a listener, say).
    pub fn add_tcp_socket(&self, socket: tcp::Socket<'static>) -> SocketHandle {
        self.inner.borrow_mut().sockets.add(socket)
    }

    /// Run `f` on a TCP socket. No other stack call may be made from `f`.
    pub fn with_tcp_socket<R>(&self, handle: SocketHandle, f: impl FnOnce(&mut tcp::Socket<'static>) -> R) -> R {
        let mut inner = self.inner.borrow_mut();
        f(inner.sockets.get_mut::<tcp::Socket<'static>>(handle))
    }

    pub fn remove_socket(&self, handle: SocketHandle) {
        self.inner.borrow_mut().sockets.remove(handle);
    }

    /// Next port of the ephemeral range, wrapping at the top.
    pub fn ephemeral_port(&self) -> u16 {
        let port = self.next_port.get();
        let next = port.checked_add(1).unwrap_or(EPHEMERAL_PORT_START);
        self.next_port.set(next);
        port
    }

    /// Create a socket and start connecting it to `peer`.
    pub(crate) fn connect(&self, peer: IpEndpoint, local: Option<IpEndpoint>) -> Result<SocketHandle> {
        let port = match local {
            Some(ep) if ep.port != 0 => ep.port,
            _ => self.ephemeral_port(),
        };
        let local = IpListenEndpoint {
            addr: local.map(|ep| ep.addr).filter(|addr| !addr.is_unspecified()),
            port,
        };

        let mut socket = tcp::Socket::new(
            tcp::SocketBuffer::new(vec![0; TCP_RX_BUFFER]),
            tcp::SocketBuffer::new(vec![0; TCP_TX_BUFFER]),
        );

        let mut inner = self.inner.borrow_mut();
        let Inner { iface, sockets, .. } = &mut *inner;
        socket.connect(iface.context(), peer, local).map_err(|e| {
            log::warn!("[NET] cannot connect {} -> {}: {:?}", port, peer, e);
            match e {
                tcp::ConnectError::InvalidState => Error::AddressInUse,
                tcp::ConnectError::Unaddressable => Error::InvalidArgument,
            }
        })?;
        Ok(sockets.add(socket))
    }

    pub(crate) fn attach(&self, conn: &Rc<TcpConnection<D>>) {
        conn.refcnt.get();
        self.connections.borrow_mut().push(conn.clone());
    }

    pub(crate) fn detach(&self, conn: &TcpConnection<D>) {
        let removed = {
            let mut connections = self.connections.borrow_mut();
            let target = conn as *const TcpConnection<D>;
            let before = connections.len();
            connections.retain(|c| !core::ptr::eq(Rc::as_ptr(c), target));
            before != connections.len()
        };
        if removed {
            conn.refcnt.put();
        }
    }
}

impl<D: Device + 'static> Process for NetStack<D> {
    fn link(&self) -> &ProcessLink {
        &self.link
    }

    fn step(&self) {
        self.poll();

        let connections: Vec<Rc<TcpConnection<D>>> = self.connections.borrow().clone();
        for conn in connections {
            conn.service();
        }
    }

    fn name(&self) -> &'static str {
        "net"
    }
}

/// smoltcp timestamp for the current tick count.
pub fn instant(timers: &Timers) -> Instant {
    let ms = timers.rate().ticks_to_ms(timers.now());
    Instant::from_millis(i64::try_from(ms).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootplug_core::{ManualClock, BACKOFF_LIMIT};
    use smoltcp::phy::{Loopback, Medium};
    use smoltcp::wire::{IpAddress, Ipv4Address};

    fn stack() -> Rc<NetStack<Loopback>> {
        let clock = ManualClock::new(1_000);
        let timers = Rc::new(Timers::new(Rc::new(clock), BACKOFF_LIMIT));
        NetStack::new(
            Loopback::new(Medium::Ethernet),
            StackConfig {
                mac: [0x02, 0, 0, 0, 0, 1],
                address: IpCidr::new(IpAddress::v4(127, 0, 0, 1), 8),
                gateway: Some(Ipv4Address::new(127, 0, 0, 254)),
                netdev: NetDevId(0),
            },
            timers,
            Timeouts::default(),
        )
    }

    #[test]
    fn ephemeral_ports_wrap() {
        let stack = stack();
        assert_eq!(stack.ephemeral_port(), EPHEMERAL_PORT_START);
        assert_eq!(stack.ephemeral_port(), EPHEMERAL_PORT_START + 1);

        stack.next_port.set(u16::MAX);
        assert_eq!(stack.ephemeral_port(), u16::MAX);
        assert_eq!(stack.ephemeral_port(), EPHEMERAL_PORT_START);
    }

    #[test]
    fn connect_allocates_a_socket() {
        let stack = stack();
        let peer = IpEndpoint::new(IpAddress::v4(127, 0, 0, 1), 80);
        let handle = stack.connect(peer, None).unwrap();
        assert_eq!(stack.socket_count(), 1);
        let (state, port) = stack.with_tcp_socket(handle, |s| (s.state(), s.local_endpoint().map(|ep| ep.port)));
        assert_eq!(state, tcp::State::SynSent);
        assert_eq!(port, Some(EPHEMERAL_PORT_START));

        let fixed = IpEndpoint::new(IpAddress::v4(0, 0, 0, 0), 1234);
        let handle = stack.connect(peer, Some(fixed)).unwrap();
        let port = stack.with_tcp_socket(handle, |s| s.local_endpoint().map(|ep| ep.port));
        assert_eq!(port, Some(1234));
    }

    #[test]
    fn unaddressable_peer_is_rejected() {
        let stack = stack();
        let nowhere = IpEndpoint::new(IpAddress::v4(0, 0, 0, 0), 80);
        assert_eq!(stack.connect(nowhere, None), Err(Error::InvalidArgument));
        assert_eq!(stack.ephemeral_port(), EPHEMERAL_PORT_START + 1);
    }
}

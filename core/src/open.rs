//! Opening data transfer interfaces.
//!
//! A [`Location`] names where data should come from; an [`Openers`] table
//! maps it to the object that knows how to fetch it. Openers create the new
//! object and plug it into the requesting parent endpoint.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use smoltcp::wire::IpEndpoint;

use crate::error::{Error, Status};
use crate::uri::Uri;
use crate::xfer::Xfer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Datagram,
}

/// Where to open a data transfer interface to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Uri(Uri),
    Socket {
        kind: SocketKind,
        peer: IpEndpoint,
        local: Option<IpEndpoint>,
    },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uri(uri) => write!(f, "{}", uri),
            Self::Socket { kind, peer, .. } => write!(f, "{:?} socket {}", kind, peer),
        }
    }
}

/// Opens URIs of one scheme.
pub trait UriOpener {
    fn scheme(&self) -> &str;

    /// Create the object serving `uri` and plug it into `parent`.
    fn open(&self, parent: &Rc<dyn Xfer>, uri: &Uri) -> Status;
}

/// Opens sockets of one kind.
pub trait SocketOpener {
    fn kind(&self) -> SocketKind;

    fn open(&self, parent: &Rc<dyn Xfer>, peer: IpEndpoint, local: Option<IpEndpoint>) -> Status;
}

/// Registry of openers.
#[derive(Default)]
pub struct Openers {
    uri: RefCell<Vec<Rc<dyn UriOpener>>>,
    socket: RefCell<Vec<Rc<dyn SocketOpener>>>,
}

impl Openers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a URI opener. Later registrations take precedence.
    pub fn register_uri(&self, opener: Rc<dyn UriOpener>) {
        log::debug!("[OPEN] registered URI opener '{}'", opener.scheme());
        self.uri.borrow_mut().insert(0, opener);
    }

    /// Register a socket opener. Later registrations take precedence.
    pub fn register_socket(&self, opener: Rc<dyn SocketOpener>) {
        log::debug!("[OPEN] registered {:?} socket opener", opener.kind());
        self.socket.borrow_mut().insert(0, opener);
    }

    fn find_uri(&self, scheme: &str) -> Option<Rc<dyn UriOpener>> {
        self.uri
            .borrow()
            .iter()
            .find(|o| o.scheme().eq_ignore_ascii_case(scheme))
            .cloned()
    }

    fn find_socket(&self, kind: SocketKind) -> Option<Rc<dyn SocketOpener>> {
        self.socket.borrow().iter().find(|o| o.kind() == kind).cloned()
    }

    /// Open `location` and plug the result into `parent`.
    pub fn open(&self, parent: &Rc<dyn Xfer>, location: &Location) -> Status {
        let rc = match location {
            Location::Uri(uri) => match self.find_uri(&uri.scheme) {
                Some(opener) => opener.open(parent, uri),
                None => Err(Error::NotSupported),
            },
            Location::Socket { kind, peer, local } => match self.find_socket(*kind) {
                Some(opener) => opener.open(parent, *peer, *local),
                None => Err(Error::NotSupported),
            },
        };
        match rc {
            Ok(()) => log::debug!("[OPEN] opened {}", location),
            Err(e) => log::warn!("[OPEN] could not open {}: {}", location, e),
        }
        rc
    }

    /// Close whatever `parent` is connected to, then open `location` in
    /// its place.
    pub fn reopen(&self, parent: &Rc<dyn Xfer>, location: &Location) -> Status {
        if let Some(port) = parent.port() {
            port.restart(Err(Error::WouldBlock));
        }
        self.open(parent, location)
    }
}

//! Bootplug network transport.
//!
//! # Architecture
//! - `driver` - NIC abstraction and a software loopback NIC
//! - `adapter` - smoltcp Device adapter
//! - `stack` - smoltcp interface polled as a scheduler process
//! - `tcp` - TCP connections as xfer endpoints, and their opener

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod adapter;
pub mod driver;
pub mod stack;
pub mod tcp;

pub use adapter::{NicStats, SmoltcpAdapter};
pub use driver::{LoopbackDriver, MacAddress, NetworkDriver, RxError, TxError};
pub use stack::{NetStack, StackConfig};
pub use tcp::{ConnState, TcpConnection, TcpOpener};

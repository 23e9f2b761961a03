//! Driver abstraction module.
//!
//! Network drivers expose raw Ethernet frames through [`NetworkDriver`];
//! [`crate::adapter::SmoltcpAdapter`] turns any of them into a smoltcp
//! device.
//!
//! # Fire-and-Forget Semantics
//! `transmit()` returns once the frame is queued. Completions are collected
//! separately via `collect_tx_completions()`, which the adapter calls on
//! every poll.

pub mod loopback;
pub mod traits;

pub use loopback::LoopbackDriver;
pub use traits::{MacAddress, NetworkDriver, RxError, TxError};

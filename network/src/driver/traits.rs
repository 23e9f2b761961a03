//! Network driver trait.

use core::fmt;

pub type MacAddress = [u8; 6];

// ═══════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════

/// TX errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    /// TX queue is full.
    QueueFull,
    /// Frame too large.
    FrameTooLarge {
        /// Provided frame size.
        provided: usize,
        /// Maximum allowed size.
        max: usize,
    },
    /// Link is down.
    LinkDown,
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::QueueFull => write!(f, "TX queue full"),
            TxError::FrameTooLarge { provided, max } => {
                write!(f, "frame too large ({} > {})", provided, max)
            }
            TxError::LinkDown => write!(f, "link down"),
        }
    }
}

/// RX errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxError {
    /// Caller's buffer cannot hold the next frame.
    BufferTooSmall {
        /// Frame size.
        needed: usize,
    },
    /// Device reported a receive error.
    DeviceError,
}

impl fmt::Display for RxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RxError::BufferTooSmall { needed } => write!(f, "buffer too small ({} needed)", needed),
            RxError::DeviceError => write!(f, "device error"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DRIVER TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// A NIC moving raw Ethernet frames.
pub trait NetworkDriver {
    fn mac_address(&self) -> MacAddress;

    /// Whether a TX slot is free.
    fn can_transmit(&self) -> bool;

    /// Whether a received frame is waiting.
    fn can_receive(&self) -> bool;

    /// Queue one frame for transmission.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), TxError>;

    /// Copy the next received frame into `buffer`, returning its length.
    fn receive(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, RxError>;

    /// Hand fresh buffers to the RX queue.
    fn refill_rx_queue(&mut self) {}

    /// Reclaim descriptors of completed transmissions.
    fn collect_tx_completions(&mut self) {}

    fn link_up(&self) -> bool;
}

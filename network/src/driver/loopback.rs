//! Software NIC.
//!
//! Frames transmitted on one driver are received on its peer. A driver
//! created with [`LoopbackDriver::new`] is its own peer.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use super::traits::{MacAddress, NetworkDriver, RxError, TxError};

/// Frames queued per direction.
pub const QUEUE_DEPTH: usize = 64;

/// Largest frame accepted (Ethernet header + 1500 byte payload).
pub const MAX_FRAME: usize = 1514;

type Queue = Rc<RefCell<VecDeque<Vec<u8>>>>;

pub struct LoopbackDriver {
    mac: MacAddress,
    tx: Queue,
    rx: Queue,
    link: Rc<Cell<bool>>,
}

impl LoopbackDriver {
    /// Driver whose transmissions come back to itself.
    pub fn new(mac: MacAddress) -> Self {
        let queue = Queue::default();
        Self {
            mac,
            tx: queue.clone(),
            rx: queue,
            link: Rc::new(Cell::new(true)),
        }
    }

    /// Two drivers joined by a cable.
    pub fn pair(a: MacAddress, b: MacAddress) -> (Self, Self) {
        let ab = Queue::default();
        let ba = Queue::default();
        let link = Rc::new(Cell::new(true));
        (
            Self {
                mac: a,
                tx: ab.clone(),
                rx: ba.clone(),
                link: link.clone(),
            },
            Self {
                mac: b,
                tx: ba,
                rx: ab,
                link,
            },
        )
    }

    /// Plug or pull the cable.
    pub fn set_link(&self, up: bool) {
        self.link.set(up);
    }

    /// Frames waiting to be received.
    pub fn pending(&self) -> usize {
        self.rx.borrow().len()
    }
}

impl NetworkDriver for LoopbackDriver {
    fn mac_address(&self) -> MacAddress {
        self.mac
    }

    fn can_transmit(&self) -> bool {
        self.link.get() && self.tx.borrow().len() < QUEUE_DEPTH
    }

    fn can_receive(&self) -> bool {
        !self.rx.borrow().is_empty()
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), TxError> {
        if !self.link.get() {
            return Err(TxError::LinkDown);
        }
        if frame.len() > MAX_FRAME {
            return Err(TxError::FrameTooLarge {
                provided: frame.len(),
                max: MAX_FRAME,
            });
        }
        let mut tx = self.tx.borrow_mut();
        if tx.len() >= QUEUE_DEPTH {
            return Err(TxError::QueueFull);
        }
        tx.push_back(frame.to_vec());
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, RxError> {
        let mut rx = self.rx.borrow_mut();
        let Some(frame) = rx.front() else {
            return Ok(None);
        };
        if frame.len() > buffer.len() {
            return Err(RxError::BufferTooSmall {
                needed: frame.len(),
            });
        }
        let len = frame.len();
        buffer[..len].copy_from_slice(frame);
        rx.pop_front();
        Ok(Some(len))
    }

    fn link_up(&self) -> bool {
        self.link.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: MacAddress = [0x02, 0, 0, 0, 0, 1];
    const B: MacAddress = [0x02, 0, 0, 0, 0, 2];

    #[test]
    fn pair_crosses_over() {
        let (mut a, mut b) = LoopbackDriver::pair(A, B);
        a.transmit(b"to b").unwrap();
        assert!(!a.can_receive());
        assert!(b.can_receive());

        let mut buf = [0u8; 64];
        assert_eq!(b.receive(&mut buf), Ok(Some(4)));
        assert_eq!(&buf[..4], b"to b");
        assert_eq!(b.receive(&mut buf), Ok(None));
    }

    #[test]
    fn loops_back_to_itself() {
        let mut nic = LoopbackDriver::new(A);
        nic.transmit(&[1, 2, 3]).unwrap();
        assert_eq!(nic.pending(), 1);
        let mut buf = [0u8; 2];
        assert_eq!(nic.receive(&mut buf), Err(RxError::BufferTooSmall { needed: 3 }));
        // Frame stays queued after a failed receive.
        assert_eq!(nic.pending(), 1);
    }

    #[test]
    fn transmit_limits() {
        let (mut a, b) = LoopbackDriver::pair(A, B);
        assert_eq!(
            a.transmit(&[0u8; MAX_FRAME + 1]),
            Err(TxError::FrameTooLarge {
                provided: MAX_FRAME + 1,
                max: MAX_FRAME
            })
        );
        for _ in 0..QUEUE_DEPTH {
            a.transmit(&[0u8; 60]).unwrap();
        }
        assert!(!a.can_transmit());
        assert_eq!(a.transmit(&[0u8; 60]), Err(TxError::QueueFull));

        b.set_link(false);
        assert!(!a.link_up());
        assert_eq!(a.transmit(&[0u8; 60]), Err(TxError::LinkDown));
    }
}

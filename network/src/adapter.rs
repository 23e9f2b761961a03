//! smoltcp device over a [`NetworkDriver`].
//!
//! smoltcp pulls frames through [`Device::receive`] and pushes them through
//! [`Device::transmit`] while the interface is polled. Every such call
//! first reclaims finished transmissions, and every frame taken off the NIC
//! is followed by an RX refill, so a descriptor-ring NIC stays stocked for
//! as long as the stack process runs.

use smoltcp::phy::{self, Device, DeviceCapabilities, Medium};
use smoltcp::time::Instant;

use crate::driver::{MacAddress, NetworkDriver};

/// Bytes reserved per frame in each direction.
const FRAME_BUFFER: usize = 2048;
/// Ethernet MTU reported to smoltcp, header included.
const MTU: usize = 1514;
const MAX_BURST: usize = 32;

/// Frame counters. All wrap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NicStats {
    pub rx_frames: u32,
    pub rx_errors: u32,
    pub tx_frames: u32,
    pub tx_dropped: u32,
}

pub struct SmoltcpAdapter<D: NetworkDriver> {
    driver: D,
    rx_frame: [u8; FRAME_BUFFER],
    tx_frame: [u8; FRAME_BUFFER],
    stats: NicStats,
}

impl<D: NetworkDriver> SmoltcpAdapter<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            rx_frame: [0; FRAME_BUFFER],
            tx_frame: [0; FRAME_BUFFER],
            stats: NicStats::default(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn stats(&self) -> NicStats {
        self.stats
    }

    pub fn mac_address(&self) -> MacAddress {
        self.driver.mac_address()
    }

    pub fn link_up(&self) -> bool {
        self.driver.link_up()
    }

    /// Copy the next received frame into `rx_frame`, returning its length.
    fn next_frame(&mut self) -> Option<usize> {
        if !self.driver.can_receive() {
            return None;
        }
        let received = self.driver.receive(&mut self.rx_frame);
        self.driver.refill_rx_queue();
        match received {
            Ok(Some(len)) => {
                self.stats.rx_frames = self.stats.rx_frames.wrapping_add(1);
                Some(len.min(FRAME_BUFFER))
            }
            Ok(None) => None,
            Err(e) => {
                self.stats.rx_errors = self.stats.rx_errors.wrapping_add(1);
                log::warn!("[NIC] receive failed: {}", e);
                None
            }
        }
    }
}

pub struct RxToken<'a> {
    frame: &'a mut [u8],
}

impl phy::RxToken for RxToken<'_> {
    fn consume<R, F>(self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(self.frame)
    }
}

/// Builds the frame in the adapter's TX buffer, then hands it to the NIC.
pub struct TxToken<'a, D: NetworkDriver> {
    driver: &'a mut D,
    frame: &'a mut [u8; FRAME_BUFFER],
    stats: &'a mut NicStats,
}

impl<D: NetworkDriver> phy::TxToken for TxToken<'_, D> {
    fn consume<R, F>(mut self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let len = len.min(FRAME_BUFFER);
        let result = f(&mut self.frame[..len]);

        match self.driver.transmit(&self.frame[..len]) {
            Ok(()) => self.stats.tx_frames = self.stats.tx_frames.wrapping_add(1),
            Err(e) => {
                self.stats.tx_dropped = self.stats.tx_dropped.wrapping_add(1);
                log::debug!("[NIC] frame dropped: {}", e);
            }
        }
        result
    }
}

impl<D: NetworkDriver> Device for SmoltcpAdapter<D> {
    type RxToken<'a> = RxToken<'a> where Self: 'a;
    type TxToken<'a> = TxToken<'a, D> where Self: 'a;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        self.driver.collect_tx_completions();
        let len = self.next_frame()?;

        let Self {
            driver,
            rx_frame,
            tx_frame,
            stats,
        } = self;
        Some((
            RxToken {
                frame: &mut rx_frame[..len],
            },
            TxToken {
                driver,
                frame: tx_frame,
                stats,
            },
        ))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        self.driver.collect_tx_completions();
        if !self.driver.can_transmit() {
            return None;
        }

        let Self {
            driver,
            tx_frame,
            stats,
            ..
        } = self;
        Some(TxToken {
            driver,
            frame: tx_frame,
            stats,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ethernet;
        caps.max_transmission_unit = MTU;
        caps.max_burst_size = Some(MAX_BURST);
        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{LoopbackDriver, RxError, TxError};
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;
    use smoltcp::phy::{RxToken as _, TxToken as _};

    const MAC: MacAddress = [0x02, 0, 0, 0, 0, 9];

    fn now() -> Instant {
        Instant::from_millis(0)
    }

    /// NIC with a descriptor ring that must be refilled and reaped.
    #[derive(Default)]
    struct RingNic {
        rx: VecDeque<Vec<u8>>,
        refills: usize,
        reaped: usize,
        oversized: bool,
    }

    impl NetworkDriver for RingNic {
        fn mac_address(&self) -> MacAddress {
            MAC
        }

        fn can_transmit(&self) -> bool {
            true
        }

        fn can_receive(&self) -> bool {
            self.oversized || !self.rx.is_empty()
        }

        fn transmit(&mut self, frame: &[u8]) -> Result<(), TxError> {
            Err(TxError::FrameTooLarge {
                provided: frame.len(),
                max: 0,
            })
        }

        fn receive(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, RxError> {
            if self.oversized {
                self.oversized = false;
                return Err(RxError::BufferTooSmall { needed: 9000 });
            }
            let Some(frame) = self.rx.pop_front() else {
                return Ok(None);
            };
            buffer[..frame.len()].copy_from_slice(&frame);
            Ok(Some(frame.len()))
        }

        fn refill_rx_queue(&mut self) {
            self.refills += 1;
        }

        fn collect_tx_completions(&mut self) {
            self.reaped += 1;
        }

        fn link_up(&self) -> bool {
            true
        }
    }

    #[test]
    fn frames_pass_through_tokens() {
        let mut adapter = SmoltcpAdapter::new(LoopbackDriver::new(MAC));
        assert!(adapter.receive(now()).is_none());

        adapter
            .transmit(now())
            .unwrap()
            .consume(4, |buf| buf.copy_from_slice(b"ping"));
        assert_eq!(adapter.stats().tx_frames, 1);

        let frame = {
            let (rx, _tx) = adapter.receive(now()).unwrap();
            rx.consume(|buf| buf.to_vec())
        };
        assert_eq!(frame, b"ping");
        assert_eq!(adapter.stats().rx_frames, 1);
        assert!(adapter.receive(now()).is_none());
    }

    #[test]
    fn no_tx_token_without_link() {
        let mut adapter = SmoltcpAdapter::new(LoopbackDriver::new(MAC));
        adapter.driver().set_link(false);
        assert!(!adapter.link_up());
        assert!(adapter.transmit(now()).is_none());
        assert_eq!(adapter.mac_address(), MAC);
    }

    #[test]
    fn polling_keeps_the_rings_serviced() {
        let mut adapter = SmoltcpAdapter::new(RingNic::default());
        adapter.driver.rx.push_back(b"one".to_vec());
        adapter.driver.rx.push_back(b"two".to_vec());

        let mut frames = Vec::new();
        while let Some((rx, _tx)) = adapter.receive(now()) {
            frames.push(rx.consume(|buf| buf.to_vec()));
        }
        assert_eq!(frames, [b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(adapter.driver.refills, 2);
        assert_eq!(adapter.driver.reaped, 3);

        adapter.transmit(now()).unwrap().consume(3, |buf| buf.fill(0));
        assert_eq!(adapter.driver.reaped, 4);
        assert_eq!(adapter.stats().tx_dropped, 1);
        assert_eq!(adapter.stats().tx_frames, 0);
    }

    #[test]
    fn receive_errors_are_counted_and_refilled() {
        let mut adapter = SmoltcpAdapter::new(RingNic {
            oversized: true,
            ..RingNic::default()
        });
        assert!(adapter.receive(now()).is_none());
        assert_eq!(adapter.stats().rx_errors, 1);
        assert_eq!(adapter.driver.refills, 1);
        assert_eq!(adapter.stats().rx_frames, 0);
    }
}

//! Data transfer buffers.
//!
//! Accumulates delivered data at the positions its metadata names. The
//! storage strategy decides whether the buffer may grow.

use alloc::vec::Vec;

use crate::error::{Error, Status};
use crate::iobuf::IoBuffer;
use crate::xfer::{Metadata, XferFlags};

/// How an [`XferBuffer`] obtains space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Heap storage, grown as needed
    Growable,
    /// Preallocated storage that refuses to grow
    Fixed,
    /// No storage at all; only the length is tracked
    Void,
}

#[derive(Debug)]
pub struct XferBuffer {
    strategy: Strategy,
    data: Option<Vec<u8>>,
    len: usize,
    pos: usize,
}

impl XferBuffer {
    pub fn growable() -> Self {
        Self {
            strategy: Strategy::Growable,
            data: Some(Vec::new()),
            len: 0,
            pos: 0,
        }
    }

    /// Buffer of exactly `capacity` bytes.
    pub fn fixed(capacity: usize) -> Self {
        Self {
            strategy: Strategy::Fixed,
            data: Some(alloc::vec![0u8; capacity]),
            len: capacity,
            pos: 0,
        }
    }

    /// Buffer that counts bytes without keeping them.
    pub fn void() -> Self {
        Self {
            strategy: Strategy::Void,
            data: None,
            len: 0,
            pos: 0,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Current size.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position of the next relative delivery.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref().map(|d| &d[..self.len.min(d.len())])
    }

    fn ensure_size(&mut self, len: usize) -> Status {
        if len <= self.len {
            return Ok(());
        }
        match self.strategy {
            Strategy::Growable => {
                let data = self.data.get_or_insert_with(Vec::new);
                data.try_reserve(len - data.len()).map_err(|_| Error::NoSpace)?;
                data.resize(len, 0);
            }
            Strategy::Fixed => {
                log::debug!("[XFERBUF] {:p} cannot extend to {} bytes", self, len);
                return Err(Error::Range);
            }
            Strategy::Void => {}
        }
        self.len = len;
        Ok(())
    }

    /// Write `data` at `offset`, growing the buffer if allowed.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Status {
        let end = offset.checked_add(data.len()).ok_or(Error::Overflow)?;
        self.ensure_size(end)?;
        if data.is_empty() || self.strategy == Strategy::Void {
            return Ok(());
        }
        let storage = self.data.as_mut().ok_or(Error::NoStorage)?;
        storage[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Read `buf.len()` bytes starting at `offset`.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Status {
        if offset > self.len || buf.len() > self.len - offset {
            return Err(Error::NotFound);
        }
        if buf.is_empty() {
            return Ok(());
        }
        let storage = self.data.as_ref().ok_or(Error::NoStorage)?;
        buf.copy_from_slice(&storage[offset..offset + buf.len()]);
        Ok(())
    }

    /// Store a delivered buffer at the position its metadata describes.
    pub fn deliver(&mut self, iobuf: IoBuffer, meta: &Metadata) -> Status {
        let base = if meta.flags.contains(XferFlags::ABS_OFFSET) {
            0
        } else {
            self.pos as i64
        };
        let pos = base
            .checked_add(meta.offset)
            .and_then(|p| usize::try_from(p).ok())
            .ok_or(Error::Overflow)?;

        self.write(pos, iobuf.data())?;
        self.pos = pos + iobuf.len();
        Ok(())
    }

    /// Hand over the contents, leaving the buffer empty.
    pub fn detach(&mut self) -> Option<Vec<u8>> {
        let len = self.len;
        self.len = 0;
        self.pos = 0;
        let mut data = match self.strategy {
            Strategy::Void => None,
            _ => self.data.replace(Vec::new()),
        }?;
        data.truncate(len);
        Some(data)
    }

    /// Release the storage.
    pub fn free(&mut self) {
        self.data = match self.strategy {
            Strategy::Void => None,
            _ => Some(Vec::new()),
        };
        self.len = 0;
        self.pos = 0;
    }
}

impl Default for XferBuffer {
    fn default() -> Self {
        Self::growable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growable_follows_offsets() {
        let mut buf = XferBuffer::growable();
        buf.deliver(IoBuffer::from_slice(b"hello"), &Metadata::default()).unwrap();
        buf.deliver(IoBuffer::from_slice(b" world"), &Metadata::default()).unwrap();
        assert_eq!(buf.data(), Some(&b"hello world"[..]));

        // Rewrite the start, then continue after it.
        buf.deliver(IoBuffer::from_slice(b"J"), &Metadata::absolute(0)).unwrap();
        assert_eq!(buf.pos(), 1);
        buf.deliver(IoBuffer::from_slice(b"E"), &Metadata::default()).unwrap();
        assert_eq!(buf.data(), Some(&b"JEllo world"[..]));
        assert_eq!(buf.len(), 11);
    }

    #[test]
    fn write_past_end_zero_fills() {
        let mut buf = XferBuffer::growable();
        buf.write(4, b"ab").unwrap();
        assert_eq!(buf.data(), Some(&[0, 0, 0, 0, b'a', b'b'][..]));
    }

    #[test]
    fn fixed_refuses_to_grow() {
        let mut buf = XferBuffer::fixed(4);
        buf.write(0, b"abcd").unwrap();
        assert_eq!(buf.write(2, b"xyz"), Err(Error::Range));
        assert_eq!(buf.data(), Some(&b"abcd"[..]));
    }

    #[test]
    fn void_tracks_length_only() {
        let mut buf = XferBuffer::void();
        buf.deliver(IoBuffer::from_slice(&[7; 100]), &Metadata::default()).unwrap();
        buf.deliver(IoBuffer::from_slice(&[7; 28]), &Metadata::default()).unwrap();
        assert_eq!(buf.len(), 128);
        assert_eq!(buf.data(), None);
        let mut out = [0u8; 4];
        assert_eq!(buf.read(0, &mut out), Err(Error::NoStorage));
        assert_eq!(buf.detach(), None);
    }

    #[test]
    fn read_checks_range() {
        let mut buf = XferBuffer::growable();
        buf.write(0, b"0123456789").unwrap();
        let mut out = [0u8; 3];
        buf.read(7, &mut out).unwrap();
        assert_eq!(&out, b"789");
        assert_eq!(buf.read(8, &mut out), Err(Error::NotFound));
        assert_eq!(buf.read(11, &mut []), Err(Error::NotFound));
    }

    #[test]
    fn overflowing_offsets_are_rejected() {
        let mut buf = XferBuffer::growable();
        assert_eq!(buf.write(usize::MAX, b"x"), Err(Error::Overflow));
        let meta = Metadata::absolute(-1);
        assert_eq!(buf.deliver(IoBuffer::from_slice(b"x"), &meta), Err(Error::Overflow));
    }

    #[test]
    fn detach_hands_over_contents() {
        let mut buf = XferBuffer::growable();
        buf.write(0, b"image").unwrap();
        assert_eq!(buf.detach(), Some(b"image".to_vec()));
        assert!(buf.is_empty());
        buf.write(0, b"again").unwrap();
        buf.free();
        assert!(buf.is_empty());
        assert_eq!(buf.data(), Some(&b""[..]));
    }
}

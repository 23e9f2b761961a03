//! I/O buffers.
//!
//! ```text
//!  0        head          tail        capacity
//!  |headroom|    data      | tailroom  |
//! ```
//!
//! Lower layers reserve headroom so headers can be pushed in front of the
//! payload without copying. Ownership of an [`IoBuffer`] moves with every
//! `deliver` call.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

pub struct IoBuffer {
    buf: Vec<u8>,
    head: usize,
    tail: usize,
}

impl IoBuffer {
    /// Empty buffer with room for `len` bytes of payload.
    pub fn alloc(len: usize) -> Self {
        Self {
            buf: vec![0u8; len],
            head: 0,
            tail: 0,
        }
    }

    /// Empty buffer with `headroom` bytes reserved in front of `len` bytes
    /// of payload space.
    pub fn with_headroom(headroom: usize, len: usize) -> Self {
        let mut iobuf = Self::alloc(headroom + len);
        iobuf.reserve(headroom);
        iobuf
    }

    /// Buffer holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            buf: data.to_vec(),
            head: 0,
            tail: data.len(),
        }
    }

    /// Move the (empty) data region `len` bytes towards the tail.
    pub fn reserve(&mut self, len: usize) {
        assert!(self.is_empty(), "reserve on non-empty buffer");
        assert!(len <= self.tailroom(), "reserve beyond capacity");
        self.head += len;
        self.tail += len;
    }

    /// Extend the data region at the tail, returning the new bytes.
    pub fn put(&mut self, len: usize) -> &mut [u8] {
        assert!(len <= self.tailroom(), "put beyond tailroom");
        let start = self.tail;
        self.tail += len;
        &mut self.buf[start..self.tail]
    }

    /// Append `data` at the tail.
    pub fn put_slice(&mut self, data: &[u8]) {
        self.put(data.len()).copy_from_slice(data);
    }

    /// Trim `len` bytes from the tail.
    pub fn unput(&mut self, len: usize) {
        assert!(len <= self.len(), "unput beyond data");
        self.tail -= len;
    }

    /// Extend the data region into the headroom, returning the new bytes.
    pub fn push(&mut self, len: usize) -> &mut [u8] {
        assert!(len <= self.headroom(), "push beyond headroom");
        self.head -= len;
        &mut self.buf[self.head..self.head + len]
    }

    /// Consume `len` bytes from the front, returning them.
    pub fn pull(&mut self, len: usize) -> &[u8] {
        assert!(len <= self.len(), "pull beyond data");
        let start = self.head;
        self.head += len;
        &self.buf[start..self.head]
    }

    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.tail == self.head
    }

    pub fn headroom(&self) -> usize {
        self.head
    }

    pub fn tailroom(&self) -> usize {
        self.buf.len() - self.tail
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.head..self.tail]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.head..self.tail]
    }

    /// Payload as an owned vector.
    pub fn into_vec(mut self) -> Vec<u8> {
        let len = self.len();
        self.buf.copy_within(self.head..self.tail, 0);
        self.buf.truncate(len);
        self.buf
    }
}

impl fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBuffer")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    memory::buffer_pool::Lease,
};
use ::std::{
    fmt,
    ops::{
        Deref,
        DerefMut,
    },
    rc::Rc,
};

//==============================================================================
// Structures
//==============================================================================

/// Network Buffer
///
/// Contiguous storage with a movable window `[head, tail)`. Bytes before `head` are headroom for prepending headers
/// with [NetBuffer::push]; bytes after `tail` are tailroom for appending payload with [NetBuffer::put].
#[derive(Clone)]
pub struct NetBuffer {
    /// Underlying storage.
    data: Vec<u8>,
    /// Offset of the first valid byte.
    head: usize,
    /// Offset one past the last valid byte.
    tail: usize,
    /// Pool accounting, returned when the last clone is dropped.
    lease: Option<Rc<Lease>>,
}

//==============================================================================
// Associated Functions
//==============================================================================

/// Associated Functions for Network Buffers
impl NetBuffer {
    /// Creates an empty buffer with the given capacity. All of it is tailroom.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            head: 0,
            tail: 0,
            lease: None,
        }
    }

    /// Creates a buffer holding a copy of `src`.
    pub fn from_slice(src: &[u8]) -> Self {
        Self {
            data: src.to_vec(),
            head: 0,
            tail: src.len(),
            lease: None,
        }
    }

    /// Creates an empty buffer.
    pub fn empty() -> Self {
        Self::new(0)
    }

    pub(super) fn with_lease(capacity: usize, lease: Rc<Lease>) -> Self {
        let mut buf: Self = Self::new(capacity);
        buf.lease = Some(lease);
        buf
    }

    /// Total storage size of the target buffer.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes that may still be prepended.
    pub fn headroom(&self) -> usize {
        self.head
    }

    /// Number of bytes that may still be appended.
    pub fn tailroom(&self) -> usize {
        self.data.len() - self.tail
    }

    /// Reserves `nbytes` of headroom in an empty buffer.
    pub fn reserve(&mut self, nbytes: usize) -> Result<(), Fail> {
        if self.head != self.tail {
            let cause: String = format!("cannot reserve headroom in a non-empty buffer (len={})", self.len());
            error!("reserve(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if nbytes > self.data.len() {
            let cause: String = format!("headroom too large (nbytes={}, capacity={})", nbytes, self.data.len());
            error!("reserve(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        self.head = nbytes;
        self.tail = nbytes;
        Ok(())
    }

    /// Appends `src` at the end of the target buffer.
    pub fn put(&mut self, src: &[u8]) -> Result<(), Fail> {
        if src.len() > self.tailroom() {
            let cause: String = format!("not enough tailroom (nbytes={}, tailroom={})", src.len(), self.tailroom());
            error!("put(): {}", cause);
            return Err(Fail::new(libc::ENOBUFS, &cause));
        }
        self.data[self.tail..(self.tail + src.len())].copy_from_slice(src);
        self.tail += src.len();
        Ok(())
    }

    /// Prepends `src` at the front of the target buffer.
    pub fn push(&mut self, src: &[u8]) -> Result<(), Fail> {
        if src.len() > self.head {
            let cause: String = format!("not enough headroom (nbytes={}, headroom={})", src.len(), self.head);
            error!("push(): {}", cause);
            return Err(Fail::new(libc::ENOBUFS, &cause));
        }
        self.head -= src.len();
        self.data[self.head..(self.head + src.len())].copy_from_slice(src);
        Ok(())
    }

    /// Removes `nbytes` from the front of the target buffer.
    pub fn pull(&mut self, nbytes: usize) -> Result<(), Fail> {
        if nbytes > self.len() {
            let cause: String = format!("pulling past end of buffer (nbytes={}, len={})", nbytes, self.len());
            error!("pull(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        self.head += nbytes;
        Ok(())
    }

    /// Removes `nbytes` from the end of the target buffer.
    pub fn trim(&mut self, nbytes: usize) -> Result<(), Fail> {
        if nbytes > self.len() {
            let cause: String = format!("trimming past beginning of buffer (nbytes={}, len={})", nbytes, self.len());
            error!("trim(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        self.tail -= nbytes;
        Ok(())
    }

    /// Splits off the first `nbytes` into a new buffer and removes them from the target buffer.
    pub fn split_front(&mut self, nbytes: usize) -> Result<NetBuffer, Fail> {
        if nbytes > self.len() {
            let cause: String = format!("splitting past end of buffer (nbytes={}, len={})", nbytes, self.len());
            error!("split_front(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        let front: NetBuffer = NetBuffer::from_slice(&self[..nbytes]);
        self.head += nbytes;
        Ok(front)
    }
}

//==============================================================================
// Standard-Library Trait Implementations
//==============================================================================

impl Deref for NetBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data[self.head..self.tail]
    }
}

impl DerefMut for NetBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.head..self.tail]
    }
}

impl fmt::Debug for NetBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBuffer")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}

impl From<&[u8]> for NetBuffer {
    fn from(src: &[u8]) -> Self {
        Self::from_slice(src)
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

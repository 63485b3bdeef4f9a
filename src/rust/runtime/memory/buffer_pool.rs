// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    memory::NetBuffer,
};
use ::std::{
    cell::Cell,
    rc::Rc,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Default byte budget of a [HeapBufferPool].
pub const DEFAULT_POOL_BUDGET: usize = 4 * 1024 * 1024;

//======================================================================================================================
// Traits
//======================================================================================================================

/// Buffer Pool
///
/// Source of every buffer the TCP engine allocates, both for queued user data and for outgoing segments.
pub trait BufferPool {
    /// Allocates an empty buffer with room for `size` bytes.
    fn alloc(&self, size: usize) -> Result<NetBuffer, Fail>;

    /// Returns a buffer to the pool.
    fn free(&self, buf: NetBuffer) {
        drop(buf);
    }
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Heap-backed pool that caps the number of bytes outstanding at any time.
#[derive(Clone)]
pub struct HeapBufferPool {
    state: Rc<PoolState>,
}

pub(super) struct PoolState {
    budget: usize,
    in_use: Cell<usize>,
}

/// Bytes charged to a pool by one allocation. Dropping the lease gives them back.
pub struct Lease {
    pool: Rc<PoolState>,
    size: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl HeapBufferPool {
    pub fn new(budget: usize) -> Self {
        Self {
            state: Rc::new(PoolState {
                budget,
                in_use: Cell::new(0),
            }),
        }
    }

    /// Number of bytes currently allocated from the target pool.
    pub fn in_use(&self) -> usize {
        self.state.in_use.get()
    }

    /// Number of bytes that may still be allocated from the target pool.
    pub fn available(&self) -> usize {
        self.state.budget - self.state.in_use.get()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl BufferPool for HeapBufferPool {
    fn alloc(&self, size: usize) -> Result<NetBuffer, Fail> {
        if size > self.available() {
            let cause: String = format!("buffer pool exhausted (size={}, available={})", size, self.available());
            warn!("alloc(): {}", cause);
            return Err(Fail::new(libc::ENOBUFS, &cause));
        }
        self.state.in_use.set(self.state.in_use.get() + size);
        let lease: Rc<Lease> = Rc::new(Lease {
            pool: self.state.clone(),
            size,
        });
        Ok(NetBuffer::with_lease(size, lease))
    }
}

impl Default for HeapBufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_BUDGET)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.pool.in_use.set(self.pool.in_use.get() - self.size);
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

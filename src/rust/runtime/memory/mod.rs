// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod buffer;
mod buffer_pool;

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    buffer::NetBuffer,
    buffer_pool::{
        BufferPool,
        HeapBufferPool,
        DEFAULT_POOL_BUDGET,
    },
};

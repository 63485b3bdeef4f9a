// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod connection;
mod isn_generator;
mod operations;
pub mod peer;
pub mod segment;
mod sequence_number;
mod stats;
pub mod table;

#[cfg(test)]
mod tests;

pub use self::{
    connection::{
        ConnectionInfo,
        State,
    },
    operations::{
        AcceptFuture,
        ConnectFuture,
        PopFuture,
        PushFuture,
    },
    peer::TcpPeer,
    segment::{
        MAX_TCP_HEADER_SIZE,
        MIN_TCP_HEADER_SIZE,
    },
    sequence_number::SeqNumber,
    stats::{
        ConnectionStats,
        TcpStats,
    },
};

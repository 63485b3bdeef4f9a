// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod config;
pub mod consts;
pub mod ephemeral;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    memory::NetBuffer,
};
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Structures
//======================================================================================================================

/// IP protocol numbers the transport layer hands down to the IP layer.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IpProtocol {
    ICMPv4 = 0x01,
    TCP = 0x06,
    UDP = 0x11,
}

//======================================================================================================================
// Traits
//======================================================================================================================

/// Network Runtime
///
/// Boundary towards the IP layer. Transmission is best effort: a successful return only means that the packet was
/// queued, and lost packets are recovered by retransmission.
pub trait NetworkRuntime: Clone {
    /// Hands `payload` to the IP layer for delivery from `src` to `dst`.
    fn transmit(&self, src: Ipv4Addr, dst: Ipv4Addr, protocol: IpProtocol, payload: NetBuffer) -> Result<(), Fail>;
}

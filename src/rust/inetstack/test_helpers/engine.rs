// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::runtime::{
    Packet,
    TestRuntime,
};
use crate::{
    inetstack::protocols::tcp::{
        peer::TcpPeer,
        segment::TcpHeader,
    },
    runtime::fail::Fail,
};
use ::std::time::Instant;

//======================================================================================================================
// Structures
//======================================================================================================================

/// One host under test: the TCP engine and the runtime that captures what it sends.
pub struct Engine {
    pub rt: TestRuntime,
    pub tcp: TcpPeer<TestRuntime>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Engine {
    pub fn new(rt: TestRuntime, now: Instant) -> Self {
        let rng_seed: [u8; 32] = [0; 32];
        let tcp: TcpPeer<TestRuntime> = TcpPeer::new(rt.clone(), rt.ipv4_addr, rt.tcp_config.clone(), now, rng_seed);
        Self { rt, tcp }
    }

    /// Feeds a segment captured on another host to the target one.
    pub fn receive(&self, packet: &Packet) -> Result<(), Fail> {
        self.tcp.receive(packet.src_addr, packet.dst_addr, &packet.buf[..])
    }

    pub fn advance_clock(&self, now: Instant) {
        self.tcp.advance_clock(now)
    }
}

impl Packet {
    pub fn header(&self) -> TcpHeader {
        match TcpHeader::parse(&self.buf[..]) {
            Ok((header, _)) => header,
            Err(e) => panic!("captured an undecodable segment: {:?}", e),
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        match TcpHeader::parse(&self.buf[..]) {
            Ok((_, payload)) => payload.to_vec(),
            Err(e) => panic!("captured an undecodable segment: {:?}", e),
        }
    }
}

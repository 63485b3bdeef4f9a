// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod engine;
pub mod runtime;

pub use self::{
    engine::Engine,
    runtime::{
        Packet,
        TestRuntime,
    },
};

use crate::runtime::network::config::TcpConfig;
use ::std::{
    net::Ipv4Addr,
    time::Instant,
};

//==============================================================================
// Constants
//==============================================================================

pub const ALICE_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const BOB_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

//==============================================================================
// Standalone Functions
//==============================================================================

pub fn new_alice(now: Instant) -> Engine {
    new_alice_with(now, TcpConfig::default())
}

pub fn new_alice_with(now: Instant, tcp_config: TcpConfig) -> Engine {
    Engine::new(TestRuntime::new(ALICE_IPV4, tcp_config), now)
}

pub fn new_bob(now: Instant) -> Engine {
    new_bob_with(now, TcpConfig::default())
}

pub fn new_bob_with(now: Instant, tcp_config: TcpConfig) -> Engine {
    Engine::new(TestRuntime::new(BOB_IPV4, tcp_config), now)
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::inetstack::protocols::tcp::SeqNumber;
use ::crc::{
    Crc,
    CRC_32_CKSUM,
};
use ::std::{
    net::SocketAddrV4,
    num::Wrapping,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Amount by which the counter component moves between two consecutive initial sequence numbers.
const ISN_STEP: u32 = 64_000;

static ISN_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_CKSUM);

//======================================================================================================================
// Structures
//======================================================================================================================

/// Initial sequence number generator in the spirit of RFC 6528: a keyed hash of the connection 4-tuple plus a
/// monotonic counter, so that numbers are hard to guess from outside and never repeat quickly for the same 4-tuple.
pub struct IsnGenerator {
    nonce: u32,
    counter: Wrapping<u32>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl IsnGenerator {
    pub fn new(nonce: u32) -> Self {
        Self {
            nonce,
            counter: Wrapping(0),
        }
    }

    pub fn generate(&mut self, local: &SocketAddrV4, remote: &SocketAddrV4) -> SeqNumber {
        let mut digest = ISN_CRC.digest();
        digest.update(&local.ip().octets());
        digest.update(&local.port().to_be_bytes());
        digest.update(&remote.ip().octets());
        digest.update(&remote.port().to_be_bytes());
        digest.update(&self.nonce.to_be_bytes());
        let isn: Wrapping<u32> = Wrapping(digest.finalize()) + self.counter;
        self.counter += Wrapping(ISN_STEP);
        SeqNumber::from(isn.0)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        IsnGenerator,
        ISN_STEP,
    };
    use crate::inetstack::protocols::tcp::SeqNumber;
    use ::anyhow::Result;
    use ::std::net::{
        Ipv4Addr,
        SocketAddrV4,
    };

    #[test]
    fn same_tuple_advances_by_step() -> Result<()> {
        let local: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 80);
        let remote: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 40000);
        let mut generator: IsnGenerator = IsnGenerator::new(0xcafe);
        let first: SeqNumber = generator.generate(&local, &remote);
        let second: SeqNumber = generator.generate(&local, &remote);
        crate::ensure_eq!(second - first, ISN_STEP);
        Ok(())
    }

    #[test]
    fn tuple_and_nonce_change_the_isn() -> Result<()> {
        let local: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 80);
        let remote_a: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 40000);
        let remote_b: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 40001);
        let a: SeqNumber = IsnGenerator::new(1).generate(&local, &remote_a);
        let b: SeqNumber = IsnGenerator::new(1).generate(&local, &remote_b);
        let c: SeqNumber = IsnGenerator::new(2).generate(&local, &remote_a);
        crate::ensure_neq!(a, b);
        crate::ensure_neq!(a, c);
        Ok(())
    }
}

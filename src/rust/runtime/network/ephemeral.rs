// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
#[cfg(not(debug_assertions))]
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// First ephemeral port.
pub const FIRST_EPHEMERAL_PORT: u16 = 32768;
/// Last ephemeral port.
pub const LAST_EPHEMERAL_PORT: u16 = 65535;
/// Number of ports in the ephemeral range.
const EPHEMERAL_RANGE_LEN: usize = (LAST_EPHEMERAL_PORT - FIRST_EPHEMERAL_PORT) as usize + 1;
/// Seed number for the starting point of the ephemeral port cursor.
#[cfg(not(debug_assertions))]
const EPHEMERAL_PORT_SEED: u64 = 12345;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Port allocator. Tracks every bound port in a bitmap and hands out ephemeral ports from a rotating cursor.
pub struct EphemeralPorts {
    /// One bit per port number.
    bound: Vec<u64>,
    /// Next ephemeral port to try.
    cursor: u16,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl EphemeralPorts {
    /// Asserts whether a port is in the ephemeral port range.
    pub fn is_ephemeral(port: u16) -> bool {
        port >= FIRST_EPHEMERAL_PORT
    }

    /// Checks if `port` is currently bound.
    pub fn is_bound(&self, port: u16) -> bool {
        self.bound[(port / 64) as usize] & (1 << (port % 64)) != 0
    }

    /// Allocates the next free ephemeral port. Returns 0 if every port in the range is bound.
    pub fn allocate_port(&mut self) -> u16 {
        for _ in 0..EPHEMERAL_RANGE_LEN {
            let port: u16 = self.cursor;
            self.cursor = if self.cursor == LAST_EPHEMERAL_PORT {
                FIRST_EPHEMERAL_PORT
            } else {
                self.cursor + 1
            };
            if !self.is_bound(port) {
                self.set(port, true);
                trace!("allocate_port(): port={:?}", port);
                return port;
            }
        }
        warn!("allocate_port(): all port numbers in the ephemeral port range are currently in use");
        0
    }

    /// Binds a specific port.
    pub fn bind_port(&mut self, port: u16) -> Result<(), Fail> {
        if port == 0 {
            let cause: &str = "cannot bind port zero";
            error!("bind_port(): {}", cause);
            return Err(Fail::new(libc::EINVAL, cause));
        }
        if self.is_bound(port) {
            let cause: String = format!("port {} is already in use", port);
            error!("bind_port(): {}", cause);
            return Err(Fail::new(libc::EADDRINUSE, &cause));
        }
        self.set(port, true);
        Ok(())
    }

    /// Releases a port. Releasing a port that is not bound is a no-op.
    pub fn release_port(&mut self, port: u16) {
        if port != 0 {
            self.set(port, false);
        }
    }

    fn set(&mut self, port: u16, bound: bool) {
        let word: &mut u64 = &mut self.bound[(port / 64) as usize];
        if bound {
            *word |= 1 << (port % 64);
        } else {
            *word &= !(1 << (port % 64));
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for EphemeralPorts {
    /// Creates a new port allocator with no bound ports.
    fn default() -> Self {
        #[cfg(debug_assertions)]
        let cursor: u16 = FIRST_EPHEMERAL_PORT;
        #[cfg(not(debug_assertions))]
        let cursor: u16 = {
            let mut rng: SmallRng = SmallRng::seed_from_u64(EPHEMERAL_PORT_SEED);
            rng.gen_range(FIRST_EPHEMERAL_PORT..=LAST_EPHEMERAL_PORT)
        };
        Self {
            bound: vec![0; (u16::MAX as usize + 1) / 64],
            cursor,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod test {
    use super::{
        EphemeralPorts,
        FIRST_EPHEMERAL_PORT,
        LAST_EPHEMERAL_PORT,
    };
    use ::anyhow::Result;

    /// Attempts to allocate any ephemeral port and then release it.
    #[test]
    fn test_alloc_any_and_free() -> Result<()> {
        let mut ports: EphemeralPorts = EphemeralPorts::default();

        let port: u16 = ports.allocate_port();
        if !EphemeralPorts::is_ephemeral(port) {
            anyhow::bail!("allocated port should be in the ephemeral range (port={:?})", port);
        }
        crate::ensure_eq!(ports.is_bound(port), true);

        ports.release_port(port);
        crate::ensure_eq!(ports.is_bound(port), false);

        Ok(())
    }

    /// Consecutive allocations move forward through the range.
    #[test]
    fn test_cursor_rotates() -> Result<()> {
        let mut ports: EphemeralPorts = EphemeralPorts::default();
        let first: u16 = ports.allocate_port();
        ports.release_port(first);
        let second: u16 = ports.allocate_port();
        crate::ensure_neq!(first, second);
        Ok(())
    }

    /// Allocation skips ports that were bound explicitly.
    #[test]
    fn test_alloc_skips_bound_ports() -> Result<()> {
        let mut ports: EphemeralPorts = EphemeralPorts::default();
        for port in FIRST_EPHEMERAL_PORT..=LAST_EPHEMERAL_PORT {
            if port != 40000 {
                ports.bind_port(port)?;
            }
        }
        crate::ensure_eq!(ports.allocate_port(), 40000);
        Ok(())
    }

    /// Once every ephemeral port is bound, allocation reports the failure sentinel instead of looping.
    #[test]
    fn test_exhaustion_returns_zero() -> Result<()> {
        let mut ports: EphemeralPorts = EphemeralPorts::default();

        for _ in FIRST_EPHEMERAL_PORT..=LAST_EPHEMERAL_PORT {
            if ports.allocate_port() == 0 {
                anyhow::bail!("failed to allocate an ephemeral port before the range was exhausted");
            }
        }

        crate::ensure_eq!(ports.allocate_port(), 0);

        // Freeing one port makes exactly that port available again.
        ports.release_port(50000);
        crate::ensure_eq!(ports.allocate_port(), 50000);
        crate::ensure_eq!(ports.allocate_port(), 0);

        Ok(())
    }

    /// Binding a port that is already in use is rejected.
    #[test]
    fn test_bind_in_use_port() -> Result<()> {
        let mut ports: EphemeralPorts = EphemeralPorts::default();
        ports.bind_port(80)?;
        match ports.bind_port(80) {
            Ok(()) => anyhow::bail!("binding a port twice should fail"),
            Err(e) => crate::ensure_eq!(e.errno, libc::EADDRINUSE),
        }
        ports.release_port(80);
        ports.bind_port(80)?;
        Ok(())
    }

    /// Port zero is not a valid port to bind.
    #[test]
    fn test_bind_port_zero() -> Result<()> {
        let mut ports: EphemeralPorts = EphemeralPorts::default();
        match ports.bind_port(0) {
            Ok(()) => anyhow::bail!("binding port zero should fail"),
            Err(e) => crate::ensure_eq!(e.errno, libc::EINVAL),
        }
        Ok(())
    }
}

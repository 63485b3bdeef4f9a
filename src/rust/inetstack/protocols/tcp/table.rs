// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::protocols::tcp::connection::{
        ControlBlock,
        State,
    },
    runtime::{
        fail::Fail,
        network::{
            config::TcpConfig,
            ephemeral::EphemeralPorts,
        },
    },
};
use ::libc::{
    EBADF,
    ENOBUFS,
};
use ::std::{
    fmt,
    net::SocketAddrV4,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Number of connection records in a table.
pub const MAX_TCP_CONNECTIONS: usize = 64;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Handle to a connection record. The generation makes handles to released records stale, so that they cannot reach
/// whatever record takes the slot next.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ConnectionHandle {
    index: usize,
    generation: u32,
}

struct Slot {
    generation: u32,
    // A freshly allocated record is indistinguishable from a free one (CLOSED, no local port), hence the flag.
    in_use: bool,
    cb: ControlBlock,
}

/// Fixed-capacity pool of connection records plus the port allocator. The table never grows.
pub struct ConnectionTable<const N: usize = MAX_TCP_CONNECTIONS> {
    config: TcpConfig,
    slots: Box<[Slot]>,
    ports: EphemeralPorts,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ConnectionHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<const N: usize> ConnectionTable<N> {
    pub fn new(config: TcpConfig) -> Self {
        let slots: Box<[Slot]> = (0..N)
            .map(|_| Slot {
                generation: 0,
                in_use: false,
                cb: ControlBlock::new(&config),
            })
            .collect();
        Self {
            config,
            slots,
            ports: EphemeralPorts::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Number of records in use.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes a free record: CLOSED with no local port. The record comes back initialized from the table's
    /// configuration.
    pub fn allocate(&mut self) -> Result<ConnectionHandle, Fail> {
        let index: usize = match self
            .slots
            .iter()
            .position(|slot| !slot.in_use && slot.cb.get_state() == State::Closed && slot.cb.get_local().port() == 0)
        {
            Some(index) => index,
            None => {
                let cause: String = format!("no free connection record (capacity={})", N);
                error!("allocate(): {}", cause);
                return Err(Fail::new(ENOBUFS, &cause));
            },
        };

        let slot: &mut Slot = &mut self.slots[index];
        slot.in_use = true;
        slot.cb = ControlBlock::new(&self.config);
        let handle: ConnectionHandle = ConnectionHandle {
            index,
            generation: slot.generation,
        };
        trace!("allocate(): {}", handle);
        Ok(handle)
    }

    /// Returns a record to the pool, along with its port. Releasing a stale handle is a no-op that returns false.
    pub fn release(&mut self, handle: ConnectionHandle) -> bool {
        let slot: &mut Slot = match self.slots.get_mut(handle.index) {
            Some(slot) if slot.in_use && slot.generation == handle.generation => slot,
            _ => {
                trace!("release(): stale handle {}", handle);
                return false;
            },
        };

        if slot.cb.is_port_bound() {
            self.ports.release_port(slot.cb.get_local().port());
        }
        // Nobody may wait on a record that is gone.
        slot.cb.wake_all();
        slot.cb = ControlBlock::new(&self.config);
        slot.in_use = false;
        slot.generation = slot.generation.wrapping_add(1);
        trace!("release(): {}", handle);
        true
    }

    pub fn get(&self, handle: ConnectionHandle) -> Result<&ControlBlock, Fail> {
        match self.slots.get(handle.index) {
            Some(slot) if slot.in_use && slot.generation == handle.generation => Ok(&slot.cb),
            _ => Err(Self::bad_handle(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: ConnectionHandle) -> Result<&mut ControlBlock, Fail> {
        match self.slots.get_mut(handle.index) {
            Some(slot) if slot.in_use && slot.generation == handle.generation => Ok(&mut slot.cb),
            _ => Err(Self::bad_handle(handle)),
        }
    }

    /// Exact 4-tuple match among connected and half-open records.
    pub fn find(&self, local: SocketAddrV4, remote: SocketAddrV4) -> Option<ConnectionHandle> {
        self.find_by(|cb| {
            !matches!(cb.get_state(), State::Closed | State::Listen)
                && cb.get_local() == local
                && cb.get_remote() == remote
        })
    }

    /// Listener on `port`, whatever the remote end.
    pub fn find_listener(&self, port: u16) -> Option<ConnectionHandle> {
        self.find_by(|cb| cb.get_state() == State::Listen && cb.get_local().port() == port)
    }

    /// Children of `parent` still completing the handshake.
    pub fn count_half_open(&self, parent: ConnectionHandle) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                slot.in_use && slot.cb.get_parent() == Some(parent) && slot.cb.get_state() == State::SynRcvd
            })
            .count()
    }

    /// Handles of every record in use.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.in_use)
            .map(|(index, slot)| ConnectionHandle {
                index,
                generation: slot.generation,
            })
            .collect()
    }

    /// Allocates an ephemeral port. Returns 0 if the whole range is in use.
    pub fn allocate_port(&mut self) -> u16 {
        self.ports.allocate_port()
    }

    pub fn bind_port(&mut self, port: u16) -> Result<(), Fail> {
        self.ports.bind_port(port)
    }

    pub fn release_port(&mut self, port: u16) {
        self.ports.release_port(port)
    }

    fn find_by(&self, predicate: impl Fn(&ControlBlock) -> bool) -> Option<ConnectionHandle> {
        self.slots
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.in_use && predicate(&slot.cb))
            .map(|(index, slot)| ConnectionHandle {
                index,
                generation: slot.generation,
            })
    }

    fn bad_handle(handle: ConnectionHandle) -> Fail {
        let cause: String = format!("invalid connection handle {}", handle);
        debug!("get(): {}", cause);
        Fail::new(EBADF, &cause)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

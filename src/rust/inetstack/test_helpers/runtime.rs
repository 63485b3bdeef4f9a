// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::runtime::{
    fail::Fail,
    logging,
    memory::{
        BufferPool,
        HeapBufferPool,
        NetBuffer,
    },
    network::{
        config::TcpConfig,
        IpProtocol,
        NetworkRuntime,
    },
};
use ::std::{
    cell::RefCell,
    collections::VecDeque,
    net::Ipv4Addr,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A segment handed to the IP layer.
#[derive(Clone, Debug)]
pub struct Packet {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub buf: NetBuffer,
}

struct Inner {
    outgoing: VecDeque<Packet>,
}

/// Network seam that captures outgoing segments instead of sending them.
#[derive(Clone)]
pub struct TestRuntime {
    pub ipv4_addr: Ipv4Addr,
    pub tcp_config: TcpConfig,
    pool: HeapBufferPool,
    inner: Rc<RefCell<Inner>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TestRuntime {
    pub fn new(ipv4_addr: Ipv4Addr, tcp_config: TcpConfig) -> Self {
        logging::initialize();
        Self {
            ipv4_addr,
            tcp_config,
            pool: HeapBufferPool::default(),
            inner: Rc::new(RefCell::new(Inner {
                outgoing: VecDeque::new(),
            })),
        }
    }

    pub fn pop_segment(&self) -> Option<Packet> {
        self.inner.borrow_mut().outgoing.pop_front()
    }

    /// Drops every captured segment. Returns how many there were.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        let count: usize = inner.outgoing.len();
        inner.outgoing.clear();
        count
    }

    pub fn num_outgoing(&self) -> usize {
        self.inner.borrow().outgoing.len()
    }

    pub fn pool(&self) -> &HeapBufferPool {
        &self.pool
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl NetworkRuntime for TestRuntime {
    fn transmit(&self, src_addr: Ipv4Addr, dst_addr: Ipv4Addr, protocol: IpProtocol, buf: NetBuffer) -> Result<(), Fail> {
        assert_eq!(protocol, IpProtocol::TCP);
        self.inner.borrow_mut().outgoing.push_back(Packet {
            src_addr,
            dst_addr,
            buf,
        });
        Ok(())
    }
}

impl BufferPool for TestRuntime {
    fn alloc(&self, size: usize) -> Result<NetBuffer, Fail> {
        self.pool.alloc(size)
    }
}

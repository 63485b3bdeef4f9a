// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::{
    connection::{
        ConnectionInfo,
        ControlBlock,
        State,
    },
    isn_generator::IsnGenerator,
    operations::{
        AcceptFuture,
        ConnectFuture,
        PopFuture,
        PushFuture,
    },
    segment::{
        verify_checksum,
        TcpHeader,
        TcpSegment,
    },
    stats::{
        ConnectionStats,
        TcpStats,
    },
    table::{
        ConnectionHandle,
        ConnectionTable,
    },
    SeqNumber,
};
use crate::runtime::{
    fail::Fail,
    memory::{
        BufferPool,
        NetBuffer,
    },
    network::{
        config::TcpConfig,
        IpProtocol,
        NetworkRuntime,
    },
};
use ::libc::{
    EADDRINUSE,
    EADDRNOTAVAIL,
    EAGAIN,
    EALREADY,
    EBADMSG,
    EINVAL,
};
use ::rand::{
    prelude::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::{
    cell::{
        Ref,
        RefCell,
        RefMut,
    },
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    rc::Rc,
    task::{
        Context,
        Poll,
    },
    time::Instant,
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct Inner<R: NetworkRuntime + BufferPool> {
    runtime: R,
    config: TcpConfig,
    local_ipv4_addr: Ipv4Addr,
    table: ConnectionTable,
    isn_generator: IsnGenerator,
    stats: TcpStats,
    // Time of the last event the host told us about.
    now: Instant,
}

/// TCP engine of one host. Cloning the peer yields another reference to the same engine.
///
/// The engine runs on a single thread of control: the host feeds it inbound segments with [TcpPeer::receive] and
/// timer ticks with [TcpPeer::advance_clock], and the socket layer calls into it between those events.
#[derive(Clone)]
pub struct TcpPeer<R: NetworkRuntime + BufferPool> {
    inner: Rc<RefCell<Inner<R>>>,
    // Active opens cancelled while the engine was busy. Applied on the next reconciliation.
    cancelled: Rc<RefCell<Vec<ConnectionHandle>>>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl<R: NetworkRuntime + BufferPool> TcpPeer<R> {
    pub fn new(runtime: R, local_ipv4_addr: Ipv4Addr, config: TcpConfig, now: Instant, rng_seed: [u8; 32]) -> Self {
        let mut rng: SmallRng = SmallRng::from_seed(rng_seed);
        let nonce: u32 = rng.gen();
        let inner: Inner<R> = Inner {
            runtime,
            table: ConnectionTable::new(config.clone()),
            config,
            local_ipv4_addr,
            isn_generator: IsnGenerator::new(nonce),
            stats: TcpStats::default(),
            now,
        };
        Self {
            inner: Rc::new(RefCell::new(inner)),
            cancelled: Rc::new(RefCell::new(Vec::new())),
        }
    }

    //==================================================================================================================
    // Socket Operations
    //==================================================================================================================

    /// Takes a fresh connection record from the pool.
    pub fn create(&self) -> Result<ConnectionHandle, Fail> {
        self.inner.borrow_mut().table.allocate()
    }

    /// Binds a record to a local address. Port zero picks an ephemeral port.
    pub fn bind(&self, handle: ConnectionHandle, addr: SocketAddrV4) -> Result<(), Fail> {
        let mut guard: RefMut<Inner<R>> = self.inner.borrow_mut();
        let inner: &mut Inner<R> = &mut *guard;

        if !addr.ip().is_unspecified() && *addr.ip() != inner.local_ipv4_addr {
            let cause: String = format!("cannot bind to non-local address (addr={})", addr);
            error!("bind(): {}", cause);
            return Err(Fail::new(EADDRNOTAVAIL, &cause));
        }

        let cb: &ControlBlock = inner.table.get(handle)?;
        if cb.get_state() != State::Closed || cb.get_local().port() != 0 {
            let cause: String = format!("socket is already bound (handle={})", handle);
            error!("bind(): {}", cause);
            return Err(Fail::new(EINVAL, &cause));
        }

        let port: u16 = match addr.port() {
            0 => inner.allocate_port()?,
            port => {
                inner.table.bind_port(port)?;
                port
            },
        };
        let local: SocketAddrV4 = SocketAddrV4::new(inner.local_ipv4_addr, port);
        inner.table.get_mut(handle)?.set_local(local, true);
        debug!("bind(): {} bound to {}", handle, local);
        Ok(())
    }

    /// Marks a bound record as passive.
    pub fn listen(&self, handle: ConnectionHandle, backlog: usize) -> Result<(), Fail> {
        let mut inner: RefMut<Inner<R>> = self.inner.borrow_mut();
        if let Err(e) = inner.table.get_mut(handle)?.listen(backlog) {
            error!("listen(): {}", e);
            return Err(e);
        }
        Ok(())
    }

    /// Waits for an established connection on a listening record.
    pub fn accept(&self, handle: ConnectionHandle) -> AcceptFuture<R> {
        AcceptFuture::new(self.clone(), handle)
    }

    /// Takes an established connection from the accept queue of a listening record, if there is one.
    pub fn try_accept(&self, handle: ConnectionHandle) -> Result<ConnectionHandle, Fail> {
        let mut guard: RefMut<Inner<R>> = self.inner.borrow_mut();
        let inner: &mut Inner<R> = &mut *guard;
        loop {
            let child: ConnectionHandle = match inner.table.get_mut(handle)?.pop_accept() {
                Some(child) => child,
                None => return Err(inner.table.get_mut(handle)?.accept_error()),
            };
            // Children that were reset while queued have been released already.
            if let Ok(cb) = inner.table.get_mut(child) {
                cb.mark_accepted();
                debug!("try_accept(): {} accepted {} from {}", handle, child, cb.get_remote());
                return Ok(child);
            }
        }
    }

    pub fn poll_accept(&self, handle: ConnectionHandle, context: &mut Context) -> Poll<Result<ConnectionHandle, Fail>> {
        match self.try_accept(handle) {
            Err(e) if e.errno == EAGAIN => {
                if let Ok(cb) = self.inner.borrow_mut().table.get_mut(handle) {
                    cb.wait_readable(context);
                }
                Poll::Pending
            },
            result => Poll::Ready(result),
        }
    }

    /// Starts an active open towards `remote`. An unbound record gets an ephemeral port first.
    pub fn connect(&self, handle: ConnectionHandle, remote: SocketAddrV4) -> Result<ConnectFuture<R>, Fail> {
        if remote.ip().is_unspecified() || remote.port() == 0 {
            let cause: String = format!("invalid remote address (remote={})", remote);
            error!("connect(): {}", cause);
            return Err(Fail::new(EINVAL, &cause));
        }

        let mut guard: RefMut<Inner<R>> = self.inner.borrow_mut();
        let inner: &mut Inner<R> = &mut *guard;

        let cb: &ControlBlock = inner.table.get(handle)?;
        let mut local: SocketAddrV4 = cb.get_local();
        if cb.get_state() == State::Closed && local.port() == 0 {
            let port: u16 = inner.allocate_port()?;
            local = SocketAddrV4::new(inner.local_ipv4_addr, port);
            inner.table.get_mut(handle)?.set_local(local, true);
        }

        if inner.table.find(local, remote).is_some() {
            let cause: String = format!("connection already exists (local={}, remote={})", local, remote);
            error!("connect(): {}", cause);
            return Err(Fail::new(EADDRINUSE, &cause));
        }

        let iss: SeqNumber = inner.isn_generator.generate(&local, &remote);
        let now: Instant = inner.now;
        if let Err(e) = inner.table.get_mut(handle)?.connect(remote, iss, now) {
            error!("connect(): {}", e);
            return Err(e);
        }
        inner.stats.active_opens += 1;
        inner.flush();

        Ok(ConnectFuture::new(self.clone(), handle))
    }

    pub fn poll_connect(&self, handle: ConnectionHandle, context: &mut Context) -> Poll<Result<(), Fail>> {
        let mut inner: RefMut<Inner<R>> = self.inner.borrow_mut();
        let cb: &mut ControlBlock = match inner.table.get_mut(handle) {
            Ok(cb) => cb,
            Err(e) => return Poll::Ready(Err(e)),
        };
        match cb.poll_connect() {
            Some(result) => Poll::Ready(result),
            None => {
                cb.wait_writable(context);
                Poll::Pending
            },
        }
    }

    /// Gives up on an active open nobody waits for. Tolerates being called while the engine is busy, which happens
    /// when a future is dropped from within a callback: the cancellation then waits for the next reconciliation.
    pub fn cancel_connect(&self, handle: ConnectionHandle) {
        match self.inner.try_borrow_mut() {
            Ok(mut inner) => {
                if let Ok(cb) = inner.table.get_mut(handle) {
                    cb.abort_connect();
                }
            },
            Err(_) => {
                warn!("cancel_connect(): engine is busy, deferring cancellation of {}", handle);
                self.cancelled.borrow_mut().push(handle);
            },
        }
    }

    /// Takes the cancellations that could not be applied right away.
    fn take_cancelled(&self) -> Vec<ConnectionHandle> {
        ::std::mem::take(&mut *self.cancelled.borrow_mut())
    }

    /// Queues as much of `data` as fits in the send buffer, without blocking. Returns the number of bytes queued.
    pub fn send(&self, handle: ConnectionHandle, data: &[u8]) -> Result<usize, Fail> {
        if data.is_empty() {
            let cause: String = format!("zero-length send (handle={})", handle);
            error!("send(): {}", cause);
            return Err(Fail::new(EINVAL, &cause));
        }

        let mut guard: RefMut<Inner<R>> = self.inner.borrow_mut();
        let inner: &mut Inner<R> = &mut *guard;
        let now: Instant = inner.now;
        let result: Result<usize, Fail> = inner.table.get_mut(handle)?.send(data, &inner.runtime, now);
        inner.flush();
        result
    }

    /// Sends all of `buf`, waiting for room in the send buffer as needed.
    pub fn push(&self, handle: ConnectionHandle, buf: NetBuffer) -> PushFuture<R> {
        PushFuture::new(self.clone(), handle, buf)
    }

    pub fn poll_push(&self, handle: ConnectionHandle, data: &[u8], context: &mut Context) -> Poll<Result<usize, Fail>> {
        match self.send(handle, data) {
            Err(e) if e.errno == EAGAIN => {
                if let Ok(cb) = self.inner.borrow_mut().table.get_mut(handle) {
                    cb.wait_writable(context);
                }
                Poll::Pending
            },
            result => Poll::Ready(result),
        }
    }

    /// Waits for data. An empty buffer means that the peer will send no more.
    pub fn pop(&self, handle: ConnectionHandle, size: Option<usize>) -> PopFuture<R> {
        PopFuture::new(self.clone(), handle, size)
    }

    /// Takes up to `size` bytes of received data without blocking.
    pub fn try_recv(&self, handle: ConnectionHandle, size: Option<usize>) -> Result<NetBuffer, Fail> {
        if size == Some(0) {
            let cause: String = format!("zero-length receive (handle={})", handle);
            error!("try_recv(): {}", cause);
            return Err(Fail::new(EINVAL, &cause));
        }

        let mut guard: RefMut<Inner<R>> = self.inner.borrow_mut();
        let inner: &mut Inner<R> = &mut *guard;
        let result: Result<NetBuffer, Fail> = inner.table.get_mut(handle)?.recv(size);
        inner.flush();
        result
    }

    pub fn poll_recv(
        &self,
        handle: ConnectionHandle,
        size: Option<usize>,
        context: &mut Context,
    ) -> Poll<Result<NetBuffer, Fail>> {
        match self.try_recv(handle, size) {
            Err(e) if e.errno == EAGAIN => {
                if let Ok(cb) = self.inner.borrow_mut().table.get_mut(handle) {
                    cb.wait_readable(context);
                }
                Poll::Pending
            },
            result => Poll::Ready(result),
        }
    }

    /// Closes the write side of a connection. Reads keep working.
    pub fn shutdown(&self, handle: ConnectionHandle) -> Result<(), Fail> {
        let mut guard: RefMut<Inner<R>> = self.inner.borrow_mut();
        let inner: &mut Inner<R> = &mut *guard;
        let now: Instant = inner.now;
        let result: Result<(), Fail> = inner.table.get_mut(handle)?.shutdown(now);
        inner.flush();
        result
    }

    /// Relinquishes a handle. Connected records go through the orderly teardown and return to the pool once
    /// CLOSED; anything else is released right away.
    pub fn close(&self, handle: ConnectionHandle) -> Result<(), Fail> {
        let mut guard: RefMut<Inner<R>> = self.inner.borrow_mut();
        let inner: &mut Inner<R> = &mut *guard;
        let now: Instant = inner.now;

        let cb: &mut ControlBlock = inner.table.get_mut(handle)?;
        if cb.is_user_closed() {
            let cause: String = format!("close already in progress (handle={})", handle);
            error!("close(): {}", cause);
            return Err(Fail::new(EALREADY, &cause));
        }
        let listening: bool = cb.get_state() == State::Listen;
        cb.close(now);
        if listening {
            inner.abort_children(handle);
        }

        inner.reconcile(self.take_cancelled());
        inner.flush();
        Ok(())
    }

    /// Resets a connection and releases its record.
    pub fn abort(&self, handle: ConnectionHandle) -> Result<(), Fail> {
        let mut guard: RefMut<Inner<R>> = self.inner.borrow_mut();
        let inner: &mut Inner<R> = &mut *guard;
        let now: Instant = inner.now;

        let cb: &mut ControlBlock = inner.table.get_mut(handle)?;
        let listening: bool = cb.get_state() == State::Listen;
        cb.abort(now);
        cb.close(now);
        if listening {
            inner.abort_children(handle);
        }

        inner.reconcile(self.take_cancelled());
        inner.flush();
        Ok(())
    }

    pub fn set_nodelay(&self, handle: ConnectionHandle, nodelay: bool) -> Result<(), Fail> {
        let mut guard: RefMut<Inner<R>> = self.inner.borrow_mut();
        let inner: &mut Inner<R> = &mut *guard;
        let now: Instant = inner.now;
        let result: Result<(), Fail> = inner.table.get_mut(handle)?.set_nodelay(nodelay, now);
        inner.flush();
        result
    }

    pub fn set_keepalive(&self, handle: ConnectionHandle, keepalive: bool) -> Result<(), Fail> {
        let mut inner: RefMut<Inner<R>> = self.inner.borrow_mut();
        let now: Instant = inner.now;
        inner.table.get_mut(handle)?.set_keepalive(keepalive, now);
        Ok(())
    }

    //==================================================================================================================
    // Host Events
    //==================================================================================================================

    /// Processes an inbound segment handed up by the IP layer. Segments that fail validation are dropped and
    /// counted; the error only tells the caller why.
    pub fn receive(&self, src_addr: Ipv4Addr, dst_addr: Ipv4Addr, buf: &[u8]) -> Result<(), Fail> {
        let mut guard: RefMut<Inner<R>> = self.inner.borrow_mut();
        let inner: &mut Inner<R> = &mut *guard;
        inner.stats.segments_received += 1;
        let result: Result<(), Fail> = inner.receive(src_addr, dst_addr, buf);
        inner.reconcile(self.take_cancelled());
        inner.flush();
        result
    }

    /// Moves the engine clock to `now` and fires every timer that is due.
    pub fn advance_clock(&self, now: Instant) {
        let mut guard: RefMut<Inner<R>> = self.inner.borrow_mut();
        let inner: &mut Inner<R> = &mut *guard;
        if now > inner.now {
            inner.now = now;
        }
        let now: Instant = inner.now;
        for handle in inner.table.handles() {
            if let Ok(cb) = inner.table.get_mut(handle) {
                cb.on_timer(now, &mut inner.stats);
            }
        }
        inner.reconcile(self.take_cancelled());
        inner.flush();
    }

    //==================================================================================================================
    // Introspection
    //==================================================================================================================

    pub fn get_state(&self, handle: ConnectionHandle) -> Result<State, Fail> {
        Ok(self.inner.borrow().table.get(handle)?.get_state())
    }

    pub fn get_stats(&self) -> TcpStats {
        let inner: Ref<Inner<R>> = self.inner.borrow();
        let mut stats: TcpStats = inner.stats;
        stats.current_established = inner
            .table
            .handles()
            .into_iter()
            .filter_map(|handle| inner.table.get(handle).ok())
            .filter(|cb| cb.get_state().is_established())
            .count() as u64;
        stats
    }

    pub fn reset_stats(&self) {
        self.inner.borrow_mut().stats.reset();
    }

    pub fn get_connection_stats(&self, handle: ConnectionHandle) -> Result<ConnectionStats, Fail> {
        Ok(self.inner.borrow().table.get(handle)?.get_stats())
    }

    pub fn info(&self, handle: ConnectionHandle) -> Result<ConnectionInfo, Fail> {
        Ok(self.inner.borrow().table.get(handle)?.info())
    }

    /// One-line summary of a record, also written to the log.
    pub fn dump(&self, handle: ConnectionHandle) -> Result<String, Fail> {
        let summary: String = format!("{}: {}", handle, self.info(handle)?);
        info!("dump(): {}", summary);
        Ok(summary)
    }

    pub fn local_addr(&self, handle: ConnectionHandle) -> Result<SocketAddrV4, Fail> {
        Ok(self.inner.borrow().table.get(handle)?.get_local())
    }

    pub fn remote_addr(&self, handle: ConnectionHandle) -> Result<SocketAddrV4, Fail> {
        Ok(self.inner.borrow().table.get(handle)?.get_remote())
    }

    /// Number of records in use.
    pub fn num_connections(&self) -> usize {
        self.inner.borrow().table.len()
    }

    /// Checks the sequence, window and timer invariants of every record in use.
    pub fn invariants_hold(&self) -> bool {
        let inner: Ref<Inner<R>> = self.inner.borrow();
        inner
            .table
            .handles()
            .into_iter()
            .filter_map(|handle| inner.table.get(handle).ok())
            .all(|cb| cb.invariants_hold())
    }
}

impl<R: NetworkRuntime + BufferPool> Inner<R> {
    fn allocate_port(&mut self) -> Result<u16, Fail> {
        match self.table.allocate_port() {
            0 => {
                let cause: &str = "no free ephemeral port";
                error!("allocate_port(): {}", cause);
                Err(Fail::new(EADDRNOTAVAIL, cause))
            },
            port => Ok(port),
        }
    }

    fn receive(&mut self, src_addr: Ipv4Addr, dst_addr: Ipv4Addr, buf: &[u8]) -> Result<(), Fail> {
        let (header, payload): (TcpHeader, &[u8]) = match TcpHeader::parse(buf) {
            Ok(result) => result,
            Err(e) => {
                self.stats.bad_segments += 1;
                debug!("receive(): dropping malformed segment ({})", e.cause);
                return Err(e);
            },
        };

        if !self.config.get_rx_checksum_offload() && !verify_checksum(src_addr, dst_addr, buf) {
            self.stats.checksum_errors += 1;
            self.stats.bad_segments += 1;
            debug!("receive(): dropping segment with bad checksum from {}", src_addr);
            return Err(Fail::new(EBADMSG, "bad checksum"));
        }

        if !header.has_valid_flags() {
            self.stats.invalid_segments += 1;
            debug!("receive(): dropping segment with invalid flags {:#04x}", header.flags());
            return Err(Fail::new(EBADMSG, "invalid flag combination"));
        }

        if src_addr.is_broadcast() || src_addr.is_multicast() || src_addr.is_unspecified() {
            self.stats.bad_segments += 1;
            debug!("receive(): dropping segment from invalid source {}", src_addr);
            return Err(Fail::new(EBADMSG, "invalid source address"));
        }

        let local: SocketAddrV4 = SocketAddrV4::new(dst_addr, header.dst_port);
        let remote: SocketAddrV4 = SocketAddrV4::new(src_addr, header.src_port);
        trace!("receive(): {} -> {} {:?} ({} bytes)", remote, local, header, payload.len());

        if let Some(handle) = self.table.find(local, remote) {
            let data: NetBuffer = NetBuffer::from_slice(payload);
            self.table.get_mut(handle)?.receive(header, data, self.now, &mut self.stats);
            return Ok(());
        }

        if let Some(listener) = self.table.find_listener(local.port()) {
            return self.receive_on_listener(listener, local, remote, &header);
        }

        debug!("receive(): no connection for {} -> {}", remote, local);
        self.reply_reset(local, remote, &header, payload.len());
        Ok(())
    }

    fn receive_on_listener(
        &mut self,
        listener: ConnectionHandle,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        header: &TcpHeader,
    ) -> Result<(), Fail> {
        if header.rst {
            return Ok(());
        }
        if header.ack {
            // Stray ACK, possibly for a connection that no longer exists.
            self.reply_reset(local, remote, header, 0);
            return Ok(());
        }
        if !header.syn {
            return Err(Fail::new(EBADMSG, "segment without SYN on listening socket"));
        }

        let half_open: usize = self.table.count_half_open(listener);
        if !self.table.get(listener)?.can_accept_child(half_open) {
            self.stats.failed_attempts += 1;
            warn!("receive(): backlog full on {}, dropping SYN from {}", local, remote);
            return Err(Fail::new(EAGAIN, "accept backlog full"));
        }
        let child: ConnectionHandle = match self.table.allocate() {
            Ok(child) => child,
            Err(e) => {
                self.stats.failed_attempts += 1;
                warn!("receive(): dropping SYN from {} ({})", remote, e.cause);
                return Err(e);
            },
        };

        let iss: SeqNumber = self.isn_generator.generate(&local, &remote);
        let now: Instant = self.now;
        let cb: &mut ControlBlock = self.table.get_mut(child)?;
        cb.set_local(local, false);
        cb.accept_syn(listener, remote, header, iss, now);
        self.stats.passive_opens += 1;
        debug!("receive(): {} spawned {} for {}", listener, child, remote);
        Ok(())
    }

    /// Resets the sender of a segment that matches no connection (RFC 793, page 36). Never answers a RST.
    fn reply_reset(&mut self, local: SocketAddrV4, remote: SocketAddrV4, header: &TcpHeader, data_len: usize) {
        if header.rst {
            return;
        }
        let mut reply: TcpHeader = TcpHeader::new(local.port(), remote.port());
        reply.rst = true;
        if header.ack {
            reply.seq_num = header.ack_num;
        } else {
            let seg_len: u32 = data_len as u32 + header.syn as u32 + header.fin as u32;
            reply.ack = true;
            reply.ack_num = header.seq_num + seg_len;
        }
        if header.syn {
            self.stats.failed_attempts += 1;
        }
        self.transmit(TcpSegment {
            local,
            remote,
            header: reply,
            data: None,
        });
    }

    /// Resets every child a listener spawned that the user did not take yet.
    fn abort_children(&mut self, listener: ConnectionHandle) {
        let now: Instant = self.now;
        for handle in self.table.handles() {
            if let Ok(cb) = self.table.get_mut(handle) {
                if cb.get_parent() == Some(listener) && !cb.is_accepted() {
                    cb.abort(now);
                }
            }
        }
    }

    /// Bookkeeping after every event: moves children that completed the handshake to their listener's accept queue
    /// and returns finished records to the pool.
    fn reconcile(&mut self, cancelled: Vec<ConnectionHandle>) {
        let now: Instant = self.now;
        for handle in cancelled {
            if let Ok(cb) = self.table.get_mut(handle) {
                cb.abort_connect();
            }
        }
        for handle in self.table.handles() {
            let (state, parent, queued): (State, Option<ConnectionHandle>, bool) = match self.table.get(handle) {
                Ok(cb) => (cb.get_state(), cb.get_parent(), cb.is_queued_for_accept()),
                Err(_) => continue,
            };

            if let Some(parent) = parent {
                if !queued && !matches!(state, State::SynRcvd | State::Closed) {
                    match self.table.get_mut(parent) {
                        Ok(listener) if listener.get_state() == State::Listen => {
                            listener.push_accept(handle);
                            if let Ok(cb) = self.table.get_mut(handle) {
                                cb.mark_queued_for_accept();
                            }
                        },
                        _ => {
                            debug!("reconcile(): listener of {} is gone", handle);
                            if let Ok(cb) = self.table.get_mut(handle) {
                                cb.abort(now);
                            }
                        },
                    }
                }
            }

            let releasable: bool = match self.table.get(handle) {
                Ok(cb) => {
                    cb.get_state() == State::Closed
                        && (cb.is_user_closed() || (cb.get_parent().is_some() && !cb.is_accepted()))
                },
                Err(_) => false,
            };
            if releasable {
                self.release(handle);
            }
        }
    }

    fn release(&mut self, handle: ConnectionHandle) {
        // Whatever the record still has to say goes out first.
        if let Ok(cb) = self.table.get_mut(handle) {
            for segment in cb.take_outbox() {
                self.transmit(segment);
            }
        }
        if self.table.release(handle) {
            debug!("release(): {} returned to the pool", handle);
        }
    }

    /// Hands every queued segment to the network.
    fn flush(&mut self) {
        for handle in self.table.handles() {
            if let Ok(cb) = self.table.get_mut(handle) {
                for segment in cb.take_outbox() {
                    self.transmit(segment);
                }
            }
        }
    }

    fn transmit(&mut self, segment: TcpSegment) {
        let buf: NetBuffer = match segment.encode(&self.runtime, self.config.get_tx_checksum_offload()) {
            Ok(buf) => buf,
            Err(e) => {
                warn!("transmit(): failed to encode segment ({})", e.cause);
                return;
            },
        };
        self.stats.segments_sent += 1;
        if segment.header.rst {
            self.stats.reset_segments += 1;
        }
        trace!("transmit(): {} -> {} {:?}", segment.local, segment.remote, segment.header);
        // A segment the IP layer could not take is as good as lost.
        match self
            .runtime
            .transmit(*segment.local.ip(), *segment.remote.ip(), IpProtocol::TCP, buf)
        {
            Ok(()) => (),
            Err(e) if e.is_transient() => debug!("transmit(): dropped ({})", e.cause),
            Err(e) => warn!("transmit(): {}", e),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::inetstack::{
        protocols::tcp::{
            table::ConnectionHandle,
            State,
        },
        test_helpers::{
            self,
            Engine,
        },
    };
    use ::anyhow::Result;
    use ::std::{
        net::SocketAddrV4,
        time::{
            Duration,
            Instant,
        },
    };

    /// A connect dropped while the engine is borrowed is cancelled on the next event instead of being lost.
    #[test]
    fn cancel_connect_while_busy() -> Result<()> {
        let now: Instant = Instant::now();
        let client: Engine = test_helpers::new_alice(now);
        let remote: SocketAddrV4 = SocketAddrV4::new(test_helpers::BOB_IPV4, 80);

        let handle: ConnectionHandle = client.tcp.create()?;
        let connect = client.tcp.connect(handle, remote)?;
        let busy = client.tcp.inner.borrow();
        drop(connect);
        drop(busy);
        crate::ensure_eq!(client.tcp.get_state(handle)?, State::SynSent);
        crate::ensure_eq!(client.tcp.cancelled.borrow().len(), 1);

        client.advance_clock(now);
        crate::ensure_eq!(client.tcp.get_state(handle)?, State::Closed);
        crate::ensure_eq!(client.tcp.cancelled.borrow().is_empty(), true);

        // No more SYNs.
        client.rt.drain();
        client.advance_clock(now + Duration::from_secs(60));
        crate::ensure_eq!(client.rt.num_outgoing(), 0);
        Ok(())
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::{
    congestion_control::{
        CongestionControl,
        Reno,
    },
    receiver::{
        Delivered,
        Receiver,
    },
    rto::RtoCalculator,
    sender::{
        AckedData,
        Sender,
        UnackedSegment,
    },
    ConnectionInfo,
    State,
};
use crate::{
    inetstack::protocols::tcp::{
        segment::{
            TcpHeader,
            TcpSegment,
        },
        stats::{
            ConnectionStats,
            TcpStats,
        },
        table::ConnectionHandle,
        SeqNumber,
    },
    runtime::{
        condition_variable::ConditionVariable,
        fail::Fail,
        memory::{
            BufferPool,
            NetBuffer,
        },
        network::{
            config::TcpConfig,
            consts::{
                TCP_MAX_RTO,
                TCP_MIN_RTO,
            },
        },
    },
};
use ::libc::{
    EAGAIN,
    EALREADY,
    EBADMSG,
    ECONNREFUSED,
    ECONNRESET,
    EINVAL,
    EISCONN,
    ENOTCONN,
    EOPNOTSUPP,
    EPIPE,
    ETIMEDOUT,
};
use ::std::{
    cmp::min,
    collections::VecDeque,
    mem,
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    task::Context,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Transmission Control Block: everything we know about one connection, from LISTEN to TIME_WAIT.
///
/// The control block never talks to the network directly. Segments it wants to send are queued in an outbox that the
/// owner drains after every call into the control block.
pub struct ControlBlock {
    local: SocketAddrV4,
    remote: SocketAddrV4,
    state: State,
    // The local port is held in the port allocator on behalf of this record.
    port_bound: bool,

    // Passive open: the listener that spawned this record, whether the record sits in that listener's accept queue
    // and whether the user took it from there.
    parent: Option<ConnectionHandle>,
    queued_for_accept: bool,
    accepted: bool,
    // LISTEN: established children waiting to be accepted.
    accept_queue: VecDeque<ConnectionHandle>,
    backlog: usize,

    sender: Sender,
    receiver: Receiver,
    rto_calculator: RtoCalculator,
    cc: Box<dyn CongestionControl>,
    mss: usize,
    send_buffer_size: usize,

    // Retransmission timer.
    max_retries: usize,
    retries: usize,
    retransmit_deadline: Option<Instant>,

    // Zero-window probing.
    persist_deadline: Option<Instant>,
    persist_interval: Duration,

    time_wait_timeout: Duration,
    time_wait_deadline: Option<Instant>,

    // Socket options.
    nodelay: bool,
    keepalive: bool,
    keepalive_time: Duration,
    keepalive_interval: Duration,
    keepalive_probes: usize,
    keepalive_deadline: Option<Instant>,
    keepalive_probes_sent: usize,

    user_closed: bool,
    // Connection-level failure not yet reported to the user.
    pending_error: Option<Fail>,

    stats: ConnectionStats,
    readable: ConditionVariable,
    writable: ConditionVariable,
    outbox: VecDeque<TcpSegment>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ControlBlock {
    /// Creates an unused record: CLOSED, with no local port.
    pub fn new(config: &TcpConfig) -> Self {
        let unspecified: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        let mss: usize = config.get_mss();
        Self {
            local: unspecified,
            remote: unspecified,
            state: State::Closed,
            port_bound: false,
            parent: None,
            queued_for_accept: false,
            accepted: false,
            accept_queue: VecDeque::new(),
            backlog: 0,
            sender: Sender::new(SeqNumber::from(0), config.get_send_buffer_size()),
            receiver: Receiver::new(config.get_receive_window_size()),
            rto_calculator: RtoCalculator::new(config.get_initial_rto()),
            cc: Reno::new(mss, config.get_initial_ssthresh()),
            mss,
            send_buffer_size: config.get_send_buffer_size(),
            max_retries: config.get_max_retries(),
            retries: 0,
            retransmit_deadline: None,
            persist_deadline: None,
            persist_interval: config.get_initial_rto(),
            time_wait_timeout: config.get_time_wait_timeout(),
            time_wait_deadline: None,
            nodelay: config.get_nodelay(),
            keepalive: config.get_keepalive(),
            keepalive_time: config.get_keepalive_time(),
            keepalive_interval: config.get_keepalive_interval(),
            keepalive_probes: config.get_keepalive_probes(),
            keepalive_deadline: None,
            keepalive_probes_sent: 0,
            user_closed: false,
            pending_error: None,
            stats: ConnectionStats::default(),
            readable: ConditionVariable::default(),
            writable: ConditionVariable::default(),
            outbox: VecDeque::new(),
        }
    }

    pub fn get_local(&self) -> SocketAddrV4 {
        self.local
    }

    pub fn get_remote(&self) -> SocketAddrV4 {
        self.remote
    }

    pub fn get_state(&self) -> State {
        self.state
    }

    pub fn get_stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn is_port_bound(&self) -> bool {
        self.port_bound
    }

    /// Binds the record to a local address. `port_bound` tells whether the record owns the port.
    pub fn set_local(&mut self, local: SocketAddrV4, port_bound: bool) {
        self.local = local;
        self.port_bound = port_bound;
    }

    pub fn get_parent(&self) -> Option<ConnectionHandle> {
        self.parent
    }

    pub fn is_queued_for_accept(&self) -> bool {
        self.queued_for_accept
    }

    pub fn mark_queued_for_accept(&mut self) {
        self.queued_for_accept = true;
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn mark_accepted(&mut self) {
        self.accepted = true;
    }

    pub fn is_user_closed(&self) -> bool {
        self.user_closed
    }

    /// Segments waiting to be handed to the network.
    pub fn take_outbox(&mut self) -> VecDeque<TcpSegment> {
        mem::take(&mut self.outbox)
    }

    pub fn wait_readable(&mut self, context: &Context) {
        self.readable.wait(context);
    }

    pub fn wait_writable(&mut self, context: &Context) {
        self.writable.wait(context);
    }

    /// Wakes up every task waiting on the target record.
    pub fn wake_all(&mut self) {
        self.readable.broadcast();
        self.writable.broadcast();
    }

    //==================================================================================================================
    // Socket Operations
    //==================================================================================================================

    pub fn listen(&mut self, backlog: usize) -> Result<(), Fail> {
        match self.state {
            State::Closed if self.local.port() != 0 => {
                self.backlog = backlog.max(1);
                self.set_state(State::Listen, None);
                Ok(())
            },
            State::Closed => Err(Fail::new(EINVAL, "socket is not bound")),
            State::Listen => Err(Fail::new(EINVAL, "socket is already listening")),
            _ => Err(Fail::new(EISCONN, "socket is connected")),
        }
    }

    /// Checks if a listener can take one more child, counting those still completing the handshake.
    pub fn can_accept_child(&self, half_open: usize) -> bool {
        self.accept_queue.len() + half_open < self.backlog
    }

    pub fn push_accept(&mut self, child: ConnectionHandle) {
        self.accept_queue.push_back(child);
        self.readable.broadcast();
    }

    pub fn pop_accept(&mut self) -> Option<ConnectionHandle> {
        self.accept_queue.pop_front()
    }

    pub fn take_accept_queue(&mut self) -> VecDeque<ConnectionHandle> {
        mem::take(&mut self.accept_queue)
    }

    /// Reason why nothing can be accepted from the target record right now.
    pub fn accept_error(&mut self) -> Fail {
        if let Some(e) = self.pending_error.take() {
            return e;
        }
        match self.state {
            State::Listen => Fail::new(EAGAIN, "no connection ready to be accepted"),
            _ => Fail::new(EOPNOTSUPP, "socket is not listening"),
        }
    }

    /// Active open: moves to SYN_SENT and sends our SYN.
    pub fn connect(&mut self, remote: SocketAddrV4, iss: SeqNumber, now: Instant) -> Result<(), Fail> {
        match self.state {
            State::Closed => (),
            State::Listen => return Err(Fail::new(EOPNOTSUPP, "socket is listening")),
            State::SynSent | State::SynRcvd => return Err(Fail::new(EALREADY, "connection already in progress")),
            _ => return Err(Fail::new(EISCONN, "socket is already connected")),
        }
        self.remote = remote;
        self.sender = Sender::new(iss, self.send_buffer_size);
        self.pending_error = None;
        self.set_state(State::SynSent, Some(now));
        self.transmit(None, true, false, now);
        Ok(())
    }

    /// Passive open: initializes a child of `parent` from the SYN it received and replies with a SYN+ACK.
    pub fn accept_syn(
        &mut self,
        parent: ConnectionHandle,
        remote: SocketAddrV4,
        header: &TcpHeader,
        iss: SeqNumber,
        now: Instant,
    ) {
        self.parent = Some(parent);
        self.remote = remote;
        self.sender = Sender::new(iss, self.send_buffer_size);
        self.receiver.init(header.seq_num);
        self.stats.packets_received += 1;
        self.set_state(State::SynRcvd, Some(now));
        self.transmit(None, true, false, now);
    }

    /// Result of a pending active open, if there is one yet.
    pub fn poll_connect(&mut self) -> Option<Result<(), Fail>> {
        match self.state {
            State::SynSent | State::SynRcvd => None,
            State::Closed | State::Listen => Some(Err(self
                .pending_error
                .take()
                .unwrap_or_else(|| Fail::new(ENOTCONN, "connection was aborted")))),
            _ => Some(Ok(())),
        }
    }

    /// Gives up on an active open that nobody waits for anymore.
    pub fn abort_connect(&mut self) {
        if self.state == State::SynSent {
            debug!("abort_connect(): {} -> {}", self.local, self.remote);
            self.set_state(State::Closed, None);
        }
    }

    /// Queues as much of `data` as fits in the send buffer. Returns the number of bytes queued.
    pub fn send<P: BufferPool>(&mut self, data: &[u8], pool: &P, now: Instant) -> Result<usize, Fail> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }
        match self.state {
            State::Established | State::CloseWait if !self.sender.fin_queued() => (),
            State::Closed | State::Listen | State::SynSent | State::SynRcvd => {
                return Err(Fail::new(ENOTCONN, "socket is not connected"))
            },
            _ => return Err(Fail::new(EPIPE, "connection is shut down for writing")),
        }

        let nbytes: usize = min(data.len(), self.sender.buffer_space());
        if nbytes == 0 {
            return Err(Fail::new(EAGAIN, "send buffer is full"));
        }
        let mut buf: NetBuffer = pool.alloc(nbytes)?;
        buf.put(&data[..nbytes])?;
        self.sender.enqueue(buf)?;
        self.output(now)?;
        Ok(nbytes)
    }

    /// Pops received data. An empty buffer means that the peer closed its side of the connection.
    pub fn recv(&mut self, size: Option<usize>) -> Result<NetBuffer, Fail> {
        let old_window: u32 = self.receiver.window();
        if let Some(buf) = self.receiver.pop(size)? {
            // Tell the peer about a window that reopened enough to be worth it.
            let threshold: u32 = min(self.mss as u32, self.receiver.capacity() / 2).max(1);
            if self.state.is_synchronized() && old_window < threshold && self.receiver.window() >= threshold {
                trace!("recv(): window update ({} -> {})", old_window, self.receiver.window());
                self.send_ack();
            }
            return Ok(buf);
        }
        if self.receiver.fin_received() {
            return Ok(NetBuffer::empty());
        }
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }
        match self.state {
            State::Closed | State::Listen => Err(Fail::new(ENOTCONN, "socket is not connected")),
            _ => Err(Fail::new(EAGAIN, "no data available")),
        }
    }

    /// Application close. Sends our FIN once all queued data is out.
    pub fn close(&mut self, now: Instant) {
        self.user_closed = true;
        match self.state {
            State::Closed | State::Listen | State::SynSent => self.set_state(State::Closed, Some(now)),
            _ => self.shutdown_write(now),
        }
    }

    /// Closes the write side of the connection only.
    pub fn shutdown(&mut self, now: Instant) -> Result<(), Fail> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }
        match self.state {
            State::Closed | State::Listen | State::SynSent => Err(Fail::new(ENOTCONN, "socket is not connected")),
            _ => {
                self.shutdown_write(now);
                Ok(())
            },
        }
    }

    fn shutdown_write(&mut self, now: Instant) {
        if self.sender.fin_queued() {
            return;
        }
        self.sender.queue_fin();
        match self.state {
            State::Established => self.set_state(State::FinWait1, Some(now)),
            State::CloseWait => self.set_state(State::LastAck, Some(now)),
            // SYN_RCVD moves on to FIN_WAIT_1 when the handshake completes.
            _ => (),
        }
        if let Err(e) = self.output(now) {
            warn!("shutdown_write(): {}", e);
        }
    }

    /// Abortive close: resets the connection if the peer knows about it.
    pub fn abort(&mut self, now: Instant) {
        match self.state {
            State::Closed | State::Listen | State::SynSent | State::TimeWait => (),
            _ => self.send_reset(),
        }
        self.set_state(State::Closed, Some(now));
    }

    pub fn set_nodelay(&mut self, nodelay: bool, now: Instant) -> Result<(), Fail> {
        self.nodelay = nodelay;
        if nodelay {
            self.output(now)?;
        }
        Ok(())
    }

    pub fn set_keepalive(&mut self, keepalive: bool, now: Instant) {
        self.keepalive = keepalive;
        self.keepalive_probes_sent = 0;
        self.keepalive_deadline = match (keepalive, self.state) {
            (true, State::Established) => Some(now + self.keepalive_time),
            _ => None,
        };
    }

    //==================================================================================================================
    // Segment Processing
    //==================================================================================================================

    /// Processes a segment demultiplexed to the target record. Protocol violations are dropped and counted, never
    /// reported to the user.
    pub fn receive(&mut self, header: TcpHeader, data: NetBuffer, now: Instant, stats: &mut TcpStats) {
        self.stats.packets_received += 1;
        self.stats.bytes_received += data.len() as u64;

        if self.keepalive_deadline.is_some() {
            self.keepalive_deadline = Some(now + self.keepalive_time);
            self.keepalive_probes_sent = 0;
        }

        let result: Result<(), Fail> = match self.state {
            State::Closed | State::Listen => Err(Fail::new(EBADMSG, "no connection")),
            State::SynSent => self.process_syn_sent(&header, now, stats),
            _ => self.process_segment(header, data, now, stats),
        };
        if let Err(e) = result {
            debug!("receive(): dropping segment ({})", e.cause);
        }

        if let Err(e) = self.output(now) {
            warn!("receive(): {}", e);
        }
    }

    /// SYN_SENT processing (RFC 793, page 66).
    fn process_syn_sent(&mut self, header: &TcpHeader, now: Instant, stats: &mut TcpStats) -> Result<(), Fail> {
        if header.ack
            && !(self.sender.get_iss() < header.ack_num && header.ack_num <= self.sender.get_send_next())
        {
            if !header.rst {
                self.send_reset_for(header.ack_num);
            }
            stats.invalid_segments += 1;
            return Err(Fail::new(EBADMSG, "unacceptable ACK in SYN_SENT"));
        }

        if header.rst {
            if !header.ack {
                return Err(Fail::new(EBADMSG, "RST without ACK in SYN_SENT"));
            }
            stats.failed_attempts += 1;
            self.fail_connection(Fail::new(ECONNREFUSED, "connection refused"), now);
            return Ok(());
        }

        if !header.syn {
            return Err(Fail::new(EBADMSG, "neither SYN nor RST in SYN_SENT"));
        }

        self.receiver.init(header.seq_num);
        if header.ack {
            self.acknowledge(header.ack_num, now)?;
            self.sender.init_send_window(header);
            self.set_state(State::Established, Some(now));
            self.send_ack();
        } else {
            // Simultaneous open. Our SYN goes out again, this time with an ACK.
            self.set_state(State::SynRcvd, Some(now));
            self.retransmit();
        }
        Ok(())
    }

    /// Processing for every state past SYN_SENT (RFC 793, page 69). Each step returns Ok if there is further
    /// processing to be done and an error if the segment should be dropped after the step.
    fn process_segment(
        &mut self,
        mut header: TcpHeader,
        mut data: NetBuffer,
        now: Instant,
        stats: &mut TcpStats,
    ) -> Result<(), Fail> {
        self.check_segment_in_window(&mut header, &mut data, now, stats)?;
        self.check_rst(&header, now, stats)?;
        self.check_syn(&header, stats)?;
        self.process_ack(&header, data.len(), now, stats)?;
        if header.urg {
            trace!("process_segment(): ignoring URG");
        }
        self.process_data(&header, data, now, stats)
    }

    // Drops segments that fall outside of the receive window with an ACK, and trims the rest to the window.
    fn check_segment_in_window(
        &mut self,
        header: &mut TcpHeader,
        data: &mut NetBuffer,
        now: Instant,
        stats: &mut TcpStats,
    ) -> Result<(), Fail> {
        let seg_len: u32 = data.len() as u32 + header.syn as u32 + header.fin as u32;
        if !self.receiver.is_acceptable(header.seq_num, seg_len) {
            if self.state == State::SynRcvd && header.syn && !header.ack && header.seq_num == self.receiver.get_irs() {
                // Our SYN+ACK got lost and the peer sent its SYN again.
                self.retransmit();
                return Err(Fail::new(EBADMSG, "retransmitted SYN"));
            }
            if self.state == State::TimeWait && header.fin {
                // Retransmitted FIN: our last ACK got lost.
                self.time_wait_deadline = Some(now + self.time_wait_timeout);
            }
            if !header.rst {
                self.send_ack();
            }
            stats.out_of_window += 1;
            return Err(Fail::new(EBADMSG, "segment outside of receive window"));
        }

        // Cut off what we already have.
        let receive_next: SeqNumber = self.receiver.get_receive_next();
        if header.seq_num < receive_next {
            let mut duplicate: u32 = receive_next - header.seq_num;
            if header.syn {
                header.syn = false;
                duplicate -= 1;
            }
            data.pull(min(duplicate as usize, data.len()))?;
            header.seq_num = receive_next;
        }

        // Cut off what does not fit.
        let window_end: SeqNumber = receive_next + self.receiver.window();
        let seg_end: SeqNumber = header.seq_num + (data.len() as u32 + header.syn as u32 + header.fin as u32);
        if seg_end > window_end {
            let mut excess: u32 = seg_end - window_end;
            if header.fin {
                header.fin = false;
                excess -= 1;
            }
            data.trim(min(excess as usize, data.len()))?;
        }

        Ok(())
    }

    fn check_rst(&mut self, header: &TcpHeader, now: Instant, stats: &mut TcpStats) -> Result<(), Fail> {
        if !header.rst {
            return Ok(());
        }

        match self.state {
            State::SynRcvd if self.parent.is_some() => {
                stats.failed_attempts += 1;
                self.set_state(State::Closed, Some(now));
            },
            State::SynRcvd => {
                stats.failed_attempts += 1;
                self.fail_connection(Fail::new(ECONNREFUSED, "connection refused"), now);
            },
            State::Established | State::CloseWait => {
                stats.established_resets += 1;
                self.fail_connection(Fail::new(ECONNRESET, "connection reset by peer"), now);
            },
            State::FinWait1 | State::FinWait2 => {
                self.fail_connection(Fail::new(ECONNRESET, "connection reset by peer"), now);
            },
            _ => self.set_state(State::Closed, Some(now)),
        }
        Err(Fail::new(ECONNRESET, "remote reset connection"))
    }

    fn check_syn(&mut self, header: &TcpHeader, stats: &mut TcpStats) -> Result<(), Fail> {
        if header.syn {
            // RFC 5961 challenge ACK: a genuine peer that restarted will answer with a RST.
            self.send_ack();
            stats.invalid_segments += 1;
            return Err(Fail::new(EBADMSG, "in-window SYN on synchronized connection"));
        }
        Ok(())
    }

    fn process_ack(
        &mut self,
        header: &TcpHeader,
        data_len: usize,
        now: Instant,
        stats: &mut TcpStats,
    ) -> Result<(), Fail> {
        if !header.ack {
            stats.invalid_segments += 1;
            return Err(Fail::new(EBADMSG, "segment without ACK"));
        }

        if self.state == State::SynRcvd {
            let send_unacked: SeqNumber = self.sender.get_send_unacked();
            if !(send_unacked < header.ack_num && header.ack_num <= self.sender.get_send_next()) {
                self.send_reset_for(header.ack_num);
                stats.invalid_segments += 1;
                return Err(Fail::new(EBADMSG, "unacceptable ACK in SYN_RCVD"));
            }
            self.acknowledge(header.ack_num, now)?;
            self.sender.init_send_window(header);
            self.set_state(State::Established, Some(now));
            if self.sender.fin_queued() {
                self.set_state(State::FinWait1, Some(now));
            }
        }

        let send_unacked: SeqNumber = self.sender.get_send_unacked();
        let send_next: SeqNumber = self.sender.get_send_next();
        if send_unacked < header.ack_num {
            if header.ack_num > send_next {
                self.send_ack();
                stats.invalid_segments += 1;
                return Err(Fail::new(EBADMSG, "ACK for data not yet sent"));
            }
            let acked: AckedData = self.acknowledge(header.ack_num, now)?;
            if self.cc.in_fast_recovery() {
                debug!("process_ack(): leaving fast recovery at {}", header.ack_num);
            }
            self.cc.on_ack_received(acked.bytes_acked);
            self.sender.update_send_window(header);
        } else if header.ack_num == send_unacked {
            let window_changed: bool = self.sender.update_send_window(header);
            // Duplicate ACK as defined by RFC 5681, Section 2.
            if data_len == 0 && !header.fin && !window_changed && self.sender.has_unacked() {
                self.stats.duplicate_acks += 1;
                if self.cc.on_duplicate_ack(self.sender.in_flight()) {
                    debug!(
                        "process_ack(): fast retransmit at {} after {} duplicate ACKs",
                        send_unacked,
                        self.cc.get_duplicate_ack_count()
                    );
                    stats.fast_retrans += 1;
                    stats.retrans_segments += 1;
                    self.retransmit();
                }
            }
        } else {
            // Old ACK. Only the window may still be news.
            self.sender.update_send_window(header);
        }

        if self.sender.fin_acked() {
            match self.state {
                State::FinWait1 => self.set_state(State::FinWait2, Some(now)),
                State::Closing => self.set_state(State::TimeWait, Some(now)),
                State::LastAck => self.set_state(State::Closed, Some(now)),
                _ => (),
            }
        }
        Ok(())
    }

    fn process_data(
        &mut self,
        header: &TcpHeader,
        data: NetBuffer,
        now: Instant,
        stats: &mut TcpStats,
    ) -> Result<(), Fail> {
        if data.is_empty() && !header.fin {
            return Ok(());
        }

        match self.state {
            State::Established | State::FinWait1 | State::FinWait2 => {
                let delivered: Delivered = match self.receiver.receive(header.seq_num, data, header.fin) {
                    Ok(delivered) => delivered,
                    Err(e) => {
                        stats.out_of_window += 1;
                        self.send_ack();
                        return Err(e);
                    },
                };
                if delivered.bytes > 0 || delivered.fin {
                    self.readable.broadcast();
                }
                if delivered.fin {
                    self.process_remote_close(now);
                }
                // Every segment with data gets an ACK, out-of-order ones included so that the peer notices the gap.
                self.send_ack();
                Ok(())
            },
            state => {
                debug!("process_data(): ignoring data received after FIN (in state {})", state);
                Ok(())
            },
        }
    }

    fn process_remote_close(&mut self, now: Instant) {
        match self.state {
            State::Established => self.set_state(State::CloseWait, Some(now)),
            State::FinWait1 => self.set_state(State::Closing, Some(now)),
            State::FinWait2 => self.set_state(State::TimeWait, Some(now)),
            _ => (),
        }
    }

    /// Removes newly acknowledged data and restarts the retransmission timer if anything is still outstanding.
    fn acknowledge(&mut self, ack_num: SeqNumber, now: Instant) -> Result<AckedData, Fail> {
        let acked: AckedData = self.sender.remove_acknowledged(ack_num, now)?;
        if let Some(rtt) = acked.rtt_sample {
            self.rto_calculator.add_sample(rtt);
        }
        self.retries = 0;
        self.retransmit_deadline = if self.sender.has_unacked() {
            Some(now + self.rto_calculator.rto())
        } else {
            None
        };
        self.writable.broadcast();
        Ok(acked)
    }

    //==================================================================================================================
    // Output
    //==================================================================================================================

    /// Sends as much queued data (and FIN) as the peer's window and the congestion window allow.
    pub fn output(&mut self, now: Instant) -> Result<(), Fail> {
        if !matches!(
            self.state,
            State::Established | State::CloseWait | State::FinWait1 | State::Closing | State::LastAck
        ) {
            return Ok(());
        }

        loop {
            let in_flight: u32 = self.sender.in_flight();
            let usable: usize = min(
                self.sender.usable_send_window(),
                self.cc.get_cwnd().saturating_sub(in_flight),
            ) as usize;
            let unsent: usize = self.sender.unsent_bytes();

            if unsent > 0 {
                if usable == 0 {
                    break;
                }
                let len: usize = min(unsent, min(usable, self.mss));
                // Nagle: hold back a small segment while data is in flight, unless the data is all there will be.
                if len < self.mss && in_flight > 0 && !self.nodelay && !self.sender.fin_queued() {
                    trace!("output(): nagle holds {} bytes", len);
                    break;
                }
                let data: Option<NetBuffer> = self.sender.pop_unsent(len)?;
                let fin: bool = self.sender.fin_pending() && usable > len;
                self.transmit(data, false, fin, now);
            } else if self.sender.fin_pending() && usable > 0 {
                self.transmit(None, false, true, now);
                break;
            } else {
                break;
            }
        }

        // Zero window with nothing in flight: only a probe will tell us when it opens.
        let blocked: bool = (self.sender.unsent_bytes() > 0 || self.sender.fin_pending())
            && self.sender.usable_send_window() == 0
            && !self.sender.has_unacked();
        if !blocked {
            self.persist_deadline = None;
        } else if self.persist_deadline.is_none() {
            self.persist_interval = self.rto_calculator.rto();
            self.persist_deadline = Some(now + self.persist_interval);
        }
        Ok(())
    }

    /// Header filled from our current state. Once we know the peer's ISN every segment acknowledges.
    fn segment_header(&self) -> TcpHeader {
        let mut header: TcpHeader = TcpHeader::new(self.local.port(), self.remote.port());
        header.window_size = min(self.receiver.window(), u16::MAX as u32) as u16;
        if self.state != State::SynSent {
            header.ack = true;
            header.ack_num = self.receiver.get_receive_next();
        }
        header
    }

    /// Sends new data, SYN or FIN, and puts it on the retransmission queue.
    fn transmit(&mut self, data: Option<NetBuffer>, syn: bool, fin: bool, now: Instant) {
        let seq: SeqNumber = self.sender.get_send_next();
        let mut header: TcpHeader = self.segment_header();
        header.seq_num = seq;
        header.syn = syn;
        header.fin = fin;
        header.psh = data.is_some() && self.sender.unsent_bytes() == 0;
        self.emit(header, data.clone());
        self.sender.record_sent(UnackedSegment {
            seq,
            bytes: data,
            syn,
            fin,
            initial_tx: Some(now),
        });
        if self.retransmit_deadline.is_none() {
            self.retransmit_deadline = Some(now + self.rto_calculator.rto());
        }
    }

    /// Sends the oldest unacknowledged segment again.
    fn retransmit(&mut self) {
        let segment: UnackedSegment = match self.sender.retransmit_head() {
            Some(segment) => segment,
            None => return,
        };
        let mut header: TcpHeader = self.segment_header();
        header.seq_num = segment.seq;
        header.syn = segment.syn;
        header.fin = segment.fin;
        header.psh = segment.bytes.is_some();
        self.stats.retrans_count += 1;
        self.emit(header, segment.bytes);
    }

    fn send_ack(&mut self) {
        let mut header: TcpHeader = self.segment_header();
        header.seq_num = self.sender.get_send_next();
        self.emit(header, None);
    }

    /// Zero-window and keepalive probe: an old sequence number with no data, which the peer must answer with an ACK.
    fn send_probe(&mut self) {
        let mut header: TcpHeader = self.segment_header();
        header.seq_num = self.sender.get_send_next() - 1;
        self.emit(header, None);
    }

    fn send_reset(&mut self) {
        let mut header: TcpHeader = self.segment_header();
        header.seq_num = self.sender.get_send_next();
        header.rst = true;
        self.emit(header, None);
    }

    /// Reset in reply to an unacceptable ACK (RFC 793, page 36).
    fn send_reset_for(&mut self, ack_num: SeqNumber) {
        let mut header: TcpHeader = TcpHeader::new(self.local.port(), self.remote.port());
        header.seq_num = ack_num;
        header.rst = true;
        self.emit(header, None);
    }

    fn emit(&mut self, header: TcpHeader, data: Option<NetBuffer>) {
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += data.as_ref().map_or(0, |data| data.len()) as u64;
        self.outbox.push_back(TcpSegment {
            local: self.local,
            remote: self.remote,
            header,
            data,
        });
    }

    //==================================================================================================================
    // Timers
    //==================================================================================================================

    /// Fires every timer of the target record that is due at `now`.
    pub fn on_timer(&mut self, now: Instant, stats: &mut TcpStats) {
        if let Some(deadline) = self.time_wait_deadline {
            if now >= deadline {
                debug!("on_timer(): TIME_WAIT expired for {} -> {}", self.local, self.remote);
                self.set_state(State::Closed, Some(now));
            }
            return;
        }

        if let Some(deadline) = self.retransmit_deadline {
            if now >= deadline {
                self.on_retransmit_timeout(now, stats);
            }
        }

        if let Some(deadline) = self.persist_deadline {
            if now >= deadline {
                trace!("on_timer(): zero window probe");
                self.send_probe();
                self.persist_interval = min(self.persist_interval * 2, TCP_MAX_RTO);
                self.persist_deadline = Some(now + self.persist_interval);
            }
        }

        if let Some(deadline) = self.keepalive_deadline {
            if now >= deadline {
                if self.keepalive_probes_sent >= self.keepalive_probes {
                    self.send_reset();
                    self.fail_connection(Fail::new(ETIMEDOUT, "keepalive timed out"), now);
                } else {
                    trace!("on_timer(): keepalive probe {}", self.keepalive_probes_sent + 1);
                    self.send_probe();
                    self.keepalive_probes_sent += 1;
                    self.keepalive_deadline = Some(now + self.keepalive_interval);
                }
            }
        }
    }

    fn on_retransmit_timeout(&mut self, now: Instant, stats: &mut TcpStats) {
        if self.retries >= self.max_retries {
            warn!("on_retransmit_timeout(): giving up on {} -> {}", self.local, self.remote);
            match self.state {
                State::SynSent => stats.failed_attempts += 1,
                State::SynRcvd => {
                    stats.failed_attempts += 1;
                    self.send_reset();
                },
                _ => self.send_reset(),
            }
            self.fail_connection(Fail::new(ETIMEDOUT, "connection timed out"), now);
            return;
        }

        self.retries += 1;
        stats.retrans_timeouts += 1;
        stats.retrans_segments += 1;
        // A lost SYN says nothing about the path capacity.
        if self.state.is_synchronized() {
            self.cc.on_rto();
        }
        self.rto_calculator.back_off();
        self.retransmit();
        self.retransmit_deadline = Some(now + self.rto_calculator.rto());
    }

    //==================================================================================================================
    // State Management
    //==================================================================================================================

    fn set_state(&mut self, state: State, now: Option<Instant>) {
        if self.state == state {
            return;
        }
        debug!("{} -> {}: {} -> {}", self.local, self.remote, self.state, state);
        self.state = state;

        match (state, now) {
            (State::Established, Some(now)) if self.keepalive => {
                self.keepalive_deadline = Some(now + self.keepalive_time);
            },
            (State::TimeWait, Some(now)) => {
                self.keepalive_deadline = None;
                self.retransmit_deadline = None;
                self.time_wait_deadline = Some(now + self.time_wait_timeout);
            },
            (State::Closed, _) => {
                self.retransmit_deadline = None;
                self.persist_deadline = None;
                self.keepalive_deadline = None;
                self.time_wait_deadline = None;
            },
            _ => self.keepalive_deadline = None,
        }

        self.wake_all();
    }

    fn fail_connection(&mut self, cause: Fail, now: Instant) {
        debug_assert!(cause.is_connection_failure());
        info!("fail_connection(): {} -> {}: {}", self.local, self.remote, cause.cause);
        self.pending_error = Some(cause);
        self.set_state(State::Closed, Some(now));
    }

    //==================================================================================================================
    // Introspection
    //==================================================================================================================

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            local: self.local,
            remote: self.remote,
            state: self.state,
            snd_una: self.sender.get_send_unacked(),
            snd_nxt: self.sender.get_send_next(),
            snd_wnd: self.sender.get_send_window(),
            iss: self.sender.get_iss(),
            rcv_nxt: self.receiver.get_receive_next(),
            rcv_wnd: self.receiver.window(),
            irs: self.receiver.get_irs(),
            mss: self.mss,
            cwnd: self.cc.get_cwnd(),
            ssthresh: self.cc.get_ssthresh(),
            srtt: self.rto_calculator.srtt(),
            rttvar: self.rto_calculator.rttvar(),
            rto: self.rto_calculator.rto(),
            unacked_segments: self.sender.unacked_segments().count(),
            out_of_order_segments: self.receiver.out_of_order_segments(),
        }
    }

    /// Checks the invariants every live record maintains.
    pub fn invariants_hold(&self) -> bool {
        if matches!(self.state, State::Closed | State::Listen) {
            return true;
        }
        let send_unacked: SeqNumber = self.sender.get_send_unacked();
        let send_next: SeqNumber = self.sender.get_send_next();
        let mss: u32 = self.mss as u32;
        let rto: Duration = self.rto_calculator.rto();

        send_unacked <= send_next
            && (!self.state.is_synchronized() || self.sender.in_flight() <= self.sender.get_send_window())
            && self.cc.get_cwnd() >= mss
            && self.cc.get_ssthresh() >= mss
            && rto >= TCP_MIN_RTO
            && rto <= TCP_MAX_RTO
            && self.retransmit_deadline.is_some() == self.sender.has_unacked()
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::{
    inetstack::protocols::tcp::{
        segment::TcpHeader,
        SeqNumber,
    },
    runtime::{
        fail::Fail,
        memory::NetBuffer,
    },
};
use ::libc::ENOBUFS;
use ::std::{
    collections::VecDeque,
    fmt,
    time::{
        Duration,
        Instant,
    },
};

/// Entry of the retransmission queue.
#[derive(Clone)]
pub struct UnackedSegment {
    /// Sequence number of the first octet covered by this segment (the SYN if there is one).
    pub seq: SeqNumber,
    pub bytes: Option<NetBuffer>,
    pub syn: bool,
    pub fin: bool,
    // Set to `None` on retransmission to implement Karn's algorithm.
    pub initial_tx: Option<Instant>,
}

/// What an acceptable new ACK removed from the retransmission queue.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct AckedData {
    /// Octets of sequence space newly acknowledged, SYN and FIN included.
    pub bytes_acked: u32,
    /// Round-trip time of the newest fully acknowledged segment, unless it was retransmitted.
    pub rtt_sample: Option<Duration>,
    pub fin_acked: bool,
}

pub struct Sender {
    //
    // Send Sequence Space:
    //
    //                     |<-----------------send window size----------------->|
    //                     |                                                    |
    //                send_unacked               send_next         send_unacked + send window
    //                     v                         v                          v
    // ... ----------------|-------------------------|--------------------------|--------------------------------
    //       acknowledged  |      unacknowledged     |     allowed to send      |  future sequence number space
    //
    // In RFC 793 terminology, send_unacked is SND.UNA, send_next is SND.NXT, and "send window" is SND.WND.
    //
    send_unacked: SeqNumber,
    send_next: SeqNumber,
    send_window: u32,
    send_window_last_update_seq: SeqNumber, // SND.WL1
    send_window_last_update_ack: SeqNumber, // SND.WL2
    iss: SeqNumber,

    // Queue of unacknowledged sent data.  RFC 793 calls this the "retransmission queue".
    unacked_queue: VecDeque<UnackedSegment>,

    // User data we do not yet have window to send.
    unsent_queue: VecDeque<NetBuffer>,
    unsent_bytes: usize,
    send_buffer_size: usize,

    fin_queued: bool,
    fin_sent: bool,
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Sender")
            .field("send_unacked", &self.send_unacked)
            .field("send_next", &self.send_next)
            .field("send_window", &self.send_window)
            .field("unacked_segments", &self.unacked_queue.len())
            .field("unsent_bytes", &self.unsent_bytes)
            .field("fin_queued", &self.fin_queued)
            .field("fin_sent", &self.fin_sent)
            .finish()
    }
}

impl Sender {
    pub fn new(iss: SeqNumber, send_buffer_size: usize) -> Self {
        Self {
            send_unacked: iss,
            send_next: iss,
            send_window: 0,
            send_window_last_update_seq: SeqNumber::from(0),
            send_window_last_update_ack: iss,
            iss,
            unacked_queue: VecDeque::new(),
            unsent_queue: VecDeque::new(),
            unsent_bytes: 0,
            send_buffer_size,
            fin_queued: false,
            fin_sent: false,
        }
    }

    pub fn get_iss(&self) -> SeqNumber {
        self.iss
    }

    pub fn get_send_unacked(&self) -> SeqNumber {
        self.send_unacked
    }

    pub fn get_send_next(&self) -> SeqNumber {
        self.send_next
    }

    pub fn get_send_window(&self) -> u32 {
        self.send_window
    }

    /// Octets sent but not yet acknowledged.
    pub fn in_flight(&self) -> u32 {
        self.send_next - self.send_unacked
    }

    /// Room left in the peer's advertised window. Zero means the window is closed.
    pub fn usable_send_window(&self) -> u32 {
        self.send_window.saturating_sub(self.in_flight())
    }

    /// Room left in the send buffer, which holds both unsent and unacknowledged data.
    pub fn buffer_space(&self) -> usize {
        self.send_buffer_size
            .saturating_sub(self.unsent_bytes + self.in_flight() as usize)
    }

    pub fn unsent_bytes(&self) -> usize {
        self.unsent_bytes
    }

    pub fn has_unacked(&self) -> bool {
        !self.unacked_queue.is_empty()
    }

    pub fn unacked_segments(&self) -> impl Iterator<Item = &UnackedSegment> {
        self.unacked_queue.iter()
    }

    /// Appends user data to the send buffer.
    pub fn enqueue(&mut self, buf: NetBuffer) -> Result<(), Fail> {
        if buf.len() > self.buffer_space() {
            let cause: String = format!(
                "send buffer full (len={}, space={})",
                buf.len(),
                self.buffer_space()
            );
            debug!("enqueue(): {}", cause);
            return Err(Fail::new(ENOBUFS, &cause));
        }
        self.unsent_bytes += buf.len();
        self.unsent_queue.push_back(buf);
        Ok(())
    }

    /// Takes up to `max_bytes` of unsent data off the front of the send buffer, coalescing queued buffers.
    pub fn pop_unsent(&mut self, max_bytes: usize) -> Result<Option<NetBuffer>, Fail> {
        let nbytes: usize = max_bytes.min(self.unsent_bytes);
        if nbytes == 0 {
            return Ok(None);
        }

        // Fast path: the head buffer alone fills the segment.
        let front_len: usize = self.unsent_queue.front().map_or(0, |buf| buf.len());
        if front_len >= nbytes {
            let segment: NetBuffer = if front_len > nbytes {
                match self.unsent_queue.front_mut() {
                    Some(front) => front.split_front(nbytes)?,
                    None => return Ok(None),
                }
            } else {
                match self.unsent_queue.pop_front() {
                    Some(buf) => buf,
                    None => return Ok(None),
                }
            };
            self.unsent_bytes -= nbytes;
            return Ok(Some(segment));
        }

        let mut segment: NetBuffer = NetBuffer::new(nbytes);
        while segment.len() < nbytes {
            let wanted: usize = nbytes - segment.len();
            let front: &mut NetBuffer = match self.unsent_queue.front_mut() {
                Some(front) => front,
                None => break,
            };
            if front.len() <= wanted {
                segment.put(&front[..])?;
                self.unsent_queue.pop_front();
            } else {
                segment.put(&front[..wanted])?;
                front.pull(wanted)?;
            }
        }
        self.unsent_bytes -= segment.len();
        Ok(Some(segment))
    }

    pub fn queue_fin(&mut self) {
        self.fin_queued = true;
    }

    pub fn fin_queued(&self) -> bool {
        self.fin_queued
    }

    /// Checks if a FIN should go out: it was requested and all data ahead of it has been sent.
    pub fn fin_pending(&self) -> bool {
        self.fin_queued && !self.fin_sent && self.unsent_bytes == 0
    }

    /// Checks if our FIN has been sent and acknowledged.
    pub fn fin_acked(&self) -> bool {
        self.fin_sent && self.send_unacked == self.send_next
    }

    /// Records a segment that was just sent for the first time and advances SND.NXT past it.
    pub fn record_sent(&mut self, segment: UnackedSegment) {
        let len: u32 = Self::seq_len(&segment);
        debug_assert_eq!(segment.seq, self.send_next);
        if segment.fin {
            self.fin_sent = true;
        }
        self.send_next += len;
        self.unacked_queue.push_back(segment);
    }

    /// Returns a copy of the oldest unacknowledged segment for retransmission, excluding it from RTT sampling.
    pub fn retransmit_head(&mut self) -> Option<UnackedSegment> {
        let head: &mut UnackedSegment = self.unacked_queue.front_mut()?;
        head.initial_tx = None;
        Some(head.clone())
    }

    /// Updates SND.UNA on an ACK that lies in `(SND.UNA, SND.NXT]` and drops everything it covers from the
    /// retransmission queue.
    pub fn remove_acknowledged(&mut self, ack_num: SeqNumber, now: Instant) -> Result<AckedData, Fail> {
        debug_assert!(self.send_unacked < ack_num && ack_num <= self.send_next);
        let mut acked: AckedData = AckedData {
            bytes_acked: ack_num - self.send_unacked,
            ..Default::default()
        };

        while let Some(head) = self.unacked_queue.front_mut() {
            let end: SeqNumber = head.seq + Self::seq_len(head);
            if end <= ack_num {
                // Fully acknowledged.
                acked.rtt_sample = head.initial_tx.map(|sent| now.saturating_duration_since(sent));
                acked.fin_acked |= head.fin;
                self.unacked_queue.pop_front();
            } else {
                // Partially acknowledged. Trim what the peer already has.
                let mut covered: u32 = ack_num - head.seq;
                if covered == 0 {
                    break;
                }
                if head.syn {
                    head.syn = false;
                    covered -= 1;
                }
                if let Some(bytes) = head.bytes.as_mut() {
                    bytes.pull(covered as usize)?;
                }
                head.seq = ack_num;
                break;
            }
        }

        self.send_unacked = ack_num;
        Ok(acked)
    }

    /// Sets the send window from the segment that completed the handshake.
    pub fn init_send_window(&mut self, header: &TcpHeader) {
        self.send_window = header.window_size as u32;
        self.send_window_last_update_seq = header.seq_num;
        self.send_window_last_update_ack = header.ack_num;
    }

    /// Updates SND.WND unless the segment is older than the one that last updated it (RFC 793, page 72). Returns
    /// true when the window changed.
    pub fn update_send_window(&mut self, header: &TcpHeader) -> bool {
        if self.send_window_last_update_seq < header.seq_num
            || (self.send_window_last_update_seq == header.seq_num
                && self.send_window_last_update_ack <= header.ack_num)
        {
            let old_window: u32 = self.send_window;
            self.send_window = header.window_size as u32;
            self.send_window_last_update_seq = header.seq_num;
            self.send_window_last_update_ack = header.ack_num;
            if old_window != self.send_window {
                trace!("update_send_window(): {} -> {}", old_window, self.send_window);
                return true;
            }
        }
        false
    }

    fn seq_len(segment: &UnackedSegment) -> u32 {
        let data_len: usize = segment.bytes.as_ref().map_or(0, |bytes| bytes.len());
        data_len as u32 + segment.syn as u32 + segment.fin as u32
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::{
    inetstack::protocols::tcp::SeqNumber,
    runtime::{
        fail::Fail,
        memory::NetBuffer,
        network::consts::TCP_MAX_OUT_OF_ORDER,
    },
};
use ::arrayvec::ArrayVec;
use ::libc::ENOBUFS;
use ::std::collections::VecDeque;

// Receive Sequence Space:
//
//                     |<---------------receive_buffer_size---------------->|
//                     |                                                    |
//                     |                         |<-----receive window----->|
//                read_next               receive_next       receive_next + receive window
//                     v                         v                          v
// ... ----------------|-------------------------|--------------------------|------------------------------
//      read by user   |  received but not read  |    willing to receive    | future sequence number space
//
// In RFC 793 terminology, receive_next is RCV.NXT and "receive window" is RCV.WND.
pub struct Receiver {
    receive_next: SeqNumber,
    irs: SeqNumber,
    capacity: u32,

    // In-order data not yet read by the user.
    recv_queue: VecDeque<NetBuffer>,
    recv_bytes: usize,

    // Segments that arrived ahead of a gap, keyed by their starting sequence number.
    out_of_order: ArrayVec<(SeqNumber, NetBuffer), TCP_MAX_OUT_OF_ORDER>,
    out_of_order_fin: Option<SeqNumber>,
    fin_received: bool,
}

/// Effect of a segment on the receive side.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct Delivered {
    /// Bytes made available to the reader, out-of-order data that was merged included.
    pub bytes: usize,
    /// The FIN was reached in sequence.
    pub fin: bool,
}

impl Receiver {
    pub fn new(capacity: u16) -> Self {
        Self {
            receive_next: SeqNumber::from(0),
            irs: SeqNumber::from(0),
            capacity: capacity as u32,
            recv_queue: VecDeque::new(),
            recv_bytes: 0,
            out_of_order: ArrayVec::new(),
            out_of_order_fin: None,
            fin_received: false,
        }
    }

    /// Synchronizes with the peer's initial sequence number. Its SYN takes up one sequence number.
    pub fn init(&mut self, irs: SeqNumber) {
        self.irs = irs;
        self.receive_next = irs + 1;
    }

    pub fn get_receive_next(&self) -> SeqNumber {
        self.receive_next
    }

    pub fn get_irs(&self) -> SeqNumber {
        self.irs
    }

    pub fn fin_received(&self) -> bool {
        self.fin_received
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Window we advertise.
    pub fn window(&self) -> u32 {
        self.capacity.saturating_sub(self.recv_bytes as u32)
    }

    pub fn out_of_order_segments(&self) -> usize {
        self.out_of_order.len()
    }

    /// Segment acceptance test of RFC 793, page 69.
    ///
    /// ```text
    /// Segment Receive  Test
    /// Length  Window
    /// ------- -------  -------------------------------------------
    ///   0       0     SEG.SEQ = RCV.NXT
    ///   0      >0     RCV.NXT =< SEG.SEQ < RCV.NXT+RCV.WND
    ///  >0       0     not acceptable
    ///  >0      >0     RCV.NXT =< SEG.SEQ < RCV.NXT+RCV.WND
    ///              or RCV.NXT =< SEG.SEQ+SEG.LEN-1 < RCV.NXT+RCV.WND
    /// ```
    pub fn is_acceptable(&self, seg_seq: SeqNumber, seg_len: u32) -> bool {
        let window: u32 = self.window();
        let window_end: SeqNumber = self.receive_next + window;
        match (seg_len, window) {
            (0, 0) => seg_seq == self.receive_next,
            (0, _) => seg_seq.is_within(self.receive_next, window_end),
            (_, 0) => false,
            (_, _) => {
                seg_seq.is_within(self.receive_next, window_end)
                    || (seg_seq + (seg_len - 1)).is_within(self.receive_next, window_end)
            },
        }
    }

    /// Takes a segment that was trimmed to the receive window. In-sequence data goes to the reader along with any
    /// queued segment it makes contiguous, anything else waits in the out-of-order queue.
    pub fn receive(&mut self, seg_start: SeqNumber, data: NetBuffer, fin: bool) -> Result<Delivered, Fail> {
        if self.fin_received {
            return Ok(Delivered::default());
        }

        if seg_start != self.receive_next {
            debug_assert!(seg_start > self.receive_next);
            if fin {
                self.out_of_order_fin = Some(seg_start + data.len() as u32);
            }
            if !data.is_empty() {
                self.store_out_of_order(seg_start, data)?;
            }
            return Ok(Delivered::default());
        }

        let mut delivered: Delivered = Delivered {
            bytes: self.push(data),
            fin: false,
        };
        if fin {
            self.out_of_order_fin = Some(self.receive_next);
        }

        // Merge queued segments that are now in sequence.
        while let Some(index) = self
            .out_of_order
            .iter()
            .position(|(start, _)| *start <= self.receive_next)
        {
            let (start, mut buf): (SeqNumber, NetBuffer) = self.out_of_order.remove(index);
            let end: SeqNumber = start + buf.len() as u32;
            if end > self.receive_next {
                buf.pull((self.receive_next - start) as usize)?;
                delivered.bytes += self.push(buf);
            }
        }

        if self.out_of_order_fin == Some(self.receive_next) {
            self.receive_next += 1;
            self.fin_received = true;
            self.out_of_order.clear();
            delivered.fin = true;
        }

        Ok(delivered)
    }

    /// Pops up to `size` bytes of in-order data, or everything at the head of the queue if no size is given.
    pub fn pop(&mut self, size: Option<usize>) -> Result<Option<NetBuffer>, Fail> {
        let front_len: usize = match self.recv_queue.front() {
            Some(front) => front.len(),
            None => return Ok(None),
        };
        let split: Option<usize> = size.filter(|size| *size < front_len);
        let buf: NetBuffer = match (split, self.recv_queue.front_mut()) {
            (Some(size), Some(front)) => front.split_front(size)?,
            _ => match self.recv_queue.pop_front() {
                Some(buf) => buf,
                None => return Ok(None),
            },
        };
        self.recv_bytes -= buf.len();
        Ok(Some(buf))
    }

    fn push(&mut self, buf: NetBuffer) -> usize {
        let nbytes: usize = buf.len();
        if nbytes > 0 {
            self.receive_next += nbytes as u32;
            self.recv_bytes += nbytes;
            self.recv_queue.push_back(buf);
        }
        nbytes
    }

    fn store_out_of_order(&mut self, start: SeqNumber, buf: NetBuffer) -> Result<(), Fail> {
        let end: SeqNumber = start + buf.len() as u32;
        // Drop exact or contained duplicates.
        if self
            .out_of_order
            .iter()
            .any(|(s, b)| *s <= start && end <= *s + b.len() as u32)
        {
            trace!("store_out_of_order(): duplicate segment at {}", start);
            return Ok(());
        }
        if self.out_of_order.try_push((start, buf)).is_err() {
            let cause: String = format!("out-of-order queue full (seq={})", start);
            debug!("store_out_of_order(): {}", cause);
            return Err(Fail::new(ENOBUFS, &cause));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Delivered,
        Receiver,
    };
    use crate::{
        inetstack::protocols::tcp::SeqNumber,
        runtime::{
            memory::NetBuffer,
            network::consts::TCP_MAX_OUT_OF_ORDER,
        },
    };
    use ::anyhow::Result;

    fn receiver(irs: u32, capacity: u16) -> Receiver {
        let mut receiver: Receiver = Receiver::new(capacity);
        receiver.init(SeqNumber::from(irs));
        receiver
    }

    #[test]
    fn acceptance_test_cases() -> Result<()> {
        let mut rx: Receiver = receiver(99, 100);
        let nxt: SeqNumber = SeqNumber::from(100);

        // Zero length, open window.
        crate::ensure_eq!(rx.is_acceptable(nxt, 0), true);
        crate::ensure_eq!(rx.is_acceptable(nxt + 99, 0), true);
        crate::ensure_eq!(rx.is_acceptable(nxt + 100, 0), false);
        crate::ensure_eq!(rx.is_acceptable(nxt - 1, 0), false);

        // Data, open window: either end inside.
        crate::ensure_eq!(rx.is_acceptable(nxt - 5, 10), true);
        crate::ensure_eq!(rx.is_acceptable(nxt + 95, 10), true);
        crate::ensure_eq!(rx.is_acceptable(nxt - 10, 10), false);

        // Close the window.
        rx.receive(nxt, NetBuffer::from_slice(&[0; 100]), false)?;
        let nxt: SeqNumber = rx.get_receive_next();
        crate::ensure_eq!(rx.window(), 0);
        crate::ensure_eq!(rx.is_acceptable(nxt, 0), true);
        crate::ensure_eq!(rx.is_acceptable(nxt - 1, 0), false);
        crate::ensure_eq!(rx.is_acceptable(nxt, 1), false);
        Ok(())
    }

    #[test]
    fn acceptance_across_wrap() -> Result<()> {
        let rx: Receiver = receiver(u32::MAX - 10, 100);
        crate::ensure_eq!(rx.is_acceptable(SeqNumber::from(20), 5), true);
        crate::ensure_eq!(rx.is_acceptable(SeqNumber::from(u32::MAX - 20), 5), false);
        Ok(())
    }

    #[test]
    fn out_of_order_merge() -> Result<()> {
        let mut rx: Receiver = receiver(0, 1000);
        let base: SeqNumber = SeqNumber::from(1);

        crate::ensure_eq!(
            rx.receive(base + 10, NetBuffer::from_slice(b"klmno"), true)?,
            Delivered::default()
        );
        crate::ensure_eq!(
            rx.receive(base + 5, NetBuffer::from_slice(b"fghij"), false)?,
            Delivered::default()
        );
        crate::ensure_eq!(rx.out_of_order_segments(), 2);
        crate::ensure_eq!(rx.pop(None)?.is_none(), true);

        let delivered: Delivered = rx.receive(base, NetBuffer::from_slice(b"abcde"), false)?;
        crate::ensure_eq!(delivered, Delivered { bytes: 15, fin: true });
        crate::ensure_eq!(rx.get_receive_next(), base + 16);
        crate::ensure_eq!(rx.out_of_order_segments(), 0);

        let mut read: Vec<u8> = Vec::new();
        while let Some(buf) = rx.pop(None)? {
            read.extend_from_slice(&buf);
        }
        crate::ensure_eq!(&read[..], &b"abcdefghijklmno"[..]);
        crate::ensure_eq!(rx.fin_received(), true);
        Ok(())
    }

    /// Overlapping retransmissions are trimmed when merged.
    #[test]
    fn overlapping_out_of_order() -> Result<()> {
        let mut rx: Receiver = receiver(0, 1000);
        let base: SeqNumber = SeqNumber::from(1);
        rx.receive(base + 4, NetBuffer::from_slice(b"efgh"), false)?;
        rx.receive(base + 2, NetBuffer::from_slice(b"cdef"), false)?;
        let delivered: Delivered = rx.receive(base, NetBuffer::from_slice(b"ab"), false)?;
        crate::ensure_eq!(delivered.bytes, 8);

        let Some(buf) = rx.pop(Some(3))? else {
            anyhow::bail!("expected data");
        };
        crate::ensure_eq!(&buf[..], &b"ab"[..]);
        let mut rest: Vec<u8> = Vec::new();
        while let Some(buf) = rx.pop(None)? {
            rest.extend_from_slice(&buf);
        }
        crate::ensure_eq!(&rest[..], &b"cdefgh"[..]);
        Ok(())
    }

    #[test]
    fn out_of_order_queue_full() -> Result<()> {
        let mut rx: Receiver = receiver(0, 8192);
        let base: SeqNumber = SeqNumber::from(1);
        for i in 0..TCP_MAX_OUT_OF_ORDER {
            rx.receive(base + (10 + 10 * i as u32), NetBuffer::from_slice(&[1; 5]), false)?;
        }
        match rx.receive(base + 1000, NetBuffer::from_slice(&[1; 5]), false) {
            Ok(_) => anyhow::bail!("out-of-order queue should be full"),
            Err(e) => crate::ensure_eq!(e.errno, libc::ENOBUFS),
        }
        // A duplicate of a queued segment is not an error.
        rx.receive(base + 10, NetBuffer::from_slice(&[1; 5]), false)?;
        Ok(())
    }

    #[test]
    fn window_shrinks_and_reopens() -> Result<()> {
        let mut rx: Receiver = receiver(0, 10);
        rx.receive(SeqNumber::from(1), NetBuffer::from_slice(&[7; 6]), false)?;
        crate::ensure_eq!(rx.window(), 4);
        rx.pop(Some(4))?;
        crate::ensure_eq!(rx.window(), 8);
        Ok(())
    }
}

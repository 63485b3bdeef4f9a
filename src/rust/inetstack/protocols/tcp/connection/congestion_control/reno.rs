// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Classic Reno congestion control: slow start and congestion avoidance from RFC 5681, fast retransmit and fast
// recovery from RFC 5681 Section 3.2.

use super::{
    CongestionControl,
    FastRetransmitRecovery,
    SlowStartCongestionAvoidance,
};
use crate::runtime::network::consts::TCP_DUP_ACK_THRESHOLD;
use ::std::cmp::{
    max,
    min,
};

#[derive(Debug)]
pub struct Reno {
    mss: u32,
    // Congestion window: max number of bytes that may be in flight to prevent congestion.
    cwnd: u32,
    // Size of cwnd at which slow start gives way to congestion avoidance.
    ssthresh: u32,
    duplicate_ack_count: u32,
    in_fast_recovery: bool,
}

impl CongestionControl for Reno {
    fn new(mss: usize, initial_ssthresh: u32) -> Box<dyn CongestionControl> {
        let mss: u32 = mss as u32;
        Box::new(Self {
            mss,
            cwnd: mss,
            ssthresh: max(initial_ssthresh, mss),
            duplicate_ack_count: 0,
            in_fast_recovery: false,
        })
    }
}

impl SlowStartCongestionAvoidance for Reno {
    fn get_cwnd(&self) -> u32 {
        self.cwnd
    }

    fn get_ssthresh(&self) -> u32 {
        self.ssthresh
    }

    fn on_ack_received(&mut self, bytes_acked: u32) {
        self.duplicate_ack_count = 0;

        if self.in_fast_recovery {
            // Deflate the window inflated by duplicate ACKs.
            self.in_fast_recovery = false;
            self.cwnd = self.ssthresh;
        } else if self.cwnd < self.ssthresh {
            // Slow start.
            self.cwnd = self.cwnd.saturating_add(min(bytes_acked, self.mss));
        } else {
            // Congestion avoidance.
            self.cwnd = self.cwnd.saturating_add(max(self.mss * self.mss / self.cwnd, 1));
        }
    }

    fn on_rto(&mut self) {
        self.ssthresh = max(self.cwnd / 2, self.mss);
        self.cwnd = self.mss;
        self.duplicate_ack_count = 0;
        self.in_fast_recovery = false;
    }
}

impl FastRetransmitRecovery for Reno {
    fn get_duplicate_ack_count(&self) -> u32 {
        self.duplicate_ack_count
    }

    fn in_fast_recovery(&self) -> bool {
        self.in_fast_recovery
    }

    fn on_duplicate_ack(&mut self, flight_size: u32) -> bool {
        self.duplicate_ack_count += 1;

        if self.in_fast_recovery {
            // Each further duplicate means another segment has left the network.
            self.cwnd = self.cwnd.saturating_add(self.mss);
            false
        } else if self.duplicate_ack_count == TCP_DUP_ACK_THRESHOLD {
            self.ssthresh = max(flight_size / 2, self.mss);
            self.cwnd = self.ssthresh + TCP_DUP_ACK_THRESHOLD * self.mss;
            self.in_fast_recovery = true;
            true
        } else {
            false
        }
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::runtime::network::consts::{
    TCP_MAX_RTO,
    TCP_MIN_RTO,
};
use ::std::time::Duration;

// TCP Retransmission Timeout (RTO) Calculator.
// See RFC 6298 for details. All arithmetic is done in whole milliseconds.

#[derive(Debug)]
pub struct RtoCalculator {
    // Smoothed round-trip time.
    srtt: u64,

    // Round-trip time variation.
    rttvar: u64,

    // Retransmission timeout.
    rto: u64,

    // Whether a RTT (round-trip-time) sample has been received yet.
    received_sample: bool,
}

impl RtoCalculator {
    /// Initializes an RTO Calculator. SRTT and RTTVAR are meaningless until the first sample arrives.
    pub fn new(initial_rto: Duration) -> Self {
        let mut calculator: Self = Self {
            srtt: 0,
            rttvar: 0,
            rto: 0,
            received_sample: false,
        };
        calculator.update_rto(initial_rto.as_millis() as u64);
        calculator
    }

    /// Adds an RTT sample to the calculator.
    pub fn add_sample(&mut self, rtt: Duration) {
        let rtt: u64 = rtt.as_millis() as u64;

        if !self.received_sample {
            // RFC 6298 Section 2.2.
            self.srtt = rtt;
            self.rttvar = rtt / 2;
            self.received_sample = true;
        } else {
            // RFC 6298 Section 2.3, with alpha = 1/8 and beta = 1/4.
            self.rttvar = (3 * self.rttvar + self.srtt.abs_diff(rtt)) / 4;
            self.srtt = (7 * self.srtt + rtt) / 8;
        }

        self.update_rto(self.srtt + 4 * self.rttvar);
    }

    /// Keeps the RTO within [TCP_MIN_RTO, TCP_MAX_RTO].
    fn update_rto(&mut self, new_rto: u64) {
        self.rto = new_rto.clamp(TCP_MIN_RTO.as_millis() as u64, TCP_MAX_RTO.as_millis() as u64);
    }

    /// Performs an exponential "back off" of the RTO (doubles the current timeout).
    pub fn back_off(&mut self) {
        self.update_rto(self.rto.saturating_mul(2));
    }

    /// Gets the current RTO value.
    pub fn rto(&self) -> Duration {
        Duration::from_millis(self.rto)
    }

    pub fn srtt(&self) -> Duration {
        Duration::from_millis(self.srtt)
    }

    pub fn rttvar(&self) -> Duration {
        Duration::from_millis(self.rttvar)
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod reno;

use ::std::fmt::Debug;

pub use self::reno::Reno;

pub trait SlowStartCongestionAvoidance {
    fn get_cwnd(&self) -> u32;

    fn get_ssthresh(&self) -> u32;

    // Called for every ACK that advances the left edge of the send window by `bytes_acked` bytes.
    fn on_ack_received(&mut self, bytes_acked: u32);

    // Called immediately before retransmit after RTO.
    fn on_rto(&mut self);
}

pub trait FastRetransmitRecovery
where
    Self: SlowStartCongestionAvoidance,
{
    fn get_duplicate_ack_count(&self) -> u32;

    fn in_fast_recovery(&self) -> bool;

    // Called for every duplicate ACK. Returns true when the oldest unacknowledged segment should be retransmitted
    // right away.
    fn on_duplicate_ack(&mut self, flight_size: u32) -> bool;
}

pub trait CongestionControl: SlowStartCongestionAvoidance + FastRetransmitRecovery + Debug {
    fn new(mss: usize, initial_ssthresh: u32) -> Box<dyn CongestionControl>
    where
        Self: Sized;
}

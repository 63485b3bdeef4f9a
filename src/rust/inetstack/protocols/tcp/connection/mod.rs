// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod congestion_control;
mod ctrlblk;
mod receiver;
mod rto;
mod sender;

use crate::inetstack::protocols::tcp::SeqNumber;
use ::std::{
    fmt,
    net::SocketAddrV4,
    time::Duration,
};

pub use self::ctrlblk::ControlBlock;

//======================================================================================================================
// Structures
//======================================================================================================================

/// TCP connection states of RFC 793.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Snapshot of the variables of one connection, for diagnostics.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionInfo {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    pub state: State,
    pub snd_una: SeqNumber,
    pub snd_nxt: SeqNumber,
    pub snd_wnd: u32,
    pub iss: SeqNumber,
    pub rcv_nxt: SeqNumber,
    pub rcv_wnd: u32,
    pub irs: SeqNumber,
    pub mss: usize,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub srtt: Duration,
    pub rttvar: Duration,
    pub rto: Duration,
    pub unacked_segments: usize,
    pub out_of_order_segments: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl State {
    pub fn state_name(&self) -> &'static str {
        match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN_SENT",
            State::SynRcvd => "SYN_RCVD",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN_WAIT_1",
            State::FinWait2 => "FIN_WAIT_2",
            State::CloseWait => "CLOSE_WAIT",
            State::Closing => "CLOSING",
            State::LastAck => "LAST_ACK",
            State::TimeWait => "TIME_WAIT",
        }
    }

    /// Checks if both initial sequence numbers are known and acknowledged.
    pub fn is_synchronized(&self) -> bool {
        !matches!(self, State::Closed | State::Listen | State::SynSent | State::SynRcvd)
    }

    /// Checks if the state counts towards the established connections gauge.
    pub fn is_established(&self) -> bool {
        matches!(self, State::Established | State::CloseWait)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} -> {} {} snd_una={} snd_nxt={} snd_wnd={} iss={} rcv_nxt={} rcv_wnd={} irs={} mss={} cwnd={} \
             ssthresh={} srtt={}ms rttvar={}ms rto={}ms unacked={} ooo={}",
            self.local,
            self.remote,
            self.state,
            self.snd_una,
            self.snd_nxt,
            self.snd_wnd,
            self.iss,
            self.rcv_nxt,
            self.rcv_wnd,
            self.irs,
            self.mss,
            self.cwnd,
            self.ssthresh,
            self.srtt.as_millis(),
            self.rttvar.as_millis(),
            self.rto.as_millis(),
            self.unacked_segments,
            self.out_of_order_segments,
        )
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::network::consts::{
    DEFAULT_MSS,
    DEFAULT_RECEIVE_WINDOW_SIZE,
    DEFAULT_SEND_BUFFER_SIZE,
    MAX_MSS,
    MIN_MSS,
    TCP_INITIAL_RTO,
    TCP_INITIAL_SSTHRESH,
    TCP_KEEPALIVE_INTERVAL,
    TCP_KEEPALIVE_PROBES,
    TCP_KEEPALIVE_TIME,
    TCP_MAX_RETRIES,
    TCP_MAX_RTO,
    TCP_MIN_RTO,
    TCP_MSL,
};
use ::std::time::Duration;

//==============================================================================
// Structures
//==============================================================================

/// TCP Configuration Descriptor
#[derive(Clone, Debug)]
pub struct TcpConfig {
    /// Maximum Segment Size
    mss: usize,
    /// Receive Window Size
    receive_window_size: u16,
    /// Send Buffer Size
    send_buffer_size: usize,
    /// Retransmission Timeout Before the First RTT Sample
    initial_rto: Duration,
    /// Number of Retransmissions Before Aborting a Connection
    max_retries: usize,
    /// Maximum Segment Lifetime
    msl: Duration,
    /// Initial Slow Start Threshold
    initial_ssthresh: u32,
    /// Disable Nagle's Algorithm on New Connections?
    nodelay: bool,
    /// Enable Keepalive Probes on New Connections?
    keepalive: bool,
    /// Idle Time Before the First Keepalive Probe
    keepalive_time: Duration,
    /// Interval Between Keepalive Probes
    keepalive_interval: Duration,
    /// Number of Unanswered Keepalive Probes Before Aborting
    keepalive_probes: usize,
    /// Offload Checksum to Hardware When Receiving?
    rx_checksum_offload: bool,
    /// Offload Checksum to Hardware When Sending?
    tx_checksum_offload: bool,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for TCP Configuration Descriptor
impl TcpConfig {
    /// Creates a TCP Configuration Descriptor.
    pub fn new(
        mss: Option<usize>,
        receive_window_size: Option<u16>,
        initial_rto: Option<Duration>,
        max_retries: Option<usize>,
        msl: Option<Duration>,
        rx_checksum_offload: Option<bool>,
        tx_checksum_offload: Option<bool>,
    ) -> Self {
        let mut options = Self::default();

        if let Some(value) = mss {
            options = options.set_mss(value);
        }
        if let Some(value) = receive_window_size {
            options = options.set_receive_window_size(value);
        }
        if let Some(value) = initial_rto {
            options = options.set_initial_rto(value);
        }
        if let Some(value) = max_retries {
            options = options.set_max_retries(value);
        }
        if let Some(value) = msl {
            options = options.set_msl(value);
        }
        if let Some(value) = rx_checksum_offload {
            options.rx_checksum_offload = value;
        }
        if let Some(value) = tx_checksum_offload {
            options.tx_checksum_offload = value;
        }

        options
    }

    /// Gets the maximum segment size in the target [TcpConfig].
    pub fn get_mss(&self) -> usize {
        self.mss
    }

    /// Gets the receive window size in the target [TcpConfig].
    pub fn get_receive_window_size(&self) -> u16 {
        self.receive_window_size
    }

    /// Gets the send buffer size in the target [TcpConfig].
    pub fn get_send_buffer_size(&self) -> usize {
        self.send_buffer_size
    }

    /// Gets the initial retransmission timeout in the target [TcpConfig].
    pub fn get_initial_rto(&self) -> Duration {
        self.initial_rto
    }

    /// Gets the number of retransmissions tolerated before a connection is aborted.
    pub fn get_max_retries(&self) -> usize {
        self.max_retries
    }

    /// Gets the maximum segment lifetime in the target [TcpConfig].
    pub fn get_msl(&self) -> Duration {
        self.msl
    }

    /// Gets the TIME_WAIT duration, which is twice the maximum segment lifetime.
    pub fn get_time_wait_timeout(&self) -> Duration {
        2 * self.msl
    }

    /// Gets the initial slow start threshold in the target [TcpConfig].
    pub fn get_initial_ssthresh(&self) -> u32 {
        self.initial_ssthresh
    }

    pub fn get_nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn get_keepalive(&self) -> bool {
        self.keepalive
    }

    pub fn get_keepalive_time(&self) -> Duration {
        self.keepalive_time
    }

    pub fn get_keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    pub fn get_keepalive_probes(&self) -> usize {
        self.keepalive_probes
    }

    /// Gets the RX hardware checksum offload option in the target [TcpConfig].
    pub fn get_rx_checksum_offload(&self) -> bool {
        self.rx_checksum_offload
    }

    /// Gets the TX hardware checksum offload option in the target [TcpConfig].
    pub fn get_tx_checksum_offload(&self) -> bool {
        self.tx_checksum_offload
    }

    /// Sets the maximum segment size in the target [TcpConfig]. Values outside of the supported range are clamped.
    pub fn set_mss(mut self, value: usize) -> Self {
        self.mss = value.clamp(MIN_MSS, MAX_MSS);
        self
    }

    /// Sets the receive window size in the target [TcpConfig].
    pub fn set_receive_window_size(mut self, value: u16) -> Self {
        assert!(value > 0);
        self.receive_window_size = value;
        self
    }

    /// Sets the send buffer size in the target [TcpConfig].
    pub fn set_send_buffer_size(mut self, value: usize) -> Self {
        assert!(value > 0);
        self.send_buffer_size = value;
        self
    }

    /// Sets the initial retransmission timeout in the target [TcpConfig].
    pub fn set_initial_rto(mut self, value: Duration) -> Self {
        self.initial_rto = value.clamp(TCP_MIN_RTO, TCP_MAX_RTO);
        self
    }

    /// Sets the number of retransmissions tolerated before a connection is aborted.
    pub fn set_max_retries(mut self, value: usize) -> Self {
        assert!(value > 0);
        self.max_retries = value;
        self
    }

    /// Sets the maximum segment lifetime in the target [TcpConfig].
    pub fn set_msl(mut self, value: Duration) -> Self {
        self.msl = value;
        self
    }

    /// Sets the initial slow start threshold. It never goes below one segment.
    pub fn set_initial_ssthresh(mut self, value: u32) -> Self {
        self.initial_ssthresh = value;
        self
    }

    pub fn set_nodelay(mut self, value: bool) -> Self {
        self.nodelay = value;
        self
    }

    pub fn set_rx_checksum_offload(mut self, value: bool) -> Self {
        self.rx_checksum_offload = value;
        self
    }

    pub fn set_tx_checksum_offload(mut self, value: bool) -> Self {
        self.tx_checksum_offload = value;
        self
    }

    /// Sets the keepalive parameters. `None` leaves the corresponding value untouched.
    pub fn set_keepalive(
        mut self,
        enabled: bool,
        time: Option<Duration>,
        interval: Option<Duration>,
        probes: Option<usize>,
    ) -> Self {
        self.keepalive = enabled;
        if let Some(time) = time {
            assert!(time > Duration::ZERO);
            self.keepalive_time = time;
        }
        if let Some(interval) = interval {
            assert!(interval > Duration::ZERO);
            self.keepalive_interval = interval;
        }
        if let Some(probes) = probes {
            self.keepalive_probes = probes;
        }
        self
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Default Trait Implementation for TCP Configuration Descriptor
impl Default for TcpConfig {
    /// Creates a TCP Configuration Descriptor with the default values.
    fn default() -> Self {
        TcpConfig {
            mss: DEFAULT_MSS,
            receive_window_size: DEFAULT_RECEIVE_WINDOW_SIZE,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            initial_rto: TCP_INITIAL_RTO,
            max_retries: TCP_MAX_RETRIES,
            msl: TCP_MSL,
            initial_ssthresh: TCP_INITIAL_SSTHRESH,
            nodelay: false,
            keepalive: false,
            keepalive_time: TCP_KEEPALIVE_TIME,
            keepalive_interval: TCP_KEEPALIVE_INTERVAL,
            keepalive_probes: TCP_KEEPALIVE_PROBES,
            rx_checksum_offload: false,
            tx_checksum_offload: false,
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::time::Duration;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Minimum MSS Parameter for TCP
pub const MIN_MSS: usize = 536;

/// Default MSS Parameter for TCP. Option negotiation is not performed, so this is also the largest MSS we use.
pub const DEFAULT_MSS: usize = 1460;

/// Maximum MSS Parameter for TCP
pub const MAX_MSS: usize = DEFAULT_MSS;

/// Default receive window advertised by a new connection.
pub const DEFAULT_RECEIVE_WINDOW_SIZE: u16 = 8192;

/// Default send buffer size of a new connection.
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 65535;

/// Retransmission timeout used before the first RTT sample is taken.
pub const TCP_INITIAL_RTO: Duration = Duration::from_millis(3000);

/// Lower bound of the retransmission timeout.
pub const TCP_MIN_RTO: Duration = Duration::from_millis(200);

/// Upper bound of the retransmission timeout.
pub const TCP_MAX_RTO: Duration = Duration::from_millis(60000);

/// Number of retransmissions of a segment before the connection is aborted.
pub const TCP_MAX_RETRIES: usize = 8;

/// Maximum Segment Lifetime. Connections linger in TIME_WAIT for twice this long.
pub const TCP_MSL: Duration = Duration::from_secs(30);

/// Idle time before the first keepalive probe.
pub const TCP_KEEPALIVE_TIME: Duration = Duration::from_millis(7_200_000);

/// Interval between unanswered keepalive probes.
pub const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(75_000);

/// Number of unanswered keepalive probes before the connection is aborted.
pub const TCP_KEEPALIVE_PROBES: usize = 9;

/// Initial slow start threshold.
pub const TCP_INITIAL_SSTHRESH: u32 = 65535;

/// Number of duplicate acknowledgements that trigger a fast retransmit.
pub const TCP_DUP_ACK_THRESHOLD: u32 = 3;

/// Capacity of the out-of-order queue of a connection, in segments.
pub const TCP_MAX_OUT_OF_ORDER: usize = 16;

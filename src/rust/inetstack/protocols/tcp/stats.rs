// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Structures
//======================================================================================================================

/// Engine-wide TCP counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TcpStats {
    /// Connections that went from CLOSED to SYN_SENT.
    pub active_opens: u64,
    /// Connections that went from LISTEN to SYN_RCVD.
    pub passive_opens: u64,
    /// Failed connection attempts, including SYNs refused or dropped for lack of resources.
    pub failed_attempts: u64,
    /// Resets received on ESTABLISHED or CLOSE_WAIT connections.
    pub established_resets: u64,
    /// Connections currently in ESTABLISHED or CLOSE_WAIT. This is a gauge and survives a reset of the counters.
    pub current_established: u64,
    pub segments_sent: u64,
    pub segments_received: u64,
    /// Segments dropped for being malformed.
    pub bad_segments: u64,
    /// Resets sent.
    pub reset_segments: u64,
    pub retrans_segments: u64,
    pub retrans_timeouts: u64,
    pub fast_retrans: u64,
    pub checksum_errors: u64,
    /// Segments dropped for carrying flags that are not valid in the state of the connection.
    pub invalid_segments: u64,
    /// Segments dropped for falling outside of the receive window, or for lack of out-of-order queue space.
    pub out_of_window: u64,
}

/// Per-connection counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConnectionStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub retrans_count: u64,
    pub duplicate_acks: u64,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl TcpStats {
    /// Clears all counters but the established connections gauge.
    pub fn reset(&mut self) {
        *self = Self {
            current_established: self.current_established,
            ..Default::default()
        };
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::TcpStats;
    use ::anyhow::Result;

    #[test]
    fn reset_keeps_gauge() -> Result<()> {
        let mut stats: TcpStats = TcpStats {
            active_opens: 3,
            segments_sent: 10,
            current_established: 2,
            ..Default::default()
        };
        stats.reset();
        crate::ensure_eq!(stats.active_opens, 0);
        crate::ensure_eq!(stats.segments_sent, 0);
        crate::ensure_eq!(stats.current_established, 2);
        Ok(())
    }
}

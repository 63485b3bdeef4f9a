// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::protocols::tcp::SeqNumber,
    runtime::{
        fail::Fail,
        memory::{
            BufferPool,
            NetBuffer,
        },
        network::IpProtocol,
    },
};
use ::libc::EBADMSG;
use ::std::{
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    slice::ChunksExact,
};

//======================================================================================================================
// Constants
//======================================================================================================================

pub const MIN_TCP_HEADER_SIZE: usize = 20;
pub const MAX_TCP_HEADER_SIZE: usize = 60;

//======================================================================================================================
// Structures
//======================================================================================================================

/// TCP header. Options are skipped on receive and never emitted, so the encoded header is always 20 bytes long.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: SeqNumber,
    pub ack_num: SeqNumber,

    // Octet 12: [ data offset in u32s (4 bits) ][ reserved (4 bits) ]
    // The data offset is fixed on serialization and the reserved bits are written as zero and ignored when parsing.

    // Octet 13: [ CWR ] [ ECE ] [ URG ] [ ACK ] [ PSH ] [ RST ] [ SYN ] [ FIN ]
    pub cwr: bool,
    pub ece: bool,
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,

    pub window_size: u16,

    // The checksum is verified separately on receive and computed when serializing.
    pub urgent_pointer: u16,
}

/// Outgoing segment, addressed and ready to be encoded.
#[derive(Clone, Debug)]
pub struct TcpSegment {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    pub header: TcpHeader,
    pub data: Option<NetBuffer>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl TcpHeader {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq_num: SeqNumber::from(0),
            ack_num: SeqNumber::from(0),

            cwr: false,
            ece: false,
            urg: false,
            ack: false,
            psh: false,
            rst: false,
            syn: false,
            fin: false,

            window_size: 0,
            urgent_pointer: 0,
        }
    }

    /// Decodes the header at the front of `buf`, returning it along with the segment payload.
    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8]), Fail> {
        if buf.len() < MIN_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP segment too small"));
        }
        let data_offset: usize = (buf[12] >> 4) as usize * 4;
        if data_offset < MIN_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP data offset too small"));
        }
        if buf.len() < data_offset {
            return Err(Fail::new(EBADMSG, "TCP segment smaller than data offset"));
        }
        let (hdr_buf, data_buf): (&[u8], &[u8]) = buf.split_at(data_offset);

        let flags: u8 = hdr_buf[13];
        let header: TcpHeader = Self {
            src_port: u16::from_be_bytes([hdr_buf[0], hdr_buf[1]]),
            dst_port: u16::from_be_bytes([hdr_buf[2], hdr_buf[3]]),
            seq_num: SeqNumber::from(u32::from_be_bytes([hdr_buf[4], hdr_buf[5], hdr_buf[6], hdr_buf[7]])),
            ack_num: SeqNumber::from(u32::from_be_bytes([hdr_buf[8], hdr_buf[9], hdr_buf[10], hdr_buf[11]])),
            cwr: (flags & (1 << 7)) != 0,
            ece: (flags & (1 << 6)) != 0,
            urg: (flags & (1 << 5)) != 0,
            ack: (flags & (1 << 4)) != 0,
            psh: (flags & (1 << 3)) != 0,
            rst: (flags & (1 << 2)) != 0,
            syn: (flags & (1 << 1)) != 0,
            fin: (flags & (1 << 0)) != 0,
            window_size: u16::from_be_bytes([hdr_buf[14], hdr_buf[15]]),
            urgent_pointer: u16::from_be_bytes([hdr_buf[18], hdr_buf[19]]),
        };

        Ok((header, data_buf))
    }

    /// Encodes the target header into `buf`, computing the checksum over the pseudo-header, the header and `data`
    /// unless checksumming is offloaded.
    pub fn serialize(
        &self,
        buf: &mut [u8; MIN_TCP_HEADER_SIZE],
        src_addr: Ipv4Addr,
        dst_addr: Ipv4Addr,
        data: &[u8],
        tx_checksum_offload: bool,
    ) {
        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[4..8].copy_from_slice(&u32::from(self.seq_num).to_be_bytes());
        buf[8..12].copy_from_slice(&u32::from(self.ack_num).to_be_bytes());
        buf[12] = ((MIN_TCP_HEADER_SIZE / 4) as u8) << 4;
        buf[13] = self.flags();
        buf[14..16].copy_from_slice(&self.window_size.to_be_bytes());
        buf[16] = 0;
        buf[17] = 0;
        buf[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());

        if !tx_checksum_offload {
            let checksum: u16 = tcp_checksum(src_addr, dst_addr, &buf[..], data);
            buf[16..18].copy_from_slice(&checksum.to_be_bytes());
        }
    }

    /// Flags octet of the target header.
    pub fn flags(&self) -> u8 {
        let mut flags: u8 = 0;
        for (bit, set) in [
            self.fin, self.syn, self.rst, self.psh, self.ack, self.urg, self.ece, self.cwr,
        ]
        .iter()
        .enumerate()
        {
            if *set {
                flags |= 1 << bit;
            }
        }
        flags
    }

    /// Checks for flag combinations that no well-behaved peer ever sends.
    pub fn has_valid_flags(&self) -> bool {
        !(self.syn && self.fin) && !(self.syn && self.rst)
    }

    pub fn compute_size(&self) -> usize {
        MIN_TCP_HEADER_SIZE
    }
}

impl TcpSegment {
    /// Amount of sequence space consumed by the target segment.
    pub fn seq_len(&self) -> u32 {
        let data_len: usize = self.data.as_ref().map_or(0, |data| data.len());
        data_len as u32 + self.header.syn as u32 + self.header.fin as u32
    }

    /// Encodes the target segment into a buffer taken from `pool`: headroom is reserved for the header, the payload
    /// is put after it and the header is pushed in front once the checksum is known.
    pub fn encode<P: BufferPool>(&self, pool: &P, tx_checksum_offload: bool) -> Result<NetBuffer, Fail> {
        let payload: &[u8] = match &self.data {
            Some(data) => &data[..],
            None => &[],
        };
        let mut buf: NetBuffer = pool.alloc(MIN_TCP_HEADER_SIZE + payload.len())?;
        buf.reserve(MIN_TCP_HEADER_SIZE)?;
        buf.put(payload)?;

        let mut hdr_buf: [u8; MIN_TCP_HEADER_SIZE] = [0; MIN_TCP_HEADER_SIZE];
        self.header
            .serialize(&mut hdr_buf, *self.local.ip(), *self.remote.ip(), &buf[..], tx_checksum_offload);
        buf.push(&hdr_buf)?;

        Ok(buf)
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Checks the checksum of a received segment. `segment` must hold at least a full header, which
/// [TcpHeader::parse] guarantees.
pub fn verify_checksum(src_addr: Ipv4Addr, dst_addr: Ipv4Addr, segment: &[u8]) -> bool {
    let data_offset: usize = (segment[12] >> 4) as usize * 4;
    let (header, data): (&[u8], &[u8]) = segment.split_at(data_offset);
    let checksum: u16 = u16::from_be_bytes([header[16], header[17]]);
    checksum == tcp_checksum(src_addr, dst_addr, header, data)
}

/// One's complement checksum over the pseudo-header, `header` (with its checksum field taken as zero) and `data`.
fn tcp_checksum(src_addr: Ipv4Addr, dst_addr: Ipv4Addr, header: &[u8], data: &[u8]) -> u16 {
    let mut state: u32 = 0xffff;

    // First, fold in a "pseudo-IP" header of...
    // 1) Source address (4 bytes)
    let src_octets: [u8; 4] = src_addr.octets();
    state += u16::from_be_bytes([src_octets[0], src_octets[1]]) as u32;
    state += u16::from_be_bytes([src_octets[2], src_octets[3]]) as u32;

    // 2) Destination address (4 bytes)
    let dst_octets: [u8; 4] = dst_addr.octets();
    state += u16::from_be_bytes([dst_octets[0], dst_octets[1]]) as u32;
    state += u16::from_be_bytes([dst_octets[2], dst_octets[3]]) as u32;

    // 3) 1 byte of zeros and TCP protocol number (1 byte)
    state += u16::from_be_bytes([0, IpProtocol::TCP as u8]) as u32;

    // 4) TCP segment length (2 bytes)
    state += (header.len() + data.len()) as u32;

    // Then the header itself, word by word, skipping the checksum field (bytes 16 and 17). Since the data offset is
    // a multiple of four, there is no odd trailing byte.
    for (i, chunk) in header.chunks_exact(2).enumerate() {
        if i != 8 {
            state += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        }
    }

    // Finally, checksum the data itself.
    let mut chunks_iter: ChunksExact<u8> = data.chunks_exact(2);
    while let Some(chunk) = chunks_iter.next() {
        state += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    // Since the data may have an odd number of bytes, pad the last byte with zero if necessary.
    if let Some(&b) = chunks_iter.remainder().first() {
        state += u16::from_be_bytes([b, 0]) as u32;
    }

    // A u32 accumulator only overflows after 2^16 additions, far more than the largest segment has words.
    while state > 0xFFFF {
        state -= 0xFFFF;
    }
    !state as u16
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

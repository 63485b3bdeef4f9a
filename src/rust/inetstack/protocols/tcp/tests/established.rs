// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::{
    deliver,
    establish,
    establish_with,
    forge_segment,
    next_segment,
    poll_once,
    read_all,
    server_addr,
    Connection,
};
use crate::{
    inetstack::{
        protocols::tcp::{
            segment::TcpHeader,
            ConnectionInfo,
            ConnectionStats,
            SeqNumber,
            State,
            TcpStats,
        },
        test_helpers::{
            self,
            Packet,
        },
    },
    runtime::{
        memory::NetBuffer,
        network::config::TcpConfig,
    },
};
use ::anyhow::Result;
use ::std::{
    net::SocketAddrV4,
    task::Poll,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Helper Functions
//======================================================================================================================

/// Header of a data segment the client could have sent next.
fn client_header(conn: &Connection, seq_num: SeqNumber) -> Result<(SocketAddrV4, TcpHeader)> {
    let info: ConnectionInfo = conn.client.tcp.info(conn.client_handle)?;
    let mut header: TcpHeader = TcpHeader::new(info.local.port(), info.remote.port());
    header.seq_num = seq_num;
    header.ack = true;
    header.ack_num = info.rcv_nxt;
    header.window_size = info.rcv_wnd as u16;
    Ok((info.local, header))
}

//======================================================================================================================
// Tests
//======================================================================================================================

/// Data written on one end comes out on the other, and the ACK empties the retransmission queue.
#[test]
fn test_send_recv() -> Result<()> {
    let conn: Connection = establish(Instant::now())?;

    let mut pop = conn.server.tcp.pop(conn.server_handle, None);
    crate::ensure_eq!(poll_once(&mut pop).is_pending(), true);

    crate::ensure_eq!(conn.client.tcp.send(conn.client_handle, b"hello")?, 5);
    let packet: Packet = next_segment(&conn.client)?;
    let header: TcpHeader = packet.header();
    crate::ensure_eq!(header.psh, true);
    crate::ensure_eq!(packet.payload(), b"hello".to_vec());
    conn.server.receive(&packet)?;

    match poll_once(&mut pop) {
        Poll::Ready(Ok(buf)) => crate::ensure_eq!(&buf[..], b"hello"),
        Poll::Ready(Err(e)) => anyhow::bail!("pop failed: {:?}", e),
        Poll::Pending => anyhow::bail!("pop should have completed"),
    }

    // The ACK covers the data and nothing else is in flight.
    let ack: Packet = next_segment(&conn.server)?;
    crate::ensure_eq!(ack.header().ack_num, header.seq_num + 5);
    crate::ensure_eq!(ack.payload().is_empty(), true);
    conn.client.receive(&ack)?;
    let info: ConnectionInfo = conn.client.tcp.info(conn.client_handle)?;
    crate::ensure_eq!(info.snd_una, info.snd_nxt);
    crate::ensure_eq!(info.unacked_segments, 0);

    let client: ConnectionStats = conn.client.tcp.get_connection_stats(conn.client_handle)?;
    let server: ConnectionStats = conn.server.tcp.get_connection_stats(conn.server_handle)?;
    crate::ensure_eq!(client.bytes_sent, 5);
    crate::ensure_eq!(server.bytes_received, 5);
    crate::ensure_eq!(conn.client.tcp.invariants_hold(), true);
    crate::ensure_eq!(conn.server.tcp.invariants_hold(), true);
    Ok(())
}

/// Partial reads leave the rest of the data in place.
#[test]
fn test_partial_recv() -> Result<()> {
    let conn: Connection = establish(Instant::now())?;

    conn.client.tcp.send(conn.client_handle, b"0123456789")?;
    deliver(&conn.client, &conn.server)?;

    let buf: NetBuffer = conn.server.tcp.try_recv(conn.server_handle, Some(4))?;
    crate::ensure_eq!(&buf[..], b"0123");
    crate::ensure_eq!(read_all(&conn.server, conn.server_handle)?, b"456789".to_vec());
    match conn.server.tcp.try_recv(conn.server_handle, Some(0)) {
        Err(e) if e.errno == libc::EINVAL => (),
        r => anyhow::bail!("zero-length receive should fail with EINVAL, got {:?}", r),
    }
    match conn.server.tcp.try_recv(conn.server_handle, None) {
        Err(e) if e.errno == libc::EAGAIN => (),
        r => anyhow::bail!("empty receive queue should give EAGAIN, got {:?}", r),
    }
    match conn.client.tcp.send(conn.client_handle, &[]) {
        Err(e) if e.errno == libc::EINVAL => Ok(()),
        r => anyhow::bail!("zero-length send should fail with EINVAL, got {:?}", r),
    }
}

/// A push larger than both the send buffer and the receive window goes through intact.
#[test]
fn test_bulk_transfer() -> Result<()> {
    let t0: Instant = Instant::now();
    let conn: Connection = establish(t0)?;

    let data: Vec<u8> = (0..100_000).map(|i| (i % 251) as u8).collect();
    let mut push = conn.client.tcp.push(conn.client_handle, NetBuffer::from_slice(&data));
    let mut pushed: bool = false;
    let mut received: Vec<u8> = Vec::new();
    let mut now: Instant = t0;

    for _ in 0..10_000 {
        if !pushed {
            match poll_once(&mut push) {
                Poll::Ready(Ok(())) => pushed = true,
                Poll::Ready(Err(e)) => anyhow::bail!("push failed: {:?}", e),
                Poll::Pending => (),
            }
        }
        deliver(&conn.client, &conn.server)?;
        received.extend(read_all(&conn.server, conn.server_handle)?);
        deliver(&conn.server, &conn.client)?;
        if pushed && received.len() == data.len() {
            break;
        }
        now += Duration::from_millis(1);
        conn.client.advance_clock(now);
        conn.server.advance_clock(now);
    }

    crate::ensure_eq!(pushed, true);
    crate::ensure_eq!(received.len(), data.len());
    crate::ensure_eq!(received == data, true);
    let stats: TcpStats = conn.client.tcp.get_stats();
    crate::ensure_eq!(stats.retrans_segments, 0);
    crate::ensure_eq!(conn.client.tcp.invariants_hold(), true);
    Ok(())
}

/// Segments that arrive ahead of a gap are held and delivered once the gap fills.
#[test]
fn test_out_of_order() -> Result<()> {
    let conn: Connection = establish(Instant::now())?;
    let start: SeqNumber = conn.client.tcp.info(conn.client_handle)?.snd_nxt;

    let (local, second): (SocketAddrV4, TcpHeader) = client_header(&conn, start + 100)?;
    conn.server
        .receive(&forge_segment(local, server_addr(), second, &[2; 100])?)?;
    crate::ensure_eq!(read_all(&conn.server, conn.server_handle)?.is_empty(), true);
    crate::ensure_eq!(conn.server.tcp.info(conn.server_handle)?.out_of_order_segments, 1);
    // The ACK still asks for the first missing byte.
    crate::ensure_eq!(next_segment(&conn.server)?.header().ack_num, start);

    let (local, first): (SocketAddrV4, TcpHeader) = client_header(&conn, start)?;
    conn.server
        .receive(&forge_segment(local, server_addr(), first, &[1; 100])?)?;
    crate::ensure_eq!(next_segment(&conn.server)?.header().ack_num, start + 200);
    crate::ensure_eq!(conn.server.tcp.info(conn.server_handle)?.out_of_order_segments, 0);

    let mut expected: Vec<u8> = vec![1; 100];
    expected.extend_from_slice(&[2; 100]);
    crate::ensure_eq!(read_all(&conn.server, conn.server_handle)?, expected);
    Ok(())
}

/// A segment beyond the receive window is answered with an ACK and dropped.
#[test]
fn test_out_of_window() -> Result<()> {
    let conn: Connection = establish(Instant::now())?;
    let start: SeqNumber = conn.client.tcp.info(conn.client_handle)?.snd_nxt;

    let (local, header): (SocketAddrV4, TcpHeader) = client_header(&conn, start + 100_000)?;
    conn.server
        .receive(&forge_segment(local, server_addr(), header, b"far away")?)?;

    let ack: Packet = next_segment(&conn.server)?;
    crate::ensure_eq!(ack.header().ack, true);
    crate::ensure_eq!(ack.header().ack_num, start);
    crate::ensure_eq!(read_all(&conn.server, conn.server_handle)?.is_empty(), true);
    crate::ensure_eq!(conn.server.tcp.get_stats().out_of_window, 1);
    crate::ensure_eq!(conn.server.tcp.get_state(conn.server_handle)?, State::Established);
    Ok(())
}

/// Corrupted, truncated and malformed segments are counted and never reach the connection.
#[test]
fn test_bad_segments() -> Result<()> {
    let conn: Connection = establish(Instant::now())?;

    conn.client.tcp.send(conn.client_handle, b"payload")?;
    let packet: Packet = next_segment(&conn.client)?;

    let mut corrupted: Packet = packet.clone();
    corrupted.buf[22] ^= 0xff;
    match conn.server.receive(&corrupted) {
        Err(e) if e.errno == libc::EBADMSG => (),
        r => anyhow::bail!("corrupted segment should be rejected, got {:?}", r),
    }

    let truncated: Packet = Packet {
        buf: NetBuffer::from_slice(&packet.buf[..10]),
        ..packet.clone()
    };
    crate::ensure_eq!(conn.server.receive(&truncated).is_err(), true);

    let start: SeqNumber = conn.client.tcp.info(conn.client_handle)?.snd_nxt;
    let (local, mut header): (SocketAddrV4, TcpHeader) = client_header(&conn, start)?;
    header.syn = true;
    header.fin = true;
    crate::ensure_eq!(
        conn.server
            .receive(&forge_segment(local, server_addr(), header, &[])?)
            .is_err(),
        true
    );

    let stats: TcpStats = conn.server.tcp.get_stats();
    crate::ensure_eq!(stats.checksum_errors, 1);
    crate::ensure_eq!(stats.bad_segments, 2);
    crate::ensure_eq!(stats.invalid_segments, 1);
    crate::ensure_eq!(conn.server.rt.num_outgoing(), 0);
    crate::ensure_eq!(read_all(&conn.server, conn.server_handle)?.is_empty(), true);

    // The intact copy still makes it.
    conn.server.receive(&packet)?;
    crate::ensure_eq!(read_all(&conn.server, conn.server_handle)?, b"payload".to_vec());
    Ok(())
}

/// Small segments wait for outstanding data to be acknowledged, unless Nagle is off.
#[test]
fn test_nagle() -> Result<()> {
    let conn: Connection = establish(Instant::now())?;

    conn.client.tcp.send(conn.client_handle, &[1; 100])?;
    crate::ensure_eq!(deliver(&conn.client, &conn.server)?, 1);

    conn.client.tcp.send(conn.client_handle, &[2; 100])?;
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 0);

    // The ACK for the first segment releases the second one.
    crate::ensure_eq!(deliver(&conn.server, &conn.client)?, 1);
    let packet: Packet = next_segment(&conn.client)?;
    crate::ensure_eq!(packet.payload(), vec![2; 100]);
    conn.server.receive(&packet)?;

    conn.client.tcp.set_nodelay(conn.client_handle, true)?;
    conn.client.tcp.send(conn.client_handle, &[3; 100])?;
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 1);
    crate::ensure_eq!(next_segment(&conn.client)?.payload(), vec![3; 100]);
    Ok(())
}

/// A closed window is probed until it reopens, then the held data goes out.
#[test]
fn test_zero_window_probe() -> Result<()> {
    let t0: Instant = Instant::now();
    let config: TcpConfig = TcpConfig::default().set_receive_window_size(100);
    let conn: Connection = establish_with(test_helpers::new_alice(t0), test_helpers::new_bob_with(t0, config))?;

    conn.client.tcp.send(conn.client_handle, &[1; 100])?;
    crate::ensure_eq!(deliver(&conn.client, &conn.server)?, 1);
    let ack: Packet = next_segment(&conn.server)?;
    crate::ensure_eq!(ack.header().window_size, 0);
    conn.client.receive(&ack)?;
    crate::ensure_eq!(conn.client.tcp.info(conn.client_handle)?.snd_wnd, 0);

    conn.client.tcp.send(conn.client_handle, &[2; 50])?;
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 0);

    conn.client.advance_clock(t0 + Duration::from_millis(199));
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 0);

    conn.client.advance_clock(t0 + Duration::from_millis(200));
    let probe: Packet = next_segment(&conn.client)?;
    let snd_nxt: SeqNumber = conn.client.tcp.info(conn.client_handle)?.snd_nxt;
    crate::ensure_eq!(probe.header().seq_num, snd_nxt - 1);
    crate::ensure_eq!(probe.payload().is_empty(), true);

    // The receiver answers the probe with its (still closed) window.
    conn.server.receive(&probe)?;
    let reply: Packet = next_segment(&conn.server)?;
    crate::ensure_eq!(reply.header().window_size, 0);
    conn.client.receive(&reply)?;
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 0);

    // Probes back off.
    conn.client.advance_clock(t0 + Duration::from_millis(599));
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 0);
    conn.client.advance_clock(t0 + Duration::from_millis(600));
    crate::ensure_eq!(conn.client.rt.drain(), 1);

    // Reading reopens the window and the window update releases the held data.
    crate::ensure_eq!(read_all(&conn.server, conn.server_handle)?, vec![1; 100]);
    let update: Packet = next_segment(&conn.server)?;
    crate::ensure_eq!(update.header().window_size, 100);
    conn.client.receive(&update)?;
    let packet: Packet = next_segment(&conn.client)?;
    crate::ensure_eq!(packet.payload(), vec![2; 50]);
    conn.server.receive(&packet)?;
    crate::ensure_eq!(read_all(&conn.server, conn.server_handle)?, vec![2; 50]);
    Ok(())
}

/// The peer's advertised window caps what is in flight, and a closed window with nothing in flight is left to the
/// persist timer rather than the retransmission timer.
#[test]
fn test_send_limited_by_peer_window() -> Result<()> {
    let t0: Instant = Instant::now();
    let config: TcpConfig = TcpConfig::default().set_receive_window_size(300);
    let conn: Connection = establish_with(test_helpers::new_alice(t0), test_helpers::new_bob_with(t0, config))?;
    crate::ensure_eq!(conn.client.tcp.info(conn.client_handle)?.snd_wnd, 300);

    crate::ensure_eq!(conn.client.tcp.send(conn.client_handle, &[3; 1000])?, 1000);
    let first: Packet = next_segment(&conn.client)?;
    crate::ensure_eq!(first.payload(), vec![3; 300]);
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 0);

    // The ACK closes the window: nothing is in flight, so nothing is sent and nothing is retransmitted.
    conn.server.receive(&first)?;
    crate::ensure_eq!(deliver(&conn.server, &conn.client)?, 1);
    let info: ConnectionInfo = conn.client.tcp.info(conn.client_handle)?;
    crate::ensure_eq!(info.snd_wnd, 0);
    crate::ensure_eq!(info.snd_una, info.snd_nxt);
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 0);

    // Each window update releases exactly one window's worth.
    crate::ensure_eq!(read_all(&conn.server, conn.server_handle)?, vec![3; 300]);
    crate::ensure_eq!(deliver(&conn.server, &conn.client)?, 1);
    let second: Packet = next_segment(&conn.client)?;
    crate::ensure_eq!(second.payload(), vec![3; 300]);
    crate::ensure_eq!(second.header().seq_num, first.header().seq_num + 300);
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 0);
    crate::ensure_eq!(conn.client.tcp.invariants_hold(), true);
    Ok(())
}

/// Keepalive probes an idle connection and gives up once enough probes go unanswered.
#[test]
fn test_keepalive() -> Result<()> {
    let t0: Instant = Instant::now();
    let config: TcpConfig = TcpConfig::default().set_keepalive(
        true,
        Some(Duration::from_secs(10)),
        Some(Duration::from_secs(1)),
        Some(2),
    );
    let conn: Connection = establish_with(test_helpers::new_alice_with(t0, config), test_helpers::new_bob(t0))?;

    conn.client.advance_clock(t0 + Duration::from_secs(9));
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 0);

    // An answered probe resets the idle timer.
    conn.client.advance_clock(t0 + Duration::from_secs(10));
    crate::ensure_eq!(deliver(&conn.client, &conn.server)?, 1);
    crate::ensure_eq!(deliver(&conn.server, &conn.client)?, 1);
    conn.client.advance_clock(t0 + Duration::from_secs(19));
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 0);

    // Unanswered ones do not.
    conn.client.advance_clock(t0 + Duration::from_secs(20));
    crate::ensure_eq!(conn.client.rt.drain(), 1);
    conn.client.advance_clock(t0 + Duration::from_secs(21));
    crate::ensure_eq!(conn.client.rt.drain(), 1);
    conn.client.advance_clock(t0 + Duration::from_secs(22));

    let reset: Packet = next_segment(&conn.client)?;
    crate::ensure_eq!(reset.header().rst, true);
    crate::ensure_eq!(conn.client.tcp.get_state(conn.client_handle)?, State::Closed);
    match conn.client.tcp.try_recv(conn.client_handle, None) {
        Err(e) if e.errno == libc::ETIMEDOUT => (),
        r => anyhow::bail!("receive should fail with ETIMEDOUT, got {:?}", r),
    }

    // The peer learns about it through the RST.
    conn.server.receive(&reset)?;
    crate::ensure_eq!(conn.server.tcp.get_state(conn.server_handle)?, State::Closed);
    crate::ensure_eq!(conn.server.tcp.get_stats().established_resets, 1);
    match conn.server.tcp.try_recv(conn.server_handle, None) {
        Err(e) if e.errno == libc::ECONNRESET => Ok(()),
        r => anyhow::bail!("receive should fail with ECONNRESET, got {:?}", r),
    }
}

/// Keepalive can be turned on for a single connection.
#[test]
fn test_set_keepalive() -> Result<()> {
    let t0: Instant = Instant::now();
    let conn: Connection = establish(t0)?;

    conn.client.tcp.set_keepalive(conn.client_handle, true)?;
    let keepalive_time: Duration = conn.client.rt.tcp_config.get_keepalive_time();
    conn.client.advance_clock(t0 + keepalive_time - Duration::from_secs(1));
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 0);
    conn.client.advance_clock(t0 + keepalive_time);
    crate::ensure_eq!(conn.client.rt.num_outgoing(), 1);

    conn.server.tcp.set_keepalive(conn.server_handle, false)?;
    conn.server.advance_clock(t0 + keepalive_time * 2);
    crate::ensure_eq!(conn.server.rt.num_outgoing(), 0);
    Ok(())
}

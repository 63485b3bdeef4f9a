// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod established;

use crate::{
    inetstack::{
        protocols::tcp::{
            segment::{
                TcpHeader,
                TcpSegment,
            },
            table::ConnectionHandle,
        },
        test_helpers::{
            self,
            Engine,
            Packet,
        },
    },
    runtime::memory::{
        HeapBufferPool,
        NetBuffer,
    },
};
use ::anyhow::Result;
use ::futures::task::noop_waker_ref;
use ::std::{
    future::Future,
    net::SocketAddrV4,
    pin::Pin,
    task::{
        Context,
        Poll,
    },
    time::Instant,
};

//======================================================================================================================
// Constants
//======================================================================================================================

pub const SERVER_PORT: u16 = 80;

//======================================================================================================================
// Structures
//======================================================================================================================

/// An established connection between two engines.
pub struct Connection {
    pub client: Engine,
    pub server: Engine,
    pub client_handle: ConnectionHandle,
    pub server_handle: ConnectionHandle,
    pub listener: ConnectionHandle,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

pub fn server_addr() -> SocketAddrV4 {
    SocketAddrV4::new(test_helpers::BOB_IPV4, SERVER_PORT)
}

/// Polls a future once, with a waker that does nothing.
pub fn poll_once<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
    let mut ctx: Context = Context::from_waker(noop_waker_ref());
    Future::poll(Pin::new(future), &mut ctx)
}

/// Moves every segment sent by one engine to the other. Returns how many there were.
pub fn deliver(from: &Engine, to: &Engine) -> Result<usize> {
    let mut count: usize = 0;
    while let Some(packet) = from.rt.pop_segment() {
        to.receive(&packet)?;
        count += 1;
    }
    Ok(count)
}

/// Takes the next segment sent by an engine.
pub fn next_segment(engine: &Engine) -> Result<Packet> {
    match engine.rt.pop_segment() {
        Some(packet) => Ok(packet),
        None => anyhow::bail!("no segment was sent"),
    }
}

/// Builds the wire image of a segment, as if `local` had sent it to `remote`.
pub fn forge_segment(local: SocketAddrV4, remote: SocketAddrV4, header: TcpHeader, data: &[u8]) -> Result<Packet> {
    let segment: TcpSegment = TcpSegment {
        local,
        remote,
        header,
        data: if data.is_empty() {
            None
        } else {
            Some(NetBuffer::from_slice(data))
        },
    };
    let buf: NetBuffer = segment.encode(&HeapBufferPool::default(), false)?;
    Ok(Packet {
        src_addr: *local.ip(),
        dst_addr: *remote.ip(),
        buf,
    })
}

/// Runs the three-way handshake between a fresh client and server.
pub fn establish(now: Instant) -> Result<Connection> {
    establish_with(test_helpers::new_alice(now), test_helpers::new_bob(now))
}

pub fn establish_with(client: Engine, server: Engine) -> Result<Connection> {
    let listener: ConnectionHandle = server.tcp.create()?;
    server.tcp.bind(listener, server_addr())?;
    server.tcp.listen(listener, 8)?;
    let mut accept = server.tcp.accept(listener);
    crate::ensure_eq!(poll_once(&mut accept).is_pending(), true);

    let client_handle: ConnectionHandle = client.tcp.create()?;
    let mut connect = client.tcp.connect(client_handle, server_addr())?;
    crate::ensure_eq!(poll_once(&mut connect).is_pending(), true);

    // SYN, SYN+ACK and ACK.
    crate::ensure_eq!(deliver(&client, &server)?, 1);
    crate::ensure_eq!(deliver(&server, &client)?, 1);
    crate::ensure_eq!(deliver(&client, &server)?, 1);

    let server_handle: ConnectionHandle = match poll_once(&mut accept) {
        Poll::Ready(Ok(handle)) => handle,
        Poll::Ready(Err(e)) => anyhow::bail!("accept failed: {:?}", e),
        Poll::Pending => anyhow::bail!("accept should have completed"),
    };
    match poll_once(&mut connect) {
        Poll::Ready(Ok(())) => (),
        Poll::Ready(Err(e)) => anyhow::bail!("connect failed: {:?}", e),
        Poll::Pending => anyhow::bail!("connect should have completed"),
    }

    Ok(Connection {
        client,
        server,
        client_handle,
        server_handle,
        listener,
    })
}

/// Reads everything the server has received so far.
pub fn read_all(engine: &Engine, handle: ConnectionHandle) -> Result<Vec<u8>> {
    let mut bytes: Vec<u8> = Vec::new();
    loop {
        match engine.tcp.try_recv(handle, None) {
            Ok(buf) if buf.is_empty() => break,
            Ok(buf) => bytes.extend_from_slice(&buf[..]),
            Err(e) if e.errno == libc::EAGAIN => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(bytes)
}

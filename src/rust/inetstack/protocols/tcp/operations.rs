// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::{
    peer::TcpPeer,
    table::ConnectionHandle,
};
use crate::runtime::{
    fail::Fail,
    memory::{
        BufferPool,
        NetBuffer,
    },
    network::NetworkRuntime,
};
use ::std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{
        Context,
        Poll,
    },
};

//======================================================================================================================
// Connect
//======================================================================================================================

/// Completes when the handshake does. Dropping the future before that aborts the active open.
pub struct ConnectFuture<R: NetworkRuntime + BufferPool> {
    peer: TcpPeer<R>,
    handle: ConnectionHandle,
    done: bool,
}

impl<R: NetworkRuntime + BufferPool> ConnectFuture<R> {
    pub(super) fn new(peer: TcpPeer<R>, handle: ConnectionHandle) -> Self {
        Self {
            peer,
            handle,
            done: false,
        }
    }
}

impl<R: NetworkRuntime + BufferPool> fmt::Debug for ConnectFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConnectFuture({})", self.handle)
    }
}

impl<R: NetworkRuntime + BufferPool> Future for ConnectFuture<R> {
    type Output = Result<(), Fail>;

    fn poll(self: Pin<&mut Self>, context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        let result: Poll<Self::Output> = self_.peer.poll_connect(self_.handle, context);
        if result.is_ready() {
            self_.done = true;
        }
        result
    }
}

impl<R: NetworkRuntime + BufferPool> Drop for ConnectFuture<R> {
    fn drop(&mut self) {
        if !self.done {
            self.peer.cancel_connect(self.handle);
        }
    }
}

//======================================================================================================================
// Accept
//======================================================================================================================

/// Completes with the handle of the next established connection of a listening record.
pub struct AcceptFuture<R: NetworkRuntime + BufferPool> {
    peer: TcpPeer<R>,
    handle: ConnectionHandle,
}

impl<R: NetworkRuntime + BufferPool> AcceptFuture<R> {
    pub(super) fn new(peer: TcpPeer<R>, handle: ConnectionHandle) -> Self {
        Self { peer, handle }
    }
}

impl<R: NetworkRuntime + BufferPool> fmt::Debug for AcceptFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AcceptFuture({})", self.handle)
    }
}

impl<R: NetworkRuntime + BufferPool> Future for AcceptFuture<R> {
    type Output = Result<ConnectionHandle, Fail>;

    fn poll(self: Pin<&mut Self>, context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        self_.peer.poll_accept(self_.handle, context)
    }
}

//======================================================================================================================
// Push
//======================================================================================================================

/// Completes once every byte of the buffer sits in the send buffer.
pub struct PushFuture<R: NetworkRuntime + BufferPool> {
    peer: TcpPeer<R>,
    handle: ConnectionHandle,
    buf: NetBuffer,
    queued: usize,
}

impl<R: NetworkRuntime + BufferPool> PushFuture<R> {
    pub(super) fn new(peer: TcpPeer<R>, handle: ConnectionHandle, buf: NetBuffer) -> Self {
        Self {
            peer,
            handle,
            buf,
            queued: 0,
        }
    }
}

impl<R: NetworkRuntime + BufferPool> fmt::Debug for PushFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PushFuture({}, {}/{})", self.handle, self.queued, self.buf.len())
    }
}

impl<R: NetworkRuntime + BufferPool> Future for PushFuture<R> {
    type Output = Result<(), Fail>;

    fn poll(self: Pin<&mut Self>, context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        loop {
            match self_.peer.poll_push(self_.handle, &self_.buf[self_.queued..], context) {
                Poll::Ready(Ok(nbytes)) => {
                    self_.queued += nbytes;
                    if self_.queued == self_.buf.len() {
                        return Poll::Ready(Ok(()));
                    }
                },
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

//======================================================================================================================
// Pop
//======================================================================================================================

/// Completes with received data, or with an empty buffer at end of stream.
pub struct PopFuture<R: NetworkRuntime + BufferPool> {
    peer: TcpPeer<R>,
    handle: ConnectionHandle,
    size: Option<usize>,
}

impl<R: NetworkRuntime + BufferPool> PopFuture<R> {
    pub(super) fn new(peer: TcpPeer<R>, handle: ConnectionHandle, size: Option<usize>) -> Self {
        Self { peer, handle, size }
    }
}

impl<R: NetworkRuntime + BufferPool> fmt::Debug for PopFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PopFuture({})", self.handle)
    }
}

impl<R: NetworkRuntime + BufferPool> Future for PopFuture<R> {
    type Output = Result<NetBuffer, Fail>;

    fn poll(self: Pin<&mut Self>, context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        self_.peer.poll_recv(self_.handle, self_.size, context)
    }
}

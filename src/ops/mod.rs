/*!
 * Alertable Socket Calls
 *
 * Drop-in replacements for the blocking socket calls. Each one is the
 * cancellable wrapper bound to a single native call and its policy:
 *
 * | call                                    | interest | retry    |
 * |-----------------------------------------|----------|----------|
 * | accept                                  | Accept   | Rearm    |
 * | connect                                 | Connect  | OneShot  |
 * | recv / recv_from / recv_vectored        | Read     | Rearm    |
 * | send / send_to / send_vectored          | Write    | OneShot  |
 *
 * With `blocking == false` every function is exactly the native call.
 */

use crate::cancellable::{run_cancellable, CallPolicy};
use crate::core::sys;
use crate::core::types::SockResult;
use nix::errno::Errno;
use nix::sys::socket::{self, MsgFlags, SockaddrLike, SockaddrStorage};
use nix::sys::uio;
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use tracing::warn;

/// A connection returned by [`accept`]
#[derive(Debug)]
pub struct Accepted {
    pub socket: OwnedFd,
    /// Peer address, when the connection still had one to report
    pub peer: Option<SockaddrStorage>,
}

/// Accept one connection from `listener`
pub fn accept<S: AsFd + ?Sized>(listener: &S, blocking: bool) -> SockResult<Accepted> {
    let raw = listener.as_fd().as_raw_fd();
    let fd = run_cancellable(listener, blocking, CallPolicy::ACCEPT, || socket::accept(raw))?;

    // SAFETY: accept(2) returned a fresh descriptor nobody else owns
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    // Some platforms hand out the listener's O_NONBLOCK; a blocking accept
    // must return a blocking socket
    if blocking {
        if let Err(errno) = sys::set_nonblocking(socket.as_fd(), false) {
            warn!(fd, error = %errno, "accepted socket left in non-blocking mode");
        }
    }

    let peer = socket::getpeername::<SockaddrStorage>(fd).ok();
    Ok(Accepted { socket, peer })
}

/// Connect `socket` to `addr`
///
/// Success is the absence of an error: a post-wait re-attempt that reports
/// `EISCONN` means the connection completed.
pub fn connect<S: AsFd + ?Sized>(socket: &S, addr: &dyn SockaddrLike, blocking: bool) -> SockResult<()> {
    let raw = socket.as_fd().as_raw_fd();
    let mut attempts = 0u32;

    let result = run_cancellable(socket, blocking, CallPolicy::CONNECT, || {
        attempts += 1;
        socket::connect(raw, addr)
    });

    match result {
        Err(Errno::EISCONN) if attempts > 1 => Ok(()),
        other => other,
    }
}

/// Receive into `buf`
pub fn recv<S: AsFd + ?Sized>(socket: &S, buf: &mut [u8], flags: MsgFlags, blocking: bool) -> SockResult<usize> {
    let raw = socket.as_fd().as_raw_fd();
    run_cancellable(socket, blocking, CallPolicy::RECEIVE, || {
        socket::recv(raw, &mut buf[..], flags)
    })
}

/// Receive a datagram into `buf`, reporting the sender
pub fn recv_from<S: AsFd + ?Sized>(
    socket: &S,
    buf: &mut [u8],
    blocking: bool,
) -> SockResult<(usize, Option<SockaddrStorage>)> {
    let raw = socket.as_fd().as_raw_fd();
    run_cancellable(
        socket,
        blocking,
        CallPolicy::RECEIVE.named("recvfrom"),
        || socket::recvfrom::<SockaddrStorage>(raw, &mut buf[..]),
    )
}

/// Scatter-receive into `bufs`
pub fn recv_vectored<S: AsFd + ?Sized>(
    socket: &S,
    bufs: &mut [IoSliceMut<'_>],
    blocking: bool,
) -> SockResult<usize> {
    let fd = socket.as_fd();
    run_cancellable(socket, blocking, CallPolicy::RECEIVE.named("readv"), || {
        uio::readv(fd, &mut bufs[..])
    })
}

/// Send `buf`
pub fn send<S: AsFd + ?Sized>(socket: &S, buf: &[u8], flags: MsgFlags, blocking: bool) -> SockResult<usize> {
    let raw = socket.as_fd().as_raw_fd();
    run_cancellable(socket, blocking, CallPolicy::SEND, || socket::send(raw, buf, flags))
}

/// Send `buf` as a datagram to `addr`
pub fn send_to<S: AsFd + ?Sized>(
    socket: &S,
    buf: &[u8],
    addr: &dyn SockaddrLike,
    flags: MsgFlags,
    blocking: bool,
) -> SockResult<usize> {
    let raw = socket.as_fd().as_raw_fd();
    run_cancellable(socket, blocking, CallPolicy::SEND.named("sendto"), || {
        socket::sendto(raw, buf, addr, flags)
    })
}

/// Gather-send `bufs`
pub fn send_vectored<S: AsFd + ?Sized>(socket: &S, bufs: &[IoSlice<'_>], blocking: bool) -> SockResult<usize> {
    let fd = socket.as_fd();
    run_cancellable(socket, blocking, CallPolicy::SEND.named("writev"), || uio::writev(fd, bufs))
}

/*!
 * Syscall Helpers
 * Thin, errno-returning wrappers over fcntl, pipe and poll
 */

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{PollFd, PollFlags, PollTimeout};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};

/// Read the file status flags of `fd`
pub(crate) fn status_flags(fd: BorrowedFd<'_>) -> Result<OFlag, Errno> {
    let bits = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?;
    Ok(OFlag::from_bits_truncate(bits))
}

/// Replace the file status flags of `fd`
pub(crate) fn set_status_flags(fd: BorrowedFd<'_>, flags: OFlag) -> Result<(), Errno> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags)).map(drop)
}

/// Whether `O_NONBLOCK` is set on `fd`
pub fn is_nonblocking(fd: BorrowedFd<'_>) -> Result<bool, Errno> {
    Ok(status_flags(fd)?.contains(OFlag::O_NONBLOCK))
}

/// Set or clear `O_NONBLOCK`, returning the flags in effect before the call
pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>, nonblocking: bool) -> Result<OFlag, Errno> {
    let previous = status_flags(fd)?;
    let mut next = previous;
    next.set(OFlag::O_NONBLOCK, nonblocking);
    if next != previous {
        set_status_flags(fd, next)?;
    }
    Ok(previous)
}

/// Non-blocking, close-on-exec pipe as `(reader, writer)`
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub(crate) fn wake_pipe() -> Result<(OwnedFd, OwnedFd), Errno> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)
}

/// Non-blocking, close-on-exec pipe as `(reader, writer)`.
/// No `pipe2` here, so the flags are applied after creation.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub(crate) fn wake_pipe() -> Result<(OwnedFd, OwnedFd), Errno> {
    use nix::fcntl::FdFlag;
    use std::os::fd::AsFd;

    let (reader, writer) = nix::unistd::pipe()?;
    for fd in [reader.as_fd(), writer.as_fd()] {
        set_nonblocking(fd, true)?;
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((reader, writer))
}

/// `poll(2)` over `fds`.
///
/// Returns the number of ready entries, `0` on timeout. A signal landing
/// during the wait surfaces as `Err(EINTR)`.
pub(crate) fn poll(fds: &mut [PollFd<'_>], timeout: PollTimeout) -> Result<usize, Errno> {
    nix::poll::poll(fds, timeout).map(|n| n as usize)
}

/// Returned events of one entry; bits nix does not model read as none
#[inline]
pub(crate) fn revents(fd: &PollFd<'_>) -> PollFlags {
    fd.revents().unwrap_or(PollFlags::empty())
}

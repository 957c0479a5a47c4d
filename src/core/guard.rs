/*!
 * Blocking Mode Guard
 *
 * RAII guard that flips a socket into non-blocking mode for the span of one
 * wrapped call and puts the pre-call flags back on drop.
 *
 * ## Invariants
 *
 * - Restoration happens exactly once, on every exit path (including unwinding)
 * - A restore failure is logged and never replaces the call's own error
 */

use super::sys;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use std::os::fd::{AsRawFd, BorrowedFd};
use tracing::warn;

/// Holds a socket in non-blocking mode until dropped
///
/// # Example
///
/// ```ignore
/// let guard = NonBlockingGuard::enter(fd)?;
/// // non-blocking syscalls here
/// drop(guard); // original mode is back
/// ```
#[must_use = "the socket returns to its original mode as soon as the guard is dropped"]
pub struct NonBlockingGuard<'fd> {
    fd: BorrowedFd<'fd>,
    original: OFlag,
    active: bool,
}

impl<'fd> NonBlockingGuard<'fd> {
    /// Switch `fd` to non-blocking mode, remembering the current flags
    pub fn enter(fd: BorrowedFd<'fd>) -> Result<Self, Errno> {
        let original = sys::set_nonblocking(fd, true)?;
        Ok(Self {
            fd,
            original,
            active: true,
        })
    }

    /// Flags that will be restored
    #[inline]
    pub fn original_flags(&self) -> OFlag {
        self.original
    }

    /// Restore early and report the restore result
    pub fn restore(mut self) -> Result<(), Errno> {
        self.release()
    }

    fn release(&mut self) -> Result<(), Errno> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        sys::set_status_flags(self.fd, self.original)
    }
}

impl Drop for NonBlockingGuard<'_> {
    fn drop(&mut self) {
        if let Err(errno) = self.release() {
            warn!(
                fd = self.fd.as_raw_fd(),
                error = %errno,
                "failed to restore socket blocking mode"
            );
        }
    }
}

/*!
 * Cancellable Operation Wrapper
 *
 * Turns one "blocking" socket call into a non-blocking call plus alertable
 * waits, then puts the socket back the way it was.
 *
 * ## Retry Policy
 *
 * - `Retry::Rearm` (accept, receive): after every ready wait the call is
 *   attempted again, as often as it keeps reporting would-block
 * - `Retry::OneShot` (connect, send): one re-attempt after a ready wait; its
 *   result is final unless it still reports would-block, in which case the
 *   call goes back to waiting. A blocking call never returns would-block.
 *
 * ## Error Handling
 *
 * Would-block and pending are absorbed. Everything else, including the
 * terminal error of a wait, is returned as the call's native error code.
 * A failure to restore the blocking mode is logged and never replaces it.
 */

use crate::config::IoConfig;
use crate::core::guard::NonBlockingGuard;
use crate::core::types::{Interest, SockResult};
use crate::monitoring::CallSpan;
use crate::wait::{AlertableWaiter, Waiter};
use nix::errno::Errno;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use tracing::{debug, warn};

/// What to do after a wait reports the socket ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Keep calling as long as the call would block
    Rearm,
    /// Call one more time; anything but would-block is final
    OneShot,
}

/// Interest and retry policy of one kind of socket call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub name: &'static str,
    pub interest: Interest,
    pub retry: Retry,
}

impl CallPolicy {
    pub const ACCEPT: Self = Self::new("accept", Interest::Accept, Retry::Rearm);
    pub const CONNECT: Self = Self::new("connect", Interest::Connect, Retry::OneShot);
    pub const RECEIVE: Self = Self::new("recv", Interest::Read, Retry::Rearm);
    pub const SEND: Self = Self::new("send", Interest::Write, Retry::OneShot);

    pub const fn new(name: &'static str, interest: Interest, retry: Retry) -> Self {
        Self {
            name,
            interest,
            retry,
        }
    }

    /// Same policy under another operation name
    pub const fn named(self, name: &'static str) -> Self {
        Self { name, ..self }
    }
}

/// Errors meaning "not done yet, wait and try again"
#[inline]
pub fn is_would_block(errno: Errno) -> bool {
    matches!(
        errno,
        Errno::EAGAIN | Errno::EINPROGRESS | Errno::EALREADY
    ) || errno == Errno::EWOULDBLOCK
}

/// Runs socket calls with blocking semantics on top of a [`Waiter`]
#[derive(Debug, Clone, Default)]
pub struct Cancellable<W = AlertableWaiter> {
    waiter: W,
}

impl Cancellable<AlertableWaiter> {
    /// Wrapper backed by the production alertable waiter
    pub fn new() -> Self {
        Self::default()
    }
}

impl<W: Waiter> Cancellable<W> {
    /// Wrapper backed by a custom waiter
    pub fn with_waiter(waiter: W) -> Self {
        Self { waiter }
    }

    pub fn waiter(&self) -> &W {
        &self.waiter
    }

    /// Run `op` on `socket` as a blocking (`blocking == true`) or plain
    /// non-blocking call.
    ///
    /// `op` may run several times; it must issue the same native call each
    /// time.
    pub fn run<S, T, F>(&self, socket: &S, blocking: bool, policy: CallPolicy, mut op: F) -> SockResult<T>
    where
        S: AsFd + ?Sized,
        F: FnMut() -> SockResult<T>,
    {
        let fd = socket.as_fd();

        if !blocking {
            let result = op();
            debug!(
                fd = fd.as_raw_fd(),
                op = policy.name,
                ok = result.is_ok(),
                error = result.as_ref().err().map(|e| *e as i32),
                "finished non-blocking call"
            );
            return result;
        }

        let span = CallSpan::new(policy.name, fd.as_raw_fd(), IoConfig::global().slow_call_threshold());

        let guard = match NonBlockingGuard::enter(fd) {
            Ok(guard) => guard,
            Err(errno) => {
                warn!(
                    fd = fd.as_raw_fd(),
                    op = policy.name,
                    error = %errno,
                    "could not enter non-blocking mode, calling once"
                );
                let result = op();
                span.record_result(&result);
                return result;
            }
        };

        let result = self.drive(fd, policy, &mut op);
        drop(guard);

        span.record_result(&result);
        result
    }

    fn drive<T, F>(&self, fd: BorrowedFd<'_>, policy: CallPolicy, op: &mut F) -> SockResult<T>
    where
        F: FnMut() -> SockResult<T>,
    {
        let mut result = op();
        loop {
            match result {
                Err(errno) if is_would_block(errno) => {}
                done => return done,
            }

            self.waiter.wait(fd, policy.interest).into_result()?;

            result = op();
            if policy.retry == Retry::OneShot && matches!(result, Err(e) if is_would_block(e)) {
                debug!(
                    fd = fd.as_raw_fd(),
                    op = policy.name,
                    "re-attempt after ready wait would block, waiting again"
                );
            }
        }
    }
}

/// [`Cancellable::run`] with the production waiter
pub fn run_cancellable<S, T, F>(socket: &S, blocking: bool, policy: CallPolicy, op: F) -> SockResult<T>
where
    S: AsFd + ?Sized,
    F: FnMut() -> SockResult<T>,
{
    Cancellable::new().run(socket, blocking, policy, op)
}

/*!
 * Alertable Wait
 *
 * One cancellable wait for a single readiness condition on a socket.
 *
 * ## Algorithm
 *
 * 1. Resolve the deadline (socket timeout for reads/writes, configuration
 *    for connects, infinite otherwise)
 * 2. Register the interest plus peer-close, together with the calling
 *    thread's alert
 * 3. Poll until the socket fires, the alert fires, a signal lands, or the
 *    deadline passes
 * 4. Translate: alert/signal → `Interrupted`, nothing → `TimedOut`, socket →
 *    per-bit error of the requested event, then of close, else `Ready`
 * 5. Drop the registration on every path
 *
 * A failure to set up or enumerate the wait is reported as
 * `Outcome::Failed` with the errno of the call that failed; the wait is
 * never retried here.
 */

use crate::alert::{self, ArmedAlert, LocalAlert};
use crate::config::{IoConfig, TimeoutSource};
use crate::core::sys;
use crate::core::types::{close_events, Direction, Interest, Outcome};
use crate::timeout::{resolve_timeout, WaitTimeout};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags};
use nix::sys::socket::{getsockopt, sockopt};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::sync::Arc;
use tracing::debug;

/// Something that can block until a socket event, an interruption, or a
/// timeout. The wrapper is generic over this seam.
pub trait Waiter {
    fn wait(&self, fd: BorrowedFd<'_>, interest: Interest) -> Outcome;
}

impl<W: Waiter + ?Sized> Waiter for &W {
    fn wait(&self, fd: BorrowedFd<'_>, interest: Interest) -> Outcome {
        (**self).wait(fd, interest)
    }
}

/// Fired bits of one wait and the error code attached to each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkEvents {
    pub interest: Interest,
    pub requested_fired: bool,
    pub requested_error: Option<Errno>,
    pub close_fired: bool,
    pub close_error: Option<Errno>,
}

impl NetworkEvents {
    /// Nothing fired yet
    pub fn none(interest: Interest) -> Self {
        Self {
            interest,
            requested_fired: false,
            requested_error: None,
            close_fired: false,
            close_error: None,
        }
    }

    /// Collapse fired bits into an outcome: the requested bit's error wins,
    /// then close's error, otherwise the event is ready
    pub fn outcome(&self) -> Outcome {
        if let (true, Some(errno)) = (self.requested_fired, self.requested_error) {
            return Outcome::Failed(errno);
        }
        if let (true, Some(errno)) = (self.close_fired, self.close_error) {
            return Outcome::Failed(errno);
        }
        Outcome::Ready
    }

    /// Read fired bits from poll results, fetching the pending socket error
    /// when an error or a connect completion is involved
    pub(crate) fn enumerate(
        fd: BorrowedFd<'_>,
        interest: Interest,
        revents: PollFlags,
    ) -> Result<Self, Errno> {
        if revents.contains(PollFlags::POLLNVAL) {
            return Err(Errno::EBADF);
        }

        let errored = revents.contains(PollFlags::POLLERR);
        let requested_fired = errored || revents.intersects(interest.poll_events());
        let close_fired = revents.intersects(close_events());

        let pending = if errored || (interest == Interest::Connect && requested_fired) {
            match getsockopt(&fd, sockopt::SocketError)? {
                0 => None,
                raw => Some(Errno::from_raw(raw)),
            }
        } else {
            None
        };

        Ok(Self {
            interest,
            requested_fired,
            requested_error: pending.filter(|_| requested_fired),
            close_fired,
            close_error: pending.filter(|_| close_fired),
        })
    }
}

/// Scoped registration of one socket interest and the thread's alert
pub(crate) struct Registration<'a> {
    fd: BorrowedFd<'a>,
    interest: Interest,
    alert: &'a LocalAlert,
    fds: [PollFd<'a>; 2],
    _armed: ArmedAlert<'a>,
}

impl<'a> Registration<'a> {
    pub(crate) fn new(fd: BorrowedFd<'a>, interest: Interest, alert: &'a LocalAlert) -> Self {
        let fds = [
            PollFd::new(fd, interest.poll_events() | close_events()),
            PollFd::new(alert.fd(), PollFlags::POLLIN),
        ];
        Self {
            fd,
            interest,
            alert,
            fds,
            _armed: alert.arm(),
        }
    }

    /// Block once; consumes the registration so it cannot be reused
    pub(crate) fn wait(mut self, timeout: WaitTimeout) -> Outcome {
        match sys::poll(&mut self.fds, timeout.poll_timeout()) {
            Err(Errno::EINTR) => return Outcome::Interrupted,
            Err(errno) => return Outcome::Failed(errno),
            Ok(0) => return Outcome::TimedOut,
            Ok(_) => {}
        }

        if !sys::revents(&self.fds[1]).is_empty() {
            self.alert.consume();
            return Outcome::Interrupted;
        }

        match NetworkEvents::enumerate(self.fd, self.interest, sys::revents(&self.fds[0])) {
            Ok(events) => events.outcome(),
            Err(errno) => Outcome::Failed(errno),
        }
    }
}

/// The production waiter: poll on the socket and the thread's alert
#[derive(Debug, Clone, Default)]
pub struct AlertableWaiter {
    config: Option<Arc<IoConfig>>,
}

impl AlertableWaiter {
    /// Waiter that reads the process-wide configuration at each wait
    pub fn new() -> Self {
        Self { config: None }
    }

    /// Waiter pinned to `config`
    pub fn with_config(config: Arc<IoConfig>) -> Self {
        Self {
            config: Some(config),
        }
    }

    fn config(&self) -> Arc<IoConfig> {
        match &self.config {
            Some(config) => Arc::clone(config),
            None => IoConfig::global(),
        }
    }

    /// Deadline for one wait on `interest`
    pub fn timeout_for(&self, fd: BorrowedFd<'_>, interest: Interest) -> WaitTimeout {
        match interest.direction() {
            Some(direction) => resolve_timeout(&fd, direction),
            None if interest == Interest::Connect
                && self.config().connect_timeout == TimeoutSource::SendTimeout =>
            {
                resolve_timeout(&fd, Direction::Send)
            }
            None => WaitTimeout::Infinite,
        }
    }
}

impl Waiter for AlertableWaiter {
    fn wait(&self, fd: BorrowedFd<'_>, interest: Interest) -> Outcome {
        let timeout = self.timeout_for(fd, interest);

        let alert = match alert::local() {
            Ok(alert) => alert,
            Err(e) => {
                debug!(fd = fd.as_raw_fd(), error = %e, "alert unavailable, wait not started");
                return Outcome::Failed(e.errno());
            }
        };

        debug!(
            fd = fd.as_raw_fd(),
            event = interest.name(),
            timeout_ms = timeout.duration().map(|d| d.as_millis() as u64),
            "waiting for socket event"
        );

        let outcome = Registration::new(fd, interest, &alert).wait(timeout);

        debug!(
            fd = fd.as_raw_fd(),
            event = interest.name(),
            %outcome,
            "socket wait finished"
        );
        outcome
    }
}

/// Wait once for `interest` on `socket` using the process-wide configuration
pub fn wait_for_event<S: AsFd + ?Sized>(socket: &S, interest: Interest) -> Outcome {
    AlertableWaiter::new().wait(socket.as_fd(), interest)
}

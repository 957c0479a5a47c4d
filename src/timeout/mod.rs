/*!
 * Timeout Resolution
 *
 * Reads a socket's `SO_RCVTIMEO` / `SO_SNDTIMEO` and turns it into the
 * deadline of a single alertable wait.
 *
 * ## Rules
 *
 * - A zero option value means "no timeout", so it resolves to `Infinite`
 * - A failed query also resolves to `Infinite`; absence of a timeout is a
 *   valid state, not an error
 * - The deadline applies per wait attempt, never across a retry loop
 */

use crate::core::types::Direction;
use nix::poll::PollTimeout;
use nix::sys::socket::{getsockopt, sockopt};
use nix::sys::time::TimeVal;
use std::os::fd::{AsFd, AsRawFd};
use std::time::Duration;
use tracing::trace;

/// Deadline of one alertable wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitTimeout {
    /// Wait until the event, an alert, or a signal
    #[default]
    Infinite,
    /// Give up after this long
    After(Duration),
}

impl WaitTimeout {
    /// Normalize a raw option value: zero means infinite
    pub fn from_option(value: Duration) -> Self {
        if value.is_zero() {
            Self::Infinite
        } else {
            Self::After(value)
        }
    }

    /// Get the duration, `None` when infinite
    #[inline]
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::After(d) => Some(*d),
        }
    }

    #[inline]
    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinite)
    }

    /// Timeout argument for `poll(2)`.
    ///
    /// Sub-millisecond remainders round up so a configured timeout never
    /// degenerates into a zero-length (immediate) poll; values beyond
    /// `c_int::MAX` milliseconds saturate.
    pub fn poll_millis(&self) -> libc::c_int {
        match self {
            Self::Infinite => -1,
            Self::After(d) => {
                let mut millis = d.as_millis();
                if d.subsec_nanos() % 1_000_000 != 0 {
                    millis += 1;
                }
                millis.min(libc::c_int::MAX as u128) as libc::c_int
            }
        }
    }

    /// [`poll_millis`](Self::poll_millis) as the nix poll timeout
    pub fn poll_timeout(&self) -> PollTimeout {
        PollTimeout::try_from(self.poll_millis()).unwrap_or(PollTimeout::NONE)
    }
}

fn timeval_to_duration(tv: TimeVal) -> Duration {
    let secs = u64::try_from(tv.tv_sec()).unwrap_or(0);
    let micros = u32::try_from(tv.tv_usec()).unwrap_or(0);
    Duration::from_secs(secs) + Duration::from_micros(u64::from(micros))
}

/// Resolve the wait deadline for `direction` on `socket`. Never fails.
pub fn resolve_timeout<S: AsFd + ?Sized>(socket: &S, direction: Direction) -> WaitTimeout {
    let fd = socket.as_fd();
    let queried = match direction {
        Direction::Receive => getsockopt(&fd, sockopt::ReceiveTimeout),
        Direction::Send => getsockopt(&fd, sockopt::SendTimeout),
    };

    match queried {
        Ok(tv) => WaitTimeout::from_option(timeval_to_duration(tv)),
        Err(errno) => {
            trace!(
                fd = fd.as_raw_fd(),
                ?direction,
                error = %errno,
                "timeout query failed, waiting indefinitely"
            );
            WaitTimeout::Infinite
        }
    }
}

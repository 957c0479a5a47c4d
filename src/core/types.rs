/*!
 * Core Types
 * Interest bits, transfer directions and wait outcomes shared by every layer
 */

use nix::errno::Errno;
use nix::poll::PollFlags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type of every alertable socket call: the native value or the
/// native error code the equivalent blocking call would have left behind
pub type SockResult<T> = Result<T, Errno>;

/// Readiness condition a wait is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interest {
    Read,
    Write,
    Accept,
    Connect,
    Close,
}

impl Interest {
    /// Event name used in log fields
    pub const fn name(self) -> &'static str {
        match self {
            Self::Read => "FD_READ",
            Self::Write => "FD_WRITE",
            Self::Accept => "FD_ACCEPT",
            Self::Connect => "FD_CONNECT",
            Self::Close => "FD_CLOSE",
        }
    }

    /// Timeout option consulted for this interest, if any.
    ///
    /// Only plain reads and writes carry a socket-configured timeout; accept
    /// and connect wait indefinitely unless configuration says otherwise.
    pub const fn direction(self) -> Option<Direction> {
        match self {
            Self::Read => Some(Direction::Receive),
            Self::Write => Some(Direction::Send),
            Self::Accept | Self::Connect | Self::Close => None,
        }
    }

    /// Poll events that signal this interest
    pub(crate) fn poll_events(self) -> PollFlags {
        match self {
            Self::Read | Self::Accept => PollFlags::POLLIN,
            Self::Write | Self::Connect => PollFlags::POLLOUT,
            Self::Close => close_events(),
        }
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Peer-close events registered next to every interest.
///
/// Only a full hangup counts. A peer that shuts down just its write side
/// makes reads return end of file, which the read interest already
/// reports, and must not wake a wait for send space.
pub(crate) fn close_events() -> PollFlags {
    PollFlags::POLLHUP
}

/// Which socket timeout option applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// `SO_RCVTIMEO`
    Receive,
    /// `SO_SNDTIMEO`
    Send,
}

/// Result of a single alertable wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The awaited event fired without an error
    Ready,
    /// The event fired with an error, or the wait state could not be set up
    Failed(Errno),
    /// The resolved timeout elapsed first
    TimedOut,
    /// The thread was alerted (or signalled) while waiting
    Interrupted,
}

impl Outcome {
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Map onto the native error-code convention
    pub fn into_result(self) -> SockResult<()> {
        match self {
            Self::Ready => Ok(()),
            Self::Failed(errno) => Err(errno),
            Self::TimedOut => Err(Errno::ETIMEDOUT),
            Self::Interrupted => Err(Errno::EINTR),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Failed(errno) => write!(f, "failed ({})", errno),
            Self::TimedOut => f.write_str("timed out"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

/*!
 * Alertable Socket Library
 * Interruptible blocking socket calls
 *
 * A blocking call made through this crate parks its thread in a wait that
 * can be ended from another thread through the caller's [`AlertHandle`].
 * An alerted call fails with `EINTR`, a call that outlives the socket's
 * timeout fails with `ETIMEDOUT`, and the socket is left in the blocking
 * mode it had before the call either way.
 */

pub mod alert;
pub mod cancellable;
pub mod config;
pub mod core;
pub mod monitoring;
pub mod ops;
pub mod timeout;
pub mod transmit;
pub mod wait;

// Re-exports
pub use alert::{clear_pending, current, AlertHandle};
pub use cancellable::{is_would_block, run_cancellable, CallPolicy, Cancellable, Retry};
pub use config::{IoConfig, TimeoutSource};
pub use crate::core::{AlertError, ConfigError, Direction, Interest, NonBlockingGuard, Outcome, SockResult};
pub use monitoring::{init_tracing, CallSpan};
pub use ops::{
    accept, connect, recv, recv_from, recv_vectored, send, send_to, send_vectored, Accepted,
};
pub use timeout::{resolve_timeout, WaitTimeout};
pub use transmit::{transmit_file, transmit_file_with, TransmitOptions};
pub use wait::{wait_for_event, AlertableWaiter, NetworkEvents, Waiter};

pub use nix::errno::Errno;
pub use nix::sys::socket::{MsgFlags, SockaddrStorage};

/*!
 * Thread Alerts
 *
 * The interruption signal an alertable wait listens to. Every thread that
 * performs an alertable wait owns one alert: a non-blocking self-pipe whose
 * read end sits in the wait's poll set next to the socket. Any other thread
 * holding an [`AlertHandle`] can make that wait return early.
 *
 * ## Semantics
 *
 * - An alert delivered while the owner is waiting ends the wait with
 *   `Interrupted`
 * - An alert delivered while the owner is not waiting stays pending and
 *   interrupts the next alertable wait
 * - A wait that reports `Interrupted` consumes every pending alert
 */

use crate::core::errors::AlertError;
use crate::core::sys;
use nix::errno::Errno;
use nix::unistd;
use std::cell::RefCell;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

struct AlertInner {
    reader: OwnedFd,
    writer: OwnedFd,
    waiting: AtomicBool,
    delivered: AtomicU64,
    thread_name: Option<String>,
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<AlertInner>>> = const { RefCell::new(None) };
}

impl AlertInner {
    fn create() -> Result<Self, AlertError> {
        let (reader, writer) = sys::wake_pipe().map_err(AlertError::Pipe)?;
        Ok(Self {
            reader,
            writer,
            waiting: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            thread_name: std::thread::current().name().map(str::to_owned),
        })
    }

    fn signal(&self) -> Result<(), AlertError> {
        loop {
            match unistd::write(&self.writer, &[1u8]) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                // Pipe full: the reader is already readable, the alert is pending
                Err(Errno::EAGAIN) => break,
                Err(errno) => return Err(AlertError::Signal(errno)),
            }
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drain every pending alert byte, returning how many were consumed
    fn consume(&self) -> usize {
        let mut buf = [0u8; 64];
        let mut total = 0;
        loop {
            match unistd::read(self.reader.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
        total
    }
}

/// Cross-thread handle to one thread's alert
#[derive(Clone)]
pub struct AlertHandle {
    inner: Arc<AlertInner>,
}

impl AlertHandle {
    /// Interrupt the owner's current or next alertable wait
    pub fn alert(&self) -> Result<(), AlertError> {
        self.inner.signal()?;
        trace!(
            thread = self.inner.thread_name.as_deref().unwrap_or("<unnamed>"),
            waiting = self.is_waiting(),
            "alert delivered"
        );
        Ok(())
    }

    /// Whether the owner is blocked in an alertable wait right now
    #[inline]
    pub fn is_waiting(&self) -> bool {
        self.inner.waiting.load(Ordering::Acquire)
    }

    /// Name of the owning thread, if it had one
    pub fn thread_name(&self) -> Option<&str> {
        self.inner.thread_name.as_deref()
    }

    /// Number of alerts delivered through any handle to this alert
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Whether two handles refer to the same thread's alert
    pub fn same_alert(&self, other: &AlertHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for AlertHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertHandle")
            .field("thread", &self.inner.thread_name)
            .field("waiting", &self.is_waiting())
            .finish()
    }
}

/// The calling thread's alert, as seen from inside an alertable wait
pub(crate) struct LocalAlert {
    inner: Arc<AlertInner>,
}

impl LocalAlert {
    pub(crate) fn fd(&self) -> BorrowedFd<'_> {
        self.inner.reader.as_fd()
    }

    /// Mark the thread as waiting until the returned guard drops
    pub(crate) fn arm(&self) -> ArmedAlert<'_> {
        self.inner.waiting.store(true, Ordering::Release);
        ArmedAlert { alert: self }
    }

    pub(crate) fn consume(&self) -> usize {
        self.inner.consume()
    }
}

/// Scope during which the thread counts as being in an alertable wait
pub(crate) struct ArmedAlert<'a> {
    alert: &'a LocalAlert,
}

impl Drop for ArmedAlert<'_> {
    fn drop(&mut self) {
        self.alert.inner.waiting.store(false, Ordering::Release);
    }
}

fn with_current<R>(f: impl FnOnce(&Arc<AlertInner>) -> R) -> Result<R, AlertError> {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let inner = match slot.as_ref() {
            Some(inner) => Arc::clone(inner),
            None => {
                let inner = Arc::new(AlertInner::create()?);
                debug!(
                    thread = inner.thread_name.as_deref().unwrap_or("<unnamed>"),
                    "alert created for thread"
                );
                *slot = Some(Arc::clone(&inner));
                inner
            }
        };
        Ok(f(&inner))
    })
}

/// Handle to the calling thread's alert, creating it on first use
pub fn current() -> Result<AlertHandle, AlertError> {
    with_current(|inner| AlertHandle {
        inner: Arc::clone(inner),
    })
}

pub(crate) fn local() -> Result<LocalAlert, AlertError> {
    with_current(|inner| LocalAlert {
        inner: Arc::clone(inner),
    })
}

/// Discard alerts pending on the calling thread. Returns how many were
/// dropped.
pub fn clear_pending() -> Result<usize, AlertError> {
    with_current(|inner| inner.consume())
}

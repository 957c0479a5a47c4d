/*!
 * File Transmit
 *
 * Bulk send of a file's contents over a connected socket. Readiness
 * polling has no event for "file transfer finished", so the blocking form
 * does not go through the socket wait:
 *
 * 1. The transfer is issued asynchronously: a worker thread owns duplicates
 *    of the socket and file descriptors and runs it to completion
 * 2. The caller makes a single alertable wait on the transfer's own
 *    completion handle
 * 3. Interruption and timeout map to `EINTR` / `ETIMEDOUT` exactly like a
 *    socket wait
 *
 * An interrupted transfer is abandoned, not cancelled: the worker finishes
 * (or fails) on its own and releases its descriptors.
 */

use crate::alert;
use crate::config::{IoConfig, TimeoutSource};
use crate::core::errors::io_errno;
use crate::core::sys;
use crate::core::types::{Direction, Outcome, SockResult};
use crate::monitoring::CallSpan;
use crate::timeout::{resolve_timeout, WaitTimeout};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{self, MsgFlags};
use nix::unistd;
use parking_lot::Mutex;
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::sync::Arc;
use tracing::{debug, warn};

/// Parameters of one file transmit
#[derive(Debug, Clone, Default)]
pub struct TransmitOptions {
    /// File bytes to send; 0 sends everything up to end of file
    pub count: usize,
    /// Bytes per send call; 0 uses the configured chunk size
    pub per_send: usize,
    /// Sent before the file data
    pub head: Vec<u8>,
    /// Sent after the file data
    pub tail: Vec<u8>,
}

impl TransmitOptions {
    pub fn whole_file() -> Self {
        Self::default()
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_per_send(mut self, per_send: usize) -> Self {
        self.per_send = per_send;
        self
    }

    pub fn with_head(mut self, head: impl Into<Vec<u8>>) -> Self {
        self.head = head.into();
        self
    }

    pub fn with_tail(mut self, tail: impl Into<Vec<u8>>) -> Self {
        self.tail = tail.into();
        self
    }
}

/// Everything a transfer needs, owned so it can outlive the caller
struct TransmitJob {
    socket: OwnedFd,
    file: File,
    options: TransmitOptions,
    chunk: usize,
    /// Park on POLLOUT when the socket would block instead of failing
    park: bool,
}

impl TransmitJob {
    fn new(socket: BorrowedFd<'_>, file: BorrowedFd<'_>, options: TransmitOptions, config: &IoConfig, park: bool) -> SockResult<Self> {
        let socket = socket.try_clone_to_owned().map_err(|e| io_errno(&e))?;
        let file = File::from(file.try_clone_to_owned().map_err(|e| io_errno(&e))?);
        let chunk = if options.per_send == 0 {
            config.transmit_chunk_size
        } else {
            options.per_send
        };
        Ok(Self {
            socket,
            file,
            options,
            chunk,
            park,
        })
    }

    fn run(&mut self) -> SockResult<usize> {
        let mut total = self.send_all(&self.options.head)?;

        let mut file_sent = 0usize;
        loop {
            let want = match self.options.count {
                0 => self.chunk,
                count if file_sent >= count => break,
                count => self.chunk.min(count - file_sent),
            };
            match copy_chunk(self.socket.as_fd(), &mut self.file, want) {
                Ok(0) => break,
                Ok(n) => file_sent += n,
                Err(Errno::EINTR) => continue,
                Err(errno) if self.park && errno == Errno::EAGAIN => self.await_writable()?,
                Err(errno) => return Err(errno),
            }
        }
        total += file_sent;

        total += self.send_all(&self.options.tail)?;
        Ok(total)
    }

    fn send_all(&self, mut buf: &[u8]) -> SockResult<usize> {
        let len = buf.len();
        while !buf.is_empty() {
            match socket::send(self.socket.as_raw_fd(), buf, send_flags()) {
                Ok(n) => buf = &buf[n..],
                Err(Errno::EINTR) => continue,
                Err(errno) if self.park && errno == Errno::EAGAIN => self.await_writable()?,
                Err(errno) => return Err(errno),
            }
        }
        Ok(len)
    }

    fn await_writable(&self) -> SockResult<()> {
        let mut fds = [PollFd::new(self.socket.as_fd(), PollFlags::POLLOUT)];
        loop {
            match sys::poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno),
            }
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn send_flags() -> MsgFlags {
    MsgFlags::MSG_NOSIGNAL
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn send_flags() -> MsgFlags {
    MsgFlags::empty()
}

/// Move up to `want` bytes from the file's current position to the socket
#[cfg(any(target_os = "linux", target_os = "android"))]
fn copy_chunk(socket: BorrowedFd<'_>, file: &mut File, want: usize) -> SockResult<usize> {
    nix::sys::sendfile::sendfile(socket, file.as_fd(), None, want)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn copy_chunk(socket: BorrowedFd<'_>, file: &mut File, want: usize) -> SockResult<usize> {
    use std::io::{Read, Seek, SeekFrom};

    let mut buf = vec![0u8; want.min(256 * 1024)];
    let read = file.read(&mut buf).map_err(|e| io_errno(&e))?;
    if read == 0 {
        return Ok(0);
    }
    match socket::send(socket.as_raw_fd(), &buf[..read], send_flags()) {
        Ok(sent) => {
            if sent < read {
                let rewind = (read - sent) as i64;
                file.seek(SeekFrom::Current(-rewind)).map_err(|e| io_errno(&e))?;
            }
            Ok(sent)
        }
        Err(errno) => {
            file.seek(SeekFrom::Current(-(read as i64))).map_err(|e| io_errno(&e))?;
            Err(errno)
        }
    }
}

/// Completion handle of an asynchronous transfer: a pipe the worker
/// writes to once the result slot is filled
struct Completion {
    reader: OwnedFd,
    writer: OwnedFd,
    result: Mutex<Option<SockResult<usize>>>,
}

impl Completion {
    fn new() -> SockResult<Arc<Self>> {
        let (reader, writer) = sys::wake_pipe()?;
        Ok(Arc::new(Self {
            reader,
            writer,
            result: Mutex::new(None),
        }))
    }

    fn complete(&self, result: SockResult<usize>) {
        *self.result.lock() = Some(result);
        loop {
            match unistd::write(&self.writer, &[1u8]) {
                Err(Errno::EINTR) => continue,
                // A full pipe is already readable
                Ok(_) | Err(Errno::EAGAIN) => break,
                Err(errno) => {
                    warn!(error = %errno, "could not signal transmit completion");
                    break;
                }
            }
        }
    }

    fn take(&self) -> Option<SockResult<usize>> {
        self.result.lock().take()
    }
}

fn transmit_timeout(socket: BorrowedFd<'_>, config: &IoConfig) -> WaitTimeout {
    match config.transmit_timeout {
        TimeoutSource::Infinite => WaitTimeout::Infinite,
        TimeoutSource::SendTimeout => resolve_timeout(&socket, Direction::Send),
    }
}

/// Single alertable wait on the completion handle
fn wait_for_completion(completion: &Completion, timeout: WaitTimeout) -> Outcome {
    let alert = match alert::local() {
        Ok(alert) => alert,
        Err(e) => return Outcome::Failed(e.errno()),
    };
    let _armed = alert.arm();

    let mut fds = [
        PollFd::new(completion.reader.as_fd(), PollFlags::POLLIN),
        PollFd::new(alert.fd(), PollFlags::POLLIN),
    ];
    match sys::poll(&mut fds, timeout.poll_timeout()) {
        Err(Errno::EINTR) => Outcome::Interrupted,
        Err(errno) => Outcome::Failed(errno),
        Ok(0) => Outcome::TimedOut,
        Ok(_) if !sys::revents(&fds[1]).is_empty() => {
            alert.consume();
            Outcome::Interrupted
        }
        Ok(_) => Outcome::Ready,
    }
}

/// Send a file (plus optional head and tail buffers) over `socket`.
///
/// Returns the number of bytes sent. With `blocking == false` the transfer
/// runs on the calling thread and a would-block is returned as is.
///
/// # Interrupted transfers
///
/// When a blocking transmit returns `EINTR` or `ETIMEDOUT` the transfer is
/// not stopped: it keeps writing file data to the socket from a background
/// thread until it finishes or fails. Anything sent on the same socket in
/// the meantime can land in the middle of that data, so after an
/// interrupted transmit the socket should be closed (or shut down for
/// writing) rather than reused.
pub fn transmit_file<S, F>(socket: &S, file: &F, options: TransmitOptions, blocking: bool) -> SockResult<usize>
where
    S: AsFd + ?Sized,
    F: AsFd + ?Sized,
{
    transmit_file_with(socket, file, options, blocking, &IoConfig::global())
}

/// [`transmit_file`] under an explicit configuration
pub fn transmit_file_with<S, F>(
    socket: &S,
    file: &F,
    options: TransmitOptions,
    blocking: bool,
    config: &IoConfig,
) -> SockResult<usize>
where
    S: AsFd + ?Sized,
    F: AsFd + ?Sized,
{
    let sock_fd = socket.as_fd();

    if !blocking {
        let result = TransmitJob::new(sock_fd, file.as_fd(), options, config, false).and_then(|mut job| job.run());
        debug!(
            fd = sock_fd.as_raw_fd(),
            ok = result.is_ok(),
            "finished non-blocking transmit"
        );
        return result;
    }

    let span = CallSpan::new("transmit_file", sock_fd.as_raw_fd(), config.slow_call_threshold());
    let result = transmit_blocking(sock_fd, file.as_fd(), options, config);
    span.record_result(&result);
    result
}

fn transmit_blocking(
    socket: BorrowedFd<'_>,
    file: BorrowedFd<'_>,
    options: TransmitOptions,
    config: &IoConfig,
) -> SockResult<usize> {
    let mut job = TransmitJob::new(socket, file, options, config, true)?;
    let completion = Completion::new()?;

    let worker_completion = Arc::clone(&completion);
    std::thread::Builder::new()
        .name("transmit-file".into())
        .spawn(move || {
            let result = job.run();
            drop(job);
            worker_completion.complete(result);
        })
        .map_err(|e| io_errno(&e))?;

    let timeout = transmit_timeout(socket, config);
    debug!(
        fd = socket.as_raw_fd(),
        timeout_ms = timeout.duration().map(|d| d.as_millis() as u64),
        "waiting for transmit completion"
    );

    match wait_for_completion(&completion, timeout) {
        Outcome::Ready => completion.take().unwrap_or(Err(Errno::EIO)),
        outcome => {
            debug!(fd = socket.as_raw_fd(), %outcome, "transmit abandoned");
            outcome.into_result().map(|()| 0)
        }
    }
}

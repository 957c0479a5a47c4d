/*!
 * Interrupt Tests
 */

use alertable_net::core::is_nonblocking;
use alertable_net::{recv, send, wait_for_event, AlertHandle, Errno, Interest, MsgFlags, Outcome};
use std::io::Write;
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Run `call` on a fresh thread and hand back its alert handle
fn spawn_alertable<T, F>(call: F) -> (AlertHandle, thread::JoinHandle<T>)
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        tx.send(alertable_net::current().unwrap()).unwrap();
        call()
    });
    (rx.recv().unwrap(), worker)
}

#[test]
fn test_blocked_receive_is_interrupted() {
    let (a, _b) = UnixStream::pair().unwrap();
    let (handle, worker) = spawn_alertable(move || {
        let start = Instant::now();
        let mut buf = [0u8; 16];
        let result = recv(&a, &mut buf, MsgFlags::empty(), true);
        (result, start.elapsed(), is_nonblocking(a.as_fd()).unwrap())
    });

    thread::sleep(Duration::from_millis(50));
    handle.alert().unwrap();

    let (result, elapsed, nonblocking) = worker.join().unwrap();
    assert_eq!(result, Err(Errno::EINTR));
    assert!(elapsed >= Duration::from_millis(40), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1000), "returned after {elapsed:?}");
    assert!(!nonblocking, "socket must be blocking again");
}

#[test]
fn test_blocked_send_is_interrupted() {
    let (a, _b) = UnixStream::pair().unwrap();
    let (handle, worker) = spawn_alertable(move || {
        // Fill the buffer until the next blocking send has to wait
        a.set_nonblocking(true).unwrap();
        let chunk = [0u8; 4096];
        while send(&a, &chunk, MsgFlags::empty(), false).is_ok() {}
        a.set_nonblocking(false).unwrap();

        send(&a, &chunk, MsgFlags::empty(), true)
    });

    thread::sleep(Duration::from_millis(50));
    handle.alert().unwrap();

    assert_eq!(worker.join().unwrap(), Err(Errno::EINTR));
}

#[test]
fn test_send_waits_through_peer_half_close() {
    use std::io::Read;
    use std::net::Shutdown;

    let (a, mut b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    let chunk = [0u8; 4096];
    let mut queued = 0usize;
    while let Ok(n) = send(&a, &chunk, MsgFlags::empty(), false) {
        queued += n;
    }
    a.set_nonblocking(false).unwrap();

    // Peer stops writing but keeps reading
    b.shutdown(Shutdown::Write).unwrap();
    let reader = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let mut drained = vec![0u8; queued];
        b.read_exact(&mut drained).unwrap();
        b
    });

    let result = send(&a, &chunk, MsgFlags::empty(), true);
    assert!(matches!(result, Ok(n) if n > 0), "blocking send returned {result:?}");
    assert!(!is_nonblocking(a.as_fd()).unwrap());
    reader.join().unwrap();
}

#[test]
fn test_alert_before_wait_interrupts_next_call() {
    let (a, _b) = UnixStream::pair().unwrap();
    alertable_net::current().unwrap().alert().unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(recv(&a, &mut buf, MsgFlags::empty(), true), Err(Errno::EINTR));

    // The interruption consumed the alert
    assert_eq!(alertable_net::clear_pending().unwrap(), 0);
}

#[test]
fn test_alert_wins_over_ready_socket() {
    let (a, mut b) = UnixStream::pair().unwrap();
    b.write_all(b"data").unwrap();
    alertable_net::current().unwrap().alert().unwrap();

    assert_eq!(wait_for_event(&a, Interest::Read), Outcome::Interrupted);
}

#[test]
fn test_handle_reports_waiting_owner() {
    let (a, mut b) = UnixStream::pair().unwrap();
    let (handle, worker) = spawn_alertable(move || {
        let mut buf = [0u8; 4];
        recv(&a, &mut buf, MsgFlags::empty(), true)
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while !handle.is_waiting() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(handle.is_waiting());

    b.write_all(b"ok").unwrap();
    assert_eq!(worker.join().unwrap(), Ok(2));
    assert!(!handle.is_waiting());
}

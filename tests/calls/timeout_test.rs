/*!
 * Timeout Tests
 */

use alertable_net::core::is_nonblocking;
use alertable_net::{recv, resolve_timeout, Direction, Errno, MsgFlags, WaitTimeout};
use std::io::Write;
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_receive_times_out_after_socket_timeout() {
    let (a, _b) = UnixStream::pair().unwrap();
    a.set_read_timeout(Some(Duration::from_millis(100))).unwrap();

    let start = Instant::now();
    let mut buf = [0u8; 8];
    let result = recv(&a, &mut buf, MsgFlags::empty(), true);
    let elapsed = start.elapsed();

    assert_eq!(result, Err(Errno::ETIMEDOUT));
    assert!(elapsed >= Duration::from_millis(90), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5));
    assert!(!is_nonblocking(a.as_fd()).unwrap());
}

#[test]
fn test_timeout_resolved_per_direction() {
    let (a, _b) = UnixStream::pair().unwrap();
    a.set_write_timeout(Some(Duration::from_millis(250))).unwrap();

    assert_eq!(
        resolve_timeout(&a, Direction::Send),
        WaitTimeout::After(Duration::from_millis(250))
    );
    assert_eq!(resolve_timeout(&a, Direction::Receive), WaitTimeout::Infinite);
}

#[test]
fn test_unset_timeout_waits_for_late_data() {
    let (a, mut b) = UnixStream::pair().unwrap();
    assert!(resolve_timeout(&a, Direction::Receive).is_infinite());

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        b.write_all(b"late").unwrap();
        b
    });

    let mut buf = [0u8; 8];
    let n = recv(&a, &mut buf, MsgFlags::empty(), true).unwrap();
    assert_eq!(&buf[..n], b"late");
    writer.join().unwrap();
}

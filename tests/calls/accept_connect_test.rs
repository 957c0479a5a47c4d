/*!
 * Accept and Connect Tests
 */

use alertable_net::core::is_nonblocking;
use alertable_net::{
    accept, connect, send, AlertableWaiter, CallPolicy, Cancellable, Errno, Interest, IoConfig,
    MsgFlags, TimeoutSource, WaitTimeout,
};
use std::cell::Cell;
use std::os::unix::net::UnixStream;
use std::time::Instant;
use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType, SockaddrIn};
use std::net::{SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn tcp_socket() -> OwnedFd {
    socket(AddressFamily::Inet, SockType::Stream, SockFlag::empty(), None).unwrap()
}

fn loopback_listener() -> (TcpListener, SocketAddrV4) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = match listener.local_addr().unwrap() {
        std::net::SocketAddr::V4(addr) => addr,
        other => panic!("unexpected address {other}"),
    };
    (listener, addr)
}

#[test]
fn test_accept_waits_for_late_client() {
    let (listener, addr) = loopback_listener();

    let client = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        TcpStream::connect(addr).unwrap()
    });

    let accepted = accept(&listener, true).unwrap();
    assert!(accepted.peer.is_some());
    assert!(!is_nonblocking(accepted.socket.as_fd()).unwrap());
    assert!(!is_nonblocking(listener.as_fd()).unwrap());

    client.join().unwrap();
}

#[test]
fn test_non_blocking_accept_without_client() {
    let (listener, _) = loopback_listener();
    listener.set_nonblocking(true).unwrap();

    assert_eq!(accept(&listener, false).map(|_| ()), Err(Errno::EAGAIN));
}

#[test]
fn test_connect_to_listener_succeeds() {
    let (listener, addr) = loopback_listener();
    let fd = tcp_socket();

    assert_eq!(connect(&fd, &SockaddrIn::from(addr), true), Ok(()));
    assert!(!is_nonblocking(fd.as_fd()).unwrap());

    let accepted = accept(&listener, true).unwrap();
    assert!(accepted.peer.is_some());
}

#[test]
fn test_connect_refused() {
    let (listener, addr) = loopback_listener();
    drop(listener);

    let fd = tcp_socket();
    assert_eq!(connect(&fd, &SockaddrIn::from(addr), true), Err(Errno::ECONNREFUSED));
    assert!(!is_nonblocking(fd.as_fd()).unwrap());
}

#[test]
fn test_connect_wait_deadline_follows_config() {
    let fd = tcp_socket();
    let stream = TcpStream::from(fd);
    stream.set_write_timeout(Some(Duration::from_millis(100))).unwrap();

    let default = AlertableWaiter::with_config(Arc::new(IoConfig::default()));
    assert_eq!(default.timeout_for(stream.as_fd(), Interest::Connect), WaitTimeout::Infinite);

    let bounded = AlertableWaiter::with_config(Arc::new(IoConfig {
        connect_timeout: TimeoutSource::SendTimeout,
        ..IoConfig::default()
    }));
    assert_eq!(
        bounded.timeout_for(stream.as_fd(), Interest::Connect),
        WaitTimeout::After(Duration::from_millis(100))
    );
}

#[test]
fn test_connect_times_out_after_send_timeout() {
    // A socket whose send space never frees up stands in for a handshake
    // that never completes: the connect wait sees no writability
    let (a, _b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    let chunk = [0u8; 4096];
    while send(&a, &chunk, MsgFlags::empty(), false).is_ok() {}
    a.set_nonblocking(false).unwrap();
    a.set_write_timeout(Some(Duration::from_millis(100))).unwrap();

    let config = IoConfig {
        connect_timeout: TimeoutSource::SendTimeout,
        ..IoConfig::default()
    };
    let wrapper = Cancellable::with_waiter(AlertableWaiter::with_config(Arc::new(config)));
    let calls = Cell::new(0u32);

    let start = Instant::now();
    let result = wrapper.run(&a, true, CallPolicy::CONNECT, || {
        calls.set(calls.get() + 1);
        Err::<(), _>(Errno::EINPROGRESS)
    });
    let elapsed = start.elapsed();

    assert_eq!(result, Err(Errno::ETIMEDOUT));
    assert_eq!(calls.get(), 1);
    assert!(elapsed >= Duration::from_millis(90), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");
    assert!(!is_nonblocking(a.as_fd()).unwrap());
}

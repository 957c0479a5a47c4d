/*!
 * Non-blocking Transparency Tests
 *
 * With `blocking == false` the entry points are the native calls.
 */

use alertable_net::core::is_nonblocking;
use alertable_net::{recv, send, Errno, MsgFlags};
use proptest::prelude::*;
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_non_blocking_recv_matches_native(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        start_nonblocking in any::<bool>(),
    ) {
        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(start_nonblocking).unwrap();
        b.write_all(&payload).unwrap();

        let mut buf = vec![0u8; 1024];
        let result = if payload.is_empty() && !start_nonblocking {
            // A native blocking recv would park here
            None
        } else {
            Some(recv(&a, &mut buf, MsgFlags::empty(), false))
        };

        match result {
            Some(Ok(n)) => prop_assert_eq!(&buf[..n], &payload[..]),
            Some(Err(errno)) => {
                prop_assert!(payload.is_empty());
                prop_assert_eq!(errno, Errno::EAGAIN);
            }
            None => {}
        }
        prop_assert_eq!(is_nonblocking(a.as_fd()).unwrap(), start_nonblocking);
    }

    #[test]
    fn prop_blocking_send_delivers_and_restores_mode(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        start_nonblocking in any::<bool>(),
    ) {
        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(start_nonblocking).unwrap();

        let sent = send(&a, &payload, MsgFlags::empty(), true).unwrap();
        prop_assert_eq!(sent, payload.len());
        prop_assert_eq!(is_nonblocking(a.as_fd()).unwrap(), start_nonblocking);

        let mut out = vec![0u8; payload.len()];
        b.read_exact(&mut out).unwrap();
        prop_assert_eq!(out, payload);
    }
}

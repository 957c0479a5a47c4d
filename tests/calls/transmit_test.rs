/*!
 * File Transmit Tests
 */

use alertable_net::{
    transmit_file_with, Errno, IoConfig, TimeoutSource, TransmitOptions,
};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

fn source(contents: &[u8]) -> File {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(contents).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file
}

fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

#[test]
fn test_transmit_sends_head_file_and_tail() {
    let (client, mut server) = tcp_pair();
    let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let file = source(&body);
    let options = TransmitOptions::whole_file()
        .with_head(b"HEAD".to_vec())
        .with_tail(b"TAIL".to_vec());

    let reader = thread::spawn(move || {
        let mut out = Vec::new();
        server.read_to_end(&mut out).unwrap();
        out
    });

    let config = IoConfig {
        transmit_chunk_size: 8192,
        ..IoConfig::default()
    };
    let sent = transmit_file_with(&client, &file, options, true, &config).unwrap();
    assert_eq!(sent, body.len() + 8);
    drop(client);

    let out = reader.join().unwrap();
    assert_eq!(&out[..4], b"HEAD");
    assert_eq!(&out[4..out.len() - 4], &body[..]);
    assert_eq!(&out[out.len() - 4..], b"TAIL");
}

#[test]
fn test_transmit_interrupted_by_alert() {
    let (a, b) = UnixStream::pair().unwrap();
    let file = source(&vec![1u8; 16 * 1024 * 1024]);

    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        tx.send(alertable_net::current().unwrap()).unwrap();
        transmit_file_with(&a, &file, TransmitOptions::whole_file(), true, &IoConfig::default())
    });

    let handle = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(50));
    handle.alert().unwrap();

    assert_eq!(worker.join().unwrap(), Err(Errno::EINTR));
    // Unblocks the abandoned transfer
    drop(b);
}

#[test]
fn test_transmit_honors_send_timeout_when_configured() {
    let (a, _b) = UnixStream::pair().unwrap();
    a.set_write_timeout(Some(Duration::from_millis(100))).unwrap();
    let file = source(&vec![2u8; 16 * 1024 * 1024]);
    let config = IoConfig {
        transmit_timeout: TimeoutSource::SendTimeout,
        ..IoConfig::default()
    };

    let start = Instant::now();
    let result = transmit_file_with(&a, &file, TransmitOptions::whole_file(), true, &config);

    assert_eq!(result, Err(Errno::ETIMEDOUT));
    assert!(start.elapsed() >= Duration::from_millis(90));
}

#[test]
fn test_abandoned_transmit_keeps_sending() {
    let (a, mut b) = UnixStream::pair().unwrap();
    let body = vec![3u8; 4 * 1024 * 1024];
    let file = source(&body);
    alertable_net::current().unwrap().alert().unwrap();

    let result = transmit_file_with(&a, &file, TransmitOptions::whole_file(), true, &IoConfig::default());
    assert_eq!(result, Err(Errno::EINTR));
    drop(a);

    // The background transfer still delivers the whole file, then closes
    let mut out = Vec::new();
    b.read_to_end(&mut out).unwrap();
    assert_eq!(out.len(), body.len());
}

/*!
 * Alertable Echo Server
 *
 * Line-agnostic TCP echo server whose threads all sit in alertable
 * blocking calls:
 * - One accept thread
 * - One thread per connection, echoing until the peer closes
 * - The main thread watches stdin and, on `quit` or end of input, alerts
 *   every other thread and joins them
 *
 * Environment variables:
 * - ALERTABLE_ECHO_ADDR: listen address (default: 127.0.0.1:7878)
 * - ALERTABLE_*: see `IoConfig::from_env`
 */

use alertable_net::{accept, init_tracing, recv, send, AlertHandle, Errno, IoConfig, MsgFlags};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::io::BufRead;
use std::net::TcpListener;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_ADDR: &str = "127.0.0.1:7878";

/// Alert handles and join handles of every running server thread
#[derive(Default)]
struct Workers {
    stopping: bool,
    alerts: Vec<AlertHandle>,
    threads: Vec<JoinHandle<()>>,
}

type Registry = Arc<Mutex<Workers>>;

/// Register the calling thread's alert; false once shutdown has begun
fn register_current(registry: &Registry) -> bool {
    let handle = match alertable_net::current() {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "no alert for thread");
            return false;
        }
    };
    let mut workers = registry.lock();
    if workers.stopping {
        return false;
    }
    workers.alerts.push(handle);
    true
}

fn serve_connection(registry: Registry, socket: OwnedFd, peer: String) {
    if !register_current(&registry) {
        return;
    }
    info!(%peer, "connection opened");

    let mut buf = [0u8; 4096];
    let mut echoed = 0usize;
    'conn: loop {
        let n = match recv(&socket, &mut buf, MsgFlags::empty(), true) {
            Ok(0) => break,
            Ok(n) => n,
            Err(Errno::EINTR) => {
                debug!(%peer, "receive interrupted");
                break;
            }
            Err(errno) => {
                warn!(%peer, error = %errno, "receive failed");
                break;
            }
        };

        let mut pending = &buf[..n];
        while !pending.is_empty() {
            match send(&socket, pending, MsgFlags::empty(), true) {
                Ok(sent) => pending = &pending[sent..],
                Err(errno) => {
                    warn!(%peer, error = %errno, "send failed");
                    break 'conn;
                }
            }
        }
        echoed += n;
    }

    info!(%peer, echoed, "connection closed");
}

fn accept_loop(registry: Registry, listener: TcpListener) {
    if !register_current(&registry) {
        return;
    }

    loop {
        let accepted = match accept(&listener, true) {
            Ok(accepted) => accepted,
            Err(Errno::EINTR) => {
                info!("accept interrupted, no longer accepting");
                return;
            }
            Err(errno) => {
                warn!(error = %errno, "accept failed");
                continue;
            }
        };

        let peer = accepted
            .peer
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        let conn_registry = Arc::clone(&registry);
        let spawned = std::thread::Builder::new()
            .name(format!("echo-{peer}"))
            .spawn(move || serve_connection(conn_registry, accepted.socket, peer));

        match spawned {
            Ok(handle) => registry.lock().threads.push(handle),
            Err(e) => warn!(error = %e, "could not spawn connection thread"),
        }
    }
}

/// Block until stdin says `quit` or closes
fn wait_for_quit() {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) if line.trim() == "quit" => return,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                return;
            }
        }
    }
}

fn shutdown(registry: &Registry) {
    let threads = {
        let mut workers = registry.lock();
        workers.stopping = true;
        for handle in &workers.alerts {
            if let Err(e) = handle.alert() {
                warn!(thread = ?handle.thread_name(), error = %e, "could not alert thread");
            }
        }
        std::mem::take(&mut workers.threads)
    };

    // Threads spawned while the acceptor was being alerted land in the registry late
    for thread in threads {
        if thread.join().is_err() {
            warn!("server thread panicked");
        }
    }
    let late = std::mem::take(&mut registry.lock().threads);
    for thread in late {
        let _ = thread.join();
    }
}

fn main() -> Result<()> {
    let config = IoConfig::from_env().context("invalid ALERTABLE_* configuration")?;
    init_tracing(&config);
    config.clone().install().context("could not install configuration")?;

    let addr = std::env::var("ALERTABLE_ECHO_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr).with_context(|| format!("could not bind {addr}"))?;
    info!(addr = %listener.local_addr()?, ?config, "echo server listening, type `quit` to stop");

    let registry: Registry = Arc::default();
    let accept_registry = Arc::clone(&registry);
    let acceptor = std::thread::Builder::new()
        .name("echo-accept".into())
        .spawn(move || accept_loop(accept_registry, listener))
        .context("could not spawn accept thread")?;
    registry.lock().threads.push(acceptor);

    wait_for_quit();
    info!("shutting down");
    shutdown(&registry);
    info!("all threads joined");
    Ok(())
}

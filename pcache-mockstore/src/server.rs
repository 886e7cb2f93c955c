//! # TCP Server
//!
//! Accept RESP2 connections, parse commands, and dispatch them to the
//! shared keyspace with minimal overhead.
//!
//! `MockStore` runs the same accept loop on a background thread so blocking
//! client tests can talk to a real socket.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::commands::{dispatch, Session};
use crate::protocol::{resp_error, RespError, RespParser};
use crate::store::Store;

/// State shared by every connection of one server.
#[derive(Debug)]
pub struct Shared {
    store: Mutex<Store>,
    password: Option<String>,
    accepted: AtomicU64,
}

impl Shared {
    pub fn new(password: Option<String>) -> Self {
        Shared {
            store: Mutex::new(Store::new()),
            password,
            accepted: AtomicU64::new(0),
        }
    }

    /// Connections accepted since startup.
    pub fn connections_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Runs `f` with the keyspace locked.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        f(&mut self.store.lock())
    }
}

/// Accepts connections until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: impl Future<Output = ()>,
) -> io::Result<()> {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                shared.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(%peer, "accepted connection");

                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, shared).await {
                        debug!(%peer, error = %err, "connection closed with error");
                    }
                });
            }
            _ = &mut shutdown => break,
        }
    }

    Ok(())
}

/// Handles a single TCP client connection.
async fn handle_connection(mut stream: TcpStream, shared: Arc<Shared>) -> io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut session = Session::new(shared.password.is_some());

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) => {
                    let response =
                        dispatch(&args, &mut session, &shared.store, shared.password.as_deref());
                    stream.write_all(&response).await?;
                }
                Ok(None) => break,
                Err(RespError::Protocol) => {
                    stream.write_all(&resp_error("protocol error")).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

/// Options for an in-process server.
#[derive(Debug, Clone)]
pub struct MockStoreConfig {
    /// Bind address; port 0 picks a free port.
    pub addr: String,
    /// Require AUTH with this password.
    pub password: Option<String>,
}

impl Default for MockStoreConfig {
    fn default() -> Self {
        MockStoreConfig {
            addr: "127.0.0.1:0".to_string(),
            password: None,
        }
    }
}

/// A running server on a background thread; stops when dropped.
pub struct MockStore {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<io::Result<()>>>,
}

impl MockStore {
    pub fn start() -> io::Result<Self> {
        Self::start_with(MockStoreConfig::default())
    }

    pub fn start_with(config: MockStoreConfig) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind(&config.addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let shared = Arc::new(Shared::new(config.password));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("pcache-mockstore".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = TcpListener::from_std(listener)?;
                    serve(listener, server_shared, async {
                        let _ = shutdown_rx.await;
                    })
                    .await
                })
            })?;

        debug!(%addr, "mock store started");
        Ok(MockStore {
            addr,
            shared,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Address formatted for `ClientConfig::addr`.
    pub fn addr_string(&self) -> String {
        self.addr.to_string()
    }

    pub fn connections_accepted(&self) -> u64 {
        self.shared.connections_accepted()
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        self.shared.with_store(f)
    }
}

impl Drop for MockStore {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "mock store exited with error"),
                Err(_) => warn!("mock store thread panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn roundtrip(stream: &mut std::net::TcpStream, request: &[u8], expected_len: usize) -> Vec<u8> {
        stream.write_all(request).unwrap();
        let mut reply = vec![0u8; expected_len];
        stream.read_exact(&mut reply).unwrap();
        reply
    }

    #[test]
    fn serves_pipelined_commands() {
        let server = MockStore::start().unwrap();
        let mut stream = std::net::TcpStream::connect(server.addr()).unwrap();

        let reply = roundtrip(
            &mut stream,
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n",
            b"+OK\r\n$1\r\nv\r\n".len(),
        );
        assert_eq!(reply, b"+OK\r\n$1\r\nv\r\n");
        assert_eq!(server.connections_accepted(), 1);
        assert_eq!(server.with_store(|store| store.db(0).len()), 1);
    }

    #[test]
    fn protocol_error_closes_connection() {
        let server = MockStore::start().unwrap();
        let mut stream = std::net::TcpStream::connect(server.addr()).unwrap();
        stream.write_all(b"*1\r\n:5\r\n").unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, b"-ERR protocol error\r\n");
    }
}

//! Echo server on top of [`tokio::net::TcpListener`], plugged into
//! [`destroyable_server`] through its [`Server`] and [`Connection`] traits.
//!
//! Shared by the `tcp_destroy` demo and the integration tests.

#![allow(dead_code)]

use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use destroyable_server::{close_signal, CloseNotifier, CloseSignal, Connection, Server, Tracker};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    task::JoinHandle,
};

/// Server side of an echo connection, running in its own task.
///
/// The task owns the handle until the stream is gone.
#[derive(Debug)]
pub struct TcpConnection {
    peer: SocketAddr,
    kill: Mutex<Option<CloseNotifier>>,
    closed: CloseSignal,
}

impl TcpConnection {
    pub fn spawn(stream: TcpStream, peer: SocketAddr) -> Arc<Self> {
        let (kill_tx, kill_rx) = close_signal();
        let (closed_tx, closed_rx) = close_signal();

        let conn = Arc::new(Self {
            peer,
            kill: Mutex::new(Some(kill_tx)),
            closed: closed_rx,
        });

        let handle = conn.clone();
        tokio::spawn(async move {
            let _handle = handle;
            // closed once the stream is dropped
            let _closed_tx = closed_tx;
            tokio::select! {
                _ = kill_rx => {
                    tracing::debug!("connection from {}: destroyed", peer);
                }
                result = echo(stream) => {
                    tracing::debug!("connection from {}: ended: {:?}", peer, result);
                }
            }
        });

        conn
    }
}

async fn echo(mut stream: TcpStream) -> io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        stream.write_all(&buf[..n]).await?;
    }
}

impl Connection for TcpConnection {
    fn remote_addr(&self) -> SocketAddr {
        self.peer
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    fn closed(&self) -> CloseSignal {
        self.closed.clone()
    }

    fn destroy(&self) {
        if let Some(kill) = self.kill.lock().unwrap().take() {
            kill.notify();
        }
    }
}

/// Echo server on top of a [`TcpListener`].
#[derive(Debug)]
pub struct TcpServer {
    local_addr: SocketAddr,
    listener: Option<TcpListener>,
    tracker: Option<Tracker>,
    stop: Option<CloseNotifier>,
    accept_task: Option<JoinHandle<()>>,
}

impl TcpServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            local_addr: listener.local_addr()?,
            listener: Some(listener),
            tracker: None,
            stop: None,
            accept_task: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts the accept loop.
    pub fn start(&mut self) {
        let (Some(listener), Some(tracker)) = (self.listener.take(), self.tracker.clone()) else {
            return;
        };
        let (stop_tx, mut stop_rx) = close_signal();
        self.stop = Some(stop_tx);
        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        tracing::debug!("listener: stop accepting");
                        break;
                    }
                    result = listener.accept() => match result {
                        Ok((stream, peer)) => {
                            tracing::debug!("listener: accepted connection from {}", peer);
                            tracker.track(TcpConnection::spawn(stream, peer));
                        }
                        Err(err) => tracing::warn!("accept error: {:?}", err),
                    }
                }
            }
        }));
    }
}

impl Server for TcpServer {
    type Error = io::Error;

    fn observe_connections(&mut self, tracker: Tracker) {
        self.tracker = Some(tracker);
    }

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        if let Some(stop) = self.stop.take() {
            stop.notify();
        }
        let accept_task = self.accept_task.take();
        async move {
            match accept_task {
                Some(task) => task
                    .await
                    .map_err(|err| io::Error::new(io::ErrorKind::Other, err)),
                None => Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "server is not running",
                )),
            }
        }
    }
}

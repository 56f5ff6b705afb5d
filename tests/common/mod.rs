#![allow(dead_code)]

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use destroyable_server::{CloseSignal, Connection};
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[path = "../../demos/echo.rs"]
mod echo;

pub use echo::{TcpConnection, TcpServer};

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

/// A session layered on top of a [`TcpConnection`], e.g. a tunnel.
///
/// Never reports closed itself, only its transport does.
#[derive(Debug)]
pub struct TunnelConnection {
    transport: Arc<TcpConnection>,
}

impl TunnelConnection {
    pub fn new(transport: Arc<TcpConnection>) -> Arc<Self> {
        Arc::new(Self { transport })
    }
}

impl Connection for TunnelConnection {
    fn remote_addr(&self) -> SocketAddr {
        self.transport.remote_addr()
    }

    fn parent(&self) -> Option<&dyn Connection> {
        Some(&*self.transport)
    }

    fn closed(&self) -> CloseSignal {
        self.transport.closed()
    }

    fn destroy(&self) {
        self.transport.destroy();
    }
}

/// Connected loopback stream pair, outside of any tracked server.
pub async fn stream_pair() -> io::Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let client = TcpStream::connect(listener.local_addr()?).await?;
    let (server, _) = listener.accept().await?;
    Ok((client, server))
}

/// Polls `condition` until it holds or `limit` elapsed.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Reads from `stream` until the peer closed it, returning `true` on EOF or reset.
pub async fn peer_closed(stream: &mut TcpStream, limit: Duration) -> bool {
    let mut buf = [0u8; 64];
    matches!(
        tokio::time::timeout(limit, stream.read(&mut buf)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

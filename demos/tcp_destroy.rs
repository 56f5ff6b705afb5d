//! An example showcasing how to use [`destroyable_server`] to forcefully
//! shut down a [`tokio`] echo server which makes use of
//! [`tokio::net::TcpListener`], even while clients keep their
//! connections open.
//!
//! Run it, connect with e.g. `nc 127.0.0.1 8080`, then press Ctrl+C.
//!
//! [`tokio`]: https://docs.rs/tokio
//! [`tokio::net::TcpListener`]: https://docs.rs/tokio/latest/tokio/net/struct.TcpListener.html

mod echo;

use std::{io, time::Duration};

use destroyable_server::DestroyableExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use echo::TcpServer;

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let mut server = TcpServer::bind("127.0.0.1:8080").await?.into_destroyable();
    tracing::info!("listening on {}", server.local_addr());
    server.start();

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!(
        "signal received: destroying server with {} open connection(s)",
        server.connection_count()
    );

    match server.destroy_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            tracing::info!("destroyed {}s after signal", elapsed.as_secs_f64());
        }
        Err(e) => {
            tracing::warn!(error = &e as &dyn std::error::Error, "destroy failed");
        }
    }

    tracing::info!("Bye!");
    Ok(())
}

//! Forceful, deterministic shutdown for [`tokio`] servers.
//!
//! Closing a listener only stops it from accepting new connections:
//! idle keep-alive connections, tunnels or hung clients keep the process
//! from exiting. Wrapping a server with [`destroyable`] tracks every
//! connection it accepts, and [`Destroyable::destroy`] closes the server,
//! destroys all open connections and resolves only once each of them
//! actually closed.
//!
//! The crate does not accept connections nor speak any protocol itself.
//! Servers and their connections plug in through the [`Server`] and
//! [`Connection`] traits; see `demos/tcp_destroy.rs` for a
//! [`tokio::net::TcpListener`] based server.
//!
//! [`tokio`]: https://docs.rs/tokio
//! [`tokio::net::TcpListener`]: https://docs.rs/tokio/latest/tokio/net/struct.TcpListener.html

mod connection;
mod registry;
mod shutdown;
mod sync;
mod tracker;
mod trigger;

#[cfg(test)]
#[cfg_attr(loom, allow(dead_code))]
mod test_util;

pub use connection::{is_closed, Connection};
pub use registry::{Registry, RegistryKey, Snapshot};
pub use shutdown::{destroyable, DestroyError, Destroyable, DestroyableExt, Server};
pub use tracker::{ShutdownState, Tracker};
pub use trigger::{close_signal, CloseNotifier, CloseSignal};

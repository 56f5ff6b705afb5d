use std::net::SocketAddr;

use crate::CloseSignal;

/// A single accepted transport connection, as seen by a [`Tracker`].
///
/// Implementations are handles: the tracker never owns the underlying
/// transport, it only watches for its closure and may ask it to terminate.
///
/// [`Tracker`]: crate::Tracker
pub trait Connection: Send + Sync + 'static {
    /// Remote peer of the connection, used to derive its [`RegistryKey`].
    ///
    /// [`RegistryKey`]: crate::RegistryKey
    fn remote_addr(&self) -> SocketAddr;

    /// Closed or destroyed flag of this handle.
    ///
    /// Wrapping handles may keep reporting `false` after only the wrapped
    /// transport was destroyed, which is why [`is_closed`] also consults
    /// [`Connection::parent`].
    fn is_closed(&self) -> bool {
        false
    }

    /// The handle this connection is layered on top of, if any
    /// (e.g. the raw socket underneath an encrypted session).
    ///
    /// Parent chains must be finite and acyclic.
    fn parent(&self) -> Option<&dyn Connection> {
        None
    }

    /// The "closed" event of this connection.
    ///
    /// Must resolve exactly once the connection is fully closed,
    /// and immediately if it already is.
    fn closed(&self) -> CloseSignal;

    /// Abruptly terminates the connection. Data in flight may be lost.
    fn destroy(&self);
}

/// Returns `true` if `conn` or any handle it is layered on reports closed.
pub fn is_closed(conn: &dyn Connection) -> bool {
    let mut current = Some(conn);
    while let Some(conn) = current {
        if conn.is_closed() {
            return true;
        }
        current = conn.parent();
    }
    false
}

use std::{
    collections::HashMap,
    fmt,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Weak},
};

use crate::Connection;

/// Key under which a connection is registered: its remote address and port.
///
/// Not unique: several live connections may share one key,
/// e.g. a tunnel and the connection carried through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    address: IpAddr,
    port: u16,
}

impl RegistryKey {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for RegistryKey {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Ordered view of the registry taken at one point in time.
///
/// Connections of a key are listed in registration order.
/// Handles dropped by their owner are left out.
pub type Snapshot = Vec<(RegistryKey, Vec<Arc<dyn Connection>>)>;

/// Live connections, grouped per [`RegistryKey`] in registration order.
///
/// A connection is present from the moment it is registered until it is
/// unregistered, at most once, and keys never map to an empty sequence.
/// Connections are held by weak reference: the registry never keeps a
/// handle alive. It does not synchronise itself either, see [`Tracker`]
/// for the shared variant.
///
/// [`Tracker`]: crate::Tracker
#[derive(Default)]
pub struct Registry {
    connections: HashMap<RegistryKey, Vec<Weak<dyn Connection>>>,
    len: usize,
}

// data pointer only, vtables are not guaranteed to be unique
fn conn_ptr(conn: &Weak<dyn Connection>) -> *const () {
    conn.as_ptr() as *const ()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `conn` to the sequence of `key`, creating it if needed.
    ///
    /// Returns `false`, leaving the registry untouched,
    /// if this very connection is already registered under `key`.
    pub fn register(&mut self, key: RegistryKey, conn: &Arc<dyn Connection>) -> bool {
        let conn = Arc::downgrade(conn);
        let conns = self.connections.entry(key).or_default();
        if conns.iter().any(|c| conn_ptr(c) == conn_ptr(&conn)) {
            tracing::trace!("registry: connection already registered for {}", key);
            return false;
        }
        conns.push(conn);
        self.len += 1;
        tracing::trace!(
            "registry: register {} (#{} for key, {} total)",
            key,
            conns.len(),
            self.len
        );
        true
    }

    /// Removes `conn` from the sequence of `key`, matched by identity.
    ///
    /// Works for handles that were dropped in the meantime. Unknown keys and
    /// connections are ignored and `false` is returned, so duplicate or late
    /// close events are harmless.
    pub fn unregister(&mut self, key: &RegistryKey, conn: &Weak<dyn Connection>) -> bool {
        let Some(conns) = self.connections.get_mut(key) else {
            tracing::trace!("registry: unregister for unknown key {}", key);
            return false;
        };
        let Some(index) = conns.iter().position(|c| conn_ptr(c) == conn_ptr(conn)) else {
            tracing::trace!("registry: unregister for unknown connection of {}", key);
            return false;
        };
        conns.remove(index);
        if conns.is_empty() {
            self.connections.remove(key);
        }
        self.len -= 1;
        tracing::trace!("registry: unregister {} ({} total)", key, self.len);
        true
    }

    pub fn snapshot(&self) -> Snapshot {
        self.connections
            .iter()
            .filter_map(|(key, conns)| {
                let conns: Vec<_> = conns.iter().filter_map(Weak::upgrade).collect();
                (!conns.is_empty()).then_some((*key, conns))
            })
            .collect()
    }

    /// Number of registered connections, across all keys.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &RegistryKey, conn: &Arc<dyn Connection>) -> bool {
        let conn = Arc::downgrade(conn);
        self.connections
            .get(key)
            .is_some_and(|conns| conns.iter().any(|c| conn_ptr(c) == conn_ptr(&conn)))
    }

    #[cfg(test)]
    pub(crate) fn key_count(&self) -> usize {
        self.connections.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.connections
                    .iter()
                    .map(|(key, conns)| (key.to_string(), conns.len())),
            )
            .finish()
    }
}

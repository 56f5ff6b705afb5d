use std::{fmt, sync::Arc};

use crate::{
    registry::{Registry, RegistryKey, Snapshot},
    sync::{self, AtomicU8, Mutex, Ordering},
    Connection,
};

/// Lifecycle of a [`Destroyable`] server.
///
/// [`Destroyable`]: crate::Destroyable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownState {
    /// Accepting connections, [`Destroyable::destroy`] not yet called.
    ///
    /// [`Destroyable::destroy`]: crate::Destroyable::destroy
    Live,
    /// Destroy in progress: the server was asked to stop accepting
    /// and tracked connections are being torn down.
    Closing,
    /// The server closed and every tracked connection confirmed its closure.
    Closed,
}

impl ShutdownState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ShutdownState::Live,
            1 => ShutdownState::Closing,
            _ => ShutdownState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ShutdownState::Live => 0,
            ShutdownState::Closing => 1,
            ShutdownState::Closed => 2,
        }
    }
}

struct Shared {
    registry: Mutex<Registry>,
    state: AtomicU8,
}

/// Connection observer of a [`Destroyable`] server.
///
/// Handed to the server through [`Server::observe_connections`],
/// its accept path calls [`Tracker::track`] (or [`Tracker::track_secure`])
/// for every accepted connection. Each tracked connection stays registered
/// until its [`Connection::closed`] event fires.
///
/// Can be cloned cheaply, all clones share the same registry.
///
/// [`Destroyable`]: crate::Destroyable
/// [`Server::observe_connections`]: crate::Server::observe_connections
#[derive(Clone)]
pub struct Tracker {
    shared: sync::Arc<Shared>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self {
            shared: sync::Arc::new(Shared {
                registry: Mutex::new(Registry::new()),
                state: AtomicU8::new(ShutdownState::Live.as_u8()),
            }),
        }
    }

    /// Tracks a newly accepted connection.
    ///
    /// Only a weak reference is kept: the server or the task driving the
    /// connection owns the handle. A connection whose every handle is
    /// dropped fires its close event and leaves the registry.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime,
    /// as the close observer is spawned as a task.
    pub fn track(&self, conn: Arc<dyn Connection>) {
        self.track_kind(conn, "connection");
    }

    /// Tracks a newly accepted secure (encrypted) connection.
    ///
    /// Behaves exactly like [`Tracker::track`].
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn track_secure(&self, conn: Arc<dyn Connection>) {
        self.track_kind(conn, "secure connection");
    }

    fn track_kind(&self, conn: Arc<dyn Connection>, kind: &'static str) {
        let key = RegistryKey::from(conn.remote_addr());
        // armed before registering, so no close is missed
        let closed = conn.closed();

        if !self.registry().register(key, &conn) {
            return;
        }
        tracing::trace!("tracker: {} accepted from {}", kind, key);

        let conn = Arc::downgrade(&conn);
        let shared = self.shared.clone();
        tokio::spawn(async move {
            closed.await;
            let removed = shared.registry.lock().unwrap().unregister(&key, &conn);
            tracing::trace!("tracker: connection from {} closed (removed: {})", key, removed);
        });
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ShutdownState) {
        let previous = self.shared.state.swap(state.as_u8(), Ordering::SeqCst);
        tracing::trace!(
            "tracker: state {:?} -> {:?}",
            ShutdownState::from_u8(previous),
            state
        );
    }

    /// Number of connections currently tracked.
    pub fn connection_count(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.registry().snapshot()
    }

    fn registry(&self) -> sync::MutexGuard<'_, Registry> {
        self.shared.registry.lock().unwrap()
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("state", &self.state())
            .field("connections", &self.connection_count())
            .finish()
    }
}

use std::{
    fmt,
    future::Future,
    ops::{Deref, DerefMut},
    time,
};

use crate::{is_closed, ShutdownState, Tracker};

/// A listening server whose connections can be tracked and destroyed.
pub trait Server {
    /// Error reported when the server fails to stop accepting connections.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Called once when the server is wrapped in a [`Destroyable`].
    ///
    /// From then on the server must call [`Tracker::track`] for every
    /// accepted connection, and [`Tracker::track_secure`] for every
    /// accepted secure connection. The tracker keeps no connection alive,
    /// the server or the task serving a connection owns its handle.
    fn observe_connections(&mut self, tracker: Tracker);

    /// Stops accepting new connections.
    ///
    /// The request itself must happen when this method is called,
    /// the returned future only reports its completion. It may not
    /// complete before all connections the server knows of are closed.
    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Wraps `server` so it can be destroyed, see [`Destroyable::destroy`].
pub fn destroyable<S: Server>(server: S) -> Destroyable<S> {
    Destroyable::new(server)
}

/// Extension trait to wrap any [`Server`] into a [`Destroyable`].
pub trait DestroyableExt: Server + Sized {
    fn into_destroyable(self) -> Destroyable<Self> {
        Destroyable::new(self)
    }
}

impl<S: Server> DestroyableExt for S {}

/// A [`Server`] extended with [`Destroyable::destroy`].
///
/// Dereferences to the wrapped server, which can be used as before.
pub struct Destroyable<S> {
    server: S,
    tracker: Tracker,
}

impl<S: Server> Destroyable<S> {
    pub fn new(mut server: S) -> Self {
        let tracker = Tracker::new();
        server.observe_connections(tracker.clone());
        Self { server, tracker }
    }

    /// Returns a handle to the connection observer of this server.
    #[inline]
    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }

    #[inline]
    pub fn state(&self) -> ShutdownState {
        self.tracker.state()
    }

    /// Number of connections currently open on this server.
    #[inline]
    pub fn connection_count(&self) -> usize {
        self.tracker.connection_count()
    }

    /// Closes the server and forcefully destroys every open connection.
    ///
    /// Resolves once the server closed, every connection tracked at the time
    /// of the call confirmed its closure, and one more scheduling turn passed
    /// so loopback peers observe the closure too.
    ///
    /// Connections of the same remote address and port are destroyed
    /// most recently accepted first, so layered connections go before
    /// the transport they run on.
    ///
    /// Fails only if closing the server fails, without waiting for the
    /// remaining connections. There is no timeout: a connection that never
    /// reports closed keeps this future pending, see
    /// [`Destroyable::destroy_with_limit`].
    pub async fn destroy(&mut self) -> Result<(), S::Error> {
        let start = time::Instant::now();
        self.tracker.set_state(ShutdownState::Closing);

        tracing::trace!("::destroy: stop accepting connections");
        let server_closed = self.server.close();

        let snapshot = self.tracker.snapshot();
        tracing::debug!(
            "::destroy: destroying {} connection(s) across {} remote endpoint(s)",
            snapshot.iter().map(|(_, conns)| conns.len()).sum::<usize>(),
            snapshot.len()
        );

        let mut pending = Vec::new();
        for (key, conns) in &snapshot {
            for conn in conns.iter().rev() {
                if is_closed(&**conn) {
                    tracing::trace!("::destroy: connection from {} already closed", key);
                } else {
                    // arm before destroying, the close event may fire right away
                    pending.push(conn.closed());
                }
                tracing::trace!("::destroy: destroy connection from {}", key);
                conn.destroy();
            }
        }
        drop(snapshot);

        let connections_closed = async move {
            tracing::trace!("::destroy: waiting for {} connection(s) to close", pending.len());
            for closed in pending {
                closed.await;
            }
            Ok::<_, S::Error>(())
        };

        if let Err(err) = tokio::try_join!(server_closed, connections_closed) {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "::destroy: server failed to close"
            );
            return Err(err);
        }

        tokio::task::yield_now().await;

        self.tracker.set_state(ShutdownState::Closed);
        tracing::debug!(
            "::destroy: done after {}s",
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Same as [`Destroyable::destroy`], but gives up after `limit`.
    ///
    /// Connections are destroyed either way; on timeout only the wait for
    /// their closure is abandoned. Returns the time it took otherwise.
    pub async fn destroy_with_limit(
        &mut self,
        limit: time::Duration,
    ) -> Result<time::Duration, DestroyError<S::Error>> {
        let start = time::Instant::now();
        tokio::select! {
            result = self.destroy() => {
                result.map_err(DestroyError::Server)?;
                Ok(start.elapsed())
            }
            _ = tokio::time::sleep(limit) => {
                tracing::warn!("::destroy: timeout after {}s", limit.as_secs_f64());
                Err(DestroyError::Timeout(limit))
            }
        }
    }

    /// Unwraps the server. Connections accepted from now on are no longer
    /// tracked by a [`Destroyable`] of their own.
    pub fn into_inner(self) -> S {
        self.server
    }
}

impl<S> Deref for Destroyable<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.server
    }
}

impl<S> DerefMut for Destroyable<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.server
    }
}

impl<S: fmt::Debug> fmt::Debug for Destroyable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destroyable")
            .field("server", &self.server)
            .field("tracker", &self.tracker)
            .finish()
    }
}

/// Error returned by [`Destroyable::destroy_with_limit`].
#[derive(Debug)]
pub enum DestroyError<E> {
    /// The server failed to stop accepting connections.
    Server(E),
    /// Not all connections closed within the given limit.
    Timeout(time::Duration),
}

impl<E: fmt::Display> fmt::Display for DestroyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestroyError::Server(err) => write!(f, "server failed to close: {}", err),
            DestroyError::Timeout(limit) => write!(f, "timeout after {}s", limit.as_secs_f64()),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for DestroyError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DestroyError::Server(err) => Some(err),
            DestroyError::Timeout(_) => None,
        }
    }
}

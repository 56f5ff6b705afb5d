use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use tokio::sync::oneshot;

use crate::{close_signal, CloseNotifier, CloseSignal, Connection, Server, Tracker};

pub(crate) type DestroyLog = Arc<Mutex<Vec<&'static str>>>;

/// In-memory connection whose closure is driven by the test.
#[derive(Debug)]
pub(crate) struct MockConnection {
    name: &'static str,
    addr: SocketAddr,
    closed: AtomicBool,
    notifier: Mutex<Option<CloseNotifier>>,
    signal: CloseSignal,
    parent: Option<Arc<MockConnection>>,
    hang_on_destroy: bool,
    destroy_calls: AtomicUsize,
    log: Option<DestroyLog>,
}

impl MockConnection {
    fn build(
        name: &'static str,
        addr: SocketAddr,
        parent: Option<Arc<MockConnection>>,
        hang_on_destroy: bool,
        log: Option<DestroyLog>,
    ) -> Arc<Self> {
        let (notifier, signal) = close_signal();
        Arc::new(Self {
            name,
            addr,
            closed: AtomicBool::new(false),
            notifier: Mutex::new(Some(notifier)),
            signal,
            parent,
            hang_on_destroy,
            destroy_calls: AtomicUsize::new(0),
            log,
        })
    }

    pub(crate) fn new(addr: impl Into<SocketAddr>) -> Arc<Self> {
        Self::build("conn", addr.into(), None, false, None)
    }

    /// A connection layered on top of `parent`, sharing its remote address.
    pub(crate) fn with_parent(parent: Arc<MockConnection>) -> Arc<Self> {
        Self::build("layered", parent.addr, Some(parent), false, None)
    }

    /// A connection that records its name in `log` when destroyed.
    pub(crate) fn logged(
        name: &'static str,
        addr: impl Into<SocketAddr>,
        log: &DestroyLog,
    ) -> Arc<Self> {
        Self::build(name, addr.into(), None, false, Some(log.clone()))
    }

    /// A connection that ignores [`Connection::destroy`] until closed manually.
    pub(crate) fn hanging(addr: impl Into<SocketAddr>) -> Arc<Self> {
        Self::build("hanging", addr.into(), None, true, None)
    }

    /// Sets the closed flag without firing the close event.
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Closes the connection as if the peer hung up.
    pub(crate) fn close(&self) {
        self.mark_closed();
        if let Some(notifier) = self.notifier.lock().unwrap().take() {
            notifier.notify();
        }
    }

    /// Drops the close event without ever firing it,
    /// for connections whose flag is the only sign of closure.
    pub(crate) fn forget_close_event(&self) {
        if let Some(notifier) = self.notifier.lock().unwrap().take() {
            std::mem::forget(notifier);
        }
    }

    pub(crate) fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn parent(&self) -> Option<&dyn Connection> {
        self.parent.as_deref().map(|p| p as &dyn Connection)
    }

    fn closed(&self) -> CloseSignal {
        self.signal.clone()
    }

    fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.name);
        }
        if !self.hang_on_destroy {
            self.close();
        }
    }
}

#[derive(Debug)]
enum CloseBehavior {
    Succeed,
    Fail,
    Gated(Option<oneshot::Receiver<io::Result<()>>>),
}

/// Server stand-in: "accepts" whatever connection the test hands it.
#[derive(Debug)]
pub(crate) struct MockServer {
    tracker: Option<Tracker>,
    close: CloseBehavior,
    log: Option<DestroyLog>,
    pub(crate) close_calls: usize,
}

impl MockServer {
    pub(crate) fn new() -> Self {
        Self {
            tracker: None,
            close: CloseBehavior::Succeed,
            log: None,
            close_calls: 0,
        }
    }

    /// A server that records "server" in `log` as soon as its close is requested.
    pub(crate) fn logged(log: &DestroyLog) -> Self {
        Self {
            log: Some(log.clone()),
            ..Self::new()
        }
    }

    /// A server whose close reports an error.
    pub(crate) fn failing() -> Self {
        Self {
            close: CloseBehavior::Fail,
            ..Self::new()
        }
    }

    /// A server whose close completes once the returned sender fires.
    pub(crate) fn gated() -> (Self, oneshot::Sender<io::Result<()>>) {
        let (tx, rx) = oneshot::channel();
        let server = Self {
            close: CloseBehavior::Gated(Some(rx)),
            ..Self::new()
        };
        (server, tx)
    }

    pub(crate) fn accept(&self, conn: Arc<dyn Connection>) {
        if let Some(tracker) = &self.tracker {
            tracker.track(conn);
        }
    }

    pub(crate) fn accept_secure(&self, conn: Arc<dyn Connection>) {
        if let Some(tracker) = &self.tracker {
            tracker.track_secure(conn);
        }
    }
}

impl Server for MockServer {
    type Error = io::Error;

    fn observe_connections(&mut self, tracker: Tracker) {
        self.tracker = Some(tracker);
    }

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        self.close_calls += 1;
        if let Some(log) = &self.log {
            log.lock().unwrap().push("server");
        }
        let fail = matches!(self.close, CloseBehavior::Fail);
        let gate = match &mut self.close {
            CloseBehavior::Gated(rx) => rx.take(),
            _ => None,
        };
        async move {
            if let Some(gate) = gate {
                if let Ok(result) = gate.await {
                    result?;
                }
            }
            if fail {
                return Err(io::Error::new(io::ErrorKind::Other, "server is not running"));
            }
            Ok(())
        }
    }
}

/// Yields to the runtime until `condition` holds.
///
/// # Panics
///
/// Panics if the condition still fails after many scheduling turns.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not met in time");
}

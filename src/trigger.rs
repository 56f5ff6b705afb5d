//! A latched, one-shot "closed" event.
//!
//! Connections hand out a [`CloseSignal`] to anyone interested in their
//! closure and keep the matching [`CloseNotifier`] to fire it. Once fired
//! the signal stays fired: every clone, including clones created or polled
//! afterwards, resolves immediately.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};

use pin_project_lite::pin_project;
use slab::Slab;

use crate::sync::{Arc, AtomicBool, Mutex, Ordering};

type WakerList = Arc<Mutex<Slab<Waker>>>;
type ClosedState = Arc<AtomicBool>;

#[derive(Debug, Clone)]
struct Subscriber {
    wakers: WakerList,
    state: ClosedState,
}

#[derive(Debug)]
enum SubscriberState {
    Waiting(usize),
    Closed,
}

impl Subscriber {
    fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }

    fn state(&self, cx: &mut Context, key: Option<usize>) -> SubscriberState {
        if self.is_closed() {
            return SubscriberState::Closed;
        }

        let mut wakers = self.wakers.lock().unwrap();
        // the notifier flips the state while holding the lock
        if self.is_closed() {
            return SubscriberState::Closed;
        }

        let waker = cx.waker();
        if let Some(key) = key {
            if let Some(slot) = wakers.get_mut(key) {
                if !slot.will_wake(waker) {
                    tracing::trace!("trigger::Subscriber: updating waker for key: {}", key);
                    *slot = waker.clone();
                }
                return SubscriberState::Waiting(key);
            }
        }

        let key = wakers.insert(waker.clone());
        tracing::trace!("trigger::Subscriber: insert waker for key: {}", key);
        SubscriberState::Waiting(key)
    }
}

#[derive(Debug)]
enum SignalState {
    Open { sub: Subscriber, key: Option<usize> },
    Closed,
}

impl Clone for SignalState {
    fn clone(&self) -> Self {
        match self {
            SignalState::Open { sub, .. } => SignalState::Open {
                sub: sub.clone(),
                key: None,
            },
            SignalState::Closed => SignalState::Closed,
        }
    }
}

impl Drop for SignalState {
    fn drop(&mut self) {
        if let SignalState::Open { sub, key } = self {
            if let Some(key) = key.take() {
                let mut wakers = sub.wakers.lock().unwrap();
                tracing::trace!("trigger::SignalState::Drop: remove waker for key: {}", key);
                wakers.try_remove(key);
            }
        }
    }
}

pin_project! {
    /// Future that resolves once the linked [`CloseNotifier`] fired,
    /// either explicitly or by being dropped.
    ///
    /// Can be cloned freely, each clone resolving independently.
    ///
    /// # Panics
    ///
    /// Polling panics if the internal mutex is poisoned.
    #[derive(Debug, Clone)]
    pub struct CloseSignal {
        state: SignalState,
    }
}

impl CloseSignal {
    fn new(wakers: WakerList, state: ClosedState) -> Self {
        Self {
            state: SignalState::Open {
                sub: Subscriber { wakers, state },
                key: None,
            },
        }
    }

    /// Returns `true` if the linked notifier already fired,
    /// without registering interest.
    pub fn is_closed(&self) -> bool {
        match &self.state {
            SignalState::Open { sub, .. } => sub.is_closed(),
            SignalState::Closed => true,
        }
    }
}

impl Future for CloseSignal {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let this = self.project();
        match this.state {
            SignalState::Open { sub, key } => match sub.state(cx, *key) {
                SubscriberState::Waiting(new_key) => {
                    *key = Some(new_key);
                    Poll::Pending
                }
                SubscriberState::Closed => {
                    *this.state = SignalState::Closed;
                    Poll::Ready(())
                }
            },
            SignalState::Closed => Poll::Ready(()),
        }
    }
}

/// The firing half of a [`close_signal`] pair.
///
/// Fires on [`CloseNotifier::notify`] or, at the latest, when dropped.
#[derive(Debug)]
pub struct CloseNotifier {
    wakers: WakerList,
    state: ClosedState,
}

impl CloseNotifier {
    fn new(wakers: WakerList, state: ClosedState) -> Self {
        Self { wakers, state }
    }

    /// Marks the connection as closed and wakes every pending [`CloseSignal`].
    ///
    /// Only the first call has any effect.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn notify(&self) {
        let wakers = self.wakers.lock().unwrap();
        if self.state.swap(true, Ordering::SeqCst) {
            return;
        }
        for (key, waker) in wakers.iter() {
            tracing::trace!("trigger::CloseNotifier: wake up waker with key: {}", key);
            waker.wake_by_ref();
        }
    }

    /// Returns `true` once [`CloseNotifier::notify`] was called.
    pub fn is_notified(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }

    /// Creates a new [`CloseSignal`] linked to this notifier.
    pub fn subscribe(&self) -> CloseSignal {
        CloseSignal::new(self.wakers.clone(), self.state.clone())
    }

    #[cfg(test)]
    fn waiters(&self) -> usize {
        self.wakers.lock().unwrap().len()
    }
}

impl Drop for CloseNotifier {
    fn drop(&mut self) {
        if !self.is_notified() {
            tracing::trace!("trigger::CloseNotifier: dropped before notify, firing now");
            self.notify();
        }
    }
}

/// Creates a linked [`CloseNotifier`] / [`CloseSignal`] pair.
pub fn close_signal() -> (CloseNotifier, CloseSignal) {
    let wakers = Arc::new(Mutex::new(Slab::new()));
    let state = Arc::new(AtomicBool::new(false));

    let notifier = CloseNotifier::new(wakers.clone(), state.clone());
    let signal = CloseSignal::new(wakers, state);

    (notifier, signal)
}

//! Lifecycle hook registrations.
//!
//! The host delivers signals through a [`SignalHook`]; the subscriber keeps
//! the matching [`SignalConnection`]. Disconnecting takes the hook's write
//! lock, so it returns only after every in-flight delivery has finished.
//! After that no callback can fire into freed state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::handle::SceneHandle;

/// Signals emitted by a native output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSignal {
    Starting,
    Started,
    Stopping,
    /// Output stopped; `code` is the native stop code (0 on success).
    Stopped { code: i32 },
    Paused,
    Unpaused,
    Activated,
    Deactivated,
    Reconnecting,
    Reconnected,
}

/// Signals emitted by a transition node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionSignal {
    Started { to: SceneHandle },
    Ended { scene: SceneHandle, scene_name: String },
}

type Callback<S> = Box<dyn Fn(&S) + Send + Sync>;

struct HookSlot<S> {
    callback: RwLock<Option<Callback<S>>>,
    delivered: AtomicU64,
}

/// Host-side end of a registration.
pub struct SignalHook<S> {
    slot: Arc<HookSlot<S>>,
}

impl<S> Clone for SignalHook<S> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<S> SignalHook<S> {
    /// Deliver a signal. Returns false if the subscriber already
    /// disconnected.
    pub fn emit(&self, signal: &S) -> bool {
        let guard = self.slot.callback.read();
        match guard.as_ref() {
            Some(callback) => {
                callback(signal);
                self.slot.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.slot.callback.read().is_some()
    }
}

impl<S> std::fmt::Debug for SignalHook<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHook")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Subscriber-side end of a registration. Dropping it disconnects.
pub struct SignalConnection<S> {
    slot: Arc<HookSlot<S>>,
}

impl<S> SignalConnection<S> {
    pub fn new(callback: impl Fn(&S) + Send + Sync + 'static) -> Self {
        Self {
            slot: Arc::new(HookSlot {
                callback: RwLock::new(Some(Box::new(callback))),
                delivered: AtomicU64::new(0),
            }),
        }
    }

    /// A hook to hand to the host.
    pub fn hook(&self) -> SignalHook<S> {
        SignalHook {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Drop the callback, blocking until in-flight deliveries finish.
    ///
    /// Must not be called from inside the callback itself.
    pub fn disconnect(&self) {
        let mut guard = self.slot.callback.write();
        guard.take();
    }

    pub fn is_connected(&self) -> bool {
        self.slot.callback.read().is_some()
    }

    /// Number of signals delivered so far.
    pub fn delivered(&self) -> u64 {
        self.slot.delivered.load(Ordering::Relaxed)
    }
}

impl<S> Drop for SignalConnection<S> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<S> std::fmt::Debug for SignalConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalConnection")
            .field("connected", &self.is_connected())
            .field("delivered", &self.delivered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_emit_after_disconnect_is_dropped() {
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let connection = SignalConnection::new(move |_: &OutputSignal| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let hook = connection.hook();

        assert!(hook.emit(&OutputSignal::Started));
        connection.disconnect();
        assert!(!hook.emit(&OutputSignal::Stopped { code: 0 }));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(connection.delivered(), 1);
        assert!(!hook.is_connected());
    }

    #[test]
    fn test_disconnect_waits_for_in_flight_delivery() {
        let finished = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = mpsc::channel();

        let done = Arc::clone(&finished);
        let connection = SignalConnection::new(move |_: &OutputSignal| {
            entered_tx.send(()).ok();
            std::thread::sleep(Duration::from_millis(50));
            done.store(true, Ordering::SeqCst);
        });
        let hook = connection.hook();

        let emitter = std::thread::spawn(move || hook.emit(&OutputSignal::Reconnecting));
        entered_rx.recv().unwrap();

        connection.disconnect();
        assert!(finished.load(Ordering::SeqCst));
        assert!(emitter.join().unwrap());
    }

    #[test]
    fn test_drop_disconnects() {
        let connection = SignalConnection::new(|_: &TransitionSignal| {});
        let hook = connection.hook();
        drop(connection);
        assert!(!hook.emit(&TransitionSignal::Started { to: SceneHandle(1) }));
    }
}

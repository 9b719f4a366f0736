//! Plugin lifecycle notifications.
//!
//! Hosts subscribe to learn when the plugin set changed and when the current
//! file should be analyzed again. Delivery is synchronous: every subscriber
//! has seen an event before the emitting operation returns.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;

/// Event emitted by plugin control operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    /// A plugin was (re)loaded and is active.
    Loaded(String),
    /// Loading a plugin failed.
    Failed {
        /// Plugin name.
        name: String,
        /// Error message.
        reason: String,
    },
    /// A plugin was deleted.
    Deleted(String),
    /// The set of active plugins changed.
    Reloaded,
    /// Results for the current file are stale.
    ReanalyzeRequested,
}

type Callback = Arc<dyn Fn(&PluginEvent) + Send + Sync>;

/// Fan-out of [`PluginEvent`]s to callbacks and channels.
#[derive(Default)]
pub struct EventBus {
    callbacks: Mutex<Vec<Callback>>,
    senders: Mutex<Vec<Sender<PluginEvent>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("callbacks", &self.callbacks.lock().len())
            .field("channels", &self.senders.lock().len())
            .finish()
    }
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked for every event.
    pub fn subscribe(&self, callback: impl Fn(&PluginEvent) + Send + Sync + 'static) {
        self.callbacks.lock().push(Arc::new(callback));
    }

    /// Open a channel receiving every later event.
    ///
    /// Dropping the receiver unsubscribes it.
    pub fn channel(&self) -> Receiver<PluginEvent> {
        let (tx, rx) = mpsc::channel();
        self.senders.lock().push(tx);
        rx
    }

    /// Deliver `event` to every subscriber.
    pub fn emit(&self, event: PluginEvent) {
        tracing::debug!(?event, "Plugin event");

        // Callbacks run outside the lock so they may subscribe in turn.
        let callbacks: Vec<Callback> = self.callbacks.lock().clone();
        for callback in &callbacks {
            callback(&event);
        }

        self.senders.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks.lock().len() + self.senders.lock().len()
    }
}

//! Host visibility and focus signals.
//!
//! The host UI runtime owns a [`LifecycleSignals`] hub and emits an event
//! when the app becomes visible again or regains focus. Form sessions attach
//! to the hub and reload on either event; the returned
//! [`LifecycleSubscription`] ends the listener when dropped.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Events after which persisted state may have changed underneath a form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    BecameVisible,
    GainedFocus,
}

/// Broadcast hub for lifecycle events.
#[derive(Debug, Clone)]
pub struct LifecycleSignals {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for LifecycleSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleSignals {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Deliver `event` to every attached listener. Returns how many received it.
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn became_visible(&self) -> usize {
        self.emit(LifecycleEvent::BecameVisible)
    }

    pub fn gained_focus(&self) -> usize {
        self.emit(LifecycleEvent::GainedFocus)
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

/// Handle for an attached listener. Dropping it detaches the listener.
#[derive(Debug)]
pub struct LifecycleSubscription {
    task: Option<JoinHandle<()>>,
}

impl LifecycleSubscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A subscription that never fires, used when no runtime is available.
    pub(crate) fn inactive() -> Self {
        Self { task: None }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop listening.
    pub fn dispose(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LifecycleSubscription {
    fn drop(&mut self) {
        self.abort();
    }
}

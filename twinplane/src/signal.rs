//! # Supervisor Signals
//!
//! Two one-shot latches drive the supervisor's wait:
//!
//! - [`ShutdownSignal`]: process-wide, set once from outside (ctrl+c, SIGTERM,
//!   an embedding application). Setting it again is a no-op.
//! - [`RestartTrigger`]: created per supervisor session and handed to the
//!   module host, which fires it when the module needs a clean
//!   re-registration.
//!
//! Both are backed by a `tokio::sync::watch` channel holding a `bool`, so a
//! waiter that subscribes after the latch was set still observes it.

use std::sync::Arc;

use tokio::sync::watch;

/// A set-once flag that any number of tasks can await.
#[derive(Clone, Debug)]
struct Latch {
    tx: Arc<watch::Sender<bool>>,
}

impl Latch {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    fn set(&self) {
        self.tx.send_replace(true);
    }

    fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|set| *set).await;
    }
}

/// External, idempotent shutdown request observed by the supervisor.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    latch: Latch,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            latch: Latch::new(),
        }
    }

    /// Requests shutdown. Safe to call any number of times.
    pub fn trigger(&self) {
        self.latch.set();
    }

    pub fn is_triggered(&self) -> bool {
        self.latch.is_set()
    }

    /// Resolves once shutdown has been requested (immediately if it already was).
    pub async fn wait(&self) {
        self.latch.wait().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session handle the module host uses to ask for a re-registration.
#[derive(Clone, Debug)]
pub struct RestartTrigger {
    latch: Latch,
}

impl RestartTrigger {
    pub fn new() -> Self {
        Self {
            latch: Latch::new(),
        }
    }

    /// Asks the supervisor to tear down the current session and register again.
    pub fn request(&self) {
        self.latch.set();
    }

    pub fn is_requested(&self) -> bool {
        self.latch.is_set()
    }

    pub async fn wait(&self) {
        self.latch.wait().await;
    }
}

impl Default for RestartTrigger {
    fn default() -> Self {
        Self::new()
    }
}

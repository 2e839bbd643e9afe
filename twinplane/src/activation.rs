//! # Activation Reconciler
//!
//! Turns desired activation state into `activate`/`deactivate` calls on the
//! [`ActivationServices`] collaborator.
//!
//! # Pending directives
//!
//! The reconciler keeps one map of connection id → token. It is fed in two
//! ways:
//!
//! - [`ActivationReconciler::upsert`] / [`ActivationReconciler::remove`]:
//!   incremental property updates. An empty token removes the entry.
//! - [`ActivationReconciler::apply`]: a desired-state snapshot. Its entries
//!   overwrite pending ones (an absent token is stored as an empty one,
//!   meaning "deactivate") and the whole map is then processed.
//!
//! # Processing
//!
//! ```text
//! for each pending (id, token), independently:
//!   token empty      ──▶ deactivate(id)
//!   token not base64 ──▶ skip (bad input, not an error)
//!   otherwise        ──▶ activate(id, token)
//! afterwards: pending set is empty
//! ```
//!
//! A failing call is logged and recorded in the [`ReconcileReport`]; it never
//! stops the other entries. Failed entries are dropped unless the reconciler
//! was built with [`ActivationReconciler::with_retain_failed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64;
use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::models::ActivationDirective;
use crate::services::{ActivationServices, ServiceError};

/// Supervisor property carrying the plane's view of connectivity.
pub const CONNECTED_PROPERTY: &str = "Connected";

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub activated: Vec<String>,
    pub deactivated: Vec<String>,
    /// Entries whose token was not valid base64
    pub skipped: Vec<String>,
    /// Entries whose service call failed, with the error text
    pub failed: Vec<(String, String)>,
}

impl ReconcileReport {
    /// Number of entries that were looked at.
    pub fn attempted(&self) -> usize {
        self.activated.len() + self.deactivated.len() + self.skipped.len() + self.failed.len()
    }

    fn sort(&mut self) {
        self.activated.sort();
        self.deactivated.sort();
        self.skipped.sort();
        self.failed.sort();
    }
}

enum Outcome {
    Activated,
    Deactivated,
    Skipped,
    Failed(ServiceError),
}

/// Diffs desired activation state against the activation service.
pub struct ActivationReconciler {
    activator: Arc<dyn ActivationServices>,
    pending: Mutex<HashMap<String, String>>,
    connected: AtomicBool,
    retain_failed: bool,
    /// Serialises passes so snapshots are applied in delivery order.
    apply_gate: tokio::sync::Mutex<()>,
}

impl ActivationReconciler {
    pub fn new(activator: Arc<dyn ActivationServices>) -> Self {
        Self {
            activator,
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
            retain_failed: false,
            apply_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Keeps directives whose service call failed pending for the next pass.
    pub fn with_retain_failed(mut self, retain: bool) -> Self {
        self.retain_failed = retain;
        self
    }

    /// Inserts or overwrites the pending token for `connection_id`.
    ///
    /// An absent or empty token removes the pending entry instead.
    pub fn upsert(&self, connection_id: &str, token: Option<&str>) {
        let mut pending = self.pending.lock().expect("pending lock");
        match token.filter(|t| !t.is_empty()) {
            Some(token) => {
                pending.insert(connection_id.to_string(), token.to_string());
            }
            None => {
                pending.remove(connection_id);
            }
        }
    }

    /// Drops the pending entry for `connection_id`, returning its token.
    pub fn remove(&self, connection_id: &str) -> Option<String> {
        self.pending
            .lock()
            .expect("pending lock")
            .remove(connection_id)
    }

    /// Pending token for `connection_id`; `None` when nothing is pending.
    pub fn get(&self, connection_id: &str) -> Option<String> {
        self.pending
            .lock()
            .expect("pending lock")
            .get(connection_id)
            .cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Applies a supervisor property bag.
    ///
    /// `Connected` updates the connectivity flag (non-boolean values are
    /// ignored); every other key is a connection id.
    pub async fn apply_properties(&self, properties: &Map<String, Value>) -> ReconcileReport {
        let mut desired = Vec::with_capacity(properties.len());
        for (key, value) in properties {
            if key == CONNECTED_PROPERTY {
                if let Some(connected) = value.as_bool() {
                    self.set_connected(connected);
                }
                continue;
            }
            match ActivationDirective::from_property(key, value) {
                Some(directive) => desired.push(directive),
                None => debug!(connection = %key, "ignoring property without activation intent"),
            }
        }
        self.apply(desired).await
    }

    /// Merges `desired` into the pending set and processes every pending
    /// entry exactly once.
    pub async fn apply<I>(&self, desired: I) -> ReconcileReport
    where
        I: IntoIterator<Item = ActivationDirective>,
    {
        let _gate = self.apply_gate.lock().await;

        let batch: Vec<(String, String)> = {
            let mut pending = self.pending.lock().expect("pending lock");
            for directive in desired {
                pending.insert(directive.connection_id, directive.token.unwrap_or_default());
            }
            pending.drain().collect()
        };

        let outcomes = join_all(batch.into_iter().map(|(connection_id, token)| async move {
            let outcome = self.apply_one(&connection_id, &token).await;
            (connection_id, token, outcome)
        }))
        .await;

        let mut report = ReconcileReport::default();
        let mut retained = Vec::new();
        for (connection_id, token, outcome) in outcomes {
            match outcome {
                Outcome::Activated => report.activated.push(connection_id),
                Outcome::Deactivated => report.deactivated.push(connection_id),
                Outcome::Skipped => report.skipped.push(connection_id),
                Outcome::Failed(err) => {
                    if self.retain_failed {
                        retained.push((connection_id.clone(), token));
                    }
                    report.failed.push((connection_id, err.to_string()));
                }
            }
        }

        if !retained.is_empty() {
            let mut pending = self.pending.lock().expect("pending lock");
            for (connection_id, token) in retained {
                // A newer upsert that arrived during the pass wins.
                pending.entry(connection_id).or_insert(token);
            }
        }

        report.sort();
        info!(
            activated = report.activated.len(),
            deactivated = report.deactivated.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "activation pass complete"
        );
        report
    }

    async fn apply_one(&self, connection_id: &str, token: &str) -> Outcome {
        if token.is_empty() {
            return match self.activator.deactivate(connection_id).await {
                Ok(()) => {
                    info!(connection = %connection_id, "connection deactivated");
                    Outcome::Deactivated
                }
                Err(err) => {
                    error!(connection = %connection_id, error = %err, "error stopping connection");
                    Outcome::Failed(err)
                }
            };
        }

        if !is_base64(token) {
            debug!(connection = %connection_id, "skipping malformed activation token");
            return Outcome::Skipped;
        }

        match self.activator.activate(connection_id, token).await {
            Ok(()) => {
                info!(connection = %connection_id, "connection activated");
                Outcome::Activated
            }
            Err(err) => {
                error!(connection = %connection_id, error = %err, "error starting connection");
                Outcome::Failed(err)
            }
        }
    }
}

/// Whether `token` is syntactically valid standard base64.
pub fn is_base64(token: &str) -> bool {
    Base64.decode(token).is_ok()
}

//! # Module Supervisor
//!
//! Keeps the module registered with the management plane for the lifetime
//! of the process. Each pass of the loop is one session:
//!
//! ```text
//!        ┌──────────────────────────────────────────────────────┐
//!        ▼                                                      │
//!  Registering ──locate()──▶ Running ──attach()──▶ wait ────────┤
//!        │                     │        restart ◀──┤            │
//!        │ error/panic         │ error/panic       │ shutdown   │
//!        ▼                     ▼                   ▼            │
//!     Faulted ◀────────────────┘               Stopping        │
//!        │  detach(), backoff                     │ detach()   │
//!        └────────────────────────────────────────┼────────────┘
//!                                                 ▼
//!                                            Terminated
//! ```
//!
//! `detach()` runs after every session, whatever happened in it. Faults are
//! logged and followed by a bounded, doubling backoff; the loop only ends
//! when the [`ShutdownSignal`] fires.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::Registration;
use crate::services::{ModuleHost, PlaneLocator};
use crate::signal::{RestartTrigger, ShutdownSignal};

/// Lifecycle state of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorState {
    #[default]
    Idle,
    /// Locating the management plane
    Registering,
    /// Attached, waiting for restart or shutdown
    Running,
    /// Session ended with a fault, backing off before the next one
    Faulted,
    /// Session ended on a restart request
    Restarting,
    /// Releasing the current registration
    Stopping,
    /// Shutdown observed, loop has exited
    Terminated,
}

/// Counters returned when the supervisor terminates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    /// Sessions started (including the final one)
    pub sessions: u64,
    /// Sessions that ended with a fault
    pub faults: u64,
}

/// Why a session ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Restart,
    Shutdown,
}

/// State owned by a single pass of the run loop.
struct SupervisorSession {
    id: Uuid,
    restart: RestartTrigger,
    shutdown: ShutdownSignal,
}

impl SupervisorSession {
    fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            id: Uuid::new_v4(),
            restart: RestartTrigger::new(),
            shutdown,
        }
    }

    /// Waits for whichever signal fires first.
    async fn wait(&self) -> Wake {
        tokio::select! {
            _ = self.restart.wait() => Wake::Restart,
            _ = self.shutdown.wait() => Wake::Shutdown,
        }
    }
}

/// The module's outermost control loop.
pub struct Supervisor {
    registration: Registration,
    locator: Arc<dyn PlaneLocator>,
    host: Arc<dyn ModuleHost>,
    shutdown: ShutdownSignal,
    restart_backoff: Duration,
    restart_backoff_max: Duration,
    state: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub fn new(
        cfg: &Config,
        locator: Arc<dyn PlaneLocator>,
        host: Arc<dyn ModuleHost>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let (state, _rx) = watch::channel(SupervisorState::Idle);
        Self {
            registration: cfg.registration(),
            locator,
            host,
            shutdown,
            restart_backoff: cfg.restart_backoff,
            restart_backoff_max: cfg.restart_backoff_max.max(cfg.restart_backoff),
            state,
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Receiver observing every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Runs sessions until shutdown is requested.
    ///
    /// Never returns early on a fault; the report counts what happened.
    pub async fn run(&self) -> SupervisorReport {
        let mut report = SupervisorReport::default();
        let mut delay = self.restart_backoff;

        while !self.shutdown.is_triggered() {
            let session = SupervisorSession::new(self.shutdown.clone());
            report.sessions += 1;
            debug!(session = %session.id, "starting supervisor session");

            let outcome = AssertUnwindSafe(self.run_session(&session))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(anyhow!("session panicked: {}", panic_message(&*panic))));

            self.set_state(SupervisorState::Stopping);
            self.release(&session).await;

            match outcome {
                Ok(Wake::Shutdown) => break,
                Ok(Wake::Restart) => {
                    info!(session = %session.id, "restart requested, registering again");
                    self.set_state(SupervisorState::Restarting);
                    delay = self.restart_backoff;
                }
                Err(err) => {
                    report.faults += 1;
                    self.set_state(SupervisorState::Faulted);
                    error!(
                        session = %session.id,
                        error = %format!("{err:#}"),
                        retry_in = ?delay,
                        "error during module execution, restarting"
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = self.shutdown.wait() => {}
                    }
                    delay = std::cmp::min(delay.saturating_mul(2), self.restart_backoff_max);
                }
            }
        }

        self.set_state(SupervisorState::Terminated);
        info!(
            sessions = report.sessions,
            faults = report.faults,
            "module exits"
        );
        report
    }

    async fn run_session(&self, session: &SupervisorSession) -> Result<Wake> {
        self.set_state(SupervisorState::Registering);
        self.locator
            .locate()
            .await
            .context("locate management plane")?;

        // An in-flight locate is not cancelled, but there is no point
        // registering once shutdown has been requested.
        if self.shutdown.is_triggered() {
            return Ok(Wake::Shutdown);
        }

        self.set_state(SupervisorState::Running);
        self.host
            .attach(&self.registration, session.restart.clone())
            .await
            .with_context(|| format!("attach module as {:?}", self.registration.role))?;
        info!(
            session = %session.id,
            role = %self.registration.role,
            site = ?self.registration.site,
            module_type = %self.registration.module_type,
            "module registered"
        );

        Ok(session.wait().await)
    }

    /// Cleanup step, run once per session.
    async fn release(&self, session: &SupervisorSession) {
        let detached = AssertUnwindSafe(self.host.detach()).catch_unwind().await;
        match detached {
            Ok(Ok(())) => debug!(session = %session.id, "module detached"),
            Ok(Err(err)) => warn!(session = %session.id, error = %err, "failed to detach module"),
            Err(panic) => warn!(
                session = %session.id,
                panic = %panic_message(&*panic),
                "module detach panicked"
            ),
        }
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.send_replace(state);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! # Management Plane Client
//!
//! HTTP implementation of [`PlaneLocator`] and [`ModuleHost`]. While a
//! module is attached, a background task polls its desired state and hands
//! every new version to the activation reconciler and the endpoint settings
//! applier.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      HttpPlaneClient                        │
//! ├────────────────────────────────────────────────────────────┤
//! │  locate()   GET  {candidate}/healthz, first 2xx wins        │
//! │  attach()   POST /v1/modules             → module id        │
//! │             spawn desired-state sync                        │
//! │  detach()   stop sync, DELETE /v1/modules/{id}              │
//! │                                                             │
//! │  Desired-State Sync (every poll_interval)                   │
//! │    ├── GET /v1/modules/{id}/desired                         │
//! │    ├── 404 or restart=true  → fire restart trigger          │
//! │    ├── new version → reconciler + applier                   │
//! │    └── PUT /v1/modules/{id}/reported                        │
//! └────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::activation::ActivationReconciler;
use crate::config::Config;
use crate::endpoint::EndpointSettingsApplier;
use crate::models::{DesiredState, ModuleRegistered, Registration, ReportedState};
use crate::services::{
    ModuleHost, PlaneLocator, ServiceError, ServiceResult, api_url, expect_success,
};
use crate::signal::RestartTrigger;

/// Consecutive failed polls after which the module registers again.
pub const MAX_POLL_FAILURES: u32 = 3;

/// Management-plane client shared by the supervisor's locator and host roles.
pub struct HttpPlaneClient {
    http: Client,
    candidates: Vec<Url>,
    base_url: RwLock<Option<Url>>,
    poll_interval: Duration,
    reconciler: Arc<ActivationReconciler>,
    applier: Arc<EndpointSettingsApplier>,
    discovery: Arc<RwLock<Option<Value>>>,
    attachment: Mutex<Option<Attachment>>,
}

impl HttpPlaneClient {
    pub fn new(
        cfg: &Config,
        reconciler: Arc<ActivationReconciler>,
        applier: Arc<EndpointSettingsApplier>,
    ) -> Result<Self> {
        let candidates = cfg
            .plane_urls
            .iter()
            .map(|raw| {
                Url::parse(raw).with_context(|| format!("invalid management plane url {raw:?}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let http = Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .context("build management plane http client")?;

        Ok(Self {
            http,
            candidates,
            base_url: RwLock::new(None),
            poll_interval: cfg.poll_interval,
            reconciler,
            applier,
            discovery: Arc::new(RwLock::new(None)),
            attachment: Mutex::new(None),
        })
    }

    /// Base URL chosen by the last successful `locate`.
    pub fn plane_url(&self) -> Option<Url> {
        self.base_url.read().expect("base url lock").clone()
    }

    /// Module id of the current registration.
    pub async fn module_id(&self) -> Option<String> {
        self.attachment
            .lock()
            .await
            .as_ref()
            .map(|attachment| attachment.module_id.clone())
    }

    /// Discovery configuration from the last applied desired state.
    pub fn discovery_config(&self) -> Option<Value> {
        self.discovery.read().expect("discovery lock").clone()
    }
}

#[async_trait]
impl PlaneLocator for HttpPlaneClient {
    async fn locate(&self) -> ServiceResult<()> {
        let mut failures = Vec::new();
        for candidate in &self.candidates {
            let url = api_url(candidate, &["healthz"])?;
            match self.http.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(url = %candidate, "management plane located");
                    *self.base_url.write().expect("base url lock") = Some(candidate.clone());
                    return Ok(());
                }
                Ok(resp) => failures.push(format!("{candidate}: status {}", resp.status())),
                Err(err) => failures.push(format!("{candidate}: {err}")),
            }
        }

        *self.base_url.write().expect("base url lock") = None;
        if failures.is_empty() {
            return Err(ServiceError::Unreachable(
                "no candidate urls configured".to_string(),
            ));
        }
        Err(ServiceError::Unreachable(failures.join("; ")))
    }
}

#[async_trait]
impl ModuleHost for HttpPlaneClient {
    async fn attach(&self, registration: &Registration, restart: RestartTrigger) -> ServiceResult<()> {
        let base_url = self.plane_url().ok_or(ServiceError::NotLocated)?;

        let mut attachment = self.attachment.lock().await;
        if let Some(stale) = attachment.take()
            && let Err(err) = stale.release(&self.http).await
        {
            warn!(error = %err, "failed to release stale registration");
        }

        let resp = self
            .http
            .post(api_url(&base_url, &["v1", "modules"])?)
            .json(registration)
            .send()
            .await?;
        let registered: ModuleRegistered = expect_success(resp).await?.json().await?;
        info!(module = %registered.module_id, url = %base_url, "module attached");

        let (stop_tx, stop_rx) = watch::channel(false);
        let sync = DesiredStateSync {
            http: self.http.clone(),
            base_url: base_url.clone(),
            module_id: registered.module_id.clone(),
            poll_interval: self.poll_interval,
            reconciler: self.reconciler.clone(),
            applier: self.applier.clone(),
            discovery: self.discovery.clone(),
            restart,
        };
        let handle = tokio::spawn(sync.run(stop_rx));

        *attachment = Some(Attachment {
            module_id: registered.module_id,
            base_url,
            stop_tx,
            handle,
        });
        Ok(())
    }

    async fn detach(&self) -> ServiceResult<()> {
        let Some(attachment) = self.attachment.lock().await.take() else {
            return Ok(());
        };
        attachment.release(&self.http).await
    }
}

/// A live registration and its sync task.
struct Attachment {
    module_id: String,
    base_url: Url,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Attachment {
    /// Stops the sync task, then unregisters. A registration the plane no
    /// longer knows about counts as released.
    async fn release(self, http: &Client) -> ServiceResult<()> {
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.handle.await {
            warn!(module = %self.module_id, error = %err, "desired state sync ended abnormally");
        }

        let url = api_url(&self.base_url, &["v1", "modules", &self.module_id])?;
        let resp = http.delete(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(module = %self.module_id, "registration already gone");
            return Ok(());
        }
        expect_success(resp).await?;
        info!(module = %self.module_id, "module detached");
        Ok(())
    }
}

enum PollOutcome {
    Unchanged,
    Applied,
    Restart,
}

/// Background loop delivering desired state for one registration.
struct DesiredStateSync {
    http: Client,
    base_url: Url,
    module_id: String,
    poll_interval: Duration,
    reconciler: Arc<ActivationReconciler>,
    applier: Arc<EndpointSettingsApplier>,
    discovery: Arc<RwLock<Option<Value>>>,
    restart: RestartTrigger,
}

impl DesiredStateSync {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut applied: Option<u64> = None;
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll(&mut applied).await {
                        Ok(PollOutcome::Restart) => {
                            self.restart.request();
                            break;
                        }
                        Ok(PollOutcome::Applied | PollOutcome::Unchanged) => failures = 0,
                        Err(err) => {
                            failures += 1;
                            warn!(
                                module = %self.module_id,
                                error = %err,
                                failures,
                                "desired state poll failed"
                            );
                            if failures >= MAX_POLL_FAILURES {
                                warn!(module = %self.module_id, "management plane lost, requesting restart");
                                self.restart.request();
                                break;
                            }
                        }
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(module = %self.module_id, "desired state sync stopped");
    }

    async fn poll(&self, applied: &mut Option<u64>) -> ServiceResult<PollOutcome> {
        let url = api_url(&self.base_url, &["v1", "modules", &self.module_id, "desired"])?;
        let resp = self.http.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            warn!(module = %self.module_id, "registration unknown to management plane");
            return Ok(PollOutcome::Restart);
        }
        let desired: DesiredState = expect_success(resp).await?.json().await?;

        if desired.restart {
            info!(module = %self.module_id, "management plane requested restart");
            return Ok(PollOutcome::Restart);
        }
        if *applied == Some(desired.version) {
            return Ok(PollOutcome::Unchanged);
        }

        let version = desired.version;
        debug!(module = %self.module_id, version, "applying desired state");
        let reported = self.dispatch(desired).await;
        *applied = Some(version);

        if let Err(err) = self.report(&reported).await {
            warn!(module = %self.module_id, version, error = %err, "failed to report state");
        }
        Ok(PollOutcome::Applied)
    }

    async fn dispatch(&self, desired: DesiredState) -> ReportedState {
        *self.discovery.write().expect("discovery lock") = desired.discovery;

        self.reconciler.apply_properties(&desired.supervisor).await;

        let mut endpoints = BTreeMap::new();
        for (connection_id, properties) in &desired.endpoints {
            // Rejections are logged by the applier; the previous settings stay.
            let _ = self
                .applier
                .apply_properties(connection_id, properties)
                .await;
            if let Some(effective) = self.applier.properties(connection_id).await {
                endpoints.insert(connection_id.clone(), effective);
            }
        }

        ReportedState {
            version: desired.version,
            connected: self.reconciler.is_connected(),
            endpoints,
        }
    }

    async fn report(&self, reported: &ReportedState) -> ServiceResult<()> {
        let url = api_url(&self.base_url, &["v1", "modules", &self.module_id, "reported"])?;
        let resp = self.http.put(url).json(reported).send().await?;
        expect_success(resp).await?;
        Ok(())
    }
}

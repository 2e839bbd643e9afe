//! # Twinplane - Edge Twin Module Supervisor
//!
//! Twinplane is the edge-side agent that keeps a twin module registered with
//! its management plane and turns the desired state the plane hands out into
//! calls against the local twin runtime:
//!
//! - **Module Supervisor**: register, run until restart or shutdown, always
//!   clean up, back off after faults
//! - **Activation Reconciler**: start and stop connections from desired
//!   activation tokens, once per pending entry
//! - **Connection Settings Applier**: merge partial endpoint settings and
//!   push whole descriptors
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Supervisor                           │
//! │        locate() ─▶ attach() ─▶ wait ─▶ detach() ─▶ ...         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                     HttpPlaneClient (plane)                   │
//! │                 desired-state sync per session                │
//! │          ┌────────────────┴─────────────────┐                 │
//! │  ┌───────┴────────────┐        ┌────────────┴────────────┐    │
//! │  │ActivationReconciler│        │ EndpointSettingsApplier │    │
//! │  └───────┬────────────┘        └────────────┬────────────┘    │
//! │          └────────────────┬─────────────────┘                 │
//! │                  HttpTwinServices (twin)                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration structure and defaults
//! - [`signal`]: Shutdown and restart signals
//! - [`services`]: Collaborator traits and their error type
//! - [`models`]: Directives, descriptors and plane documents
//! - [`chunked`]: Chunked byte-property codec
//! - [`supervisor`]: Module supervisor run loop
//! - [`activation`]: Activation reconciler
//! - [`endpoint`]: Connection settings applier
//! - [`plane`]: Management plane HTTP client
//! - [`twin`]: Twin runtime HTTP client
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use twinplane::*;
//!
//! let mut config = Config::default();
//! config.apply_defaults();
//!
//! let twin = Arc::new(HttpTwinServices::new(&config)?);
//! let reconciler = Arc::new(ActivationReconciler::new(twin.clone()));
//! let applier = Arc::new(EndpointSettingsApplier::new(twin));
//! let plane = Arc::new(HttpPlaneClient::new(&config, reconciler, applier)?);
//!
//! let supervisor = Supervisor::new(&config, plane.clone(), plane, ShutdownSignal::new());
//! let report = supervisor.run().await;
//! ```

pub mod activation;
pub mod chunked;
pub mod config;
pub mod endpoint;
pub mod models;
pub mod plane;
pub mod services;
pub mod signal;
pub mod supervisor;
pub mod twin;

pub use activation::{ActivationReconciler, ReconcileReport};
pub use config::Config;
pub use endpoint::{EndpointSettings, EndpointSettingsApplier, EndpointSettingsUpdate, Patch};
pub use models::{ActivationDirective, EndpointDescriptor, Registration};
pub use plane::HttpPlaneClient;
pub use services::{
    ActivationServices, EndpointServices, ModuleHost, PlaneLocator, ServiceError, ServiceResult,
};
pub use signal::{RestartTrigger, ShutdownSignal};
pub use supervisor::{Supervisor, SupervisorReport, SupervisorState};
pub use twin::HttpTwinServices;

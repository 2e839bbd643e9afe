//! # Collaborator Contracts
//!
//! The supervisor, reconciler and settings applier never talk to the
//! network themselves. Everything they need from the outside world goes
//! through the traits in this module, which are passed in explicitly at
//! construction time.
//!
//! ```text
//! ┌──────────────┐   locate()              ┌─────────────────────┐
//! │  Supervisor  │ ──────────────────────▶ │    PlaneLocator     │
//! │              │   attach()/detach()     ├─────────────────────┤
//! │              │ ──────────────────────▶ │     ModuleHost      │
//! └──────────────┘                         └─────────────────────┘
//! ┌──────────────┐   activate()/deactivate()┌────────────────────┐
//! │  Reconciler  │ ──────────────────────▶ │ ActivationServices  │
//! └──────────────┘                         └─────────────────────┘
//! ┌──────────────┐   set_endpoint()        ┌─────────────────────┐
//! │   Applier    │ ──────────────────────▶ │  EndpointServices   │
//! └──────────────┘                         └─────────────────────┘
//! ```
//!
//! HTTP implementations live in [`crate::plane`] and [`crate::twin`].

use async_trait::async_trait;
use reqwest::{Response, Url};
use thiserror::Error;

use crate::models::{EndpointDescriptor, Registration};
use crate::signal::RestartTrigger;

/// Errors returned by collaborator calls.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The request never produced a response
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The remote side answered with a non-success status
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// No candidate management-plane endpoint answered
    #[error("Management plane unreachable: {0}")]
    Unreachable(String),

    /// An operation needed a located plane but `locate` has not succeeded
    #[error("Not bound to a management plane")]
    NotLocated,
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::InvalidResponse(err.to_string())
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

/// Result type for collaborator calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Finds the management-plane endpoint and binds to it.
///
/// May block for as long as the implementation's own timeout policy allows.
#[async_trait]
pub trait PlaneLocator: Send + Sync {
    async fn locate(&self) -> ServiceResult<()>;
}

/// Registers the module with the management plane.
#[async_trait]
pub trait ModuleHost: Send + Sync {
    /// Starts the module registration. The host keeps `restart` and fires it
    /// when it needs the supervisor to register again from scratch.
    async fn attach(&self, registration: &Registration, restart: RestartTrigger)
    -> ServiceResult<()>;

    /// Releases whatever `attach` acquired. Must be safe to call when
    /// nothing is attached, including after a failed `attach`.
    async fn detach(&self) -> ServiceResult<()>;
}

/// Starts and stops connections identified by an opaque id.
#[async_trait]
pub trait ActivationServices: Send + Sync {
    async fn activate(&self, connection_id: &str, token: &str) -> ServiceResult<()>;

    async fn deactivate(&self, connection_id: &str) -> ServiceResult<()>;
}

/// Owns the live connections and accepts whole descriptors for them.
#[async_trait]
pub trait EndpointServices: Send + Sync {
    async fn set_endpoint(
        &self,
        connection_id: &str,
        descriptor: &EndpointDescriptor,
    ) -> ServiceResult<()>;
}

/// Appends path segments to `base`, escaping each one.
pub(crate) fn api_url(base: &Url, segments: &[&str]) -> ServiceResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ServiceError::InvalidResponse(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Turns non-success responses into [`ServiceError::Rejected`].
pub(crate) async fn expect_success(resp: Response) -> ServiceResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(ServiceError::Rejected {
        status: status.as_u16(),
        message,
    })
}

//! # Configuration
//!
//! This module defines the configuration structure for a twinplane module.
//! Values are set via command-line arguments or `TWIN_*` environment
//! variables (see `main.rs`), then normalised with [`Config::apply_defaults`].
//!
//! # Example
//!
//! ```rust,ignore
//! use twinplane::Config;
//!
//! let mut config = Config {
//!     plane_urls: vec!["http://plane.local:8080".to_string()],
//!     site: Some("plant-7".to_string()),
//!     ..Config::default()
//! };
//! config.apply_defaults();
//! ```

use std::time::Duration;

use crate::models::Registration;

/// Configuration for a twinplane module instance.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Role name the module registers under
    pub role: String,

    /// Optional site tag
    pub site: Option<String>,

    /// Module type reported at registration
    pub module_type: String,

    /// Candidate management-plane base URLs, probed in order
    pub plane_urls: Vec<String>,

    /// Base URL of the local twin runtime (activation + endpoint services)
    pub twin_api: String,

    /// How often the module polls its desired state
    pub poll_interval: Duration,

    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,

    /// First delay after a faulted session
    pub restart_backoff: Duration,

    /// Upper bound for the doubling restart delay
    pub restart_backoff_max: Duration,

    /// Keep directives whose service call failed pending for the next pass
    pub retain_failed_directives: bool,
}

impl Config {
    /// Applies sensible defaults for any unset or zero values.
    ///
    /// Should be called after loading configuration from CLI or environment.
    pub fn apply_defaults(&mut self) {
        if self.role.is_empty() {
            self.role = "supervisor".to_string();
        }
        if self.module_type.is_empty() {
            self.module_type = "OpcTwin".to_string();
        }
        if self.site.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.site = None;
        }
        if self.plane_urls.is_empty() {
            self.plane_urls = vec!["http://localhost:8080".to_string()];
        }
        if self.twin_api.is_empty() {
            self.twin_api = "http://localhost:9700".to_string();
        }

        if self.poll_interval == Duration::from_secs(0) {
            self.poll_interval = Duration::from_secs(10);
        }
        if self.request_timeout == Duration::from_secs(0) {
            self.request_timeout = Duration::from_secs(30);
        }
        if self.restart_backoff == Duration::from_secs(0) {
            self.restart_backoff = Duration::from_millis(200);
        }
        if self.restart_backoff_max < self.restart_backoff {
            self.restart_backoff_max = std::cmp::max(Duration::from_secs(30), self.restart_backoff);
        }
    }

    /// Identity used for module registration.
    pub fn registration(&self) -> Registration {
        Registration {
            role: self.role.clone(),
            site: self.site.clone(),
            module_type: self.module_type.clone(),
        }
    }
}

//! # Twin Runtime Client
//!
//! HTTP implementation of [`ActivationServices`] and [`EndpointServices`]
//! against the local twin runtime that owns the live connections.
//!
//! | Operation | Request |
//! |---|---|
//! | `activate` | `POST /v1/endpoints/{id}/activation` with `{"secret": token}` |
//! | `deactivate` | `DELETE /v1/endpoints/{id}/activation` |
//! | `set_endpoint` | `PUT /v1/endpoints/{id}` with the descriptor |

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::models::EndpointDescriptor;
use crate::services::{
    ActivationServices, EndpointServices, ServiceResult, api_url, expect_success,
};

#[derive(Serialize)]
struct ActivationRequest<'a> {
    secret: &'a str,
}

/// Client for the twin runtime's connection API.
#[derive(Clone)]
pub struct HttpTwinServices {
    http: Client,
    base_url: Url,
}

impl HttpTwinServices {
    pub fn new(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.twin_api)
            .with_context(|| format!("invalid twin api url {:?}", cfg.twin_api))?;
        let http = Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .context("build twin api http client")?;
        Ok(Self { http, base_url })
    }

    fn activation_url(&self, connection_id: &str) -> ServiceResult<Url> {
        api_url(&self.base_url, &["v1", "endpoints", connection_id, "activation"])
    }
}

#[async_trait]
impl ActivationServices for HttpTwinServices {
    async fn activate(&self, connection_id: &str, token: &str) -> ServiceResult<()> {
        let resp = self
            .http
            .post(self.activation_url(connection_id)?)
            .json(&ActivationRequest { secret: token })
            .send()
            .await?;
        expect_success(resp).await?;
        debug!(connection = %connection_id, "activation accepted");
        Ok(())
    }

    /// Deactivating a connection the runtime does not know is a no-op.
    async fn deactivate(&self, connection_id: &str) -> ServiceResult<()> {
        let resp = self
            .http
            .delete(self.activation_url(connection_id)?)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(connection = %connection_id, "connection was not active");
            return Ok(());
        }
        expect_success(resp).await?;
        debug!(connection = %connection_id, "deactivation accepted");
        Ok(())
    }
}

#[async_trait]
impl EndpointServices for HttpTwinServices {
    async fn set_endpoint(
        &self,
        connection_id: &str,
        descriptor: &EndpointDescriptor,
    ) -> ServiceResult<()> {
        let url = api_url(&self.base_url, &["v1", "endpoints", connection_id])?;
        let resp = self.http.put(url).json(descriptor).send().await?;
        expect_success(resp).await?;
        Ok(())
    }
}

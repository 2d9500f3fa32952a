//! GPS provider HTTP client (static bearer token)

use crate::infra::config::GpsProviderConfig;
use crate::infra::error::{Result, TrackingError};
use crate::io::provider::GpsApi;
use crate::io::sim::{read_json, transport_error};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub struct GpsClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl GpsClient {
    pub fn new(config: &GpsProviderConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build GPS provider HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl GpsApi for GpsClient {
    async fn current_location(&self, registration_number: &str) -> Result<Value> {
        // No refresh path exists for this provider
        let Some(token) = &self.access_token else {
            return Err(TrackingError::ProviderAuth("GPS access token not configured".into()));
        };
        debug!(vehicle = %registration_number, "gps_location_request");
        let response = self
            .http
            .get(format!("{}/vehicles/{}/location", self.base_url, registration_number))
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }
}

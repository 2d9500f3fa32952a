//! SIM provider HTTP client
//!
//! Three calls: Basic-auth login (authentication token), client-credentials
//! exchange (access token) and the subscriber location lookup.

use crate::infra::config::SimProviderConfig;
use crate::infra::error::{Result, TrackingError};
use crate::io::provider::{IssuedToken, SimApi};
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Lifetime assumed when the login response carries no `expires_in`
const DEFAULT_AUTH_TOKEN_TTL_SECS: i64 = 6 * 3600;
const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 30 * 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token", alias = "authToken", alias = "auth_token")]
    token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    data: Option<Box<TokenResponse>>,
}

impl TokenResponse {
    /// Some deployments wrap the token in `data`
    fn into_parts(self) -> Option<(String, Option<i64>)> {
        match (self.token, self.data) {
            (Some(token), _) => Some((token, self.expires_in)),
            (None, Some(inner)) => inner.into_parts(),
            (None, None) => None,
        }
    }
}

pub struct SimClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl SimClient {
    pub fn new(config: &SimProviderConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build SIM provider HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    fn basic_auth(user: &str, secret: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{secret}").as_bytes()))
    }

    async fn exchange(
        &self,
        path: &str,
        authorization: String,
        body: &'static str,
        default_ttl_secs: i64,
    ) -> Result<IssuedToken> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", authorization)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        let body = read_json(response).await?;
        let parsed: TokenResponse = serde_json::from_value(body)
            .map_err(|e| TrackingError::MalformedResponse(format!("token response: {e}")))?;
        let (value, expires_in) = parsed
            .into_parts()
            .ok_or_else(|| TrackingError::MalformedResponse("token response has no token".into()))?;

        let ttl = expires_in.filter(|s| *s > 0).unwrap_or(default_ttl_secs);
        Ok(IssuedToken { value, expires_at: Utc::now() + ChronoDuration::seconds(ttl) })
    }
}

#[async_trait]
impl SimApi for SimClient {
    async fn login(&self) -> Result<IssuedToken> {
        let (Some(user), Some(password)) = (&self.username, &self.password) else {
            return Err(TrackingError::ProviderAuth("SIM login credentials not configured".into()));
        };
        self.exchange("/auth/login", Self::basic_auth(user, password), "", DEFAULT_AUTH_TOKEN_TTL_SECS)
            .await
    }

    async fn client_credentials(&self) -> Result<IssuedToken> {
        let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) else {
            return Err(TrackingError::ProviderAuth("SIM client credentials not configured".into()));
        };
        self.exchange(
            "/oauth/token",
            Self::basic_auth(id, secret),
            "grant_type=client_credentials",
            DEFAULT_ACCESS_TOKEN_TTL_SECS,
        )
        .await
    }

    async fn locate(&self, msisdn: &str, auth_token: &str) -> Result<Value> {
        debug!(msisdn = %msisdn, "sim_locate_request");
        let response = self
            .http
            .get(format!("{}/location/{}", self.base_url, msisdn))
            .header("Authorization", format!("Bearer {auth_token}"))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }
}

pub(crate) fn transport_error(e: reqwest::Error) -> TrackingError {
    if e.is_timeout() {
        TrackingError::ProviderUnavailable(format!("timed out: {e}"))
    } else {
        TrackingError::ProviderUnavailable(e.to_string())
    }
}

/// Map HTTP status onto the error taxonomy and parse the body as JSON
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.bytes().await.map_err(transport_error)?;
    match status {
        s if s.is_success() => serde_json::from_slice(&body)
            .map_err(|e| TrackingError::MalformedResponse(format!("invalid JSON body: {e}"))),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(TrackingError::ProviderAuth(format!("provider rejected credentials ({status})")))
        }
        s => Err(TrackingError::ProviderUnavailable(format!(
            "provider returned {}: {}",
            s.as_u16(),
            String::from_utf8_lossy(&body).chars().take(200).collect::<String>()
        ))),
    }
}

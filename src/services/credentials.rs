//! Provider credential cache with refresh-before-expiry
//!
//! Refresh-then-persist happens under a per-token-type async mutex, and the
//! stored credential is re-read after the lock is taken. Concurrent callers
//! observing the same expiring token therefore trigger a single provider
//! exchange and all return the value it produced.

use crate::domain::{Credential, TokenType};
use crate::infra::error::Result;
use crate::infra::metrics::Metrics;
use crate::io::provider::SimApi;
use crate::io::store::Store;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tokens expiring within this window are refreshed before use
pub const REFRESH_SAFETY_BUFFER_SECS: i64 = 120;

#[cold]
fn log_refresh_failed(token_type: TokenType, e: &crate::infra::error::TrackingError) {
    warn!(token_type = %token_type, error = %e, "credential_refresh_failed");
}

pub struct CredentialManager {
    store: Arc<dyn Store>,
    sim: Arc<dyn SimApi>,
    metrics: Arc<Metrics>,
    auth_lease: Mutex<()>,
    access_lease: Mutex<()>,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn Store>, sim: Arc<dyn SimApi>, metrics: Arc<Metrics>) -> Self {
        Self { store, sim, metrics, auth_lease: Mutex::new(()), access_lease: Mutex::new(()) }
    }

    fn lease(&self, token_type: TokenType) -> &Mutex<()> {
        match token_type {
            TokenType::Authentication => &self.auth_lease,
            TokenType::Access => &self.access_lease,
        }
    }

    fn is_usable(credential: &Credential, now: DateTime<Utc>) -> bool {
        !credential.value.is_empty()
            && credential.expires_at - now > Duration::seconds(REFRESH_SAFETY_BUFFER_SECS)
    }

    /// Return a valid token, refreshing it first when it is missing or about to expire.
    pub async fn get_token(&self, token_type: TokenType) -> Result<String> {
        if let Some(credential) = self.store.credential(token_type).await? {
            if Self::is_usable(&credential, Utc::now()) {
                return Ok(credential.value);
            }
        }

        let _lease = self.lease(token_type).lock().await;

        // Another caller may have refreshed while we waited
        if let Some(credential) = self.store.credential(token_type).await? {
            if Self::is_usable(&credential, Utc::now()) {
                debug!(token_type = %token_type, "credential_refreshed_by_peer");
                return Ok(credential.value);
            }
        }

        let issued = match token_type {
            TokenType::Authentication => self.sim.login().await,
            TokenType::Access => self.sim.client_credentials().await,
        }
        .inspect_err(|e| log_refresh_failed(token_type, e))?;

        let now = Utc::now();
        self.store
            .upsert_credential(Credential {
                token_type,
                value: issued.value.clone(),
                expires_at: issued.expires_at,
                updated_at: now,
            })
            .await?;
        self.metrics.record_credential_refresh();
        info!(
            token_type = %token_type,
            expires_at = %issued.expires_at.to_rfc3339(),
            "credential_refreshed"
        );
        Ok(issued.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::provider::IssuedToken;
    use crate::io::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSim {
        logins: AtomicU32,
        exchanges: AtomicU32,
    }

    #[async_trait]
    impl SimApi for CountingSim {
        async fn login(&self) -> Result<IssuedToken> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(IssuedToken { value: format!("auth-{n}"), expires_at: Utc::now() + Duration::hours(6) })
        }

        async fn client_credentials(&self) -> Result<IssuedToken> {
            let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(IssuedToken {
                value: format!("access-{n}"),
                expires_at: Utc::now() + Duration::minutes(30),
            })
        }

        async fn locate(&self, _msisdn: &str, _token: &str) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn manager() -> (Arc<CredentialManager>, Arc<CountingSim>, Arc<MemoryStore>, Arc<Metrics>) {
        let store = Arc::new(MemoryStore::new());
        let sim = Arc::new(CountingSim { logins: AtomicU32::new(0), exchanges: AtomicU32::new(0) });
        let metrics = Arc::new(Metrics::new());
        let manager = Arc::new(CredentialManager::new(store.clone(), sim.clone(), metrics.clone()));
        (manager, sim, store, metrics)
    }

    #[tokio::test]
    async fn test_fresh_token_is_reused() {
        let (manager, sim, _store, _) = manager();
        assert_eq!(manager.get_token(TokenType::Authentication).await.unwrap(), "auth-1");
        assert_eq!(manager.get_token(TokenType::Authentication).await.unwrap(), "auth-1");
        assert_eq!(sim.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_inside_buffer_is_refreshed() {
        let (manager, sim, store, metrics) = manager();
        store
            .upsert_credential(Credential {
                token_type: TokenType::Access,
                value: "old".into(),
                expires_at: Utc::now() + Duration::seconds(90),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(manager.get_token(TokenType::Access).await.unwrap(), "access-1");
        assert_eq!(sim.exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.credential_refreshes_total(), 1);
        let stored = store.credential(TokenType::Access).await.unwrap().unwrap();
        assert_eq!(stored.value, "access-1");
    }

    #[tokio::test]
    async fn test_concurrent_refresh_happens_once() {
        let (manager, sim, _store, _) = manager();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.get_token(TokenType::Authentication).await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "auth-1");
        }
        assert_eq!(sim.logins.load(Ordering::SeqCst), 1);
    }
}

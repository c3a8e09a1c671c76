//! Access credential for the metadata lookup service
//!
//! The manager is the single source of truth for the credential during a
//! run. `refresh` is single-flight: the credential lives behind one async
//! mutex which `refresh` holds across the provider call, and a caller whose
//! stale credential has already been replaced gets the new one back without
//! another provider call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Credential errors
///
/// Always fatal for the run: without a credential no lookup can succeed.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential unavailable: {0}")]
    Unavailable(String),
}

/// Access token plus the refresh generation that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    /// 0 for the first credential, +1 per refresh
    pub generation: u64,
    pub obtained_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, generation: u64) -> Self {
        Self {
            access_token: access_token.into(),
            generation,
            obtained_at: Utc::now(),
        }
    }
}

/// Source of fresh access tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Obtain a new access token
    async fn fetch_token(&self) -> Result<String, CredentialError>;
}

/// Holds and refreshes the current credential
pub struct CredentialManager {
    provider: Arc<dyn TokenProvider>,
    current: Mutex<Arc<Credential>>,
    refreshes: AtomicU64,
}

impl CredentialManager {
    /// Obtain the first credential
    pub async fn connect(provider: Arc<dyn TokenProvider>) -> Result<Self, CredentialError> {
        let token = provider.fetch_token().await?;
        tracing::info!("Obtained initial lookup credential");

        Ok(Self {
            provider,
            current: Mutex::new(Arc::new(Credential::new(token, 0))),
            refreshes: AtomicU64::new(0),
        })
    }

    /// Current credential (waits for an in-flight refresh)
    pub async fn current(&self) -> Arc<Credential> {
        Arc::clone(&*self.current.lock().await)
    }

    /// Replace the credential that `stale` was issued from
    ///
    /// Does not retry whatever request failed with `stale`.
    pub async fn refresh(&self, stale: &Credential) -> Result<Arc<Credential>, CredentialError> {
        let mut current = self.current.lock().await;

        if current.generation != stale.generation {
            tracing::debug!(
                stale_generation = stale.generation,
                current_generation = current.generation,
                "Credential already refreshed by another caller"
            );
            return Ok(Arc::clone(&*current));
        }

        let token = self.provider.fetch_token().await.map_err(|e| {
            tracing::error!("Credential refresh failed: {}", e);
            e
        })?;

        let refreshed = Arc::new(Credential::new(token, current.generation + 1));
        *current = Arc::clone(&refreshed);
        self.refreshes.fetch_add(1, Ordering::SeqCst);

        tracing::info!(generation = refreshed.generation, "Lookup credential refreshed");
        Ok(refreshed)
    }

    /// Number of provider refreshes performed so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TokenProvider for CountingProvider {
        async fn fetch_token(&self) -> Result<String, CredentialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail && n > 0 {
                return Err(CredentialError::Unavailable("provider down".to_string()));
            }
            Ok(format!("token-{}", n))
        }
    }

    fn provider(fail: bool) -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn test_refresh_replaces_credential() {
        let provider = provider(false);
        let manager = CredentialManager::connect(provider.clone()).await.unwrap();

        let first = manager.current().await;
        assert_eq!(first.access_token, "token-0");
        assert_eq!(first.generation, 0);

        let second = manager.refresh(&first).await.unwrap();
        assert_eq!(second.access_token, "token-1");
        assert_eq!(second.generation, 1);
        assert_eq!(manager.current().await.access_token, "token-1");
        assert_eq!(manager.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let provider = provider(false);
        let manager = Arc::new(CredentialManager::connect(provider.clone()).await.unwrap());
        let stale = manager.current().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let stale = Arc::clone(&stale);
            handles.push(tokio::spawn(async move { manager.refresh(&stale).await }));
        }

        for handle in handles {
            let credential = handle.await.unwrap().unwrap();
            assert_eq!(credential.generation, 1);
        }

        // One initial fetch plus exactly one refresh
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_unavailable() {
        let manager = CredentialManager::connect(provider(true)).await.unwrap();
        let stale = manager.current().await;

        let err = manager.refresh(&stale).await.unwrap_err();
        assert!(matches!(err, CredentialError::Unavailable(_)));
        // Old credential stays in place
        assert_eq!(manager.current().await.generation, 0);
    }
}

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::client::AuthClient;
use crate::credential::Credential;
use crate::error::AuthError;
use crate::refresh::RefreshCoordinator;

#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    /// Refresh before sending if the credential expires within this window.
    pub expiry_leeway: Duration,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            expiry_leeway: Duration::zero(),
        }
    }
}

/// Wraps outbound calls with refresh-and-retry-once on authorization failure.
pub struct RequestInterceptor<A> {
    coordinator: Arc<RefreshCoordinator<A>>,
    config: InterceptorConfig,
}

impl<A: AuthClient> RequestInterceptor<A> {
    pub fn new(coordinator: Arc<RefreshCoordinator<A>>, config: InterceptorConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Run `request` with the current credential.
    ///
    /// If it fails with [`AuthError::Unauthorized`], the credential is
    /// refreshed (shared with any concurrent refresh) and `request` runs
    /// exactly once more. A second rejection, or a failed refresh, ends in
    /// [`AuthError::Unauthenticated`]. Other errors are returned as they are.
    ///
    /// A call refreshes at most once: when the credential was already
    /// refreshed because it had expired, a rejection is final.
    pub async fn call<T, F, Fut>(&self, mut request: F) -> Result<T, AuthError>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let store = self.coordinator.store();
        let (current, mut observed) = store.snapshot();
        let mut credential = current.ok_or(AuthError::Unauthenticated)?;
        let mut refreshed = false;

        if credential.is_expired_at(Utc::now(), self.config.expiry_leeway) {
            debug!("credential expired before use, refreshing first");
            self.refresh(observed).await?;
            let (current, epoch) = store.snapshot();
            credential = current.ok_or(AuthError::Unauthenticated)?;
            observed = epoch;
            refreshed = true;
        }

        match request(credential).await {
            Err(e) if e.is_unauthorized() => {}
            other => return other,
        }

        if refreshed {
            warn!("request unauthorized with a just-refreshed credential, giving up");
            return Err(AuthError::Unauthenticated);
        }

        warn!("request unauthorized, refreshing credential and retrying once");
        let fresh = self.refresh(observed).await?;

        match request(fresh).await {
            Err(e) if e.is_unauthorized() => {
                warn!("request unauthorized after refresh, giving up");
                Err(AuthError::Unauthenticated)
            }
            other => other,
        }
    }

    async fn refresh(&self, observed: u64) -> Result<Credential, AuthError> {
        self.coordinator.ensure_fresh(observed).await.map_err(|e| {
            warn!("refresh failed: {}", e);
            AuthError::Unauthenticated
        })
    }
}

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info};

use parlor_types::events::SessionStatus;

use crate::client::AuthClient;
use crate::credential::Credential;
use crate::error::AuthError;
use crate::storage::CredentialFile;
use crate::store::TokenStore;

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential, Arc<AuthError>>>>;

struct InFlight {
    /// Store epoch the refresh was started from.
    started_at: u64,
    refresh: SharedRefresh,
}

/// Single-flight credential refresh.
///
/// However many callers ask for a fresh credential at once, at most one
/// refresh call is outstanding against the auth service; everyone who asked
/// while it ran gets its result.
pub struct RefreshCoordinator<A> {
    auth: Arc<A>,
    store: TokenStore,
    status: Arc<watch::Sender<SessionStatus>>,
    mirror: Option<CredentialFile>,
    in_flight: Mutex<Option<InFlight>>,
}

impl<A: AuthClient> RefreshCoordinator<A> {
    pub fn new(auth: Arc<A>, store: TokenStore, status: Arc<watch::Sender<SessionStatus>>) -> Self {
        Self {
            auth,
            store,
            status,
            mirror: None,
            in_flight: Mutex::new(None),
        }
    }

    /// Keep `file` in step with every refresh outcome.
    pub fn with_mirror(mut self, file: CredentialFile) -> Self {
        self.mirror = Some(file);
        self
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Return a credential newer than the one the caller saw at
    /// `observed_epoch`, refreshing only if nobody has yet.
    ///
    /// Callers must pass the epoch they read *before* the call that failed,
    /// not the latest one, or a refresh that finished in between would be
    /// repeated.
    pub async fn ensure_fresh(&self, observed_epoch: u64) -> Result<Credential, AuthError> {
        let refresh = {
            let mut slot = self.in_flight.lock().await;
            let (current, epoch) = self.store.snapshot();

            if epoch > observed_epoch {
                debug!(observed_epoch, epoch, "credential already replaced");
                return current.ok_or_else(|| AuthError::SessionExpired {
                    reason: "credential was cleared".into(),
                });
            }

            match slot.as_ref() {
                Some(in_flight) if in_flight.started_at == epoch => {
                    debug!(epoch, "joining in-flight refresh");
                    in_flight.refresh.clone()
                }
                _ => {
                    let Some(credential) = current else {
                        return Err(AuthError::SessionExpired {
                            reason: "no credential to refresh".into(),
                        });
                    };
                    let refresh = self.start(credential, epoch);
                    *slot = Some(InFlight {
                        started_at: epoch,
                        refresh: refresh.clone(),
                    });
                    refresh
                }
            }
        };

        refresh.await.map_err(|e| AuthError::SessionExpired {
            reason: e.to_string(),
        })
    }

    fn start(&self, credential: Credential, epoch: u64) -> SharedRefresh {
        let auth = self.auth.clone();
        let store = self.store.clone();
        let status = self.status.clone();
        let mirror = self.mirror.clone();

        async move {
            info!(subject = credential.subject_id(), epoch, "refreshing credential");

            match auth.refresh(credential.subject_id(), &credential).await {
                Ok(fresh) => {
                    match store.swap_if(epoch, Some(fresh.clone())) {
                        Some(new_epoch) => {
                            info!(new_epoch, "credential refreshed");
                            if let Some(mirror) = &mirror {
                                mirror.sync(Some(&fresh));
                            }
                        }
                        // Someone logged in again meanwhile; theirs wins.
                        None => debug!("store changed during refresh, keeping newer credential"),
                    }
                    Ok(store.current().unwrap_or(fresh))
                }
                Err(e) => {
                    if store.swap_if(epoch, None).is_none() {
                        // A newer credential arrived meanwhile; the session lives on.
                        if let Some(current) = store.current() {
                            debug!("refresh failed after the store moved on: {}", e);
                            return Ok(current);
                        }
                        return Err(Arc::new(e));
                    }
                    error!("credential refresh failed, ending session: {}", e);
                    status.send_replace(SessionStatus::Expired);
                    if let Some(mirror) = &mirror {
                        mirror.sync(None);
                    }
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
        .shared()
    }
}

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use parlor_types::api::RegisterRequest;
use parlor_types::events::SessionStatus;

use crate::client::AuthClient;
use crate::credential::Credential;
use crate::error::AuthError;
use crate::interceptor::{InterceptorConfig, RequestInterceptor};
use crate::refresh::RefreshCoordinator;
use crate::storage::CredentialFile;
use crate::store::TokenStore;

/// The authenticated identity bound to this process.
///
/// Owns the token store and the refresh/retry machinery; other components
/// get read access to the store or go through the interceptor.
pub struct Session<A> {
    auth: Arc<A>,
    store: TokenStore,
    status: Arc<watch::Sender<SessionStatus>>,
    coordinator: Arc<RefreshCoordinator<A>>,
    interceptor: Arc<RequestInterceptor<A>>,
    mirror: Option<CredentialFile>,
}

impl<A: AuthClient> Session<A> {
    pub fn new(auth: Arc<A>, config: InterceptorConfig) -> Self {
        Self::build(auth, config, None)
    }

    /// Like [`Session::new`], mirroring the credential to `file`.
    pub fn with_mirror(auth: Arc<A>, config: InterceptorConfig, file: CredentialFile) -> Self {
        Self::build(auth, config, Some(file))
    }

    fn build(auth: Arc<A>, config: InterceptorConfig, mirror: Option<CredentialFile>) -> Self {
        let store = TokenStore::new();
        let (status, _) = watch::channel(SessionStatus::LoggedOut);
        let status = Arc::new(status);

        let mut coordinator = RefreshCoordinator::new(auth.clone(), store.clone(), status.clone());
        if let Some(file) = &mirror {
            coordinator = coordinator.with_mirror(file.clone());
        }
        let coordinator = Arc::new(coordinator);
        let interceptor = Arc::new(RequestInterceptor::new(coordinator.clone(), config));

        Self {
            auth,
            store,
            status,
            coordinator,
            interceptor,
            mirror,
        }
    }

    /// Resume from the mirrored credential, if there is one.
    ///
    /// An expired credential is still restored; the interceptor refreshes it
    /// before first use.
    pub fn restore(&self) -> Result<bool, AuthError> {
        let Some(mirror) = &self.mirror else {
            return Ok(false);
        };
        match mirror.load()? {
            Some(credential) => {
                info!(subject = credential.subject_id(), "restored session");
                self.install(credential);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, AuthError> {
        let credential = self.auth.login(email, password).await?;
        info!(subject = credential.subject_id(), "logged in");
        self.install(credential.clone());
        Ok(credential)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<Credential, AuthError> {
        let credential = self.auth.register(request).await?;
        info!(subject = credential.subject_id(), "registered");
        self.install(credential.clone());
        Ok(credential)
    }

    /// End the session. Local state is cleared even if the service call fails.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let Some(credential) = self.store.current() else {
            return Ok(());
        };

        let result = self.auth.logout(&credential).await;
        if let Err(e) = &result {
            warn!("logout call failed, clearing session anyway: {}", e);
        }

        self.store.clear();
        if let Some(mirror) = &self.mirror {
            mirror.sync(None);
        }
        self.status.send_replace(SessionStatus::LoggedOut);
        info!(subject = credential.subject_id(), "logged out");

        result
    }

    fn install(&self, credential: Credential) {
        if let Some(mirror) = &self.mirror {
            mirror.sync(Some(&credential));
        }
        self.store.replace(credential);
        self.status.send_replace(SessionStatus::Active);
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.store
    }

    pub fn coordinator(&self) -> Arc<RefreshCoordinator<A>> {
        self.coordinator.clone()
    }

    pub fn interceptor(&self) -> Arc<RequestInterceptor<A>> {
        self.interceptor.clone()
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.status() == SessionStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::refresh::tests::FakeAuth;

    #[tokio::test]
    async fn login_activates_and_logout_clears() {
        let session = Session::new(Arc::new(FakeAuth::default()), InterceptorConfig::default());
        assert_eq!(session.status(), SessionStatus::LoggedOut);

        let credential = session.login("ada@example.com", "pw").await.unwrap();
        assert!(session.is_active());
        assert_eq!(session.tokens().current(), Some(credential));

        session.logout().await.unwrap();
        assert_eq!(session.status(), SessionStatus::LoggedOut);
        assert!(session.tokens().current().is_none());
    }

    #[tokio::test]
    async fn refresh_failure_expires_session() {
        let auth = Arc::new(FakeAuth::default());
        auth.fail_refresh.store(true, Ordering::SeqCst);
        let session = Session::new(auth, InterceptorConfig::default());
        session.login("ada@example.com", "pw").await.unwrap();
        let mut status = session.subscribe();

        let result: Result<(), _> = session
            .interceptor()
            .call(|_| async { Err(AuthError::Unauthorized) })
            .await;

        assert!(matches!(result, Err(AuthError::Unauthenticated)));
        status.changed().await.unwrap();
        assert_eq!(*status.borrow(), SessionStatus::Expired);
        assert!(session.tokens().current().is_none());
    }

    #[tokio::test]
    async fn mirror_follows_login_and_logout() {
        let dir = std::env::temp_dir().join(format!("parlor_session_test_{}", uuid::Uuid::new_v4()));
        let file = CredentialFile::new(dir.join("credential.json"));
        let auth = Arc::new(FakeAuth::default());

        let session = Session::with_mirror(auth.clone(), InterceptorConfig::default(), file.clone());
        let credential = session.login("ada@example.com", "pw").await.unwrap();
        assert_eq!(file.load().unwrap(), Some(credential.clone()));

        let resumed = Session::with_mirror(auth, InterceptorConfig::default(), file.clone());
        assert!(resumed.restore().unwrap());
        assert_eq!(resumed.tokens().current(), Some(credential));
        assert!(resumed.is_active());

        resumed.logout().await.unwrap();
        assert!(file.load().unwrap().is_none());
    }
}

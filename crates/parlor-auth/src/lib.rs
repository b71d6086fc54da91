//! Credential handling for the Parlor session core.
//!
//! [`TokenStore`] holds the one current credential, [`RefreshCoordinator`]
//! makes sure concurrent callers share a single refresh, and
//! [`RequestInterceptor`] wraps outbound calls with refresh-and-retry-once.
//! [`Session`] owns all three for the lifetime of a login.

pub mod api;
pub mod client;
pub mod credential;
pub mod error;
pub mod interceptor;
pub mod refresh;
pub mod session;
pub mod storage;
pub mod store;

pub use api::{ApiClient, RoomDirectory};
pub use client::{AuthClient, HttpAuthClient};
pub use credential::Credential;
pub use error::AuthError;
pub use interceptor::{InterceptorConfig, RequestInterceptor};
pub use refresh::RefreshCoordinator;
pub use session::Session;
pub use storage::CredentialFile;
pub use store::TokenStore;

use std::sync::Arc;

use reqwest::{Method, Response, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use parlor_types::models::Room;

use crate::client::{AuthClient, base_url_with_slash};
use crate::credential::Credential;
use crate::error::AuthError;
use crate::interceptor::RequestInterceptor;

/// JSON HTTP client whose every call goes through the [`RequestInterceptor`].
pub struct ApiClient<A> {
    http: reqwest::Client,
    base: Url,
    interceptor: Arc<RequestInterceptor<A>>,
}

impl<A: AuthClient> ApiClient<A> {
    pub fn new(base_url: &str, interceptor: Arc<RequestInterceptor<A>>) -> Result<Self, AuthError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: base_url_with_slash(base_url)?,
            interceptor,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        let text = self.execute(Method::GET, path, None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, AuthError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let text = self.execute(Method::POST, path, Some(body)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), AuthError> {
        self.execute(Method::DELETE, path, None).await.map(|_| ())
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<String, AuthError> {
        let url = self.base.join(path)?;
        debug!("{} {}", method, url);

        self.interceptor
            .call(|credential: Credential| {
                let mut request = self
                    .http
                    .request(method.clone(), url.clone())
                    .header(header::AUTHORIZATION, credential.bearer());
                if let Some(body) = &body {
                    request = request.json(body);
                }
                async move { read_body(request.send().await?).await }
            })
            .await
    }
}

async fn read_body(response: Response) -> Result<String, AuthError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(AuthError::Unauthorized);
    }
    let text = response.text().await?;
    if !status.is_success() {
        return Err(AuthError::Status {
            status: status.as_u16(),
            message: text,
        });
    }
    Ok(text)
}

/// The room-listing collaborator.
pub struct RoomDirectory<A> {
    api: Arc<ApiClient<A>>,
}

impl<A: AuthClient> RoomDirectory<A> {
    pub fn new(api: Arc<ApiClient<A>>) -> Self {
        Self { api }
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, AuthError> {
        self.api.get_json("api/chat/rooms").await
    }
}

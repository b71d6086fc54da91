use std::future::Future;

use reqwest::{Response, StatusCode, header};
use serde::Serialize;
use tracing::debug;
use url::Url;

use parlor_types::api::{
    ApiErrorBody, LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest, TokenResponse,
};

use crate::credential::Credential;
use crate::error::AuthError;

/// The authentication service, as seen by the session core.
pub trait AuthClient: Send + Sync + 'static {
    fn login(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Credential, AuthError>> + Send;

    fn register(
        &self,
        request: &RegisterRequest,
    ) -> impl Future<Output = Result<Credential, AuthError>> + Send;

    /// Exchange the current credential for a fresh one.
    fn refresh(
        &self,
        subject_id: &str,
        credential: &Credential,
    ) -> impl Future<Output = Result<Credential, AuthError>> + Send;

    fn logout(&self, credential: &Credential) -> impl Future<Output = Result<(), AuthError>> + Send;
}

/// [`AuthClient`] over the auth service's JSON endpoints.
#[derive(Clone)]
pub struct HttpAuthClient {
    http: reqwest::Client,
    base: Url,
}

impl HttpAuthClient {
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, AuthError> {
        Ok(Self {
            http,
            base: base_url_with_slash(base_url)?,
        })
    }

    async fn post_for_token<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        bearer: Option<&Credential>,
    ) -> Result<Credential, AuthError> {
        let url = self.base.join(path)?;
        debug!("POST {}", url);

        let mut request = self.http.post(url).json(body);
        if let Some(credential) = bearer {
            request = request.header(header::AUTHORIZATION, credential.bearer());
        }
        let response = request.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status, &text));
        }

        // The register endpoint reports validation failures with a 200 and
        // an `error` field.
        match serde_json::from_str::<TokenResponse>(&text) {
            Ok(body) => Credential::from_token(body.access_token),
            Err(e) => match serde_json::from_str::<ApiErrorBody>(&text) {
                Ok(ApiErrorBody {
                    code,
                    error: Some(message),
                }) => Err(AuthError::Api {
                    code: code.unwrap_or_else(|| "invalid_argument".into()),
                    message,
                }),
                _ => Err(AuthError::Decode(e)),
            },
        }
    }
}

impl AuthClient for HttpAuthClient {
    async fn login(&self, email: &str, password: &str) -> Result<Credential, AuthError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.post_for_token("api/login", &body, None).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<Credential, AuthError> {
        self.post_for_token("api/register", request, None).await
    }

    async fn refresh(
        &self,
        subject_id: &str,
        credential: &Credential,
    ) -> Result<Credential, AuthError> {
        let body = RefreshRequest {
            access_token: credential.token().to_string(),
            user_id: subject_id.to_string(),
        };
        self.post_for_token("api/refresh-token", &body, Some(credential))
            .await
    }

    async fn logout(&self, credential: &Credential) -> Result<(), AuthError> {
        let url = self.base.join("api/logout")?;
        let body = LogoutRequest {
            access_token: credential.token().to_string(),
        };
        let response = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, credential.bearer())
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await.map(|_| ())
    }
}

/// Parse a base URL so that `join` appends to its path instead of replacing
/// the last segment.
pub(crate) fn base_url_with_slash(base_url: &str) -> Result<Url, AuthError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn ensure_success(response: Response) -> Result<Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(api_error(status, &text))
}

fn api_error(status: StatusCode, text: &str) -> AuthError {
    let body: ApiErrorBody = serde_json::from_str(text).unwrap_or_default();
    AuthError::Api {
        code: body
            .code
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_lowercase()),
        message: body.error.unwrap_or_else(|| text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = base_url_with_slash("http://localhost:8080/auth").unwrap();
        assert_eq!(
            url.join("api/login").unwrap().as_str(),
            "http://localhost:8080/auth/api/login"
        );
    }

    #[test]
    fn api_error_prefers_body_code() {
        let err = api_error(
            StatusCode::BAD_REQUEST,
            r#"{"code":"invalid_argument","message":"email cannot be empty"}"#,
        );
        match err {
            AuthError::Api { code, message } => {
                assert_eq!(code, "invalid_argument");
                assert_eq!(message, "email cannot be empty");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn api_error_falls_back_to_status() {
        match api_error(StatusCode::UNAUTHORIZED, "nope") {
            AuthError::Api { code, message } => {
                assert_eq!(code, "unauthorized");
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};

use parlor_types::api::Claims;

use crate::error::AuthError;

/// A bearer token together with the identity claims decoded from it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    claims: Claims,
    subject_id: String,
    expires_at: DateTime<Utc>,
}

impl Credential {
    /// Decode the token payload.
    ///
    /// The signature is not checked: the client never holds the signing
    /// secret and the services validate the token on every call anyway.
    /// Expiry is read but not enforced here.
    pub fn from_token(token: impl Into<String>) -> Result<Self, AuthError> {
        let token = token.into();

        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(&token, &DecodingKey::from_secret(&[]), &validation)?;
        let claims = data.claims;

        let subject_id = claims
            .subject_id()
            .ok_or(AuthError::MissingSubject)?
            .to_string();
        let expires_at = DateTime::from_timestamp(claims.exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(Self {
            token,
            claims,
            subject_id,
            expires_at,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn display_name(&self) -> String {
        self.claims.display_name()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True if the credential expires within `leeway` of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        now.checked_add_signed(leeway)
            .is_none_or(|deadline| deadline >= self.expires_at)
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

// Keep the raw token out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("subject_id", &self.subject_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

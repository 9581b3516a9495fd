//! OAuth2 core primitives: Client, AuthorizationCode, tokens and errors.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::crypto::constant_time_eq;
use super::scope::Scopes;

/// Represents a registered OAuth 2.0 client application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Client identifier, unique across the registry.
    pub id: String,
    /// Client secret used at the token endpoint.
    pub secret: String,
    /// Redirect URIs the client may use, matched exactly.
    pub redirect_uris: HashSet<String>,
    /// Scopes the client may request.
    pub allowed_scopes: HashSet<String>,
}

impl Client {
    /// Builds a client from any iterables of redirect URIs and scopes.
    pub fn new<R, S>(
        id: impl Into<String>,
        secret: impl Into<String>,
        redirect_uris: impl IntoIterator<Item = R>,
        allowed_scopes: impl IntoIterator<Item = S>,
    ) -> Self
    where
        R: Into<String>,
        S: Into<String>,
    {
        Client {
            id: id.into(),
            secret: secret.into(),
            redirect_uris: redirect_uris.into_iter().map(Into::into).collect(),
            allowed_scopes: allowed_scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// True if `uri` is one of the registered redirect URIs.
    pub fn allows_redirect(&self, uri: &str) -> bool {
        self.redirect_uris.contains(uri)
    }

    /// True if every requested scope is allowed for this client.
    pub fn allows_scopes(&self, scopes: &Scopes) -> bool {
        scopes.iter().all(|s| self.allowed_scopes.contains(s))
    }

    /// Compares the presented secret against the registered one in constant time.
    pub fn secret_matches(&self, secret: &str) -> bool {
        constant_time_eq(self.secret.as_bytes(), secret.as_bytes())
    }
}

/// PKCE transformation applied to the code verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    /// `BASE64URL(SHA256(verifier)) == challenge`
    S256,
    /// `verifier == challenge`
    #[serde(rename = "plain")]
    Plain,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::S256 => "S256",
            CodeChallengeMethod::Plain => "plain",
        }
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(CodeChallengeMethod::S256),
            "plain" => Ok(CodeChallengeMethod::Plain),
            _ => Err(OAuthError::InvalidRequest),
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issued, not yet redeemed authorization code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// Opaque high-entropy code string.
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    /// Redirect URI the code was issued for; must be presented again at exchange.
    pub redirect_uri: String,
    pub scopes: Scopes,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// PKCE challenge, if the authorization request declared one.
    pub code_challenge: Option<String>,
    /// Raw method string from the authorization request. Kept unparsed so an
    /// unknown method fails verification instead of being rejected up front.
    pub code_challenge_method: Option<String>,
}

impl AuthorizationCode {
    /// A code is expired once `now` reaches `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// An issued access token. Read-only until revoked or expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub scopes: Scopes,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Shared by every token descending from the same code exchange.
    pub family_id: Uuid,
}

impl AccessToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// What `validate_access_token` hands to resource-serving code.
pub type TokenInfo = AccessToken;

/// An issued refresh token. Rotated on every use, never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub scopes: Scopes,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub family_id: Uuid,
}

impl RefreshToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Which token store an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Token endpoint success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always `"Bearer"`.
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    pub refresh_token: String,
    /// Space-delimited granted scopes.
    pub scope: String,
}

/// Error body a transport layer sends alongside the status it picks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_description: String,
}

/// Core OAuth2 error kinds.
///
/// `InvalidGrant` deliberately covers every reason a code or refresh token can be
/// refused, so callers cannot learn which sub-check failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum OAuthError {
    /// Unknown client, or client authentication failed.
    #[error("Client authentication failed")]
    InvalidClient,
    /// Redirect URI is not registered for the client.
    #[error("Redirect URI is not registered for this client")]
    InvalidRedirectUri,
    /// Only `response_type=code` is supported.
    #[error("Response type is not supported")]
    UnsupportedResponseType,
    /// Requested scope exceeds what the client may request.
    #[error("Requested scope is not allowed for this client")]
    InvalidScope,
    /// Code or refresh token is missing, expired, used or does not match the request.
    #[error("Invalid grant provided")]
    InvalidGrant,
    /// `grant_type` is neither `authorization_code` nor `refresh_token`.
    #[error("Grant type is not supported")]
    UnsupportedGrantType,
    /// A required request parameter is missing or malformed.
    #[error("Request is missing a required parameter")]
    InvalidRequest,
    /// Token or client lookup found nothing.
    #[error("Not found")]
    NotFound,
    /// Access token exists but its lifetime has elapsed.
    #[error("The token has expired")]
    Expired,
    /// A client with the same id is already registered.
    #[error("A client with this id is already registered")]
    DuplicateClient,
    /// Generic server-side failure, e.g. the system RNG failed.
    #[error("Internal server error")]
    ServerError,
}

impl OAuthError {
    /// Symbolic error code as used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::InvalidClient => "invalid_client",
            OAuthError::InvalidRedirectUri => "invalid_redirect_uri",
            OAuthError::UnsupportedResponseType => "unsupported_response_type",
            OAuthError::InvalidScope => "invalid_scope",
            OAuthError::InvalidGrant => "invalid_grant",
            OAuthError::UnsupportedGrantType => "unsupported_grant_type",
            OAuthError::InvalidRequest => "invalid_request",
            OAuthError::NotFound => "not_found",
            OAuthError::Expired => "expired",
            OAuthError::DuplicateClient => "duplicate_client",
            OAuthError::ServerError => "server_error",
        }
    }

    /// Builds the JSON error body for this error.
    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.code().to_string(),
            error_description: self.to_string(),
        }
    }
}

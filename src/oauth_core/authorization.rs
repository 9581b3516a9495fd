//! Authorization endpoint logic: validates a request and issues a code.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::config::OAuthConfig;
use super::crypto::generate_random_string;
use super::oauth_provider::{AuthorizationCodeStore, ClientStore};
use super::scope::Scopes;
use super::types::{AuthorizationCode, OAuthError};

/// Parameters of an authorization request, after the transport layer has
/// authenticated the resource owner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    /// Space-delimited requested scopes.
    #[serde(default)]
    pub scope: String,
    /// Opaque value echoed back untouched.
    #[serde(default)]
    pub state: Option<String>,
    /// Authenticated resource owner.
    pub user_id: String,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

/// Outcome of an authorization request that got far enough to trust its redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeResponse {
    /// Redirect to `redirect_uri` with `code` and `state`.
    Code {
        redirect_uri: String,
        code: String,
        state: Option<String>,
    },
    /// Redirect to `redirect_uri` with `error` and `state`.
    ErrorRedirect {
        redirect_uri: String,
        error: OAuthError,
        state: Option<String>,
    },
}

impl AuthorizeResponse {
    pub fn redirect_uri(&self) -> &str {
        match self {
            AuthorizeResponse::Code { redirect_uri, .. }
            | AuthorizeResponse::ErrorRedirect { redirect_uri, .. } => redirect_uri,
        }
    }

    pub fn state(&self) -> Option<&str> {
        match self {
            AuthorizeResponse::Code { state, .. } | AuthorizeResponse::ErrorRedirect { state, .. } => {
                state.as_deref()
            }
        }
    }

    /// The issued code, if the request succeeded.
    pub fn code(&self) -> Option<&str> {
        match self {
            AuthorizeResponse::Code { code, .. } => Some(code),
            AuthorizeResponse::ErrorRedirect { .. } => None,
        }
    }
}

/// Validates authorization requests and issues codes.
pub struct AuthorizationService<C: ClientStore, A: AuthorizationCodeStore> {
    clients: Arc<C>,
    codes: Arc<A>,
    config: Arc<OAuthConfig>,
}

impl<C: ClientStore, A: AuthorizationCodeStore> Clone for AuthorizationService<C, A> {
    fn clone(&self) -> Self {
        Self {
            clients: self.clients.clone(),
            codes: self.codes.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: ClientStore, A: AuthorizationCodeStore> AuthorizationService<C, A> {
    pub fn new(clients: Arc<C>, codes: Arc<A>, config: Arc<OAuthConfig>) -> Self {
        Self { clients, codes, config }
    }

    /// Validates `request` and issues an authorization code.
    ///
    /// Checks run in order: client, redirect URI, response type, scope. A bad
    /// client or redirect URI is a hard error because the redirect target cannot
    /// be trusted. An unsupported response type is reported through the
    /// (already verified) redirect instead.
    #[instrument(
        skip_all,
        fields(client_id = %request.client_id, user_id = %request.user_id),
        level = "debug"
    )]
    pub async fn issue_code(&self, request: AuthorizeRequest) -> Result<AuthorizeResponse, OAuthError> {
        let client = self
            .clients
            .get_client(&request.client_id)
            .await
            .map_err(|_| OAuthError::InvalidClient)?;

        if !client.allows_redirect(&request.redirect_uri) {
            debug!(redirect_uri = %request.redirect_uri, "redirect URI not registered");
            return Err(OAuthError::InvalidRedirectUri);
        }

        if request.response_type != "code" {
            debug!(response_type = %request.response_type, "unsupported response type");
            return Ok(AuthorizeResponse::ErrorRedirect {
                redirect_uri: request.redirect_uri,
                error: OAuthError::UnsupportedResponseType,
                state: request.state,
            });
        }

        let scopes = Scopes::parse(&request.scope);
        if !client.allows_scopes(&scopes) {
            debug!(scope = %request.scope, "scope exceeds client allowance");
            return Err(OAuthError::InvalidScope);
        }

        let code = generate_random_string(self.config.code_length)?;
        let issued_at = Utc::now();
        self.codes
            .store_code(AuthorizationCode {
                code: code.clone(),
                client_id: client.id,
                user_id: request.user_id,
                redirect_uri: request.redirect_uri.clone(),
                scopes,
                issued_at,
                expires_at: issued_at + self.config.authorization_code_ttl(),
                code_challenge: request.code_challenge,
                code_challenge_method: request.code_challenge_method,
            })
            .await?;
        info!("authorization code issued");

        Ok(AuthorizeResponse::Code {
            redirect_uri: request.redirect_uri,
            code,
            state: request.state,
        })
    }
}

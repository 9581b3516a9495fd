//! Token endpoint logic: code redemption, refresh rotation, validation and revocation.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::config::{OAuthConfig, RefreshReusePolicy};
use super::crypto::{generate_random_string, verify_code_challenge};
use super::oauth_provider::{AuthorizationCodeStore, ClientStore, TokenStorage};
use super::scope::Scopes;
use super::types::{
    AccessToken, AuthorizationCode, Client, OAuthError, RefreshToken, TokenInfo, TokenKind, TokenResponse,
};

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Token endpoint parameters, as decoded from a form or JSON body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub code_verifier: Option<String>,
}

/// Redeems codes and manages the lifecycle of access and refresh tokens.
pub struct TokenService<C: ClientStore, A: AuthorizationCodeStore, T: TokenStorage> {
    clients: Arc<C>,
    codes: Arc<A>,
    tokens: Arc<T>,
    config: Arc<OAuthConfig>,
}

impl<C: ClientStore, A: AuthorizationCodeStore, T: TokenStorage> Clone for TokenService<C, A, T> {
    fn clone(&self) -> Self {
        Self {
            clients: self.clients.clone(),
            codes: self.codes.clone(),
            tokens: self.tokens.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: ClientStore, A: AuthorizationCodeStore, T: TokenStorage> TokenService<C, A, T> {
    pub fn new(clients: Arc<C>, codes: Arc<A>, tokens: Arc<T>, config: Arc<OAuthConfig>) -> Self {
        Self { clients, codes, tokens, config }
    }

    /// Dispatches a token endpoint request on its `grant_type`.
    ///
    /// The client is authenticated before the grant type is looked at, so bad
    /// credentials always surface as `invalid_client`.
    #[instrument(
        skip_all,
        fields(client_id = %request.client_id, grant_type = %request.grant_type),
        level = "debug"
    )]
    pub async fn handle_token_request(&self, request: TokenRequest) -> Result<TokenResponse, OAuthError> {
        let client = self
            .authenticate_client(&request.client_id, &request.client_secret)
            .await?;
        match request.grant_type.as_str() {
            GRANT_AUTHORIZATION_CODE => {
                let code = request.code.ok_or(OAuthError::InvalidRequest)?;
                self.redeem_code(
                    &client,
                    &code,
                    request.redirect_uri.as_deref().unwrap_or_default(),
                    request.code_verifier.as_deref(),
                )
                .await
            }
            GRANT_REFRESH_TOKEN => {
                let refresh_token = request.refresh_token.ok_or(OAuthError::InvalidRequest)?;
                self.rotate(&client, &refresh_token).await
            }
            other => {
                debug!(grant_type = other, "unsupported grant type");
                Err(OAuthError::UnsupportedGrantType)
            }
        }
    }

    /// Exchanges an authorization code for a token pair, consuming the code.
    #[instrument(skip(self, code, client_secret, code_verifier), level = "debug")]
    pub async fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, OAuthError> {
        let client = self.authenticate_client(client_id, client_secret).await?;
        self.redeem_code(&client, code, redirect_uri, code_verifier).await
    }

    /// Rotates a refresh token: the presented token is deleted and a new pair issued.
    #[instrument(skip(self, refresh_token, client_secret), level = "debug")]
    pub async fn refresh_tokens(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenResponse, OAuthError> {
        let client = self.authenticate_client(client_id, client_secret).await?;
        self.rotate(&client, refresh_token).await
    }

    /// Returns the token's info, `NotFound` if unknown, or `Expired` (after
    /// dropping it) if its lifetime has elapsed.
    pub async fn validate_access_token(&self, token: &str) -> Result<TokenInfo, OAuthError> {
        let now = Utc::now();
        match self.tokens.get_access_token(token).await? {
            None => Err(OAuthError::NotFound),
            Some(info) if info.is_expired_at(now) => {
                self.tokens.remove_access_token_if_expired(token, now).await?;
                debug!(client_id = %info.client_id, "access token expired");
                Err(OAuthError::Expired)
            }
            Some(info) => Ok(info),
        }
    }

    /// Removes a token from the store matching `kind`.
    ///
    /// Revoking a token that is already gone reports `NotFound`.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn revoke_token(&self, token: &str, kind: TokenKind) -> Result<(), OAuthError> {
        let client_id = match kind {
            TokenKind::Access => self.tokens.remove_access_token(token).await?.map(|t| t.client_id),
            TokenKind::Refresh => self.tokens.remove_refresh_token(token).await?.map(|t| t.client_id),
        };
        match client_id {
            Some(client_id) => {
                info!(%client_id, "token revoked");
                Ok(())
            }
            None => Err(OAuthError::NotFound),
        }
    }

    async fn authenticate_client(&self, client_id: &str, client_secret: &str) -> Result<Client, OAuthError> {
        let client = self
            .clients
            .get_client(client_id)
            .await
            .map_err(|_| OAuthError::InvalidClient)?;
        if !client.secret_matches(client_secret) {
            warn!(client_id, "client authentication failed");
            return Err(OAuthError::InvalidClient);
        }
        Ok(client)
    }

    async fn redeem_code(
        &self,
        client: &Client,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, OAuthError> {
        let now = Utc::now();
        let client_id = client.id.as_str();
        let check = |c: &AuthorizationCode| -> bool {
            if c.is_expired_at(now) {
                debug!("authorization code expired");
                return false;
            }
            if c.client_id != client_id {
                debug!("authorization code issued to another client");
                return false;
            }
            if c.redirect_uri != redirect_uri {
                debug!("redirect URI differs from authorization request");
                return false;
            }
            let Some(challenge) = c.code_challenge.as_deref() else {
                return true;
            };
            let method = c.code_challenge_method.as_deref().unwrap_or_default();
            let verified = code_verifier.is_some_and(|v| verify_code_challenge(v, challenge, method));
            if !verified {
                warn!(client_id, method, "PKCE verification failed");
            }
            verified
        };

        let Some(consumed) = self.codes.consume_code_if(code, &check).await? else {
            // Expired codes are discarded as soon as someone presents them.
            self.codes
                .consume_code_if(code, &|c: &AuthorizationCode| c.is_expired_at(now))
                .await?;
            return Err(OAuthError::InvalidGrant);
        };

        let response = self
            .issue_pair(&consumed.client_id, &consumed.user_id, consumed.scopes, Uuid::new_v4())
            .await?;
        info!(client_id, user_id = %consumed.user_id, "authorization code redeemed");
        Ok(response)
    }

    async fn rotate(&self, client: &Client, refresh_token: &str) -> Result<TokenResponse, OAuthError> {
        let now = Utc::now();
        let client_id = client.id.as_str();
        let check = |t: &RefreshToken| -> bool {
            if t.is_expired_at(now) {
                debug!("refresh token expired");
                return false;
            }
            if t.client_id != client_id {
                debug!("refresh token issued to another client");
                return false;
            }
            true
        };

        let Some(old) = self.tokens.take_refresh_token_if(refresh_token, &check).await? else {
            self.tokens
                .take_refresh_token_if(refresh_token, &|t: &RefreshToken| t.is_expired_at(now))
                .await?;
            self.handle_refresh_reuse(refresh_token).await?;
            return Err(OAuthError::InvalidGrant);
        };

        let response = self
            .issue_pair(&old.client_id, &old.user_id, old.scopes, old.family_id)
            .await?;
        // Recorded only once the new pair is stored, so a replay revokes it too.
        if self.config.refresh_reuse_policy == RefreshReusePolicy::RevokeFamily {
            self.tokens
                .record_rotated(&old.token, old.family_id, old.expires_at)
                .await?;
        }
        info!(client_id, user_id = %old.user_id, "refresh token rotated");
        Ok(response)
    }

    async fn handle_refresh_reuse(&self, refresh_token: &str) -> Result<(), OAuthError> {
        if self.config.refresh_reuse_policy != RefreshReusePolicy::RevokeFamily {
            return Ok(());
        }
        if let Some(family_id) = self.tokens.rotated_family(refresh_token).await? {
            let revoked = self.tokens.revoke_family(family_id).await?;
            warn!(%family_id, revoked, "rotated refresh token replayed, token family revoked");
        }
        Ok(())
    }

    async fn issue_pair(
        &self,
        client_id: &str,
        user_id: &str,
        scopes: Scopes,
        family_id: Uuid,
    ) -> Result<TokenResponse, OAuthError> {
        let access = generate_random_string(self.config.token_length)?;
        let refresh = generate_random_string(self.config.token_length)?;
        let issued_at = Utc::now();
        let access_ttl = self.config.access_token_ttl();
        let scope = scopes.to_string();

        self.tokens
            .store_access_token(AccessToken {
                token: access.clone(),
                client_id: client_id.to_string(),
                user_id: user_id.to_string(),
                scopes: scopes.clone(),
                issued_at,
                expires_at: issued_at + access_ttl,
                family_id,
            })
            .await?;
        self.tokens
            .store_refresh_token(RefreshToken {
                token: refresh.clone(),
                client_id: client_id.to_string(),
                user_id: user_id.to_string(),
                scopes,
                issued_at,
                expires_at: issued_at + self.config.refresh_token_ttl(),
                family_id,
            })
            .await?;

        Ok(TokenResponse {
            access_token: access,
            token_type: "Bearer".to_string(),
            expires_in: access_ttl.num_seconds().max(0) as u64,
            refresh_token: refresh,
            scope,
        })
    }
}

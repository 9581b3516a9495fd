//! A single authorization server instance owning its stores.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use super::authorization::{AuthorizationService, AuthorizeRequest, AuthorizeResponse};
use super::config::{ConfigError, OAuthConfig};
use super::memory::{InMemoryClientStore, InMemoryCodeStore, InMemoryTokenStorage};
use super::oauth_provider::{AuthorizationCodeStore, ClientStore, TokenStorage};
use super::token_service::{TokenRequest, TokenService};
use super::types::{Client, OAuthError, TokenInfo, TokenKind, TokenResponse};

/// Authorization server wiring a client registry, a code store and a token
/// store into the authorization and token services.
///
/// Every instance owns its own stores, so independent servers can live side
/// by side (one per test, for example). Cloning is cheap and shares state.
pub struct OAuthServer<
    C: ClientStore = InMemoryClientStore,
    A: AuthorizationCodeStore = InMemoryCodeStore,
    T: TokenStorage = InMemoryTokenStorage,
> {
    clients: Arc<C>,
    codes: Arc<A>,
    tokens: Arc<T>,
    config: Arc<OAuthConfig>,
    authorization: AuthorizationService<C, A>,
    token_service: TokenService<C, A, T>,
}

impl<C: ClientStore, A: AuthorizationCodeStore, T: TokenStorage> Clone for OAuthServer<C, A, T> {
    fn clone(&self) -> Self {
        Self {
            clients: self.clients.clone(),
            codes: self.codes.clone(),
            tokens: self.tokens.clone(),
            config: self.config.clone(),
            authorization: self.authorization.clone(),
            token_service: self.token_service.clone(),
        }
    }
}

impl OAuthServer {
    /// Creates a server backed by fresh in-memory stores.
    pub fn in_memory(config: OAuthConfig) -> Result<Self, ConfigError> {
        Self::new(
            Arc::new(InMemoryClientStore::default()),
            Arc::new(InMemoryCodeStore::new()),
            Arc::new(InMemoryTokenStorage::new()),
            config,
        )
    }
}

impl Default for OAuthServer {
    fn default() -> Self {
        Self::assemble(
            Arc::new(InMemoryClientStore::default()),
            Arc::new(InMemoryCodeStore::new()),
            Arc::new(InMemoryTokenStorage::new()),
            OAuthConfig::default(),
        )
    }
}

impl<C: ClientStore, A: AuthorizationCodeStore, T: TokenStorage> OAuthServer<C, A, T> {
    /// Creates a server over the given stores, rejecting an invalid `config`.
    pub fn new(clients: Arc<C>, codes: Arc<A>, tokens: Arc<T>, config: OAuthConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(clients, codes, tokens, config))
    }

    fn assemble(clients: Arc<C>, codes: Arc<A>, tokens: Arc<T>, config: OAuthConfig) -> Self {
        let config = Arc::new(config);
        let authorization = AuthorizationService::new(clients.clone(), codes.clone(), config.clone());
        let token_service = TokenService::new(clients.clone(), codes.clone(), tokens.clone(), config.clone());
        Self {
            clients,
            codes,
            tokens,
            config,
            authorization,
            token_service,
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn clients(&self) -> &Arc<C> {
        &self.clients
    }

    pub fn codes(&self) -> &Arc<A> {
        &self.codes
    }

    pub fn tokens(&self) -> &Arc<T> {
        &self.tokens
    }

    pub fn authorization(&self) -> &AuthorizationService<C, A> {
        &self.authorization
    }

    pub fn token_service(&self) -> &TokenService<C, A, T> {
        &self.token_service
    }

    /// Registers a client; fails with `DuplicateClient` if the id is taken.
    #[instrument(skip_all, fields(client_id = %client.id), level = "debug")]
    pub async fn register_client(&self, client: Client) -> Result<(), OAuthError> {
        self.clients.register_client(client).await?;
        info!("client registered");
        Ok(())
    }

    pub async fn get_client(&self, client_id: &str) -> Result<Client, OAuthError> {
        self.clients.get_client(client_id).await
    }

    /// See [`AuthorizationService::issue_code`].
    pub async fn authorize(&self, request: AuthorizeRequest) -> Result<AuthorizeResponse, OAuthError> {
        self.authorization.issue_code(request).await
    }

    /// See [`TokenService::handle_token_request`].
    pub async fn token(&self, request: TokenRequest) -> Result<TokenResponse, OAuthError> {
        self.token_service.handle_token_request(request).await
    }

    /// See [`TokenService::exchange_code`].
    pub async fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, OAuthError> {
        self.token_service
            .exchange_code(code, client_id, client_secret, redirect_uri, code_verifier)
            .await
    }

    /// See [`TokenService::refresh_tokens`].
    pub async fn refresh_tokens(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenResponse, OAuthError> {
        self.token_service
            .refresh_tokens(refresh_token, client_id, client_secret)
            .await
    }

    /// See [`TokenService::validate_access_token`].
    pub async fn validate_access_token(&self, token: &str) -> Result<TokenInfo, OAuthError> {
        self.token_service.validate_access_token(token).await
    }

    /// See [`TokenService::revoke_token`].
    pub async fn revoke_token(&self, token: &str, kind: TokenKind) -> Result<(), OAuthError> {
        self.token_service.revoke_token(token, kind).await
    }

    /// Removes every expired code and token now. Returns how many entries went away.
    pub async fn purge_expired(&self) -> Result<usize, OAuthError> {
        let now = Utc::now();
        let codes = self.codes.purge_expired(now).await?;
        let tokens = self.tokens.purge_expired(now).await?;
        Ok(codes + tokens)
    }

    /// Spawns a task purging expired entries every `interval`.
    ///
    /// Expiry is enforced on every read regardless; the sweep only bounds
    /// memory held by credentials nobody presents again. Abort the returned
    /// handle to stop it.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match server.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "expired credentials purged"),
                    Err(err) => error!(error = %err, "expiry sweep failed"),
                }
            }
        })
    }

    /// Spawns the sweeper if `sweep_interval_secs` is configured, or if the
    /// `RevokeFamily` policy needs its rotation records reclaimed.
    pub fn spawn_configured_sweeper(&self) -> Option<JoinHandle<()>> {
        self.config
            .sweep_interval()
            .map(|interval| self.spawn_sweeper(interval))
    }
}

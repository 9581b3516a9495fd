//! Storage traits behind the authorization server.
//!
//! Every method covers exactly one store operation. Implementations must make
//! the `*_if` methods a single compare-and-delete on the key: the check and
//! the removal happen under the same lock, so two racing callers cannot both
//! observe the entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::{AccessToken, AuthorizationCode, Client, OAuthError, RefreshToken};

/// Predicate evaluated while the entry's lock is held.
pub type CodeCheck<'a> = &'a (dyn Fn(&AuthorizationCode) -> bool + Send + Sync);
pub type RefreshCheck<'a> = &'a (dyn Fn(&RefreshToken) -> bool + Send + Sync);

/// Trait for registering and retrieving OAuth2 clients.
#[async_trait]
pub trait ClientStore: Send + Sync + 'static {
    /// Registers a client. Fails with `InvalidRequest` if the id or secret is
    /// empty, and with `DuplicateClient` if the id is taken, leaving the
    /// existing entry untouched.
    async fn register_client(&self, client: Client) -> Result<(), OAuthError>;

    /// Retrieves a client by its identifier, or `NotFound`.
    async fn get_client(&self, id: &str) -> Result<Client, OAuthError>;
}

/// Trait for the store of issued authorization codes.
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync + 'static {
    /// Stores a freshly issued code. Fails with `ServerError` rather than
    /// replace a code already stored under the same value.
    async fn store_code(&self, code: AuthorizationCode) -> Result<(), OAuthError>;

    /// Looks up a code without consuming it.
    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCode>, OAuthError>;

    /// Removes and returns the code if `check` accepts it; otherwise leaves it in place.
    async fn consume_code_if(
        &self,
        code: &str,
        check: CodeCheck<'_>,
    ) -> Result<Option<AuthorizationCode>, OAuthError>;

    /// Drops every code expired at `now`, returning how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, OAuthError>;
}

/// Trait to abstract storage operations for access and refresh tokens.
#[async_trait]
pub trait TokenStorage: Send + Sync + 'static {
    /// Store an access token. A token value already in use is a `ServerError`.
    async fn store_access_token(&self, token: AccessToken) -> Result<(), OAuthError>;

    /// Retrieve an access token if it exists.
    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>, OAuthError>;

    /// Remove an access token, returning it if it was present.
    async fn remove_access_token(&self, token: &str) -> Result<Option<AccessToken>, OAuthError>;

    /// Remove an access token only if it is expired at `now`.
    async fn remove_access_token_if_expired(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, OAuthError>;

    /// Store a refresh token. A token value already in use is a `ServerError`.
    async fn store_refresh_token(&self, token: RefreshToken) -> Result<(), OAuthError>;

    /// Retrieve a refresh token if it exists.
    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, OAuthError>;

    /// Remove a refresh token, returning it if it was present.
    async fn remove_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, OAuthError>;

    /// Removes and returns the refresh token if `check` accepts it.
    async fn take_refresh_token_if(
        &self,
        token: &str,
        check: RefreshCheck<'_>,
    ) -> Result<Option<RefreshToken>, OAuthError>;

    /// Remembers that `token` was rotated away, until `expires_at`.
    async fn record_rotated(
        &self,
        token: &str,
        family_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), OAuthError>;

    /// Family of a previously rotated refresh token, if it is still remembered.
    async fn rotated_family(&self, token: &str) -> Result<Option<Uuid>, OAuthError>;

    /// Removes every access and refresh token of a family, returning the count.
    async fn revoke_family(&self, family_id: Uuid) -> Result<usize, OAuthError>;

    /// Drops every token and rotation record expired at `now`, returning the count.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, OAuthError>;
}

//! In-memory default implementations for OAuth core traits.
//!
//! Each store is its own sharded `DashMap`, so a lock is held only for the
//! duration of one map operation and different keys rarely contend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::warn;
use uuid::Uuid;

use super::oauth_provider::{AuthorizationCodeStore, ClientStore, CodeCheck, RefreshCheck, TokenStorage};
use super::types::{AccessToken, AuthorizationCode, Client, OAuthError, RefreshToken};

#[derive(Clone, Default)]
pub struct InMemoryClientStore {
    clients: Arc<DashMap<String, Client>>,
}

impl InMemoryClientStore {
    /// Creates a new in-memory client store with an initial set of clients.
    /// When ids repeat, the first client wins. Clients without an id or secret are skipped.
    pub fn new(initial_clients: Vec<Client>) -> Self {
        let map = DashMap::new();
        for client in initial_clients {
            if client.id.is_empty() || client.secret.is_empty() {
                warn!(client_id = %client.id, "skipping client without id or secret");
                continue;
            }
            map.entry(client.id.clone()).or_insert(client);
        }
        Self { clients: Arc::new(map) }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl ClientStore for InMemoryClientStore {
    async fn register_client(&self, client: Client) -> Result<(), OAuthError> {
        if client.id.is_empty() || client.secret.is_empty() {
            return Err(OAuthError::InvalidRequest);
        }
        match self.clients.entry(client.id.clone()) {
            Entry::Occupied(_) => Err(OAuthError::DuplicateClient),
            Entry::Vacant(slot) => {
                slot.insert(client);
                Ok(())
            }
        }
    }

    async fn get_client(&self, id: &str) -> Result<Client, OAuthError> {
        self.clients
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(OAuthError::NotFound)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCodeStore {
    codes: Arc<DashMap<String, AuthorizationCode>>,
}

impl InMemoryCodeStore {
    /// Creates an empty code store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[async_trait]
impl AuthorizationCodeStore for InMemoryCodeStore {
    async fn store_code(&self, code: AuthorizationCode) -> Result<(), OAuthError> {
        insert_vacant(&self.codes, code.code.clone(), code)
    }

    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCode>, OAuthError> {
        Ok(self.codes.get(code).map(|entry| entry.value().clone()))
    }

    async fn consume_code_if(
        &self,
        code: &str,
        check: CodeCheck<'_>,
    ) -> Result<Option<AuthorizationCode>, OAuthError> {
        Ok(self.codes.remove_if(code, |_, c| check(c)).map(|(_, c)| c))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, OAuthError> {
        let mut removed = 0;
        self.codes.retain(|_, c| {
            let keep = !c.is_expired_at(now);
            removed += usize::from(!keep);
            keep
        });
        Ok(removed)
    }
}

/// Inserts under a fresh key. A collision never replaces a live credential.
fn insert_vacant<V>(map: &DashMap<String, V>, key: String, value: V) -> Result<(), OAuthError> {
    match map.entry(key) {
        Entry::Occupied(_) => {
            warn!("generated credential collided with a live one");
            Err(OAuthError::ServerError)
        }
        Entry::Vacant(slot) => {
            slot.insert(value);
            Ok(())
        }
    }
}

/// Tombstone for a refresh token that was rotated away.
#[derive(Debug, Clone, Copy)]
struct RotatedToken {
    family_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// In-memory storage backend for access and refresh tokens.
#[derive(Clone, Default)]
pub struct InMemoryTokenStorage {
    access_tokens: Arc<DashMap<String, AccessToken>>,
    refresh_tokens: Arc<DashMap<String, RefreshToken>>,
    rotated: Arc<DashMap<String, RotatedToken>>,
}

impl InMemoryTokenStorage {
    /// Creates a new in-memory token storage.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access_token_count(&self) -> usize {
        self.access_tokens.len()
    }

    pub fn refresh_token_count(&self) -> usize {
        self.refresh_tokens.len()
    }
}

#[async_trait]
impl TokenStorage for InMemoryTokenStorage {
    async fn store_access_token(&self, token: AccessToken) -> Result<(), OAuthError> {
        insert_vacant(&self.access_tokens, token.token.clone(), token)
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>, OAuthError> {
        Ok(self.access_tokens.get(token).map(|entry| entry.value().clone()))
    }

    async fn remove_access_token(&self, token: &str) -> Result<Option<AccessToken>, OAuthError> {
        Ok(self.access_tokens.remove(token).map(|(_, t)| t))
    }

    async fn remove_access_token_if_expired(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, OAuthError> {
        Ok(self
            .access_tokens
            .remove_if(token, |_, t| t.is_expired_at(now))
            .is_some())
    }

    async fn store_refresh_token(&self, token: RefreshToken) -> Result<(), OAuthError> {
        insert_vacant(&self.refresh_tokens, token.token.clone(), token)
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, OAuthError> {
        Ok(self.refresh_tokens.get(token).map(|entry| entry.value().clone()))
    }

    async fn remove_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, OAuthError> {
        Ok(self.refresh_tokens.remove(token).map(|(_, t)| t))
    }

    async fn take_refresh_token_if(
        &self,
        token: &str,
        check: RefreshCheck<'_>,
    ) -> Result<Option<RefreshToken>, OAuthError> {
        Ok(self.refresh_tokens.remove_if(token, |_, t| check(t)).map(|(_, t)| t))
    }

    async fn record_rotated(
        &self,
        token: &str,
        family_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), OAuthError> {
        self.rotated
            .insert(token.to_string(), RotatedToken { family_id, expires_at });
        Ok(())
    }

    async fn rotated_family(&self, token: &str) -> Result<Option<Uuid>, OAuthError> {
        let now = Utc::now();
        if self.rotated.remove_if(token, |_, r| r.expires_at <= now).is_some() {
            return Ok(None);
        }
        Ok(self.rotated.get(token).map(|entry| entry.family_id))
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<usize, OAuthError> {
        let mut removed = 0;
        self.access_tokens.retain(|_, t| {
            let keep = t.family_id != family_id;
            removed += usize::from(!keep);
            keep
        });
        self.refresh_tokens.retain(|_, t| {
            let keep = t.family_id != family_id;
            removed += usize::from(!keep);
            keep
        });
        Ok(removed)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, OAuthError> {
        let mut removed = 0;
        self.access_tokens.retain(|_, t| {
            let keep = !t.is_expired_at(now);
            removed += usize::from(!keep);
            keep
        });
        self.refresh_tokens.retain(|_, t| {
            let keep = !t.is_expired_at(now);
            removed += usize::from(!keep);
            keep
        });
        self.rotated.retain(|_, r| r.expires_at > now);
        Ok(removed)
    }
}

//! OAuth2 authorization code + PKCE issuance engine.
//!
//! ```
//! use starberry_authd::{AuthorizeRequest, Client, OAuthServer, pkce_code_challenge};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let server = OAuthServer::default();
//! server
//!     .register_client(Client::new("c1", "s1", ["https://cb"], ["read", "profile"]))
//!     .await
//!     .unwrap();
//!
//! let verifier = "a-long-random-verifier";
//! let authorized = server
//!     .authorize(AuthorizeRequest {
//!         client_id: "c1".into(),
//!         redirect_uri: "https://cb".into(),
//!         response_type: "code".into(),
//!         scope: "read profile".into(),
//!         state: Some("xyz".into()),
//!         user_id: "u1".into(),
//!         code_challenge: Some(pkce_code_challenge(verifier)),
//!         code_challenge_method: Some("S256".into()),
//!     })
//!     .await
//!     .unwrap();
//!
//! let code = authorized.code().unwrap();
//! let tokens = server
//!     .exchange_code(code, "c1", "s1", "https://cb", Some(verifier))
//!     .await
//!     .unwrap();
//! assert_eq!(tokens.scope, "read profile");
//! # });
//! ```

pub mod oauth_core;

pub use oauth_core::authorization::{AuthorizationService, AuthorizeRequest, AuthorizeResponse};
pub use oauth_core::config::{ConfigError, OAuthConfig, RefreshReusePolicy};
pub use oauth_core::crypto::{generate_random_string, pkce_code_challenge, verify_code_challenge};
pub use oauth_core::memory::{InMemoryClientStore, InMemoryCodeStore, InMemoryTokenStorage};
pub use oauth_core::oauth_provider::{AuthorizationCodeStore, ClientStore, TokenStorage};
pub use oauth_core::scope::Scopes;
pub use oauth_core::server::OAuthServer;
pub use oauth_core::token_service::{TokenRequest, TokenService};
pub use oauth_core::types::{
    AccessToken, AuthorizationCode, Client, CodeChallengeMethod, ErrorResponse, OAuthError, RefreshToken,
    TokenInfo, TokenKind, TokenResponse,
};

use chrono::{Duration, Utc};
use starberry_authd::oauth_core::oauth_provider::{AuthorizationCodeStore, TokenStorage};
use starberry_authd::{
    AuthorizeRequest, AuthorizeResponse, Client, OAuthConfig, OAuthError, OAuthServer, RefreshToken, Scopes,
    TokenKind, TokenRequest, pkce_code_challenge,
};
use uuid::Uuid;

const REDIRECT: &str = "https://client.example.com/callback";
const VERIFIER: &str = "dBjftJeZ4CVP-mJ92K9qQ3tnGFbvZV8BErFOJZ2HdWk";

async fn server_with_client(config: OAuthConfig) -> OAuthServer {
    let server = OAuthServer::in_memory(config).unwrap();
    server
        .register_client(Client::new(
            "test-client",
            "test-secret",
            [REDIRECT],
            ["read", "write", "profile"],
        ))
        .await
        .unwrap();
    server
}

fn authorize_request(scope: &str) -> AuthorizeRequest {
    AuthorizeRequest {
        client_id: "test-client".to_string(),
        redirect_uri: REDIRECT.to_string(),
        response_type: "code".to_string(),
        scope: scope.to_string(),
        state: Some("xyz123".to_string()),
        user_id: "user1".to_string(),
        code_challenge: Some(pkce_code_challenge(VERIFIER)),
        code_challenge_method: Some("S256".to_string()),
    }
}

async fn issue_code(server: &OAuthServer, scope: &str) -> String {
    let response = server.authorize(authorize_request(scope)).await.unwrap();
    response.code().unwrap().to_string()
}

#[tokio::test]
async fn test_end_to_end_authorization_code_flow() {
    let server = OAuthServer::default();
    server
        .register_client(Client::new("c1", "s1", ["https://cb"], ["read", "profile"]))
        .await
        .unwrap();

    let response = server
        .authorize(AuthorizeRequest {
            client_id: "c1".to_string(),
            redirect_uri: "https://cb".to_string(),
            response_type: "code".to_string(),
            scope: "read profile".to_string(),
            state: Some("opaque-state".to_string()),
            user_id: "u1".to_string(),
            code_challenge: Some(pkce_code_challenge(VERIFIER)),
            code_challenge_method: Some("S256".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(response.redirect_uri(), "https://cb");
    assert_eq!(response.state(), Some("opaque-state"));
    let code = response.code().unwrap().to_string();

    let tokens = server
        .exchange_code(&code, "c1", "s1", "https://cb", Some(VERIFIER))
        .await
        .unwrap();
    assert!(!tokens.access_token.is_empty());
    assert!(!tokens.refresh_token.is_empty());
    assert_eq!(tokens.token_type, "Bearer");
    assert_eq!(tokens.expires_in, 3600);
    assert_eq!(tokens.scope, "read profile");

    let info = server.validate_access_token(&tokens.access_token).await.unwrap();
    assert_eq!(info.client_id, "c1");
    assert_eq!(info.user_id, "u1");
    assert_eq!(info.scopes, Scopes::parse("read profile"));

    // The code is single-use
    let err = server
        .exchange_code(&code, "c1", "s1", "https://cb", Some(VERIFIER))
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidGrant);
}

#[tokio::test]
async fn test_authorize_rejects_unknown_client() {
    let server = server_with_client(OAuthConfig::default()).await;
    let mut request = authorize_request("read");
    request.client_id = "invalid-client".to_string();
    let err = server.authorize(request).await.unwrap_err();
    assert_eq!(err, OAuthError::InvalidClient);
}

#[tokio::test]
async fn test_authorize_rejects_unregistered_redirect_before_response_type() {
    let server = server_with_client(OAuthConfig::default()).await;
    let mut request = authorize_request("read");
    request.redirect_uri = "https://attacker.example.com/callback".to_string();
    request.response_type = "token".to_string();
    let err = server.authorize(request).await.unwrap_err();
    assert_eq!(err, OAuthError::InvalidRedirectUri);
}

#[tokio::test]
async fn test_authorize_redirects_unsupported_response_type() {
    let server = server_with_client(OAuthConfig::default()).await;
    let mut request = authorize_request("not-a-scope");
    request.response_type = "token".to_string();
    let response = server.authorize(request).await.unwrap();
    assert_eq!(
        response,
        AuthorizeResponse::ErrorRedirect {
            redirect_uri: REDIRECT.to_string(),
            error: OAuthError::UnsupportedResponseType,
            state: Some("xyz123".to_string()),
        }
    );
    assert!(server.codes().is_empty());
}

#[tokio::test]
async fn test_authorize_rejects_scope_outside_allowance() {
    let server = server_with_client(OAuthConfig::default()).await;
    let err = server.authorize(authorize_request("read admin")).await.unwrap_err();
    assert_eq!(err, OAuthError::InvalidScope);
    assert!(server.codes().is_empty());
}

#[tokio::test]
async fn test_issued_code_is_stored_with_ttl() {
    let server = server_with_client(OAuthConfig::default()).await;
    let code = issue_code(&server, "read profile").await;
    assert_eq!(code.len(), 32);

    let stored = server.codes().get_code(&code).await.unwrap().unwrap();
    assert_eq!(stored.client_id, "test-client");
    assert_eq!(stored.user_id, "user1");
    assert_eq!(stored.scopes.to_string(), "read profile");
    assert_eq!(stored.expires_at - stored.issued_at, Duration::minutes(10));
}

#[tokio::test]
async fn test_exchange_rejects_bad_client_secret_without_consuming() {
    let server = server_with_client(OAuthConfig::default()).await;
    let code = issue_code(&server, "read").await;

    let err = server
        .exchange_code(&code, "test-client", "wrong-secret", REDIRECT, Some(VERIFIER))
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidClient);

    // Still redeemable with correct credentials
    server
        .exchange_code(&code, "test-client", "test-secret", REDIRECT, Some(VERIFIER))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_exchange_rejects_redirect_mismatch() {
    let server = server_with_client(OAuthConfig::default()).await;
    let code = issue_code(&server, "read").await;
    let err = server
        .exchange_code(&code, "test-client", "test-secret", "https://other/cb", Some(VERIFIER))
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidGrant);
}

#[tokio::test]
async fn test_exchange_rejects_code_of_another_client() {
    let server = server_with_client(OAuthConfig::default()).await;
    server
        .register_client(Client::new("other-client", "other-secret", [REDIRECT], ["read"]))
        .await
        .unwrap();
    let code = issue_code(&server, "read").await;
    let err = server
        .exchange_code(&code, "other-client", "other-secret", REDIRECT, Some(VERIFIER))
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidGrant);
}

#[tokio::test]
async fn test_expired_code_is_rejected_and_discarded() {
    let config = OAuthConfig {
        authorization_code_ttl_secs: 0,
        ..OAuthConfig::default()
    };
    let server = server_with_client(config).await;
    let code = issue_code(&server, "read").await;

    let err = server
        .exchange_code(&code, "test-client", "test-secret", REDIRECT, Some(VERIFIER))
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidGrant);
    assert!(server.codes().get_code(&code).await.unwrap().is_none());
}

#[tokio::test]
async fn test_code_without_pkce_needs_no_verifier() {
    let server = server_with_client(OAuthConfig::default()).await;
    let mut request = authorize_request("read");
    request.code_challenge = None;
    request.code_challenge_method = None;
    let code = server.authorize(request).await.unwrap().code().unwrap().to_string();

    let tokens = server
        .exchange_code(&code, "test-client", "test-secret", REDIRECT, None)
        .await
        .unwrap();
    assert_eq!(tokens.scope, "read");
}

#[tokio::test]
async fn test_refresh_rotates_tokens() {
    let server = server_with_client(OAuthConfig::default()).await;
    let code = issue_code(&server, "read profile").await;
    let first = server
        .exchange_code(&code, "test-client", "test-secret", REDIRECT, Some(VERIFIER))
        .await
        .unwrap();

    let second = server
        .refresh_tokens(&first.refresh_token, "test-client", "test-secret")
        .await
        .unwrap();
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_ne!(second.access_token, first.access_token);
    assert_eq!(second.scope, "read profile");
    assert_eq!(second.token_type, "Bearer");

    // The rotated token is dead
    let err = server
        .refresh_tokens(&first.refresh_token, "test-client", "test-secret")
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidGrant);

    // The new one keeps working
    server
        .refresh_tokens(&second.refresh_token, "test-client", "test-secret")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_refresh_with_bad_credentials_keeps_token() {
    let server = server_with_client(OAuthConfig::default()).await;
    let code = issue_code(&server, "read").await;
    let tokens = server
        .exchange_code(&code, "test-client", "test-secret", REDIRECT, Some(VERIFIER))
        .await
        .unwrap();

    let err = server
        .refresh_tokens(&tokens.refresh_token, "test-client", "wrong-secret")
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidClient);
    assert!(
        server
            .tokens()
            .get_refresh_token(&tokens.refresh_token)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_refresh_rejects_other_client_and_expired_token() {
    let server = server_with_client(OAuthConfig::default()).await;
    server
        .register_client(Client::new("other-client", "other-secret", [REDIRECT], ["read"]))
        .await
        .unwrap();
    let now = Utc::now();
    let family_id = Uuid::new_v4();
    let mut token = RefreshToken {
        token: "live-refresh".to_string(),
        client_id: "test-client".to_string(),
        user_id: "user1".to_string(),
        scopes: Scopes::parse("read"),
        issued_at: now,
        expires_at: now + Duration::hours(24),
        family_id,
    };
    server.tokens().store_refresh_token(token.clone()).await.unwrap();
    token.token = "expired-refresh".to_string();
    token.expires_at = now - Duration::hours(1);
    server.tokens().store_refresh_token(token).await.unwrap();

    let err = server
        .refresh_tokens("live-refresh", "other-client", "other-secret")
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidGrant);
    assert!(server.tokens().get_refresh_token("live-refresh").await.unwrap().is_some());

    let err = server
        .refresh_tokens("expired-refresh", "test-client", "test-secret")
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidGrant);
    assert!(server.tokens().get_refresh_token("expired-refresh").await.unwrap().is_none());
}

#[tokio::test]
async fn test_token_validation() {
    let config = OAuthConfig {
        access_token_ttl_secs: 0,
        ..OAuthConfig::default()
    };
    let server = server_with_client(config).await;
    let code = issue_code(&server, "read").await;
    let tokens = server
        .exchange_code(&code, "test-client", "test-secret", REDIRECT, Some(VERIFIER))
        .await
        .unwrap();
    assert_eq!(tokens.expires_in, 0);

    // Expired tokens are reported once and then forgotten
    let err = server.validate_access_token(&tokens.access_token).await.unwrap_err();
    assert_eq!(err, OAuthError::Expired);
    let err = server.validate_access_token(&tokens.access_token).await.unwrap_err();
    assert_eq!(err, OAuthError::NotFound);

    let err = server.validate_access_token("non-existent-token").await.unwrap_err();
    assert_eq!(err, OAuthError::NotFound);
}

#[tokio::test]
async fn test_token_revocation() {
    let server = server_with_client(OAuthConfig::default()).await;
    let code = issue_code(&server, "read").await;
    let tokens = server
        .exchange_code(&code, "test-client", "test-secret", REDIRECT, Some(VERIFIER))
        .await
        .unwrap();

    server.revoke_token(&tokens.access_token, TokenKind::Access).await.unwrap();
    let err = server.validate_access_token(&tokens.access_token).await.unwrap_err();
    assert_eq!(err, OAuthError::NotFound);

    // Second revocation reports the no-op
    let err = server
        .revoke_token(&tokens.access_token, TokenKind::Access)
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::NotFound);

    // Kinds do not cross over
    let err = server
        .revoke_token(&tokens.refresh_token, TokenKind::Access)
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::NotFound);

    server.revoke_token(&tokens.refresh_token, TokenKind::Refresh).await.unwrap();
    let err = server
        .refresh_tokens(&tokens.refresh_token, "test-client", "test-secret")
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidGrant);
}

#[tokio::test]
async fn test_token_request_dispatch() {
    let server = server_with_client(OAuthConfig::default()).await;
    let code = issue_code(&server, "read write").await;

    let tokens = server
        .token(TokenRequest {
            grant_type: "authorization_code".to_string(),
            code: Some(code),
            redirect_uri: Some(REDIRECT.to_string()),
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            code_verifier: Some(VERIFIER.to_string()),
            ..TokenRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(tokens.scope, "read write");

    let refreshed = server
        .token(TokenRequest {
            grant_type: "refresh_token".to_string(),
            refresh_token: Some(tokens.refresh_token.clone()),
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            ..TokenRequest::default()
        })
        .await
        .unwrap();
    assert_ne!(refreshed.refresh_token, tokens.refresh_token);

    let err = server
        .token(TokenRequest {
            grant_type: "password".to_string(),
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            ..TokenRequest::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::UnsupportedGrantType);

    let err = server
        .token(TokenRequest {
            grant_type: "authorization_code".to_string(),
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            ..TokenRequest::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidRequest);

    // Client authentication comes before grant type
    let err = server
        .token(TokenRequest {
            grant_type: "password".to_string(),
            client_id: "test-client".to_string(),
            client_secret: "wrong".to_string(),
            ..TokenRequest::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, OAuthError::InvalidClient);
}

#[tokio::test]
async fn test_token_request_from_form_json() {
    let request: TokenRequest = serde_json::from_value(serde_json::json!({
        "grant_type": "refresh_token",
        "refresh_token": "abc",
        "client_id": "test-client",
        "client_secret": "test-secret"
    }))
    .unwrap();
    assert_eq!(request.refresh_token.as_deref(), Some("abc"));
    assert!(request.code.is_none());
    assert!(request.code_verifier.is_none());
}

#[tokio::test]
async fn test_servers_do_not_share_state() {
    let first = server_with_client(OAuthConfig::default()).await;
    let second = OAuthServer::default();
    assert!(second.get_client("test-client").await.is_err());
    // Same id registers fine on an unrelated server
    second
        .register_client(Client::new("test-client", "x", [REDIRECT], ["read"]))
        .await
        .unwrap();
    assert_eq!(first.get_client("test-client").await.unwrap().secret, "test-secret");
}

#[tokio::test]
async fn test_short_credential_lengths_are_refused() {
    let config = OAuthConfig {
        code_length: 0,
        token_length: 0,
        ..OAuthConfig::default()
    };
    assert!(OAuthServer::in_memory(config).is_err());
    assert!(OAuthConfig::from_json_str(r#"{ "code_length": 0, "token_length": 0 }"#).is_err());
}

#[tokio::test]
async fn test_codes_stay_bound_to_their_user() {
    let server = server_with_client(OAuthConfig::default()).await;
    let mut alice = authorize_request("read");
    alice.user_id = "alice".to_string();
    let mut mallory = authorize_request("read");
    mallory.user_id = "mallory".to_string();

    let code_a = server.authorize(alice).await.unwrap().code().unwrap().to_string();
    let code_m = server.authorize(mallory).await.unwrap().code().unwrap().to_string();
    assert_ne!(code_a, code_m);
    assert_eq!(server.codes().len(), 2);

    let tokens = server
        .exchange_code(&code_a, "test-client", "test-secret", REDIRECT, Some(VERIFIER))
        .await
        .unwrap();
    assert!(!tokens.access_token.is_empty());
    let info = server.validate_access_token(&tokens.access_token).await.unwrap();
    assert_eq!(info.user_id, "alice");
}

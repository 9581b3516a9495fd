//! OAuth2 authorization code + PKCE issuance core.

pub mod authorization;
pub mod config;
pub mod crypto;
pub mod memory;
pub mod oauth_provider;
pub mod scope;
pub mod server;
pub mod token_service;
pub mod types;

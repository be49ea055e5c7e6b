//! ============================================================================
//! Auth Module - OAuth and Access Tokens
//! ============================================================================
//! Handles authentication against Bungie.net:
//! - OAuth 2.0 authorization code flow
//! - Token providers the API client asks for a bearer token
//! ============================================================================

mod bungie_oauth;
mod provider;

pub use bungie_oauth::{BungieOAuth, BungieTokens, BUNGIE_BASE_URL};
pub use provider::{StaticTokenProvider, StoredTokenProvider, TokenProvider};

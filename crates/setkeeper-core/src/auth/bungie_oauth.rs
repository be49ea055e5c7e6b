//! ============================================================================
//! Bungie.net OAuth 2.0 Authentication
//! ============================================================================
//! Implements the OAuth 2.0 authorization code flow against Bungie.net.
//! Confidential clients send their secret via HTTP Basic auth, public
//! clients send only their client id.
//! ============================================================================

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tiny_http::{Response, Server};
use tracing::{debug, error, info};

pub const BUNGIE_BASE_URL: &str = "https://www.bungie.net";
const AUTHORIZE_PATH: &str = "/en/OAuth/Authorize";
const TOKEN_PATH: &str = "/Platform/App/OAuth/Token/";
const CALLBACK_PORT: u16 = 9876;

/// Access and refresh tokens for the Bungie API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BungieTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    pub refresh_expires_at: Option<i64>,
    pub membership_id: String,
}

impl BungieTokens {
    /// Check if the access token is expired (with 5 min buffer)
    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.expires_at <= now + 300 // 5 minute buffer
    }

    /// Whether the refresh token can still mint a new access token
    pub fn can_refresh(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        match (&self.refresh_token, self.refresh_expires_at) {
            (Some(_), Some(expires_at)) => expires_at > now + 300,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
    refresh_expires_in: Option<i64>,
    membership_id: String,
}

impl TokenResponse {
    fn into_tokens(self) -> BungieTokens {
        let now = chrono::Utc::now().timestamp();
        BungieTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: now + self.expires_in,
            refresh_expires_at: self.refresh_expires_in.map(|secs| now + secs),
            membership_id: self.membership_id,
        }
    }
}

/// Bungie OAuth 2.0 client
pub struct BungieOAuth {
    client_id: String,
    client_secret: Option<String>,
    base_url: String,
    client: Client,
}

impl BungieOAuth {
    /// Create a new OAuth client for a registered Bungie application
    pub fn new(client_id: String, client_secret: Option<String>) -> Self {
        Self::with_base_url(client_id, client_secret, BUNGIE_BASE_URL.to_string())
    }

    pub fn with_base_url(client_id: String, client_secret: Option<String>, base_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            base_url,
            client: Client::new(),
        }
    }

    /// Generate a random state parameter for CSRF protection
    fn generate_state() -> String {
        (0..32)
            .map(|_| format!("{:02x}", rand::random::<u8>()))
            .collect()
    }

    /// Get the authorization URL to open in browser
    /// Returns: (url, state)
    pub fn get_auth_url(&self) -> (String, String) {
        let state = Self::generate_state();

        let url = format!(
            "{}{}?client_id={}&response_type=code&state={}",
            self.base_url,
            AUTHORIZE_PATH,
            urlencoding::encode(&self.client_id),
            &state,
        );

        debug!("Generated auth URL with state: {}", state);
        (url, state)
    }

    /// Start local server and wait for OAuth callback
    /// This blocks until the callback is received or timeout
    pub fn wait_for_callback(expected_state: &str) -> Result<String> {
        let addr = format!("127.0.0.1:{}", CALLBACK_PORT);
        let server = Server::http(&addr)
            .map_err(|e| anyhow!("Failed to start callback server on {}: {}", addr, e))?;

        info!("Waiting for Bungie OAuth callback on port {}", CALLBACK_PORT);

        let request = server
            .recv_timeout(Duration::from_secs(300))
            .map_err(|e| anyhow!("Callback server error: {}", e))?
            .ok_or_else(|| anyhow!("Callback server timed out waiting for response"))?;

        let url = request.url().to_string();
        debug!("Received callback: {}", url);

        let html = "<!DOCTYPE html><html><head><title>Setkeeper</title></head>\
            <body><p>Bungie.net account connected. You can close this window.</p></body></html>";
        let response = Response::from_string(html).with_header(
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..])
                .map_err(|_| anyhow!("Invalid callback response header"))?,
        );
        let _ = request.respond(response);

        Self::parse_callback(&url, expected_state)
    }

    /// Extract the authorization code from a callback request path
    fn parse_callback(path: &str, expected_state: &str) -> Result<String> {
        let full_url = format!("http://localhost{}", path);
        let parsed =
            url::Url::parse(&full_url).map_err(|e| anyhow!("Failed to parse callback URL: {}", e))?;

        let params: std::collections::HashMap<_, _> = parsed.query_pairs().collect();

        let state = params
            .get("state")
            .ok_or_else(|| anyhow!("No state parameter in callback"))?;

        if state != expected_state {
            error!("State mismatch: expected {}, got {}", expected_state, state);
            return Err(anyhow!("State mismatch - possible CSRF attack"));
        }

        if let Some(error) = params.get("error") {
            let desc = params
                .get("error_description")
                .map(|s| s.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(anyhow!("Bungie OAuth error: {} - {}", error, desc));
        }

        let code = params
            .get("code")
            .ok_or_else(|| anyhow!("No authorization code in callback"))?;

        info!("Successfully received authorization code");
        Ok(code.to_string())
    }

    async fn token_request(&self, grant: &[(&str, &str)]) -> Result<BungieTokens> {
        let mut params: Vec<(&str, &str)> = grant.to_vec();
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, TOKEN_PATH));

        match &self.client_secret {
            Some(secret) => {
                let credentials = STANDARD.encode(format!("{}:{}", self.client_id, secret));
                request = request.header("Authorization", format!("Basic {}", credentials));
            }
            None => params.push(("client_id", &self.client_id)),
        }

        let response = request
            .form(&params)
            .send()
            .await
            .map_err(|e| anyhow!("Token request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Token request failed: {} - {}", status, error_text);
            return Err(anyhow!("Token request failed ({}): {}", status, error_text));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse token response: {}", e))?;

        info!(
            "Obtained tokens for membership {}, expires in {} seconds",
            token_response.membership_id, token_response.expires_in
        );

        Ok(token_response.into_tokens())
    }

    /// Exchange authorization code for access tokens
    pub async fn exchange_code(&self, code: &str) -> Result<BungieTokens> {
        info!("Exchanging authorization code for tokens");
        self.token_request(&[("grant_type", "authorization_code"), ("code", code)])
            .await
    }

    /// Refresh expired tokens using refresh_token
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<BungieTokens> {
        info!("Refreshing expired tokens");
        self.token_request(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_state_generation() {
        let state = BungieOAuth::generate_state();
        assert_eq!(state.len(), 64); // 32 bytes * 2 hex chars
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_auth_url_generation() {
        let oauth = BungieOAuth::new("12345".to_string(), None);
        let (url, state) = oauth.get_auth_url();

        assert!(url.starts_with("https://www.bungie.net/en/OAuth/Authorize"));
        assert!(url.contains("client_id=12345"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains(&format!("state={}", state)));
    }

    #[test]
    fn test_parse_callback() {
        let code = BungieOAuth::parse_callback("/callback?code=abc&state=xyz", "xyz").unwrap();
        assert_eq!(code, "abc");

        assert!(BungieOAuth::parse_callback("/callback?code=abc&state=evil", "xyz").is_err());
        assert!(BungieOAuth::parse_callback("/callback?state=xyz", "xyz").is_err());
        assert!(
            BungieOAuth::parse_callback("/callback?state=xyz&error=access_denied", "xyz").is_err()
        );
    }

    #[test]
    fn test_token_expiry() {
        let mut tokens = BungieTokens {
            access_token: "test".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: chrono::Utc::now().timestamp() + 3600,
            refresh_expires_at: Some(chrono::Utc::now().timestamp() + 7_776_000),
            membership_id: "1".to_string(),
        };

        assert!(!tokens.is_expired());
        assert!(tokens.can_refresh());

        tokens.expires_at = chrono::Utc::now().timestamp() - 100;
        assert!(tokens.is_expired());

        tokens.refresh_expires_at = Some(chrono::Utc::now().timestamp() - 1);
        assert!(!tokens.can_refresh());

        tokens.refresh_token = None;
        tokens.refresh_expires_at = None;
        assert!(!tokens.can_refresh());
    }

    #[tokio::test]
    async fn test_exchange_code_confidential_client() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Platform/App/OAuth/Token/"))
            .and(header("Authorization", "Basic aWQ6c2VjcmV0"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "ref",
                "refresh_expires_in": 7776000,
                "membership_id": "777"
            })))
            .mount(&server)
            .await;

        let oauth = BungieOAuth::with_base_url("id".into(), Some("secret".into()), server.uri());
        let tokens = oauth.exchange_code("abc").await.unwrap();

        assert_eq!(tokens.access_token, "tok");
        assert_eq!(tokens.refresh_token.as_deref(), Some("ref"));
        assert_eq!(tokens.membership_id, "777");
        assert!(!tokens.is_expired());
    }

    #[tokio::test]
    async fn test_refresh_public_client_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Platform/App/OAuth/Token/"))
            .and(body_string_contains("client_id=id"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let oauth = BungieOAuth::with_base_url("id".into(), None, server.uri());
        let err = oauth.refresh_tokens("stale").await.unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
    }
}

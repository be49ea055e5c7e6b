//! Bearer token sources for the API client.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::bungie_oauth::BungieOAuth;
use crate::db::LocalStore;

/// Supplies an access token for authenticated requests.
/// `Ok(None)` means the request goes out without an `Authorization` header.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<Option<String>>;
}

/// Fixed token, or none at all
pub struct StaticTokenProvider(pub Option<String>);

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

/// Tokens persisted in the local store, refreshed on demand
pub struct StoredTokenProvider {
    store: Arc<LocalStore>,
    oauth: Option<BungieOAuth>,
}

impl StoredTokenProvider {
    pub fn new(store: Arc<LocalStore>, oauth: Option<BungieOAuth>) -> Self {
        Self { store, oauth }
    }
}

#[async_trait]
impl TokenProvider for StoredTokenProvider {
    async fn access_token(&self) -> Result<Option<String>> {
        let tokens = match self.store.get_auth()? {
            Some(tokens) => tokens,
            None => return Ok(None),
        };

        if !tokens.is_expired() {
            return Ok(Some(tokens.access_token));
        }

        match (&self.oauth, &tokens.refresh_token) {
            (Some(oauth), Some(refresh_token)) if tokens.can_refresh() => {
                debug!("Access token expired, refreshing");
                let fresh = oauth.refresh_tokens(refresh_token).await?;
                self.store.save_auth(&fresh)?;
                info!("Refreshed access token for membership {}", fresh.membership_id);
                Ok(Some(fresh.access_token))
            }
            _ => {
                warn!("Stored tokens expired and cannot be refreshed, dropping them");
                self.store.remove_auth()?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BungieTokens;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_store() -> (tempfile::TempDir, Arc<LocalStore>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.redb");
        let store = LocalStore::open(Some(path.to_str().unwrap())).unwrap();
        (dir, Arc::new(store))
    }

    fn tokens(expires_in: i64, refresh: Option<&str>) -> BungieTokens {
        let now = chrono::Utc::now().timestamp();
        BungieTokens {
            access_token: "stored".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at: now + expires_in,
            refresh_expires_at: refresh.map(|_| now + 86400),
            membership_id: "1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_no_tokens() {
        let (_dir, store) = temp_store();
        let provider = StoredTokenProvider::new(store, None);
        assert_eq!(provider.access_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_valid_token() {
        let (_dir, store) = temp_store();
        store.save_auth(&tokens(3600, None)).unwrap();
        let provider = StoredTokenProvider::new(store, None);
        assert_eq!(provider.access_token().await.unwrap().as_deref(), Some("stored"));
    }

    #[tokio::test]
    async fn test_expired_without_refresh_is_dropped() {
        let (_dir, store) = temp_store();
        store.save_auth(&tokens(-10, None)).unwrap();
        let provider = StoredTokenProvider::new(store.clone(), None);

        assert_eq!(provider.access_token().await.unwrap(), None);
        assert!(store.get_auth().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Platform/App/OAuth/Token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3600,
                "refresh_token": "ref2",
                "refresh_expires_in": 7776000,
                "membership_id": "1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (_dir, store) = temp_store();
        store.save_auth(&tokens(-10, Some("ref"))).unwrap();
        let oauth = BungieOAuth::with_base_url("id".into(), None, server.uri());
        let provider = StoredTokenProvider::new(store.clone(), Some(oauth));

        assert_eq!(provider.access_token().await.unwrap().as_deref(), Some("fresh"));
        assert_eq!(store.get_auth().unwrap().unwrap().access_token, "fresh");
    }
}

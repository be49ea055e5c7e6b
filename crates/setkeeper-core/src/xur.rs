//! ============================================================================
//! Xûr Feed - Weekly vendor stock from the item-callout feed
//! ============================================================================

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::DestinyClient;
use crate::types::SetkeeperError;

pub const DEFAULT_XUR_URL: &str = "https://api.destiny.plumbing/xur";

/// Raw feed document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct XurFeed {
    #[serde(default)]
    is_live: bool,
    #[serde(default)]
    item_hashes: Vec<u32>,
    #[serde(default)]
    location: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XurPayload {
    pub items: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
}

impl XurPayload {
    fn from_feed(feed: XurFeed, force: bool) -> Self {
        if (force || feed.is_live) && !feed.item_hashes.is_empty() {
            Self {
                items: feed.item_hashes,
                location: feed.location,
            }
        } else {
            Self::default()
        }
    }
}

impl DestinyClient {
    /// Yield the cached body for `url` (if any), then fetch, cache and yield
    /// the fresh one. Fetch errors are returned after any cached yield.
    pub async fn cached_get<F>(&self, url: &str, mut on_data: F) -> Result<()>
    where
        F: FnMut(Value),
    {
        if let Some(store) = self.store() {
            match store.get_cached_url(url) {
                Ok(Some(cached)) => {
                    debug!("Serving cached {}", url);
                    on_data(cached);
                }
                Ok(None) => {}
                Err(e) => warn!("Unable to read cached {}: {}", url, e),
            }
        }

        let fresh = self.get_json(url).await?;

        if let Some(store) = self.store() {
            if let Err(e) = store.save_cached_url(url, &fresh) {
                warn!("Unable to cache {}: {}", url, e);
            }
        }

        on_data(fresh);
        Ok(())
    }

    /// Current Xûr stock. `force` ignores the feed's live flag.
    /// May yield twice: once from cache and once fresh.
    pub async fn xur<F>(&self, url: &str, force: bool, mut on_update: F) -> Result<()>
    where
        F: FnMut(Result<XurPayload>),
    {
        self.cached_get(url, |body| {
            let payload: Result<XurPayload> = serde_json::from_value::<XurFeed>(body)
                .map(|feed| XurPayload::from_feed(feed, force))
                .map_err(|e| SetkeeperError::Parse(format!("xur feed: {}", e)).into());
            on_update(payload);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_client;
    use crate::db::LocalStore;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_payload_from_feed() {
        let live = XurFeed {
            is_live: true,
            item_hashes: vec![1, 2],
            location: Some(json!({ "id": "nessus" })),
        };
        let payload = XurPayload::from_feed(live.clone(), false);
        assert_eq!(payload.items, vec![1, 2]);
        assert_eq!(payload.location, Some(json!({ "id": "nessus" })));

        let away = XurFeed { is_live: false, ..live.clone() };
        assert_eq!(XurPayload::from_feed(away.clone(), false), XurPayload::default());
        assert_eq!(XurPayload::from_feed(away, true).items, vec![1, 2]);

        let empty = XurFeed { item_hashes: vec![], ..live };
        assert!(XurPayload::from_feed(empty, true).items.is_empty());
    }

    #[tokio::test]
    async fn test_cached_get_yields_cache_then_fresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xur"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "n": 2 })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("x.redb");
        let store = Arc::new(LocalStore::open(Some(db_path.to_str().unwrap())).unwrap());
        let url = format!("{}/xur", server.uri());
        store.save_cached_url(&url, &json!({ "n": 1 })).unwrap();

        let client = test_client(&server, None).with_store(store.clone());
        let mut seen = Vec::new();
        client.cached_get(&url, |body| seen.push(body)).await.unwrap();

        assert_eq!(seen, vec![json!({ "n": 1 }), json!({ "n": 2 })]);
        assert_eq!(store.get_cached_url(&url).unwrap(), Some(json!({ "n": 2 })));
    }

    #[tokio::test]
    async fn test_xur_not_live() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xur"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isLive": false,
                "itemHashes": [10, 20],
                "location": { "id": 1 }
            })))
            .mount(&server)
            .await;

        let client = test_client(&server, None);
        let url = format!("{}/xur", server.uri());

        let mut updates = Vec::new();
        client
            .xur(&url, false, |payload| updates.push(payload.unwrap()))
            .await
            .unwrap();
        assert_eq!(updates, vec![XurPayload::default()]);

        let mut forced = Vec::new();
        client
            .xur(&url, true, |payload| forced.push(payload.unwrap()))
            .await
            .unwrap();
        assert_eq!(forced[0].items, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_fetch_error_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = test_client(&server, None);
        let mut calls = 0;
        let result = client
            .xur(&format!("{}/xur", server.uri()), false, |_| calls += 1)
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 0);
    }
}

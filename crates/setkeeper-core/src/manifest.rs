//! ============================================================================
//! Manifest - Definition tables for the item catalog
//! ============================================================================
//! The manifest lists one JSON content path per (language, table). Tables are
//! large, so they are cached in the local store under that content path.
//! ============================================================================

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{DestinyClient, RequestOptions};
use crate::catalog::Catalog;
use crate::types::SetkeeperError;

pub const ITEM_TABLE: &str = "DestinyInventoryItemDefinition";
pub const PRESENTATION_NODE_TABLE: &str = "DestinyPresentationNodeDefinition";

/// Content path for `table` in `language` from a manifest response
fn content_path<'a>(manifest: &'a Value, table: &str, language: &str) -> Result<&'a str> {
    let path = manifest
        .get("jsonWorldComponentContentPaths")
        .and_then(|paths| paths.get(language))
        .and_then(|tables| tables.get(table))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            SetkeeperError::Parse(format!("Manifest has no {} for language {}", table, language))
        })?;
    Ok(path)
}

impl DestinyClient {
    /// Download (or load from cache) one definition table
    pub async fn get_definition(&self, table: &str, language: &str) -> Result<Value> {
        let manifest = self
            .request("/Platform/Destiny2/Manifest/", RequestOptions::no_auth(), None)
            .await?
            .ok_or_else(|| SetkeeperError::Parse("Empty manifest response".to_string()))?;

        let path = content_path(&manifest, table, language)?;

        if let Some(store) = self.store() {
            match store.get_manifest_table(path) {
                Ok(Some(cached)) => {
                    debug!("Manifest table {} loaded from cache", path);
                    return Ok(cached);
                }
                Ok(None) => {}
                Err(e) => warn!("Unable to read cached manifest table: {}", e),
            }
        }

        let url = format!("{}{}", self.base_url(), path);
        let definitions = self.get_json(&url).await?;
        info!("Downloaded {} ({})", table, language);

        if let Some(store) = self.store() {
            if let Err(e) = store.save_manifest_table(path, &definitions) {
                warn!("Unable to cache manifest table: {}", e);
            }
        }

        Ok(definitions)
    }

    /// Item and presentation node definitions as a searchable catalog.
    /// A missing presentation node table only disables catalyst queries.
    pub async fn load_catalog(&self, language: &str) -> Result<Catalog> {
        let items = self.get_definition(ITEM_TABLE, language).await?;
        let nodes = match self.get_definition(PRESENTATION_NODE_TABLE, language).await {
            Ok(nodes) => Some(nodes),
            Err(e) => {
                warn!("Presentation nodes unavailable: {:#}", e);
                None
            }
        };

        Catalog::from_tables(&items, nodes.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{envelope, test_client};
    use crate::db::LocalStore;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_manifest(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/Platform/Destiny2/Manifest/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
                "jsonWorldComponentContentPaths": {
                    "en": {
                        "DestinyInventoryItemDefinition": "/common/en/items-v1.json",
                        "DestinyPresentationNodeDefinition": "/common/en/nodes-v1.json"
                    }
                }
            }))))
            .mount(server)
            .await;
    }

    #[test]
    fn test_content_path_lookup() {
        let manifest = json!({
            "jsonWorldComponentContentPaths": { "de": { "DestinyStatDefinition": "/de/stats.json" } }
        });
        assert_eq!(
            content_path(&manifest, "DestinyStatDefinition", "de").unwrap(),
            "/de/stats.json"
        );
        assert!(content_path(&manifest, "DestinyStatDefinition", "fr").is_err());
    }

    #[tokio::test]
    async fn test_definition_is_cached_by_content_path() {
        let server = MockServer::start().await;
        mount_manifest(&server).await;
        Mock::given(method("GET"))
            .and(path("/common/en/items-v1.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "1": { "hash": 1, "displayProperties": { "name": "Ace" } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("m.redb");
        let store = Arc::new(LocalStore::open(Some(db_path.to_str().unwrap())).unwrap());
        let client = test_client(&server, None).with_store(store.clone());

        let first = client.get_definition(ITEM_TABLE, "en").await.unwrap();
        let second = client.get_definition(ITEM_TABLE, "en").await.unwrap();

        assert_eq!(first, second);
        assert!(store.get_manifest_table("/common/en/items-v1.json").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_catalog_without_presentation_nodes() {
        let server = MockServer::start().await;
        mount_manifest(&server).await;
        Mock::given(method("GET"))
            .and(path("/common/en/items-v1.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "2": { "hash": 2, "displayProperties": { "name": "B" } },
                "1": { "hash": 1, "displayProperties": { "name": "A" } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/common/en/nodes-v1.json"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let catalog = test_client(&server, None).load_catalog("en").await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.presentation_nodes.is_none());
    }
}

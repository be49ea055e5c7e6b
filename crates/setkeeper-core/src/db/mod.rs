// ============================================================================
// LocalStore - Embedded Database (redb)
// ============================================================================
// Persistent local storage for cached profiles, cached URL bodies, settings,
// auth tokens and manifest tables.
// Default path: ~/.setkeeper/setkeeper.redb (override via SETKEEPER_DB_PATH env var)
// ============================================================================

pub mod types;

pub use types::{CachedUrl, DbStats, FilterSet};

use anyhow::{anyhow, Result};
use redb::{Database, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::auth::BungieTokens;
use crate::types::{Language, PreviousAccount, ProfilesPayload, SetkeeperError};

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

// Table definitions
const PROFILES: Table = TableDefinition::new("profiles");
const CACHED_URLS: Table = TableDefinition::new("cached_urls");
const SETTINGS: Table = TableDefinition::new("settings");
const AUTH: Table = TableDefinition::new("auth");
const MANIFEST: Table = TableDefinition::new("manifest");

const ALL_TABLES: [Table; 5] = [PROFILES, CACHED_URLS, SETTINGS, AUTH, MANIFEST];

const PROFILES_KEY: &str = "profiles:current";
const FILTERS_KEY: &str = "settings:filters";
const PREVIOUS_ACCOUNT_KEY: &str = "settings:previous_account";
const LANGUAGE_KEY: &str = "settings:language";
const UID_KEY: &str = "settings:uid";
const AUTH_KEY: &str = "auth:bungie";

/// Embedded database standing in for browser local storage
pub struct LocalStore {
    db: Database,
    path: PathBuf,
}

impl LocalStore {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses SETKEEPER_DB_PATH env var or ~/.setkeeper/setkeeper.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("SETKEEPER_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let dir = home.join(".setkeeper");
            std::fs::create_dir_all(&dir)
                .map_err(|e| anyhow!("Failed to create .setkeeper directory: {}", e))?;
            dir.join("setkeeper.redb")
        };

        info!("Opening local store at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| SetkeeperError::Persistence(format!("Failed to open {}: {}", db_path.display(), e)))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        for table in ALL_TABLES {
            let _ = write_txn
                .open_table(table)
                .map_err(|e| anyhow!("Failed to create {} table: {}", table, e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Raw Access
    // ========================================================================

    fn put(&self, table: Table, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut t = write_txn.open_table(table)
                .map_err(|e| anyhow!("Failed to open {} table: {}", table, e))?;
            t.insert(key, value)
                .map_err(|e| anyhow!("Failed to insert {}: {}", key, e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;
        Ok(())
    }

    fn fetch(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let t = read_txn.open_table(table)
            .map_err(|e| anyhow!("Failed to open {} table: {}", table, e))?;

        let value = t
            .get(key)
            .map_err(|e| anyhow!("Failed to get {}: {}", key, e))?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    fn remove(&self, table: Table, key: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut t = write_txn.open_table(table)
                .map_err(|e| anyhow!("Failed to open {} table: {}", table, e))?;
            removed = t.remove(key)
                .map_err(|e| anyhow!("Failed to remove {}: {}", key, e))?
                .is_some();
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;
        Ok(removed)
    }

    fn count(&self, table: Table) -> Result<usize> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let t = read_txn.open_table(table)
            .map_err(|e| anyhow!("Failed to open {} table: {}", table, e))?;
        let count = t.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate {}: {}", table, e))?
            .count();
        Ok(count)
    }

    fn put_record<T: Serialize>(&self, table: Table, key: &str, record: &T) -> Result<()> {
        let value = bincode::serialize(record)
            .map_err(|e| anyhow!("Failed to serialize {}: {}", key, e))?;
        self.put(table, key, &value)
    }

    fn get_record<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>> {
        match self.fetch(table, key)? {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| anyhow!("Failed to deserialize {}: {}", key, e))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Profile Operations
    // ========================================================================

    /// Profiles are stored as JSON: the documents are schemaless.
    pub fn save_profiles(&self, payload: &ProfilesPayload) -> Result<()> {
        let value = serde_json::to_vec(payload)
            .map_err(|e| anyhow!("Failed to serialize profiles: {}", e))?;
        self.put(PROFILES, PROFILES_KEY, &value)?;

        debug!("Stored {} profiles", payload.profiles.len());
        Ok(())
    }

    pub fn get_profiles(&self) -> Result<Option<ProfilesPayload>> {
        match self.fetch(PROFILES, PROFILES_KEY)? {
            Some(bytes) => {
                let payload = serde_json::from_slice(&bytes)
                    .map_err(|e| anyhow!("Failed to deserialize profiles: {}", e))?;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // URL Cache Operations
    // ========================================================================

    fn url_key(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        format!("urls:{}", hex::encode(hasher.finalize()))
    }

    pub fn save_cached_url(&self, url: &str, body: &serde_json::Value) -> Result<()> {
        let record = CachedUrl {
            url: url.to_string(),
            body: body.to_string(),
            fetched_at: chrono::Utc::now().timestamp(),
        };
        self.put_record(CACHED_URLS, &Self::url_key(url), &record)?;

        debug!("Cached body for {}", url);
        Ok(())
    }

    pub fn get_cached_url(&self, url: &str) -> Result<Option<serde_json::Value>> {
        let record: Option<CachedUrl> = self.get_record(CACHED_URLS, &Self::url_key(url))?;
        match record {
            Some(cached) => {
                let body = serde_json::from_str(&cached.body)
                    .map_err(|e| anyhow!("Failed to parse cached body for {}: {}", url, e))?;
                Ok(Some(body))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Settings Operations
    // ========================================================================

    pub fn save_filters(&self, filters: &FilterSet) -> Result<()> {
        self.put_record(SETTINGS, FILTERS_KEY, filters)?;
        debug!("Stored {} filter toggles", filters.filters.len());
        Ok(())
    }

    pub fn get_filters(&self) -> Result<Option<FilterSet>> {
        self.get_record(SETTINGS, FILTERS_KEY)
    }

    pub fn save_previous_account(&self, id: &str, membership_type: i32) -> Result<()> {
        let account = PreviousAccount {
            id: id.to_string(),
            membership_type,
        };
        self.put_record(SETTINGS, PREVIOUS_ACCOUNT_KEY, &account)?;
        debug!("Stored previous account {}:{}", membership_type, id);
        Ok(())
    }

    pub fn get_previous_account(&self) -> Result<Option<PreviousAccount>> {
        self.get_record(SETTINGS, PREVIOUS_ACCOUNT_KEY)
    }

    pub fn save_language(&self, language: &Language) -> Result<()> {
        self.put_record(SETTINGS, LANGUAGE_KEY, language)
    }

    pub fn get_language(&self) -> Result<Option<Language>> {
        self.get_record(SETTINGS, LANGUAGE_KEY)
    }

    pub fn save_uid(&self, uid: &str) -> Result<()> {
        self.put_record(SETTINGS, UID_KEY, &uid.to_string())
    }

    pub fn get_uid(&self) -> Result<Option<String>> {
        self.get_record(SETTINGS, UID_KEY)
    }

    // ========================================================================
    // Auth Operations
    // ========================================================================

    pub fn save_auth(&self, tokens: &BungieTokens) -> Result<()> {
        self.put_record(AUTH, AUTH_KEY, tokens)?;
        debug!("Stored auth tokens for membership {}", tokens.membership_id);
        Ok(())
    }

    pub fn get_auth(&self) -> Result<Option<BungieTokens>> {
        self.get_record(AUTH, AUTH_KEY)
    }

    pub fn remove_auth(&self) -> Result<bool> {
        let removed = self.remove(AUTH, AUTH_KEY)?;
        if removed {
            debug!("Removed auth tokens");
        }
        Ok(removed)
    }

    // ========================================================================
    // Manifest Operations
    // ========================================================================

    /// Definition tables keyed by their manifest content path,
    /// so a new manifest version never hits a stale entry.
    pub fn save_manifest_table(&self, content_path: &str, table: &serde_json::Value) -> Result<()> {
        let value = serde_json::to_vec(table)
            .map_err(|e| anyhow!("Failed to serialize manifest table: {}", e))?;
        self.put(MANIFEST, content_path, &value)?;
        debug!("Stored manifest table {}", content_path);
        Ok(())
    }

    pub fn get_manifest_table(&self, content_path: &str) -> Result<Option<serde_json::Value>> {
        match self.fetch(MANIFEST, content_path)? {
            Some(bytes) => {
                let table = serde_json::from_slice(&bytes)
                    .map_err(|e| anyhow!("Failed to deserialize manifest table: {}", e))?;
                Ok(Some(table))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Wipe everything except downloaded manifest tables
    pub fn clear_all(&self) -> Result<()> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        for table in [PROFILES, CACHED_URLS, SETTINGS, AUTH] {
            let mut t = write_txn.open_table(table)
                .map_err(|e| anyhow!("Failed to open {} table: {}", table, e))?;
            t.retain(|_, _| false)
                .map_err(|e| anyhow!("Failed to clear {} table: {}", table, e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit clear: {}", e))?;

        info!("Cleared local store");
        Ok(())
    }

    pub fn stats(&self) -> Result<DbStats> {
        Ok(DbStats {
            has_profiles: self.fetch(PROFILES, PROFILES_KEY)?.is_some(),
            cached_urls: self.count(CACHED_URLS)?,
            settings: self.count(SETTINGS)?,
            manifest_tables: self.count(MANIFEST)?,
            authenticated: self.fetch(AUTH, AUTH_KEY)?.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Profile;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.redb");
        let store = LocalStore::open(Some(path.to_str().unwrap())).unwrap();
        (dir, store)
    }

    fn sample_tokens() -> BungieTokens {
        BungieTokens {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: chrono::Utc::now().timestamp() + 3600,
            refresh_expires_at: Some(chrono::Utc::now().timestamp() + 86400),
            membership_id: "1234".to_string(),
        }
    }

    #[test]
    fn test_profiles_roundtrip() {
        let (_dir, store) = temp_store();
        assert!(store.get_profiles().unwrap().is_none());

        let payload = ProfilesPayload {
            profiles: vec![Profile(json!({ "characters": { "data": { "1": {} } } }))],
            bungie_net_user: json!({ "membershipId": "99" }),
        };
        store.save_profiles(&payload).unwrap();

        assert_eq!(store.get_profiles().unwrap(), Some(payload));
    }

    #[test]
    fn test_cached_url() {
        let (_dir, store) = temp_store();
        let url = "https://api.destiny.plumbing/xur";
        assert!(store.get_cached_url(url).unwrap().is_none());

        store.save_cached_url(url, &json!({ "isLive": true })).unwrap();
        assert_eq!(store.get_cached_url(url).unwrap(), Some(json!({ "isLive": true })));
        assert!(store.get_cached_url("https://example.com").unwrap().is_none());
    }

    #[test]
    fn test_settings() {
        let (_dir, store) = temp_store();

        store.save_previous_account("4611", 2).unwrap();
        let account = store.get_previous_account().unwrap().unwrap();
        assert_eq!(account.id, "4611");
        assert_eq!(account.membership_type, 2);

        let mut filters = FilterSet::default();
        filters.toggle("is:exotic");
        store.save_filters(&filters).unwrap();
        assert_eq!(store.get_filters().unwrap(), Some(filters));

        store.save_language(&Language { code: "de".into(), name: "Deutsch".into() }).unwrap();
        assert_eq!(store.get_language().unwrap().unwrap().code, "de");

        store.save_uid("99").unwrap();
        assert_eq!(store.get_uid().unwrap().as_deref(), Some("99"));
    }

    #[test]
    fn test_auth_remove() {
        let (_dir, store) = temp_store();
        store.save_auth(&sample_tokens()).unwrap();
        assert_eq!(store.get_auth().unwrap().unwrap().access_token, "access");

        assert!(store.remove_auth().unwrap());
        assert!(!store.remove_auth().unwrap());
        assert!(store.get_auth().unwrap().is_none());
    }

    #[test]
    fn test_clear_all_keeps_manifest() {
        let (_dir, store) = temp_store();
        store.save_uid("99").unwrap();
        store.save_auth(&sample_tokens()).unwrap();
        store.save_cached_url("https://x", &json!([])).unwrap();
        store.save_manifest_table("/common/item.json", &json!({ "1": {} })).unwrap();

        store.clear_all().unwrap();

        let stats = store.stats().unwrap();
        assert!(!stats.has_profiles);
        assert!(!stats.authenticated);
        assert_eq!(stats.cached_urls, 0);
        assert_eq!(stats.settings, 0);
        assert_eq!(stats.manifest_tables, 1);
    }
}

//! ============================================================================
//! Cloud Storage - Per-account inventory snapshots in a remote document store
//! ============================================================================
//! `DriveStorage` keeps one JSON document per account in the Drive
//! app-data folder: `inventory-<membershipType>-<membershipId>.json`.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::inventory::InventorySnapshot;
use crate::types::{Profile, SetkeeperError};

pub const DRIVE_API: &str = "https://www.googleapis.com";

const APP_DATA_FOLDER: &str = "appDataFolder";

#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// Last saved snapshot for the profile's account, if any
    async fn get_inventory(&self, profile: &Profile) -> Result<Option<InventorySnapshot>>;

    /// Create or replace the account's snapshot
    async fn save_inventory(&self, snapshot: &InventorySnapshot, profile: &Profile) -> Result<()>;
}

/// Document name for the profile's account
pub fn file_name(profile: &Profile) -> Result<String> {
    let user = profile
        .user_info()
        .ok_or_else(|| SetkeeperError::Parse("Profile has no userInfo".to_string()))?;
    Ok(format!(
        "inventory-{}-{}.json",
        user.membership_type, user.membership_id
    ))
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Serialize)]
struct CreateFileRequest<'a> {
    name: &'a str,
    parents: [&'a str; 1],
}

/// Google Drive v3 backend
pub struct DriveStorage {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl DriveStorage {
    pub fn new(access_token: String) -> Self {
        Self::with_base_url(DRIVE_API.to_string(), access_token)
    }

    pub fn with_base_url(base_url: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Drive API error {} ({}): {}", status, action, body));
        }
        Ok(response)
    }

    async fn find_file(&self, name: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/drive/v3/files?spaces={}&q={}&fields={}",
            self.base_url,
            APP_DATA_FOLDER,
            urlencoding::encode(&format!("name='{}'", name)),
            urlencoding::encode("files(id,name)")
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to list files: {}", e))?;

        let list: FileList = Self::check(response, "list")
            .await?
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse file list: {}", e))?;

        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn create_file(&self, name: &str) -> Result<String> {
        let url = format!("{}/drive/v3/files", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&CreateFileRequest {
                name,
                parents: [APP_DATA_FOLDER],
            })
            .send()
            .await
            .map_err(|e| anyhow!("Failed to create file: {}", e))?;

        let file: DriveFile = Self::check(response, "create")
            .await?
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse created file: {}", e))?;

        info!("Created cloud file {} ({})", name, file.id);
        Ok(file.id)
    }
}

#[async_trait]
impl CloudStorage for DriveStorage {
    async fn get_inventory(&self, profile: &Profile) -> Result<Option<InventorySnapshot>> {
        let name = file_name(profile)?;
        let id = match self.find_file(&name).await? {
            Some(id) => id,
            None => {
                debug!("No cloud inventory named {}", name);
                return Ok(None);
            }
        };

        let url = format!("{}/drive/v3/files/{}?alt=media", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to download {}: {}", name, e))?;

        let snapshot = Self::check(response, "download")
            .await?
            .json()
            .await
            .map_err(|e| SetkeeperError::Parse(format!("{}: {}", name, e)))?;

        debug!("Loaded cloud inventory {}", name);
        Ok(Some(snapshot))
    }

    async fn save_inventory(&self, snapshot: &InventorySnapshot, profile: &Profile) -> Result<()> {
        let name = file_name(profile)?;
        let id = match self.find_file(&name).await? {
            Some(id) => id,
            None => self.create_file(&name).await?,
        };

        let url = format!(
            "{}/upload/drive/v3/files/{}?uploadType=media",
            self.base_url, id
        );
        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.access_token)
            .json(snapshot)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to upload {}: {}", name, e))?;
        Self::check(response, "upload").await?;

        info!(
            "Saved cloud inventory {} ({} items)",
            name,
            snapshot.inventory.len()
        );
        Ok(())
    }
}

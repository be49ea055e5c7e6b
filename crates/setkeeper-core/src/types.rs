//! ============================================================================
//! Core Types for Setkeeper
//! ============================================================================
//! Accounts, profile snapshots and the error type shared across the crate.
//! Profiles stay as JSON documents: the client only reads a handful of
//! fields and caches the rest as an opaque blob.
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Synthetic key under which per-character vendor data is merged into a profile
pub const VENDORS_KEY: &str = "$vendors";

/// One platform account of a player (Bungie "destinyMembership")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub membership_type: i32,
    pub membership_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Membership {
    pub fn new(membership_type: i32, membership_id: impl Into<String>) -> Self {
        Self {
            membership_type,
            membership_id: membership_id.into(),
            display_name: None,
        }
    }
}

/// Remote snapshot of one account, as returned by the profile endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(pub Value);

impl Profile {
    /// Character ids from `characters.data`
    pub fn character_ids(&self) -> Vec<String> {
        self.0
            .pointer("/characters/data")
            .and_then(Value::as_object)
            .map(|chars| chars.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Account identity from `profile.data.userInfo`
    pub fn user_info(&self) -> Option<Membership> {
        let info = self.0.pointer("/profile/data/userInfo")?;
        let membership_type = info.get("membershipType").and_then(Value::as_i64)? as i32;
        let membership_id = match info.get("membershipId")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };

        Some(Membership {
            membership_type,
            membership_id,
            display_name: info
                .get("displayName")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    pub fn date_last_played(&self) -> Option<DateTime<Utc>> {
        self.0
            .pointer("/profile/data/dateLastPlayed")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn versions_owned(&self) -> Option<i64> {
        self.0
            .pointer("/profile/data/versionsOwned")
            .and_then(Value::as_i64)
    }

    /// Merged vendor responses keyed by character id
    pub fn vendors(&self) -> Option<&Map<String, Value>> {
        self.0
            .get(VENDORS_KEY)
            .and_then(|v| v.get("data"))
            .and_then(Value::as_object)
    }

    /// Replace the synthetic vendor field
    pub fn set_vendors(&mut self, data: Map<String, Value>) {
        let mut wrapper = Map::new();
        wrapper.insert("data".to_string(), Value::Object(data));

        if let Value::Object(root) = &mut self.0 {
            root.insert(VENDORS_KEY.to_string(), Value::Object(wrapper));
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Result of a full refresh: every usable profile, most recently played first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilesPayload {
    pub profiles: Vec<Profile>,
    pub bungie_net_user: Value,
}

/// Account the user last switched to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousAccount {
    pub id: String,
    pub membership_type: i32,
}

/// Definition language (Bungie manifest locale code)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub code: String,
    pub name: String,
}

impl Default for Language {
    fn default() -> Self {
        Self {
            code: "en".to_string(),
            name: "English".to_string(),
        }
    }
}

/// Error types for Setkeeper
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum SetkeeperError {
    #[error("Bungie API Error {status} - {message}\nURL: {url}")]
    Remote {
        code: i64,
        status: String,
        message: String,
        url: String,
    },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid set data: {0}")]
    InvalidSetData(String),
}

impl SetkeeperError {
    /// Bungie reports planned downtime as `SystemDisabled`
    pub fn is_maintenance(&self) -> bool {
        matches!(self, SetkeeperError::Remote { status, .. } if status == "SystemDisabled")
    }
}

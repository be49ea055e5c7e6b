//! ============================================================================
//! Telemetry - Error tracking, breadcrumbs and profile stats
//! ============================================================================
//! Best-effort only: nothing in here may fail a caller. Errors and
//! breadcrumbs are emitted through `tracing` and kept in memory for the
//! error report; profile stats are POSTed to the stats endpoint.
//! ============================================================================

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::db::LocalStore;

pub const DEFAULT_STATS_URL: &str = "https://stats.destinysets.com/update-inventory";

/// Maximum number of breadcrumbs retained for an error report
const MAX_BREADCRUMBS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub message: String,
    pub category: String,
    pub level: String,
    pub data: Value,
    pub timestamp: i64,
}

/// Identity attached to reported errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub id: String,
    pub username: String,
}

pub struct Telemetry {
    client: reqwest::Client,
    stats_url: String,
    stats_enabled: bool,
    store: Option<Arc<LocalStore>>,
    user: Mutex<Option<UserContext>>,
    breadcrumbs: Mutex<VecDeque<Breadcrumb>>,
}

/// Display name from a Bungie.net user: platform names first, unique name otherwise
pub fn name_from_bungie_profile(user: &Value) -> String {
    let field = |key: &str| {
        user.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    };

    let mut names: Vec<String> = Vec::new();
    if let Some(psn) = field("psnDisplayName") {
        names.push(format!("psn:{}", psn));
    }
    if let Some(xbox) = field("xboxDisplayName") {
        names.push(format!("xbox:{}", xbox));
    }
    if names.is_empty() {
        names.push(field("uniqueName").unwrap_or_default().to_string());
    }

    names.join(" ")
}

impl Telemetry {
    pub fn new(stats_url: impl Into<String>, stats_enabled: bool, store: Option<Arc<LocalStore>>) -> Self {
        Self {
            client: reqwest::Client::new(),
            stats_url: stats_url.into(),
            stats_enabled,
            store,
            user: Mutex::new(None),
            breadcrumbs: Mutex::new(VecDeque::new()),
        }
    }

    /// Telemetry that only logs
    pub fn disabled() -> Self {
        Self::new(DEFAULT_STATS_URL, false, None)
    }

    /// Attach the signed-in Bungie.net user to future reports
    pub fn set_user(&self, bungie_net_user: &Value) {
        let uid = match bungie_net_user.get("membershipId") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                warn!("Bungie.net user has no membershipId, not setting user context");
                return;
            }
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.save_uid(&uid) {
                warn!("Unable to save UID: {}", e);
            }
        }

        let context = UserContext {
            id: uid,
            username: name_from_bungie_profile(bungie_net_user),
        };
        debug!("Telemetry user: {} ({})", context.username, context.id);

        if let Ok(mut user) = self.user.lock() {
            *user = Some(context);
        }
    }

    pub fn user(&self) -> Option<UserContext> {
        self.user.lock().ok().and_then(|u| u.clone())
    }

    /// Report an error. Returns the event id used in the log line.
    pub fn track_error(&self, err: &anyhow::Error) -> Uuid {
        let event_id = Uuid::new_v4();
        let user = self.user().map(|u| u.id).unwrap_or_else(|| "anonymous".to_string());
        let breadcrumbs = self.breadcrumbs.lock().map(|b| b.len()).unwrap_or(0);

        error!(
            event_id = %event_id,
            user = %user,
            breadcrumbs,
            "Tracked error: {:#}",
            err
        );
        event_id
    }

    pub fn track_breadcrumb(&self, message: &str, category: &str, level: &str, data: Value) {
        debug!(category, level, "Breadcrumb: {}", message);

        let crumb = Breadcrumb {
            message: message.to_string(),
            category: category.to_string(),
            level: level.to_string(),
            data,
            timestamp: chrono::Utc::now().timestamp(),
        };

        if let Ok(mut crumbs) = self.breadcrumbs.lock() {
            if crumbs.len() >= MAX_BREADCRUMBS {
                crumbs.pop_front();
            }
            crumbs.push_back(crumb);
        }
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.breadcrumbs
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Ask the stats service to snapshot this account's inventory.
    /// Skipped when stats are disabled or nobody is signed in.
    pub async fn send_profile_stats(&self, tokens: &dyn TokenProvider) -> Result<()> {
        if !self.stats_enabled {
            debug!("Profile stats disabled, skipping");
            return Ok(());
        }

        let access_token = match tokens.access_token().await? {
            Some(token) => token,
            None => {
                debug!("No access token, skipping profile stats");
                return Ok(());
            }
        };

        let url = format!(
            "{}?accessToken={}",
            self.stats_url,
            urlencoding::encode(&access_token)
        );

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send profile stats: {}", e))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse stats response: {}", e))?;

        info!("Sent profile stats: {}", body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_name_from_profile() {
        assert_eq!(
            name_from_bungie_profile(&json!({ "psnDisplayName": "a", "xboxDisplayName": "b" })),
            "psn:a xbox:b"
        );
        assert_eq!(
            name_from_bungie_profile(&json!({ "xboxDisplayName": "b", "uniqueName": "u" })),
            "xbox:b"
        );
        assert_eq!(name_from_bungie_profile(&json!({ "uniqueName": "u" })), "u");
    }

    #[test]
    fn test_set_user_saves_uid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.redb");
        let store = Arc::new(LocalStore::open(Some(path.to_str().unwrap())).unwrap());
        let telemetry = Telemetry::new(DEFAULT_STATS_URL, false, Some(store.clone()));

        telemetry.set_user(&json!({ "membershipId": "42", "uniqueName": "guardian" }));

        assert_eq!(store.get_uid().unwrap().as_deref(), Some("42"));
        assert_eq!(
            telemetry.user(),
            Some(UserContext { id: "42".into(), username: "guardian".into() })
        );
    }

    #[test]
    fn test_breadcrumbs_are_bounded() {
        let telemetry = Telemetry::disabled();
        for i in 0..(MAX_BREADCRUMBS + 5) {
            telemetry.track_breadcrumb(&format!("crumb {}", i), "api", "info", Value::Null);
        }

        let crumbs = telemetry.breadcrumbs();
        assert_eq!(crumbs.len(), MAX_BREADCRUMBS);
        assert_eq!(crumbs[0].message, "crumb 5");
    }

    #[tokio::test]
    async fn test_send_profile_stats() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/update-inventory"))
            .and(query_param("accessToken", "t k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let telemetry = Telemetry::new(format!("{}/update-inventory", server.uri()), true, None);
        telemetry
            .send_profile_stats(&StaticTokenProvider(Some("t k".into())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stats_skipped_when_disabled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let disabled = Telemetry::new(server.uri(), false, None);
        disabled
            .send_profile_stats(&StaticTokenProvider(Some("tok".into())))
            .await
            .unwrap();

        let anonymous = Telemetry::new(server.uri(), true, None);
        anonymous
            .send_profile_stats(&StaticTokenProvider(None))
            .await
            .unwrap();
    }
}

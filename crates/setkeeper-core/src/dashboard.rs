//! ============================================================================
//! Dashboard - Orchestration of fetches, selection and persisted settings
//! ============================================================================
//! Holds what a front end shows: the selected profile, every profile, the
//! derived inventory and the user's settings. Settings are saved through
//! the local store; failed saves are logged and never surface.
//! ============================================================================

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::api::DestinyClient;
use crate::cloud::CloudStorage;
use crate::db::{FilterSet, LocalStore};
use crate::inventory::{inventory_from_profile, merge_cloud, InventorySnapshot};
use crate::types::{Language, Membership, Profile, ProfilesPayload, SetkeeperError};

/// How often a watching front end refreshes
pub const FETCH_INTERVAL: Duration = Duration::from_secs(30);

pub const ERROR_BANNER: &str =
    "Something went wrong loading your inventory. Please try again later.";
pub const MAINTENANCE_BANNER: &str =
    "Bungie.net is down for maintenance. Please try again later.";

/// Message shown in place of the dashboard after a failed refresh
pub fn error_banner(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<SetkeeperError>() {
        Some(e) if e.is_maintenance() => MAINTENANCE_BANNER,
        _ => ERROR_BANNER,
    }
}

/// Periodic refreshes only pay off while items are being tracked
pub fn should_poll(tracked_items: &[u32]) -> bool {
    !tracked_items.is_empty()
}

#[derive(Debug, Clone, Default)]
pub struct DashboardState {
    pub profile: Option<Profile>,
    pub all_profiles: Vec<Profile>,
    /// Profiles come from the local store, not a fresh fetch
    pub is_cached: bool,
    pub inventory: Option<InventorySnapshot>,
    pub language: Language,
    pub filters: FilterSet,
    pub error: Option<String>,
}

pub struct Dashboard {
    client: Arc<DestinyClient>,
    store: Arc<LocalStore>,
    cloud: Option<Arc<dyn CloudStorage>>,
    state: DashboardState,
    stats_sent: bool,
}

impl Dashboard {
    /// Restores language and filters from the store
    pub fn new(
        client: Arc<DestinyClient>,
        store: Arc<LocalStore>,
        cloud: Option<Arc<dyn CloudStorage>>,
    ) -> Self {
        let language = store.get_language().unwrap_or_else(|e| {
            warn!("Unable to read language: {}", e);
            None
        });
        let filters = store.get_filters().unwrap_or_else(|e| {
            warn!("Unable to read filters: {}", e);
            None
        });

        Self {
            client,
            store,
            cloud,
            state: DashboardState {
                language: language.unwrap_or_default(),
                filters: filters.unwrap_or_default(),
                ..Default::default()
            },
            stats_sent: false,
        }
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn client(&self) -> &Arc<DestinyClient> {
        &self.client
    }

    fn set_profiles(&mut self, payload: ProfilesPayload, is_cached: bool) {
        self.state.profile = self.client.get_last_profile(&payload).cloned();
        self.state.all_profiles = payload.profiles;
        self.state.is_cached = is_cached;
    }

    /// Show whatever the last session stored. Returns whether anything was found.
    pub fn load_cached(&mut self) -> bool {
        match self.store.get_profiles() {
            Ok(Some(payload)) => {
                self.set_profiles(payload, true);
                self.sync_local_inventory();
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Unable to read cached profiles: {}", e);
                false
            }
        }
    }

    /// Fetch every profile, select one, sync the inventory and send stats once
    pub async fn refresh(&mut self) -> Result<()> {
        if self.client.tokens().access_token().await?.is_none() {
            return Err(SetkeeperError::NotAuthenticated.into());
        }

        let payload = match self.client.get_current_profiles().await {
            Ok(payload) => payload,
            Err(e) => {
                self.state.error = Some(error_banner(&e).to_string());
                return Err(e);
            }
        };

        self.state.error = None;
        self.set_profiles(payload, false);
        info!(
            "Refreshed dashboard: {} profiles, selected {:?}",
            self.state.all_profiles.len(),
            self.state.profile.as_ref().and_then(Profile::user_info)
        );

        self.sync_inventory().await;

        if !self.stats_sent {
            self.stats_sent = true;
            let telemetry = self.client.telemetry();
            if let Err(e) = telemetry.send_profile_stats(self.client.tokens().as_ref()).await {
                warn!("Unable to send profile stats: {:#}", e);
            }
        }

        Ok(())
    }

    fn sync_local_inventory(&mut self) {
        self.state.inventory = self
            .state
            .profile
            .as_ref()
            .map(|profile| merge_cloud(inventory_from_profile(profile), None));
    }

    /// Merge the selected profile's inventory with its cloud copy and save it back.
    /// Without a cloud backend only the local derivation is kept.
    async fn sync_inventory(&mut self) {
        let (profile, cloud) = match (&self.state.profile, &self.cloud) {
            (Some(profile), Some(cloud)) => (profile, cloud),
            _ => {
                self.sync_local_inventory();
                return;
            }
        };

        let current = inventory_from_profile(profile);
        let remote = match cloud.get_inventory(profile).await {
            Ok(remote) => remote,
            Err(e) => {
                error!("Unable to load cloud inventory: {:#}", e);
                self.sync_local_inventory();
                return;
            }
        };

        let snapshot = merge_cloud(current, remote.as_ref());
        if remote.as_ref() != Some(&snapshot) {
            if let Err(e) = cloud.save_inventory(&snapshot, profile).await {
                error!("Unable to save cloud inventory: {:#}", e);
            }
        }
        self.state.inventory = Some(snapshot);
    }

    /// Select another fetched profile and remember it for next time
    pub async fn switch_profile(&mut self, membership: &Membership) -> Result<()> {
        let profile = self
            .state
            .all_profiles
            .iter()
            .find(|p| {
                p.user_info()
                    .map(|info| {
                        info.membership_id == membership.membership_id
                            && info.membership_type == membership.membership_type
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .ok_or_else(|| {
                SetkeeperError::Parse(format!(
                    "No profile for {}:{}",
                    membership.membership_type, membership.membership_id
                ))
            })?;

        if let Err(e) = self
            .store
            .save_previous_account(&membership.membership_id, membership.membership_type)
        {
            warn!("Unable to save previous account: {}", e);
        }

        self.state.profile = Some(profile);
        self.sync_inventory().await;
        Ok(())
    }

    pub fn set_language(&mut self, language: Language) {
        if let Err(e) = self.store.save_language(&language) {
            warn!("Unable to save language: {}", e);
        }
        self.state.language = language;
    }

    /// Flip a filter and persist the set. Returns the new state.
    pub fn toggle_filter(&mut self, key: &str) -> bool {
        let enabled = self.state.filters.toggle(key);
        if let Err(e) = self.store.save_filters(&self.state.filters) {
            warn!("Unable to save filters: {}", e);
        }
        enabled
    }

    /// Forget the session: local store and in-memory state
    pub fn logout(&mut self) -> Result<()> {
        self.store.clear_all()?;
        self.state = DashboardState::default();
        self.stats_sent = false;
        info!("Logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{envelope, test_client};
    use crate::auth::BungieTokens;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct MemoryCloud {
        saved: Mutex<Vec<InventorySnapshot>>,
        existing: Option<InventorySnapshot>,
    }

    #[async_trait]
    impl CloudStorage for MemoryCloud {
        async fn get_inventory(&self, _profile: &Profile) -> Result<Option<InventorySnapshot>> {
            Ok(self.existing.clone())
        }

        async fn save_inventory(&self, snapshot: &InventorySnapshot, _profile: &Profile) -> Result<()> {
            self.saved.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    fn temp_store() -> (tempfile::TempDir, Arc<LocalStore>) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("dash.redb");
        let store = LocalStore::open(Some(db_path.to_str().unwrap())).unwrap();
        (dir, Arc::new(store))
    }

    fn profile_body(id: &str, last_played: &str, item: u64) -> Value {
        json!({
            "profile": { "data": {
                "userInfo": { "membershipType": 2, "membershipId": id },
                "dateLastPlayed": last_played,
                "versionsOwned": 3
            } },
            "profileInventory": { "data": { "items": [{ "itemHash": item }] } }
        })
    }

    async fn mount_account(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/Platform/User/GetMembershipsForCurrentUser/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
                "bungieNetUser": { "membershipId": "1", "uniqueName": "guardian" },
                "destinyMemberships": [
                    { "membershipType": 2, "membershipId": "10" },
                    { "membershipType": 2, "membershipId": "20" }
                ]
            }))))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Platform/Destiny2/2/Profile/10/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(profile_body(
                "10",
                "2018-01-01T00:00:00Z",
                111,
            ))))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Platform/Destiny2/2/Profile/20/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(profile_body(
                "20",
                "2018-02-01T00:00:00Z",
                222,
            ))))
            .mount(server)
            .await;
    }

    fn dashboard(
        server: &MockServer,
        store: Arc<LocalStore>,
        cloud: Option<Arc<dyn CloudStorage>>,
    ) -> Dashboard {
        let client = test_client(server, Some("token")).with_store(store.clone());
        Dashboard::new(Arc::new(client), store, cloud)
    }

    #[test]
    fn test_should_poll() {
        assert!(!should_poll(&[]));
        assert!(should_poll(&[1]));
        assert_eq!(FETCH_INTERVAL, Duration::from_secs(30));
    }

    #[test]
    fn test_error_banner() {
        let maintenance = anyhow::Error::new(SetkeeperError::Remote {
            code: 5,
            status: "SystemDisabled".into(),
            message: "down".into(),
            url: "/".into(),
        });
        assert_eq!(error_banner(&maintenance), MAINTENANCE_BANNER);
        assert_eq!(error_banner(&anyhow::anyhow!("boom")), ERROR_BANNER);
    }

    #[tokio::test]
    async fn test_refresh_selects_latest_and_syncs_cloud() {
        let server = MockServer::start().await;
        mount_account(&server).await;
        let (_dir, store) = temp_store();
        let cloud = Arc::new(MemoryCloud::default());
        let mut dash = dashboard(&server, store, Some(cloud.clone()));

        dash.refresh().await.unwrap();

        let state = dash.state();
        assert!(!state.is_cached);
        assert_eq!(state.all_profiles.len(), 2);
        assert_eq!(state.profile.as_ref().unwrap().user_info().unwrap().membership_id, "20");
        assert!(state.inventory.as_ref().unwrap().has(222));
        assert_eq!(cloud.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_switch_profile_is_remembered() {
        let server = MockServer::start().await;
        mount_account(&server).await;
        let (_dir, store) = temp_store();
        let mut dash = dashboard(&server, store.clone(), None);
        dash.refresh().await.unwrap();

        dash.switch_profile(&Membership::new(2, "10")).await.unwrap();
        assert!(dash.state().inventory.as_ref().unwrap().has(111));
        assert!(dash.switch_profile(&Membership::new(1, "10")).await.is_err());

        // A new session picks the remembered account from the cache
        let mut next = dashboard(&server, store, None);
        assert!(next.load_cached());
        assert!(next.state().is_cached);
        assert_eq!(
            next.state().profile.as_ref().unwrap().user_info().unwrap().membership_id,
            "10"
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_sets_banner() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ErrorCode": 5,
                "ErrorStatus": "SystemDisabled",
                "Message": "Maintenance"
            })))
            .mount(&server)
            .await;
        let (_dir, store) = temp_store();
        let mut dash = dashboard(&server, store, None);

        assert!(dash.refresh().await.is_err());
        assert_eq!(dash.state().error.as_deref(), Some(MAINTENANCE_BANNER));
    }

    #[tokio::test]
    async fn test_refresh_requires_sign_in() {
        let server = MockServer::start().await;
        let (_dir, store) = temp_store();
        let client = test_client(&server, None).with_store(store.clone());
        let mut dash = Dashboard::new(Arc::new(client), store, None);

        let err = dash.refresh().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SetkeeperError>(),
            Some(SetkeeperError::NotAuthenticated)
        ));
        assert!(dash.state().error.is_none());
    }

    #[tokio::test]
    async fn test_settings_persist_and_logout_clears() {
        let server = MockServer::start().await;
        let (_dir, store) = temp_store();
        store
            .save_auth(&BungieTokens {
                access_token: "a".into(),
                refresh_token: None,
                expires_at: i64::MAX,
                refresh_expires_at: None,
                membership_id: "1".into(),
            })
            .unwrap();

        let mut dash = dashboard(&server, store.clone(), None);
        assert!(dash.toggle_filter("is:exotic"));
        dash.set_language(Language { code: "fr".into(), name: "Français".into() });

        let restored = dashboard(&server, store.clone(), None);
        assert!(restored.state().filters.is_enabled("is:exotic"));
        assert_eq!(restored.state().language.code, "fr");

        dash.logout().unwrap();
        assert!(store.get_auth().unwrap().is_none());
        assert!(store.get_filters().unwrap().is_none());
        assert_eq!(dash.state().language, Language::default());
    }
}

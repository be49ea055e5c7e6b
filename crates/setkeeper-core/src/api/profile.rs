//! ============================================================================
//! Profile Fetching - Profiles, vendors and the merged account snapshot
//! ============================================================================
//! A profile is fetched once per membership, then every character's vendor
//! data is fetched concurrently and merged under `$vendors`. Vendor failures
//! are tolerated; profile failures propagate.
//! ============================================================================

use anyhow::Result;
use futures_util::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::DestinyClient;
use crate::types::{Membership, Profile, ProfilesPayload, SetkeeperError};

/// Component selectors for the `components` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DestinyComponent {
    Profiles = 100,
    VendorReceipts = 101,
    ProfileInventories = 102,
    ProfileCurrencies = 103,
    ProfileProgressions = 104,
    Characters = 200,
    CharacterInventories = 201,
    CharacterProgressions = 202,
    CharacterRenderData = 203,
    CharacterActivities = 204,
    CharacterEquipment = 205,
    ItemInstances = 300,
    ItemObjectives = 301,
    ItemPerks = 302,
    ItemRenderData = 303,
    ItemStats = 304,
    ItemSockets = 305,
    ItemTalentGrids = 306,
    ItemCommonData = 307,
    ItemPlugStates = 308,
    Vendors = 400,
    VendorCategories = 401,
    VendorSales = 402,
    Collectibles = 800,
    Records = 900,
}

impl DestinyComponent {
    /// Comma-separated selector list
    pub fn join(components: &[DestinyComponent]) -> String {
        components
            .iter()
            .map(|c| (*c as u32).to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub const PROFILE_COMPONENTS: [DestinyComponent; 11] = [
    DestinyComponent::Profiles,
    DestinyComponent::ProfileInventories,
    DestinyComponent::Characters,
    DestinyComponent::CharacterInventories,
    DestinyComponent::CharacterEquipment,
    DestinyComponent::ItemObjectives,
    DestinyComponent::ItemSockets,
    DestinyComponent::ProfileProgressions,
    DestinyComponent::CharacterProgressions,
    DestinyComponent::Collectibles,
    DestinyComponent::Records,
];

pub const VENDOR_COMPONENTS: [DestinyComponent; 3] = [
    DestinyComponent::ItemSockets,
    DestinyComponent::ItemPlugStates,
    DestinyComponent::VendorSales,
];

impl DestinyClient {
    pub async fn get_profile(&self, membership: &Membership) -> Result<Option<Profile>> {
        let pathname = format!(
            "/Platform/Destiny2/{}/Profile/{}/?components={}",
            membership.membership_type,
            membership.membership_id,
            DestinyComponent::join(&PROFILE_COMPONENTS)
        );

        Ok(self.get(&pathname).await?.map(Profile))
    }

    /// Vendor data for one character. Failures are logged and read as absent.
    pub async fn get_vendors(&self, membership: &Membership, character_id: &str) -> Option<Value> {
        let pathname = format!(
            "/Platform/Destiny2/{}/Profile/{}/Character/{}/Vendors/?components={}",
            membership.membership_type,
            membership.membership_id,
            character_id,
            DestinyComponent::join(&VENDOR_COMPONENTS)
        );

        match self.get(&pathname).await {
            Ok(vendors) => vendors,
            Err(e) => {
                error!(
                    membership_type = membership.membership_type,
                    membership_id = %membership.membership_id,
                    character_id,
                    "Error fetching vendors: {:#}",
                    e
                );
                None
            }
        }
    }

    /// Profile with every character's vendor data merged under `$vendors`
    pub async fn get_extended_profile(&self, membership: &Membership) -> Result<Option<Profile>> {
        let mut profile = match self.get_profile(membership).await? {
            Some(profile) => profile,
            None => {
                debug!(
                    "Empty profile for {}:{}, ignoring",
                    membership.membership_type, membership.membership_id
                );
                return Ok(None);
            }
        };

        let character_ids = profile.character_ids();
        let character_vendors = join_all(
            character_ids
                .iter()
                .map(|character_id| self.get_vendors(membership, character_id)),
        )
        .await;

        let mut data = Map::new();
        for (character_id, vendors) in character_ids.into_iter().zip(character_vendors) {
            match vendors {
                Some(vendors) => {
                    data.insert(character_id, vendors);
                }
                None => warn!("No vendor data for character {}", character_id),
            }
        }
        profile.set_vendors(data);

        Ok(Some(profile))
    }

    /// Every playable profile of the signed-in user, most recently played first.
    /// The payload is cached in the local store when one is attached.
    pub async fn get_current_profiles(&self) -> Result<ProfilesPayload> {
        let body = self
            .get("/Platform/User/GetMembershipsForCurrentUser/")
            .await?
            .ok_or_else(|| SetkeeperError::Parse("empty memberships response".to_string()))?;

        let bungie_net_user = body.get("bungieNetUser").cloned().unwrap_or(Value::Null);
        self.telemetry().set_user(&bungie_net_user);

        let memberships: Vec<Membership> = serde_json::from_value(
            body.get("destinyMemberships").cloned().unwrap_or(Value::Array(vec![])),
        )
        .map_err(|e| SetkeeperError::Parse(format!("destinyMemberships: {}", e)))?;

        let results = join_all(memberships.iter().map(|m| self.get_extended_profile(m))).await;

        let mut profiles = Vec::new();
        for result in results {
            if let Some(profile) = result? {
                if profile.versions_owned() != Some(0) {
                    profiles.push(profile);
                }
            }
        }
        // Newest first; equal dates come out in reverse membership order
        profiles.sort_by_key(|p| p.date_last_played());
        profiles.reverse();

        info!("Fetched {} profiles", profiles.len());

        let payload = ProfilesPayload {
            profiles,
            bungie_net_user,
        };

        if let Some(store) = self.store() {
            if let Err(e) = store.save_profiles(&payload) {
                error!("Unable to save profiles to local store: {}", e);
            }
        }

        Ok(payload)
    }

    /// The account the user last switched to, else the first profile
    pub fn get_last_profile<'a>(&self, data: &'a ProfilesPayload) -> Option<&'a Profile> {
        let previous = self.store().and_then(|store| match store.get_previous_account() {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Unable to read previous account: {}", e);
                None
            }
        });

        previous
            .and_then(|account| {
                data.profiles.iter().find(|profile| {
                    profile
                        .user_info()
                        .map(|info| {
                            info.membership_id == account.id
                                && info.membership_type == account.membership_type
                        })
                        .unwrap_or(false)
                })
            })
            .or_else(|| data.profiles.first())
    }

    /// Report the cached payload first (`cached = true`), then the fresh one
    pub async fn get_current_profiles_with_cache<F>(&self, mut on_update: F)
    where
        F: FnMut(Result<ProfilesPayload>, bool),
    {
        if let Some(store) = self.store() {
            match store.get_profiles() {
                Ok(Some(cached)) => on_update(Ok(cached), true),
                Ok(None) => {}
                Err(e) => warn!("Unable to read cached profiles: {}", e),
            }
        }

        on_update(self.get_current_profiles().await, false);
    }

    /// Most recently played profile
    pub async fn get_current_profile(&self) -> Result<Option<Profile>> {
        let data = self.get_current_profiles().await?;
        let latest = data
            .profiles
            .into_iter()
            .max_by_key(|p| p.date_last_played());

        debug!("Latest profile: {:?}", latest.as_ref().and_then(|p| p.user_info()));
        Ok(latest)
    }
}

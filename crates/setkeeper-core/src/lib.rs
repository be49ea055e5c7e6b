//! ============================================================================
//! SETKEEPER-CORE: Destiny 2 collection tracking
//! ============================================================================
//! Everything behind the front ends:
//! - Bungie.net OAuth and the platform API client
//! - Profile + vendor fetching, merged per account
//! - Local redb cache and cloud inventory snapshots
//! - Item catalog from the manifest and the `is:` search language
//! - Curated set pages resolved against the catalog
//! ============================================================================

pub mod api;
pub mod auth;
pub mod catalog;
pub mod cloud;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod enums;
pub mod inventory;
pub mod manifest;
pub mod search;
pub mod sets;
pub mod telemetry;
pub mod types;
pub mod xur;

// Re-export main types for convenience
pub use types::*;
pub use api::{DestinyClient, RequestBody, RequestOptions};
pub use auth::{BungieOAuth, BungieTokens, StaticTokenProvider, StoredTokenProvider, TokenProvider};
pub use catalog::{Catalog, ItemDefinition};
pub use cloud::{CloudStorage, DriveStorage};
pub use config::AppConfig;
pub use dashboard::{Dashboard, DashboardState, FETCH_INTERVAL};
pub use db::{DbStats, FilterSet, LocalStore};
pub use inventory::{inventory_from_profile, merge_cloud, Inventory, InventoryEntry, InventorySnapshot};
pub use search::{fancy_search, fancy_search_hashes, fancy_search_terms};
pub use sets::{ItemSet, SetGroup, SetPage, SetSection, PAGES};
pub use telemetry::Telemetry;
pub use xur::XurPayload;

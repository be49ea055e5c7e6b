//! ============================================================================
//! Configuration - Environment driven settings
//! ============================================================================
//! Call `dotenvy::dotenv()` first if a `.env` file should be honored.
//! ============================================================================

use crate::auth::BUNGIE_BASE_URL;
use crate::cloud::DRIVE_API;
use crate::telemetry::DEFAULT_STATS_URL;
use crate::types::Language;
use crate::xur::DEFAULT_XUR_URL;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_base: String,
    pub stats_url: String,
    pub xur_url: String,
    /// Opt out of profile stats
    pub prevent_stats: bool,
    pub db_path: Option<String>,
    pub language: Option<Language>,
    // Cloud inventory, disabled without a token
    pub drive_token: Option<String>,
    pub drive_base: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            client_id: None,
            client_secret: None,
            api_base: BUNGIE_BASE_URL.to_string(),
            stats_url: DEFAULT_STATS_URL.to_string(),
            xur_url: DEFAULT_XUR_URL.to_string(),
            prevent_stats: false,
            db_path: None,
            language: None,
            drive_token: None,
            drive_base: DRIVE_API.to_string(),
        }
    }
}

fn is_set(flag: &str) -> bool {
    matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            api_key: get("SETKEEPER_API_KEY"),
            client_id: get("SETKEEPER_CLIENT_ID"),
            client_secret: get("SETKEEPER_CLIENT_SECRET"),
            api_base: get("SETKEEPER_API_BASE").unwrap_or(defaults.api_base),
            stats_url: get("SETKEEPER_STATS_URL").unwrap_or(defaults.stats_url),
            xur_url: get("SETKEEPER_XUR_URL").unwrap_or(defaults.xur_url),
            prevent_stats: get("SETKEEPER_PREVENT_STATS")
                .map(|v| is_set(&v))
                .unwrap_or(false),
            db_path: get("SETKEEPER_DB_PATH"),
            language: get("SETKEEPER_LANGUAGE").map(|code| Language {
                name: code.clone(),
                code,
            }),
            drive_token: get("SETKEEPER_DRIVE_TOKEN"),
            drive_base: get("SETKEEPER_DRIVE_BASE").unwrap_or(defaults.drive_base),
        }
    }
}

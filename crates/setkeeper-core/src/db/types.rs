//! ============================================================================
//! Database Types - Serializable records for redb storage
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Response body cached for a URL.
/// The body is kept as JSON text so arbitrary documents survive bincode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedUrl {
    pub url: String,
    pub body: String,
    pub fetched_at: i64,
}

/// Filter toggles from the last session, keyed by filter name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    pub filters: BTreeMap<String, bool>,
}

impl FilterSet {
    /// Flip a filter. Unknown keys start out disabled, so the first toggle enables them.
    pub fn toggle(&mut self, key: &str) -> bool {
        let entry = self.filters.entry(key.to_string()).or_insert(false);
        *entry = !*entry;
        *entry
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.filters.get(key).copied().unwrap_or(false)
    }

    /// Enabled filter keys joined into a search query
    pub fn as_query(&self) -> String {
        self.filters
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(key, _)| key.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Row counts per table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub has_profiles: bool,
    pub cached_urls: usize,
    pub settings: usize,
    pub manifest_tables: usize,
    pub authenticated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_toggle() {
        let mut filters = FilterSet::default();
        assert!(!filters.is_enabled("is:exotic"));
        assert!(filters.toggle("is:exotic"));
        assert!(filters.is_enabled("is:exotic"));
        assert!(!filters.toggle("is:exotic"));
        assert!(!filters.is_enabled("is:exotic"));
    }

    #[test]
    fn test_filter_query() {
        let mut filters = FilterSet::default();
        filters.toggle("is:weapon");
        filters.toggle("is:exotic");
        filters.toggle("is:hunter");
        filters.toggle("is:hunter");
        assert_eq!(filters.as_query(), "is:exotic is:weapon");
    }
}

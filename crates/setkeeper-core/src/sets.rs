//! ============================================================================
//! Set Data - Pages of curated item sets
//! ============================================================================
//! Each page is a list of groups; a group holds sets; a set holds sections.
//! A section lists item hashes directly, or a search query resolved against
//! the catalog. The bundled pages are compiled in and validated on load.
//! ============================================================================

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::db::FilterSet;
use crate::search::fancy_search_hashes;
use crate::types::SetkeeperError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSection {
    pub name: String,
    #[serde(default)]
    pub items: Vec<u32>,
    /// Search query filling `items` at resolve time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSet {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub big: bool,
    pub sections: Vec<SetSection>,
}

impl ItemSet {
    pub fn item_hashes(&self) -> impl Iterator<Item = u32> + '_ {
        self.sections.iter().flat_map(|s| s.items.iter().copied())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetGroup {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub sets: Vec<ItemSet>,
}

/// A routable page of set data
#[derive(Debug, Clone, Copy)]
pub struct SetPage {
    pub path: &'static str,
    pub name: &'static str,
    source: &'static str,
}

pub const PAGES: [SetPage; 4] = [
    SetPage {
        path: "/",
        name: "baseGame",
        source: include_str!("../data/sets/baseGame.json"),
    },
    SetPage {
        path: "/curse-of-osiris",
        name: "dlc1",
        source: include_str!("../data/sets/dlc1.json"),
    },
    SetPage {
        path: "/all-items",
        name: "allItems",
        source: include_str!("../data/sets/allItems.json"),
    },
    SetPage {
        path: "/newemblems",
        name: "newemblems",
        source: include_str!("../data/sets/newemblems.json"),
    },
];

pub fn page_for_path(path: &str) -> Option<&'static SetPage> {
    PAGES.iter().find(|page| page.path == path)
}

fn validate(name: &str, groups: &[SetGroup]) -> Result<()> {
    for group in groups {
        if group.name.is_empty() {
            return Err(SetkeeperError::InvalidSetData(format!("{}: unnamed group", name)).into());
        }
        for set in &group.sets {
            for section in &set.sections {
                if section.items.is_empty() && section.query.is_none() {
                    return Err(SetkeeperError::InvalidSetData(format!(
                        "{}: section {:?} in set {:?} has neither items nor a query",
                        name, section.name, set.name
                    ))
                    .into());
                }
            }
        }
    }
    Ok(())
}

/// Parse and validate set data JSON
pub fn parse(name: &str, source: &str) -> Result<Vec<SetGroup>> {
    let groups: Vec<SetGroup> = serde_json::from_str(source)
        .map_err(|e| SetkeeperError::InvalidSetData(format!("{}: {}", name, e)))?;
    validate(name, &groups)?;

    debug!("Loaded set data {}: {} groups", name, groups.len());
    Ok(groups)
}

impl SetPage {
    pub fn load(&self) -> Result<Vec<SetGroup>> {
        parse(self.name, self.source)
    }
}

/// Fill query sections from the catalog.
/// A query that narrows nothing resolves to no items.
pub fn resolve(mut groups: Vec<SetGroup>, catalog: &Catalog) -> Vec<SetGroup> {
    for section in groups
        .iter_mut()
        .flat_map(|g| g.sets.iter_mut())
        .flat_map(|s| s.sections.iter_mut())
    {
        if let Some(query) = &section.query {
            match fancy_search_hashes(query, catalog) {
                Some(hashes) => section.items.extend(hashes),
                None => warn!("Query {:?} matched the whole catalog, ignoring", query),
            }
        }
    }
    groups
}

/// Keep only items matching every enabled filter; drop what ends up empty.
/// With no effective filter the groups are returned unchanged.
pub fn apply_filters(groups: Vec<SetGroup>, catalog: &Catalog, filters: &FilterSet) -> Vec<SetGroup> {
    let allowed: HashSet<u32> = match fancy_search_hashes(&filters.as_query(), catalog) {
        Some(hashes) => hashes.into_iter().collect(),
        None => return groups,
    };

    groups
        .into_iter()
        .filter_map(|mut group| {
            group.sets = group
                .sets
                .into_iter()
                .filter_map(|mut set| {
                    set.sections = set
                        .sections
                        .into_iter()
                        .filter_map(|mut section| {
                            section.items.retain(|hash| allowed.contains(hash));
                            (!section.items.is_empty()).then_some(section)
                        })
                        .collect();
                    (!set.sections.is_empty()).then_some(set)
                })
                .collect();
            (!group.sets.is_empty()).then_some(group)
        })
        .collect()
}

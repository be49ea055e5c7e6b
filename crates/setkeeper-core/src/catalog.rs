//! ============================================================================
//! Item Catalog - Definitions loaded from the manifest
//! ============================================================================
//! Only the fields the search predicates and set pages read are modeled.
//! A catalog is built once per language and never mutated afterwards.
//! ============================================================================

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::types::SetkeeperError;

/// Bundled map of catalyst record hash → exotic weapon item hash
const CATALYST_TRIUMPHS: &str = include_str!("../data/catalyst_triumphs.json");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayProperties {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryBlock {
    #[serde(default)]
    pub tier_type_hash: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlugBlock {
    #[serde(default)]
    pub ui_plug_label: Option<String>,
}

/// `DestinyInventoryItemDefinition`, trimmed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDefinition {
    pub hash: u32,
    #[serde(default)]
    pub display_properties: DisplayProperties,
    /// `None` when the definition carries no category list at all
    #[serde(default)]
    pub item_category_hashes: Option<Vec<u32>>,
    #[serde(default)]
    pub inventory: Option<InventoryBlock>,
    #[serde(default)]
    pub class_type: Option<i32>,
    #[serde(default)]
    pub redacted: bool,
    #[serde(default)]
    pub item_type_display_name: Option<String>,
    #[serde(default)]
    pub plug: Option<PlugBlock>,
}

impl ItemDefinition {
    pub fn name(&self) -> &str {
        &self.display_properties.name
    }

    pub fn has_name(&self) -> bool {
        !self.display_properties.name.is_empty()
    }

    pub fn in_category(&self, category: u32) -> bool {
        self.item_category_hashes
            .as_ref()
            .map(|hashes| hashes.contains(&category))
            .unwrap_or(false)
    }

    pub fn tier_type_hash(&self) -> Option<u32> {
        self.inventory.as_ref().map(|inv| inv.tier_type_hash)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordChild {
    pub record_hash: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationNodeChildren {
    #[serde(default)]
    pub records: Vec<RecordChild>,
}

/// `DestinyPresentationNodeDefinition`, trimmed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationNode {
    pub hash: u32,
    #[serde(default)]
    pub display_properties: DisplayProperties,
    #[serde(default)]
    pub children: PresentationNodeChildren,
}

/// Item definitions plus the lookup tables search needs
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub items: Vec<ItemDefinition>,
    pub presentation_nodes: Option<HashMap<u32, PresentationNode>>,
    /// record hash → item hash
    pub catalyst_items: HashMap<u32, u32>,
    by_hash: HashMap<u32, usize>,
}

/// Parse a manifest table (`{ "<hash>": { ...definition } }`) into definitions.
/// Entries that do not fit the model are skipped with a warning.
fn parse_table<T: serde::de::DeserializeOwned>(table: &Value, name: &str) -> Result<Vec<T>> {
    let entries = table
        .as_object()
        .ok_or_else(|| SetkeeperError::Parse(format!("{} is not an object", name)))?;

    let mut parsed = Vec::with_capacity(entries.len());
    for (hash, def) in entries {
        match serde_json::from_value(def.clone()) {
            Ok(def) => parsed.push(def),
            Err(e) => warn!("Skipping {} definition {}: {}", name, hash, e),
        }
    }
    Ok(parsed)
}

/// Invert the bundled `{ itemHash: recordHash }` table
fn load_catalyst_items() -> Result<HashMap<u32, u32>> {
    let table: HashMap<String, u32> = serde_json::from_str(CATALYST_TRIUMPHS)
        .map_err(|e| SetkeeperError::Parse(format!("catalyst triumphs: {}", e)))?;

    let mut inverted = HashMap::with_capacity(table.len());
    for (item_hash, record_hash) in table {
        let item_hash: u32 = item_hash
            .parse()
            .map_err(|e| SetkeeperError::Parse(format!("catalyst item hash {}: {}", item_hash, e)))?;
        inverted.insert(record_hash, item_hash);
    }
    Ok(inverted)
}

impl Catalog {
    pub fn new(mut items: Vec<ItemDefinition>, presentation_nodes: Option<Vec<PresentationNode>>) -> Result<Self> {
        items.sort_by_key(|item| item.hash);
        let by_hash = items
            .iter()
            .enumerate()
            .map(|(idx, item)| (item.hash, idx))
            .collect();

        Ok(Self {
            items,
            presentation_nodes: presentation_nodes
                .map(|nodes| nodes.into_iter().map(|node| (node.hash, node)).collect()),
            catalyst_items: load_catalyst_items()?,
            by_hash,
        })
    }

    /// Build from raw manifest tables
    pub fn from_tables(item_table: &Value, presentation_table: Option<&Value>) -> Result<Self> {
        let items = parse_table(item_table, "DestinyInventoryItemDefinition")?;
        let nodes = presentation_table
            .map(|table| parse_table(table, "DestinyPresentationNodeDefinition"))
            .transpose()?;

        debug!(
            "Catalog built: {} items, {} presentation nodes",
            items.len(),
            nodes.as_ref().map(Vec::len).unwrap_or(0)
        );
        Self::new(items, nodes)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find(&self, hash: u32) -> Option<&ItemDefinition> {
        self.by_hash.get(&hash).map(|idx| &self.items[*idx])
    }
}

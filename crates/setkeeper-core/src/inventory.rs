//! ============================================================================
//! Inventory - What an account holds, derived from a profile
//! ============================================================================
//! Items are collected from the profile-wide inventory (vault and consumables),
//! every character's inventory and every character's equipment. The cloud
//! copy remembers hashes seen in earlier snapshots; anything no longer held
//! is kept and marked dismantled.
//! ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::types::Profile;

/// Where an instance was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ItemLocation {
    ProfileInventory,
    CharacterInventory {
        #[serde(rename = "characterId")]
        character_id: String,
    },
    CharacterEquipment {
        #[serde(rename = "characterId")]
        character_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInstance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_hash: Option<u32>,
    pub location: ItemLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    pub item_hash: u32,
    #[serde(default)]
    pub obtained: bool,
    #[serde(default)]
    pub dismantled: bool,
    #[serde(default)]
    pub instances: Vec<ItemInstance>,
}

pub type Inventory = BTreeMap<u32, InventoryEntry>;

/// Document stored in the cloud per account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySnapshot {
    #[serde(default)]
    pub inventory: Inventory,
    /// Hashes the user marked as obtained by hand
    #[serde(default)]
    pub manual_inventory: BTreeSet<u32>,
}

impl InventorySnapshot {
    /// Held or manually obtained
    pub fn has(&self, item_hash: u32) -> bool {
        self.manual_inventory.contains(&item_hash)
            || self
                .inventory
                .get(&item_hash)
                .map(|entry| entry.obtained && !entry.dismantled)
                .unwrap_or(false)
    }
}

fn collect_items(items: Option<&Value>, location: ItemLocation, inventory: &mut Inventory) {
    let items = match items.and_then(Value::as_array) {
        Some(items) => items,
        None => return,
    };

    for item in items {
        let item_hash = match item.get("itemHash").and_then(Value::as_u64) {
            Some(hash) => hash as u32,
            None => continue,
        };

        let instance = ItemInstance {
            item_instance_id: item
                .get("itemInstanceId")
                .and_then(Value::as_str)
                .map(str::to_string),
            bucket_hash: item.get("bucketHash").and_then(Value::as_u64).map(|h| h as u32),
            location: location.clone(),
        };

        inventory
            .entry(item_hash)
            .or_insert_with(|| InventoryEntry {
                item_hash,
                obtained: true,
                dismantled: false,
                instances: Vec::new(),
            })
            .instances
            .push(instance);
    }
}

/// Every item hash the profile currently holds
pub fn inventory_from_profile(profile: &Profile) -> Inventory {
    let root = profile.as_value();
    let mut inventory = Inventory::new();

    collect_items(
        root.pointer("/profileInventory/data/items"),
        ItemLocation::ProfileInventory,
        &mut inventory,
    );

    for character_id in profile.character_ids() {
        collect_items(
            root.pointer(&format!("/characterInventories/data/{}/items", character_id)),
            ItemLocation::CharacterInventory {
                character_id: character_id.clone(),
            },
            &mut inventory,
        );
        collect_items(
            root.pointer(&format!("/characterEquipment/data/{}/items", character_id)),
            ItemLocation::CharacterEquipment { character_id },
            &mut inventory,
        );
    }

    debug!("Derived inventory of {} distinct items", inventory.len());
    inventory
}

/// Fold an earlier cloud snapshot into the current inventory.
/// Hashes only the cloud knows about are kept as dismantled.
pub fn merge_cloud(current: Inventory, cloud: Option<&InventorySnapshot>) -> InventorySnapshot {
    let cloud = match cloud {
        Some(cloud) => cloud,
        None => {
            return InventorySnapshot {
                inventory: current,
                manual_inventory: BTreeSet::new(),
            }
        }
    };

    let mut inventory = current;
    let mut dismantled = 0;
    for (hash, entry) in &cloud.inventory {
        if !inventory.contains_key(hash) {
            inventory.insert(
                *hash,
                InventoryEntry {
                    item_hash: *hash,
                    obtained: entry.obtained,
                    dismantled: true,
                    instances: Vec::new(),
                },
            );
            dismantled += 1;
        }
    }

    debug!("Merged cloud inventory, {} dismantled items", dismantled);
    InventorySnapshot {
        inventory,
        manual_inventory: cloud.manual_inventory.clone(),
    }
}

//! ============================================================================
//! Fancy Search - Token predicates over the item catalog
//! ============================================================================
//! A query is split on spaces and every token containing `:` narrows the
//! running set. Tokens are either registered keys (`is:exotic`), ad-hoc
//! category filters (`itemcategoryhash:<hash>`), or ignored. There is no
//! negation, disjunction or precedence: the chain is purely conjunctive.
//!
//! `special:<kinetic|energy|power>Catalysts` short-circuits the chain and
//! resolves the catalyst triumphs of that weapon slot instead.
//! ============================================================================

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::catalog::{Catalog, ItemDefinition};
use crate::enums;

static CATEGORY_HASH_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"itemcategoryhash:(\d+)").unwrap());
static CATALYST_QUERY: Lazy<Regex> = Lazy::new(|| Regex::new(r"special:(\w+)Catalysts").unwrap());

type Predicate = fn(&ItemDefinition) -> bool;

/// A registered search key
struct SearchFn {
    predicate: Predicate,
    /// Drop items without a display name
    requires_name: bool,
}

const fn named(predicate: Predicate) -> SearchFn {
    SearchFn {
        predicate,
        requires_name: true,
    }
}

const fn any(predicate: Predicate) -> SearchFn {
    SearchFn {
        predicate,
        requires_name: false,
    }
}

const COLLECTABLE: [u32; 8] = [
    enums::WEAPON,
    enums::ARMOR,
    enums::GHOST,
    enums::GHOST_PROJECTION,
    enums::SPARROW,
    enums::SHIP,
    enums::SHADER,
    enums::EMBLEM,
];

fn is_weapon(item: &ItemDefinition) -> bool {
    item.in_category(enums::WEAPON)
}

fn is_armor(item: &ItemDefinition) -> bool {
    item.in_category(enums::ARMOR)
}

fn is_tier(item: &ItemDefinition, tier: u32) -> bool {
    item.tier_type_hash() == Some(tier)
}

fn is_class(item: &ItemDefinition, class_type: i32) -> bool {
    item.class_type == Some(class_type) && !item.redacted
}

fn is_collectable(item: &ItemDefinition) -> bool {
    let categories = match &item.item_category_hashes {
        Some(categories) => categories,
        None => return false,
    };

    if is_weapon(item) || is_armor(item) {
        return is_tier(item, enums::LEGENDARY) || is_tier(item, enums::EXOTIC);
    }

    categories.iter().any(|c| COLLECTABLE.contains(c))
}

fn is_transmat(item: &ItemDefinition) -> bool {
    item.item_type_display_name
        .as_deref()
        .unwrap_or_default()
        .to_lowercase()
        .contains("transmat effect")
}

fn is_masterworkish(item: &ItemDefinition) -> bool {
    item.plug
        .as_ref()
        .and_then(|plug| plug.ui_plug_label.as_deref())
        .map(|label| label.contains("masterwork"))
        .unwrap_or(false)
}

const SEARCH_FNS: &[(&str, SearchFn)] = &[
    ("is:collectable", named(is_collectable)),
    ("is:hunter", named(|i| is_class(i, enums::HUNTER))),
    ("is:titan", named(|i| is_class(i, enums::TITAN))),
    ("is:warlock", named(|i| is_class(i, enums::WARLOCK))),
    ("is:weapon", named(is_weapon)),
    ("is:kinetic", named(|i| i.in_category(enums::KINETIC_WEAPON))),
    ("is:energy", named(|i| i.in_category(enums::ENERGY_WEAPON))),
    ("is:power", named(|i| i.in_category(enums::POWER_WEAPON))),
    ("is:dummy", named(|i| i.in_category(enums::DUMMIES))),
    ("is:armor", any(is_armor)),
    ("is:gear", named(|i| is_armor(i) || is_weapon(i))),
    ("is:ghost", named(|i| i.in_category(enums::GHOST))),
    ("is:ghostprojection", named(|i| i.in_category(enums::GHOST_PROJECTION))),
    (
        "is:ghostly",
        named(|i| i.in_category(enums::GHOST) || i.in_category(enums::GHOST_PROJECTION)),
    ),
    ("is:sparrow", named(|i| i.in_category(enums::SPARROW))),
    ("is:ship", named(|i| i.in_category(enums::SHIP))),
    ("is:shader", named(|i| i.in_category(enums::SHADER))),
    ("is:oldemote", named(|i| i.in_category(enums::EMOTES))),
    (
        "is:emote",
        named(|i| i.in_category(enums::EMOTES) && i.in_category(enums::MODS2)),
    ),
    ("is:emblem", named(|i| i.in_category(enums::EMBLEM))),
    ("is:classitem", named(|i| i.in_category(enums::CLASS_ITEMS))),
    ("is:transmat", any(is_transmat)),
    ("is:exotic", named(|i| is_tier(i, enums::EXOTIC))),
    ("is:legendary", named(|i| is_tier(i, enums::LEGENDARY))),
    ("is:uncommon", named(|i| is_tier(i, enums::UNCOMMON))),
    ("is:rare", named(|i| is_tier(i, enums::RARE))),
    ("is:common", named(|i| is_tier(i, enums::COMMON))),
    (
        "is:mod",
        named(|i| i.in_category(enums::MODS1) || i.in_category(enums::MODS2)),
    ),
    (
        "is:ornament",
        named(|i| {
            i.in_category(enums::ARMOR_MODS_ORNAMENTS) || i.in_category(enums::WEAPON_MODS_ORNAMENTS)
        }),
    ),
    ("is:clanbanner", named(|i| i.in_category(enums::CLAN_BANNER))),
    ("is:masterworkish", named(is_masterworkish)),
];

/// Presentation nodes grouping the catalyst triumphs per weapon slot
const CATALYST_PRESENTATION_NODES: [(&str, u32); 3] = [
    ("kinetic", 4145555894),
    ("energy", 259629437),
    ("power", 3274555605),
];

/// Every registered search key, in registration order
pub fn fancy_search_terms() -> Vec<&'static str> {
    SEARCH_FNS.iter().map(|(term, _)| *term).collect()
}

fn lookup(term: &str) -> Option<&'static SearchFn> {
    SEARCH_FNS
        .iter()
        .find(|(key, _)| *key == term)
        .map(|(_, search_fn)| search_fn)
}

fn apply<'a>(items: Vec<&'a ItemDefinition>, search_fn: &SearchFn) -> Vec<&'a ItemDefinition> {
    items
        .into_iter()
        .filter(|item| (!search_fn.requires_name || item.has_name()) && (search_fn.predicate)(item))
        .collect()
}

fn apply_category<'a>(items: Vec<&'a ItemDefinition>, digits: &str) -> Vec<&'a ItemDefinition> {
    // Hashes are u32; anything wider cannot match
    let category: u32 = match digits.parse() {
        Ok(category) => category,
        Err(_) => return Vec::new(),
    };

    items
        .into_iter()
        .filter(|item| item.has_name() && item.in_category(category))
        .collect()
}

enum Matched<'a> {
    Items(Vec<&'a ItemDefinition>),
    Catalysts(Vec<u32>),
}

/// Item hashes for the catalyst triumphs of one weapon slot
fn catalyst_hashes(weapon_type: &str, catalog: &Catalog) -> Option<Vec<u32>> {
    let nodes = catalog.presentation_nodes.as_ref()?;

    let node = CATALYST_PRESENTATION_NODES
        .iter()
        .find(|(slot, _)| *slot == weapon_type)
        .and_then(|(_, hash)| nodes.get(hash));

    let node = match node {
        Some(node) => node,
        None => {
            warn!("Unable to find presentation node for {} catalysts", weapon_type);
            return Some(Vec::new());
        }
    };

    let hashes: Vec<u32> = node
        .children
        .records
        .iter()
        .filter_map(|record| catalog.catalyst_items.get(&record.record_hash).copied())
        .collect();

    debug!("{} catalysts: {:?}", weapon_type, hashes);
    Some(hashes)
}

fn evaluate<'a>(query: &str, catalog: &'a Catalog) -> Option<Matched<'a>> {
    if let Some(caps) = CATALYST_QUERY.captures(query) {
        if let Some(hashes) = catalyst_hashes(&caps[1], catalog) {
            return Some(Matched::Catalysts(hashes));
        }
    }

    let all: Vec<&ItemDefinition> = catalog.items.iter().collect();
    let total = all.len();

    let filtered = query
        .split(' ')
        .filter(|token| token.contains(':'))
        .fold(all, |items, token| match lookup(token) {
            Some(search_fn) => apply(items, search_fn),
            None => match CATEGORY_HASH_TOKEN.captures(token) {
                Some(caps) => apply_category(items, &caps[1]),
                None => items,
            },
        });

    if filtered.len() == total {
        return None;
    }

    Some(Matched::Items(filtered))
}

/// Filter the catalog by `query`.
/// `None` means no token narrowed the catalog and nothing should be filtered.
pub fn fancy_search<'a>(query: &str, catalog: &'a Catalog) -> Option<Vec<&'a ItemDefinition>> {
    match evaluate(query, catalog)? {
        Matched::Items(items) => Some(items),
        Matched::Catalysts(hashes) => Some(
            hashes
                .into_iter()
                .filter_map(|hash| catalog.find(hash))
                .collect(),
        ),
    }
}

/// Like [`fancy_search`], but yields hashes. Catalyst queries keep hashes
/// whose definitions are missing from the catalog.
pub fn fancy_search_hashes(query: &str, catalog: &Catalog) -> Option<Vec<u32>> {
    match evaluate(query, catalog)? {
        Matched::Items(items) => Some(items.into_iter().map(|item| item.hash).collect()),
        Matched::Catalysts(hashes) => Some(hashes),
    }
}

//! Destiny 2 definition constants used by the search predicates.

// Item category hashes
pub const WEAPON: u32 = 1;
pub const KINETIC_WEAPON: u32 = 2;
pub const ENERGY_WEAPON: u32 = 3;
pub const POWER_WEAPON: u32 = 4;
pub const EMBLEM: u32 = 19;
pub const ARMOR: u32 = 20;
pub const GHOST: u32 = 39;
pub const SHADER: u32 = 41;
pub const SHIP: u32 = 42;
pub const SPARROW: u32 = 43;
pub const EMOTES: u32 = 44;
pub const CLASS_ITEMS: u32 = 49;
pub const CLAN_BANNER: u32 = 58;
pub const MODS1: u32 = 59;
pub const MODS2: u32 = 1052191496;
pub const GHOST_PROJECTION: u32 = 1404791674;
pub const ARMOR_MODS_ORNAMENTS: u32 = 1742617626;
pub const WEAPON_MODS_ORNAMENTS: u32 = 3124752623;
pub const DUMMIES: u32 = 3109687656;

// Tier type hashes
pub const COMMON: u32 = 3340296461;
pub const UNCOMMON: u32 = 2395677314;
pub const RARE: u32 = 2127292149;
pub const LEGENDARY: u32 = 4008398120;
pub const EXOTIC: u32 = 2759499571;

// Class types
pub const TITAN: i32 = 0;
pub const HUNTER: i32 = 1;
pub const WARLOCK: i32 = 2;

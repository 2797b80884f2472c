//! Game entities
//!
//! Plain-data types owned by the cache layer. Every mutable entity has
//! exactly one owning cache; nothing here touches the store or any lock.

pub mod battle;
pub mod message;
pub mod user;
pub mod world;

pub use battle::{Battle, BattleEvent, BattleEventKind, BattleStats, LayerStat, Side, WeaponStats};
pub use message::Message;
pub use user::{
    level_for_xp, weapon_spec, BuildItemType, BuildQueueItem, Inventory, LevelChange, TechCounts,
    User, WeaponSpec, WEAPON_ORDER,
};
pub use world::{
    opposite_point, spawn_collectible, toroidal_distance, wrap, SpaceObject, SpaceObjectKind,
    World, WorldSize,
};

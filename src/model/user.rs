//! User entity, tech counts, and the weapon catalog
//!
//! Users are plain data owned by the user cache; every mutation goes
//! through that cache. Derived values (level, max defenses, weapon
//! loadout) are pure functions of the stored fields.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Points of max defense granted per owned defense tech.
pub const DEFENSE_PER_TECH: i64 = 100;

/// Seconds per defense regeneration interval.
pub const DEFENSE_REGEN_INTERVAL_SECS: i64 = 10;

/// Points restored per layer per regeneration interval.
pub const DEFENSE_REGEN_PER_INTERVAL: i64 = 5;

/// Canonical weapon iteration order. Firing ties resolve to the first
/// ready weapon in this order, which keeps turn resolution deterministic.
pub const WEAPON_ORDER: [&str; 6] = [
    "pulse_laser",
    "auto_turret",
    "plasma_lance",
    "gauss_rifle",
    "photon_torpedo",
    "rocket_launcher",
];

/// Static damage and cooldown of one weapon type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeaponSpec {
    /// Damage per hit
    pub damage: i64,
    /// Seconds between shots
    pub cooldown_secs: i64,
}

static WEAPON_CATALOG: Lazy<HashMap<&'static str, WeaponSpec>> = Lazy::new(|| {
    HashMap::from([
        (
            "pulse_laser",
            WeaponSpec {
                damage: 10,
                cooldown_secs: 5,
            },
        ),
        (
            "auto_turret",
            WeaponSpec {
                damage: 6,
                cooldown_secs: 2,
            },
        ),
        (
            "plasma_lance",
            WeaponSpec {
                damage: 40,
                cooldown_secs: 20,
            },
        ),
        (
            "gauss_rifle",
            WeaponSpec {
                damage: 25,
                cooldown_secs: 12,
            },
        ),
        (
            "photon_torpedo",
            WeaponSpec {
                damage: 80,
                cooldown_secs: 45,
            },
        ),
        (
            "rocket_launcher",
            WeaponSpec {
                damage: 55,
                cooldown_secs: 30,
            },
        ),
    ])
});

/// Look up the static spec for a weapon key.
pub fn weapon_spec(key: &str) -> Option<WeaponSpec> {
    WEAPON_CATALOG.get(key).copied()
}

/// Per-user counts of owned research items. Column-for-column mirror of
/// the users table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechCounts {
    pub pulse_laser: i64,
    pub auto_turret: i64,
    pub plasma_lance: i64,
    pub gauss_rifle: i64,
    pub photon_torpedo: i64,
    pub rocket_launcher: i64,
    pub ship_hull: i64,
    pub kinetic_armor: i64,
    pub energy_shield: i64,
    pub missile_jammer: i64,
}

impl TechCounts {
    /// Owned count for a weapon key, 0 for unknown keys.
    pub fn weapon_count(&self, key: &str) -> i64 {
        match key {
            "pulse_laser" => self.pulse_laser,
            "auto_turret" => self.auto_turret,
            "plasma_lance" => self.plasma_lance,
            "gauss_rifle" => self.gauss_rifle,
            "photon_torpedo" => self.photon_torpedo,
            "rocket_launcher" => self.rocket_launcher,
            _ => 0,
        }
    }

    /// Increment the count behind a tech key. Returns false for unknown keys.
    pub fn increment(&mut self, key: &str) -> bool {
        let slot = match key {
            "pulse_laser" => &mut self.pulse_laser,
            "auto_turret" => &mut self.auto_turret,
            "plasma_lance" => &mut self.plasma_lance,
            "gauss_rifle" => &mut self.gauss_rifle,
            "photon_torpedo" => &mut self.photon_torpedo,
            "rocket_launcher" => &mut self.rocket_launcher,
            "ship_hull" => &mut self.ship_hull,
            "kinetic_armor" => &mut self.kinetic_armor,
            "energy_shield" => &mut self.energy_shield,
            "missile_jammer" => &mut self.missile_jammer,
            _ => return false,
        };
        *slot += 1;
        true
    }

    /// Maximum hull derived from owned hull tech.
    pub fn hull_max(&self) -> i64 {
        self.ship_hull * DEFENSE_PER_TECH
    }

    /// Maximum armor derived from owned armor tech.
    pub fn armor_max(&self) -> i64 {
        self.kinetic_armor * DEFENSE_PER_TECH
    }

    /// Maximum shield derived from owned shield tech.
    pub fn shield_max(&self) -> i64 {
        self.energy_shield * DEFENSE_PER_TECH
    }
}

/// Kind of item a build queue entry produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildItemType {
    Weapon,
    Defense,
}

/// One queued research/build order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildQueueItem {
    /// Tech key the item completes into
    pub item_key: String,
    /// Weapon or defense
    pub item_type: BuildItemType,
    /// Epoch seconds at which the item finishes
    pub completion_time: i64,
}

/// Ship inventory: a row-major grid of optional item keys.
pub type Inventory = Vec<Vec<Option<String>>>;

/// A player account and its ship state.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Opaque to the core; persisted verbatim
    pub password_hash: String,
    pub iron: i64,
    pub xp: i64,
    /// Epoch seconds of the last stat advance
    pub last_updated: i64,
    /// Opaque research graph, persisted as JSON
    pub tech_tree: serde_json::Value,
    pub tech_counts: TechCounts,
    pub ship_id: Option<i64>,
    pub hull_current: i64,
    pub armor_current: i64,
    pub shield_current: i64,
    /// Epoch seconds defense regeneration last advanced to
    pub defense_last_regen: i64,
    pub in_battle: bool,
    pub current_battle_id: Option<i64>,
    pub build_queue: Vec<BuildQueueItem>,
    pub inventory: Inventory,
}

/// Level transition reported by [`User::add_xp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub old_level: u32,
    pub new_level: u32,
}

/// Outcome of a stat advance: what changed, and which builds completed.
#[derive(Debug, Default)]
pub struct StatsUpdate {
    /// Build queue entries that finished during this advance
    pub completed_builds: Vec<BuildQueueItem>,
    /// Whether any persisted field changed
    pub changed: bool,
}

/// Level for an XP total: the largest `L` such that the triangular-sum
/// thresholds up to `L` are covered. Level `L` costs `L(L+1)/2 * 1000`
/// XP on top of everything before it.
pub fn level_for_xp(xp: i64) -> u32 {
    let mut level: i64 = 1;
    let mut threshold: i64 = 0;
    loop {
        let step = level * (level + 1) / 2 * 1000;
        if xp >= threshold + step {
            threshold += step;
            level += 1;
        } else {
            return level as u32;
        }
    }
}

impl User {
    /// A freshly registered user with empty loadout, positioned nowhere.
    pub fn new(id: i64, username: impl Into<String>, password_hash: impl Into<String>, now: i64) -> Self {
        Self {
            id,
            username: username.into(),
            password_hash: password_hash.into(),
            iron: 0,
            xp: 0,
            last_updated: now,
            tech_tree: serde_json::Value::Null,
            tech_counts: TechCounts::default(),
            ship_id: None,
            hull_current: 0,
            armor_current: 0,
            shield_current: 0,
            defense_last_regen: now,
            in_battle: false,
            current_battle_id: None,
            build_queue: Vec::new(),
            inventory: Vec::new(),
        }
    }

    /// Current level derived from XP.
    pub fn level(&self) -> u32 {
        level_for_xp(self.xp)
    }

    /// Maximum hull derived from tech counts.
    pub fn hull_max(&self) -> i64 {
        self.tech_counts.hull_max()
    }

    /// Maximum armor derived from tech counts.
    pub fn armor_max(&self) -> i64 {
        self.tech_counts.armor_max()
    }

    /// Maximum shield derived from tech counts.
    pub fn shield_max(&self) -> i64 {
        self.tech_counts.shield_max()
    }

    /// Grant XP and report the resulting level transition.
    pub fn add_xp(&mut self, amount: i64) -> LevelChange {
        let old_level = self.level();
        self.xp += amount.max(0);
        LevelChange {
            old_level,
            new_level: self.level(),
        }
    }

    /// Advance time-derived stats to `now`: iron accrual, build queue
    /// completion, and defense regeneration. Idempotent for a fixed `now`.
    pub fn update_stats(&mut self, now: i64) -> StatsUpdate {
        let mut update = StatsUpdate::default();

        // Iron accrues per elapsed second, scaled by level.
        let elapsed = now - self.last_updated;
        if elapsed > 0 {
            self.iron += elapsed * i64::from(self.level());
            self.last_updated = now;
            update.changed = true;
        }

        // Finished builds convert into tech counts before regeneration so
        // new defense capacity regenerates from this advance onward.
        let due: Vec<BuildQueueItem> = {
            let mut due = Vec::new();
            self.build_queue.retain(|item| {
                if item.completion_time <= now {
                    due.push(item.clone());
                    false
                } else {
                    true
                }
            });
            due
        };
        for item in &due {
            self.tech_counts.increment(&item.item_key);
        }
        if !due.is_empty() {
            update.changed = true;
            update.completed_builds = due;
        }

        if self.in_battle {
            // No regeneration banks up during a fight.
            if self.defense_last_regen != now {
                self.defense_last_regen = now;
                update.changed = true;
            }
        } else {
            let intervals = (now - self.defense_last_regen) / DEFENSE_REGEN_INTERVAL_SECS;
            if intervals > 0 {
                let gain = intervals * DEFENSE_REGEN_PER_INTERVAL;
                self.hull_current = (self.hull_current + gain).min(self.hull_max());
                self.armor_current = (self.armor_current + gain).min(self.armor_max());
                self.shield_current = (self.shield_current + gain).min(self.shield_max());
                self.defense_last_regen += intervals * DEFENSE_REGEN_INTERVAL_SECS;
                update.changed = true;
            }
        }

        // Defense invariant: current never exceeds the derived max.
        self.hull_current = self.hull_current.clamp(0, self.hull_max());
        self.armor_current = self.armor_current.clamp(0, self.armor_max());
        self.shield_current = self.shield_current.clamp(0, self.shield_max());

        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_defenses() -> User {
        let mut user = User::new(1, "vega", "hash", 1000);
        user.tech_counts.ship_hull = 5;
        user.tech_counts.kinetic_armor = 5;
        user.tech_counts.energy_shield = 5;
        user.hull_current = 500;
        user.armor_current = 500;
        user.shield_current = 500;
        user
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(999), 1);
        assert_eq!(level_for_xp(1000), 2);
        assert_eq!(level_for_xp(3999), 2);
        assert_eq!(level_for_xp(4000), 3);
        assert_eq!(level_for_xp(9999), 3);
        assert_eq!(level_for_xp(10_000), 4);
    }

    #[test]
    fn test_add_xp_reports_level_change() {
        let mut user = User::new(1, "vega", "hash", 0);
        user.xp = 500;

        let change = user.add_xp(1500);
        assert_eq!(
            change,
            LevelChange {
                old_level: 1,
                new_level: 2,
            }
        );
        assert_eq!(user.xp, 2000);

        let change = user.add_xp(0);
        assert_eq!(change.old_level, change.new_level);
    }

    #[test]
    fn test_weapon_catalog_covers_order() {
        for key in WEAPON_ORDER {
            let spec = weapon_spec(key).expect("catalog entry");
            assert!(spec.damage > 0);
            assert!(spec.cooldown_secs > 0);
        }
        assert!(weapon_spec("tachyon_beam").is_none());
    }

    #[test]
    fn test_derived_defense_maxes() {
        let user = user_with_defenses();
        assert_eq!(user.hull_max(), 500);
        assert_eq!(user.armor_max(), 500);
        assert_eq!(user.shield_max(), 500);
    }

    #[test]
    fn test_iron_accrues_with_level() {
        let mut user = User::new(1, "vega", "hash", 1000);
        user.xp = 1000; // level 2

        let update = user.update_stats(1010);
        assert!(update.changed);
        assert_eq!(user.iron, 20);
        assert_eq!(user.last_updated, 1010);

        // Same instant again: no further accrual.
        let update = user.update_stats(1010);
        assert_eq!(user.iron, 20);
        assert!(!update.changed);
    }

    #[test]
    fn test_defense_regen_caps_at_max() {
        let mut user = user_with_defenses();
        user.hull_current = 490;
        user.armor_current = 0;
        user.shield_current = 500;

        // 25 whole intervals: 125 points of regen on offer.
        user.update_stats(1000 + 250);
        assert_eq!(user.hull_current, 500);
        assert_eq!(user.armor_current, 125);
        assert_eq!(user.shield_current, 500);
        assert_eq!(user.defense_last_regen, 1250);
    }

    #[test]
    fn test_no_regen_while_in_battle() {
        let mut user = user_with_defenses();
        user.hull_current = 100;
        user.in_battle = true;

        user.update_stats(1000 + 300);
        assert_eq!(user.hull_current, 100);
        // The regen clock keeps up so nothing banks for after the fight.
        assert_eq!(user.defense_last_regen, 1300);
    }

    #[test]
    fn test_partial_interval_carries_over() {
        let mut user = user_with_defenses();
        user.armor_current = 0;

        user.update_stats(1000 + 15);
        assert_eq!(user.armor_current, 5);
        assert_eq!(user.defense_last_regen, 1010);

        user.update_stats(1000 + 20);
        assert_eq!(user.armor_current, 10);
    }

    #[test]
    fn test_build_queue_completion() {
        let mut user = user_with_defenses();
        user.build_queue = vec![
            BuildQueueItem {
                item_key: "pulse_laser".into(),
                item_type: BuildItemType::Weapon,
                completion_time: 1100,
            },
            BuildQueueItem {
                item_key: "energy_shield".into(),
                item_type: BuildItemType::Defense,
                completion_time: 2000,
            },
        ];

        let update = user.update_stats(1200);
        assert_eq!(update.completed_builds.len(), 1);
        assert_eq!(update.completed_builds[0].item_key, "pulse_laser");
        assert_eq!(user.tech_counts.pulse_laser, 1);
        assert_eq!(user.build_queue.len(), 1);
        assert_eq!(user.tech_counts.energy_shield, 5);
    }

    #[test]
    fn test_build_queue_item_roundtrips_as_json() {
        let item = BuildQueueItem {
            item_key: "gauss_rifle".into(),
            item_type: BuildItemType::Weapon,
            completion_time: 123,
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"item_type\":\"weapon\""));
        let back: BuildQueueItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }
}

//! Battle entity, participant roles, and combat snapshots
//!
//! A battle pairs an attacker and an attackee. Cross-participant state is
//! addressed through the [`Side`] role so that engine and scheduler code
//! dispatches uniformly instead of duplicating attacker/attackee branches.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::user::{weapon_spec, User, WEAPON_ORDER};

/// Which participant of a battle an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Attacker,
    Attackee,
}

impl Side {
    /// The other participant.
    pub const fn opponent(self) -> Self {
        match self {
            Self::Attacker => Self::Attackee,
            Self::Attackee => Self::Attacker,
        }
    }

    /// Stable string form used in event payloads.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attacker => "attacker",
            Self::Attackee => "attackee",
        }
    }
}

/// Current and maximum value of one defense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStat {
    pub current: i64,
    pub max: i64,
}

/// Count, per-hit damage, and cooldown of one weapon type in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponStats {
    pub count: i64,
    pub damage: i64,
    pub cooldown: i64,
}

/// Immutable combat snapshot of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleStats {
    pub hull: LayerStat,
    pub armor: LayerStat,
    pub shield: LayerStat,
    /// Weapon key to stats, for weapons the participant owns
    pub weapons: HashMap<String, WeaponStats>,
}

impl BattleStats {
    /// Snapshot a user's live combat state: current defense values, derived
    /// maxima, and the owned weapon loadout from the catalog.
    pub fn snapshot_of(user: &User) -> Self {
        let mut weapons = HashMap::new();
        for key in WEAPON_ORDER {
            let count = user.tech_counts.weapon_count(key);
            if count <= 0 {
                continue;
            }
            if let Some(spec) = weapon_spec(key) {
                weapons.insert(
                    key.to_string(),
                    WeaponStats {
                        count,
                        damage: spec.damage,
                        cooldown: spec.cooldown_secs,
                    },
                );
            }
        }

        Self {
            hull: LayerStat {
                current: user.hull_current,
                max: user.hull_max(),
            },
            armor: LayerStat {
                current: user.armor_current,
                max: user.armor_max(),
            },
            shield: LayerStat {
                current: user.shield_current,
                max: user.shield_max(),
            },
            weapons,
        }
    }
}

/// Kind of entry in the battle log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleEventKind {
    ShotFired,
    DamageDealt,
    ShieldBroken,
    ArmorBroken,
    HullDestroyed,
    BattleStarted,
    BattleEnded,
}

/// One append-only entry in a battle log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleEvent {
    /// Epoch seconds
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: BattleEventKind,
    /// Which participant acted (or was acted upon, for defense breaks)
    pub actor: Side,
    /// Kind-specific payload
    pub data: serde_json::Value,
}

/// A battle between two users.
#[derive(Debug, Clone, PartialEq)]
pub struct Battle {
    pub id: i64,
    pub attacker_id: i64,
    pub attackee_id: i64,
    /// Epoch seconds
    pub battle_start_time: i64,
    /// Epoch seconds; None while the battle is active
    pub battle_end_time: Option<i64>,
    pub winner_id: Option<i64>,
    pub loser_id: Option<i64>,
    /// Weapon key to epoch seconds of next-ready time
    pub attacker_weapon_cooldowns: HashMap<String, i64>,
    pub attackee_weapon_cooldowns: HashMap<String, i64>,
    /// Snapshot taken at creation; never mutated afterwards
    pub attacker_start_stats: BattleStats,
    pub attackee_start_stats: BattleStats,
    /// Populated exactly once, when the battle ends
    pub attacker_end_stats: Option<BattleStats>,
    pub attackee_end_stats: Option<BattleStats>,
    pub battle_log: Vec<BattleEvent>,
    pub attacker_total_damage: i64,
    pub attackee_total_damage: i64,
}

impl Battle {
    /// A fresh battle opening with a `battle_started` log entry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i64,
        attacker_id: i64,
        attackee_id: i64,
        attacker_start_stats: BattleStats,
        attackee_start_stats: BattleStats,
        attacker_weapon_cooldowns: HashMap<String, i64>,
        attackee_weapon_cooldowns: HashMap<String, i64>,
        now: i64,
    ) -> Self {
        let mut battle = Self {
            id,
            attacker_id,
            attackee_id,
            battle_start_time: now,
            battle_end_time: None,
            winner_id: None,
            loser_id: None,
            attacker_weapon_cooldowns,
            attackee_weapon_cooldowns,
            attacker_start_stats,
            attackee_start_stats,
            attacker_end_stats: None,
            attackee_end_stats: None,
            battle_log: Vec::new(),
            attacker_total_damage: 0,
            attackee_total_damage: 0,
        };
        battle.push_event(BattleEvent {
            timestamp: now,
            kind: BattleEventKind::BattleStarted,
            actor: Side::Attacker,
            data: serde_json::json!({
                "attacker_id": attacker_id,
                "attackee_id": attackee_id,
            }),
        });
        battle
    }

    /// A battle is active until its end time is set.
    pub fn is_active(&self) -> bool {
        self.battle_end_time.is_none()
    }

    /// Role of the given user in this battle, if they participate.
    pub fn side_of(&self, user_id: i64) -> Option<Side> {
        if user_id == self.attacker_id {
            Some(Side::Attacker)
        } else if user_id == self.attackee_id {
            Some(Side::Attackee)
        } else {
            None
        }
    }

    /// User id of the given side.
    pub fn participant(&self, side: Side) -> i64 {
        match side {
            Side::Attacker => self.attacker_id,
            Side::Attackee => self.attackee_id,
        }
    }

    /// Cooldown map of the given side.
    pub fn cooldowns(&self, side: Side) -> &HashMap<String, i64> {
        match side {
            Side::Attacker => &self.attacker_weapon_cooldowns,
            Side::Attackee => &self.attackee_weapon_cooldowns,
        }
    }

    /// Mutable cooldown map of the given side.
    pub fn cooldowns_mut(&mut self, side: Side) -> &mut HashMap<String, i64> {
        match side {
            Side::Attacker => &mut self.attacker_weapon_cooldowns,
            Side::Attackee => &mut self.attackee_weapon_cooldowns,
        }
    }

    /// Creation-time snapshot of the given side.
    pub fn start_stats(&self, side: Side) -> &BattleStats {
        match side {
            Side::Attacker => &self.attacker_start_stats,
            Side::Attackee => &self.attackee_start_stats,
        }
    }

    /// End-of-battle snapshot of the given side, if the battle ended.
    pub fn end_stats(&self, side: Side) -> Option<&BattleStats> {
        match side {
            Side::Attacker => self.attacker_end_stats.as_ref(),
            Side::Attackee => self.attackee_end_stats.as_ref(),
        }
    }

    /// Total damage dealt by the given side.
    pub fn total_damage(&self, side: Side) -> i64 {
        match side {
            Side::Attacker => self.attacker_total_damage,
            Side::Attackee => self.attackee_total_damage,
        }
    }

    /// Add to the running damage total of the given side.
    pub fn add_total_damage(&mut self, side: Side, delta: i64) {
        match side {
            Side::Attacker => self.attacker_total_damage += delta,
            Side::Attackee => self.attackee_total_damage += delta,
        }
    }

    /// Append to the battle log. Timestamps must not go backwards.
    pub fn push_event(&mut self, event: BattleEvent) {
        debug_assert!(
            self.battle_log
                .last()
                .map_or(true, |last| last.timestamp <= event.timestamp),
            "battle log timestamps must be non-decreasing"
        );
        self.battle_log.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::user::TechCounts;

    fn combat_user(id: i64, name: &str) -> User {
        let mut user = User::new(id, name, "hash", 0);
        user.tech_counts = TechCounts {
            pulse_laser: 2,
            ship_hull: 3,
            kinetic_armor: 2,
            energy_shield: 1,
            ..TechCounts::default()
        };
        user.hull_current = 300;
        user.armor_current = 150;
        user.shield_current = 100;
        user
    }

    fn test_battle() -> Battle {
        let attacker = combat_user(1, "vega");
        let attackee = combat_user(2, "rigel");
        Battle::new(
            10,
            1,
            2,
            BattleStats::snapshot_of(&attacker),
            BattleStats::snapshot_of(&attackee),
            HashMap::new(),
            HashMap::new(),
            1000,
        )
    }

    #[test]
    fn test_snapshot_captures_current_and_max() {
        let user = combat_user(1, "vega");
        let stats = BattleStats::snapshot_of(&user);

        assert_eq!(stats.hull, LayerStat { current: 300, max: 300 });
        assert_eq!(stats.armor, LayerStat { current: 150, max: 200 });
        assert_eq!(stats.shield, LayerStat { current: 100, max: 100 });

        // Only owned weapons appear.
        assert_eq!(stats.weapons.len(), 1);
        let laser = &stats.weapons["pulse_laser"];
        assert_eq!(laser.count, 2);
        assert_eq!(laser.damage, 10);
        assert_eq!(laser.cooldown, 5);
    }

    #[test]
    fn test_new_battle_opens_with_started_event() {
        let battle = test_battle();
        assert!(battle.is_active());
        assert_eq!(battle.battle_log.len(), 1);
        assert_eq!(battle.battle_log[0].kind, BattleEventKind::BattleStarted);
        assert_eq!(battle.battle_log[0].timestamp, 1000);
    }

    #[test]
    fn test_side_lookup() {
        let battle = test_battle();
        assert_eq!(battle.side_of(1), Some(Side::Attacker));
        assert_eq!(battle.side_of(2), Some(Side::Attackee));
        assert_eq!(battle.side_of(3), None);
        assert_eq!(battle.participant(Side::Attacker), 1);
        assert_eq!(battle.participant(Side::Attackee), 2);
        assert_eq!(Side::Attacker.opponent(), Side::Attackee);
    }

    #[test]
    fn test_total_damage_accumulates_per_side() {
        let mut battle = test_battle();
        battle.add_total_damage(Side::Attacker, 25);
        battle.add_total_damage(Side::Attacker, 5);
        battle.add_total_damage(Side::Attackee, 7);
        assert_eq!(battle.total_damage(Side::Attacker), 30);
        assert_eq!(battle.total_damage(Side::Attackee), 7);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = BattleEvent {
            timestamp: 5,
            kind: BattleEventKind::ShieldBroken,
            actor: Side::Attackee,
            data: serde_json::json!({"layer": "shield"}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "shield_broken");
        assert_eq!(json["actor"], "attackee");

        let back: BattleEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_stats_roundtrip_as_json() {
        let user = combat_user(1, "vega");
        let stats = BattleStats::snapshot_of(&user);
        let json = serde_json::to_string(&stats).unwrap();
        let back: BattleStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}

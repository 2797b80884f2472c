//! Battle engine
//!
//! Pure combat resolution over one battle and its two participants. All
//! state lives in the arguments; nothing here touches the store or any
//! lock. Callers hold BATTLE (and USER when a participant is mutated).
//!
//! Scheduling is deterministic: when weapons on both sides are ready at
//! the same instant, the attacker fires first, and within one side the
//! first ready weapon in catalog order wins.

use crate::model::{
    Battle, BattleEvent, BattleEventKind, Side, User, WeaponStats, WEAPON_ORDER,
};

/// Accuracy, ECM, and spread tuning hooks. Neutral values leave hits equal
/// to the weapon count and damage at full strength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TechModifiers {
    /// Fraction of shots that connect, 1.0 = all
    pub accuracy: f64,
    /// Fraction of shots jammed away, 0.0 = none
    pub ecm: f64,
    /// Damage multiplier, 1.0 = full
    pub spread: f64,
}

impl TechModifiers {
    /// No tuning: every shot hits for full damage.
    pub const fn neutral() -> Self {
        Self {
            accuracy: 1.0,
            ecm: 0.0,
            spread: 1.0,
        }
    }
}

impl Default for TechModifiers {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Weapon keys of `side` that are owned and off cooldown at `now`, in
/// catalog order.
pub fn ready_weapons(battle: &Battle, side: Side, now: i64) -> Vec<String> {
    let stats = battle.start_stats(side);
    let cooldowns = battle.cooldowns(side);
    WEAPON_ORDER
        .iter()
        .filter(|key| stats.weapons.get(**key).map_or(false, |w| w.count > 0))
        .filter(|key| cooldowns.get(**key).copied().unwrap_or(0) <= now)
        .map(|key| key.to_string())
        .collect()
}

/// The next weapon to fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextShot {
    pub side: Side,
    pub weapon_key: String,
    /// 0 when the weapon can fire at `now`; otherwise seconds to wait
    pub time_until_ready: i64,
}

/// Choose the next firing weapon. Ready weapons win immediately, attacker
/// before attackee; otherwise the weapon with the smallest wait across
/// both sides is reported with its positive `time_until_ready`. `None`
/// means neither side owns a weapon.
pub fn next_shot(battle: &Battle, now: i64) -> Option<NextShot> {
    for side in [Side::Attacker, Side::Attackee] {
        if let Some(weapon_key) = ready_weapons(battle, side, now).into_iter().next() {
            return Some(NextShot {
                side,
                weapon_key,
                time_until_ready: 0,
            });
        }
    }

    let mut soonest: Option<NextShot> = None;
    for side in [Side::Attacker, Side::Attackee] {
        let stats = battle.start_stats(side);
        let cooldowns = battle.cooldowns(side);
        for key in WEAPON_ORDER {
            if stats.weapons.get(key).map_or(true, |w| w.count <= 0) {
                continue;
            }
            let wait = cooldowns.get(key).copied().unwrap_or(0) - now;
            if soonest.as_ref().map_or(true, |s| wait < s.time_until_ready) {
                soonest = Some(NextShot {
                    side,
                    weapon_key: key.to_string(),
                    time_until_ready: wait,
                });
            }
        }
    }
    soonest
}

/// Damage computed for one shot, split across the defender's layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageBreakdown {
    /// Shots that connected
    pub hits: i64,
    /// Total damage before layering
    pub total: i64,
    pub shield_damage: i64,
    pub armor_damage: i64,
    pub hull_damage: i64,
}

/// Compute one volley's damage against the defender's current layers.
/// Damage drains shield first, then armor, then hull; each layer absorbs
/// at most what it has left.
pub fn calculate_damage(
    weapon: &WeaponStats,
    defender: &User,
    modifiers: &TechModifiers,
) -> DamageBreakdown {
    let connect_rate = (modifiers.accuracy * (1.0 - modifiers.ecm)).clamp(0.0, 1.0);
    let hits = ((weapon.count as f64) * connect_rate).round() as i64;
    let total = ((hits * weapon.damage) as f64 * modifiers.spread).round() as i64;

    let shield_damage = total.min(defender.shield_current.max(0));
    let remaining = total - shield_damage;
    let armor_damage = remaining.min(defender.armor_current.max(0));
    let remaining = remaining - armor_damage;
    let hull_damage = remaining.min(defender.hull_current.max(0));

    DamageBreakdown {
        hits,
        total,
        shield_damage,
        armor_damage,
        hull_damage,
    }
}

/// Per-layer damage actually applied, with what each layer has left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedDamage {
    pub shield_damage: i64,
    pub armor_damage: i64,
    pub hull_damage: i64,
    pub shield_remaining: i64,
    pub armor_remaining: i64,
    pub hull_remaining: i64,
}

impl AppliedDamage {
    /// Total damage absorbed across all layers.
    pub fn total(&self) -> i64 {
        self.shield_damage + self.armor_damage + self.hull_damage
    }
}

/// Drain `total_damage` from the defender, shield then armor then hull,
/// never taking a layer below zero. Start and end stats are untouched;
/// only the live current values move.
pub fn apply_damage(defender: &mut User, total_damage: i64) -> AppliedDamage {
    let shield_damage = total_damage.min(defender.shield_current.max(0));
    defender.shield_current -= shield_damage;
    let remaining = total_damage - shield_damage;

    let armor_damage = remaining.min(defender.armor_current.max(0));
    defender.armor_current -= armor_damage;
    let remaining = remaining - armor_damage;

    let hull_damage = remaining.min(defender.hull_current.max(0));
    defender.hull_current -= hull_damage;

    AppliedDamage {
        shield_damage,
        armor_damage,
        hull_damage,
        shield_remaining: defender.shield_current,
        armor_remaining: defender.armor_current,
        hull_remaining: defender.hull_current,
    }
}

/// Set a weapon's next-ready time to `now` plus its cooldown from the
/// side's start-stats snapshot.
pub fn update_cooldown(battle: &mut Battle, side: Side, weapon_key: &str, now: i64) {
    let cooldown = battle
        .start_stats(side)
        .weapons
        .get(weapon_key)
        .map_or(0, |w| w.cooldown);
    battle
        .cooldowns_mut(side)
        .insert(weapon_key.to_string(), now + cooldown);
}

/// The `shot_fired` log entry for one volley.
pub fn shot_fired_event(
    shooter: Side,
    weapon_key: &str,
    breakdown: &DamageBreakdown,
    now: i64,
) -> BattleEvent {
    BattleEvent {
        timestamp: now,
        kind: BattleEventKind::ShotFired,
        actor: shooter,
        data: serde_json::json!({
            "weapon": weapon_key,
            "hits": breakdown.hits,
            "damage": breakdown.total,
        }),
    }
}

/// Log entries for applied damage: one `damage_dealt` per drained layer
/// (shield, armor, hull order) followed by break events for layers that
/// just reached zero.
pub fn damage_events(shooter: Side, applied: &AppliedDamage, now: i64) -> Vec<BattleEvent> {
    let mut events = Vec::new();
    let layers = [
        ("shield", applied.shield_damage),
        ("armor", applied.armor_damage),
        ("hull", applied.hull_damage),
    ];
    for (layer, amount) in layers {
        if amount > 0 {
            events.push(BattleEvent {
                timestamp: now,
                kind: BattleEventKind::DamageDealt,
                actor: shooter,
                data: serde_json::json!({"layer": layer, "amount": amount}),
            });
        }
    }

    let breaks = [
        (
            BattleEventKind::ShieldBroken,
            applied.shield_damage,
            applied.shield_remaining,
        ),
        (
            BattleEventKind::ArmorBroken,
            applied.armor_damage,
            applied.armor_remaining,
        ),
        (
            BattleEventKind::HullDestroyed,
            applied.hull_damage,
            applied.hull_remaining,
        ),
    ];
    for (kind, damage, remaining) in breaks {
        if damage > 0 && remaining == 0 {
            events.push(BattleEvent {
                timestamp: now,
                kind,
                actor: shooter,
                data: serde_json::Value::Null,
            });
        }
    }
    events
}

/// What one executed turn did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub side: Side,
    pub weapon_key: String,
    pub applied: AppliedDamage,
}

/// Execute at most one shot at `now`: pick the next weapon, and if it is
/// ready, apply its damage to the opposing user, advance the cooldown,
/// and log the shot. Returns `None` when nothing can fire yet.
pub fn execute_turn(
    battle: &mut Battle,
    attacker: &mut User,
    attackee: &mut User,
    now: i64,
) -> Option<TurnReport> {
    let shot = next_shot(battle, now)?;
    if shot.time_until_ready > 0 {
        return None;
    }

    let weapon = *battle.start_stats(shot.side).weapons.get(&shot.weapon_key)?;
    let defender = match shot.side {
        Side::Attacker => &mut *attackee,
        Side::Attackee => &mut *attacker,
    };

    let breakdown = calculate_damage(&weapon, defender, &TechModifiers::neutral());
    let applied = apply_damage(defender, breakdown.total);

    battle.add_total_damage(shot.side, applied.total());
    battle.push_event(shot_fired_event(shot.side, &shot.weapon_key, &breakdown, now));
    for event in damage_events(shot.side, &applied, now) {
        battle.push_event(event);
    }
    update_cooldown(battle, shot.side, &shot.weapon_key, now);

    Some(TurnReport {
        side: shot.side,
        weapon_key: shot.weapon_key,
        applied,
    })
}

/// A battle is over as soon as either participant's hull is gone.
pub fn is_over(attacker: &User, attackee: &User) -> bool {
    attacker.hull_current <= 0 || attackee.hull_current <= 0
}

/// Winner and loser of a finished battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BattleOutcome {
    pub winner_id: i64,
    pub loser_id: i64,
}

/// Resolve the outcome once [`is_over`] holds. The participant with no
/// hull loses; if both are gone the attacker loses, since the defender's
/// final shot resolves with priority.
pub fn outcome(battle: &Battle, attacker: &User, attackee: &User) -> Option<BattleOutcome> {
    if attacker.hull_current <= 0 {
        Some(BattleOutcome {
            winner_id: battle.attackee_id,
            loser_id: battle.attacker_id,
        })
    } else if attackee.hull_current <= 0 {
        Some(BattleOutcome {
            winner_id: battle.attacker_id,
            loser_id: battle.attackee_id,
        })
    } else {
        None
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::model::TechCounts;
    use proptest::prelude::*;

    fn defender_with(shield: i64, armor: i64, hull: i64) -> User {
        let mut user = User::new(1, "prop", "hash", 0);
        user.tech_counts = TechCounts {
            ship_hull: 100,
            kinetic_armor: 100,
            energy_shield: 100,
            ..TechCounts::default()
        };
        user.shield_current = shield;
        user.armor_current = armor;
        user.hull_current = hull;
        user
    }

    proptest! {
        #[test]
        fn prop_damage_is_conserved_and_layers_stay_non_negative(
            shield in 0i64..10_000,
            armor in 0i64..10_000,
            hull in 0i64..10_000,
            damage in 0i64..40_000,
        ) {
            let mut defender = defender_with(shield, armor, hull);
            let applied = apply_damage(&mut defender, damage);

            // No layer over-drains and none goes negative.
            prop_assert!(applied.shield_damage <= shield);
            prop_assert!(applied.armor_damage <= armor);
            prop_assert!(applied.hull_damage <= hull);
            prop_assert!(defender.shield_current >= 0);
            prop_assert!(defender.armor_current >= 0);
            prop_assert!(defender.hull_current >= 0);

            // Total absorbed equals the lesser of damage and what existed.
            prop_assert_eq!(applied.total(), damage.min(shield + armor + hull));

            // Outer layers drain before inner ones take anything.
            if applied.armor_damage > 0 {
                prop_assert_eq!(defender.shield_current, 0);
            }
            if applied.hull_damage > 0 {
                prop_assert_eq!(defender.armor_current, 0);
            }
        }

        #[test]
        fn prop_wrap_lands_in_extent(value in -1e7f64..1e7, extent in 1.0f64..1e5) {
            let wrapped = crate::model::wrap(value, extent);
            prop_assert!(wrapped >= 0.0);
            prop_assert!(wrapped < extent);
        }

        #[test]
        fn prop_toroidal_distance_symmetric_and_bounded(
            ax in 0.0f64..5000.0,
            ay in 0.0f64..5000.0,
            bx in 0.0f64..5000.0,
            by in 0.0f64..5000.0,
        ) {
            let size = crate::model::WorldSize::new(5000.0, 5000.0);
            let d1 = crate::model::toroidal_distance((ax, ay), (bx, by), size);
            let d2 = crate::model::toroidal_distance((bx, by), (ax, ay), size);
            prop_assert!((d1 - d2).abs() < 1e-9);

            let half_diagonal = ((2500.0f64).powi(2) * 2.0).sqrt();
            prop_assert!(d1 <= half_diagonal + 1e-9);
        }
    }
}

//! Battle scheduler
//!
//! Periodic driver over the battle cache. Each tick processes every active
//! battle under one BATTLE-rooted critical section: all weapons ready at
//! now fire (attacker first), notifications go out, and finished battles
//! resolve with end-stat snapshots, user cleanup, and a loser teleport.
//!
//! Stop is cooperative: the loop exits between ticks and an in-flight tick
//! always runs to completion, so no shot is ever half applied.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::battle::engine::{self, BattleOutcome, TechModifiers};
use crate::cache::{
    BattleCache, BattleCacheSession, MessageCache, UserCache, UserCacheSession, WorldCache,
};
use crate::config::ServerConfig;
use crate::error::{GameError, Result};
use crate::model::{
    opposite_point, toroidal_distance, BattleEvent, BattleEventKind, BattleStats, Side, User,
};
use crate::time::SharedClock;

/// Human-facing name of a weapon key.
fn weapon_label(key: &str) -> String {
    key.replace('_', " ")
}

/// Periodic driver that advances every active battle.
pub struct BattleScheduler {
    battles: Arc<BattleCache>,
    users: Arc<UserCache>,
    world: Arc<WorldCache>,
    messages: Arc<MessageCache>,
    clock: SharedClock,
    config: ServerConfig,
}

impl BattleScheduler {
    /// Wire the scheduler to the caches it drives.
    pub fn new(
        battles: Arc<BattleCache>,
        users: Arc<UserCache>,
        world: Arc<WorldCache>,
        messages: Arc<MessageCache>,
        clock: SharedClock,
        config: ServerConfig,
    ) -> Self {
        Self {
            battles,
            users,
            world,
            messages,
            clock,
            config,
        }
    }

    /// Spawn the tick loop. It stops after the in-flight tick once the
    /// shutdown watch flips to true.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Run ticks until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        log::info!(
            "battle scheduler running, tick every {} ms",
            self.config.tick_interval_ms
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        log::error!("battle tick failed: {err}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("battle scheduler stopped");
    }

    /// Process every active battle once. A storage failure aborts the tick
    /// in progress; the next tick starts fresh.
    pub async fn tick(&self) -> Result<()> {
        let mut battles = self.battles.lock().await;
        let active = battles.get_active();
        if active.is_empty() {
            return Ok(());
        }

        for battle in active {
            self.process_battle(&mut battles, battle.id).await?;
        }
        Ok(())
    }

    /// Fire everything that is ready in one battle, then resolve it if a
    /// hull is gone.
    async fn process_battle(
        &self,
        battles: &mut BattleCacheSession<'_>,
        battle_id: i64,
    ) -> Result<()> {
        let mut users = self.users.lock_after(battles.as_held()).await?;
        let now = self.clock.now_secs();
        let max_iterations = self.config.battle_max_iterations_per_tick;
        let mut iterations = 0u32;

        loop {
            let Some(battle) = battles.load_if_needed(battle_id).await? else {
                return Ok(());
            };
            if !battle.is_active() {
                return Ok(());
            }

            // Everything ready at now fires, attacker's weapons first.
            let mut volleys = Vec::new();
            for side in [Side::Attacker, Side::Attackee] {
                for weapon_key in engine::ready_weapons(&battle, side, now) {
                    volleys.push((side, weapon_key));
                }
            }
            if volleys.is_empty() {
                return Ok(());
            }

            for (side, weapon_key) in volleys {
                if iterations >= max_iterations {
                    break;
                }
                iterations += 1;
                self.fire_weapon(battles, &mut users, battle_id, side, &weapon_key, now)
                    .await?;
            }

            let attacker = users.get_by_id(battle.attacker_id).await?;
            let attackee = users.get_by_id(battle.attackee_id).await?;
            if engine::is_over(&attacker, &attackee) {
                let outcome = engine::outcome(&battle, &attacker, &attackee)
                    .expect("is_over implies an outcome");
                return self
                    .resolve_battle(battles, &mut users, battle_id, outcome, now)
                    .await;
            }

            if iterations >= max_iterations {
                log::warn!(
                    "battle {battle_id}: hit the {max_iterations}-shot tick cap, deferring to next tick"
                );
                return Ok(());
            }
            // Zero-cooldown weapons may be ready again; go around.
        }
    }

    /// Resolve one weapon firing: damage, events, notifications, cooldown.
    /// Unknown weapons and vanished users log and skip.
    async fn fire_weapon(
        &self,
        battles: &mut BattleCacheSession<'_>,
        users: &mut UserCacheSession<'_>,
        battle_id: i64,
        side: Side,
        weapon_key: &str,
        now: i64,
    ) -> Result<()> {
        let Some(battle) = battles.load_if_needed(battle_id).await? else {
            return Ok(());
        };
        let shooter_id = battle.participant(side);
        let target_id = battle.participant(side.opponent());

        let Some(weapon) = battle.start_stats(side).weapons.get(weapon_key).copied() else {
            log::warn!("battle {battle_id}: unknown weapon {weapon_key} for user {shooter_id}, skipping");
            return Ok(());
        };

        let shooter = match users.get_by_id(shooter_id).await {
            Ok(user) => user,
            Err(GameError::NotFound(_)) => {
                log::warn!("battle {battle_id}: shooter {shooter_id} missing, skipping shot");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let mut target = match users.get_by_id(target_id).await {
            Ok(user) => user,
            Err(GameError::NotFound(_)) => {
                log::warn!("battle {battle_id}: target {target_id} missing, skipping shot");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let breakdown = engine::calculate_damage(&weapon, &target, &TechModifiers::neutral());
        let label = weapon_label(weapon_key);

        if breakdown.hits == 0 {
            battles
                .add_event(
                    battle_id,
                    engine::shot_fired_event(side, weapon_key, &breakdown, now),
                )
                .await?;
            let mut messages = self.messages.lock_after(users.as_held()).await?;
            messages
                .create_message(
                    shooter_id,
                    format!("N: Your {label} missed {}.", target.username),
                )
                .await?;
            messages
                .create_message(
                    target_id,
                    format!("P: {} fired a {label} at you and missed.", shooter.username),
                )
                .await?;
            drop(messages);
            battles
                .set_weapon_cooldown(battle_id, shooter_id, weapon_key, now + weapon.cooldown)
                .await?;
            return Ok(());
        }

        let applied = engine::apply_damage(&mut target, breakdown.total);
        users.update_user(target.clone()).await?;

        battles
            .update_total_damage(battle_id, shooter_id, applied.total())
            .await?;
        battles
            .add_event(
                battle_id,
                engine::shot_fired_event(side, weapon_key, &breakdown, now),
            )
            .await?;
        for event in engine::damage_events(side, &applied, now) {
            battles.add_event(battle_id, event).await?;
        }

        // Both notifications for this shot land before its cooldown moves.
        let defense_summary = format!(
            "Hull {}, Armor {}, Shield {}",
            applied.hull_remaining, applied.armor_remaining, applied.shield_remaining
        );
        let mut messages = self.messages.lock_after(users.as_held()).await?;
        messages
            .create_message(
                shooter_id,
                format!(
                    "P: You fired {} {label}(s) at {} for {} damage. Enemy defenses: {}.",
                    breakdown.hits, target.username, applied.total(), defense_summary
                ),
            )
            .await?;
        messages
            .create_message(
                target_id,
                format!(
                    "N: {} hit you with {} {label}(s) for {} damage. Your defenses: {}.",
                    shooter.username, breakdown.hits, applied.total(), defense_summary
                ),
            )
            .await?;
        drop(messages);

        battles
            .set_weapon_cooldown(battle_id, shooter_id, weapon_key, now + weapon.cooldown)
            .await?;
        Ok(())
    }

    /// Close out a finished battle: end stats from live users, the
    /// `battle_ended` log entry, user cleanup, loser teleport, and the
    /// victory/defeat messages.
    async fn resolve_battle(
        &self,
        battles: &mut BattleCacheSession<'_>,
        users: &mut UserCacheSession<'_>,
        battle_id: i64,
        outcome: BattleOutcome,
        now: i64,
    ) -> Result<()> {
        let Some(battle) = battles.load_if_needed(battle_id).await? else {
            return Ok(());
        };
        let attacker = users.get_by_id(battle.attacker_id).await?;
        let attackee = users.get_by_id(battle.attackee_id).await?;

        // End stats reflect the live defense state; weapon loadouts carry
        // over from the start snapshot.
        let mut attacker_end = BattleStats::snapshot_of(&attacker);
        attacker_end.weapons = battle.attacker_start_stats.weapons.clone();
        let mut attackee_end = BattleStats::snapshot_of(&attackee);
        attackee_end.weapons = battle.attackee_start_stats.weapons.clone();

        battles
            .add_event(
                battle_id,
                BattleEvent {
                    timestamp: now,
                    kind: BattleEventKind::BattleEnded,
                    actor: battle
                        .side_of(outcome.winner_id)
                        .unwrap_or(Side::Attacker),
                    data: serde_json::json!({
                        "winner_id": outcome.winner_id,
                        "loser_id": outcome.loser_id,
                    }),
                },
            )
            .await?;

        battles
            .end(
                battle_id,
                outcome.winner_id,
                outcome.loser_id,
                attacker_end,
                attackee_end,
            )
            .await?;

        for mut user in [attacker.clone(), attackee.clone()] {
            user.in_battle = false;
            user.current_battle_id = None;
            users.update_user(user).await?;
        }

        let (winner, loser) = if outcome.winner_id == attacker.id {
            (&attacker, &attackee)
        } else {
            (&attackee, &attacker)
        };
        self.teleport_loser(users, winner, loser).await?;

        let mut messages = self.messages.lock_after(users.as_held()).await?;
        messages
            .create_message(
                outcome.winner_id,
                format!("P: You defeated {} in battle.", loser.username),
            )
            .await?;
        messages
            .create_message(
                outcome.loser_id,
                format!(
                    "N: You were defeated by {}. Your ship drifted to a distant sector.",
                    winner.username
                ),
            )
            .await?;
        Ok(())
    }

    /// Move the loser's ship to a random spot at least a third of the
    /// world away from the winner, and stop it. Falls back to the
    /// toroidally opposite point when sampling fails.
    async fn teleport_loser(
        &self,
        users: &UserCacheSession<'_>,
        winner: &User,
        loser: &User,
    ) -> Result<()> {
        let (Some(winner_ship_id), Some(loser_ship_id)) = (winner.ship_id, loser.ship_id) else {
            log::warn!(
                "battle between {} and {}: a ship is missing, skipping teleport",
                winner.id,
                loser.id
            );
            return Ok(());
        };

        let mut world_session = self.world.lock_after(users.as_held()).await?;
        let mut world = world_session.get_world().await?;
        let Some(winner_position) = world.object(winner_ship_id).map(|o| o.position()) else {
            log::warn!("winner ship {winner_ship_id} not in world, skipping teleport");
            return Ok(());
        };

        let min_distance = self.config.teleport_min_distance();
        let size = world.size;
        let destination = {
            let mut rng = rand::thread_rng();
            let mut found = None;
            for _ in 0..100 {
                let candidate = (
                    rng.gen_range(0.0..size.width),
                    rng.gen_range(0.0..size.height),
                );
                if toroidal_distance(candidate, winner_position, size) >= min_distance {
                    found = Some(candidate);
                    break;
                }
            }
            found.unwrap_or_else(|| opposite_point(winner_position, size))
        };

        let now_ms = self.clock.now_ms();
        let Some(ship) = world.object_mut(loser_ship_id) else {
            log::warn!("loser ship {loser_ship_id} not in world, skipping teleport");
            return Ok(());
        };
        ship.x = destination.0;
        ship.y = destination.1;
        ship.speed = 0.0;
        ship.last_position_update_ms = now_ms;

        world_session.update_world(world).await?;
        Ok(())
    }
}

//! Battle cache
//!
//! The only writer of battle rows. Active battles live in
//! `battle id -> Battle` with a `user id -> battle id` index (two entries
//! per battle). Ended battles are flushed synchronously and drop out of
//! the cache; history reads go straight to the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cache::user_cache::UserCacheSession;
use crate::cache::{CacheStats, StatsCell};
use crate::error::{GameError, Result};
use crate::locking::{HeldLock, HierGuard, HierMutex, LockLevel, LockStats};
use crate::model::{Battle, BattleEvent, BattleStats};
use crate::store::Store;
use crate::time::SharedClock;

#[derive(Default)]
struct BattleCacheInner {
    by_id: HashMap<i64, Battle>,
    /// Participant to active battle; two entries per battle
    by_user: HashMap<i64, i64>,
    dirty: HashSet<i64>,
}

/// Write-back cache over the battles table.
pub struct BattleCache {
    inner: HierMutex<BattleCacheInner>,
    store: Arc<Store>,
    clock: SharedClock,
    write_back: bool,
    stats: StatsCell,
}

impl BattleCache {
    /// Create the cache. `write_back = false` flushes every mutation
    /// synchronously.
    pub fn new(store: Arc<Store>, clock: SharedClock, write_back: bool) -> Self {
        Self {
            inner: HierMutex::new(LockLevel::Battle, BattleCacheInner::default()),
            store,
            clock,
            write_back,
            stats: StatsCell::default(),
        }
    }

    /// Acquire the BATTLE lock as the root of a critical section. BATTLE
    /// is the lowest level, so it is always a root: there is no
    /// `lock_after` here.
    pub async fn lock(&self) -> BattleCacheSession<'_> {
        BattleCacheSession {
            cache: self,
            guard: self.inner.lock().await,
        }
    }

    /// Hit/miss/flush counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// BATTLE lock acquisition counters.
    pub fn lock_stats(&self) -> LockStats {
        self.inner.stats()
    }
}

/// Operations available while the BATTLE lock is held.
pub struct BattleCacheSession<'a> {
    cache: &'a BattleCache,
    guard: HierGuard<'a, BattleCacheInner>,
}

impl BattleCacheSession<'_> {
    /// The held BATTLE guard, for ordering later acquisitions.
    pub fn as_held(&self) -> &dyn HeldLock {
        &self.guard
    }

    /// Open a battle between two users. Rejects with `Conflict` when
    /// either participant already has an active battle. Both users are
    /// flipped into battle state through the supplied USER session.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &mut self,
        users: &mut UserCacheSession<'_>,
        attacker_id: i64,
        attackee_id: i64,
        attacker_start_stats: BattleStats,
        attackee_start_stats: BattleStats,
        attacker_cooldowns: HashMap<String, i64>,
        attackee_cooldowns: HashMap<String, i64>,
    ) -> Result<Battle> {
        for user_id in [attacker_id, attackee_id] {
            if let Some(battle_id) = self.guard.by_user.get(&user_id) {
                return Err(GameError::Conflict(format!(
                    "user {user_id} is already in battle {battle_id}"
                )));
            }
            if let Some(battle) = self
                .cache
                .store
                .load_active_battle_for_user(&self.guard, user_id)
                .await?
            {
                return Err(GameError::Conflict(format!(
                    "user {user_id} is already in battle {}",
                    battle.id
                )));
            }
        }

        let attacker = users.get_by_id(attacker_id).await?;
        let attackee = users.get_by_id(attackee_id).await?;
        for user in [&attacker, &attackee] {
            if user.in_battle {
                return Err(GameError::Conflict(format!(
                    "user {} is already in battle",
                    user.id
                )));
            }
        }

        let now = self.cache.clock.now_secs();
        let mut battle = Battle::new(
            0,
            attacker_id,
            attackee_id,
            attacker_start_stats,
            attackee_start_stats,
            attacker_cooldowns,
            attackee_cooldowns,
            now,
        );
        battle.id = self.cache.store.insert_battle(users.as_held(), &battle).await?;

        self.guard.by_id.insert(battle.id, battle.clone());
        self.guard.by_user.insert(attacker_id, battle.id);
        self.guard.by_user.insert(attackee_id, battle.id);

        for mut user in [attacker.clone(), attackee.clone()] {
            user.in_battle = true;
            user.current_battle_id = Some(battle.id);
            if let Err(err) = users.update_user(user).await {
                // Undo what this call built up so no half-created battle
                // stays observable, then neutralize the already-inserted
                // row as ended.
                self.guard.by_id.remove(&battle.id);
                self.guard.by_user.remove(&attacker_id);
                self.guard.by_user.remove(&attackee_id);
                users.set_user(attacker.clone());
                users.set_user(attackee.clone());

                let mut orphan = battle.clone();
                orphan.battle_end_time = Some(now);
                if let Err(cleanup_err) = self
                    .cache
                    .store
                    .update_battle(users.as_held(), &orphan)
                    .await
                {
                    log::error!(
                        "failed to neutralize battle {} after create error: {cleanup_err}",
                        battle.id
                    );
                }
                return Err(err);
            }
        }

        log::info!(
            "battle {} started: {} vs {}",
            battle.id,
            attacker_id,
            attackee_id
        );
        Ok(battle)
    }

    /// Battle by id, loading from the store when not cached. Only active
    /// battles enter the cache.
    pub async fn load_if_needed(&mut self, battle_id: i64) -> Result<Option<Battle>> {
        if let Some(battle) = self.guard.by_id.get(&battle_id) {
            self.cache.stats.record_hit();
            return Ok(Some(battle.clone()));
        }
        self.cache.stats.record_miss();
        let Some(battle) = self.cache.store.load_battle(&self.guard, battle_id).await? else {
            return Ok(None);
        };
        if battle.is_active() {
            self.guard.by_user.insert(battle.attacker_id, battle.id);
            self.guard.by_user.insert(battle.attackee_id, battle.id);
            self.guard.by_id.insert(battle.id, battle.clone());
        }
        Ok(Some(battle))
    }

    /// Snapshot of all active battles in the cache, id order.
    pub fn get_active(&self) -> Vec<Battle> {
        let mut battles: Vec<Battle> = self
            .guard
            .by_id
            .values()
            .filter(|b| b.is_active())
            .cloned()
            .collect();
        battles.sort_by_key(|b| b.id);
        battles
    }

    /// The user's active battle, from the index or the store.
    pub async fn get_ongoing_for_user(&mut self, user_id: i64) -> Result<Option<Battle>> {
        if let Some(&battle_id) = self.guard.by_user.get(&user_id) {
            self.cache.stats.record_hit();
            return Ok(self.guard.by_id.get(&battle_id).cloned());
        }
        self.cache.stats.record_miss();
        let Some(battle) = self
            .cache
            .store
            .load_active_battle_for_user(&self.guard, user_id)
            .await?
        else {
            return Ok(None);
        };
        self.guard.by_user.insert(battle.attacker_id, battle.id);
        self.guard.by_user.insert(battle.attackee_id, battle.id);
        self.guard.by_id.insert(battle.id, battle.clone());
        Ok(Some(battle))
    }

    /// Full battle history for a user from the store, newest first.
    pub async fn get_battles_for_user(&mut self, user_id: i64) -> Result<Vec<Battle>> {
        self.cache.store.load_battles_for_user(&self.guard, user_id).await
    }

    /// Append an event to a battle's log.
    pub async fn add_event(&mut self, battle_id: i64, event: BattleEvent) -> Result<()> {
        self.ensure_cached(battle_id).await?;
        self.guard
            .by_id
            .get_mut(&battle_id)
            .expect("ensured above")
            .push_event(event);
        self.mark_dirty(battle_id).await
    }

    /// Set a participant's next-ready time for one weapon.
    pub async fn set_weapon_cooldown(
        &mut self,
        battle_id: i64,
        user_id: i64,
        weapon_key: &str,
        next_ready: i64,
    ) -> Result<()> {
        self.ensure_cached(battle_id).await?;
        let battle = self.guard.by_id.get_mut(&battle_id).expect("ensured above");
        let side = battle
            .side_of(user_id)
            .ok_or_else(|| GameError::not_found("battle participant", user_id))?;
        battle
            .cooldowns_mut(side)
            .insert(weapon_key.to_string(), next_ready);
        self.mark_dirty(battle_id).await
    }

    /// Add to a participant's total-damage counter.
    pub async fn update_total_damage(
        &mut self,
        battle_id: i64,
        user_id: i64,
        delta: i64,
    ) -> Result<()> {
        self.ensure_cached(battle_id).await?;
        let battle = self.guard.by_id.get_mut(&battle_id).expect("ensured above");
        let side = battle
            .side_of(user_id)
            .ok_or_else(|| GameError::not_found("battle participant", user_id))?;
        battle.add_total_damage(side, delta);
        self.mark_dirty(battle_id).await
    }

    /// Record end-of-battle stats. Each side's end stats can be written
    /// exactly once.
    pub async fn update_stats(
        &mut self,
        battle_id: i64,
        attacker_end_stats: Option<BattleStats>,
        attackee_end_stats: Option<BattleStats>,
    ) -> Result<()> {
        self.ensure_cached(battle_id).await?;
        let battle = self.guard.by_id.get_mut(&battle_id).expect("ensured above");
        if let Some(stats) = attacker_end_stats {
            if battle.attacker_end_stats.is_some() {
                return Err(GameError::Conflict(format!(
                    "battle {battle_id} attacker end stats already set"
                )));
            }
            battle.attacker_end_stats = Some(stats);
        }
        if let Some(stats) = attackee_end_stats {
            if battle.attackee_end_stats.is_some() {
                return Err(GameError::Conflict(format!(
                    "battle {battle_id} attackee end stats already set"
                )));
            }
            battle.attackee_end_stats = Some(stats);
        }
        self.mark_dirty(battle_id).await
    }

    /// Close a battle: set the end time, winner, loser, and end stats,
    /// flush synchronously, and drop it from the active index. Rejects
    /// battles that already ended.
    pub async fn end(
        &mut self,
        battle_id: i64,
        winner_id: i64,
        loser_id: i64,
        attacker_end_stats: BattleStats,
        attackee_end_stats: BattleStats,
    ) -> Result<Battle> {
        self.ensure_cached(battle_id).await?;
        let now = self.cache.clock.now_secs();

        let battle = self.guard.by_id.get_mut(&battle_id).expect("ensured above");
        if battle.battle_end_time.is_some() {
            return Err(GameError::Conflict(format!(
                "battle {battle_id} already ended"
            )));
        }
        battle.battle_end_time = Some(now);
        battle.winner_id = Some(winner_id);
        battle.loser_id = Some(loser_id);
        battle.attacker_end_stats = Some(attacker_end_stats);
        battle.attackee_end_stats = Some(attackee_end_stats);
        let snapshot = battle.clone();

        // A finished battle must be durable before it leaves the cache.
        if let Err(err) = self.cache.store.update_battle(&self.guard, &snapshot).await {
            let battle = self.guard.by_id.get_mut(&battle_id).expect("still cached");
            battle.battle_end_time = None;
            battle.winner_id = None;
            battle.loser_id = None;
            battle.attacker_end_stats = None;
            battle.attackee_end_stats = None;
            return Err(err);
        }

        self.guard.by_id.remove(&battle_id);
        self.guard.by_user.remove(&snapshot.attacker_id);
        self.guard.by_user.remove(&snapshot.attackee_id);
        self.guard.dirty.remove(&battle_id);

        log::info!(
            "battle {battle_id} ended: winner {winner_id}, loser {loser_id}"
        );
        Ok(snapshot)
    }

    /// Write every dirty battle back to the store.
    pub async fn flush(&mut self) -> Result<usize> {
        let mut ids: Vec<i64> = self.guard.dirty.iter().copied().collect();
        ids.sort_unstable();

        let mut flushed = 0;
        for id in ids {
            let Some(battle) = self.guard.by_id.get(&id).cloned() else {
                self.guard.dirty.remove(&id);
                continue;
            };
            self.cache.store.update_battle(&self.guard, &battle).await?;
            self.guard.dirty.remove(&id);
            flushed += 1;
        }
        self.cache.stats.record_flush(flushed as u64);
        Ok(flushed)
    }

    /// Number of battles with unflushed changes.
    pub fn dirty_count(&self) -> usize {
        self.guard.dirty.len()
    }

    async fn ensure_cached(&mut self, battle_id: i64) -> Result<()> {
        if self.guard.by_id.contains_key(&battle_id) {
            return Ok(());
        }
        match self.load_if_needed(battle_id).await? {
            Some(battle) if battle.is_active() => Ok(()),
            Some(_) => Err(GameError::Conflict(format!(
                "battle {battle_id} already ended"
            ))),
            None => Err(GameError::not_found("battle", battle_id)),
        }
    }

    async fn mark_dirty(&mut self, battle_id: i64) -> Result<()> {
        self.guard.dirty.insert(battle_id);
        if !self.cache.write_back {
            let Some(battle) = self.guard.by_id.get(&battle_id).cloned() else {
                return Ok(());
            };
            self.cache.store.update_battle(&self.guard, &battle).await?;
            self.guard.dirty.remove(&battle_id);
        }
        Ok(())
    }
}

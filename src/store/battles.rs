//! battles table CRUD
//!
//! The battle cache is the only caller of the write paths here. Historical
//! reads (`load_battles_for_user`) serve ended battles that are no longer
//! cached.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::Result;
use crate::locking::HeldLock;
use crate::model::Battle;

use super::{from_json, to_json, Store};

fn battle_from_row(row: &SqliteRow) -> Result<Battle> {
    let attacker_cooldowns: String = row.try_get("attacker_weapon_cooldowns")?;
    let attackee_cooldowns: String = row.try_get("attackee_weapon_cooldowns")?;
    let attacker_start: String = row.try_get("attacker_start_stats")?;
    let attackee_start: String = row.try_get("attackee_start_stats")?;
    let attacker_end: Option<String> = row.try_get("attacker_end_stats")?;
    let attackee_end: Option<String> = row.try_get("attackee_end_stats")?;
    let battle_log: String = row.try_get("battle_log")?;

    Ok(Battle {
        id: row.try_get("id")?,
        attacker_id: row.try_get("attacker_id")?,
        attackee_id: row.try_get("attackee_id")?,
        battle_start_time: row.try_get("battle_start_time")?,
        battle_end_time: row.try_get("battle_end_time")?,
        winner_id: row.try_get("winner_id")?,
        loser_id: row.try_get("loser_id")?,
        attacker_weapon_cooldowns: from_json(&attacker_cooldowns)?,
        attackee_weapon_cooldowns: from_json(&attackee_cooldowns)?,
        attacker_start_stats: from_json(&attacker_start)?,
        attackee_start_stats: from_json(&attackee_start)?,
        attacker_end_stats: attacker_end.as_deref().map(from_json).transpose()?,
        attackee_end_stats: attackee_end.as_deref().map(from_json).transpose()?,
        battle_log: from_json(&battle_log)?,
        attacker_total_damage: row.try_get("attacker_total_damage")?,
        attackee_total_damage: row.try_get("attackee_total_damage")?,
    })
}

impl Store {
    /// Insert a battle row. Returns the assigned id.
    pub async fn insert_battle(&self, held: &dyn HeldLock, battle: &Battle) -> Result<i64> {
        let _table = self.db_battles.write_after(held).await?;
        let result = sqlx::query(
            r"
            INSERT INTO battles (
                attacker_id, attackee_id, battle_start_time, battle_end_time,
                winner_id, loser_id,
                attacker_weapon_cooldowns, attackee_weapon_cooldowns,
                attacker_start_stats, attackee_start_stats,
                attacker_end_stats, attackee_end_stats,
                battle_log, attacker_total_damage, attackee_total_damage
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(battle.attacker_id)
        .bind(battle.attackee_id)
        .bind(battle.battle_start_time)
        .bind(battle.battle_end_time)
        .bind(battle.winner_id)
        .bind(battle.loser_id)
        .bind(to_json(&battle.attacker_weapon_cooldowns)?)
        .bind(to_json(&battle.attackee_weapon_cooldowns)?)
        .bind(to_json(&battle.attacker_start_stats)?)
        .bind(to_json(&battle.attackee_start_stats)?)
        .bind(battle.attacker_end_stats.as_ref().map(to_json).transpose()?)
        .bind(battle.attackee_end_stats.as_ref().map(to_json).transpose()?)
        .bind(to_json(&battle.battle_log)?)
        .bind(battle.attacker_total_damage)
        .bind(battle.attackee_total_damage)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Write a battle row back in full.
    pub async fn update_battle(&self, held: &dyn HeldLock, battle: &Battle) -> Result<()> {
        let _table = self.db_battles.write_after(held).await?;
        sqlx::query(
            r"
            UPDATE battles SET
                attacker_id = ?, attackee_id = ?, battle_start_time = ?, battle_end_time = ?,
                winner_id = ?, loser_id = ?,
                attacker_weapon_cooldowns = ?, attackee_weapon_cooldowns = ?,
                attacker_start_stats = ?, attackee_start_stats = ?,
                attacker_end_stats = ?, attackee_end_stats = ?,
                battle_log = ?, attacker_total_damage = ?, attackee_total_damage = ?
            WHERE id = ?
            ",
        )
        .bind(battle.attacker_id)
        .bind(battle.attackee_id)
        .bind(battle.battle_start_time)
        .bind(battle.battle_end_time)
        .bind(battle.winner_id)
        .bind(battle.loser_id)
        .bind(to_json(&battle.attacker_weapon_cooldowns)?)
        .bind(to_json(&battle.attackee_weapon_cooldowns)?)
        .bind(to_json(&battle.attacker_start_stats)?)
        .bind(to_json(&battle.attackee_start_stats)?)
        .bind(battle.attacker_end_stats.as_ref().map(to_json).transpose()?)
        .bind(battle.attackee_end_stats.as_ref().map(to_json).transpose()?)
        .bind(to_json(&battle.battle_log)?)
        .bind(battle.attacker_total_damage)
        .bind(battle.attackee_total_damage)
        .bind(battle.id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Load one battle by id.
    pub async fn load_battle(&self, held: &dyn HeldLock, id: i64) -> Result<Option<Battle>> {
        let _table = self.db_battles.read_after(held).await?;
        let row = sqlx::query("SELECT * FROM battles WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(battle_from_row).transpose()
    }

    /// The user's active battle, if one exists in the store.
    pub async fn load_active_battle_for_user(
        &self,
        held: &dyn HeldLock,
        user_id: i64,
    ) -> Result<Option<Battle>> {
        let _table = self.db_battles.read_after(held).await?;
        let row = sqlx::query(
            r"
            SELECT * FROM battles
            WHERE battle_end_time IS NULL AND (attacker_id = ? OR attackee_id = ?)
            ORDER BY battle_start_time DESC
            LIMIT 1
            ",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(battle_from_row).transpose()
    }

    /// Full battle history for a user, newest first.
    pub async fn load_battles_for_user(
        &self,
        held: &dyn HeldLock,
        user_id: i64,
    ) -> Result<Vec<Battle>> {
        let _table = self.db_battles.read_after(held).await?;
        let rows = sqlx::query(
            r"
            SELECT * FROM battles
            WHERE attacker_id = ? OR attackee_id = ?
            ORDER BY battle_start_time DESC, id DESC
            ",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(battle_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::{HierMutex, LockLevel};
    use crate::model::{BattleStats, Side, User};
    use std::collections::HashMap;

    fn sample_battle() -> Battle {
        let mut attacker = User::new(1, "vega", "hash", 0);
        attacker.tech_counts.pulse_laser = 1;
        attacker.tech_counts.ship_hull = 2;
        attacker.hull_current = 200;
        let attackee = User::new(2, "rigel", "hash", 0);

        let mut battle = Battle::new(
            0,
            1,
            2,
            BattleStats::snapshot_of(&attacker),
            BattleStats::snapshot_of(&attackee),
            HashMap::from([("pulse_laser".to_string(), 0)]),
            HashMap::new(),
            1000,
        );
        battle.attacker_total_damage = 40;
        battle
    }

    #[tokio::test]
    async fn test_battle_roundtrip_is_structurally_equal() {
        let store = Store::in_memory().await.unwrap();
        let battle_lock = HierMutex::new(LockLevel::Battle, ());
        let held = battle_lock.lock().await;

        let mut battle = sample_battle();
        battle.id = store.insert_battle(&held, &battle).await.unwrap();

        let loaded = store
            .load_battle(&held, battle.id)
            .await
            .unwrap()
            .expect("battle exists");
        assert_eq!(loaded, battle);
    }

    #[tokio::test]
    async fn test_active_lookup_ignores_ended_battles() {
        let store = Store::in_memory().await.unwrap();
        let battle_lock = HierMutex::new(LockLevel::Battle, ());
        let held = battle_lock.lock().await;

        let mut battle = sample_battle();
        battle.id = store.insert_battle(&held, &battle).await.unwrap();

        let active = store.load_active_battle_for_user(&held, 1).await.unwrap();
        assert_eq!(active.map(|b| b.id), Some(battle.id));

        battle.battle_end_time = Some(2000);
        battle.winner_id = Some(1);
        battle.loser_id = Some(2);
        battle.attacker_end_stats = Some(battle.attacker_start_stats.clone());
        battle.attackee_end_stats = Some(battle.attackee_start_stats.clone());
        store.update_battle(&held, &battle).await.unwrap();

        assert!(store
            .load_active_battle_for_user(&held, 1)
            .await
            .unwrap()
            .is_none());

        // History still serves it, end stats intact.
        let history = store.load_battles_for_user(&held, 2).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].battle_end_time.is_some());
        assert!(history[0].end_stats(Side::Attacker).is_some());
    }
}

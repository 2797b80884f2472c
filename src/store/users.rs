//! users table CRUD

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::Result;
use crate::locking::HeldLock;
use crate::model::{TechCounts, User};

use super::{from_json, to_json, Store};

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let tech_tree: String = row.try_get("tech_tree")?;
    let build_queue: String = row.try_get("build_queue")?;
    let inventory: String = row.try_get("inventory")?;

    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        iron: row.try_get("iron")?,
        xp: row.try_get("xp")?,
        last_updated: row.try_get("last_updated")?,
        tech_tree: from_json(&tech_tree)?,
        tech_counts: TechCounts {
            pulse_laser: row.try_get("pulse_laser")?,
            auto_turret: row.try_get("auto_turret")?,
            plasma_lance: row.try_get("plasma_lance")?,
            gauss_rifle: row.try_get("gauss_rifle")?,
            photon_torpedo: row.try_get("photon_torpedo")?,
            rocket_launcher: row.try_get("rocket_launcher")?,
            ship_hull: row.try_get("ship_hull")?,
            kinetic_armor: row.try_get("kinetic_armor")?,
            energy_shield: row.try_get("energy_shield")?,
            missile_jammer: row.try_get("missile_jammer")?,
        },
        ship_id: row.try_get("ship_id")?,
        hull_current: row.try_get("hull_current")?,
        armor_current: row.try_get("armor_current")?,
        shield_current: row.try_get("shield_current")?,
        defense_last_regen: row.try_get("defense_last_regen")?,
        in_battle: row.try_get("in_battle")?,
        current_battle_id: row.try_get("current_battle_id")?,
        build_queue: from_json(&build_queue)?,
        inventory: from_json(&inventory)?,
    })
}

impl Store {
    /// Load one user by id.
    pub async fn load_user(&self, held: &dyn HeldLock, id: i64) -> Result<Option<User>> {
        let _table = self.db_users.read_after(held).await?;
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    /// Load one user by unique username.
    pub async fn load_user_by_username(
        &self,
        held: &dyn HeldLock,
        username: &str,
    ) -> Result<Option<User>> {
        let _table = self.db_users.read_after(held).await?;
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    /// Insert a new user row. Returns the assigned id.
    pub async fn insert_user(&self, held: &dyn HeldLock, user: &User) -> Result<i64> {
        let _table = self.db_users.write_after(held).await?;
        let result = sqlx::query(
            r"
            INSERT INTO users (
                username, password_hash, iron, xp, last_updated, tech_tree, ship_id,
                pulse_laser, auto_turret, plasma_lance, gauss_rifle, photon_torpedo,
                rocket_launcher, ship_hull, kinetic_armor, energy_shield, missile_jammer,
                hull_current, armor_current, shield_current, defense_last_regen,
                in_battle, current_battle_id, build_queue, inventory
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.iron)
        .bind(user.xp)
        .bind(user.last_updated)
        .bind(to_json(&user.tech_tree)?)
        .bind(user.ship_id)
        .bind(user.tech_counts.pulse_laser)
        .bind(user.tech_counts.auto_turret)
        .bind(user.tech_counts.plasma_lance)
        .bind(user.tech_counts.gauss_rifle)
        .bind(user.tech_counts.photon_torpedo)
        .bind(user.tech_counts.rocket_launcher)
        .bind(user.tech_counts.ship_hull)
        .bind(user.tech_counts.kinetic_armor)
        .bind(user.tech_counts.energy_shield)
        .bind(user.tech_counts.missile_jammer)
        .bind(user.hull_current)
        .bind(user.armor_current)
        .bind(user.shield_current)
        .bind(user.defense_last_regen)
        .bind(user.in_battle)
        .bind(user.current_battle_id)
        .bind(to_json(&user.build_queue)?)
        .bind(to_json(&user.inventory)?)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Write a user row back in full.
    pub async fn update_user(&self, held: &dyn HeldLock, user: &User) -> Result<()> {
        let _table = self.db_users.write_after(held).await?;
        sqlx::query(
            r"
            UPDATE users SET
                username = ?, password_hash = ?, iron = ?, xp = ?, last_updated = ?,
                tech_tree = ?, ship_id = ?,
                pulse_laser = ?, auto_turret = ?, plasma_lance = ?, gauss_rifle = ?,
                photon_torpedo = ?, rocket_launcher = ?, ship_hull = ?, kinetic_armor = ?,
                energy_shield = ?, missile_jammer = ?,
                hull_current = ?, armor_current = ?, shield_current = ?,
                defense_last_regen = ?, in_battle = ?, current_battle_id = ?,
                build_queue = ?, inventory = ?
            WHERE id = ?
            ",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.iron)
        .bind(user.xp)
        .bind(user.last_updated)
        .bind(to_json(&user.tech_tree)?)
        .bind(user.ship_id)
        .bind(user.tech_counts.pulse_laser)
        .bind(user.tech_counts.auto_turret)
        .bind(user.tech_counts.plasma_lance)
        .bind(user.tech_counts.gauss_rifle)
        .bind(user.tech_counts.photon_torpedo)
        .bind(user.tech_counts.rocket_launcher)
        .bind(user.tech_counts.ship_hull)
        .bind(user.tech_counts.kinetic_armor)
        .bind(user.tech_counts.energy_shield)
        .bind(user.tech_counts.missile_jammer)
        .bind(user.hull_current)
        .bind(user.armor_current)
        .bind(user.shield_current)
        .bind(user.defense_last_regen)
        .bind(user.in_battle)
        .bind(user.current_battle_id)
        .bind(to_json(&user.build_queue)?)
        .bind(to_json(&user.inventory)?)
        .bind(user.id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::{HierMutex, LockLevel};
    use crate::model::BuildQueueItem;

    fn sample_user() -> User {
        let mut user = User::new(0, "altair", "$argon$hash", 100);
        user.iron = 250;
        user.xp = 4200;
        user.tech_tree = serde_json::json!({"researched": ["pulse_laser"]});
        user.tech_counts.pulse_laser = 3;
        user.tech_counts.ship_hull = 2;
        user.hull_current = 180;
        user.build_queue = vec![BuildQueueItem {
            item_key: "auto_turret".into(),
            item_type: crate::model::BuildItemType::Weapon,
            completion_time: 500,
        }];
        user.inventory = vec![vec![Some("iron_chunk".into()), None]];
        user
    }

    #[tokio::test]
    async fn test_user_roundtrip() {
        let store = Store::in_memory().await.unwrap();
        let cache_lock = HierMutex::new(LockLevel::User, ());
        let held = cache_lock.lock().await;

        let mut user = sample_user();
        user.id = store.insert_user(&held, &user).await.unwrap();

        let loaded = store
            .load_user(&held, user.id)
            .await
            .unwrap()
            .expect("user exists");
        assert_eq!(loaded, user);

        let by_name = store
            .load_user_by_username(&held, "altair")
            .await
            .unwrap()
            .expect("by name");
        assert_eq!(by_name.id, user.id);
    }

    #[tokio::test]
    async fn test_update_user_persists_fields() {
        let store = Store::in_memory().await.unwrap();
        let cache_lock = HierMutex::new(LockLevel::User, ());
        let held = cache_lock.lock().await;

        let mut user = sample_user();
        user.id = store.insert_user(&held, &user).await.unwrap();

        user.iron = 999;
        user.in_battle = true;
        user.current_battle_id = Some(12);
        store.update_user(&held, &user).await.unwrap();

        let loaded = store.load_user(&held, user.id).await.unwrap().unwrap();
        assert_eq!(loaded.iron, 999);
        assert!(loaded.in_battle);
        assert_eq!(loaded.current_battle_id, Some(12));
    }

    #[tokio::test]
    async fn test_missing_user_is_none() {
        let store = Store::in_memory().await.unwrap();
        let cache_lock = HierMutex::new(LockLevel::User, ());
        let held = cache_lock.lock().await;

        assert!(store.load_user(&held, 404).await.unwrap().is_none());
    }
}

//! space_objects table CRUD
//!
//! The load path joins against users so player ships carry their owner's
//! username, and so ships whose owner is mid-battle come up stationary.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::Result;
use crate::locking::HeldLock;
use crate::model::{SpaceObject, SpaceObjectKind};

use super::Store;

fn object_from_row(row: &SqliteRow) -> Result<SpaceObject> {
    let kind_text: String = row.try_get("type")?;
    let kind: SpaceObjectKind = serde_json::from_value(serde_json::Value::String(kind_text))?;

    let username: Option<String> = row.try_get("username")?;
    let owner_in_battle: Option<bool> = row.try_get("owner_in_battle")?;
    let mut speed: f64 = row.try_get("speed")?;
    if owner_in_battle == Some(true) {
        speed = 0.0;
    }

    Ok(SpaceObject {
        id: row.try_get("id")?,
        kind,
        x: row.try_get("x")?,
        y: row.try_get("y")?,
        speed,
        angle: row.try_get("angle")?,
        last_position_update_ms: row.try_get("last_position_update_ms")?,
        picture_id: row.try_get("picture_id")?,
        username,
    })
}

impl Store {
    /// Load every space object, ships annotated with owner state.
    pub async fn load_space_objects(&self, held: &dyn HeldLock) -> Result<Vec<SpaceObject>> {
        let _table = self.db_world.read_after(held).await?;
        let rows = sqlx::query(
            r"
            SELECT so.*, u.username AS username, u.in_battle AS owner_in_battle
            FROM space_objects so
            LEFT JOIN users u ON u.ship_id = so.id
            ORDER BY so.id
            ",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(object_from_row).collect()
    }

    /// Insert a space object. Returns the assigned id.
    pub async fn insert_space_object(
        &self,
        held: &dyn HeldLock,
        object: &SpaceObject,
    ) -> Result<i64> {
        let _table = self.db_world.write_after(held).await?;
        let result = sqlx::query(
            r"
            INSERT INTO space_objects (type, x, y, speed, angle, last_position_update_ms, picture_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(object.kind.as_str())
        .bind(object.x)
        .bind(object.y)
        .bind(object.speed)
        .bind(object.angle)
        .bind(object.last_position_update_ms)
        .bind(object.picture_id)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Write an object's kinematic state back.
    pub async fn update_space_object(
        &self,
        held: &dyn HeldLock,
        object: &SpaceObject,
    ) -> Result<()> {
        let _table = self.db_world.write_after(held).await?;
        sqlx::query(
            r"
            UPDATE space_objects
            SET x = ?, y = ?, speed = ?, angle = ?, last_position_update_ms = ?
            WHERE id = ?
            ",
        )
        .bind(object.x)
        .bind(object.y)
        .bind(object.speed)
        .bind(object.angle)
        .bind(object.last_position_update_ms)
        .bind(object.id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Delete a space object row.
    pub async fn delete_space_object(&self, held: &dyn HeldLock, id: i64) -> Result<()> {
        let _table = self.db_world.write_after(held).await?;
        sqlx::query("DELETE FROM space_objects WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::{HierMutex, LockLevel};
    use crate::model::User;

    fn asteroid(x: f64, y: f64) -> SpaceObject {
        SpaceObject {
            id: 0,
            kind: SpaceObjectKind::Asteroid,
            x,
            y,
            speed: 5.0,
            angle: 90.0,
            last_position_update_ms: 1000,
            picture_id: 2,
            username: None,
        }
    }

    #[tokio::test]
    async fn test_object_roundtrip() {
        let store = Store::in_memory().await.unwrap();
        let world_lock = HierMutex::new(LockLevel::World, ());
        let held = world_lock.lock().await;

        let mut object = asteroid(10.0, 20.0);
        object.id = store.insert_space_object(&held, &object).await.unwrap();

        let loaded = store.load_space_objects(&held).await.unwrap();
        assert_eq!(loaded, vec![object.clone()]);

        object.x = 99.5;
        object.speed = 7.25;
        store.update_space_object(&held, &object).await.unwrap();
        let loaded = store.load_space_objects(&held).await.unwrap();
        assert_eq!(loaded[0].x, 99.5);
        assert_eq!(loaded[0].speed, 7.25);

        store.delete_space_object(&held, object.id).await.unwrap();
        assert!(store.load_space_objects(&held).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ship_join_carries_owner_and_battle_state() {
        let store = Store::in_memory().await.unwrap();
        let world_lock = HierMutex::new(LockLevel::World, ());
        let held = world_lock.lock().await;

        let mut ship = SpaceObject {
            kind: SpaceObjectKind::PlayerShip,
            speed: 12.0,
            ..asteroid(500.0, 500.0)
        };
        ship.id = store.insert_space_object(&held, &ship).await.unwrap();

        let mut owner = User::new(0, "deneb", "hash", 0);
        owner.ship_id = Some(ship.id);
        owner.in_battle = true;
        // Seeding goes straight to the users table; the world lock is
        // below DB_USERS so the ordering is legal.
        owner.id = store.insert_user(&held, &owner).await.unwrap();

        let loaded = store.load_space_objects(&held).await.unwrap();
        assert_eq!(loaded[0].username.as_deref(), Some("deneb"));
        // Owner is mid-battle: the ship loads stationary.
        assert_eq!(loaded[0].speed, 0.0);
    }
}

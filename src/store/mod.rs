//! Persistent store
//!
//! SQLite-backed CRUD for the four entity tables. The store is deliberately
//! dumb: row shapes in, row shapes out, one statement per call. Writes are
//! serialized per table through the DB_* levels of the lock hierarchy;
//! reads take the shared side of the same locks. Callers always hold a
//! cache-level lock and pass their guard so the hierarchy stays checkable.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::Result;
use crate::locking::{HierRwLock, LockLevel};

mod battles;
mod messages;
mod users;
mod world;

/// Handle to the relational store plus the per-table write coordination
/// locks.
#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
    pub(crate) db_users: HierRwLock<()>,
    pub(crate) db_world: HierRwLock<()>,
    pub(crate) db_messages: HierRwLock<()>,
    pub(crate) db_battles: HierRwLock<()>,
}

impl Store {
    /// Connect to the database behind `url` and create the schema if it is
    /// not there yet.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);

        // A pooled in-memory database would be one database per
        // connection; collapse the pool to a single connection there.
        let max_connections = if url.contains(":memory:") { 1 } else { 16 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            db_users: HierRwLock::new(LockLevel::DbUsers, ()),
            db_world: HierRwLock::new(LockLevel::DbWorld, ()),
            db_messages: HierRwLock::new(LockLevel::DbMessages, ()),
            db_battles: HierRwLock::new(LockLevel::DbBattles, ()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// An in-memory store for tests.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Raw pool, for bootstrap-time statements.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all tables and indexes. Idempotent.
    async fn init_schema(&self) -> Result<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                iron INTEGER NOT NULL DEFAULT 0,
                xp INTEGER NOT NULL DEFAULT 0,
                last_updated INTEGER NOT NULL DEFAULT 0,
                tech_tree TEXT NOT NULL DEFAULT 'null',
                ship_id INTEGER,
                pulse_laser INTEGER NOT NULL DEFAULT 0,
                auto_turret INTEGER NOT NULL DEFAULT 0,
                plasma_lance INTEGER NOT NULL DEFAULT 0,
                gauss_rifle INTEGER NOT NULL DEFAULT 0,
                photon_torpedo INTEGER NOT NULL DEFAULT 0,
                rocket_launcher INTEGER NOT NULL DEFAULT 0,
                ship_hull INTEGER NOT NULL DEFAULT 0,
                kinetic_armor INTEGER NOT NULL DEFAULT 0,
                energy_shield INTEGER NOT NULL DEFAULT 0,
                missile_jammer INTEGER NOT NULL DEFAULT 0,
                hull_current INTEGER NOT NULL DEFAULT 0,
                armor_current INTEGER NOT NULL DEFAULT 0,
                shield_current INTEGER NOT NULL DEFAULT 0,
                defense_last_regen INTEGER NOT NULL DEFAULT 0,
                in_battle INTEGER NOT NULL DEFAULT 0,
                current_battle_id INTEGER,
                build_queue TEXT NOT NULL DEFAULT '[]',
                inventory TEXT NOT NULL DEFAULT '[]'
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS space_objects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT NOT NULL,
                x REAL NOT NULL,
                y REAL NOT NULL,
                speed REAL NOT NULL DEFAULT 0,
                angle REAL NOT NULL DEFAULT 0,
                last_position_update_ms INTEGER NOT NULL DEFAULT 0,
                picture_id INTEGER NOT NULL DEFAULT 1
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS battles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                attacker_id INTEGER NOT NULL,
                attackee_id INTEGER NOT NULL,
                battle_start_time INTEGER NOT NULL,
                battle_end_time INTEGER,
                winner_id INTEGER,
                loser_id INTEGER,
                attacker_weapon_cooldowns TEXT NOT NULL DEFAULT '{}',
                attackee_weapon_cooldowns TEXT NOT NULL DEFAULT '{}',
                attacker_start_stats TEXT NOT NULL,
                attackee_start_stats TEXT NOT NULL,
                attacker_end_stats TEXT,
                attackee_end_stats TEXT,
                battle_log TEXT NOT NULL DEFAULT '[]',
                attacker_total_damage INTEGER NOT NULL DEFAULT 0,
                attackee_total_damage INTEGER NOT NULL DEFAULT 0
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY,
                recipient_id INTEGER NOT NULL,
                message TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0
            )
            ",
            "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages (recipient_id)",
            "CREATE INDEX IF NOT EXISTS idx_battles_attacker ON battles (attacker_id)",
            "CREATE INDEX IF NOT EXISTS idx_battles_attackee ON battles (attackee_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

/// Encode a value into a JSON column.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a JSON column.
pub(crate) fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(text)?)
}

//! World cache
//!
//! Owns the single `World` for the process. The first access loads every
//! space object (ships annotated with owner state via the store's join);
//! afterwards the world lives here and the store only sees position
//! flushes, collectible deletions, and replacement spawns.

use std::sync::Arc;

use crate::cache::{CacheStats, StatsCell};
use crate::error::{GameError, Result};
use crate::locking::{HeldLock, HierGuard, HierMutex, LockError, LockLevel, LockStats};
use crate::model::{spawn_collectible, SpaceObject, World, WorldSize};
use crate::store::Store;
use crate::time::SharedClock;

#[derive(Default)]
struct WorldCacheInner {
    world: Option<World>,
    dirty: bool,
}

/// Write-back cache over the space_objects table.
pub struct WorldCache {
    inner: HierMutex<WorldCacheInner>,
    store: Arc<Store>,
    clock: SharedClock,
    size: WorldSize,
    write_back: bool,
    stats: StatsCell,
}

impl WorldCache {
    /// Create the cache for a world of the given size.
    pub fn new(store: Arc<Store>, clock: SharedClock, size: WorldSize, write_back: bool) -> Self {
        Self {
            inner: HierMutex::new(LockLevel::World, WorldCacheInner::default()),
            store,
            clock,
            size,
            write_back,
            stats: StatsCell::default(),
        }
    }

    /// Acquire the WORLD lock as the root of a critical section.
    pub async fn lock(&self) -> WorldCacheSession<'_> {
        WorldCacheSession {
            cache: self,
            guard: self.inner.lock().await,
        }
    }

    /// Acquire the WORLD lock while a lower level is held.
    pub async fn lock_after(
        &self,
        held: &dyn HeldLock,
    ) -> std::result::Result<WorldCacheSession<'_>, LockError> {
        Ok(WorldCacheSession {
            cache: self,
            guard: self.inner.lock_after(held).await?,
        })
    }

    /// Hit/miss/flush counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// WORLD lock acquisition counters.
    pub fn lock_stats(&self) -> LockStats {
        self.inner.stats()
    }
}

/// Operations available while the WORLD lock is held.
pub struct WorldCacheSession<'a> {
    cache: &'a WorldCache,
    guard: HierGuard<'a, WorldCacheInner>,
}

impl WorldCacheSession<'_> {
    /// The held WORLD guard, for ordering later acquisitions.
    pub fn as_held(&self) -> &dyn HeldLock {
        &self.guard
    }

    /// The live world, with physics advanced to now. Marks dirty only when
    /// something actually moved.
    pub async fn get_world(&mut self) -> Result<World> {
        self.ensure_loaded().await?;
        let now_ms = self.cache.clock.now_ms();
        let moved = self
            .guard
            .world
            .as_mut()
            .expect("loaded above")
            .step_physics(now_ms);
        if moved {
            self.mark_dirty().await?;
        }
        Ok(self.guard.world.clone().expect("loaded above"))
    }

    /// Replace the world wholesale and mark dirty.
    pub async fn update_world(&mut self, world: World) -> Result<()> {
        self.guard.world = Some(world);
        self.mark_dirty().await
    }

    /// Remove a collected object, delete its row, and spawn a replacement
    /// collectible in its place. Returns the replacement. The object count
    /// of the world is invariant across this call.
    pub async fn collected(&mut self, object_id: i64) -> Result<SpaceObject> {
        self.ensure_loaded().await?;

        // Validate before touching anything so a miss changes nothing.
        if self
            .guard
            .world
            .as_ref()
            .expect("loaded above")
            .object(object_id)
            .is_none()
        {
            return Err(GameError::not_found("space object", object_id));
        }

        self.cache
            .store
            .delete_space_object(&self.guard, object_id)
            .await?;
        self.guard
            .world
            .as_mut()
            .expect("loaded above")
            .remove_object(object_id);

        let mut replacement = {
            let mut rng = rand::thread_rng();
            spawn_collectible(&mut rng, self.cache.size, self.cache.clock.now_ms())
        };
        replacement.id = self
            .cache
            .store
            .insert_space_object(&self.guard, &replacement)
            .await?;
        self.guard
            .world
            .as_mut()
            .expect("loaded above")
            .space_objects
            .push(replacement.clone());

        self.mark_dirty().await?;
        Ok(replacement)
    }

    /// Populate the world with freshly rolled collectibles. Used at first
    /// boot, when the store has no objects to load yet.
    pub async fn seed_collectibles(&mut self, count: usize) -> Result<usize> {
        self.ensure_loaded().await?;
        let now_ms = self.cache.clock.now_ms();
        for _ in 0..count {
            let mut object = {
                let mut rng = rand::thread_rng();
                spawn_collectible(&mut rng, self.cache.size, now_ms)
            };
            object.id = self
                .cache
                .store
                .insert_space_object(&self.guard, &object)
                .await?;
            self.guard
                .world
                .as_mut()
                .expect("loaded above")
                .space_objects
                .push(object);
        }
        if count > 0 {
            self.mark_dirty().await?;
        }
        Ok(count)
    }

    /// Persist every object's position. Clears the dirty flag.
    pub async fn flush(&mut self) -> Result<usize> {
        if !self.guard.dirty {
            return Ok(0);
        }
        let Some(world) = self.guard.world.clone() else {
            self.guard.dirty = false;
            return Ok(0);
        };
        for object in &world.space_objects {
            self.cache
                .store
                .update_space_object(&self.guard, object)
                .await?;
        }
        self.guard.dirty = false;
        self.cache.stats.record_flush(world.space_objects.len() as u64);
        Ok(world.space_objects.len())
    }

    /// Whether unflushed movement exists.
    pub fn is_dirty(&self) -> bool {
        self.guard.dirty
    }

    async fn ensure_loaded(&mut self) -> Result<()> {
        if self.guard.world.is_some() {
            self.cache.stats.record_hit();
            return Ok(());
        }
        self.cache.stats.record_miss();
        let objects = self.cache.store.load_space_objects(&self.guard).await?;
        let mut world = World::new(self.cache.size);
        world.space_objects = objects;
        self.guard.world = Some(world);
        Ok(())
    }

    async fn mark_dirty(&mut self) -> Result<()> {
        self.guard.dirty = true;
        if !self.cache.write_back {
            self.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SpaceObjectKind;
    use crate::time::ManualClock;

    const SIZE: WorldSize = WorldSize {
        width: 5000.0,
        height: 5000.0,
    };

    async fn fixture(write_back: bool) -> (Arc<Store>, Arc<ManualClock>, WorldCache) {
        let store = Arc::new(Store::in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::at_ms(0));
        let cache = WorldCache::new(
            Arc::clone(&store),
            Arc::clone(&clock) as SharedClock,
            SIZE,
            write_back,
        );
        (store, clock, cache)
    }

    async fn seed_object(store: &Store, x: f64, y: f64, speed: f64, angle: f64) -> i64 {
        let probe = HierMutex::new(LockLevel::World, ());
        let held = probe.lock().await;
        let object = SpaceObject {
            id: 0,
            kind: SpaceObjectKind::Asteroid,
            x,
            y,
            speed,
            angle,
            last_position_update_ms: 0,
            picture_id: 1,
            username: None,
        };
        store.insert_space_object(&held, &object).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_world_applies_toroidal_physics() {
        let (store, clock, cache) = fixture(true).await;
        seed_object(&store, 4998.0, 0.0, 4.0, 0.0).await;

        clock.advance_ms(1000);
        let mut session = cache.lock().await;
        let world = session.get_world().await.unwrap();

        assert_eq!(world.space_objects.len(), 1);
        assert!((world.space_objects[0].x - 2.0).abs() < 1e-9);
        assert!(session.is_dirty());
    }

    #[tokio::test]
    async fn test_static_world_does_not_dirty() {
        let (store, clock, cache) = fixture(true).await;
        seed_object(&store, 100.0, 100.0, 0.0, 0.0).await;

        clock.advance_ms(5000);
        let mut session = cache.lock().await;
        session.get_world().await.unwrap();
        assert!(!session.is_dirty());
        assert_eq!(session.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_collected_keeps_object_count_invariant() {
        let (store, _clock, cache) = fixture(false).await;
        let id = seed_object(&store, 10.0, 10.0, 5.0, 0.0).await;
        seed_object(&store, 20.0, 20.0, 5.0, 0.0).await;

        let mut session = cache.lock().await;
        let before = session.get_world().await.unwrap().space_objects.len();

        let replacement = session.collected(id).await.unwrap();
        assert_ne!(replacement.id, id);
        assert_ne!(replacement.kind, SpaceObjectKind::PlayerShip);

        let world = session.get_world().await.unwrap();
        assert_eq!(world.space_objects.len(), before);
        assert!(world.object(id).is_none());
        assert!(world.object(replacement.id).is_some());
        drop(session);

        // The store saw the swap too.
        let probe = HierMutex::new(LockLevel::World, ());
        let held = probe.lock().await;
        let rows = store.load_space_objects(&held).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|o| o.id != id));
    }

    #[tokio::test]
    async fn test_collected_missing_object_is_not_found() {
        let (_store, _clock, cache) = fixture(false).await;
        let mut session = cache.lock().await;
        assert!(matches!(
            session.collected(999).await,
            Err(GameError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_seed_collectibles_populates_empty_world() {
        let (store, _clock, cache) = fixture(false).await;

        let mut session = cache.lock().await;
        assert!(session.get_world().await.unwrap().space_objects.is_empty());

        session.seed_collectibles(25).await.unwrap();
        let world = session.get_world().await.unwrap();
        assert_eq!(world.space_objects.len(), 25);
        // Every object got a real row behind it.
        assert!(world.space_objects.iter().all(|o| o.id > 0));
        drop(session);

        let probe = HierMutex::new(LockLevel::World, ());
        let held = probe.lock().await;
        assert_eq!(store.load_space_objects(&held).await.unwrap().len(), 25);
    }

    #[tokio::test]
    async fn test_flush_persists_positions() {
        let (store, clock, cache) = fixture(true).await;
        let id = seed_object(&store, 0.0, 0.0, 10.0, 90.0).await;

        clock.advance_ms(2000);
        let mut session = cache.lock().await;
        session.get_world().await.unwrap();
        let flushed = session.flush().await.unwrap();
        assert_eq!(flushed, 1);
        assert!(!session.is_dirty());
        drop(session);

        let probe = HierMutex::new(LockLevel::World, ());
        let held = probe.lock().await;
        let rows = store.load_space_objects(&held).await.unwrap();
        let object = rows.iter().find(|o| o.id == id).unwrap();
        // Heading 90 degrees: moved +y by 20.
        assert!(object.x.abs() < 1e-6);
        assert!((object.y - 20.0).abs() < 1e-6);
        assert_eq!(object.last_position_update_ms, 2000);
    }
}

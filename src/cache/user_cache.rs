//! User cache
//!
//! `user id -> User` with a secondary `username -> id` index. Reads hydrate
//! from the store on miss and advance time-derived stats (iron, defense
//! regeneration, build queue) before returning, so callers always see a
//! user whose clock has caught up to now.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cache::{CacheStats, StatsCell};
use crate::error::{GameError, Result};
use crate::locking::{HeldLock, HierGuard, HierMutex, LockError, LockLevel, LockStats};
use crate::model::{LevelChange, User};
use crate::store::Store;
use crate::time::SharedClock;

#[derive(Default)]
struct UserCacheInner {
    by_id: HashMap<i64, User>,
    by_username: HashMap<String, i64>,
    dirty: HashSet<i64>,
}

/// Write-back cache over the users table.
pub struct UserCache {
    inner: HierMutex<UserCacheInner>,
    store: Arc<Store>,
    clock: SharedClock,
    write_back: bool,
    stats: StatsCell,
}

impl UserCache {
    /// Create the cache. `write_back = false` flushes every mutation
    /// synchronously.
    pub fn new(store: Arc<Store>, clock: SharedClock, write_back: bool) -> Self {
        Self {
            inner: HierMutex::new(LockLevel::User, UserCacheInner::default()),
            store,
            clock,
            write_back,
            stats: StatsCell::default(),
        }
    }

    /// Acquire the USER lock as the root of a critical section.
    pub async fn lock(&self) -> UserCacheSession<'_> {
        UserCacheSession {
            cache: self,
            guard: self.inner.lock().await,
        }
    }

    /// Acquire the USER lock while a lower level is held.
    pub async fn lock_after(
        &self,
        held: &dyn HeldLock,
    ) -> std::result::Result<UserCacheSession<'_>, LockError> {
        Ok(UserCacheSession {
            cache: self,
            guard: self.inner.lock_after(held).await?,
        })
    }

    /// Hit/miss/flush counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// USER lock acquisition counters.
    pub fn lock_stats(&self) -> LockStats {
        self.inner.stats()
    }
}

/// Operations available while the USER lock is held.
pub struct UserCacheSession<'a> {
    cache: &'a UserCache,
    guard: HierGuard<'a, UserCacheInner>,
}

impl UserCacheSession<'_> {
    /// The held USER guard, for ordering later acquisitions.
    pub fn as_held(&self) -> &dyn HeldLock {
        &self.guard
    }

    /// User by id, hydrating from the store on miss. Stats are advanced to
    /// now before the user is returned.
    pub async fn get_by_id(&mut self, id: i64) -> Result<User> {
        if self.guard.by_id.contains_key(&id) {
            self.cache.stats.record_hit();
        } else {
            self.cache.stats.record_miss();
            let user = self
                .cache
                .store
                .load_user(&self.guard, id)
                .await?
                .ok_or_else(|| GameError::not_found("user", id))?;
            self.guard.by_username.insert(user.username.clone(), user.id);
            self.guard.by_id.insert(id, user);
        }
        self.touch(id).await?;
        Ok(self.guard.by_id[&id].clone())
    }

    /// User by unique username, hydrating from the store on miss.
    pub async fn get_by_username(&mut self, username: &str) -> Result<User> {
        if let Some(&id) = self.guard.by_username.get(username) {
            return self.get_by_id(id).await;
        }

        self.cache.stats.record_miss();
        let user = self
            .cache
            .store
            .load_user_by_username(&self.guard, username)
            .await?
            .ok_or_else(|| GameError::not_found("user", username))?;
        let id = user.id;
        self.guard.by_username.insert(user.username.clone(), id);
        self.guard.by_id.insert(id, user);
        self.touch(id).await?;
        Ok(self.guard.by_id[&id].clone())
    }

    /// Install a user that was just written to the store directly. Both
    /// indexes are updated and the dirty bit cleared.
    pub fn set_user(&mut self, user: User) {
        self.guard.dirty.remove(&user.id);
        self.guard.by_username.insert(user.username.clone(), user.id);
        self.guard.by_id.insert(user.id, user);
    }

    /// Replace the cached user and mark it dirty.
    pub async fn update_user(&mut self, user: User) -> Result<()> {
        let id = user.id;
        let inner = &mut *self.guard;
        // Username changes must not leave a stale index entry behind.
        if let Some(previous) = inner.by_id.get(&id) {
            if previous.username != user.username {
                let stale = previous.username.clone();
                inner.by_username.remove(&stale);
            }
        }
        inner.by_username.insert(user.username.clone(), id);
        inner.by_id.insert(id, user);
        self.mark_dirty(id).await
    }

    /// Grant XP to a user and report the level transition.
    pub async fn add_xp(&mut self, id: i64, amount: i64) -> Result<LevelChange> {
        // Hydrate and advance stats first so the transition is computed
        // against a current user.
        self.get_by_id(id).await?;
        let change = self
            .guard
            .by_id
            .get_mut(&id)
            .expect("hydrated above")
            .add_xp(amount);
        self.mark_dirty(id).await?;
        Ok(change)
    }

    /// Write every dirty user back to the store. Returns how many were
    /// flushed. On error the failed user and everything after it stay
    /// dirty.
    pub async fn flush_dirty(&mut self) -> Result<usize> {
        let mut ids: Vec<i64> = self.guard.dirty.iter().copied().collect();
        ids.sort_unstable();

        let mut flushed = 0;
        for id in ids {
            let Some(user) = self.guard.by_id.get(&id).cloned() else {
                self.guard.dirty.remove(&id);
                continue;
            };
            self.cache.store.update_user(&self.guard, &user).await?;
            self.guard.dirty.remove(&id);
            flushed += 1;
        }
        self.cache.stats.record_flush(flushed as u64);
        Ok(flushed)
    }

    /// Number of users with unflushed changes.
    pub fn dirty_count(&self) -> usize {
        self.guard.dirty.len()
    }

    async fn touch(&mut self, id: i64) -> Result<()> {
        let now = self.cache.clock.now_secs();
        let user = self.guard.by_id.get_mut(&id).expect("caller hydrated");
        let update = user.update_stats(now);
        for build in &update.completed_builds {
            log::debug!("user {id} completed build of {}", build.item_key);
        }
        if update.changed {
            self.mark_dirty(id).await?;
        }
        Ok(())
    }

    async fn mark_dirty(&mut self, id: i64) -> Result<()> {
        self.guard.dirty.insert(id);
        if !self.cache.write_back {
            self.flush_one(id).await?;
        }
        Ok(())
    }

    async fn flush_one(&mut self, id: i64) -> Result<()> {
        let Some(user) = self.guard.by_id.get(&id).cloned() else {
            return Ok(());
        };
        self.cache.store.update_user(&self.guard, &user).await?;
        self.guard.dirty.remove(&id);
        Ok(())
    }
}

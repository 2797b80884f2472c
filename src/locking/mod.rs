//! Hierarchical lock discipline
//!
//! Every mutually-exclusive critical section in the server sits behind a
//! named lock with a fixed level. Locks must be acquired in ascending level
//! order; the wrappers here enforce that order at runtime and return typed
//! errors instead of deadlocking:
//!
//! - Cache levels (BATTLE, USER, WORLD, MESSAGE) are exclusive mutexes.
//! - Table levels (DB_USERS, DB_WORLD, DB_MESSAGES, DB_BATTLES) are
//!   read/write locks so concurrent readers do not serialize.
//!
//! Root acquisition (`lock`, `read`, `write`) is always legal. Nested
//! acquisition goes through the `*_after` variants, which take the most
//! recently acquired guard and fail with [`LockError::OrderViolation`] when
//! the requested level is not strictly higher, or [`LockError::Reentrant`]
//! when the same level is requested twice. Dropping a pending acquisition
//! future leaves nothing held.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::watch;
use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Global lock hierarchy. Lower level must be acquired before higher level
/// when locks are nested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockLevel {
    /// Battle cache state and battle-engine turn execution
    Battle,
    /// User cache state
    User,
    /// World cache state
    World,
    /// Message cache state
    Message,
    /// users table write coordination
    DbUsers,
    /// space_objects table write coordination
    DbWorld,
    /// messages table write coordination
    DbMessages,
    /// battles table write coordination
    DbBattles,
}

impl LockLevel {
    /// All lock levels in rank order.
    pub const ALL: [Self; 8] = [
        Self::Battle,
        Self::User,
        Self::World,
        Self::Message,
        Self::DbUsers,
        Self::DbWorld,
        Self::DbMessages,
        Self::DbBattles,
    ];

    /// Total-order rank. Unique per level.
    pub const fn rank(self) -> u16 {
        match self {
            Self::Battle => 2,
            Self::User => 4,
            Self::World => 6,
            Self::Message => 7,
            Self::DbUsers => 10,
            Self::DbWorld => 11,
            Self::DbMessages => 12,
            Self::DbBattles => 13,
        }
    }

    /// Fixed display name matching the level table in the design notes.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Battle => "BATTLE",
            Self::User => "USER",
            Self::World => "WORLD",
            Self::Message => "MESSAGE",
            Self::DbUsers => "DB_USERS",
            Self::DbWorld => "DB_WORLD",
            Self::DbMessages => "DB_MESSAGES",
            Self::DbBattles => "DB_BATTLES",
        }
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name(), self.rank())
    }
}

/// Lock acquisition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Attempted to acquire a level at or below one already held
    #[error("lock order violation: acquiring {requested} while holding {held}")]
    OrderViolation {
        /// Level that was requested
        requested: LockLevel,
        /// Level the task already holds
        held: LockLevel,
    },

    /// Attempted to acquire a level the task already holds
    #[error("reentrant acquisition of {0}")]
    Reentrant(LockLevel),

    /// Task was cancelled while waiting for the lock
    #[error("cancelled while waiting for {0}")]
    Cancelled(LockLevel),
}

/// Evidence of a held lock, used to order nested acquisitions.
///
/// Pass the most recently acquired guard to the `*_after` methods.
pub trait HeldLock: Send + Sync {
    /// Level of the held lock.
    fn level(&self) -> LockLevel;
}

fn check_order(requested: LockLevel, held: &dyn HeldLock) -> Result<(), LockError> {
    let held = held.level();
    if requested == held {
        return Err(LockError::Reentrant(requested));
    }
    if requested.rank() < held.rank() {
        return Err(LockError::OrderViolation { requested, held });
    }
    Ok(())
}

/// Acquisition counters for one lock.
#[derive(Debug, Default)]
struct LockCounters {
    acquires: AtomicU64,
    contended: AtomicU64,
}

/// Snapshot of a lock's acquisition counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    /// Level the counters belong to
    pub level: LockLevel,
    /// Total successful acquisitions
    pub acquires: u64,
    /// Acquisitions that had to wait
    pub contended: u64,
}

// ============================================================================
// Exclusive lock (cache levels)
// ============================================================================

/// Exclusive lock bound to a hierarchy level.
#[derive(Debug)]
pub struct HierMutex<T> {
    level: LockLevel,
    counters: LockCounters,
    inner: Mutex<T>,
}

impl<T> HierMutex<T> {
    /// Create a lock at the given level.
    pub fn new(level: LockLevel, value: T) -> Self {
        Self {
            level,
            counters: LockCounters::default(),
            inner: Mutex::new(value),
        }
    }

    /// Level this lock sits at.
    pub const fn level(&self) -> LockLevel {
        self.level
    }

    /// Acquire with no lock held (root of a critical section).
    pub async fn lock(&self) -> HierGuard<'_, T> {
        let guard = match self.inner.try_lock() {
            Ok(guard) => {
                self.counters.acquires.fetch_add(1, Ordering::Relaxed);
                guard
            }
            Err(_) => {
                self.counters.contended.fetch_add(1, Ordering::Relaxed);
                let guard = self.inner.lock().await;
                self.counters.acquires.fetch_add(1, Ordering::Relaxed);
                guard
            }
        };
        HierGuard {
            level: self.level,
            guard,
        }
    }

    /// Acquire while `held` is held. Fails unless this lock's level is
    /// strictly higher than the held level.
    pub async fn lock_after(&self, held: &dyn HeldLock) -> Result<HierGuard<'_, T>, LockError> {
        check_order(self.level, held)?;
        Ok(self.lock().await)
    }

    /// Root acquisition that gives up when shutdown is signalled.
    ///
    /// Returns [`LockError::Cancelled`] (holding nothing) if the watch flips
    /// to `true`, or if the sender is gone, while the task is still waiting.
    pub async fn lock_cancellable(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<HierGuard<'_, T>, LockError> {
        if *shutdown.borrow() {
            return Err(LockError::Cancelled(self.level));
        }
        tokio::select! {
            guard = self.lock() => Ok(guard),
            changed = shutdown.changed() => {
                match changed {
                    Ok(()) if !*shutdown.borrow() => {
                        // Spurious flip back to false: just wait it out.
                        Ok(self.lock().await)
                    }
                    _ => Err(LockError::Cancelled(self.level)),
                }
            }
        }
    }

    /// Snapshot of the acquisition counters.
    pub fn stats(&self) -> LockStats {
        LockStats {
            level: self.level,
            acquires: self.counters.acquires.load(Ordering::Relaxed),
            contended: self.counters.contended.load(Ordering::Relaxed),
        }
    }
}

/// Guard for [`HierMutex`].
#[derive(Debug)]
pub struct HierGuard<'a, T> {
    level: LockLevel,
    guard: MutexGuard<'a, T>,
}

impl<T: Send + Sync> HeldLock for HierGuard<'_, T> {
    fn level(&self) -> LockLevel {
        self.level
    }
}

impl<T> Deref for HierGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for HierGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

// ============================================================================
// Read/write lock (table levels)
// ============================================================================

/// Read/write lock bound to a hierarchy level.
#[derive(Debug)]
pub struct HierRwLock<T> {
    level: LockLevel,
    counters: LockCounters,
    inner: RwLock<T>,
}

impl<T> HierRwLock<T> {
    /// Create a lock at the given level.
    pub fn new(level: LockLevel, value: T) -> Self {
        Self {
            level,
            counters: LockCounters::default(),
            inner: RwLock::new(value),
        }
    }

    /// Level this lock sits at.
    pub const fn level(&self) -> LockLevel {
        self.level
    }

    /// Shared acquisition with no lock held.
    pub async fn read(&self) -> HierReadGuard<'_, T> {
        let guard = match self.inner.try_read() {
            Ok(guard) => {
                self.counters.acquires.fetch_add(1, Ordering::Relaxed);
                guard
            }
            Err(_) => {
                self.counters.contended.fetch_add(1, Ordering::Relaxed);
                let guard = self.inner.read().await;
                self.counters.acquires.fetch_add(1, Ordering::Relaxed);
                guard
            }
        };
        HierReadGuard {
            level: self.level,
            guard,
        }
    }

    /// Shared acquisition while `held` is held.
    pub async fn read_after(&self, held: &dyn HeldLock) -> Result<HierReadGuard<'_, T>, LockError> {
        check_order(self.level, held)?;
        Ok(self.read().await)
    }

    /// Exclusive acquisition with no lock held.
    pub async fn write(&self) -> HierWriteGuard<'_, T> {
        let guard = match self.inner.try_write() {
            Ok(guard) => {
                self.counters.acquires.fetch_add(1, Ordering::Relaxed);
                guard
            }
            Err(_) => {
                self.counters.contended.fetch_add(1, Ordering::Relaxed);
                let guard = self.inner.write().await;
                self.counters.acquires.fetch_add(1, Ordering::Relaxed);
                guard
            }
        };
        HierWriteGuard {
            level: self.level,
            guard,
        }
    }

    /// Exclusive acquisition while `held` is held.
    pub async fn write_after(
        &self,
        held: &dyn HeldLock,
    ) -> Result<HierWriteGuard<'_, T>, LockError> {
        check_order(self.level, held)?;
        Ok(self.write().await)
    }

    /// Snapshot of the acquisition counters.
    pub fn stats(&self) -> LockStats {
        LockStats {
            level: self.level,
            acquires: self.counters.acquires.load(Ordering::Relaxed),
            contended: self.counters.contended.load(Ordering::Relaxed),
        }
    }
}

/// Shared guard for [`HierRwLock`].
#[derive(Debug)]
pub struct HierReadGuard<'a, T> {
    level: LockLevel,
    guard: RwLockReadGuard<'a, T>,
}

impl<T: Send + Sync> HeldLock for HierReadGuard<'_, T> {
    fn level(&self) -> LockLevel {
        self.level
    }
}

impl<T> Deref for HierReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

/// Exclusive guard for [`HierRwLock`].
#[derive(Debug)]
pub struct HierWriteGuard<'a, T> {
    level: LockLevel,
    guard: RwLockWriteGuard<'a, T>,
}

impl<T: Send + Sync> HeldLock for HierWriteGuard<'_, T> {
    fn level(&self) -> LockLevel {
        self.level
    }
}

impl<T> Deref for HierWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for HierWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

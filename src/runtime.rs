//! Runtime context
//!
//! The dependency-injected root of the server: it connects the store,
//! wires the four caches and the battle scheduler, and owns every
//! background task. Tests build a fresh runtime per test instead of
//! resetting shared state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::battle::BattleScheduler;
use crate::cache::{BattleCache, MessageCache, UserCache, WorldCache};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::model::WorldSize;
use crate::store::Store;
use crate::time::{SharedClock, SystemClock};

/// Which cache a background flush loop services.
#[derive(Debug, Clone, Copy)]
enum FlushTarget {
    Users,
    World,
    Battles,
    Messages,
}

impl FlushTarget {
    const ALL: [Self; 4] = [Self::Users, Self::World, Self::Battles, Self::Messages];

    const fn name(self) -> &'static str {
        match self {
            Self::Users => "user cache",
            Self::World => "world cache",
            Self::Battles => "battle cache",
            Self::Messages => "message cache",
        }
    }
}

/// Root context owning the store, caches, scheduler, and timers.
pub struct GameRuntime {
    config: ServerConfig,
    store: Arc<Store>,
    clock: SharedClock,
    users: Arc<UserCache>,
    world: Arc<WorldCache>,
    battles: Arc<BattleCache>,
    messages: Arc<MessageCache>,
    scheduler: Arc<BattleScheduler>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GameRuntime {
    /// Connect and wire everything using the wall clock.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Connect and wire everything with an injected clock (tests).
    pub async fn with_clock(config: ServerConfig, clock: SharedClock) -> Result<Self> {
        let store = Arc::new(Store::connect(&config.database_url).await?);
        let write_back = config.enable_auto_persistence;

        let users = Arc::new(UserCache::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            write_back,
        ));
        let world = Arc::new(WorldCache::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            WorldSize::new(config.world_width, config.world_height),
            write_back,
        ));
        let battles = Arc::new(BattleCache::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            write_back,
        ));
        let messages = Arc::new(MessageCache::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            write_back,
        ));
        let scheduler = Arc::new(BattleScheduler::new(
            Arc::clone(&battles),
            Arc::clone(&users),
            Arc::clone(&world),
            Arc::clone(&messages),
            Arc::clone(&clock),
            config.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            clock,
            users,
            world,
            battles,
            messages,
            scheduler,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The persistent store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The injected clock.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// The user cache.
    pub fn users(&self) -> &Arc<UserCache> {
        &self.users
    }

    /// The world cache.
    pub fn world(&self) -> &Arc<WorldCache> {
        &self.world
    }

    /// The battle cache.
    pub fn battles(&self) -> &Arc<BattleCache> {
        &self.battles
    }

    /// The message cache.
    pub fn messages(&self) -> &Arc<MessageCache> {
        &self.messages
    }

    /// The battle scheduler.
    pub fn scheduler(&self) -> &Arc<BattleScheduler> {
        &self.scheduler
    }

    /// Start the scheduler loop and, when auto persistence is on, one
    /// write-back timer per cache.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        tasks.push(Arc::clone(&self.scheduler).spawn(self.shutdown_tx.subscribe()));

        if self.config.enable_auto_persistence {
            for target in FlushTarget::ALL {
                let runtime = Arc::clone(self);
                let shutdown = self.shutdown_tx.subscribe();
                tasks.push(tokio::spawn(async move {
                    runtime.flush_loop(target, shutdown).await;
                }));
            }
            log::info!(
                "write-back timers running every {} ms",
                self.config.persistence_interval_ms
            );
        } else {
            log::info!("auto persistence disabled, mutations flush synchronously");
        }
    }

    /// Signal shutdown, join every background task, and run a final
    /// synchronous flush of all caches.
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(err) = result {
                log::error!("background task panicked during shutdown: {err}");
            }
        }

        // Final flush, caches visited in ascending lock order.
        let flushed_battles = self.battles.lock().await.flush().await?;
        let flushed_users = self.users.lock().await.flush_dirty().await?;
        let flushed_world = self.world.lock().await.flush().await?;
        let flushed_messages = self.messages.lock().await.flush().await?;
        log::info!(
            "final flush: {flushed_battles} battles, {flushed_users} users, \
             {flushed_world} space objects, {flushed_messages} messages"
        );

        if self.config.log_stats {
            self.log_stats();
        }
        Ok(())
    }

    async fn flush_loop(&self, target: FlushTarget, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.persistence_interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; skip it so
        // the first real flush happens one full period in.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.flush_target(target).await {
                        Ok(0) => {}
                        Ok(count) => {
                            if self.config.log_stats {
                                log::info!("{} flushed {count} entries", target.name());
                            } else {
                                log::debug!("{} flushed {count} entries", target.name());
                            }
                        }
                        Err(err) => log::error!("{} flush failed: {err}", target.name()),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn flush_target(&self, target: FlushTarget) -> Result<usize> {
        match target {
            FlushTarget::Users => self.users.lock().await.flush_dirty().await,
            FlushTarget::World => self.world.lock().await.flush().await,
            FlushTarget::Battles => self.battles.lock().await.flush().await,
            FlushTarget::Messages => self.messages.lock().await.flush().await,
        }
    }

    fn log_stats(&self) {
        for (name, stats, locks) in [
            ("users", self.users.stats(), self.users.lock_stats()),
            ("world", self.world.stats(), self.world.lock_stats()),
            ("battles", self.battles.stats(), self.battles.lock_stats()),
            ("messages", self.messages.stats(), self.messages.lock_stats()),
        ] {
            log::info!(
                "{name}: {} hits, {} misses, {} flushes ({} entities), \
                 {} lock acquires ({} contended)",
                stats.hits,
                stats.misses,
                stats.flushes,
                stats.flushed_entities,
                locks.acquires,
                locks.contended,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    #[tokio::test]
    async fn test_runtime_wires_and_shuts_down() {
        let runtime = Arc::new(
            GameRuntime::with_clock(
                ServerConfig::for_tests(),
                Arc::new(ManualClock::at_secs(1000)),
            )
            .await
            .unwrap(),
        );
        runtime.start();
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_back_timer_flushes_dirty_users() {
        let config = ServerConfig {
            database_url: "sqlite::memory:".to_string(),
            enable_auto_persistence: true,
            persistence_interval_ms: 25,
            ..ServerConfig::default()
        };
        let clock = Arc::new(ManualClock::at_secs(1000));
        let runtime = Arc::new(
            GameRuntime::with_clock(config, Arc::clone(&clock) as SharedClock)
                .await
                .unwrap(),
        );

        // Seed a user and dirty it through the cache.
        let probe = crate::locking::HierMutex::new(crate::locking::LockLevel::User, ());
        let held = probe.lock().await;
        let id = runtime
            .store()
            .insert_user(&held, &crate::model::User::new(0, "vega", "hash", 1000))
            .await
            .unwrap();
        drop(held);

        clock.advance_secs(60);
        runtime.users().lock().await.get_by_id(id).await.unwrap();
        assert_eq!(runtime.users().lock().await.dirty_count(), 1);

        runtime.start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(runtime.users().lock().await.dirty_count(), 0);

        runtime.shutdown().await.unwrap();

        let held = probe.lock().await;
        let persisted = runtime.store().load_user(&held, id).await.unwrap().unwrap();
        assert_eq!(persisted.iron, 60);
    }

    #[tokio::test]
    async fn test_shutdown_performs_final_flush() {
        let config = ServerConfig {
            database_url: "sqlite::memory:".to_string(),
            enable_auto_persistence: true,
            // Long enough that the timer never fires during the test.
            persistence_interval_ms: 600_000,
            ..ServerConfig::default()
        };
        let clock = Arc::new(ManualClock::at_secs(1000));
        let runtime = Arc::new(
            GameRuntime::with_clock(config, Arc::clone(&clock) as SharedClock)
                .await
                .unwrap(),
        );

        let probe = crate::locking::HierMutex::new(crate::locking::LockLevel::User, ());
        let held = probe.lock().await;
        let id = runtime
            .store()
            .insert_user(&held, &crate::model::User::new(0, "vega", "hash", 1000))
            .await
            .unwrap();
        drop(held);

        clock.advance_secs(10);
        runtime.users().lock().await.get_by_id(id).await.unwrap();
        runtime.start();
        runtime.shutdown().await.unwrap();

        let held = probe.lock().await;
        let persisted = runtime.store().load_user(&held, id).await.unwrap().unwrap();
        assert_eq!(persisted.iron, 10);
    }
}

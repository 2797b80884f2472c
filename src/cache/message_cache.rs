//! Message cache
//!
//! Outbound message buffer with write-back persistence. New messages get
//! ids from a monotonic counter seeded with the store's maximum, so ids
//! created by one task strictly increase even before anything is flushed.
//! Read-status changes for already-persisted rows collect in an overlay
//! that flushes as batched updates.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{CacheStats, StatsCell};
use crate::error::Result;
use crate::locking::{HeldLock, HierGuard, HierMutex, LockError, LockLevel, LockStats};
use crate::model::Message;
use crate::store::Store;
use crate::time::SharedClock;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Default)]
struct MessageCacheInner {
    /// Messages created but not yet inserted
    pending: Vec<Message>,
    /// Read-flag changes for store-resident messages, not yet applied
    read_overlay: HashMap<i64, bool>,
    /// Next id to hand out; None until seeded from the store
    next_id: Option<i64>,
}

/// Write-back cache over the messages table.
pub struct MessageCache {
    inner: HierMutex<MessageCacheInner>,
    store: Arc<Store>,
    clock: SharedClock,
    write_back: bool,
    stats: StatsCell,
}

impl MessageCache {
    /// Create the cache. `write_back = false` flushes every mutation
    /// synchronously.
    pub fn new(store: Arc<Store>, clock: SharedClock, write_back: bool) -> Self {
        Self {
            inner: HierMutex::new(LockLevel::Message, MessageCacheInner::default()),
            store,
            clock,
            write_back,
            stats: StatsCell::default(),
        }
    }

    /// Acquire the MESSAGE lock as the root of a critical section.
    pub async fn lock(&self) -> MessageCacheSession<'_> {
        MessageCacheSession {
            cache: self,
            guard: self.inner.lock().await,
        }
    }

    /// Acquire the MESSAGE lock while a lower level is held.
    pub async fn lock_after(
        &self,
        held: &dyn HeldLock,
    ) -> std::result::Result<MessageCacheSession<'_>, LockError> {
        Ok(MessageCacheSession {
            cache: self,
            guard: self.inner.lock_after(held).await?,
        })
    }

    /// Hit/miss/flush counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// MESSAGE lock acquisition counters.
    pub fn lock_stats(&self) -> LockStats {
        self.inner.stats()
    }
}

/// Operations available while the MESSAGE lock is held.
pub struct MessageCacheSession<'a> {
    cache: &'a MessageCache,
    guard: HierGuard<'a, MessageCacheInner>,
}

impl MessageCacheSession<'_> {
    /// Enqueue a message for a recipient. Ids are strictly increasing per
    /// creation order under this lock.
    pub async fn create_message(&mut self, recipient_id: i64, text: impl Into<String>) -> Result<Message> {
        let id = self.allocate_id().await?;
        let message = Message {
            id,
            recipient_id,
            text: text.into(),
            created_at: self.cache.clock.now_secs(),
            is_read: false,
        };
        self.guard.pending.push(message.clone());
        if !self.cache.write_back {
            self.flush().await?;
        }
        Ok(message)
    }

    /// Merged cache + store view for a recipient, newest first.
    pub async fn get_all_messages(
        &mut self,
        recipient_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        let mut merged = self.merged_view(recipient_id).await?;
        merged.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        if let Some(limit) = limit {
            merged.truncate(limit);
        }
        Ok(merged)
    }

    /// Unread messages for a recipient, oldest first.
    pub async fn get_unread_messages(&mut self, recipient_id: i64) -> Result<Vec<Message>> {
        let mut unread: Vec<Message> = self
            .merged_view(recipient_id)
            .await?
            .into_iter()
            .filter(|m| !m.is_read)
            .collect();
        unread.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(unread)
    }

    /// Number of unread messages for a recipient.
    pub async fn get_unread_count(&mut self, recipient_id: i64) -> Result<usize> {
        Ok(self
            .merged_view(recipient_id)
            .await?
            .iter()
            .filter(|m| !m.is_read)
            .count())
    }

    /// Set the read flag on one message.
    pub async fn mark_read(&mut self, message_id: i64, is_read: bool) -> Result<()> {
        self.mark_many_read(&[message_id], is_read).await
    }

    /// Set the read flag on a batch of messages. The batch applies
    /// atomically with respect to other MESSAGE lock holders.
    pub async fn mark_many_read(&mut self, message_ids: &[i64], is_read: bool) -> Result<()> {
        for &id in message_ids {
            if let Some(pending) = self.guard.pending.iter_mut().find(|m| m.id == id) {
                pending.is_read = is_read;
            } else {
                self.guard.read_overlay.insert(id, is_read);
            }
        }
        if !self.cache.write_back {
            self.flush().await?;
        }
        Ok(())
    }

    /// Mark every unread message of a recipient read. Returns how many
    /// messages flipped.
    pub async fn mark_all_read(&mut self, recipient_id: i64) -> Result<usize> {
        let unread_ids: Vec<i64> = self
            .merged_view(recipient_id)
            .await?
            .iter()
            .filter(|m| !m.is_read)
            .map(|m| m.id)
            .collect();
        self.mark_many_read(&unread_ids, true).await?;
        Ok(unread_ids.len())
    }

    /// Sweep read messages older than `days_old` days. Returns the number
    /// deleted.
    pub async fn delete_old_read(&mut self, days_old: i64) -> Result<u64> {
        // Land pending inserts and read flags first so the sweep sees one
        // consistent table.
        self.flush().await?;
        let cutoff = self.cache.clock.now_secs() - days_old * SECONDS_PER_DAY;
        let deleted = self
            .cache
            .store
            .delete_read_messages_before(&self.guard, cutoff)
            .await?;
        if deleted > 0 {
            log::debug!("message sweep removed {deleted} read messages");
        }
        Ok(deleted)
    }

    /// Write pending inserts and read-flag changes back to the store.
    /// Returns how many changes landed.
    pub async fn flush(&mut self) -> Result<usize> {
        let mut landed = 0;

        while let Some(message) = self.guard.pending.first().cloned() {
            self.cache.store.insert_message(&self.guard, &message).await?;
            self.guard.pending.remove(0);
            landed += 1;
        }

        for is_read in [true, false] {
            let ids: Vec<i64> = self
                .guard
                .read_overlay
                .iter()
                .filter(|(_, &flag)| flag == is_read)
                .map(|(&id, _)| id)
                .collect();
            if ids.is_empty() {
                continue;
            }
            self.cache
                .store
                .set_messages_read(&self.guard, &ids, is_read)
                .await?;
            for id in &ids {
                self.guard.read_overlay.remove(id);
            }
            landed += ids.len();
        }

        self.cache.stats.record_flush(landed as u64);
        Ok(landed)
    }

    /// Number of unflushed changes.
    pub fn dirty_count(&self) -> usize {
        self.guard.pending.len() + self.guard.read_overlay.len()
    }

    async fn allocate_id(&mut self) -> Result<i64> {
        let next = match self.guard.next_id {
            Some(next) => next,
            None => {
                self.cache.stats.record_miss();
                self.cache.store.max_message_id(&self.guard).await? + 1
            }
        };
        self.guard.next_id = Some(next + 1);
        Ok(next)
    }

    async fn merged_view(&mut self, recipient_id: i64) -> Result<Vec<Message>> {
        let mut rows = self
            .cache
            .store
            .load_messages_for_recipient(&self.guard, recipient_id)
            .await?;
        for row in &mut rows {
            if let Some(&flag) = self.guard.read_overlay.get(&row.id) {
                row.is_read = flag;
            }
        }
        rows.extend(
            self.guard
                .pending
                .iter()
                .filter(|m| m.recipient_id == recipient_id)
                .cloned(),
        );
        Ok(rows)
    }
}

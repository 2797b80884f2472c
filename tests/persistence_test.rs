// Integration tests for write-back persistence: cross-runtime restart,
// message flow, and XP progression through the cache layer.

#[cfg(test)]
mod persistence_tests {
    use std::sync::Arc;

    use voidfall::locking::{HierMutex, LockLevel};
    use voidfall::model::{level_for_xp, User};
    use voidfall::time::{ManualClock, SharedClock};
    use voidfall::{GameRuntime, ServerConfig};

    async fn runtime_at(database_url: &str, secs: i64) -> (Arc<ManualClock>, Arc<GameRuntime>) {
        let clock = Arc::new(ManualClock::at_secs(secs));
        let config = ServerConfig {
            database_url: database_url.to_string(),
            enable_auto_persistence: false,
            ..ServerConfig::default()
        };
        let runtime = Arc::new(
            GameRuntime::with_clock(config, Arc::clone(&clock) as SharedClock)
                .await
                .expect("runtime"),
        );
        (clock, runtime)
    }

    #[tokio::test]
    async fn test_state_survives_a_restart() {
        let db_path = std::env::temp_dir().join(format!(
            "voidfall-restart-test-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&db_path);
        let url = format!("sqlite://{}", db_path.display());

        let user_id = {
            let (clock, runtime) = runtime_at(&url, 1000).await;

            let probe = HierMutex::new(LockLevel::User, ());
            let held = probe.lock().await;
            let id = runtime
                .store()
                .insert_user(&held, &User::new(0, "vega", "hash", 1000))
                .await
                .unwrap();
            drop(held);

            // Accrue some state through the cache, then shut down.
            clock.advance_secs(120);
            runtime.users().lock().await.get_by_id(id).await.unwrap();
            runtime
                .messages()
                .lock()
                .await
                .create_message(id, "P: Welcome to the void.")
                .await
                .unwrap();
            runtime.shutdown().await.unwrap();
            id
        };

        // A fresh process over the same database sees everything.
        let (_clock, runtime) = runtime_at(&url, 2000).await;
        let mut users = runtime.users().lock().await;
        let user = users.get_by_username("vega").await.unwrap();
        assert_eq!(user.id, user_id);
        assert!(user.iron >= 120);
        drop(users);

        let mut messages = runtime.messages().lock().await;
        let inbox = messages.get_all_messages(user_id, None).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].text, "P: Welcome to the void.");
        drop(messages);

        runtime.shutdown().await.unwrap();
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_message_flow_ordering_and_sweep() {
        let (clock, runtime) = runtime_at("sqlite::memory:", 1000).await;

        let probe = HierMutex::new(LockLevel::User, ());
        let held = probe.lock().await;
        let id = runtime
            .store()
            .insert_user(&held, &User::new(0, "vega", "hash", 1000))
            .await
            .unwrap();
        drop(held);

        let mut messages = runtime.messages().lock().await;
        for text in ["A", "B", "C"] {
            messages.create_message(id, text).await.unwrap();
        }

        let all = messages.get_all_messages(id, None).await.unwrap();
        let texts: Vec<&str> = all.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["C", "B", "A"]);

        let unread = messages.get_unread_messages(id).await.unwrap();
        let texts: Vec<&str> = unread.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "B", "C"]);
        assert_eq!(messages.get_unread_count(id).await.unwrap(), 3);

        // Read everything, jump a month ahead, sweep.
        assert_eq!(messages.mark_all_read(id).await.unwrap(), 3);
        clock.advance_secs(30 * 86_400);
        assert_eq!(messages.delete_old_read(7).await.unwrap(), 3);
        assert!(messages.get_all_messages(id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_xp_progression_through_cache() {
        let (_clock, runtime) = runtime_at("sqlite::memory:", 1000).await;

        let probe = HierMutex::new(LockLevel::User, ());
        let held = probe.lock().await;
        let mut seeded = User::new(0, "vega", "hash", 1000);
        seeded.xp = 500;
        let id = runtime.store().insert_user(&held, &seeded).await.unwrap();
        drop(held);

        // The triangular-sum law around its first thresholds.
        assert_eq!(level_for_xp(999), 1);
        assert_eq!(level_for_xp(1000), 2);
        assert_eq!(level_for_xp(4000), 3);

        let mut users = runtime.users().lock().await;
        let change = users.add_xp(id, 1500).await.unwrap();
        assert_eq!(change.old_level, 1);
        assert_eq!(change.new_level, 2);

        let user = users.get_by_id(id).await.unwrap();
        assert_eq!(user.xp, 2000);
        assert_eq!(user.level(), 2);
    }
}

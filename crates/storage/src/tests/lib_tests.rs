use super::*;

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn missing_auto_cycle_flags_default_to_disabled() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let loaded = storage
        .load_auto_cycle(AUTO_CYCLE_NAMESPACE)
        .await
        .expect("load");
    assert_eq!(loaded, StoredAutoCycle::default());
}

#[tokio::test]
async fn saves_and_reloads_auto_cycle_flags() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .save_auto_cycle(
            AUTO_CYCLE_NAMESPACE,
            StoredAutoCycle {
                enabled: true,
                cycle_count: 7,
            },
        )
        .await
        .expect("save");
    storage
        .save_auto_cycle(
            AUTO_CYCLE_NAMESPACE,
            StoredAutoCycle {
                enabled: true,
                cycle_count: 8,
            },
        )
        .await
        .expect("save again");

    let loaded = storage
        .load_auto_cycle(AUTO_CYCLE_NAMESPACE)
        .await
        .expect("load");
    assert!(loaded.enabled);
    assert_eq!(loaded.cycle_count, 8);

    let listed = storage
        .list_preferences(AUTO_CYCLE_NAMESPACE)
        .await
        .expect("list");
    let keys: Vec<_> = listed.iter().map(|p| p.key.as_str()).collect();
    assert_eq!(keys, vec!["cycle_count", "enabled"]);
}

#[tokio::test]
async fn garbage_cycle_count_falls_back_to_zero() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .put_preference(AUTO_CYCLE_NAMESPACE, "cycle_count", "lots")
        .await
        .expect("put");
    storage
        .put_preference(AUTO_CYCLE_NAMESPACE, "enabled", "true")
        .await
        .expect("put");

    let loaded = storage
        .load_auto_cycle(AUTO_CYCLE_NAMESPACE)
        .await
        .expect("load");
    assert!(loaded.enabled);
    assert_eq!(loaded.cycle_count, 0);
}

#[tokio::test]
async fn clear_namespace_leaves_other_namespaces() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .put_preference(AUTO_CYCLE_NAMESPACE, "enabled", "true")
        .await
        .expect("put");
    storage
        .put_preference("laser_panel.other", "theme", "dark")
        .await
        .expect("put");

    let removed = storage
        .clear_namespace(AUTO_CYCLE_NAMESPACE)
        .await
        .expect("clear");
    assert_eq!(removed, 1);
    assert_eq!(
        storage
            .get_preference("laser_panel.other", "theme")
            .await
            .expect("get")
            .as_deref(),
        Some("dark")
    );
}

#[test]
fn memory_urls_have_no_file_path() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/panel.db?mode=rwc"),
        Some(PathBuf::from("./data/panel.db"))
    );
}

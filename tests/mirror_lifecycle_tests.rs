mod common;

use common::{User, first_letter, user_indexes, user_row};
use rowmirror::{
    Indexes, IndexConstraint, MemoryConnector, MirrorError, Registry, RegistryConfig,
    TableOptions,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> RegistryConfig {
    RegistryConfig {
        rescan_interval: Duration::from_millis(20),
        ..RegistryConfig::default()
    }
}

fn seeded_store(n: i64) -> Arc<MemoryConnector> {
    let store = Arc::new(MemoryConnector::new());
    for id in 1..=n {
        let login = format!("user{:05}", id);
        store.upsert_row("users", "id", user_row(id, &login, id)).unwrap();
    }
    store
}

#[tokio::test]
async fn test_preload_ten_thousand_rows() {
    let store = seeded_store(10_000);
    let registry = Registry::with_config(store, fast_config()).unwrap();
    registry
        .create_table(
            TableOptions::new("updated_at", user_indexes())
                .without_journal()
                .preload_timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap();

    assert!(registry.is_preloaded::<User>().unwrap());
    assert!(registry.is_all_preloaded().unwrap());
    assert_eq!(registry.size::<User>().unwrap(), 10_000);

    let found: Vec<User> = registry
        .find(&IndexConstraint::new("id", 777i64), |_: &User| true)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].login, "user00777");

    // Every seeded login starts with the same letter.
    let n = registry
        .count::<User, _>(&IndexConstraint::new("first_letter", "u"), |_| true)
        .await
        .unwrap();
    assert_eq!(n, 10_000);

    registry.shutdown().unwrap();
}

#[tokio::test]
async fn test_new_rows_are_picked_up_after_preload() {
    let store = seeded_store(100);
    let registry = Registry::with_config(store.clone(), fast_config()).unwrap();
    registry
        .create_table(
            TableOptions::new("updated_at", user_indexes())
                .without_journal()
                .preload_timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap();
    assert_eq!(registry.size::<User>().unwrap(), 100);

    store.upsert_row("users", "id", user_row(101, "zoe", 500)).unwrap();
    registry.force_update::<User>().await.unwrap();

    assert_eq!(registry.size::<User>().unwrap(), 101);
    let n = registry
        .count::<User, _>(&IndexConstraint::new("first_letter", "z"), |_| true)
        .await
        .unwrap();
    assert_eq!(n, 1);

    // Same id, same letter: the bucket entry is overwritten in place.
    store.upsert_row("users", "id", user_row(101, "zed", 501)).unwrap();
    registry.force_update::<User>().await.unwrap();
    assert_eq!(registry.size::<User>().unwrap(), 101);

    registry.shutdown().unwrap();
}

#[tokio::test]
async fn test_unique_violation_keeps_the_original() {
    let store = Arc::new(MemoryConnector::new());
    store.upsert_row("users", "id", user_row(1, "alice", 1)).unwrap();
    store.upsert_row("users", "id", user_row(2, "bob", 2)).unwrap();

    let indexes = Indexes::builder()
        .unique("id", |u: &User| u.id.into())
        .unique("login", |u: &User| u.login.clone().into())
        .build();

    let registry = Registry::with_config(store, fast_config()).unwrap();
    registry
        .create_table(
            TableOptions::new("updated_at", indexes)
                .without_journal()
                .preload_timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap();

    let intruder = User {
        id: 3,
        login: "alice".to_string(),
        disabled: false,
        updated_at: 9,
    };
    let err = registry.insert_or_update(&intruder).unwrap_err();
    match err {
        MirrorError::UniquenessViolation {
            existing_id, new_id, ..
        } => {
            assert_eq!(existing_id, 1);
            assert_eq!(new_id, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The earlier mapping survives the rejected write.
    let alice = registry
        .find_only::<User, _>(true, &IndexConstraint::new("login", "alice"), |_| true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alice.id, 1);

    registry.shutdown().unwrap();
}

#[tokio::test]
async fn test_refresh_by_ids_fetches_rows_the_poll_misses() {
    let store = seeded_store(10);
    let registry = Registry::with_config(store.clone(), fast_config()).unwrap();
    registry
        .create_table(
            TableOptions::new("updated_at", user_indexes())
                .without_journal()
                .preload_timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap();
    assert_eq!(registry.size::<User>().unwrap(), 10);

    // Indicator below the cursor: the poll loop will never see this row.
    store.upsert_row("users", "id", user_row(99, "ghost", 0)).unwrap();
    registry.force_update::<User>().await.unwrap();
    assert_eq!(registry.size::<User>().unwrap(), 10);

    registry.insert_or_update_by_ids::<User>(&[99, 12345]).await.unwrap();
    assert_eq!(registry.size::<User>().unwrap(), 11);

    registry.shutdown().unwrap();
}

#[tokio::test]
async fn test_matcher_filters_within_the_bucket() {
    let store = Arc::new(MemoryConnector::new());
    for (id, login) in [(1, "ana"), (2, "amy"), (3, "abe")] {
        store.upsert_row("users", "id", user_row(id, login, id)).unwrap();
    }

    let registry = Registry::with_config(store, fast_config()).unwrap();
    registry
        .create_table(
            TableOptions::new("updated_at", user_indexes())
                .without_journal()
                .preload_timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap();

    assert_eq!(first_letter("ana"), "a".into());
    let found: Vec<User> = registry
        .find(&IndexConstraint::new("first_letter", "a"), |u: &User| {
            u.login.ends_with('a')
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].login, "ana");

    // A filtered-out bucket is still an in-memory answer, not a miss.
    let none: Vec<User> = registry
        .find(&IndexConstraint::new("first_letter", "a"), |_: &User| false)
        .await
        .unwrap();
    assert!(none.is_empty());

    registry.shutdown().unwrap();
}

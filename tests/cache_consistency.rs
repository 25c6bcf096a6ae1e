//! Consistency properties of the cached item service.
//!
//! Every test drives `ItemService` against a memory store on a manual clock,
//! counting how often reads reach the repository.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Barrier;
use uuid::Uuid;

use cachet::application::items::{CreateItemCommand, ItemError, ItemService, UpdateItemCommand};
use cachet::application::repos::{CreateItemParams, ItemsRepo, RepoError, UpdateItemParams};
use cachet::cache::{
    CacheClient, CacheConfig, CacheStore, EvictionMode, ManualClock, MemoryStore, PrincipalId,
    ResolvedKey, StoreError,
};
use cachet::domain::items::{ItemPage, ItemQuery, ItemRecord, ItemStatus};
use cachet::infra::memory::InMemoryItemsRepo;

#[derive(Default)]
struct CountingRepo {
    inner: InMemoryItemsRepo,
    lists: AtomicUsize,
    finds: AtomicUsize,
    /// Holds each list call until this many are in flight.
    list_gate: Option<Barrier>,
}

impl CountingRepo {
    fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    fn finds(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    /// Write straight to storage, bypassing the service and its eviction.
    async fn insert_behind_cache(&self, owner: &str, title: &str) -> ItemRecord {
        self.inner
            .create_item(CreateItemParams {
                owner_id: PrincipalId::from(owner),
                title: title.into(),
                notes: None,
            })
            .await
            .expect("insert")
    }
}

#[async_trait]
impl ItemsRepo for CountingRepo {
    async fn list_items(
        &self,
        owner_id: &PrincipalId,
        query: &ItemQuery,
    ) -> Result<ItemPage, RepoError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.list_gate {
            gate.wait().await;
        }
        self.inner.list_items(owner_id, query).await
    }

    async fn find_item(&self, id: Uuid) -> Result<Option<ItemRecord>, RepoError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find_item(id).await
    }

    async fn create_item(&self, params: CreateItemParams) -> Result<ItemRecord, RepoError> {
        self.inner.create_item(params).await
    }

    async fn update_item(&self, params: UpdateItemParams) -> Result<ItemRecord, RepoError> {
        self.inner.update_item(params).await
    }

    async fn delete_item(
        &self,
        owner_id: &PrincipalId,
        id: Uuid,
    ) -> Result<ItemRecord, RepoError> {
        self.inner.delete_item(owner_id, id).await
    }
}

struct Harness {
    service: ItemService,
    repo: Arc<CountingRepo>,
    clock: Arc<ManualClock>,
}

fn harness(config: CacheConfig) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemoryStore::with_clock(&config, clock.clone()));
    harness_with_store(config, store, clock)
}

fn harness_with_store(
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    clock: Arc<ManualClock>,
) -> Harness {
    let repo = Arc::new(CountingRepo::default());
    let client = CacheClient::new(store, &config);
    let service = ItemService::new(repo.clone(), client, &config).expect("service wiring");
    Harness {
        service,
        repo,
        clock,
    }
}

fn u1() -> PrincipalId {
    PrincipalId::from("u1")
}

fn u2() -> PrincipalId {
    PrincipalId::from("u2")
}

fn create(title: &str) -> CreateItemCommand {
    CreateItemCommand {
        title: title.into(),
        notes: None,
    }
}

fn archived() -> ItemQuery {
    ItemQuery::default().with_status(ItemStatus::Archived)
}

fn active() -> ItemQuery {
    ItemQuery::default().with_status(ItemStatus::Active)
}

#[tokio::test]
async fn repeated_list_is_served_once_and_byte_identical() {
    let h = harness(CacheConfig::default());
    h.repo.insert_behind_cache("u1", "kettle").await;

    let first = h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    let second = h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();

    assert_eq!(h.repo.lists(), 1);
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

#[tokio::test]
async fn list_ttl_scenario() {
    let h = harness(CacheConfig::default());
    h.repo.insert_behind_cache("u1", "first").await;

    // t0
    let r1 = h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    assert_eq!(h.repo.lists(), 1);

    h.repo.insert_behind_cache("u1", "second").await;

    // t0 + 100000 ms
    h.clock.advance(Duration::from_millis(100_000));
    let cached = h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    assert_eq!(h.repo.lists(), 1);
    assert_eq!(cached, r1);

    // t0 + 300001 ms
    h.clock.advance(Duration::from_millis(200_001));
    let r2 = h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    assert_eq!(h.repo.lists(), 2);
    assert_eq!(r1.total, 1);
    assert_eq!(r2.total, 2);
}

#[tokio::test]
async fn entry_expires_exactly_at_ttl() {
    let h = harness(CacheConfig::default());
    let item = h.repo.insert_behind_cache("u1", "lamp").await;

    h.service.get_item(&u1(), item.id).await.unwrap();
    assert_eq!(h.repo.finds(), 1);

    h.clock.advance(Duration::from_millis(900_000 - 1));
    h.service.get_item(&u1(), item.id).await.unwrap();
    assert_eq!(h.repo.finds(), 1, "hit just before the detail TTL");

    h.clock.advance(Duration::from_millis(2));
    h.service.get_item(&u1(), item.id).await.unwrap();
    assert_eq!(h.repo.finds(), 2, "miss just after the detail TTL");
}

#[tokio::test]
async fn permuted_query_fields_share_one_entry() {
    let h = harness(CacheConfig::default());

    let a: ItemQuery = serde_json::from_str(r#"{"status":"active","page":2}"#).unwrap();
    let b: ItemQuery = serde_json::from_str(r#"{"page":2,"status":"active"}"#).unwrap();

    h.service.list_items(&u1(), a).await.unwrap();
    h.service.list_items(&u1(), b).await.unwrap();
    assert_eq!(h.repo.lists(), 1);
}

#[tokio::test]
async fn create_evicts_common_shapes_but_not_uncommon_ones() {
    let h = harness(CacheConfig::default());
    h.repo.insert_behind_cache("u1", "old").await;

    let default_before = h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    let active_before = h.service.list_items(&u1(), active()).await.unwrap();
    h.service.list_items(&u1(), archived()).await.unwrap();
    assert_eq!(h.repo.lists(), 3);

    let created = h.service.create_item(&u1(), create("new")).await.unwrap();

    // `{}` is a common shape: forced miss, fresh result.
    let default_after = h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    assert_eq!(h.repo.lists(), 4);
    assert_eq!(default_after.total, default_before.total + 1);
    assert!(default_after.items.iter().any(|item| item.id == created.id));

    // Status-filtered shapes are not enumerated: served from cache, stale.
    let active_after = h.service.list_items(&u1(), active()).await.unwrap();
    h.service.list_items(&u1(), archived()).await.unwrap();
    assert_eq!(h.repo.lists(), 4);
    assert_eq!(active_after, active_before);

    // The staleness is bounded by the list TTL.
    assert_eq!(
        h.service.list_staleness_bound(),
        Duration::from_millis(300_000)
    );
    h.clock.advance(h.service.list_staleness_bound());
    let active_fresh = h.service.list_items(&u1(), active()).await.unwrap();
    assert_eq!(h.repo.lists(), 5);
    assert!(active_fresh.items.iter().any(|item| item.id == created.id));
}

#[tokio::test]
async fn create_evicts_the_new_items_detail_key() {
    let h = harness(CacheConfig::default());
    let created = h.service.create_item(&u1(), create("fresh")).await.unwrap();

    h.service.get_item(&u1(), created.id).await.unwrap();
    assert_eq!(h.repo.finds(), 1);
}

#[tokio::test]
async fn update_forces_recompute_of_detail_and_lists() {
    let h = harness(CacheConfig::default());
    let item = h.repo.insert_behind_cache("u1", "draft").await;

    h.service.get_item(&u1(), item.id).await.unwrap();
    h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    h.service
        .list_items(&u1(), ItemQuery::default().with_page(1))
        .await
        .unwrap();
    assert_eq!(h.repo.lists(), 1, "`{{}}` and an explicit first page share a key");

    h.service
        .update_item(
            &u1(),
            item.id,
            UpdateItemCommand {
                title: Some("final".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let detail = h.service.get_item(&u1(), item.id).await.unwrap();
    assert_eq!(h.repo.finds(), 2);
    assert_eq!(detail.title, "final");

    let list = h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    h.service
        .list_items(&u1(), ItemQuery::default().with_page(1))
        .await
        .unwrap();
    assert_eq!(h.repo.lists(), 2);
    assert_eq!(list.items[0].title, "final");
}

#[tokio::test]
async fn delete_evicts_detail() {
    let h = harness(CacheConfig::default());
    let item = h.repo.insert_behind_cache("u1", "gone").await;

    h.service.get_item(&u1(), item.id).await.unwrap();
    h.service.delete_item(&u1(), item.id).await.unwrap();

    assert!(matches!(
        h.service.get_item(&u1(), item.id).await,
        Err(ItemError::NotFound)
    ));
}

#[tokio::test]
async fn cached_item_is_never_served_to_another_principal() {
    let h = harness(CacheConfig::default());
    let item = h.repo.insert_behind_cache("u1", "private").await;

    h.service.get_item(&u1(), item.id).await.unwrap();

    // Same `detail:{item_id}` key, different caller: same answer as a cold miss.
    let foreign = h.service.get_item(&u2(), item.id).await;
    assert!(matches!(foreign, Err(ItemError::NotFound)));

    let cold = harness(CacheConfig::default());
    let copy = cold.repo.insert_behind_cache("u1", "private").await;
    assert!(matches!(
        cold.service.get_item(&u2(), copy.id).await,
        Err(ItemError::NotFound)
    ));

    // u1's entry is untouched by the rejected lookup.
    let finds = h.repo.finds();
    h.service.get_item(&u1(), item.id).await.unwrap();
    assert_eq!(h.repo.finds(), finds);
}

#[tokio::test]
async fn lists_are_keyed_per_principal() {
    let h = harness(CacheConfig::default());
    h.repo.insert_behind_cache("u1", "mine").await;

    let mine = h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    let theirs = h.service.list_items(&u2(), ItemQuery::default()).await.unwrap();

    assert_eq!(mine.total, 1);
    assert_eq!(theirs.total, 0);
    assert_eq!(h.repo.lists(), 2);
}

#[tokio::test]
async fn owner_index_mode_evicts_uncommon_shapes_too() {
    let config = CacheConfig {
        eviction_mode: EvictionMode::OwnerIndex,
        ..Default::default()
    };
    let h = harness(config);
    h.repo.insert_behind_cache("u2", "other").await;

    h.service.list_items(&u1(), active()).await.unwrap();
    h.service.list_items(&u2(), ItemQuery::default()).await.unwrap();
    assert_eq!(h.repo.lists(), 2);

    let created = h.service.create_item(&u1(), create("new")).await.unwrap();

    let active_after = h.service.list_items(&u1(), active()).await.unwrap();
    assert_eq!(h.repo.lists(), 3);
    assert!(active_after.items.iter().any(|item| item.id == created.id));

    // Another principal's entries survive.
    h.service.list_items(&u2(), ItemQuery::default()).await.unwrap();
    assert_eq!(h.repo.lists(), 3);
    assert_eq!(h.service.list_staleness_bound(), Duration::ZERO);
}

#[tokio::test]
async fn archive_evicts_by_hand() {
    let h = harness(CacheConfig::default());
    let item = h.repo.insert_behind_cache("u1", "box").await;

    let before = h.service.list_items(&u1(), archived()).await.unwrap();
    assert_eq!(before.total, 0);
    h.service.get_item(&u1(), item.id).await.unwrap();

    let archived_item = h.service.archive_item(&u1(), item.id).await.unwrap();
    assert_eq!(archived_item.status, ItemStatus::Archived);

    let after = h.service.list_items(&u1(), archived()).await.unwrap();
    assert_eq!(after.total, 1);
    let detail = h.service.get_item(&u1(), item.id).await.unwrap();
    assert_eq!(detail.status, ItemStatus::Archived);
}

#[tokio::test]
async fn disabled_cache_passes_every_call_through() {
    let config = CacheConfig {
        enabled: false,
        ..Default::default()
    };
    let h = harness(config);

    h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    assert_eq!(h.repo.lists(), 2);
    assert_eq!(h.service.list_staleness_bound(), Duration::ZERO);
}

/// A store whose every operation fails, or whose deletes fail for chosen keys.
struct BrokenStore {
    inner: MemoryStore,
    reads_and_writes_fail: bool,
    failing_delete: Option<String>,
}

#[async_trait]
impl CacheStore for BrokenStore {
    async fn get(&self, key: &ResolvedKey) -> Result<Option<Bytes>, StoreError> {
        if self.reads_and_writes_fail {
            return Err(StoreError::unavailable("connection refused"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &ResolvedKey, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        if self.reads_and_writes_fail {
            return Err(StoreError::Timeout(Duration::from_millis(100)));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &ResolvedKey) -> Result<(), StoreError> {
        if self.reads_and_writes_fail || self.failing_delete.as_deref() == Some(key.as_str()) {
            return Err(StoreError::unavailable("connection reset"));
        }
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn store_outage_never_fails_reads_or_writes() {
    let config = CacheConfig::default();
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(BrokenStore {
        inner: MemoryStore::with_clock(&config, clock.clone()),
        reads_and_writes_fail: true,
        failing_delete: None,
    });
    let h = harness_with_store(config, store, clock);

    let created = h.service.create_item(&u1(), create("resilient")).await.unwrap();
    let fetched = h.service.get_item(&u1(), created.id).await.unwrap();
    h.service.get_item(&u1(), created.id).await.unwrap();

    assert_eq!(fetched.id, created.id);
    assert_eq!(h.repo.finds(), 2, "every read falls through to the repository");
}

#[tokio::test]
async fn failed_eviction_leaves_mutation_successful() {
    let config = CacheConfig::default();
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(BrokenStore {
        inner: MemoryStore::with_clock(&config, clock.clone()),
        reads_and_writes_fail: false,
        failing_delete: Some("list:u1:{}".to_string()),
    });
    let h = harness_with_store(config, store, clock);
    let item = h.repo.insert_behind_cache("u1", "old title").await;

    h.service.get_item(&u1(), item.id).await.unwrap();
    h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();

    let updated = h
        .service
        .update_item(
            &u1(),
            item.id,
            UpdateItemCommand {
                title: Some("new title".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(updated.is_ok(), "eviction failure must not fail the write");

    // The detail key was still evicted; the failed list key stays stale.
    assert_eq!(h.service.get_item(&u1(), item.id).await.unwrap().title, "new title");
    let list = h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    assert_eq!(list.items[0].title, "old title");
}

#[tokio::test]
async fn default_valued_spellings_share_the_evicted_entry() {
    let h = harness(CacheConfig::default());
    h.repo.insert_behind_cache("u1", "old").await;

    let spellings: Vec<ItemQuery> = [
        r#"{"per_page":20}"#,
        r#"{"sort":"newest"}"#,
        r#"{"page":1,"per_page":20,"sort":"newest"}"#,
    ]
    .iter()
    .map(|raw| serde_json::from_str(raw).unwrap())
    .collect();

    let before = h.service.list_items(&u1(), spellings[0].clone()).await.unwrap();
    for query in &spellings[1..] {
        h.service.list_items(&u1(), query.clone()).await.unwrap();
    }
    h.service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    assert_eq!(h.repo.lists(), 1, "one listing, one entry");

    h.service.create_item(&u1(), create("new")).await.unwrap();

    for query in spellings {
        let after = h.service.list_items(&u1(), query).await.unwrap();
        assert_eq!(after.total, before.total + 1);
    }
    assert_eq!(h.repo.lists(), 2);
}

#[tokio::test]
async fn owner_index_stays_within_store_capacity() {
    let config = CacheConfig {
        eviction_mode: EvictionMode::OwnerIndex,
        store_capacity: 4,
        ..Default::default()
    };
    let h = harness(config);

    for page in 1..=1000 {
        h.service
            .list_items(&u1(), ItemQuery::default().with_page(page))
            .await
            .unwrap();
    }

    let index = h.service.owner_index().expect("owner index mode");
    assert!(index.key_count() <= 4, "indexed {} keys", index.key_count());
}

#[tokio::test]
async fn owner_index_still_evicts_recent_lists_after_pruning() {
    let config = CacheConfig {
        eviction_mode: EvictionMode::OwnerIndex,
        store_capacity: 4,
        ..Default::default()
    };
    let h = harness(config);

    for page in 1..=10 {
        h.service
            .list_items(&u1(), ItemQuery::default().with_page(page))
            .await
            .unwrap();
    }
    let filtered = active();
    h.service.list_items(&u1(), filtered.clone()).await.unwrap();
    assert_eq!(h.repo.lists(), 11);

    let created = h.service.create_item(&u1(), create("new")).await.unwrap();

    let after = h.service.list_items(&u1(), filtered).await.unwrap();
    assert_eq!(h.repo.lists(), 12);
    assert!(after.items.iter().any(|item| item.id == created.id));
}

#[tokio::test]
async fn concurrent_misses_each_run_the_handler() {
    let config = CacheConfig::default();
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemoryStore::with_clock(&config, clock));
    let repo = Arc::new(CountingRepo {
        list_gate: Some(Barrier::new(2)),
        ..Default::default()
    });
    let service = ItemService::new(
        repo.clone(),
        CacheClient::new(store.clone(), &config),
        &config,
    )
    .expect("service wiring");
    repo.insert_behind_cache("u1", "shared").await;

    // Both calls miss before either stores its result; nothing coalesces them.
    let principal = u1();
    let (a, b) = tokio::join!(
        service.list_items(&principal, ItemQuery::default()),
        service.list_items(&principal, ItemQuery::default()),
    );
    assert_eq!(repo.lists(), 2);
    assert_eq!(a.unwrap(), b.unwrap());

    // Both wrote the same key; one entry remains and serves the next call.
    assert_eq!(store.len(), 1);
    service.list_items(&u1(), ItemQuery::default()).await.unwrap();
    assert_eq!(repo.lists(), 2);
}

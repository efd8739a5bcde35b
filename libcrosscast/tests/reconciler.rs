//! Scheduled post reconciliation against fixture platforms

mod common;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::{DateTime, Duration, Utc};
use libcrosscast::config::SchedulingConfig;
use libcrosscast::types::{PostContent, StatusPatch};
use libcrosscast::{
    CrosscastError, Database, FailReason, MemoryStore, PostStatus, PublishDispatcher, Reconciler,
    ScheduledPost, ScheduledPostStore,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Clone)]
struct Feed {
    hits: Arc<AtomicUsize>,
    accept: bool,
}

async fn feed_server(accept: bool) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/v1/page1/feed",
            post(|State(feed): State<Feed>| async move {
                feed.hits.fetch_add(1, Ordering::SeqCst);
                if feed.accept {
                    (StatusCode::OK, Json(json!({"id": "page1_7"})))
                } else {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({"error": {"message": "Invalid parameter", "type": "OAuthException", "code": 100}})),
                    )
                }
            }),
        )
        .with_state(Feed {
            hits: hits.clone(),
            accept,
        });
    (common::spawn(router).await, hits)
}

fn scheduled(platforms: &[&str], at: DateTime<Utc>, max_retries: u32) -> ScheduledPost {
    ScheduledPost::new(
        "u1".to_string(),
        platforms.iter().map(|p| p.to_string()).collect(),
        PostContent {
            caption: "Weekly recap".to_string(),
            ..Default::default()
        },
        at,
        max_retries,
    )
}

fn scheduling(secret: Option<&str>) -> SchedulingConfig {
    SchedulingConfig {
        trigger_secret: secret.map(str::to_string),
        ..Default::default()
    }
}

fn reconciler_over_memory(base: &str, secret: Option<&str>) -> (Reconciler, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store.insert_credential(common::page_credential("u1"));
    let config = common::facebook_config(base);
    let dispatcher = Arc::new(PublishDispatcher::new(&config, store.clone(), common::http_client()));
    (Reconciler::new(store.clone(), dispatcher, &scheduling(secret)), store)
}

async fn stored(store: &MemoryStore, id: &str) -> ScheduledPost {
    ScheduledPostStore::get(store, id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_failing_post_exhausts_retry_budget() {
    let (base, hits) = feed_server(false).await;
    let (reconciler, store) = reconciler_over_memory(&base, None);

    let now = Utc::now();
    let post = scheduled(&["facebook"], now - Duration::minutes(1), 3);
    store.schedule(&post).await.unwrap();

    let summary = reconciler.run_once(now).await.unwrap();
    assert_eq!(summary.processed_count, 1);
    assert_eq!(summary.results[0].status, PostStatus::Pending);
    let current = stored(&store, &post.id).await;
    assert_eq!(current.retry_count, 1);
    assert_eq!(current.scheduled_at, now + Duration::minutes(5));
    assert_eq!(
        current.platform_results[0].fail_reason,
        Some(FailReason::PlatformRejected)
    );

    // Not due again until the backoff has passed
    assert_eq!(reconciler.run_once(now).await.unwrap().processed_count, 0);

    let second = now + Duration::minutes(5);
    reconciler.run_once(second).await.unwrap();
    assert_eq!(stored(&store, &post.id).await.retry_count, 2);

    let third = second + Duration::minutes(5);
    let summary = reconciler.run_once(third).await.unwrap();
    assert_eq!(summary.results[0].status, PostStatus::Failed);

    let current = stored(&store, &post.id).await;
    assert_eq!(current.status, PostStatus::Failed);
    assert_eq!(current.retry_count, 3);
    assert_eq!(current.scheduled_at, third);

    assert_eq!(reconciler.run_once(third + Duration::hours(1)).await.unwrap().processed_count, 0);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_completed_post_is_never_redispatched() {
    let (base, hits) = feed_server(true).await;
    let (reconciler, store) = reconciler_over_memory(&base, None);

    let now = Utc::now();
    let post = scheduled(&["facebook"], now, 3);
    store.schedule(&post).await.unwrap();

    let summary = reconciler.run_once(now).await.unwrap();
    assert_eq!(summary.results[0].status, PostStatus::Completed);
    assert_eq!(summary.results[0].platforms[0].external_id.as_deref(), Some("page1_7"));

    assert_eq!(reconciler.run_once(now + Duration::days(1)).await.unwrap().processed_count, 0);
    assert_eq!(stored(&store, &post.id).await.status, PostStatus::Completed);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_only_dispatches_outstanding_platforms() {
    let (base, hits) = feed_server(true).await;
    let (reconciler, store) = reconciler_over_memory(&base, None);

    let now = Utc::now();
    // No YouTube credential is stored, so that lane keeps failing
    let post = scheduled(&["facebook", "youtube"], now, 5);
    store.schedule(&post).await.unwrap();

    reconciler.run_once(now).await.unwrap();
    let later = now + Duration::minutes(5);
    let summary = reconciler.run_once(later).await.unwrap();

    assert_eq!(summary.results[0].status, PostStatus::Pending);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let current = stored(&store, &post.id).await;
    assert_eq!(current.retry_count, 2);
    assert_eq!(current.platform_results.len(), 2);
    let facebook = current
        .platform_results
        .iter()
        .find(|r| r.platform == "facebook")
        .unwrap();
    assert!(facebook.success);
    let youtube = current
        .platform_results
        .iter()
        .find(|r| r.platform == "youtube")
        .unwrap();
    assert_eq!(youtube.fail_reason, Some(FailReason::CredentialMissing));
}

#[tokio::test]
async fn test_batch_posts_are_independent() {
    let (base, _hits) = feed_server(true).await;
    let (reconciler, store) = reconciler_over_memory(&base, None);

    let now = Utc::now();
    let good = scheduled(&["facebook"], now - Duration::minutes(2), 3);
    let bad = scheduled(&["myspace"], now - Duration::minutes(1), 1);
    let future = scheduled(&["facebook"], now + Duration::hours(1), 3);
    for post in [&good, &bad, &future] {
        store.schedule(post).await.unwrap();
    }

    let summary = reconciler.run_once(now).await.unwrap();
    assert_eq!(summary.processed_count, 2);

    assert_eq!(stored(&store, &good.id).await.status, PostStatus::Completed);
    assert_eq!(stored(&store, &bad.id).await.status, PostStatus::Failed);
    assert_eq!(stored(&store, &future.id).await.status, PostStatus::Pending);
}

#[tokio::test]
async fn test_trigger_authenticates_secret() {
    let (base, _hits) = feed_server(true).await;
    let now = Utc::now();

    let (open, _) = reconciler_over_memory(&base, None);
    assert!(matches!(
        open.trigger("anything", now).await,
        Err(CrosscastError::Unauthorized(_))
    ));

    let (guarded, store) = reconciler_over_memory(&base, Some("s3cret"));
    store.schedule(&scheduled(&["facebook"], now, 3)).await.unwrap();

    assert!(matches!(
        guarded.trigger("wrong", now).await,
        Err(CrosscastError::Unauthorized(_))
    ));
    assert!(matches!(
        guarded.trigger("s3cre", now).await,
        Err(CrosscastError::Unauthorized(_))
    ));

    let summary = guarded.trigger("s3cret", now).await.unwrap();
    assert_eq!(summary.processed_count, 1);

    let value = serde_json::to_value(&summary).unwrap();
    assert_eq!(value["processedCount"], 1);
    assert_eq!(value["results"][0]["status"], "completed");
    assert!(value["results"][0]["postId"].is_string());
}

#[tokio::test]
async fn test_reconciles_posts_persisted_in_sqlite() {
    let (base, _hits) = feed_server(true).await;
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("crosscast.db");
    let db = Arc::new(Database::new(db_path.to_str().unwrap()).await.unwrap());

    use libcrosscast::CredentialStore;
    let credential = common::page_credential("u1");
    db.set(
        "u1",
        credential.platform,
        libcrosscast::CredentialPatch::from_record(&credential),
    )
    .await
    .unwrap();

    let config = common::facebook_config(&base);
    let dispatcher = Arc::new(PublishDispatcher::new(&config, db.clone(), common::http_client()));
    let reconciler = Reconciler::new(db.clone(), dispatcher, &scheduling(None));

    let now = Utc::now();
    let post = scheduled(&["facebook"], now - Duration::seconds(5), 3);
    db.schedule(&post).await.unwrap();

    let summary = reconciler.run_once(now).await.unwrap();
    assert_eq!(summary.processed_count, 1);

    let current = ScheduledPostStore::get(db.as_ref(), &post.id).await.unwrap().unwrap();
    assert_eq!(current.status, PostStatus::Completed);
    assert_eq!(current.platform_results[0].external_id.as_deref(), Some("page1_7"));
}

async fn sqlite_with_page(temp: &TempDir) -> Arc<Database> {
    use libcrosscast::CredentialStore;

    let db_path = temp.path().join("crosscast.db");
    let db = Arc::new(Database::new(db_path.to_str().unwrap()).await.unwrap());
    let credential = common::page_credential("u1");
    db.set(
        "u1",
        credential.platform,
        libcrosscast::CredentialPatch::from_record(&credential),
    )
    .await
    .unwrap();
    db
}

fn sqlite_reconciler(base: &str, db: &Arc<Database>) -> Arc<Reconciler> {
    let config = common::facebook_config(base);
    let dispatcher = Arc::new(PublishDispatcher::new(&config, db.clone(), common::http_client()));
    Arc::new(Reconciler::new(db.clone(), dispatcher, &scheduling(None)))
}

async fn run_two_passes(first: Arc<Reconciler>, second: Arc<Reconciler>, now: DateTime<Utc>) -> usize {
    let a = tokio::spawn(async move { first.run_once(now).await.unwrap() });
    let b = tokio::spawn(async move { second.run_once(now).await.unwrap() });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    a.processed_count + b.processed_count
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_passes_publish_each_sqlite_post_once() {
    let (base, hits) = feed_server(true).await;
    let temp = TempDir::new().unwrap();
    let db = sqlite_with_page(&temp).await;

    let now = Utc::now();
    let mut ids = Vec::new();
    for i in 0..40 {
        let post = scheduled(&["facebook"], now - Duration::seconds(i), 3);
        db.schedule(&post).await.unwrap();
        ids.push(post.id);
    }

    let processed = run_two_passes(
        sqlite_reconciler(&base, &db),
        sqlite_reconciler(&base, &db),
        now,
    )
    .await;

    assert_eq!(processed, 40);
    assert_eq!(hits.load(Ordering::SeqCst), 40);
    for id in &ids {
        let post = ScheduledPostStore::get(db.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(post.status, PostStatus::Completed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_passes_publish_each_memory_post_once() {
    let (base, hits) = feed_server(true).await;
    let store = Arc::new(MemoryStore::new());
    store.insert_credential(common::page_credential("u1"));
    let config = common::facebook_config(&base);
    let reconciler = || {
        let dispatcher = Arc::new(PublishDispatcher::new(&config, store.clone(), common::http_client()));
        Arc::new(Reconciler::new(store.clone(), dispatcher, &scheduling(None)))
    };

    let now = Utc::now();
    for _ in 0..40 {
        store.schedule(&scheduled(&["facebook"], now, 3)).await.unwrap();
    }

    let processed = run_two_passes(reconciler(), reconciler(), now).await;

    assert_eq!(processed, 40);
    assert_eq!(hits.load(Ordering::SeqCst), 40);
}

#[tokio::test]
async fn test_mixed_case_platform_is_published_once() {
    let (base, hits) = feed_server(true).await;
    let (reconciler, store) = reconciler_over_memory(&base, None);

    let now = Utc::now();
    let post = scheduled(&["Facebook"], now, 3);
    store.schedule(&post).await.unwrap();

    let summary = reconciler.run_once(now).await.unwrap();
    assert_eq!(summary.results[0].status, PostStatus::Completed);

    for cycle in 1..=3 {
        let later = now + Duration::minutes(5 * cycle);
        assert_eq!(reconciler.run_once(later).await.unwrap().processed_count, 0);
    }

    let current = stored(&store, &post.id).await;
    assert_eq!(current.platforms, vec!["facebook".to_string()]);
    assert_eq!(current.status, PostStatus::Completed);
    assert_eq!(current.retry_count, 0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

/// Post store whose next result write fails
struct FlakyPostStore {
    inner: Arc<MemoryStore>,
    failing_writes: AtomicUsize,
}

#[async_trait]
impl ScheduledPostStore for FlakyPostStore {
    async fn list_due(&self, now: DateTime<Utc>) -> libcrosscast::Result<Vec<ScheduledPost>> {
        self.inner.list_due(now).await
    }

    async fn claim(&self, id: &str) -> libcrosscast::Result<bool> {
        self.inner.claim(id).await
    }

    async fn update_status(&self, id: &str, patch: StatusPatch) -> libcrosscast::Result<()> {
        let writes_results = patch.platform_results.is_some();
        if writes_results
            && self
                .failing_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(CrosscastError::InvalidInput("disk full".to_string()));
        }
        self.inner.update_status(id, patch).await
    }

    async fn schedule(&self, post: &ScheduledPost) -> libcrosscast::Result<()> {
        self.inner.schedule(post).await
    }

    async fn get(&self, id: &str) -> libcrosscast::Result<Option<ScheduledPost>> {
        ScheduledPostStore::get(self.inner.as_ref(), id).await
    }
}

#[tokio::test]
async fn test_store_failure_after_claim_requeues_post() {
    let (base, hits) = feed_server(true).await;
    let inner = Arc::new(MemoryStore::new());
    inner.insert_credential(common::page_credential("u1"));
    let posts = Arc::new(FlakyPostStore {
        inner: inner.clone(),
        failing_writes: AtomicUsize::new(1),
    });
    let config = common::facebook_config(&base);
    let dispatcher = Arc::new(PublishDispatcher::new(&config, inner.clone(), common::http_client()));
    let reconciler = Reconciler::new(posts, dispatcher, &scheduling(None));

    let now = Utc::now();
    let post = scheduled(&["facebook"], now, 3);
    inner.schedule(&post).await.unwrap();

    let summary = reconciler.run_once(now).await.unwrap();
    assert_eq!(summary.processed_count, 0);

    let current = stored(&inner, &post.id).await;
    assert_eq!(current.status, PostStatus::Pending);
    assert_eq!(current.retry_count, 0);

    // Picked up again by the next pass
    let summary = reconciler.run_once(now).await.unwrap();
    assert_eq!(summary.results[0].status, PostStatus::Completed);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

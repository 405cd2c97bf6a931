use std::sync::Arc;

use tempfile::tempdir;
use wikivault_lib::client::{ChildRef, MockWikiClient, UserInfo, WikiClient};
use wikivault_lib::discovery::{DiscoveryConfig, DiscoveryContext};
use wikivault_lib::domain::{FetchedPage, QueueItem, QueueItemStatus, SourceType};
use wikivault_lib::governor::{FailureGovernor, FailureThresholds};
use wikivault_lib::manifest_store::ManifestStore;
use wikivault_lib::queue::{QueueState, SnapshotStore};
use wikivault_lib::recovery::{self, ResumeOptions};
use wikivault_lib::scheduler::{CancellationFlag, RunOutcome, Scheduler, SchedulerConfig};
use wikivault_lib::transform::PlainTextTransformer;

fn page(id: &str, title: &str, body_html: &str) -> FetchedPage {
    FetchedPage {
        id: id.to_string(),
        title: title.to_string(),
        version: 1,
        body_html: body_html.to_string(),
        parent_id: None,
    }
}

fn build_scheduler(
    client: Arc<dyn WikiClient>,
    output_dir: &std::path::Path,
    config: SchedulerConfig,
    thresholds: FailureThresholds,
) -> (Scheduler, FailureGovernor) {
    let snapshot_store = SnapshotStore::new(output_dir.join("snapshot.json"), 3);
    let manifest_store = ManifestStore::new(output_dir.join("manifest.json"));
    let scheduler = Scheduler::new(
        client,
        Arc::new(PlainTextTransformer),
        DiscoveryConfig::default(),
        DiscoveryContext {
            space_key: "ENG".into(),
            base_url: "https://wiki.example.com".into(),
        },
        config,
        snapshot_store,
        manifest_store,
        output_dir.to_path_buf(),
    );
    (scheduler, FailureGovernor::new(thresholds))
}

fn default_config() -> SchedulerConfig {
    SchedulerConfig {
        max_concurrency: 4,
        discovery_phase_cap: 10,
        persistence_threshold: 1,
        checkpoint_interval_ms: 30_000,
        limit: None,
        force_full: false,
    }
}

#[tokio::test]
async fn scenario_1_happy_path_two_pages() {
    let dir = tempdir().unwrap();
    let client = Arc::new(MockWikiClient::new());
    client.seed_page(page(
        "A",
        "A",
        r#"<a data-linked-resource-id="B">See B</a>"#,
    ));
    client.seed_page(page("B", "B", "<p>leaf page</p>"));

    let mut state = QueueState::new(100);
    state.add(QueueItem::new_pending("A", "A", SourceType::Initial)).unwrap();

    let (scheduler, governor) = build_scheduler(client, dir.path(), default_config(), FailureThresholds::default());
    let summary = scheduler
        .run(state, governor, CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Drained);
    assert_eq!(summary.metrics.completed, 2);

    let snapshot_store = SnapshotStore::new(dir.path().join("snapshot.json"), 3);
    let loaded = snapshot_store.load().unwrap().unwrap();
    assert!(loaded.processed_pages.contains("A"));
    assert!(loaded.processed_pages.contains("B"));
    assert!(dir.path().join("A.md").exists());
    assert!(dir.path().join("B.md").exists());
}

#[tokio::test]
async fn scenario_2_rate_limit_honored_before_retry() {
    // Exercises the exact retry decision the scheduler's worker-failure
    // branch makes, without driving the full scheduler through a real 60s
    // wall-clock wait (the rate-limit category's required backoff floor).
    let client = MockWikiClient::new();
    client.seed_page(page("A", "A", "<p>content</p>"));
    // Fails once with a Retry-After hint, then succeeds.
    client.script_http_error_times("A", 429, "slow down", Some(300), Some(1));

    let mut state = QueueState::new(100);
    state.add(QueueItem::new_pending("A", "A", SourceType::Initial)).unwrap();

    let id = state.next(chrono::Utc::now()).unwrap();
    let err = client.fetch_page(&id).await.unwrap_err();
    let message = err.classification_message();
    state.mark_failed(&id, message.clone()).unwrap();
    assert_eq!(state.items["A"].attempts, 0, "a terminal mark_failed alone must not bump retryCount");

    let category = wikivault_lib::retry::classify(&message);
    assert_eq!(category, wikivault_lib::error::ErrorCategory::RateLimit);
    let policy = wikivault_lib::retry::policy_for(category);
    let delay_ms = wikivault_lib::retry::compute_delay_ms(&policy, 0, err.retry_after_ms());
    assert!(
        delay_ms >= 60_000,
        "rate limit's 60s floor must dominate a smaller Retry-After hint, got {delay_ms}ms"
    );

    let next_attempt = chrono::Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
    state.retry(&id, Some(next_attempt)).unwrap();
    assert_eq!(state.items["A"].attempts, 1);
    assert!(
        state.next(chrono::Utc::now()).is_none(),
        "must not be redispatched before the computed delay elapses"
    );

    let after_backoff = next_attempt + chrono::Duration::seconds(1);
    let id2 = state.next(after_backoff).unwrap();
    let fetched = client.fetch_page(&id2).await.unwrap();
    state.mark_completed(&id2).unwrap();
    assert_eq!(fetched.title, "A");
    assert_eq!(state.metrics.completed, 1);
}

#[tokio::test]
async fn scenario_3_auth_error_is_terminal_and_aborts() {
    let dir = tempdir().unwrap();
    let client = Arc::new(MockWikiClient::new());
    client.script_http_error("A", 401, "unauthorized");

    let mut state = QueueState::new(100);
    state.add(QueueItem::new_pending("A", "A", SourceType::Initial)).unwrap();

    let thresholds = FailureThresholds {
        allow_failures: false,
        max_page_failures: Some(0),
        max_attachment_failures: None,
        max_attachment_failure_percent: None,
        restricted_pages_allowed: true,
    };
    let (scheduler, governor) = build_scheduler(client, dir.path(), default_config(), thresholds);
    let result = scheduler.run(state, governor, CancellationFlag::new()).await;

    let err = result.unwrap_err();
    assert_eq!(err.exit_code(), 1);

    let snapshot_store = SnapshotStore::new(dir.path().join("snapshot.json"), 3);
    let loaded = snapshot_store.load().unwrap().unwrap();
    assert_eq!(loaded.items["A"].status, QueueItemStatus::Failed);
    assert_eq!(loaded.items["A"].attempts, 0);
}

#[tokio::test]
async fn scenario_4_corruption_recovery_falls_back_to_backup() {
    let dir = tempdir().unwrap();
    let snapshot_path = dir.path().join("snapshot.json");
    let store = SnapshotStore::new(&snapshot_path, 3);

    let mut good_state = QueueState::new(100);
    good_state.add(QueueItem::new_pending("A", "A", SourceType::Initial)).unwrap();
    good_state.add(QueueItem::new_pending("B", "B", SourceType::Initial)).unwrap();
    store.save(&good_state).unwrap();

    let backup = wikivault_lib::fs_util::backup_path_for(&snapshot_path, "20240101T000000");
    std::fs::copy(&snapshot_path, &backup).unwrap();

    // Corrupt the live snapshot, then append a third item to simulate work
    // done after the backup was taken but lost to the corruption.
    good_state.add(QueueItem::new_pending("C", "C", SourceType::Initial)).unwrap();
    store.save(&good_state).unwrap();
    let mut doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&snapshot_path).unwrap()).unwrap();
    doc["checksum"] = serde_json::Value::String("deadbeef".into());
    std::fs::write(&snapshot_path, serde_json::to_vec(&doc).unwrap()).unwrap();

    let recovered = recovery::recover(&store, &ResumeOptions::default()).unwrap();
    assert_eq!(recovered.items.len(), 2);
    let items_lost = 3 - recovered.items.len();
    assert_eq!(items_lost, 1);
}

#[tokio::test]
async fn scenario_5_max_queue_overflow_rejects_excess_without_crashing() {
    let dir = tempdir().unwrap();
    let client = Arc::new(MockWikiClient::new());
    let links = (1..=5)
        .map(|n| format!(r#"<a data-linked-resource-id="{n}">Ref {n}</a>"#))
        .collect::<Vec<_>>()
        .join(" ");
    client.seed_page(page("seed", "Seed", &links));

    let mut state = QueueState::new(3);
    state.add(QueueItem::new_pending("seed", "Seed", SourceType::Initial)).unwrap();

    let thresholds = FailureThresholds {
        allow_failures: true,
        max_page_failures: None,
        max_attachment_failures: None,
        max_attachment_failure_percent: None,
        restricted_pages_allowed: true,
    };
    let (scheduler, governor) = build_scheduler(client, dir.path(), default_config(), thresholds);
    let summary = scheduler
        .run(state, governor, CancellationFlag::new())
        .await
        .unwrap();

    // The seed completes. Of its 5 discovered links, only enough fit to
    // bring the queue to its 4-item capacity; the rest are rejected, not a
    // crash, and never show up in the final state at all.
    assert_eq!(summary.metrics.completed + summary.metrics.failed, 4);
    let snapshot_store = SnapshotStore::new(dir.path().join("snapshot.json"), 3);
    let final_state = snapshot_store.load().unwrap().unwrap();
    assert_eq!(final_state.items.len(), 4);
}

#[tokio::test]
async fn scenario_6_resume_after_interrupt_completes_both_items_once() {
    let dir = tempdir().unwrap();
    let snapshot_path = dir.path().join("snapshot.json");
    let store = SnapshotStore::new(&snapshot_path, 3);

    // Simulate a crash: two items were left `Processing` when the process
    // died.
    let mut crashed_state = QueueState::new(100);
    crashed_state.add(QueueItem::new_pending("A", "A", SourceType::Initial)).unwrap();
    crashed_state.add(QueueItem::new_pending("B", "B", SourceType::Initial)).unwrap();
    crashed_state.mark_processing("A").unwrap();
    crashed_state.mark_processing("B").unwrap();
    store.save(&crashed_state).unwrap();

    let recovered = recovery::recover(&store, &ResumeOptions::default()).unwrap();
    assert_eq!(recovered.items["A"].status, QueueItemStatus::Pending);
    assert_eq!(recovered.items["B"].status, QueueItemStatus::Pending);

    let client: Arc<dyn WikiClient> = Arc::new(MockWikiClient::new());
    let mock = MockWikiClient::new();
    mock.seed_page(page("A", "A", "<p>a</p>"));
    mock.seed_page(page("B", "B", "<p>b</p>"));
    let client: Arc<dyn WikiClient> = Arc::new(mock);
    let _ = &client;

    let (scheduler, governor) = build_scheduler(client, dir.path(), default_config(), FailureThresholds::default());
    let summary = scheduler
        .run(recovered, governor, CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(summary.metrics.completed, 2);
    let final_state = SnapshotStore::new(&snapshot_path, 3).load().unwrap().unwrap();
    assert_eq!(final_state.processed_pages.len(), 2);
}

#[tokio::test]
async fn discovery_sees_child_listing_macros_through_client_list_children() {
    let client = MockWikiClient::new();
    client.seed_children("root", vec![ChildRef { id: "child-1".into(), title: "Child 1".into() }]);
    let page = page("root", "Root", r#"<div data-macro-name="children"></div>"#);
    let context = DiscoveryContext {
        space_key: "ENG".into(),
        base_url: "https://wiki.example.com".into(),
    };
    let discovered =
        wikivault_lib::discovery::extract(&page, &DiscoveryConfig::default(), &context, &client).await;
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].page_id, "child-1");
    assert_eq!(discovered[0].source_type, SourceType::Macro);
}

#[tokio::test]
async fn limit_stops_admitting_new_work_once_reached() {
    let dir = tempdir().unwrap();
    let client = Arc::new(MockWikiClient::new());
    client.seed_page(page("A", "A", r#"<a data-linked-resource-id="B">See B</a>"#));
    client.seed_page(page("B", "B", "<p>leaf</p>"));

    let mut state = QueueState::new(100);
    state.add(QueueItem::new_pending("A", "A", SourceType::Initial)).unwrap();

    let config = SchedulerConfig { limit: Some(1), ..default_config() };
    let (scheduler, governor) = build_scheduler(client, dir.path(), config, FailureThresholds::default());
    let summary = scheduler
        .run(state, governor, CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::LimitReached);
    assert_eq!(summary.metrics.completed, 1);
    let snapshot_store = SnapshotStore::new(dir.path().join("snapshot.json"), 3);
    let final_state = snapshot_store.load().unwrap().unwrap();
    assert_eq!(final_state.items["B"].status, QueueItemStatus::Pending);
}

#[tokio::test]
async fn user_mention_items_are_resolved_through_fetch_user_not_fetch_page() {
    // A page whose body mentions a user must not route that synthetic
    // `user:<name>` item through `fetch_page` (which has nothing seeded
    // for it and would 404). It must resolve via `fetch_user`/`UserCache`
    // and complete without ever touching the page-failure governor.
    let dir = tempdir().unwrap();
    let client = Arc::new(MockWikiClient::new());
    client.seed_page(page("A", "A", r#"<a data-username="jdoe">Jane Doe</a>"#));
    client.seed_user(UserInfo {
        username: "jdoe".into(),
        display_name: "Jane Doe".into(),
        profile_page_id: None,
    });

    let mut state = QueueState::new(100);
    state.add(QueueItem::new_pending("A", "A", SourceType::Initial)).unwrap();

    // Default thresholds abort the run on the very first page failure;
    // if the user item were mistakenly dispatched through `fetch_page`
    // and 404ed, this run would fail instead of completing.
    let (scheduler, governor) = build_scheduler(client, dir.path(), default_config(), FailureThresholds::default());
    let summary = scheduler
        .run(state, governor, CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(summary.metrics.completed, 2);
    assert_eq!(summary.metrics.failed, 0);
    let snapshot_store = SnapshotStore::new(dir.path().join("snapshot.json"), 3);
    let loaded = snapshot_store.load().unwrap().unwrap();
    assert_eq!(loaded.items["user:jdoe"].status, QueueItemStatus::Completed);
}

#[tokio::test]
async fn unresolvable_user_mention_does_not_abort_the_run() {
    // A user item that fails to resolve (no `fetch_user` seeding) must
    // exhaust its own retries and give up quietly; it must never feed the
    // page-failure governor, which under default thresholds would abort
    // the whole run on a single page failure. (The "unknown" category's
    // policy retries a few times with short backoff before giving up, so
    // this takes a couple of real seconds rather than being instant.)
    let dir = tempdir().unwrap();
    let client = Arc::new(MockWikiClient::new());
    client.seed_page(page("A", "A", r#"<a data-username="ghost">Ghost</a>"#));

    let mut state = QueueState::new(100);
    state.add(QueueItem::new_pending("A", "A", SourceType::Initial)).unwrap();

    let (scheduler, governor) = build_scheduler(client, dir.path(), default_config(), FailureThresholds::default());
    let summary = scheduler
        .run(state, governor, CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(summary.metrics.completed, 1, "page A completes");
    let snapshot_store = SnapshotStore::new(dir.path().join("snapshot.json"), 3);
    let loaded = snapshot_store.load().unwrap().unwrap();
    assert_eq!(loaded.items["user:ghost"].status, QueueItemStatus::Failed);
}

#[tokio::test]
async fn end_to_end_run_resolves_child_listing_macro_through_the_client() {
    let dir = tempdir().unwrap();
    let client = Arc::new(MockWikiClient::new());
    client.seed_page(page("root", "Root", r#"<div data-macro-name="children"></div>"#));
    client.seed_children("root", vec![ChildRef { id: "child-1".into(), title: "Child 1".into() }]);
    client.seed_page(page("child-1", "Child 1", "<p>leaf</p>"));

    let mut state = QueueState::new(100);
    state.add(QueueItem::new_pending("root", "Root", SourceType::Initial)).unwrap();

    let (scheduler, governor) = build_scheduler(client, dir.path(), default_config(), FailureThresholds::default());
    let summary = scheduler
        .run(state, governor, CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(summary.metrics.completed, 2);
    assert!(dir.path().join("child-1.md").exists());
}

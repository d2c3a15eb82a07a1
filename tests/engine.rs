//! End-to-end matchmaking scenarios over the in-memory state store.
//!
//! Wires the real admission service, hold protocol, matcher fleet, and push
//! fabric together; only the session store is a recording double.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tandem_server::domains::languages::StaticCatalog;
use tandem_server::domains::matchmaking::{AdmissionService, MatcherWorker, MATCH_FOUND};
use tandem_server::domains::sessions::{SessionStatus, TestSessionStore};
use tandem_server::kernel::memory_store::MemoryStore;
use tandem_server::kernel::push_fabric::{BoundChannel, Envelope, PushFabric};
use tandem_server::kernel::service_host::ServiceHost;
use tandem_server::kernel::state_store::{keys, StateStore};

const LANGS: &[(&str, &str)] = &[("English", "en"), ("Spanish", "es"), ("French", "fr")];

struct Engine {
    store: MemoryStore,
    sessions: Arc<TestSessionStore>,
    push: PushFabric,
    admission: AdmissionService,
    host: ServiceHost,
}

async fn start_engine() -> Engine {
    let store = MemoryStore::new();
    let sessions = Arc::new(TestSessionStore::new());
    let push = PushFabric::new();
    let names: Vec<String> = LANGS.iter().map(|(name, _)| name.to_string()).collect();

    let mut host = ServiceHost::new();
    for name in &names {
        let worker = MatcherWorker::new(
            name.clone(),
            Arc::new(store.clone()),
            sessions.clone(),
            push.clone(),
            names.clone(),
        )
        .await
        .expect("subscribe worker");
        host.spawn(worker);
    }

    let admission = AdmissionService::new(
        Arc::new(store.clone()),
        Arc::new(StaticCatalog::new(LANGS)),
    );

    Engine {
        store,
        sessions,
        push,
        admission,
        host,
    }
}

async fn wait_until<F, Fut>(mut cond: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn recv_envelope(bound: &mut BoundChannel) -> Envelope {
    tokio::time::timeout(Duration::from_secs(2), bound.rx.recv())
        .await
        .expect("timed out waiting for push notification")
        .expect("push channel closed")
}

#[tokio::test]
async fn test_happy_path_matches_complementary_waiters() {
    let engine = start_engine().await;
    let mut u1_channel = engine.push.bind("u1").await;
    let mut u2_channel = engine.push.bind("u2").await;

    engine.admission.admit("u1", "Spanish", "English").await.unwrap();
    // let u1's announcement drain against the still-empty Spanish queue
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.admission.admit("u2", "English", "Spanish").await.unwrap();

    let to_u1 = recv_envelope(&mut u1_channel).await;
    assert_eq!(to_u1.kind, MATCH_FOUND);
    assert_eq!(to_u1.data["partner_id"], "u2");
    assert_eq!(to_u1.data["language"], "English");
    assert!(to_u1.data["session_id"].is_string());

    let to_u2 = recv_envelope(&mut u2_channel).await;
    assert_eq!(to_u2.data["partner_id"], "u1");
    assert_eq!(to_u2.data["language"], "English");

    let sessions = engine.sessions.created();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].practice_user_id, "u1");
    assert_eq!(sessions[0].native_user_id, "u2");
    assert_eq!(sessions[0].language, "English");
    assert_eq!(sessions[0].status, SessionStatus::Matched);

    let store = engine.store.clone();
    wait_until(
        || {
            let store = store.clone();
            async move {
                store.queue_snapshot(&keys::queue("English")).is_empty()
                    && store.queue_snapshot(&keys::queue("Spanish")).is_empty()
                    && !store.user_data_exists("u1").await.unwrap()
                    && !store.user_data_exists("u2").await.unwrap()
            }
        },
        "both sides cleaned up",
    )
    .await;

    engine.host.shutdown().await;
}

#[tokio::test]
async fn test_cancel_wins_the_race() {
    let engine = start_engine().await;

    engine.admission.admit("u1", "Spanish", "English").await.unwrap();
    engine.admission.cancel("u1").await.unwrap();
    engine.admission.admit("u2", "English", "Spanish").await.unwrap();

    // give the fleet time to process both topic events
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(engine.sessions.created_count(), 0);
    assert!(engine.store.queue_snapshot(&keys::queue("English")).is_empty());
    // u2 keeps waiting for a future partner
    assert_eq!(
        engine.store.queue_snapshot(&keys::queue("Spanish")),
        vec!["u2".to_string()]
    );

    engine.host.shutdown().await;
}

#[tokio::test]
async fn test_commit_failure_recovers_on_next_event() {
    let engine = start_engine().await;
    engine.sessions.fail_times(1);

    engine.admission.admit("u1", "Spanish", "English").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.admission.admit("u2", "English", "Spanish").await.unwrap();

    // first attempt fails; the practice waiter is restored within one cycle
    let store = engine.store.clone();
    wait_until(
        || {
            let store = store.clone();
            async move {
                store.queue_snapshot(&keys::queue("English")) == vec!["u1".to_string()]
                    && !store.is_held("English", "u1")
            }
        },
        "practice waiter restored after failed commit",
    )
    .await;
    assert_eq!(engine.sessions.created_count(), 0);

    // a fresh announcement from u2 (idempotent re-admission) retries the pair
    engine.admission.admit("u2", "English", "Spanish").await.unwrap();

    let sessions = engine.sessions.clone();
    wait_until(
        || {
            let sessions = sessions.clone();
            async move { sessions.created_count() == 1 }
        },
        "match committed exactly once",
    )
    .await;

    let store = engine.store.clone();
    wait_until(
        || {
            let store = store.clone();
            async move {
                store.queue_snapshot(&keys::queue("English")).is_empty()
                    && store.queue_snapshot(&keys::queue("Spanish")).is_empty()
            }
        },
        "queues drained after recovery",
    )
    .await;

    engine.host.shutdown().await;
}

#[tokio::test]
async fn test_match_stands_when_one_channel_is_down() {
    let engine = start_engine().await;
    // only the native side is connected
    let mut u2_channel = engine.push.bind("u2").await;

    engine.admission.admit("u1", "Spanish", "English").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.admission.admit("u2", "English", "Spanish").await.unwrap();

    let to_u2 = recv_envelope(&mut u2_channel).await;
    assert_eq!(to_u2.kind, MATCH_FOUND);
    assert_eq!(to_u2.data["partner_id"], "u1");

    assert_eq!(engine.sessions.created_count(), 1);

    let store = engine.store.clone();
    wait_until(
        || {
            let store = store.clone();
            async move { !store.user_data_exists("u1").await.unwrap() }
        },
        "practice side released despite dead channel",
    )
    .await;

    engine.host.shutdown().await;
}

#[tokio::test]
async fn test_double_admission_moves_the_waiter() {
    let engine = start_engine().await;

    engine.admission.admit("u1", "Spanish", "English").await.unwrap();
    engine.admission.admit("u1", "Spanish", "French").await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(engine.store.queue_snapshot(&keys::queue("English")).is_empty());
    assert_eq!(
        engine.store.queue_snapshot(&keys::queue("French")),
        vec!["u1".to_string()]
    );
    assert_eq!(engine.sessions.created_count(), 0);

    engine.host.shutdown().await;
}

#[tokio::test]
async fn test_admit_then_cancel_round_trip_leaves_no_state() {
    let engine = start_engine().await;

    engine.admission.admit("u1", "Spanish", "English").await.unwrap();
    engine.admission.cancel("u1").await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(engine.store.queue_snapshot(&keys::queue("English")).is_empty());
    assert!(!engine.store.user_data_exists("u1").await.unwrap());
    assert!(!engine.store.is_held("English", "u1"));
    assert_eq!(engine.sessions.created_count(), 0);

    engine.host.shutdown().await;
}

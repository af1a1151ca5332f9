//! Queue semantics against the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pricequeue::error::Error;
use pricequeue::model::*;
use pricequeue::store::{MemoryStore, QueueStore};
use serde_json::json;

fn keys(ks: &[&str]) -> Vec<String> {
    ks.iter().map(|k| k.to_string()).collect()
}

fn result_for(key: &str) -> ScrapeResult {
    ScrapeResult {
        item_key: key.to_string(),
        extracted_value: Some(99.0),
        raw_payload: json!({"success": true, "data": {"pricing": {"total": 99.0}}}),
        observed_at: Utc::now(),
        identity: Identity {
            name: "Lisa Moore".to_string(),
            email: "lisa.moore42@outlook.com".to_string(),
            phone: "(312) 555-0199".to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

#[tokio::test]
async fn seeding_same_key_twice_creates_one_item() {
    let store = MemoryStore::default();

    let first = store.seed(&keys(&["78240", "78241"])).await.unwrap();
    assert_eq!(first, SeedReport { inserted: 2, skipped: 0 });

    let second = store.seed(&keys(&["78240", "10001"])).await.unwrap();
    assert_eq!(second, SeedReport { inserted: 1, skipped: 1 });

    assert_eq!(store.count_all().await.unwrap(), 3);
    let item = store.get("78240").await.unwrap();
    assert_eq!(item.state, State::Pending);
    assert_eq!(item.attempts, 0);
}

#[tokio::test]
async fn duplicate_keys_in_one_batch_are_skipped() {
    let store = MemoryStore::default();
    let report = store.seed(&keys(&["10001", "10002", "10001"])).await.unwrap();
    assert_eq!(report, SeedReport { inserted: 2, skipped: 1 });
    assert_eq!(store.count_all().await.unwrap(), 2);
}

#[tokio::test]
async fn reseeding_does_not_reset_finished_items() {
    let store = MemoryStore::default();
    store.seed(&keys(&["78240"])).await.unwrap();
    store.claim_next().await.unwrap().unwrap();
    store.mark_failed("78240").await.unwrap();

    store.seed(&keys(&["78240"])).await.unwrap();
    assert_eq!(store.get("78240").await.unwrap().state, State::Failed);
}

// ---------------------------------------------------------------------------
// Claiming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claim_follows_seed_order_and_marks_in_progress() {
    let store = MemoryStore::default();
    store.seed(&keys(&["a", "b", "c"])).await.unwrap();

    let first = store.claim_next().await.unwrap().unwrap();
    assert_eq!(first.item.key, "a");
    assert_eq!(first.item.state, State::InProgress);
    assert_eq!(first.from, State::Pending);
    assert!(first.item.claimed_at.is_some());

    let second = store.claim_next().await.unwrap().unwrap();
    assert_eq!(second.item.key, "b");
}

#[tokio::test]
async fn claim_on_empty_queue_returns_none() {
    let store = MemoryStore::default();
    assert!(store.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn live_claims_are_not_handed_out_again() {
    let store = MemoryStore::default();
    store.seed(&keys(&["a"])).await.unwrap();

    store.claim_next().await.unwrap().unwrap();
    assert!(store.claim_next().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_never_share_a_key() {
    let store = Arc::new(MemoryStore::default());
    let seeded: Vec<String> = (0..25).map(|n| format!("{:05}", 10000 + n)).collect();
    store.seed(&seeded).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(claim) = store.claim_next().await.unwrap() {
                claimed.push(claim.item.key);
                tokio::task::yield_now().await;
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let distinct: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), seeded.len());
    assert_eq!(distinct.len(), seeded.len());
}

#[tokio::test]
async fn stalled_in_progress_is_claimed_when_nothing_pending() {
    let store = MemoryStore::new(Duration::ZERO);
    store.seed(&keys(&["a"])).await.unwrap();

    let first = store.claim_next().await.unwrap().unwrap();
    let again = store.claim_next().await.unwrap().unwrap();
    assert_eq!(first.item.key, again.item.key);
    assert_eq!(again.item.state, State::InProgress);
    assert_eq!(again.from, State::InProgress);
}

#[tokio::test]
async fn pending_wins_over_stalled() {
    let store = MemoryStore::new(Duration::ZERO);
    store.seed(&keys(&["a", "b"])).await.unwrap();

    assert_eq!(store.claim_next().await.unwrap().unwrap().item.key, "a");
    assert_eq!(store.claim_next().await.unwrap().unwrap().item.key, "b");
}

#[tokio::test]
async fn claim_in_progress_ignores_the_stall_lease() {
    let store = MemoryStore::default();
    store.seed(&keys(&["a", "b"])).await.unwrap();
    store.claim_next().await.unwrap().unwrap();
    store.claim_next().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.mark_in_progress("a").await.unwrap();

    // Both claims are live, so the leased path has nothing to give.
    assert!(store.claim_next().await.unwrap().is_none());

    // The sole-worker path hands out the least recently touched one.
    let claim = store.claim_in_progress().await.unwrap().unwrap();
    assert_eq!(claim.item.key, "b");
    assert_eq!(claim.from, State::InProgress);
    assert_eq!(claim.item.state, State::InProgress);
}

#[tokio::test]
async fn claim_in_progress_without_in_flight_items_is_none() {
    let store = MemoryStore::default();
    store.seed(&keys(&["a"])).await.unwrap();
    assert!(store.claim_in_progress().await.unwrap().is_none());

    let item = store.claim_next().await.unwrap().unwrap().item;
    store.mark_done(&item.key, &result_for(&item.key)).await.unwrap();
    assert!(store.claim_in_progress().await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reset_items_are_claimed_before_fresh_pending() {
    let store = MemoryStore::default();
    store.seed(&keys(&["a", "b", "c"])).await.unwrap();

    // "a" and "b" complete; "c" is left in flight by a crash.
    for _ in 0..2 {
        let item = store.claim_next().await.unwrap().unwrap().item;
        store.mark_done(&item.key, &result_for(&item.key)).await.unwrap();
    }
    store.claim_next().await.unwrap().unwrap();
    store.seed(&keys(&["d", "e"])).await.unwrap();

    assert_eq!(store.reset_stalled().await.unwrap(), 1);
    let counts = store.state_counts().await.unwrap();
    assert_eq!(counts.in_progress, 0);
    assert_eq!(counts.pending, 3);

    let next = store.claim_next().await.unwrap().unwrap();
    assert_eq!(next.item.key, "c");
    assert_eq!(next.from, State::Pending);
}

#[tokio::test]
async fn reset_stalled_with_nothing_in_flight_is_a_noop() {
    let store = MemoryStore::default();
    store.seed(&keys(&["a"])).await.unwrap();
    assert_eq!(store.reset_stalled().await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mark_done_stores_result() {
    let store = MemoryStore::default();
    store.seed(&keys(&["78240"])).await.unwrap();
    store.claim_next().await.unwrap().unwrap();
    store.mark_in_progress("78240").await.unwrap();
    store.mark_done("78240", &result_for("78240")).await.unwrap();

    let item = store.get("78240").await.unwrap();
    assert_eq!(item.state, State::Done);
    assert_eq!(item.attempts, 1);
    assert!(item.resolved_at.is_some());
    assert_eq!(item.result.unwrap().extracted_value, Some(99.0));
}

#[tokio::test]
async fn mark_failed_is_unconditional() {
    let store = MemoryStore::default();
    store.seed(&keys(&["a"])).await.unwrap();

    store.mark_failed("a").await.unwrap();
    assert_eq!(store.get("a").await.unwrap().state, State::Failed);
}

#[tokio::test]
async fn terminal_items_cannot_go_back_in_progress() {
    let store = MemoryStore::default();
    store.seed(&keys(&["a"])).await.unwrap();
    store.mark_failed("a").await.unwrap();

    let err = store.mark_in_progress("a").await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn unknown_key_is_not_found() {
    let store = MemoryStore::default();
    assert!(matches!(
        store.get("99999").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        store.mark_failed("99999").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn state_counts_cover_every_item() {
    let store = MemoryStore::default();
    store.seed(&keys(&["a", "b", "c", "d"])).await.unwrap();
    let a = store.claim_next().await.unwrap().unwrap().item;
    store.mark_done(&a.key, &result_for(&a.key)).await.unwrap();
    let b = store.claim_next().await.unwrap().unwrap().item;
    store.mark_failed(&b.key).await.unwrap();
    store.claim_next().await.unwrap().unwrap();

    let counts = store.state_counts().await.unwrap();
    assert_eq!(
        counts,
        StateCounts {
            pending: 1,
            in_progress: 1,
            done: 1,
            failed: 1,
        }
    );
    assert_eq!(counts.total(), store.count_all().await.unwrap());
}

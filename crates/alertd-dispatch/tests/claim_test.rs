//! Claim loop coordination tests.
//!
//! Exercises the locking read against a real Postgres: single-claimant
//! guarantees across concurrent passes, rollback-driven retry, and
//! terminal sent state. All tests serialize on the shared alerts table.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

use alertd_core::models::{Alert, AlertId};
use alertd_dispatch::{AlertSender, Claimer, SendError};
use alertd_testing::TestEnv;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

/// Sender that records every delivered alert id.
struct RecordingSender {
    latency: Duration,
    sent: Mutex<Vec<AlertId>>,
}

impl RecordingSender {
    fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self { latency, sent: Mutex::new(Vec::new()) })
    }

    fn sent_ids(&self) -> Vec<AlertId> {
        self.sent.lock().expect("sent list poisoned").clone()
    }
}

impl AlertSender for RecordingSender {
    fn send<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(self.latency).await;
            self.sent.lock().expect("sent list poisoned").push(alert.id);
            Ok(())
        })
    }
}

/// Sender that always fails, driving the rollback path.
struct FailingSender;

impl AlertSender for FailingSender {
    fn send<'a>(
        &'a self,
        _alert: &'a Alert,
    ) -> Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + 'a>> {
        Box::pin(async { Err(SendError::new("recipient unreachable")) })
    }
}

fn claimer(env: &TestEnv, sender: Arc<dyn AlertSender>) -> Claimer {
    Claimer::new(env.pool(), sender, CancellationToken::new())
}

/// Drains repeatedly until at least one row is claimed or the deadline
/// passes; a just-rolled-back row only becomes claimable once its
/// worker's transaction has released the lock.
async fn drain_until_claims(claimer: &Claimer, deadline: Duration) -> usize {
    let end = tokio::time::Instant::now() + deadline;
    loop {
        let claimed = claimer.drain().await.expect("claim pass should not error");
        if claimed > 0 || tokio::time::Instant::now() >= end {
            return claimed;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
#[serial]
async fn empty_table_terminates_without_claiming() {
    let Some(env) = TestEnv::from_env().await.expect("test environment setup failed") else {
        return;
    };
    env.reset().await.expect("reset failed");

    let sender = RecordingSender::new(Duration::ZERO);
    let claimed = claimer(&env, sender.clone()).drain().await.expect("drain should succeed");

    assert_eq!(claimed, 0);
    assert!(sender.sent_ids().is_empty());
}

#[tokio::test]
#[serial]
async fn unscheduled_rows_are_invisible_to_claims() {
    let Some(env) = TestEnv::from_env().await.expect("test environment setup failed") else {
        return;
    };
    env.reset().await.expect("reset failed");
    env.insert_unscheduled_alert("trader@example.com", "ACME", 150)
        .await
        .expect("fixture insert failed");

    let sender = RecordingSender::new(Duration::ZERO);
    let claimed = claimer(&env, sender.clone()).drain().await.expect("drain should succeed");

    assert_eq!(claimed, 0);
    assert!(sender.sent_ids().is_empty());
}

#[tokio::test]
#[serial]
async fn concurrent_passes_claim_a_single_row_exactly_once() {
    let Some(env) = TestEnv::from_env().await.expect("test environment setup failed") else {
        return;
    };
    env.reset().await.expect("reset failed");
    let id = env
        .insert_eligible_alert("trader@example.com", "ACME", 150)
        .await
        .expect("fixture insert failed");

    // Enough latency that the second pass runs while the claim is held.
    let sender = RecordingSender::new(Duration::from_millis(200));
    let first = claimer(&env, sender.clone());
    let second = claimer(&env, sender.clone());

    let (a, b) = tokio::join!(first.drain(), second.drain());
    let total = a.expect("first pass failed") + b.expect("second pass failed");
    assert_eq!(total, 1, "exactly one pass may claim the row");

    assert!(
        env.wait_for_sent(id, Duration::from_secs(5)).await.expect("poll failed"),
        "the claimed row should be delivered"
    );
    assert_eq!(sender.sent_ids(), vec![id], "the row must be delivered exactly once");
}

#[tokio::test]
#[serial]
async fn eligible_rows_spawn_concurrent_workers() {
    let Some(env) = TestEnv::from_env().await.expect("test environment setup failed") else {
        return;
    };
    env.reset().await.expect("reset failed");

    let mut ids = Vec::new();
    for symbol in ["ACME", "GLOBEX", "INITECH"] {
        let id = env
            .insert_eligible_alert("trader@example.com", symbol, 150)
            .await
            .expect("fixture insert failed");
        ids.push(id);
    }

    let sender = RecordingSender::new(Duration::from_millis(300));
    let claimed = claimer(&env, sender.clone()).drain().await.expect("drain should succeed");
    assert_eq!(claimed, 3, "claiming must not wait for deliveries to finish");

    for id in &ids {
        assert!(
            env.wait_for_sent(*id, Duration::from_secs(5)).await.expect("poll failed"),
            "alert {id} should be delivered"
        );
    }

    let mut delivered = sender.sent_ids();
    delivered.sort_by_key(|id| id.0);
    assert_eq!(delivered, ids, "each worker must deliver a distinct row");
}

#[tokio::test]
#[serial]
async fn failed_delivery_releases_the_row_for_retry() {
    let Some(env) = TestEnv::from_env().await.expect("test environment setup failed") else {
        return;
    };
    env.reset().await.expect("reset failed");
    let id = env
        .insert_eligible_alert("trader@example.com", "ACME", 150)
        .await
        .expect("fixture insert failed");
    let marked_at = env.find(id).await.expect("fetch failed").marked_to_send_at;

    let failing = claimer(&env, Arc::new(FailingSender));
    let claimed = failing.drain().await.expect("drain should succeed");
    assert_eq!(claimed, 1);

    // Once the rollback lands the row must look untouched and claimable.
    let sender = RecordingSender::new(Duration::ZERO);
    let retried = drain_until_claims(&claimer(&env, sender.clone()), Duration::from_secs(5)).await;
    assert_eq!(retried, 1, "the rolled-back row should be claimed again");

    assert!(env.wait_for_sent(id, Duration::from_secs(5)).await.expect("poll failed"));
    let alert = env.find(id).await.expect("fetch failed");
    assert_eq!(alert.marked_to_send_at, marked_at, "rollback must not disturb the schedule marker");
}

#[tokio::test]
#[serial]
async fn sent_rows_are_never_claimed_again() {
    let Some(env) = TestEnv::from_env().await.expect("test environment setup failed") else {
        return;
    };
    env.reset().await.expect("reset failed");
    let id = env
        .insert_eligible_alert("trader@example.com", "ACME", 150)
        .await
        .expect("fixture insert failed");

    let sender = RecordingSender::new(Duration::ZERO);
    let claimed = claimer(&env, sender.clone()).drain().await.expect("drain should succeed");
    assert_eq!(claimed, 1);
    assert!(env.wait_for_sent(id, Duration::from_secs(5)).await.expect("poll failed"));
    let sent_at = env.find(id).await.expect("fetch failed").sent_at;

    for _ in 0..3 {
        let again = claimer(&env, sender.clone()).drain().await.expect("drain should succeed");
        assert_eq!(again, 0, "a sent row is terminal");
    }

    assert_eq!(env.find(id).await.expect("fetch failed").sent_at, sent_at);
    assert_eq!(sender.sent_ids(), vec![id]);
}

#[tokio::test]
#[serial]
async fn cancelled_claimer_stops_before_claiming() {
    let Some(env) = TestEnv::from_env().await.expect("test environment setup failed") else {
        return;
    };
    env.reset().await.expect("reset failed");
    env.insert_eligible_alert("trader@example.com", "ACME", 150)
        .await
        .expect("fixture insert failed");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let sender = RecordingSender::new(Duration::ZERO);
    let claimer = Claimer::new(env.pool(), sender.clone(), cancel);

    let claimed = claimer.drain().await.expect("drain should succeed");
    assert_eq!(claimed, 0);
    assert_eq!(env.eligible_count().await.expect("count failed"), 1);
}

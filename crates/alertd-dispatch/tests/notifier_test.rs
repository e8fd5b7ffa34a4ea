//! Notifier loop tests: publish visibility, prompt shutdown, and the
//! fatal publish path.

use std::time::Duration;

use alertd_core::Config;
use alertd_dispatch::{DispatchError, Notifier};
use alertd_testing::TestEnv;
use sqlx::postgres::PgListener;

fn test_config(channel: &str, interval: Duration) -> Config {
    let mut config = Config::from_env();
    config.channel = channel.to_string();
    config.notify_interval = interval;
    config
}

#[tokio::test]
async fn published_wakeups_reach_subscribers() {
    let Some(env) = TestEnv::from_env().await.expect("test environment setup failed") else {
        return;
    };

    let channel = "alertd_test_publish";
    let mut subscriber =
        PgListener::connect_with(&env.pool()).await.expect("subscriber should connect");
    subscriber.listen(channel).await.expect("subscriber should listen");

    // Long interval: the first broadcast happens immediately, and the
    // test never waits for a second one.
    let notifier = Notifier::new(env.pool(), &test_config(channel, Duration::from_secs(60)));
    let handle = notifier.shutdown_handle();
    let run = tokio::spawn(async move { notifier.run().await });

    let notification = tokio::time::timeout(Duration::from_secs(5), subscriber.recv())
        .await
        .expect("a wake-up should arrive promptly")
        .expect("subscription should stay healthy");
    assert_eq!(notification.channel(), channel);
    assert!(notification.payload().is_empty(), "wake-ups are content-free");

    handle.stop();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("notifier should stop promptly")
        .expect("notifier task should not panic")
        .expect("graceful stop returns Ok");
}

#[tokio::test]
async fn stop_returns_without_waiting_out_the_interval() {
    let Some(env) = TestEnv::from_env().await.expect("test environment setup failed") else {
        return;
    };

    let notifier =
        Notifier::new(env.pool(), &test_config("alertd_test_prompt_stop", Duration::from_secs(60)));
    let handle = notifier.shutdown_handle();
    let run = tokio::spawn(async move { notifier.run().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stop_requested = std::time::Instant::now();
    handle.stop();
    handle.stop();

    let outcome = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("stop must not wait for the 60s interval")
        .expect("notifier task should not panic");
    assert!(outcome.is_ok());
    assert!(stop_requested.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn publish_failure_ends_the_run() {
    let Some(env) = TestEnv::from_env().await.expect("test environment setup failed") else {
        return;
    };

    let pool = env.pool();
    pool.close().await;

    let notifier = Notifier::new(pool, &test_config("alertd_test_dead_pool", Duration::from_secs(1)));
    let outcome = notifier.run().await;

    match outcome {
        Err(error @ DispatchError::Publish { .. }) => assert!(error.is_fatal()),
        other => panic!("expected fatal publish error, got {other:?}"),
    }
}

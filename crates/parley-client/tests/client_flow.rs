mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use common::{alice, bob, Harness, ALICE};
use parley_client::{Client, ClientConfig};
use parley_guard::{ActivitySignal, SessionState};
use parley_shared::{CoreError, IdentityProvider, ManualClock, MemoryIdentityProvider, SecurityEventKind};
use parley_store::{DataStore, MemoryStore};

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(2);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_sign_in_starts_session_and_presence() {
    let h = Harness::new();
    let ctx = h.sign_in(ALICE).await;
    assert_eq!(ctx.user_id, alice());
    assert_eq!(h.client.session().map(|s| s.user_id), Some(alice()));
    assert_eq!(h.client.auth().pending_email(), None);

    let online = h.store.inner().online_users(&bob(), 15).await.unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].user_id, alice());
}

#[tokio::test]
async fn test_operations_require_a_session() {
    let h = Harness::new();
    assert_eq!(
        h.client.sync().open_direct(&bob()).await,
        Err(CoreError::SessionClosed)
    );
    assert!(matches!(
        h.client.sync().send("hello").await,
        Err(CoreError::SessionClosed)
    ));
    assert_eq!(h.client.check_session().await, Err(CoreError::SessionClosed));
}

#[tokio::test]
async fn test_idle_timeout_ends_session() {
    let h = Harness::new();
    let chat = h.alice_with_bob().await;

    h.clock.advance(Duration::minutes(61));
    assert_eq!(h.client.check_session().await, Ok(SessionState::Expired));

    assert!(h.client.session().is_none());
    assert_eq!(h.idp.sign_out_calls(), 1);
    assert_eq!(h.client.sync().active_chat().await, None);
    assert!(h.store.inner().online_users(&bob(), 15).await.unwrap().is_empty());

    let uploaded = h.store.inner().security_events().await;
    assert_eq!(uploaded.len(), 1);
    assert_eq!(uploaded[0].kind, SecurityEventKind::SessionTimeout);

    assert!(matches!(
        h.client.sync().open_conversation(chat).await,
        Err(CoreError::SessionClosed)
    ));
    // A second poll has nothing left to end.
    assert_eq!(h.client.check_session().await, Err(CoreError::SessionClosed));
    assert_eq!(h.idp.sign_out_calls(), 1);
}

#[tokio::test]
async fn test_activity_keeps_session_alive() {
    let h = Harness::new();
    h.sign_in(ALICE).await;

    h.clock.advance(Duration::minutes(50));
    h.client.record_activity(ActivitySignal::KeyPress).await;
    h.clock.advance(Duration::minutes(50));
    assert_eq!(h.client.check_session().await, Ok(SessionState::Active));
    assert!(h.client.session().is_some());
    assert_eq!(h.idp.sign_out_calls(), 0);
}

#[tokio::test]
async fn test_failed_sign_out_still_clears_local_session() {
    let h = Harness::new();
    h.sign_in(ALICE).await;
    h.idp.set_fail_sign_out(true);

    h.clock.advance(Duration::hours(2));
    assert!(matches!(
        h.client.check_session().await,
        Err(CoreError::NetworkFailure(_))
    ));
    assert!(h.client.session().is_none());
    assert_eq!(h.idp.sign_out_calls(), 1);
}

#[tokio::test]
async fn test_explicit_sign_out() {
    let h = Harness::new();
    h.alice_with_bob().await;

    h.client.sign_out().await.unwrap();
    assert!(h.client.session().is_none());
    assert!(h.client.sync().entries().await.is_none());
    assert!(h.client.sync().summaries().await.is_empty());
}

#[tokio::test]
async fn test_repeated_wrong_codes_lock_the_identity() {
    let h = Harness::new();
    h.client.auth().request_code(ALICE).await.unwrap();
    let code = h.idp.last_code(ALICE).unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    for _ in 0..4 {
        assert_eq!(h.client.verify(wrong).await, Err(CoreError::Unauthorized));
    }
    assert!(matches!(
        h.client.verify(wrong).await,
        Err(CoreError::LockedOut { .. })
    ));
    let calls = h.idp.verify_calls();

    // The right code is refused without reaching the provider.
    assert!(matches!(
        h.client.verify(&code).await,
        Err(CoreError::LockedOut { .. })
    ));
    assert_eq!(h.idp.verify_calls(), calls);
    assert!(h.client.session().is_none());

    h.clock.advance(Duration::minutes(5));
    let ctx = h.client.verify(&code).await.unwrap();
    assert_eq!(ctx.user_id, alice());

    let kinds: Vec<_> = h.client.guard().log().snapshot().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&SecurityEventKind::AccountBlocked));
}

#[tokio::test]
async fn test_provider_events_drive_the_session() {
    let h = Harness::new();
    let task = h.client.start();

    // Sign in through the provider directly; the client follows its events.
    h.idp.issue_one_time_code(ALICE).await.unwrap();
    let code = h.idp.last_code(ALICE).unwrap();
    h.idp.verify_code(ALICE, &code).await.unwrap();
    eventually("session install", || h.client.session().is_some()).await;
    assert_eq!(h.client.session().map(|s| s.user_id), Some(alice()));

    h.idp.sign_out().await.unwrap();
    eventually("session teardown", || h.client.session().is_none()).await;
    task.abort();
}

#[tokio::test]
async fn test_security_events_flush_once() {
    let h = Harness::new();
    h.alice_with_bob().await;
    h.client.sync().send("<iframe src=x>").await.unwrap_err();
    h.client.guard().report_client_error("render", "boom");

    assert_eq!(h.client.flush_security_events().await, Ok(2));
    assert_eq!(h.client.flush_security_events().await, Ok(0));
    assert_eq!(h.store.inner().security_events().await.len(), 2);

    let report = h.client.security_report().await;
    assert_eq!(report.events.len(), 2);
    assert_eq!(report.stats.logged_events, 2);
}

#[tokio::test]
async fn test_pending_email_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..ClientConfig::default()
    };
    let clock = ManualClock::new(Utc::now());
    let idp = Arc::new(MemoryIdentityProvider::new(Arc::new(clock.clone())));
    let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));

    {
        let client = Client::open(
            config.clone(),
            Arc::new(clock.clone()),
            idp.clone(),
            store.clone(),
        )
        .unwrap();
        client.auth().request_code(ALICE).await.unwrap();
    }

    let client = Arc::new(
        Client::open(config, Arc::new(clock.clone()), idp.clone(), store).unwrap(),
    );
    assert_eq!(client.auth().resume().unwrap(), Some(ALICE.to_string()));

    let code = idp.last_code(ALICE).unwrap();
    let ctx = client.verify(&code).await.unwrap();
    assert_eq!(ctx.user_id, alice());
    assert_eq!(client.auth().pending_email(), None);
}

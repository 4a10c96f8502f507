//! Session lifecycle tests against the in-memory mail provider.

mod common;

use common::{code_email, html_email, manager, manager_with, settle, test_config, SENDER};
use inbox_relay::{Error, Lookup, SenderFilter, SessionId};
use std::collections::HashSet;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Login
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_get_unique_ids() {
    let (connector, manager) = manager();

    let handles: Vec<_> = (0..32)
        .map(|n| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .login(&format!("user{n}@example.com"), "secret")
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }

    assert_eq!(ids.len(), 32);
    assert_eq!(manager.session_count(), 32);
    assert_eq!(connector.mailbox().connects, 32);
}

#[tokio::test]
async fn test_invalid_input_never_connects() {
    let (connector, manager) = manager();

    assert!(matches!(
        manager.login("", "secret").await,
        Err(Error::MissingParameter { name: "email" })
    ));
    assert!(matches!(
        manager.login("user@example.com", "").await,
        Err(Error::MissingParameter { name: "password" })
    ));
    assert!(matches!(
        manager.login("not-an-address", "secret").await,
        Err(Error::InvalidEmailFormat { .. })
    ));
    assert!(matches!(
        manager.login("user@nowhere.example", "secret").await,
        Err(Error::UnsupportedDomain { .. })
    ));

    assert_eq!(connector.mailbox().connects, 0);
    assert_eq!(manager.session_count(), 0);
}

#[tokio::test]
async fn test_rejected_credentials_create_no_session() {
    let (connector, manager) = manager();
    connector.mailbox().reject_login = true;

    let err = manager.login("user@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
    assert!(!err.to_string().contains("wrong"));
    assert_eq!(manager.session_count(), 0);
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let (connector, manager) = manager();
    connector.mailbox().connect_fails = true;

    let err = manager.login("user@example.com", "secret").await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(manager.session_count(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Lookup
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let (_, manager) = manager();
    let err = manager.lookup(&SessionId::from("bogus")).await.unwrap_err();
    assert!(matches!(err, Error::SessionNotFound));
}

#[tokio::test(start_paused = true)]
async fn test_code_flow_end_to_end() {
    let (connector, manager) = manager();
    connector.deliver(code_email(SENDER, "Z9Y8X7"));

    let id = manager.login("user@example.com", "secret").await.unwrap();

    assert_eq!(manager.lookup(&id).await.unwrap(), Lookup::Pending);
    settle().await;

    assert_eq!(
        manager.lookup(&id).await.unwrap(),
        Lookup::Code("Z9Y8X7".into())
    );

    // Served from cache while fresh, without touching the mailbox
    tokio::time::advance(Duration::from_secs(60)).await;
    let fetches = connector.mailbox().fetches;
    assert_eq!(
        manager.lookup(&id).await.unwrap(),
        Lookup::Code("Z9Y8X7".into())
    );
    settle().await;
    assert_eq!(connector.mailbox().fetches, fetches);

    // Stale after the freshness window: a new poll is started
    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(manager.lookup(&id).await.unwrap(), Lookup::Pending);
    settle().await;
    assert_eq!(connector.mailbox().fetches, fetches + 1);
}

#[tokio::test(start_paused = true)]
async fn test_latest_message_wins() {
    let (connector, manager) = manager();
    connector.deliver(code_email(SENDER, "AAAAAA"));
    connector.deliver(code_email("someone@else.example", "CCCCCC"));
    connector.deliver(code_email(SENDER, "BBBBBB"));

    let id = manager.login("user@example.com", "secret").await.unwrap();
    manager.lookup(&id).await.unwrap();
    settle().await;

    assert_eq!(
        manager.lookup(&id).await.unwrap(),
        Lookup::Code("BBBBBB".into())
    );
}

#[tokio::test(start_paused = true)]
async fn test_all_messages_mode_filters_by_header() {
    let config = test_config()
        .sender_filter(SenderFilter::AllMessages(SENDER.into()))
        .build()
        .unwrap();
    let (connector, manager) = manager_with(config);
    connector.deliver(code_email(SENDER, "K4L5M6"));
    connector.deliver(code_email("someone@else.example", "CCCCCC"));

    let id = manager.login("user@example.com", "secret").await.unwrap();
    manager.lookup(&id).await.unwrap();
    settle().await;

    assert_eq!(
        manager.lookup(&id).await.unwrap(),
        Lookup::Code("K4L5M6".into())
    );
}

#[tokio::test(start_paused = true)]
async fn test_all_messages_mode_scans_past_newer_mail() {
    let config = test_config()
        .sender_filter(SenderFilter::AllMessages(SENDER.into()))
        .build()
        .unwrap();
    let (connector, manager) = manager_with(config);
    connector.deliver(code_email(SENDER, "K4L5M6"));
    for n in 0..25 {
        connector.deliver(code_email(&format!("news{n}@else.example"), "CCCCCC"));
    }

    let id = manager.login("user@example.com", "secret").await.unwrap();
    manager.lookup(&id).await.unwrap();
    settle().await;

    assert_eq!(
        manager.lookup(&id).await.unwrap(),
        Lookup::Code("K4L5M6".into())
    );
    assert_eq!(connector.mailbox().fetches, 26);
}

#[tokio::test(start_paused = true)]
async fn test_empty_mailbox_reports_no_message_and_repolls() {
    let (connector, manager) = manager();
    let id = manager.login("user@example.com", "secret").await.unwrap();

    assert_eq!(manager.lookup(&id).await.unwrap(), Lookup::Pending);
    settle().await;
    assert!(matches!(
        manager.lookup(&id).await,
        Err(Error::NoMatchingMessage)
    ));

    // The miss already started another poll, which now finds the code
    connector.deliver(code_email(SENDER, "Q1W2E3"));
    settle().await;
    assert_eq!(
        manager.lookup(&id).await.unwrap(),
        Lookup::Code("Q1W2E3".into())
    );
}

#[tokio::test(start_paused = true)]
async fn test_message_without_code_reports_no_code() {
    let (connector, manager) = manager();
    connector.deliver(html_email(SENDER, "<p>Your order is on its way</p>"));

    let id = manager.login("user@example.com", "secret").await.unwrap();
    manager.lookup(&id).await.unwrap();
    settle().await;

    assert!(matches!(manager.lookup(&id).await, Err(Error::NoCode)));
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_mid_poll_reports_aborted_once() {
    let (connector, manager) = manager();
    connector.deliver(code_email(SENDER, "Z9Y8X7"));
    connector.mailbox().fetch_fails = true;

    let id = manager.login("user@example.com", "secret").await.unwrap();
    manager.lookup(&id).await.unwrap();
    settle().await;

    assert!(matches!(
        manager.lookup(&id).await,
        Err(Error::TransportAborted)
    ));

    // Session survives; the next lookup polls again
    connector.mailbox().fetch_fails = false;
    assert_eq!(manager.lookup(&id).await.unwrap(), Lookup::Pending);
    settle().await;
    assert_eq!(
        manager.lookup(&id).await.unwrap(),
        Lookup::Code("Z9Y8X7".into())
    );
}

#[tokio::test(start_paused = true)]
async fn test_lookup_never_waits_for_running_poll() {
    let (connector, manager) = manager();
    connector.deliver(code_email(SENDER, "Z9Y8X7"));
    connector.mailbox().fetch_delay = Some(Duration::from_secs(20));

    let id = manager.login("user@example.com", "secret").await.unwrap();
    assert_eq!(manager.lookup(&id).await.unwrap(), Lookup::Pending);
    settle().await;

    // The worker is parked in a slow fetch holding the connection
    let answer = tokio::time::timeout(Duration::from_millis(1), manager.lookup(&id))
        .await
        .expect("lookup blocked on the running poll")
        .unwrap();
    assert_eq!(answer, Lookup::Pending);

    tokio::time::sleep(Duration::from_secs(21)).await;
    settle().await;
    assert_eq!(
        manager.lookup(&id).await.unwrap(),
        Lookup::Code("Z9Y8X7".into())
    );
    assert_eq!(connector.mailbox().fetches, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Liveness
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_dead_connection_reconnects_exactly_once() {
    let (connector, manager) = manager();
    connector.deliver(code_email(SENDER, "Z9Y8X7"));
    let id = manager.login("user@example.com", "secret").await.unwrap();

    connector.kill_connections();
    assert_eq!(manager.lookup(&id).await.unwrap(), Lookup::Pending);
    assert_eq!(connector.mailbox().connects, 2);

    settle().await;
    assert_eq!(
        manager.lookup(&id).await.unwrap(),
        Lookup::Code("Z9Y8X7".into())
    );
    assert_eq!(connector.mailbox().connects, 2);
}

#[tokio::test]
async fn test_failed_reconnect_drops_session() {
    let (connector, manager) = manager();
    let id = manager.login("user@example.com", "secret").await.unwrap();

    connector.kill_connections();
    connector.mailbox().connect_fails = true;

    assert!(matches!(
        manager.lookup(&id).await,
        Err(Error::SessionUnrecoverable { .. })
    ));
    assert_eq!(manager.session_count(), 0);
    assert!(matches!(
        manager.lookup(&id).await,
        Err(Error::SessionNotFound)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnect_inside_poll_drops_session() {
    let (connector, manager) = manager();
    connector.deliver(code_email(SENDER, "Z9Y8X7"));
    let id = manager.login("user@example.com", "secret").await.unwrap();

    // The lookup finds the connection alive and hands off to a worker
    assert_eq!(manager.lookup(&id).await.unwrap(), Lookup::Pending);

    // It dies before the worker gets to it, and cannot be replaced
    connector.kill_connections();
    connector.mailbox().connect_fails = true;
    settle().await;

    assert_eq!(manager.session_count(), 0);
    assert_eq!(connector.mailbox().fetches, 0);
    assert!(matches!(
        manager.lookup(&id).await,
        Err(Error::SessionNotFound)
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Reaper
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_reap_removes_only_idle_sessions() {
    let (connector, manager) = manager();
    let idle = manager.login("idle@example.com", "secret").await.unwrap();
    let active = manager.login("active@example.com", "secret").await.unwrap();

    tokio::time::advance(Duration::from_secs(45)).await;
    manager.lookup(&active).await.unwrap();
    settle().await;
    tokio::time::advance(Duration::from_secs(20)).await;

    assert_eq!(manager.reap_idle().await, 1);
    settle().await;
    assert_eq!(connector.mailbox().closes, 1);
    assert!(matches!(
        manager.lookup(&idle).await,
        Err(Error::SessionNotFound)
    ));
    assert!(!matches!(
        manager.lookup(&active).await,
        Err(Error::SessionNotFound)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reap_ignores_logout_failure() {
    let (connector, manager) = manager();
    connector.mailbox().close_fails = true;
    manager.login("user@example.com", "secret").await.unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;

    assert_eq!(manager.reap_idle().await, 1);
    settle().await;
    assert_eq!(connector.mailbox().closes, 1);
    assert_eq!(manager.session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reaper_task_expires_sessions() {
    let (connector, manager) = manager();
    let reaper = manager.spawn_reaper();
    manager.login("user@example.com", "secret").await.unwrap();

    tokio::time::sleep(Duration::from_secs(50)).await;
    assert_eq!(manager.session_count(), 1);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(manager.session_count(), 0);
    assert_eq!(connector.mailbox().closes, 1);

    reaper.abort();
}

#[tokio::test(start_paused = true)]
async fn test_busy_session_does_not_stall_the_sweep() {
    let (connector, manager) = manager();
    connector.deliver(code_email(SENDER, "Z9Y8X7"));
    connector.mailbox().fetch_delay = Some(Duration::from_secs(600));
    let reaper = manager.spawn_reaper();

    let busy = manager.login("busy@example.com", "secret").await.unwrap();
    for n in 0..10 {
        manager
            .login(&format!("idle{n}@example.com"), "secret")
            .await
            .unwrap();
    }

    // The worker parks in a ten minute fetch holding the busy connection
    assert_eq!(manager.lookup(&busy).await.unwrap(), Lookup::Pending);
    settle().await;

    tokio::time::sleep(Duration::from_secs(75)).await;
    assert_eq!(manager.session_count(), 0);
    assert_eq!(connector.mailbox().closes, 10);

    reaper.abort();
}

#[tokio::test(start_paused = true)]
async fn test_reaping_during_poll_leaves_no_trace() {
    let (connector, manager) = manager();
    connector.deliver(code_email(SENDER, "Z9Y8X7"));
    connector.mailbox().fetch_delay = Some(Duration::from_secs(600));

    let id = manager.login("user@example.com", "secret").await.unwrap();
    assert_eq!(manager.lookup(&id).await.unwrap(), Lookup::Pending);
    settle().await;

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(manager.reap_idle().await, 1);
    assert_eq!(manager.session_count(), 0);

    // Let the fetch finish; the worker must not bring the session back
    tokio::time::sleep(Duration::from_secs(600)).await;
    settle().await;

    assert_eq!(connector.mailbox().fetches, 1);
    assert_eq!(connector.mailbox().closes, 1);
    assert_eq!(manager.session_count(), 0);
    assert!(matches!(
        manager.lookup(&id).await,
        Err(Error::SessionNotFound)
    ));
}

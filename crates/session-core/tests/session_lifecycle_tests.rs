//! Tests for the session lifecycle: start, pairing, connect, status queries
//! and teardown, driven through the query façade.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tenantlink_session_core::{
    CredentialMaterial, CredentialStore, Identity, PairingResult, RawTransportEvent, RecordStore, SessionRecord,
    SessionState, StartOutcome, StatusSource,
};

use common::*;

fn shop_identity() -> Identity {
    Identity::new("5511987654321", Some("Shop".to_string()))
}

#[tokio::test]
async fn test_pairing_then_connect_scenario() {
    let h = harness();
    let id = sid("abc");

    assert_eq!(h.api.start("abc").await.unwrap(), StartOutcome::Started);
    assert_eq!(h.manager.snapshot(&id).unwrap().state, SessionState::Starting);
    assert!(h.manager.is_live(&id));

    h.transport.challenge(&id, "tok1").await;
    assert!(wait_for_state(&h.manager, &id, SessionState::AwaitingPairing).await);

    match h.api.get_pairing_challenge("abc").await.unwrap() {
        PairingResult::Ready(challenge) => {
            assert_eq!(challenge.token, "tok1");
            assert!(challenge.render_url.ends_with("?data=tok1"));
        }
        other => panic!("expected a challenge, got {:?}", other),
    }
    assert!(wait_for_record(&h.records, &id, SessionState::AwaitingPairing).await);
    let pairing_record = h.records.get_session(&id).await.unwrap().unwrap();
    assert_eq!(pairing_record.qr_code.as_deref(), Some("tok1"));

    h.transport.open(&id, Some(shop_identity())).await;
    assert!(wait_for_state(&h.manager, &id, SessionState::Connected).await);

    let status = h.api.get_status("abc").await.unwrap();
    assert_eq!(status.state, SessionState::Connected);
    assert_eq!(status.identity, Some(shop_identity()));
    assert_eq!(status.source, StatusSource::Live);

    assert!(wait_for_record(&h.records, &id, SessionState::Connected).await);
    let record = h.records.get_session(&id).await.unwrap().unwrap();
    assert!(record.is_connected);
    assert_eq!(record.qr_code, None);
    assert_eq!(record.phone.as_deref(), Some("5511987654321"));
    assert_eq!(record.name.as_deref(), Some("Shop"));
    assert!(record.connected_at.is_some());

    let snapshot = h.manager.snapshot(&id).unwrap();
    assert_eq!(snapshot.pairing_challenge, None);
    assert!(matches!(
        h.api.get_pairing_challenge("abc").await.unwrap(),
        PairingResult::Pending { state: SessionState::Connected }
    ));
}

#[tokio::test]
async fn test_open_from_starting_connects() {
    let h = harness();
    let id = sid("resume");

    h.manager.start(&id).await.unwrap();
    h.transport.open(&id, None).await;
    assert!(wait_for_state(&h.manager, &id, SessionState::Connected).await);
    assert_eq!(h.manager.snapshot(&id).unwrap().identity, None);
}

#[tokio::test]
async fn test_identity_taken_from_handle_when_event_has_none() {
    let h = harness();
    let id = sid("handle-identity");
    h.transport.set_handle_identity(shop_identity());

    connect_session(&h, &id, None).await;
    assert_eq!(h.manager.snapshot(&id).unwrap().identity, Some(shop_identity()));
}

#[tokio::test]
async fn test_start_is_idempotent_while_live() {
    let h = harness();
    let id = sid("twice");

    assert_eq!(h.api.start("twice").await.unwrap(), StartOutcome::Started);
    assert_eq!(h.api.start("twice").await.unwrap(), StartOutcome::AlreadyActive);

    h.transport.challenge(&id, "tok").await;
    assert!(wait_for_state(&h.manager, &id, SessionState::AwaitingPairing).await);
    assert_eq!(h.api.start("twice").await.unwrap(), StartOutcome::AlreadyActive);

    assert_eq!(h.transport.connect_attempts(&id), 1);
    assert_eq!(h.transport.open_handles(&id), 1);
}

#[tokio::test]
async fn test_challenge_rotation_replaces_token() {
    let h = harness();
    let id = sid("rotate");
    h.manager.start(&id).await.unwrap();

    h.transport.challenge(&id, "first").await;
    h.transport.challenge(&id, "second").await;

    let ok = eventually(|| {
        let manager = h.manager.clone();
        let id = id.clone();
        async move { manager.pairing_challenge(&id).map(|c| c.token) == Some("second".to_string()) }
    })
    .await;
    assert!(ok);
    assert_eq!(h.manager.snapshot(&id).unwrap().state, SessionState::AwaitingPairing);
}

#[tokio::test]
async fn test_stale_challenge_after_open_is_ignored() {
    let h = harness();
    let id = sid("stale");
    connect_session(&h, &id, Some(shop_identity())).await;

    h.transport.challenge(&id, "late-token").await;
    // events are applied in order, so once this message is stored the
    // challenge has been handled
    h.transport
        .inbound(&id, vec![tenantlink_session_core::RawInboundMessage::text("5511", "marker")])
        .await;
    let ok = eventually(|| {
        let records = h.records.clone();
        let id = id.clone();
        async move { records.messages_for(&id).await.map(|m| m.len()).unwrap_or(0) == 1 }
    })
    .await;
    assert!(ok);

    let snapshot = h.manager.snapshot(&id).unwrap();
    assert_eq!(snapshot.state, SessionState::Connected);
    assert_eq!(snapshot.pairing_challenge, None);
    assert!(h.manager.pairing_challenge(&id).is_none());
}

#[tokio::test]
async fn test_connecting_update_does_not_change_state() {
    let h = harness();
    let id = sid("connecting");
    h.manager.start(&id).await.unwrap();

    h.transport
        .emit(
            &id,
            RawTransportEvent::ConnectionUpdate(tenantlink_session_core::RawConnectionUpdate {
                connection: Some(tenantlink_session_core::transport::RawConnectionState::Connecting),
                ..Default::default()
            }),
        )
        .await;
    h.transport.challenge(&id, "tok").await;

    assert!(wait_for_state(&h.manager, &id, SessionState::AwaitingPairing).await);
}

#[tokio::test]
async fn test_get_status_never_starts_a_session() {
    let h = harness();
    let status = h.api.get_status("nobody").await.unwrap();

    assert_eq!(status.state, SessionState::NotStarted);
    assert_eq!(status.source, StatusSource::Unknown);
    assert_eq!(h.transport.connect_attempts(&sid("nobody")), 0);
    assert!(h.manager.list_sessions().is_empty());
}

#[tokio::test]
async fn test_get_status_falls_back_to_persisted_record() {
    let h = harness();
    let id = sid("from-before-restart");
    h.records
        .upsert_session(&SessionRecord {
            session_id: id.clone(),
            status: SessionState::Connected,
            phone: Some("5511".into()),
            name: None,
            qr_code: None,
            is_connected: true,
            connected_at: None,
            updated_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let status = h.api.get_status("from-before-restart").await.unwrap();
    assert_eq!(status.state, SessionState::Connected);
    assert_eq!(status.source, StatusSource::Persisted);
    assert_eq!(status.identity, Some(Identity::new("5511", None)));
    assert!(!h.manager.is_live(&id));
}

#[tokio::test]
async fn test_pairing_challenge_lazily_starts_and_does_not_wait() {
    let h = harness();
    let id = sid("lazy");

    let result = h.api.get_pairing_challenge("lazy").await.unwrap();
    assert_eq!(result, PairingResult::Pending { state: SessionState::Starting });
    assert_eq!(h.transport.connect_attempts(&id), 1);

    h.transport.challenge(&id, "tok-lazy").await;
    assert!(wait_for_state(&h.manager, &id, SessionState::AwaitingPairing).await);
    assert!(matches!(
        h.api.get_pairing_challenge("lazy").await.unwrap(),
        PairingResult::Ready(c) if c.token == "tok-lazy"
    ));
    assert_eq!(h.transport.connect_attempts(&id), 1);
}

#[tokio::test]
async fn test_start_failure_moves_to_error_without_retry() {
    let h = harness();
    let id = sid("broken");
    h.transport.fail_next_connect(&id);

    let err = h.api.start("broken").await.unwrap_err();
    assert_eq!(err.error, "transport");

    let snapshot = h.manager.snapshot(&id).unwrap();
    assert_eq!(snapshot.state, SessionState::Error);
    assert!(snapshot.last_error.unwrap().contains("connection refused"));
    assert!(wait_for_record(&h.records, &id, SessionState::Error).await);

    tokio::time::sleep(RECONNECT_DELAY * 3).await;
    assert_eq!(h.transport.connect_attempts(&id), 1);
    assert!(!h.manager.has_pending_reconnect(&id));

    // the caller decides to retry
    assert_eq!(h.api.start("broken").await.unwrap(), StartOutcome::Started);
    assert_eq!(h.manager.snapshot(&id).unwrap().last_error, None);
}

#[tokio::test]
async fn test_credential_backend_outage_fails_start_before_connecting() {
    let (manager, transport, records) = harness_with_unavailable_credentials();
    let id = sid("sealed");

    let err = manager.start(&id).await.unwrap_err();
    assert_eq!(err.category(), "credentials");
    assert!(err.is_recoverable());
    assert_eq!(transport.connect_attempts(&id), 0);

    let snapshot = manager.snapshot(&id).unwrap();
    assert_eq!(snapshot.state, SessionState::Error);
    assert!(snapshot.last_error.unwrap().contains("vault sealed"));
    assert!(wait_for_record(&records, &id, SessionState::Error).await);
    assert!(!manager.has_pending_reconnect(&id));
}

#[tokio::test]
async fn test_invalid_session_id_rejected() {
    let h = harness();
    for bad in ["", "../etc", "a/b"] {
        let err = h.api.start(bad).await.unwrap_err();
        assert_eq!(err.error, "validation");
    }
    assert!(h.manager.list_sessions().is_empty());
}

#[tokio::test]
async fn test_credentials_persisted_and_resumed() {
    let h = harness();
    let id = sid("creds");
    h.manager.start(&id).await.unwrap();

    h.transport
        .emit(
            &id,
            RawTransportEvent::CredsUpdate(CredentialMaterial::new().with_entry("creds", json!({"registered": false}))),
        )
        .await;
    let ok = eventually(|| {
        let store = h.credentials.clone();
        let id = id.clone();
        async move { store.peek(&id).map(|m| m.get("creds").is_some()).unwrap_or(false) }
    })
    .await;
    assert!(ok);

    h.transport
        .emit(
            &id,
            RawTransportEvent::CredsUpdate(CredentialMaterial::new().with_entry("creds", json!({"registered": true}))),
        )
        .await;
    h.transport.open(&id, Some(shop_identity())).await;
    assert!(wait_for_state(&h.manager, &id, SessionState::Connected).await);

    let stored = h.credentials.load(&id).await.unwrap();
    assert_eq!(stored.get("creds"), Some(&json!({"registered": true})));

    // a restart hands the stored material to the provider
    h.manager.shutdown().await;
    h.manager.start(&id).await.unwrap();
    assert_eq!(
        h.transport.latest_credentials(&id).get("creds"),
        Some(&json!({"registered": true}))
    );
}

#[tokio::test]
async fn test_teardown_removes_everything() {
    let h = harness();
    let id = sid("gone");
    h.manager.start(&id).await.unwrap();
    h.transport
        .emit(
            &id,
            RawTransportEvent::CredsUpdate(CredentialMaterial::new().with_entry("creds", json!(1))),
        )
        .await;
    h.transport.open(&id, Some(shop_identity())).await;
    assert!(wait_for_state(&h.manager, &id, SessionState::Connected).await);
    assert!(wait_for_record(&h.records, &id, SessionState::Connected).await);

    h.api.teardown("gone").await.unwrap();

    assert!(h.manager.snapshot(&id).is_none());
    assert!(!h.manager.is_live(&id));
    assert_eq!(h.transport.open_handles(&id), 0);
    assert!(h.records.get_session(&id).await.unwrap().is_none());
    assert!(!h.credentials.contains(&id));

    let status = h.api.get_status("gone").await.unwrap();
    assert_eq!(status.state, SessionState::NotStarted);

    // a fresh start begins pairing from scratch
    h.manager.start(&id).await.unwrap();
    assert!(h.transport.latest_credentials(&id).is_empty());
}

#[tokio::test]
async fn test_teardown_of_unknown_session_is_ok() {
    let h = harness();
    h.api.teardown("never-seen").await.unwrap();
    assert!(h.manager.list_sessions().is_empty());
}

#[tokio::test]
async fn test_status_changes_are_broadcast_in_order() {
    let h = harness();
    let id = sid("watched");
    let mut rx = h.manager.subscribe();

    h.manager.start(&id).await.unwrap();
    h.transport.challenge(&id, "tok").await;
    h.transport.open(&id, None).await;

    let mut seen = Vec::new();
    for _ in 0..3 {
        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.session_id, id);
        seen.push((change.old_state, change.new_state));
    }
    assert_eq!(
        seen,
        vec![
            (SessionState::NotStarted, SessionState::Starting),
            (SessionState::Starting, SessionState::AwaitingPairing),
            (SessionState::AwaitingPairing, SessionState::Connected),
        ]
    );
}

#[tokio::test]
async fn test_list_sessions_and_stats() {
    let h = harness();
    connect_session(&h, &sid("a"), None).await;
    h.manager.start(&sid("b")).await.unwrap();
    h.transport.challenge(&sid("b"), "tok").await;
    assert!(wait_for_state(&h.manager, &sid("b"), SessionState::AwaitingPairing).await);

    let ids: Vec<String> = h
        .manager
        .list_sessions()
        .into_iter()
        .map(|s| s.session_id.to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);

    let stats = h.manager.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.connected, 1);
    assert_eq!(stats.awaiting_pairing, 1);
}

#[tokio::test]
async fn test_shutdown_keeps_durable_state() {
    let h = harness();
    connect_session(&h, &sid("one"), None).await;
    connect_session(&h, &sid("two"), None).await;

    h.manager.shutdown().await;

    assert!(h.manager.list_sessions().is_empty());
    assert_eq!(h.transport.open_handles(&sid("one")), 0);
    assert_eq!(h.transport.open_handles(&sid("two")), 0);
    assert_eq!(h.records.session_count(), 2);

    let status = h.api.get_status("one").await.unwrap();
    assert_eq!(status.source, StatusSource::Persisted);
}

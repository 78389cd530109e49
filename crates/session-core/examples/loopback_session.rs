//! Loopback session example
//!
//! Drives one tenant session through pairing, connection, an echoed message
//! and teardown, using an in-process transport that plays the
//! network side. Run with `RUST_LOG=tenantlink_session_core=debug` to see
//! every state change.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, Level};

use tenantlink_infra_common::logging::log_welcome;
use tenantlink_infra_common::{setup_logging, LoggingConfig};
use tenantlink_session_core::transport::TransportResult;
use tenantlink_session_core::{
    CredentialMaterial, Identity, MemoryRecordStore, PairingResult, RawConnectionUpdate, RawInboundMessage,
    RawTransportEvent, RecordStore, SessionApi, SessionId, SessionManagerBuilder, SessionManagerConfig,
    SessionState, TransportConnection, TransportHandle, TransportProvider,
};

/// Handle that echoes every sent message back as an inbound one
struct LoopbackHandle {
    events: mpsc::Sender<RawTransportEvent>,
}

#[async_trait]
impl TransportHandle for LoopbackHandle {
    fn account_identity(&self) -> Option<Identity> {
        Some(Identity::new("5511900000000", Some("Loopback".to_string())))
    }

    async fn send_text(&self, recipient: &str, body: &str) -> TransportResult<()> {
        let echo = RawInboundMessage::text(recipient, format!("echo: {}", body));
        let _ = self.events.send(RawTransportEvent::MessagesUpsert(vec![echo])).await;
        Ok(())
    }

    async fn close(&self) {}
}

/// Pairs every new session after a short delay and resumes known ones at once
struct LoopbackTransport;

#[async_trait]
impl TransportProvider for LoopbackTransport {
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: CredentialMaterial,
    ) -> TransportResult<TransportConnection> {
        let (tx, rx) = mpsc::channel(32);
        let script = tx.clone();
        let paired = !credentials.is_empty();
        let id = session_id.to_string();

        tokio::spawn(async move {
            if !paired {
                let token = format!("2@{}-pairing-token", id);
                let _ = script
                    .send(RawTransportEvent::ConnectionUpdate(RawConnectionUpdate::challenge(token)))
                    .await;
                // the user scans the code
                sleep(Duration::from_millis(500)).await;
                let creds = CredentialMaterial::new().with_entry("creds", serde_json::json!({ "paired": true }));
                let _ = script.send(RawTransportEvent::CredsUpdate(creds)).await;
            }
            let _ = script
                .send(RawTransportEvent::ConnectionUpdate(RawConnectionUpdate::open(None)))
                .await;
        });

        Ok(TransportConnection {
            handle: Arc::new(LoopbackHandle { events: tx }),
            events: rx,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging(LoggingConfig::new(Level::INFO, "loopback-session"))?;
    log_welcome("loopback-session", env!("CARGO_PKG_VERSION"));

    let credentials_dir = tempfile::tempdir()?;
    let config = SessionManagerConfig::default()
        .with_credentials_dir(credentials_dir.path())
        .with_reconnect_delay(Duration::from_secs(1));

    let records = Arc::new(MemoryRecordStore::new());
    let manager = SessionManagerBuilder::new()
        .with_config(config)
        .with_transport(Arc::new(LoopbackTransport))
        .with_record_store(records.clone())
        .build()?;
    let api = SessionApi::new(manager.clone());

    let mut changes = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            info!(session = %change.session_id, "{} -> {}", change.old_state, change.new_state);
        }
    });

    // first request starts the session; the challenge arrives shortly after
    let mut challenge = api.get_pairing_challenge("demo-shop").await?;
    while let PairingResult::Pending { state: SessionState::Starting } = challenge {
        sleep(Duration::from_millis(50)).await;
        challenge = api.get_pairing_challenge("demo-shop").await?;
    }
    if let PairingResult::Ready(challenge) = &challenge {
        info!("Scan to pair: {}", challenge.render_url);
    }

    sleep(Duration::from_secs(1)).await;
    let status = api.get_status("demo-shop").await?;
    info!("Status: {}", serde_json::to_string(&status)?);

    api.send_message("demo-shop", "5511999999999", "hello").await?;
    sleep(Duration::from_millis(100)).await;

    let messages = records.messages_for(&SessionId::parse("demo-shop")?).await?;
    for message in &messages {
        info!(from_self = message.from_self, number = %message.number, "{}", message.message);
    }

    api.teardown("demo-shop").await?;
    manager.shutdown().await;
    Ok(())
}

//! Shared helpers for session-core integration tests
//!
//! ScriptedTransport stands in for the messaging network: every connect
//! returns a handle plus an event channel the test drives with emit().

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use tenantlink_session_core::{
    credentials::{CredentialError, CredentialResult},
    store::StoreResult,
    transport::{TransportError, TransportResult},
    CredentialMaterial, CredentialStore, DisconnectReason, Identity, MemoryCredentialStore, MemoryRecordStore, MessageRecord,
    RawConnectionUpdate, RawInboundMessage, RawTransportEvent, RecordStore, SessionApi, SessionId, SessionManager,
    SessionManagerBuilder, SessionManagerConfig, SessionRecord, SessionState, TransportConnection, TransportHandle,
    TransportProvider,
};

pub const RECONNECT_DELAY: Duration = Duration::from_millis(150);
pub const WAIT: Duration = Duration::from_secs(3);

/// Route library logs to the test writer; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn sid(raw: &str) -> SessionId {
    SessionId::parse(raw).unwrap()
}

/// Connection handle recorded by the scripted transport
pub struct ScriptedHandle {
    closed: AtomicBool,
    fail_sends: AtomicBool,
    identity: Option<Identity>,
    sent: Mutex<Vec<(String, String)>>,
}

impl ScriptedHandle {
    fn new(identity: Option<Identity>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            identity,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportHandle for ScriptedHandle {
    fn account_identity(&self) -> Option<Identity> {
        self.identity.clone()
    }

    async fn send_text(&self, recipient: &str, body: &str) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::send("network unreachable"));
        }
        self.sent.lock().push((recipient.to_string(), body.to_string()));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct ScriptedConnection {
    events: mpsc::Sender<RawTransportEvent>,
    handle: Arc<ScriptedHandle>,
    credentials: CredentialMaterial,
}

/// Transport provider driven by the test
#[derive(Default)]
pub struct ScriptedTransport {
    connections: Mutex<HashMap<SessionId, Vec<ScriptedConnection>>>,
    attempts: Mutex<HashMap<SessionId, usize>>,
    failures: Mutex<HashMap<SessionId, Vec<TransportError>>>,
    connect_delay: Mutex<Option<Duration>>,
    handle_identity: Mutex<Option<Identity>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every connect take `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    /// Identity exposed by handles created from now on
    pub fn set_handle_identity(&self, identity: Identity) {
        *self.handle_identity.lock() = Some(identity);
    }

    pub fn fail_next_connect(&self, id: &SessionId) {
        self.fail_next_connects(id, 1);
    }

    /// Refuse the next `count` connects for `id` with a recoverable error
    pub fn fail_next_connects(&self, id: &SessionId, count: usize) {
        let mut failures = self.failures.lock();
        let queued = failures.entry(id.clone()).or_default();
        for _ in 0..count {
            queued.push(TransportError::connect("connection refused"));
        }
    }

    /// Reject the credentials on the next connect for `id`
    pub fn reject_next_connect(&self, id: &SessionId) {
        self.failures.lock().entry(id.clone()).or_default().push(TransportError::Unauthorized {
            message: "device removed".to_string(),
        });
    }

    /// Connect calls for `id`, failed ones included
    pub fn connect_attempts(&self, id: &SessionId) -> usize {
        self.attempts.lock().get(id).copied().unwrap_or(0)
    }

    /// Handles for `id` that were opened and not closed yet
    pub fn open_handles(&self, id: &SessionId) -> usize {
        self.connections
            .lock()
            .get(id)
            .map(|conns| conns.iter().filter(|c| !c.handle.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn latest_handle(&self, id: &SessionId) -> Arc<ScriptedHandle> {
        let connections = self.connections.lock();
        let conn = connections.get(id).and_then(|c| c.last()).expect("no connection");
        Arc::clone(&conn.handle)
    }

    /// Credential material passed to the latest connect
    pub fn latest_credentials(&self, id: &SessionId) -> CredentialMaterial {
        let connections = self.connections.lock();
        let conn = connections.get(id).and_then(|c| c.last()).expect("no connection");
        conn.credentials.clone()
    }

    /// Emit a raw event on the latest connection of `id`
    pub async fn emit(&self, id: &SessionId, event: RawTransportEvent) {
        let sender = {
            let connections = self.connections.lock();
            let conn = connections.get(id).and_then(|c| c.last()).expect("no connection");
            conn.events.clone()
        };
        sender.send(event).await.expect("event loop gone");
    }

    pub async fn challenge(&self, id: &SessionId, token: &str) {
        self.emit(id, RawTransportEvent::ConnectionUpdate(RawConnectionUpdate::challenge(token)))
            .await;
    }

    pub async fn open(&self, id: &SessionId, identity: Option<Identity>) {
        self.emit(id, RawTransportEvent::ConnectionUpdate(RawConnectionUpdate::open(identity)))
            .await;
    }

    pub async fn close(&self, id: &SessionId, reason: DisconnectReason) {
        self.emit(id, RawTransportEvent::ConnectionUpdate(RawConnectionUpdate::close(reason)))
            .await;
    }

    pub async fn inbound(&self, id: &SessionId, messages: Vec<RawInboundMessage>) {
        self.emit(id, RawTransportEvent::MessagesUpsert(messages)).await;
    }

    /// Drop the event sender of the latest connection without a close signal
    pub fn drop_stream(&self, id: &SessionId) {
        let mut connections = self.connections.lock();
        if let Some(conn) = connections.get_mut(id).and_then(|c| c.last_mut()) {
            let (dead, _) = mpsc::channel(1);
            conn.events = dead;
        }
    }
}

#[async_trait]
impl TransportProvider for ScriptedTransport {
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: CredentialMaterial,
    ) -> TransportResult<TransportConnection> {
        *self.attempts.lock().entry(session_id.clone()).or_insert(0) += 1;

        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failures.lock().get_mut(session_id).and_then(|queued| {
            if queued.is_empty() {
                None
            } else {
                Some(queued.remove(0))
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(64);
        let handle = Arc::new(ScriptedHandle::new(self.handle_identity.lock().clone()));
        self.connections
            .lock()
            .entry(session_id.clone())
            .or_default()
            .push(ScriptedConnection {
                events: tx,
                handle: Arc::clone(&handle),
                credentials,
            });

        Ok(TransportConnection { handle, events: rx })
    }
}

/// Record store that is always down
pub struct FailingRecordStore;

#[async_trait]
impl RecordStore for FailingRecordStore {
    async fn upsert_session(&self, _: &SessionRecord) -> StoreResult<()> {
        Err(tenantlink_session_core::store::StoreError::unavailable("connection refused"))
    }

    async fn get_session(&self, _: &SessionId) -> StoreResult<Option<SessionRecord>> {
        Err(tenantlink_session_core::store::StoreError::unavailable("connection refused"))
    }

    async fn delete_session(&self, _: &SessionId) -> StoreResult<bool> {
        Err(tenantlink_session_core::store::StoreError::unavailable("connection refused"))
    }

    async fn insert_message(&self, _: &MessageRecord) -> StoreResult<()> {
        Err(tenantlink_session_core::store::StoreError::unavailable("connection refused"))
    }

    async fn messages_for(&self, _: &SessionId) -> StoreResult<Vec<MessageRecord>> {
        Err(tenantlink_session_core::store::StoreError::unavailable("connection refused"))
    }
}

/// Credential backend that is always down
pub struct UnavailableCredentialStore;

#[async_trait]
impl CredentialStore for UnavailableCredentialStore {
    async fn load(&self, _: &SessionId) -> CredentialResult<CredentialMaterial> {
        Err(CredentialError::unavailable("vault sealed"))
    }

    async fn persist(&self, _: &SessionId, _: &CredentialMaterial) -> CredentialResult<()> {
        Err(CredentialError::unavailable("vault sealed"))
    }

    async fn clear(&self, _: &SessionId) -> CredentialResult<()> {
        Err(CredentialError::unavailable("vault sealed"))
    }
}

/// A manager wired to in-memory collaborators the test can inspect
pub struct TestHarness {
    pub manager: Arc<SessionManager>,
    pub api: SessionApi,
    pub transport: Arc<ScriptedTransport>,
    pub records: Arc<MemoryRecordStore>,
    pub credentials: Arc<MemoryCredentialStore>,
}

pub fn test_config() -> SessionManagerConfig {
    SessionManagerConfig::default().with_reconnect_delay(RECONNECT_DELAY)
}

pub fn harness() -> TestHarness {
    harness_with_config(test_config())
}

pub fn harness_with_config(config: SessionManagerConfig) -> TestHarness {
    init_tracing();
    let transport = ScriptedTransport::new();
    let records = Arc::new(MemoryRecordStore::new());
    let credentials = Arc::new(MemoryCredentialStore::new());

    let manager = SessionManagerBuilder::new()
        .with_config(config)
        .with_transport(transport.clone())
        .with_record_store(records.clone())
        .with_credential_store(credentials.clone())
        .build()
        .unwrap();

    TestHarness {
        api: SessionApi::new(manager.clone()),
        manager,
        transport,
        records,
        credentials,
    }
}

/// Manager whose record store always fails
pub fn harness_with_failing_store() -> (Arc<SessionManager>, Arc<ScriptedTransport>) {
    init_tracing();
    let transport = ScriptedTransport::new();
    let manager = SessionManagerBuilder::new()
        .with_config(test_config())
        .with_transport(transport.clone())
        .with_record_store(Arc::new(FailingRecordStore))
        .with_credential_store(Arc::new(MemoryCredentialStore::new()))
        .build()
        .unwrap();
    (manager, transport)
}

/// Manager whose credential backend always fails
pub fn harness_with_unavailable_credentials() -> (Arc<SessionManager>, Arc<ScriptedTransport>, Arc<MemoryRecordStore>) {
    init_tracing();
    let transport = ScriptedTransport::new();
    let records = Arc::new(MemoryRecordStore::new());
    let manager = SessionManagerBuilder::new()
        .with_config(test_config())
        .with_transport(transport.clone())
        .with_record_store(records.clone())
        .with_credential_store(Arc::new(UnavailableCredentialStore))
        .build()
        .unwrap();
    (manager, transport, records)
}

/// Poll `check` until it holds or `WAIT` elapses
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_state(manager: &SessionManager, id: &SessionId, state: SessionState) -> bool {
    eventually(move || async move { manager.snapshot(id).map(|s| s.state) == Some(state) }).await
}

pub async fn wait_for_record(records: &MemoryRecordStore, id: &SessionId, state: SessionState) -> bool {
    eventually(move || async move {
        matches!(records.get_session(id).await, Ok(Some(r)) if r.status == state)
    })
    .await
}

/// Start `id` and drive it to `Connected` with the given identity
pub async fn connect_session(h: &TestHarness, id: &SessionId, identity: Option<Identity>) {
    h.manager.start(id).await.unwrap();
    h.transport.open(id, identity).await;
    assert!(wait_for_state(&h.manager, id, SessionState::Connected).await);
    assert!(wait_for_record(&h.records, id, SessionState::Connected).await);
}

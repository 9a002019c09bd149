//! # Topic Multiplexer
//!
//! One physical connection to the relayer carries many logical topics
//! (`/v0/wallet/{id}`, `/v0/tasks/{id}`, price reports, ...). The
//! multiplexer owns that connection, sends subscribe control frames, and fans
//! every inbound `{topic, event}` frame out to the callbacks registered for
//! its topic.
//!
//! ## Dispatch order
//!
//! Listeners for a topic live in a `BTreeMap` keyed by
//! `(Reverse(priority), insertion_seq)`, so ascending iteration yields
//! highest priority first and ties resolve in registration order. Frames are
//! processed strictly one at a time by a single reader task; within a topic,
//! events reach callbacks in arrival order.
//!
//! ## Failure model
//!
//! - A transport error is **sticky**. Every later call fails with
//!   `RelayerUnreachable`, and nothing reconnects.
//! - Malformed inbound frames are logged and dropped. One bad frame must not
//!   take down the other topics.
//! - `teardown` closes the connection, forgets every callback, and is safe
//!   to call repeatedly. Later calls fail with `RelayerTornDown`.
//! - Releasing the last callback of a topic does not unsubscribe it at the
//!   transport level. The relayer keeps sending those frames and they are
//!   dropped locally.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::topics::{is_task_completed, task_topic, ControlFrame, EventFrame, SubscribeBody};
use super::transport::{Connector, TransportEvent};
use crate::config::{RENEGADE_AUTH_EXPIRATION_HEADER, RENEGADE_AUTH_HEADER, TASK_DONE_SENTINEL};
use crate::error::{RenegadeError, Result};
use crate::state::order::now_ms;
use crate::state::Keychain;

/// Identifier returned when registering a callback.
pub type CallbackId = Uuid;

/// A topic listener. Receives the `event` part of each frame.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Priority used when the caller has no preference.
pub const DEFAULT_PRIORITY: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    Open,
    Failed,
    Closed,
}

// ---------------------------------------------------------------------------
// Listener registry
// ---------------------------------------------------------------------------

/// Sort key inside a topic: highest priority first, then oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ListenerKey {
    priority: Reverse<i32>,
    seq: u64,
}

struct Listener {
    topic: String,
    key: ListenerKey,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<String, BTreeMap<ListenerKey, CallbackId>>,
    callbacks: HashMap<CallbackId, Listener>,
    next_seq: u64,
}

impl Registry {
    fn insert(&mut self, topic: &str, priority: i32, callback: Callback) -> CallbackId {
        let id = Uuid::new_v4();
        let key = ListenerKey {
            priority: Reverse(priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(key, id);
        self.callbacks.insert(
            id,
            Listener {
                topic: topic.to_string(),
                key,
                callback,
            },
        );
        id
    }

    fn remove(&mut self, id: &CallbackId) -> bool {
        let Some(listener) = self.callbacks.remove(id) else {
            return false;
        };
        if let Some(listeners) = self.topics.get_mut(&listener.topic) {
            listeners.remove(&listener.key);
            if listeners.is_empty() {
                self.topics.remove(&listener.topic);
            }
        }
        true
    }

    /// Callbacks for `topic` in dispatch order.
    fn listeners(&self, topic: &str) -> Vec<Callback> {
        self.topics
            .get(topic)
            .map(|listeners| {
                listeners
                    .values()
                    .filter_map(|id| self.callbacks.get(id))
                    .map(|l| Arc::clone(&l.callback))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// TopicMultiplexer
// ---------------------------------------------------------------------------

struct Inner {
    url: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    registry: Mutex<Registry>,
    state: watch::Sender<ConnectionState>,
    torn_down: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// A single event connection shared by many topic subscriptions.
pub struct TopicMultiplexer {
    inner: Arc<Inner>,
}

impl TopicMultiplexer {
    /// Open a connection to `url` and start processing inbound frames.
    ///
    /// Returns as soon as the connector hands back a connection; operations
    /// that need the connection open wait for it themselves.
    pub async fn connect(connector: &dyn Connector, url: &str) -> Result<Self> {
        let connection = connector.connect(url).await?;
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let inner = Arc::new(Inner {
            url: url.to_string(),
            outbound: Mutex::new(Some(connection.outbound)),
            registry: Mutex::new(Registry::default()),
            state,
            torn_down: AtomicBool::new(false),
            reader: Mutex::new(None),
        });
        let reader = tokio::spawn(read_loop(Arc::downgrade(&inner), connection.inbound));
        *inner.reader.lock() = Some(reader);
        debug!(url, "event connection created");
        Ok(Self { inner })
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Number of callbacks currently registered on `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.inner
            .registry
            .lock()
            .topics
            .get(topic)
            .map_or(0, BTreeMap::len)
    }

    /// Send a subscribe frame for `topic`, signed with `auth` if given.
    pub async fn subscribe(&self, topic: &str, auth: Option<&Keychain>) -> Result<()> {
        self.ensure_usable()?;
        self.wait_open().await?;

        let body = SubscribeBody::subscribe(topic);
        let mut headers = BTreeMap::new();
        if let Some(keychain) = auth {
            let signed = serde_json::to_vec(&body)?;
            let sig = keychain.sign_http_request(&signed, now_ms());
            headers.insert(RENEGADE_AUTH_HEADER.to_string(), sig.signature);
            headers.insert(
                RENEGADE_AUTH_EXPIRATION_HEADER.to_string(),
                sig.expiration_ms.to_string(),
            );
        }
        let frame = serde_json::to_string(&ControlFrame { headers, body })?;

        let outbound = self.inner.outbound.lock().clone();
        let sender = outbound.ok_or(RenegadeError::RelayerTornDown)?;
        sender
            .send(frame)
            .map_err(|_| RenegadeError::RelayerUnreachable(self.inner.url.clone()))?;
        debug!(topic, authenticated = auth.is_some(), "subscribed");
        Ok(())
    }

    /// Register `callback` on `topic` and subscribe to it.
    ///
    /// The listener is installed before the subscribe frame goes out, so an
    /// event the relayer sends in direct reply is not missed.
    pub async fn register_callback(
        &self,
        topic: &str,
        callback: Callback,
        priority: i32,
        auth: Option<&Keychain>,
    ) -> Result<CallbackId> {
        self.ensure_usable()?;
        let id = self.inner.registry.lock().insert(topic, priority, callback);
        if let Err(e) = self.subscribe(topic, auth).await {
            self.inner.registry.lock().remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Forget a callback.
    pub fn release_callback(&self, id: &CallbackId) -> Result<()> {
        if self.is_torn_down() {
            return Err(RenegadeError::RelayerTornDown);
        }
        if self.inner.registry.lock().remove(id) {
            debug!(callback = %id, "callback released");
            Ok(())
        } else {
            Err(RenegadeError::CallbackNotRegistered(id.to_string()))
        }
    }

    /// Resolve once task `task_id` reports `Completed`.
    ///
    /// `"DONE"` resolves immediately without touching the connection; a
    /// missing id is an `InvalidTaskId` error. There is no timeout: the wait
    /// ends on completion, transport failure, or teardown.
    pub async fn await_task_completion(&self, task_id: Option<&str>) -> Result<()> {
        let task_id = task_id.ok_or(RenegadeError::InvalidTaskId)?;
        if task_id == TASK_DONE_SENTINEL {
            return Ok(());
        }
        self.ensure_usable()?;

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let callback: Callback = Arc::new(move |event: &Value| {
            if is_task_completed(event) {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            }
        });

        let topic = task_topic(task_id);
        let mut state = self.inner.state.subscribe();
        let id = self
            .register_callback(&topic, callback, DEFAULT_PRIORITY, None)
            .await?;
        debug!(task_id, "awaiting task completion");

        let outcome = tokio::select! {
            done = rx => done.map_err(|_| RenegadeError::RelayerTornDown),
            err = wait_for_failure(&mut state, &self.inner.url) => Err(err),
        };
        if !self.is_torn_down() {
            let _ = self.release_callback(&id);
        }
        if outcome.is_ok() {
            debug!(task_id, "task completed");
        }
        outcome
    }

    /// Close the connection and drop every callback. Idempotent.
    pub fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.outbound.lock().take();
        self.inner.state.send_if_modified(|s| {
            if *s == ConnectionState::Failed {
                false
            } else {
                *s = ConnectionState::Closed;
                true
            }
        });
        *self.inner.registry.lock() = Registry::default();
        if let Some(reader) = self.inner.reader.lock().take() {
            reader.abort();
        }
        debug!(url = %self.inner.url, "event connection torn down");
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_torn_down() {
            return Err(RenegadeError::RelayerTornDown);
        }
        if *self.inner.state.borrow() == ConnectionState::Failed {
            return Err(RenegadeError::RelayerUnreachable(self.inner.url.clone()));
        }
        Ok(())
    }

    async fn wait_open(&self) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Failed => {
                    return Err(RenegadeError::RelayerUnreachable(self.inner.url.clone()))
                }
                ConnectionState::Closed => return Err(RenegadeError::RelayerTornDown),
                ConnectionState::Connecting => {}
            }
            rx.changed()
                .await
                .map_err(|_| RenegadeError::RelayerTornDown)?;
        }
    }
}

impl Drop for TopicMultiplexer {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Resolves with the error matching the first terminal state observed.
async fn wait_for_failure(rx: &mut watch::Receiver<ConnectionState>, url: &str) -> RenegadeError {
    loop {
        let state = *rx.borrow_and_update();
        match state {
            ConnectionState::Failed => return RenegadeError::RelayerUnreachable(url.to_string()),
            ConnectionState::Closed => return RenegadeError::RelayerTornDown,
            ConnectionState::Connecting | ConnectionState::Open => {}
        }
        if rx.changed().await.is_err() {
            return RenegadeError::RelayerTornDown;
        }
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

async fn read_loop(inner: Weak<Inner>, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Opened => {
                inner.state.send_replace(ConnectionState::Open);
                debug!(url = %inner.url, "event connection open");
            }
            TransportEvent::Frame(raw) => dispatch(&inner, &raw),
            TransportEvent::Error(e) => {
                warn!(url = %inner.url, error = %e, "event connection failed");
                inner.state.send_replace(ConnectionState::Failed);
                return;
            }
            TransportEvent::Closed => {
                debug!(url = %inner.url, "event connection closed by relayer");
                inner.state.send_if_modified(|s| {
                    if *s == ConnectionState::Failed {
                        false
                    } else {
                        *s = ConnectionState::Closed;
                        true
                    }
                });
                return;
            }
        }
    }
    // The far end went away without a close: treat it as a failure so
    // pending waits are released.
    if let Some(inner) = inner.upgrade() {
        let failed = inner.state.send_if_modified(|s| match s {
            ConnectionState::Connecting | ConnectionState::Open => {
                *s = ConnectionState::Failed;
                true
            }
            ConnectionState::Failed | ConnectionState::Closed => false,
        });
        if failed {
            warn!(url = %inner.url, "event stream ended unexpectedly");
        }
    }
}

fn dispatch(inner: &Inner, raw: &str) {
    let frame: EventFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "dropping malformed event frame");
            return;
        }
    };
    // Collect under the lock, call outside it: callbacks may release
    // themselves or register others.
    let listeners = inner.registry.lock().listeners(&frame.topic);
    trace!(topic = %frame.topic, listeners = listeners.len(), "event frame");
    for callback in listeners {
        callback(&frame.event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::transport::{Connection, RemoteEnd};
    use async_trait::async_trait;
    use serde_json::json;

    /// Hands out one pre-built connection.
    struct OneShotConnector(Mutex<Option<Connection>>);

    #[async_trait]
    impl Connector for OneShotConnector {
        async fn connect(&self, url: &str) -> Result<Connection> {
            self.0
                .lock()
                .take()
                .ok_or_else(|| RenegadeError::RelayerUnreachable(url.to_string()))
        }
    }

    async fn open_mux() -> (TopicMultiplexer, RemoteEnd) {
        let (conn, remote) = Connection::pair();
        let connector = OneShotConnector(Mutex::new(Some(conn)));
        let mux = TopicMultiplexer::connect(&connector, "ws://test").await.unwrap();
        remote.to_client.send(TransportEvent::Opened).unwrap();
        (mux, remote)
    }

    fn send_event(remote: &RemoteEnd, topic: &str, event: Value) {
        let frame = json!({ "topic": topic, "event": event }).to_string();
        remote.to_client.send(TransportEvent::Frame(frame)).unwrap();
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn dispatches_in_descending_priority() {
        let (mux, remote) = open_mux().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        for priority in [3, 1, 2] {
            let seen = Arc::clone(&seen);
            mux.register_callback(
                "/v0/network",
                Arc::new(move |_| seen.lock().push(priority)),
                priority,
                None,
            )
            .await
            .unwrap();
        }
        send_event(&remote, "/v0/network", json!({"type": "x"}));
        settle().await;
        assert_eq!(*seen.lock(), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn ties_resolve_in_registration_order() {
        let (mux, remote) = open_mux().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            mux.register_callback("/v0/mpc", Arc::new(move |_| seen.lock().push(tag)), 5, None)
                .await
                .unwrap();
        }
        send_event(&remote, "/v0/mpc", json!({}));
        settle().await;
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn unknown_topics_and_garbage_are_dropped() {
        let (mux, remote) = open_mux().await;
        let hits = Arc::new(Mutex::new(0));
        let h = Arc::clone(&hits);
        mux.register_callback("/v0/mpc", Arc::new(move |_| *h.lock() += 1), 0, None)
            .await
            .unwrap();
        remote
            .to_client
            .send(TransportEvent::Frame("not json".into()))
            .unwrap();
        send_event(&remote, "/v0/other", json!({}));
        send_event(&remote, "/v0/mpc", json!({}));
        settle().await;
        assert_eq!(*hits.lock(), 1);
    }

    #[tokio::test]
    async fn subscribe_frame_carries_auth_headers() {
        let (mux, mut remote) = open_mux().await;
        let keychain = Keychain::from_seed(b"mux").unwrap();
        mux.subscribe("/v0/wallet/abc", Some(&keychain)).await.unwrap();
        let raw = remote.from_client.recv().await.unwrap();
        let frame: ControlFrame = serde_json::from_str(&raw).unwrap();
        assert_eq!(frame.body, SubscribeBody::subscribe("/v0/wallet/abc"));
        assert!(frame.headers.contains_key(RENEGADE_AUTH_HEADER));
        assert!(frame.headers.contains_key(RENEGADE_AUTH_EXPIRATION_HEADER));

        mux.subscribe("/v0/order_book", None).await.unwrap();
        let raw = remote.from_client.recv().await.unwrap();
        let frame: ControlFrame = serde_json::from_str(&raw).unwrap();
        assert!(frame.headers.is_empty());
    }

    #[tokio::test]
    async fn done_sentinel_sends_nothing() {
        let (mux, mut remote) = open_mux().await;
        mux.await_task_completion(Some("DONE")).await.unwrap();
        settle().await;
        assert!(remote.from_client.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_task_id_is_rejected() {
        let (mux, _remote) = open_mux().await;
        assert!(matches!(
            mux.await_task_completion(None).await,
            Err(RenegadeError::InvalidTaskId)
        ));
    }

    #[tokio::test]
    async fn task_completion_resolves_on_completed_only() {
        let (mux, mut remote) = open_mux().await;
        let mux = Arc::new(mux);
        let waiter = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move { mux.await_task_completion(Some("t1")).await })
        };
        let raw = remote.from_client.recv().await.unwrap();
        assert!(raw.contains("/v0/tasks/t1"));

        let proving = json!({"type": "TaskStatusUpdate", "state": {"state": "Proving"}});
        send_event(&remote, "/v0/tasks/t1", proving);
        settle().await;
        assert!(!waiter.is_finished());

        let completed = json!({"type": "TaskStatusUpdate", "state": {"state": "Completed"}});
        send_event(&remote, "/v0/tasks/t1", completed);
        waiter.await.unwrap().unwrap();
        assert_eq!(mux.listener_count("/v0/tasks/t1"), 0);
    }

    #[tokio::test]
    async fn release_unknown_callback_fails() {
        let (mux, _remote) = open_mux().await;
        let id = mux
            .register_callback("/v0/mpc", Arc::new(|_| {}), 0, None)
            .await
            .unwrap();
        mux.release_callback(&id).unwrap();
        assert_eq!(mux.listener_count("/v0/mpc"), 0);
        assert!(matches!(
            mux.release_callback(&id),
            Err(RenegadeError::CallbackNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn transport_error_is_sticky() {
        let (mux, remote) = open_mux().await;
        remote
            .to_client
            .send(TransportEvent::Error("reset".into()))
            .unwrap();
        settle().await;
        assert!(matches!(
            mux.subscribe("/v0/mpc", None).await,
            Err(RenegadeError::RelayerUnreachable(_))
        ));
        assert!(matches!(
            mux.await_task_completion(Some("t")).await,
            Err(RenegadeError::RelayerUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn dropped_transport_releases_pending_wait() {
        let (mux, mut remote) = open_mux().await;
        let mux = Arc::new(mux);
        let waiter = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move { mux.await_task_completion(Some("t3")).await })
        };
        remote.from_client.recv().await.unwrap();
        drop(remote);

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), waiter)
            .await
            .expect("wait must not hang")
            .unwrap();
        assert!(matches!(outcome, Err(RenegadeError::RelayerUnreachable(_))));
        assert!(matches!(
            mux.subscribe("/v0/mpc", None).await,
            Err(RenegadeError::RelayerUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn pending_wait_fails_when_transport_fails() {
        let (mux, mut remote) = open_mux().await;
        let mux = Arc::new(mux);
        let waiter = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move { mux.await_task_completion(Some("t2")).await })
        };
        remote.from_client.recv().await.unwrap();
        remote
            .to_client
            .send(TransportEvent::Error("gone".into()))
            .unwrap();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(RenegadeError::RelayerUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let (mux, _remote) = open_mux().await;
        mux.teardown();
        mux.teardown();
        assert!(matches!(
            mux.subscribe("/v0/mpc", None).await,
            Err(RenegadeError::RelayerTornDown)
        ));
        assert!(matches!(
            mux.release_callback(&Uuid::new_v4()),
            Err(RenegadeError::RelayerTornDown)
        ));
        // The sentinel short-circuits before any state check.
        mux.await_task_completion(Some("DONE")).await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_waits_for_open() {
        let (conn, mut remote) = Connection::pair();
        let connector = OneShotConnector(Mutex::new(Some(conn)));
        let mux = Arc::new(TopicMultiplexer::connect(&connector, "ws://test").await.unwrap());
        let pending = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move { mux.subscribe("/v0/mpc", None).await })
        };
        settle().await;
        assert!(remote.from_client.try_recv().is_err());
        remote.to_client.send(TransportEvent::Opened).unwrap();
        pending.await.unwrap().unwrap();
        assert!(remote.from_client.recv().await.is_some());
    }
}

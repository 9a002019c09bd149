//! # In-Memory Relayer
//!
//! A relayer that lives in the test process. It implements both halves of
//! the relayer surface ([`RelayerClient`] and [`Connector`]) against one
//! shared table, so an [`Account`](crate::account::Account) can run its
//! whole lifecycle (sync, create, mutate, stream) without a network.
//!
//! Behaviour mirrors the real relayer where the client can observe it:
//!
//! - Submitted wallets become visible only once their task completes.
//! - Mutations must carry a statement signature from the wallet's root key
//!   and must not reuse the current blinder.
//! - Deposits and withdrawals must carry a live, unused authorization of the
//!   on-chain transfer, signed by the same key.
//! - Subscribing to `/v0/tasks/{id}` after the task completed still yields
//!   the `Completed` event.
//! - Subscriptions to `/v0/wallet/{id}` require valid auth headers.
//!
//! Tasks complete as soon as they are submitted unless [`hold_tasks`] is on,
//! in which case they wait for [`complete_pending_tasks`].
//!
//! [`hold_tasks`]: InMemoryRelayer::hold_tasks
//! [`complete_pending_tasks`]: InMemoryRelayer::complete_pending_tasks

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use k256::ecdsa::VerifyingKey;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    CancelOrderRequest, DepositRequest, OrderRequest, RelayerClient, TaskId, WithdrawRequest,
};
use crate::config::{RENEGADE_AUTH_EXPIRATION_HEADER, RENEGADE_AUTH_HEADER};
use crate::crypto::field::{amount_from_limbs, scalar_from_limbs};
use crate::crypto::signing::{verify_http_request, verify_message, HttpAuth};
use crate::error::{RenegadeError, Result};
use crate::state::order::now_ms;
use crate::state::shares::statement_message;
use crate::state::{
    ApiWallet, ExternalTransfer, Keychain, OrderId, Token, TransferAuthorization, WalletId,
    WalletShares,
};
use crate::ws::topics::{task_topic, wallet_topic, ControlFrame, EventFrame, RelayerEvent};
use crate::ws::transport::{Connection, Connector, TransportEvent};

type SessionId = u64;

struct Session {
    to_client: mpsc::UnboundedSender<TransportEvent>,
    topics: HashSet<String>,
}

#[derive(Default)]
struct Hub {
    wallets: HashMap<WalletId, ApiWallet>,
    ledger: HashMap<WalletId, ApiWallet>,
    /// Submitted, not yet applied. Kept in submission order.
    pending: Vec<(TaskId, ApiWallet)>,
    completed: HashSet<TaskId>,
    transfer_nonces: HashSet<(WalletId, u64)>,
    sessions: HashMap<SessionId, Session>,
    next_session: SessionId,

    hold_tasks: bool,
    fail_connections: bool,
    unreachable: bool,

    creation_tasks: usize,
    subscribe_frames: usize,
}

impl Hub {
    fn submit(&mut self, wallet: ApiWallet) -> TaskId {
        let task_id = Uuid::new_v4().to_string();
        debug!(task_id = %task_id, wallet = %wallet.id, "task submitted");
        self.pending.push((task_id.clone(), wallet));
        if !self.hold_tasks {
            self.complete_pending();
        }
        task_id
    }

    fn complete_pending(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for (task_id, wallet) in pending {
            self.apply_wallet(wallet);
            self.completed.insert(task_id.clone());
            self.publish(
                &task_topic(&task_id),
                &RelayerEvent::task_completed(&task_id),
            );
        }
        count
    }

    fn apply_wallet(&mut self, wallet: ApiWallet) {
        let id = wallet.id;
        self.wallets.insert(id, wallet.clone());
        self.publish(&wallet_topic(&id), &RelayerEvent::WalletUpdate { wallet });
    }

    fn publish(&mut self, topic: &str, event: &RelayerEvent) {
        let frame = match serde_json::to_value(event).and_then(|event| {
            serde_json::to_string(&EventFrame {
                topic: topic.to_string(),
                event,
            })
        }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(topic, error = %e, "failed to encode event");
                return;
            }
        };
        self.sessions.retain(|_, session| {
            !session.topics.contains(topic)
                || session
                    .to_client
                    .send(TransportEvent::Frame(frame.clone()))
                    .is_ok()
        });
    }

    fn handle_control(&mut self, session_id: SessionId, raw: &str) {
        let frame: ControlFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "ignoring malformed control frame");
                return;
            }
        };
        self.subscribe_frames += 1;
        let topic = frame.body.topic.clone();

        if let Some(wallet_id) = topic.strip_prefix("/v0/wallet/") {
            if let Err(e) = self.authorize_wallet_topic(wallet_id, &frame) {
                warn!(topic = %topic, error = %e, "rejecting wallet subscription");
                return;
            }
        }
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        session.topics.insert(topic.clone());

        // Late subscribers to a finished task still learn it finished.
        if let Some(task_id) = topic.strip_prefix("/v0/tasks/") {
            if self.completed.contains(task_id) {
                let task_id = task_id.to_string();
                self.publish(&topic, &RelayerEvent::task_completed(&task_id));
            }
        }
    }

    fn authorize_wallet_topic(&self, wallet_id: &str, frame: &ControlFrame) -> Result<()> {
        let id: WalletId = wallet_id
            .parse()
            .map_err(|_| RenegadeError::BadParameters(format!("bad wallet id {wallet_id}")))?;
        let wallet = self
            .wallets
            .get(&id)
            .ok_or_else(|| RenegadeError::BadParameters(format!("unknown wallet {id}")))?;
        let header = |name: &str| {
            frame
                .headers
                .get(name)
                .cloned()
                .ok_or_else(|| RenegadeError::Crypto(format!("missing {name} header")))
        };
        let auth = HttpAuth {
            signature: header(RENEGADE_AUTH_HEADER)?,
            expiration_ms: header(RENEGADE_AUTH_EXPIRATION_HEADER)?
                .parse()
                .map_err(|_| RenegadeError::Crypto("bad expiration header".to_string()))?,
        };
        let body = serde_json::to_vec(&frame.body)?;
        verify_http_request(&root_key(wallet)?, &body, &auth, now_ms())
    }

    /// Checks shared by every wallet mutation.
    fn check_update(
        &self,
        id: WalletId,
        wallet: &ApiWallet,
        statement_sig: &str,
    ) -> Result<()> {
        if self.unreachable {
            return Err(offline());
        }
        let current = self.wallets.get(&id).ok_or_else(|| RenegadeError::RelayerError {
            status: 404,
            message: format!("wallet {id} not found"),
        })?;
        if wallet.id != id {
            return Err(bad_request("wallet id does not match path"));
        }
        if current.update_locked {
            return Err(bad_request("wallet is locked for an update"));
        }
        if wallet.blinder == current.blinder {
            return Err(bad_request("wallet update reuses the current blinder"));
        }

        let parse = |limbs: &Vec<Vec<u32>>| -> Result<Vec<_>> {
            limbs.iter().map(|l| scalar_from_limbs(l)).collect()
        };
        let shares = WalletShares {
            private: parse(&wallet.private_shares)?,
            blinded_public: parse(&wallet.blinded_public_shares)?,
        };
        let sig = hex::decode(statement_sig)
            .map_err(|_| bad_request("statement signature is not hex"))?;
        verify_message(&root_key(current)?, &statement_message(&shares), &sig).map_err(|e| {
            RenegadeError::RelayerError {
                status: 401,
                message: e.to_string(),
            }
        })
    }
}

fn root_key(wallet: &ApiWallet) -> Result<VerifyingKey> {
    let bytes = hex::decode(wallet.key_chain.public_keys.pk_root.trim_start_matches("0x"))
        .map_err(|e| RenegadeError::Crypto(format!("bad pk_root: {e}")))?;
    VerifyingKey::from_sec1_bytes(&bytes)
        .map_err(|e| RenegadeError::Crypto(format!("bad pk_root: {e}")))
}

fn bad_request(message: &str) -> RenegadeError {
    RenegadeError::RelayerError {
        status: 400,
        message: message.to_string(),
    }
}

fn offline() -> RenegadeError {
    RenegadeError::RelayerUnreachable("in-memory relayer is offline".to_string())
}

// ---------------------------------------------------------------------------
// InMemoryRelayer
// ---------------------------------------------------------------------------

/// In-process relayer. Cloning shares the same table.
#[derive(Clone, Default)]
pub struct InMemoryRelayer {
    hub: Arc<Mutex<Hub>>,
}

impl InMemoryRelayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a wallet in ledger state only, as if the relayer lost it.
    pub fn seed_ledger_wallet(&self, wallet: ApiWallet) {
        self.hub.lock().ledger.insert(wallet.id, wallet);
    }

    /// Place a wallet directly in the relayer's table.
    pub fn seed_relayer_wallet(&self, wallet: ApiWallet) {
        self.hub.lock().wallets.insert(wallet.id, wallet);
    }

    /// Replace a wallet out of band and push the update to subscribers, as
    /// a settled match would.
    pub fn push_wallet_update(&self, wallet: ApiWallet) {
        self.hub.lock().apply_wallet(wallet);
    }

    pub fn stored_wallet(&self, id: WalletId) -> Option<ApiWallet> {
        self.hub.lock().wallets.get(&id).cloned()
    }

    /// Keep submitted tasks pending until [`Self::complete_pending_tasks`].
    pub fn hold_tasks(&self, hold: bool) {
        self.hub.lock().hold_tasks = hold;
    }

    /// Apply every pending task. Returns how many there were.
    pub fn complete_pending_tasks(&self) -> usize {
        self.hub.lock().complete_pending()
    }

    pub fn pending_task_count(&self) -> usize {
        self.hub.lock().pending.len()
    }

    /// Make every request fail with `RelayerUnreachable`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.hub.lock().unreachable = unreachable;
    }

    /// Make new event connections fail.
    pub fn fail_connections(&self, fail: bool) {
        self.hub.lock().fail_connections = fail;
    }

    /// Report a transport error on every open event connection.
    pub fn break_connections(&self) {
        let mut hub = self.hub.lock();
        for session in hub.sessions.values() {
            let _ = session
                .to_client
                .send(TransportEvent::Error("connection reset".to_string()));
        }
        hub.sessions.clear();
    }

    pub fn creation_task_count(&self) -> usize {
        self.hub.lock().creation_tasks
    }

    pub fn subscribe_frame_count(&self) -> usize {
        self.hub.lock().subscribe_frames
    }

    pub fn open_connection_count(&self) -> usize {
        self.hub.lock().sessions.len()
    }

    /// Whether any open connection is subscribed to `topic`.
    pub fn has_subscriber(&self, topic: &str) -> bool {
        self.hub
            .lock()
            .sessions
            .values()
            .any(|s| s.topics.contains(topic))
    }

    fn submit_update(
        &self,
        id: WalletId,
        wallet: &ApiWallet,
        statement_sig: &str,
    ) -> Result<TaskId> {
        let mut hub = self.hub.lock();
        hub.check_update(id, wallet, statement_sig)?;
        Ok(hub.submit(wallet.clone()))
    }

    /// As [`Self::submit_update`], plus the transfer authorization. The
    /// nonce is consumed only when the whole update is accepted.
    fn submit_transfer(
        &self,
        id: WalletId,
        transfer: &ExternalTransfer,
        auth: &TransferAuthorization,
        wallet: &ApiWallet,
        statement_sig: &str,
    ) -> Result<TaskId> {
        let mut hub = self.hub.lock();
        hub.check_update(id, wallet, statement_sig)?;
        if hub.transfer_nonces.contains(&(id, auth.nonce)) {
            return Err(bad_request("transfer nonce already used"));
        }
        let key = hub
            .wallets
            .get(&id)
            .map(root_key)
            .transpose()?
            .ok_or_else(|| bad_request("unknown wallet"))?;
        transfer
            .verify(&key, auth, now_ms())
            .map_err(|e| RenegadeError::RelayerError {
                status: 401,
                message: e.to_string(),
            })?;
        hub.transfer_nonces.insert((id, auth.nonce));
        Ok(hub.submit(wallet.clone()))
    }
}

#[async_trait]
impl RelayerClient for InMemoryRelayer {
    async fn ping(&self) -> Result<u64> {
        if self.hub.lock().unreachable {
            return Err(offline());
        }
        Ok(now_ms())
    }

    async fn get_wallet(&self, id: WalletId, keychain: &Keychain) -> Result<Option<ApiWallet>> {
        let hub = self.hub.lock();
        if hub.unreachable {
            return Err(offline());
        }
        Ok(hub
            .wallets
            .get(&id)
            .filter(|w| keychain.matches_public(&w.key_chain))
            .cloned())
    }

    /// A ledger hit is re-indexed into the relayer's table, as the real
    /// relayer does after a successful lookup.
    async fn find_wallet_on_chain(&self, keychain: &Keychain) -> Result<Option<ApiWallet>> {
        let mut hub = self.hub.lock();
        if hub.unreachable {
            return Err(offline());
        }
        let found = hub.ledger.get(&keychain.account_id()).cloned();
        if let Some(wallet) = &found {
            hub.wallets.insert(wallet.id, wallet.clone());
        }
        Ok(found)
    }

    async fn create_wallet(&self, wallet: &ApiWallet) -> Result<TaskId> {
        let mut hub = self.hub.lock();
        if hub.unreachable {
            return Err(offline());
        }
        if hub.wallets.contains_key(&wallet.id) {
            return Err(RenegadeError::RelayerError {
                status: 409,
                message: format!("wallet {} already exists", wallet.id),
            });
        }
        hub.creation_tasks += 1;
        Ok(hub.submit(wallet.clone()))
    }

    async fn deposit(
        &self,
        id: WalletId,
        request: &DepositRequest,
        _keychain: &Keychain,
    ) -> Result<TaskId> {
        let transfer = ExternalTransfer::deposit(
            &request.from_addr,
            request.mint,
            amount_from_limbs(&request.amount)?,
        );
        self.submit_transfer(
            id,
            &transfer,
            &request.transfer_auth,
            &request.wallet,
            &request.statement_sig,
        )
    }

    async fn withdraw(
        &self,
        id: WalletId,
        mint: &Token,
        request: &WithdrawRequest,
        _keychain: &Keychain,
    ) -> Result<TaskId> {
        let transfer = ExternalTransfer::withdrawal(
            &request.destination_addr,
            *mint,
            amount_from_limbs(&request.amount)?,
        );
        self.submit_transfer(
            id,
            &transfer,
            &request.transfer_auth,
            &request.wallet,
            &request.statement_sig,
        )
    }

    async fn place_order(
        &self,
        id: WalletId,
        request: &OrderRequest,
        _keychain: &Keychain,
    ) -> Result<TaskId> {
        self.submit_update(id, &request.wallet, &request.statement_sig)
    }

    async fn update_order(
        &self,
        id: WalletId,
        _order_id: OrderId,
        request: &OrderRequest,
        _keychain: &Keychain,
    ) -> Result<TaskId> {
        self.submit_update(id, &request.wallet, &request.statement_sig)
    }

    async fn cancel_order(
        &self,
        id: WalletId,
        _order_id: OrderId,
        request: &CancelOrderRequest,
        _keychain: &Keychain,
    ) -> Result<TaskId> {
        self.submit_update(id, &request.wallet, &request.statement_sig)
    }
}

#[async_trait]
impl Connector for InMemoryRelayer {
    async fn connect(&self, url: &str) -> Result<Connection> {
        let (connection, mut remote) = Connection::pair();
        let session_id = {
            let mut hub = self.hub.lock();
            if hub.fail_connections || hub.unreachable {
                return Err(RenegadeError::RelayerUnreachable(url.to_string()));
            }
            let id = hub.next_session;
            hub.next_session += 1;
            let _ = remote.to_client.send(TransportEvent::Opened);
            hub.sessions.insert(
                id,
                Session {
                    to_client: remote.to_client.clone(),
                    topics: HashSet::new(),
                },
            );
            id
        };
        debug!(url, session = session_id, "in-memory connection opened");

        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            while let Some(raw) = remote.from_client.recv().await {
                hub.lock().handle_control(session_id, &raw);
            }
            hub.lock().sessions.remove(&session_id);
            debug!(session = session_id, "in-memory connection closed");
        });
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Wallet;
    use crate::ws::TopicMultiplexer;
    use serde_json::Value;

    fn keychain() -> Keychain {
        Keychain::from_seed(b"memory-relayer").unwrap()
    }

    #[tokio::test]
    async fn created_wallet_appears_after_completion() {
        let relayer = InMemoryRelayer::new();
        relayer.hold_tasks(true);
        let kc = keychain();
        let wallet = Wallet::empty(kc.clone()).unwrap();
        relayer.create_wallet(&wallet.to_api()).await.unwrap();
        assert!(relayer.get_wallet(wallet.id(), &kc).await.unwrap().is_none());
        assert_eq!(relayer.complete_pending_tasks(), 1);
        assert!(relayer.get_wallet(wallet.id(), &kc).await.unwrap().is_some());
        assert_eq!(relayer.creation_task_count(), 1);
    }

    #[tokio::test]
    async fn rejects_reused_blinder_and_bad_signature() {
        let relayer = InMemoryRelayer::new();
        let kc = keychain();
        let wallet = Wallet::empty(kc.clone()).unwrap();
        relayer.seed_relayer_wallet(wallet.to_api());

        let stale = CancelOrderRequest {
            wallet: wallet.to_api(),
            statement_sig: wallet.sign_update(),
        };
        let err = relayer
            .cancel_order(wallet.id(), Uuid::new_v4(), &stale, &kc)
            .await
            .unwrap_err();
        assert!(matches!(err, RenegadeError::RelayerError { status: 400, .. }));

        let next = wallet.reblind().unwrap();
        let forged = CancelOrderRequest {
            wallet: next.to_api(),
            statement_sig: wallet.sign_update(),
        };
        let err = relayer
            .cancel_order(wallet.id(), Uuid::new_v4(), &forged, &kc)
            .await
            .unwrap_err();
        assert!(matches!(err, RenegadeError::RelayerError { status: 401, .. }));

        let good = CancelOrderRequest {
            wallet: next.to_api(),
            statement_sig: next.sign_update(),
        };
        relayer
            .cancel_order(wallet.id(), Uuid::new_v4(), &good, &kc)
            .await
            .unwrap();
        assert_eq!(relayer.stored_wallet(wallet.id()), Some(next.to_api()));
    }

    #[tokio::test]
    async fn deposits_need_a_fresh_transfer_authorization() {
        let relayer = InMemoryRelayer::new();
        let kc = keychain();
        let wallet = Wallet::empty(kc.clone()).unwrap();
        relayer.seed_relayer_wallet(wallet.to_api());

        let mint = Token::new([6; 20]);
        let next = wallet.add_balance(mint, 50).unwrap().reblind().unwrap();
        let request = |transfer_auth: TransferAuthorization| DepositRequest {
            from_addr: "0xfrom".into(),
            mint,
            amount: crate::crypto::field::amount_to_limbs(50),
            wallet: next.to_api(),
            statement_sig: next.sign_update(),
            transfer_auth,
        };

        // Signed for a different amount.
        let wrong = ExternalTransfer::deposit("0xfrom", mint, 51).authorize(&kc, now_ms());
        let err = relayer.deposit(next.id(), &request(wrong), &kc).await.unwrap_err();
        assert!(matches!(err, RenegadeError::RelayerError { status: 401, .. }));

        // Past its deadline.
        let stale = ExternalTransfer::deposit("0xfrom", mint, 50).authorize_with(&kc, 1, 1);
        let err = relayer.deposit(next.id(), &request(stale), &kc).await.unwrap_err();
        assert!(matches!(err, RenegadeError::RelayerError { status: 401, .. }));

        let good = ExternalTransfer::deposit("0xfrom", mint, 50).authorize(&kc, now_ms());
        relayer
            .deposit(next.id(), &request(good.clone()), &kc)
            .await
            .unwrap();
        assert_eq!(relayer.stored_wallet(next.id()), Some(next.to_api()));

        // Replaying the nonce on a later update is refused.
        let later = next.add_balance(mint, 50).unwrap().reblind().unwrap();
        let replay = DepositRequest {
            wallet: later.to_api(),
            statement_sig: later.sign_update(),
            ..request(good)
        };
        let err = relayer.deposit(later.id(), &replay, &kc).await.unwrap_err();
        assert!(matches!(err, RenegadeError::RelayerError { status: 400, .. }));
    }

    #[tokio::test]
    async fn wallet_topic_requires_auth() {
        let relayer = InMemoryRelayer::new();
        let kc = keychain();
        let wallet = Wallet::empty(kc.clone()).unwrap();
        relayer.seed_relayer_wallet(wallet.to_api());
        let topic = wallet_topic(&wallet.id());

        let mux = TopicMultiplexer::connect(&relayer, "ws://memory").await.unwrap();
        mux.subscribe(&topic, None).await.unwrap();
        tokio::task::yield_now().await;
        assert!(!relayer.has_subscriber(&topic));

        mux.subscribe(&topic, Some(&kc)).await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(relayer.has_subscriber(&topic));
        assert_eq!(relayer.subscribe_frame_count(), 2);
    }

    #[tokio::test]
    async fn late_task_subscriber_sees_completion() {
        let relayer = InMemoryRelayer::new();
        let kc = keychain();
        let task = relayer
            .create_wallet(&Wallet::empty(kc).unwrap().to_api())
            .await
            .unwrap();
        let mux = TopicMultiplexer::connect(&relayer, "ws://memory").await.unwrap();
        mux.await_task_completion(Some(&task)).await.unwrap();
    }

    #[tokio::test]
    async fn offline_relayer_refuses_everything() {
        let relayer = InMemoryRelayer::new();
        relayer.set_unreachable(true);
        assert!(matches!(relayer.ping().await, Err(RenegadeError::RelayerUnreachable(_))));
        assert!(TopicMultiplexer::connect(&relayer, "ws://memory").await.is_err());
    }

    #[test]
    fn published_frames_are_event_frames() {
        let relayer = InMemoryRelayer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut hub = relayer.hub.lock();
            hub.sessions.insert(
                0,
                Session {
                    to_client: tx,
                    topics: HashSet::from(["/v0/tasks/t".to_string()]),
                },
            );
            hub.publish("/v0/tasks/t", &RelayerEvent::task_completed("t"));
        }
        let Ok(TransportEvent::Frame(raw)) = rx.try_recv() else {
            panic!("expected a frame");
        };
        let frame: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(frame["topic"], "/v0/tasks/t");
        assert_eq!(frame["event"]["state"]["state"], "Completed");
    }
}

//! # Account
//!
//! One keychain, one wallet, one event connection. An [`Account`] keeps a
//! local copy of its wallet consistent with the relayer:
//!
//! ```text
//!              sync()
//!   Unsynced ─────────┬── relayer has wallet ──────────────┐
//!                     ├── ledger has wallet ───────────────┤
//!                     └── neither ── Creating ── task ─────┴──► Synced
//!                                              Completed
//! ```
//!
//! Only a [`SyncedAccount`] can mutate or query the wallet, and the only way
//! to get one is [`Account::synced`], which checks the state once. Calls made
//! before sync finishes fail immediately with `AccountNotSynced`; nothing
//! waits implicitly.
//!
//! ## Mutations
//!
//! Every mutation runs the same pipeline:
//!
//! 1. Re-fetch the canonical wallet from the relayer.
//! 2. Apply the edit to get a draft.
//! 3. Reblind the draft and sign its shares.
//! 4. Submit, receiving a task id.
//!
//! The re-fetch is not guarded by a version token. Two mutations issued
//! concurrently on one account can both read the same wallet, and the
//! relayer accepts whichever lands first. Callers that need both must
//! serialize them.
//!
//! ## Wallet updates
//!
//! Once synced, the account subscribes to its wallet topic. Every pushed
//! `WalletUpdate` replaces the cached wallet outright (last write wins).
//! That internal listener runs at the highest priority so user callbacks on
//! the same topic already see the new wallet.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::crypto::field::amount_to_limbs;
use crate::error::{RenegadeError, Result};
use crate::relayer::{
    CancelOrderRequest, DepositRequest, OrderRequest, RelayerClient, TaskId, WithdrawRequest,
};
use crate::state::order::now_ms;
use crate::state::{
    AccountId, ApiWallet, Balance, BalanceId, ExternalTransfer, Fee, FeeId, Keychain, Order,
    OrderId, Token, Wallet,
};
use crate::ws::topics::{wallet_topic, RelayerEvent};
use crate::ws::{Callback, CallbackId, Connector, TopicMultiplexer};

/// Completion of a submitted task. Resolves when the relayer reports the
/// task `Completed`.
pub type TaskCompletion = BoxFuture<'static, Result<()>>;

/// Priority of the account's own wallet listener.
const WALLET_CACHE_PRIORITY: i32 = i32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unsynced,
    Creating,
    Synced,
}

/// Where a synced wallet came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOrigin {
    Relayer,
    Ledger,
    Created(TaskId),
}

struct AccountInner {
    keychain: Keychain,
    relayer: Arc<dyn RelayerClient>,
    connector: Arc<dyn Connector>,
    ws_url: String,
    state: Mutex<SyncState>,
    wallet: RwLock<Wallet>,
    stream: Mutex<Option<Arc<TopicMultiplexer>>>,
    /// Serializes `sync` so two callers never both create.
    sync_lock: AsyncMutex<()>,
    torn_down: AtomicBool,
}

/// A wallet owner. Cloning yields another handle to the same account.
#[derive(Clone)]
pub struct Account {
    inner: Arc<AccountInner>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Account {
    /// A new, unsynced account. The local wallet starts empty with the
    /// keychain's genesis blinder.
    pub fn new(
        keychain: Keychain,
        relayer: Arc<dyn RelayerClient>,
        connector: Arc<dyn Connector>,
        ws_url: impl Into<String>,
    ) -> Result<Self> {
        let wallet = Wallet::empty(keychain.clone())?;
        Ok(Self {
            inner: Arc::new(AccountInner {
                keychain,
                relayer,
                connector,
                ws_url: ws_url.into(),
                state: Mutex::new(SyncState::Unsynced),
                wallet: RwLock::new(wallet),
                stream: Mutex::new(None),
                sync_lock: AsyncMutex::new(()),
                torn_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn id(&self) -> AccountId {
        self.inner.keychain.account_id()
    }

    pub fn keychain(&self) -> &Keychain {
        &self.inner.keychain
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state.lock()
    }

    pub fn is_synced(&self) -> bool {
        self.state() == SyncState::Synced
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// The mutation/query handle, if the account is synced.
    pub fn synced(&self) -> Result<SyncedAccount> {
        self.ensure_live()?;
        if self.is_synced() {
            Ok(SyncedAccount {
                account: self.clone(),
            })
        } else {
            Err(RenegadeError::AccountNotSynced(self.id().to_string()))
        }
    }

    // -- Sync ---------------------------------------------------------------

    /// Bring the account to `Synced`.
    ///
    /// Tries the relayer, then the ledger, and only then creates the wallet,
    /// waiting for the creation task to complete. On failure the account
    /// falls back to `Unsynced` and the call can be retried. Calling it on
    /// an account that is already synced reports `Relayer`.
    pub async fn sync(&self) -> Result<SyncOrigin> {
        self.ensure_live()?;
        let _guard = self.inner.sync_lock.lock().await;
        if self.is_synced() {
            return Ok(SyncOrigin::Relayer);
        }

        match self.run_sync().await {
            Ok(origin) => {
                self.set_state(SyncState::Synced);
                info!(account = %self.id(), origin = ?origin, "account synced");
                Ok(origin)
            }
            Err(e) => {
                self.set_state(SyncState::Unsynced);
                // A failed connection stays failed; let the retry open a new one.
                if e.is_transport() {
                    if let Some(stream) = self.inner.stream.lock().take() {
                        stream.teardown();
                    }
                }
                warn!(account = %self.id(), error = %e, "account sync failed");
                Err(e)
            }
        }
    }

    async fn run_sync(&self) -> Result<SyncOrigin> {
        let keychain = &self.inner.keychain;
        let id = self.id();
        let stream = self.stream().await?;

        if let Some(api) = self.inner.relayer.get_wallet(id, keychain).await? {
            debug!(account = %id, "wallet found on relayer");
            self.adopt(&api)?;
            self.watch_wallet(&stream).await?;
            return Ok(SyncOrigin::Relayer);
        }

        if let Some(api) = self.inner.relayer.find_wallet_on_chain(keychain).await? {
            debug!(account = %id, "wallet found in ledger state");
            self.adopt(&api)?;
            self.watch_wallet(&stream).await?;
            return Ok(SyncOrigin::Ledger);
        }

        self.set_state(SyncState::Creating);
        let local = self.inner.wallet.read().to_api();
        let task_id = self.inner.relayer.create_wallet(&local).await?;
        info!(account = %id, task_id = %task_id, "wallet creation submitted");
        stream.await_task_completion(Some(&task_id)).await?;
        self.watch_wallet(&stream).await?;
        Ok(SyncOrigin::Created(task_id))
    }

    /// The account's event connection, opened on first use.
    async fn stream(&self) -> Result<Arc<TopicMultiplexer>> {
        if let Some(stream) = self.inner.stream.lock().clone() {
            return Ok(stream);
        }
        let stream = Arc::new(
            TopicMultiplexer::connect(self.inner.connector.as_ref(), &self.inner.ws_url).await?,
        );
        let mut slot = self.inner.stream.lock();
        Ok(Arc::clone(slot.get_or_insert(stream)))
    }

    fn adopt(&self, api: &ApiWallet) -> Result<()> {
        let wallet = Wallet::from_api(api, &self.inner.keychain)?;
        *self.inner.wallet.write() = wallet;
        Ok(())
    }

    /// Subscribe to the wallet topic, keeping the cache current.
    async fn watch_wallet(&self, stream: &TopicMultiplexer) -> Result<CallbackId> {
        let weak = Arc::downgrade(&self.inner);
        let callback: Callback = Arc::new(move |event: &Value| on_wallet_event(&weak, event));
        stream
            .register_callback(
                &wallet_topic(&self.id()),
                callback,
                WALLET_CACHE_PRIORITY,
                Some(&self.inner.keychain),
            )
            .await
    }

    // -- Streaming ----------------------------------------------------------

    /// Listen on this account's wallet topic.
    pub async fn register_callback(&self, callback: Callback, priority: i32) -> Result<CallbackId> {
        self.synced()?;
        let stream = self.stream().await?;
        stream
            .register_callback(
                &wallet_topic(&self.id()),
                callback,
                priority,
                Some(&self.inner.keychain),
            )
            .await
    }

    pub fn release_callback(&self, id: &CallbackId) -> Result<()> {
        match self.inner.stream.lock().as_ref() {
            Some(stream) => stream.release_callback(id),
            None => Err(RenegadeError::CallbackNotRegistered(id.to_string())),
        }
    }

    /// Await a task on this account's connection.
    pub fn task_completion(&self, task_id: TaskId) -> TaskCompletion {
        let account = self.clone();
        async move {
            let stream = account.stream().await?;
            stream.await_task_completion(Some(&task_id)).await
        }
        .boxed()
    }

    /// Close the event connection. The account cannot be used afterwards.
    pub fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = self.inner.stream.lock().take() {
            stream.teardown();
        }
        self.set_state(SyncState::Unsynced);
        debug!(account = %self.id(), "account torn down");
    }

    fn set_state(&self, state: SyncState) {
        *self.inner.state.lock() = state;
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_torn_down() {
            Err(RenegadeError::RelayerTornDown)
        } else {
            Ok(())
        }
    }
}

fn on_wallet_event(account: &Weak<AccountInner>, event: &Value) {
    let Some(inner) = account.upgrade() else {
        return;
    };
    let wallet = match serde_json::from_value::<RelayerEvent>(event.clone()) {
        Ok(RelayerEvent::WalletUpdate { wallet }) => wallet,
        Ok(_) => return,
        Err(e) => {
            warn!(
                account = %inner.keychain.account_id(),
                error = %e,
                "dropping undecodable wallet update"
            );
            return;
        }
    };
    match Wallet::from_api(&wallet, &inner.keychain) {
        Ok(wallet) => {
            debug!(wallet = %wallet.id(), "wallet replaced from push update");
            *inner.wallet.write() = wallet;
        }
        Err(e) => warn!(error = %e, "ignoring unusable wallet update"),
    }
}

// ---------------------------------------------------------------------------
// SyncedAccount
// ---------------------------------------------------------------------------

/// An account known to be synced. Obtained from [`Account::synced`].
#[derive(Debug, Clone)]
pub struct SyncedAccount {
    account: Account,
}

impl SyncedAccount {
    pub fn account(&self) -> &Account {
        &self.account
    }

    fn inner(&self) -> &AccountInner {
        &self.account.inner
    }

    // -- Queries ------------------------------------------------------------

    /// The cached wallet.
    pub fn wallet(&self) -> Wallet {
        self.inner().wallet.read().clone()
    }

    /// Non-zero balances by id.
    pub fn balances(&self) -> BTreeMap<BalanceId, Balance> {
        self.inner().wallet.read().balances()
    }

    /// Non-zero orders by id.
    pub fn orders(&self) -> BTreeMap<OrderId, Order> {
        self.inner().wallet.read().orders()
    }

    pub fn fees(&self) -> BTreeMap<FeeId, Fee> {
        self.inner().wallet.read().fees()
    }

    /// Re-fetch the wallet from the relayer and replace the cache.
    pub async fn refresh(&self) -> Result<Wallet> {
        self.account.ensure_live()?;
        let id = self.account.id();
        let api = self
            .inner()
            .relayer
            .get_wallet(id, &self.inner().keychain)
            .await?
            .ok_or_else(|| RenegadeError::RelayerError {
                status: 404,
                message: format!("wallet {id} not found"),
            })?;
        self.account.adopt(&api)?;
        Ok(self.wallet())
    }

    // -- Mutations ----------------------------------------------------------

    /// Credit `amount` of `mint`, pulled from `from_addr`.
    pub async fn deposit(&self, mint: Token, amount: u128, from_addr: &str) -> Result<TaskId> {
        if amount == 0 {
            return Err(RenegadeError::BadParameters(
                "deposit amount must be positive".to_string(),
            ));
        }
        let next = self.refresh().await?.add_balance(mint, amount)?.reblind()?;
        let request = DepositRequest {
            from_addr: from_addr.to_string(),
            mint,
            amount: amount_to_limbs(amount),
            statement_sig: next.sign_update(),
            wallet: next.to_api(),
            transfer_auth: ExternalTransfer::deposit(from_addr, mint, amount)
                .authorize(&self.inner().keychain, now_ms()),
        };
        let task = self
            .inner()
            .relayer
            .deposit(next.id(), &request, &self.inner().keychain)
            .await?;
        info!(wallet = %next.id(), %mint, amount = %amount, task_id = %task, "deposit submitted");
        Ok(task)
    }

    /// Debit `amount` of `mint` to `destination_addr`.
    pub async fn withdraw(
        &self,
        mint: Token,
        amount: u128,
        destination_addr: &str,
    ) -> Result<TaskId> {
        if amount == 0 {
            return Err(RenegadeError::BadParameters(
                "withdrawal amount must be positive".to_string(),
            ));
        }
        let next = self.refresh().await?.remove_balance(mint, amount)?.reblind()?;
        let request = WithdrawRequest {
            destination_addr: destination_addr.to_string(),
            amount: amount_to_limbs(amount),
            statement_sig: next.sign_update(),
            wallet: next.to_api(),
            transfer_auth: ExternalTransfer::withdrawal(destination_addr, mint, amount)
                .authorize(&self.inner().keychain, now_ms()),
        };
        let task = self
            .inner()
            .relayer
            .withdraw(next.id(), &mint, &request, &self.inner().keychain)
            .await?;
        info!(
            wallet = %next.id(),
            %mint,
            amount = %amount,
            task_id = %task,
            "withdrawal submitted"
        );
        Ok(task)
    }

    pub async fn place_order(&self, order: Order) -> Result<TaskId> {
        let next = self.refresh().await?.add_order(order.clone())?.reblind()?;
        let request = OrderRequest {
            order,
            statement_sig: next.sign_update(),
            wallet: next.to_api(),
        };
        let task = self
            .inner()
            .relayer
            .place_order(next.id(), &request, &self.inner().keychain)
            .await?;
        info!(wallet = %next.id(), order = %request.order.id, task_id = %task, "order placed");
        Ok(task)
    }

    /// Replace order `id` with `order`, keeping the id.
    pub async fn modify_order(&self, id: OrderId, order: Order) -> Result<TaskId> {
        let order = order.with_id(id);
        let next = self.refresh().await?.modify_order(id, order.clone())?.reblind()?;
        let request = OrderRequest {
            order,
            statement_sig: next.sign_update(),
            wallet: next.to_api(),
        };
        let task = self
            .inner()
            .relayer
            .update_order(next.id(), id, &request, &self.inner().keychain)
            .await?;
        info!(wallet = %next.id(), order = %id, task_id = %task, "order modified");
        Ok(task)
    }

    /// Modify the order if its id is already in the wallet, else place it.
    pub async fn modify_or_place_order(&self, order: Order) -> Result<TaskId> {
        let exists = self.inner().wallet.read().raw_orders().iter().any(|o| o.id == order.id);
        if exists {
            self.modify_order(order.id, order).await
        } else {
            self.place_order(order).await
        }
    }

    pub async fn cancel_order(&self, id: OrderId) -> Result<TaskId> {
        let next = self.refresh().await?.cancel_order(id)?.reblind()?;
        let request = CancelOrderRequest {
            statement_sig: next.sign_update(),
            wallet: next.to_api(),
        };
        let task = self
            .inner()
            .relayer
            .cancel_order(next.id(), id, &request, &self.inner().keychain)
            .await?;
        info!(wallet = %next.id(), order = %id, task_id = %task, "order cancelled");
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relayer::InMemoryRelayer;
    use crate::state::{OrderKind, OrderSide};

    fn account(relayer: &InMemoryRelayer, seed: &[u8]) -> Account {
        Account::new(
            Keychain::from_seed(seed).unwrap(),
            Arc::new(relayer.clone()),
            Arc::new(relayer.clone()),
            "ws://memory",
        )
        .unwrap()
    }

    fn token(n: u8) -> Token {
        Token::new([n; 20])
    }

    #[tokio::test]
    async fn operations_before_sync_fail_fast() {
        let relayer = InMemoryRelayer::new();
        let acct = account(&relayer, b"unsynced");
        assert_eq!(acct.state(), SyncState::Unsynced);
        assert!(matches!(
            acct.synced(),
            Err(RenegadeError::AccountNotSynced(_))
        ));
        assert!(matches!(
            acct.register_callback(Arc::new(|_| {}), 0).await,
            Err(RenegadeError::AccountNotSynced(_))
        ));
    }

    #[tokio::test]
    async fn creates_wallet_when_nothing_exists() {
        let relayer = InMemoryRelayer::new();
        let acct = account(&relayer, b"fresh");
        let origin = acct.sync().await.unwrap();
        assert!(matches!(origin, SyncOrigin::Created(_)));
        assert_eq!(relayer.creation_task_count(), 1);
        assert!(acct.is_synced());
        assert!(relayer.has_subscriber(&wallet_topic(&acct.id())));
    }

    #[tokio::test]
    async fn adopts_relayer_wallet_without_creating() {
        let relayer = InMemoryRelayer::new();
        let acct = account(&relayer, b"known");
        let existing = Wallet::empty(acct.keychain().clone())
            .unwrap()
            .add_balance(token(3), 77)
            .unwrap()
            .reblind()
            .unwrap();
        relayer.seed_relayer_wallet(existing.to_api());

        assert_eq!(acct.sync().await.unwrap(), SyncOrigin::Relayer);
        assert_eq!(relayer.creation_task_count(), 0);
        assert_eq!(acct.synced().unwrap().wallet().balance_of(&token(3)), 77);
    }

    #[tokio::test]
    async fn adopts_ledger_wallet_without_creating() {
        let relayer = InMemoryRelayer::new();
        let acct = account(&relayer, b"ledger");
        let existing = Wallet::empty(acct.keychain().clone()).unwrap();
        relayer.seed_ledger_wallet(existing.to_api());

        assert_eq!(acct.sync().await.unwrap(), SyncOrigin::Ledger);
        assert_eq!(relayer.creation_task_count(), 0);
    }

    #[tokio::test]
    async fn sync_failure_returns_to_unsynced() {
        let relayer = InMemoryRelayer::new();
        let acct = account(&relayer, b"offline");
        relayer.fail_connections(true);
        assert!(matches!(
            acct.sync().await,
            Err(RenegadeError::RelayerUnreachable(_))
        ));
        assert_eq!(acct.state(), SyncState::Unsynced);

        relayer.fail_connections(false);
        acct.sync().await.unwrap();
        assert!(acct.is_synced());
    }

    #[tokio::test]
    async fn creating_until_task_completes() {
        let relayer = InMemoryRelayer::new();
        relayer.hold_tasks(true);
        let acct = account(&relayer, b"held");
        let syncing = {
            let acct = acct.clone();
            tokio::spawn(async move { acct.sync().await })
        };
        while relayer.pending_task_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(acct.state(), SyncState::Creating);
        assert!(acct.synced().is_err());

        relayer.complete_pending_tasks();
        assert!(matches!(syncing.await.unwrap(), Ok(SyncOrigin::Created(_))));
        assert!(acct.is_synced());
    }

    #[tokio::test]
    async fn deposit_updates_cache_through_push() {
        let relayer = InMemoryRelayer::new();
        let acct = account(&relayer, b"deposit");
        acct.sync().await.unwrap();
        let synced = acct.synced().unwrap();

        let task = synced.deposit(token(9), 500, "0xfrom").await.unwrap();
        acct.task_completion(task).await.unwrap();
        assert_eq!(synced.wallet().balance_of(&token(9)), 500);
        assert_eq!(synced.balances().len(), 1);
    }

    #[tokio::test]
    async fn order_lifecycle() {
        let relayer = InMemoryRelayer::new();
        let acct = account(&relayer, b"orders");
        acct.sync().await.unwrap();
        let synced = acct.synced().unwrap();

        let order = Order::new(token(1), token(2), OrderSide::Sell, OrderKind::Midpoint, 10);
        let id = order.id;
        let task = synced.place_order(order.clone()).await.unwrap();
        acct.task_completion(task).await.unwrap();
        assert_eq!(synced.orders()[&id].amount, 10);

        let bigger = Order::new(token(1), token(2), OrderSide::Sell, OrderKind::Midpoint, 25)
            .with_id(id);
        let task = synced.modify_or_place_order(bigger).await.unwrap();
        acct.task_completion(task).await.unwrap();
        assert_eq!(synced.orders()[&id].amount, 25);

        let task = synced.cancel_order(id).await.unwrap();
        acct.task_completion(task).await.unwrap();
        assert!(synced.orders().is_empty());

        assert!(matches!(
            synced.cancel_order(id).await,
            Err(RenegadeError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn pushed_update_replaces_cache() {
        let relayer = InMemoryRelayer::new();
        let acct = account(&relayer, b"push");
        acct.sync().await.unwrap();
        let synced = acct.synced().unwrap();

        let settled = synced
            .wallet()
            .add_balance(token(4), 1234)
            .unwrap()
            .reblind()
            .unwrap();
        relayer.push_wallet_update(settled.to_api());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(synced.wallet(), settled);
    }

    #[tokio::test]
    async fn teardown_blocks_further_use() {
        let relayer = InMemoryRelayer::new();
        let acct = account(&relayer, b"teardown");
        acct.sync().await.unwrap();
        acct.teardown();
        acct.teardown();
        assert!(matches!(acct.synced(), Err(RenegadeError::RelayerTornDown)));
        assert!(matches!(acct.sync().await, Err(RenegadeError::RelayerTornDown)));
    }
}

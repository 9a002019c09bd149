//! # Renegade
//!
//! The entry point. A [`Renegade`] holds the relayer configuration, the
//! registered accounts (each with its own event connection), and one shared
//! event connection for topics that belong to no account: price reports,
//! the order book, network and MPC events, and task status.
//!
//! Every operation addresses an account by id. Mutations come in two forms:
//!
//! - `deposit(..)` submits, waits for the task to complete, then sleeps for
//!   the configured `task_delay`.
//! - `deposit_task_job(..)` submits and hands back the task id with a future
//!   that resolves on completion, leaving the wait to the caller.
//!
//! After [`Renegade::teardown`] every call fails with `RelayerTornDown`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::account::{Account, SyncOrigin, SyncedAccount, TaskCompletion};
use crate::config::RenegadeConfig;
use crate::error::{RenegadeError, Result};
use crate::relayer::{HttpRelayerClient, RelayerClient, TaskId};
use crate::state::{
    AccountId, Balance, BalanceId, Fee, FeeId, Keychain, Order, OrderId, Token, Wallet,
};
use crate::ws::topics::{
    price_report_topic, task_topic, Exchange, MPC_TOPIC, NETWORK_TOPIC, ORDER_BOOK_TOPIC,
};
use crate::ws::{Callback, CallbackId, Connector, TopicMultiplexer};

/// A submitted task and the future that resolves when it completes.
pub type TaskJob = (TaskId, TaskCompletion);

pub struct Renegade {
    config: RenegadeConfig,
    relayer: Arc<dyn RelayerClient>,
    connector: Arc<dyn Connector>,
    ws_url: String,
    accounts: DashMap<AccountId, Account>,
    shared_stream: Mutex<Option<Arc<TopicMultiplexer>>>,
    torn_down: AtomicBool,
}

impl Renegade {
    /// Talk to the relayer over HTTP, with `connector` supplying the event
    /// stream.
    pub fn new(config: RenegadeConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let relayer = Arc::new(HttpRelayerClient::from_config(&config)?);
        Self::with_relayer(config, relayer, connector)
    }

    /// Use explicit request and event-stream collaborators.
    pub fn with_relayer(
        config: RenegadeConfig,
        relayer: Arc<dyn RelayerClient>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;
        let ws_url = config.ws_url()?;
        if config.verbose {
            debug!(?config, "renegade client configured");
        }
        Ok(Self {
            config,
            relayer,
            connector,
            ws_url,
            accounts: DashMap::new(),
            shared_stream: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RenegadeConfig {
        &self.config
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    /// Track a new account. Its id is derived from the keychain.
    pub fn register_account(&self, keychain: Keychain) -> Result<AccountId> {
        self.ensure_live()?;
        let id = keychain.account_id();
        match self.accounts.entry(id) {
            Entry::Occupied(_) => Err(RenegadeError::AccountAlreadyRegistered(id.to_string())),
            Entry::Vacant(slot) => {
                let account = Account::new(
                    keychain,
                    Arc::clone(&self.relayer),
                    Arc::clone(&self.connector),
                    self.ws_url.clone(),
                )?;
                slot.insert(account);
                info!(account = %id, "account registered");
                Ok(id)
            }
        }
    }

    /// Sync an account, creating its wallet if needed. Returns once synced.
    pub async fn initialize_account(&self, id: AccountId) -> Result<SyncOrigin> {
        let account = self.account(id)?;
        account.sync().await
    }

    /// Stop tracking an account and close its connection.
    pub fn unregister_account(&self, id: AccountId) -> Result<()> {
        self.ensure_live()?;
        let (_, account) = self
            .accounts
            .remove(&id)
            .ok_or_else(|| RenegadeError::AccountNotRegistered(id.to_string()))?;
        account.teardown();
        info!(account = %id, "account unregistered");
        Ok(())
    }

    pub fn account(&self, id: AccountId) -> Result<Account> {
        self.ensure_live()?;
        self.accounts
            .get(&id)
            .map(|a| a.value().clone())
            .ok_or_else(|| RenegadeError::AccountNotRegistered(id.to_string()))
    }

    fn synced(&self, id: AccountId) -> Result<SyncedAccount> {
        self.account(id)?.synced()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_balances(&self, id: AccountId) -> Result<BTreeMap<BalanceId, Balance>> {
        Ok(self.synced(id)?.balances())
    }

    pub fn get_orders(&self, id: AccountId) -> Result<BTreeMap<OrderId, Order>> {
        Ok(self.synced(id)?.orders())
    }

    pub fn get_fees(&self, id: AccountId) -> Result<BTreeMap<FeeId, Fee>> {
        Ok(self.synced(id)?.fees())
    }

    pub fn get_keychain(&self, id: AccountId) -> Result<Keychain> {
        Ok(self.account(id)?.keychain().clone())
    }

    /// Re-fetch the wallet from the relayer.
    pub async fn query_wallet(&self, id: AccountId) -> Result<Wallet> {
        self.synced(id)?.refresh().await
    }

    /// Relayer clock in milliseconds.
    pub async fn ping(&self) -> Result<u64> {
        self.ensure_live()?;
        self.relayer.ping().await
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub async fn deposit(
        &self,
        id: AccountId,
        mint: Token,
        amount: u128,
        from_addr: &str,
    ) -> Result<()> {
        let job = self.deposit_task_job(id, mint, amount, from_addr).await;
        self.finish(job).await
    }

    pub async fn deposit_task_job(
        &self,
        id: AccountId,
        mint: Token,
        amount: u128,
        from_addr: &str,
    ) -> Result<TaskJob> {
        let account = self.synced(id)?;
        let task = account.deposit(mint, amount, from_addr).await?;
        Ok(job(&account, task))
    }

    pub async fn withdraw(
        &self,
        id: AccountId,
        mint: Token,
        amount: u128,
        destination_addr: &str,
    ) -> Result<()> {
        let job = self
            .withdraw_task_job(id, mint, amount, destination_addr)
            .await;
        self.finish(job).await
    }

    pub async fn withdraw_task_job(
        &self,
        id: AccountId,
        mint: Token,
        amount: u128,
        destination_addr: &str,
    ) -> Result<TaskJob> {
        let account = self.synced(id)?;
        let task = account.withdraw(mint, amount, destination_addr).await?;
        Ok(job(&account, task))
    }

    pub async fn place_order(&self, id: AccountId, order: Order) -> Result<()> {
        let job = self.place_order_task_job(id, order).await;
        self.finish(job).await
    }

    pub async fn place_order_task_job(&self, id: AccountId, order: Order) -> Result<TaskJob> {
        let account = self.synced(id)?;
        let task = account.place_order(order).await?;
        Ok(job(&account, task))
    }

    pub async fn modify_order(&self, id: AccountId, order_id: OrderId, order: Order) -> Result<()> {
        let job = self.modify_order_task_job(id, order_id, order).await;
        self.finish(job).await
    }

    pub async fn modify_order_task_job(
        &self,
        id: AccountId,
        order_id: OrderId,
        order: Order,
    ) -> Result<TaskJob> {
        let account = self.synced(id)?;
        let task = account.modify_order(order_id, order).await?;
        Ok(job(&account, task))
    }

    pub async fn modify_or_place_order(&self, id: AccountId, order: Order) -> Result<()> {
        let job = self.modify_or_place_order_task_job(id, order).await;
        self.finish(job).await
    }

    pub async fn modify_or_place_order_task_job(
        &self,
        id: AccountId,
        order: Order,
    ) -> Result<TaskJob> {
        let account = self.synced(id)?;
        let task = account.modify_or_place_order(order).await?;
        Ok(job(&account, task))
    }

    pub async fn cancel_order(&self, id: AccountId, order_id: OrderId) -> Result<()> {
        let job = self.cancel_order_task_job(id, order_id).await;
        self.finish(job).await
    }

    pub async fn cancel_order_task_job(&self, id: AccountId, order_id: OrderId) -> Result<TaskJob> {
        let account = self.synced(id)?;
        let task = account.cancel_order(order_id).await?;
        Ok(job(&account, task))
    }

    async fn finish(&self, job: Result<TaskJob>) -> Result<()> {
        let (task_id, completion) = job?;
        completion.await?;
        debug!(task_id = %task_id, "task finished");
        if !self.config.task_delay.is_zero() {
            tokio::time::sleep(self.config.task_delay).await;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Streaming
    // -----------------------------------------------------------------------

    /// Listen for wallet updates of one account.
    pub async fn register_account_callback(
        &self,
        id: AccountId,
        callback: Callback,
        priority: i32,
    ) -> Result<CallbackId> {
        self.account(id)?.register_callback(callback, priority).await
    }

    pub async fn register_price_report_callback(
        &self,
        exchange: Exchange,
        base: &Token,
        quote: &Token,
        callback: Callback,
        priority: i32,
    ) -> Result<CallbackId> {
        self.register_shared(&price_report_topic(exchange, base, quote), callback, priority)
            .await
    }

    pub async fn register_task_callback(
        &self,
        task_id: &str,
        callback: Callback,
        priority: i32,
    ) -> Result<CallbackId> {
        self.register_shared(&task_topic(task_id), callback, priority)
            .await
    }

    pub async fn register_order_book_callback(
        &self,
        callback: Callback,
        priority: i32,
    ) -> Result<CallbackId> {
        self.register_shared(ORDER_BOOK_TOPIC, callback, priority).await
    }

    pub async fn register_network_callback(
        &self,
        callback: Callback,
        priority: i32,
    ) -> Result<CallbackId> {
        self.register_shared(NETWORK_TOPIC, callback, priority).await
    }

    pub async fn register_mpc_callback(
        &self,
        callback: Callback,
        priority: i32,
    ) -> Result<CallbackId> {
        self.register_shared(MPC_TOPIC, callback, priority).await
    }

    /// Release a callback from whichever connection holds it.
    pub fn release_callback(&self, id: &CallbackId) -> Result<()> {
        self.ensure_live()?;
        let shared = self.shared_stream.lock().clone();
        if let Some(stream) = shared {
            if stream.release_callback(id).is_ok() {
                return Ok(());
            }
        }
        let released = self
            .accounts
            .iter()
            .any(|account| account.value().release_callback(id).is_ok());
        if released {
            Ok(())
        } else {
            Err(RenegadeError::CallbackNotRegistered(id.to_string()))
        }
    }

    async fn register_shared(
        &self,
        topic: &str,
        callback: Callback,
        priority: i32,
    ) -> Result<CallbackId> {
        let stream = self.shared_stream().await?;
        stream.register_callback(topic, callback, priority, None).await
    }

    async fn shared_stream(&self) -> Result<Arc<TopicMultiplexer>> {
        self.ensure_live()?;
        if let Some(stream) = self.shared_stream.lock().clone() {
            return Ok(stream);
        }
        let stream =
            Arc::new(TopicMultiplexer::connect(self.connector.as_ref(), &self.ws_url).await?);
        let mut slot = self.shared_stream.lock();
        Ok(Arc::clone(slot.get_or_insert(stream)))
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Unregister every account and close the shared connection. Idempotent.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<AccountId> = self.accounts.iter().map(|a| *a.key()).collect();
        for id in ids {
            if let Some((_, account)) = self.accounts.remove(&id) {
                account.teardown();
            }
        }
        if let Some(stream) = self.shared_stream.lock().take() {
            stream.teardown();
        }
        info!("renegade client torn down");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_torn_down() {
            Err(RenegadeError::RelayerTornDown)
        } else {
            Ok(())
        }
    }
}

impl Drop for Renegade {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn job(account: &SyncedAccount, task: TaskId) -> TaskJob {
    let completion = account.account().task_completion(task.clone());
    (task, completion)
}

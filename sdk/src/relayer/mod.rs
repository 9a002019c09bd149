//! # Relayer API
//!
//! The request/response surface of the relayer, behind one async trait so
//! the account layer does not care whether it talks to a real relayer over
//! HTTP ([`http::HttpRelayerClient`]) or to an in-process table
//! ([`memory::InMemoryRelayer`]).
//!
//! Every mutation carries the reblinded wallet and a signature over its
//! shares. Deposits and withdrawals also carry the owner's authorization of
//! the on-chain transfer. The relayer answers with a task id, which the caller awaits on
//! the event stream.
//!
//! ```text
//! GET  /v0/ping
//! GET  /v0/wallet/{id}
//! POST /v0/wallet
//! POST /v0/wallet/{id}/balances/deposit
//! POST /v0/wallet/{id}/balances/{mint}/withdraw
//! POST /v0/wallet/{id}/orders
//! POST /v0/wallet/{id}/orders/{order_id}/update
//! POST /v0/wallet/{id}/orders/{order_id}/cancel
//! ```

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::{ApiWallet, Keychain, Order, OrderId, Token, TransferAuthorization, WalletId};

pub use http::HttpRelayerClient;
pub use memory::InMemoryRelayer;

/// Relayer task handle. `"DONE"` means there is nothing to wait for.
pub type TaskId = String;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWalletRequest {
    pub wallet: ApiWallet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub from_addr: String,
    pub mint: Token,
    /// Little-endian 32-bit limbs.
    pub amount: Vec<u32>,
    pub wallet: ApiWallet,
    pub statement_sig: String,
    pub transfer_auth: TransferAuthorization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub destination_addr: String,
    pub amount: Vec<u32>,
    pub wallet: ApiWallet,
    pub statement_sig: String,
    pub transfer_auth: TransferAuthorization,
}

/// Body of both order placement and order update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order: Order,
    pub wallet: ApiWallet,
    pub statement_sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub wallet: ApiWallet,
    pub statement_sig: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetWalletResponse {
    pub wallet: ApiWallet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub timestamp: u64,
}

// ---------------------------------------------------------------------------
// RelayerClient
// ---------------------------------------------------------------------------

/// Operations the SDK needs from a relayer.
///
/// Authenticated calls take the keychain whose root key signs the request.
/// Transport failures map to `RelayerUnreachable`, non-success statuses to
/// `RelayerError`. No method retries.
#[async_trait]
pub trait RelayerClient: Send + Sync {
    /// Relayer clock, in milliseconds.
    async fn ping(&self) -> Result<u64>;

    /// The relayer's current copy of a wallet, if it manages one with this id.
    async fn get_wallet(&self, id: WalletId, keychain: &Keychain) -> Result<Option<ApiWallet>>;

    /// Look the wallet up in ledger state.
    ///
    /// A wallet can exist on chain while the relayer has lost track of it.
    async fn find_wallet_on_chain(&self, keychain: &Keychain) -> Result<Option<ApiWallet>>;

    async fn create_wallet(&self, wallet: &ApiWallet) -> Result<TaskId>;

    async fn deposit(
        &self,
        id: WalletId,
        request: &DepositRequest,
        keychain: &Keychain,
    ) -> Result<TaskId>;

    async fn withdraw(
        &self,
        id: WalletId,
        mint: &Token,
        request: &WithdrawRequest,
        keychain: &Keychain,
    ) -> Result<TaskId>;

    async fn place_order(
        &self,
        id: WalletId,
        request: &OrderRequest,
        keychain: &Keychain,
    ) -> Result<TaskId>;

    async fn update_order(
        &self,
        id: WalletId,
        order_id: OrderId,
        request: &OrderRequest,
        keychain: &Keychain,
    ) -> Result<TaskId>;

    async fn cancel_order(
        &self,
        id: WalletId,
        order_id: OrderId,
        request: &CancelOrderRequest,
        keychain: &Keychain,
    ) -> Result<TaskId>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ExternalTransfer, Wallet};

    #[test]
    fn deposit_body_shape() {
        let keychain = Keychain::from_seed(b"relayer-body").unwrap();
        let mint = Token::new([7; 20]);
        let transfer_auth =
            ExternalTransfer::deposit("0xabc", mint, 1000).authorize_with(&keychain, 3, 9_000);
        let wallet = Wallet::empty(keychain).unwrap();
        let body = DepositRequest {
            from_addr: "0xabc".into(),
            mint,
            amount: crate::crypto::field::amount_to_limbs(1000),
            wallet: wallet.to_api(),
            statement_sig: wallet.sign_update(),
            transfer_auth,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["amount"], serde_json::json!([1000, 0, 0, 0]));
        assert_eq!(value["from_addr"], "0xabc");
        assert_eq!(value["transfer_auth"]["nonce"], 3);
        assert_eq!(value["transfer_auth"]["deadline_ms"], 9_000);
        assert!(value["wallet"]["key_chain"]["private_keys"]
            .get("sk_root")
            .is_none());
    }

    #[test]
    fn task_response_parses() {
        let parsed: TaskResponse = serde_json::from_str(r#"{"task_id":"abc"}"#).unwrap();
        assert_eq!(parsed.task_id, "abc");
    }
}

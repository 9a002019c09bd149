//! Wallet state: the typed model of balances, orders, fees and keys, and the
//! secret-sharing engine that turns it into on-chain shares.

pub mod amount;
pub mod balance;
pub mod fee;
pub mod keychain;
pub mod order;
pub mod shares;
pub mod token;
pub mod transfer;
pub mod wallet;

pub use balance::{Balance, BalanceId};
pub use fee::{Fee, FeeId};
pub use keychain::{AccountId, Keychain, KeychainJson};
pub use order::{Order, OrderId, OrderKind, OrderSide};
pub use shares::{Blinders, WalletShares};
pub use token::{Token, TokenInfo, TokenRegistry};
pub use transfer::{ExternalTransfer, TransferAuthorization, TransferDirection};
pub use wallet::{ApiWallet, Wallet, WalletDraft, WalletId};

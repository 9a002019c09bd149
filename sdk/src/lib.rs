// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Renegade SDK
//!
//! A client for a Renegade relayer. The relayer matches orders inside a
//! wallet that only ever appears on-chain as a blinded, additively shared
//! commitment. This crate keeps a private copy of that wallet in sync and
//! produces the shares for every update.
//!
//! Two pieces carry the weight:
//!
//! - **Shares.** A wallet is packed into 54 field elements and split into a
//!   private half and a blinded public half. All randomness comes from hash
//!   chains seeded by the root key, so nothing random is ever persisted and
//!   every update is still unlinkable.
//! - **Sync.** Each account bootstraps its wallet from the relayer, the
//!   ledger, or by creating it, then follows pushed updates over a
//!   multiplexed event connection.
//!
//! ## Modules
//!
//! - **crypto**: field hashing, hash chains, ECDSA signing and expiring
//!   request signatures.
//! - **state**: tokens, balances, orders, fees, keychain, wallet, shares.
//! - **ws**: topics, frames, and the topic multiplexer.
//! - **relayer**: the relayer API, over HTTP or in memory.
//! - **account**: the per-account sync state machine and mutations.
//! - **renegade**: the multi-account entry point.
//! - **config**: wallet dimensions, domains, and relayer configuration.
//!
//! ## Example
//!
//! ```no_run
//! # async fn run() -> renegade_sdk::Result<()> {
//! use std::sync::Arc;
//! use renegade_sdk::{InMemoryRelayer, Keychain, Renegade, RenegadeConfig, Token};
//!
//! let relayer = InMemoryRelayer::new();
//! let renegade = Renegade::with_relayer(
//!     RenegadeConfig::new("localhost"),
//!     Arc::new(relayer.clone()),
//!     Arc::new(relayer),
//! )?;
//!
//! let id = renegade.register_account(Keychain::from_seed(b"seed")?)?;
//! renegade.initialize_account(id).await?;
//! renegade.deposit(id, Token::from_hex("0x01")?, 1000, "0xsender").await?;
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod config;
pub mod crypto;
pub mod error;
pub mod relayer;
pub mod renegade;
pub mod state;
pub mod ws;

pub use account::{Account, SyncOrigin, SyncState, SyncedAccount, TaskCompletion};
pub use config::RenegadeConfig;
pub use error::{RenegadeError, Result};
pub use relayer::{HttpRelayerClient, InMemoryRelayer, RelayerClient, TaskId};
pub use renegade::{Renegade, TaskJob};
pub use state::{
    AccountId, Balance, Fee, Keychain, Order, OrderKind, OrderSide, Token, TokenRegistry, Wallet,
};
pub use ws::{Callback, CallbackId, Exchange, TopicMultiplexer};

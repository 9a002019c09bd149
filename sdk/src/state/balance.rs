//! Wallet balances.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::token::Token;
use crate::config::SHARES_PER_BALANCE;
use crate::crypto::{sha256, Scalar};

/// Content-derived balance identifier.
pub type BalanceId = Uuid;

/// An amount of one token held in a wallet.
///
/// A zero amount means "absent": getters filter it out, but the slot stays
/// allocated in the packed wallet until something else reuses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub mint: Token,
    #[serde(with = "super::amount::decimal")]
    pub amount: u128,
}

impl Balance {
    pub fn new(mint: Token, amount: u128) -> Self {
        Self { mint, amount }
    }

    /// Identifier derived from the mint, so it survives amount changes.
    pub fn id(&self) -> BalanceId {
        let digest = sha256(self.mint.address());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[16..]);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// `[mint, amount]`
    pub fn pack(&self) -> [Scalar; SHARES_PER_BALANCE] {
        [self.mint.to_scalar(), Scalar::from(self.amount)]
    }
}

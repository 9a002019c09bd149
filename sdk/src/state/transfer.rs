//! External transfers.
//!
//! Deposits and withdrawals move tokens between the wallet and an on-chain
//! address. Besides the statement signature over the new shares, the
//! relayer needs the owner's authorization of the transfer itself: a root
//! key signature over
//!
//! ```text
//! domain ‖ len(account_addr) ‖ account_addr ‖ mint ‖ amount_be
//!        ‖ direction ‖ nonce_le ‖ deadline_le
//! ```
//!
//! The nonce makes each authorization single-use; the deadline bounds how
//! long an unused one stays valid.

use k256::ecdsa::VerifyingKey;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::keychain::Keychain;
use super::token::Token;
use crate::config::{TRANSFER_AUTH_DOMAIN, TRANSFER_VALIDITY_WINDOW_MS};
use crate::crypto::signing::verify_message;
use crate::error::{RenegadeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    Deposit,
    Withdrawal,
}

impl TransferDirection {
    fn tag(self) -> u8 {
        match self {
            TransferDirection::Deposit => 0,
            TransferDirection::Withdrawal => 1,
        }
    }
}

/// One on-chain leg of a deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTransfer {
    /// Source of a deposit, destination of a withdrawal.
    pub account_addr: String,
    pub mint: Token,
    #[serde(with = "super::amount::decimal")]
    pub amount: u128,
    pub direction: TransferDirection,
}

/// Root-key signature over an [`ExternalTransfer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAuthorization {
    pub nonce: u64,
    /// ms since epoch.
    pub deadline_ms: u64,
    /// Hex `r ‖ s`.
    pub signature: String,
}

impl ExternalTransfer {
    pub fn deposit(from_addr: &str, mint: Token, amount: u128) -> Self {
        Self {
            account_addr: from_addr.to_string(),
            mint,
            amount,
            direction: TransferDirection::Deposit,
        }
    }

    pub fn withdrawal(destination_addr: &str, mint: Token, amount: u128) -> Self {
        Self {
            account_addr: destination_addr.to_string(),
            mint,
            amount,
            direction: TransferDirection::Withdrawal,
        }
    }

    /// Bytes covered by an authorization with this nonce and deadline.
    pub fn authorization_message(&self, nonce: u64, deadline_ms: u64) -> Vec<u8> {
        let addr = self.account_addr.as_bytes();
        let mut msg = Vec::with_capacity(TRANSFER_AUTH_DOMAIN.len() + addr.len() + 61);
        msg.extend_from_slice(TRANSFER_AUTH_DOMAIN);
        msg.extend_from_slice(&(addr.len() as u32).to_le_bytes());
        msg.extend_from_slice(addr);
        msg.extend_from_slice(self.mint.address());
        msg.extend_from_slice(&self.amount.to_be_bytes());
        msg.push(self.direction.tag());
        msg.extend_from_slice(&nonce.to_le_bytes());
        msg.extend_from_slice(&deadline_ms.to_le_bytes());
        msg
    }

    /// Authorize with a fresh random nonce, valid for
    /// `TRANSFER_VALIDITY_WINDOW_MS` after `now_ms`.
    pub fn authorize(&self, keychain: &Keychain, now_ms: u64) -> TransferAuthorization {
        self.authorize_with(keychain, OsRng.next_u64(), now_ms + TRANSFER_VALIDITY_WINDOW_MS)
    }

    pub fn authorize_with(
        &self,
        keychain: &Keychain,
        nonce: u64,
        deadline_ms: u64,
    ) -> TransferAuthorization {
        let sig = keychain.sign(&self.authorization_message(nonce, deadline_ms));
        TransferAuthorization {
            nonce,
            deadline_ms,
            signature: hex::encode(sig),
        }
    }

    /// Check `auth` against the owner's root key. Nonce reuse is the
    /// verifier's concern.
    pub fn verify(
        &self,
        key: &VerifyingKey,
        auth: &TransferAuthorization,
        now_ms: u64,
    ) -> Result<()> {
        if now_ms > auth.deadline_ms {
            return Err(RenegadeError::Crypto(
                "transfer authorization expired".to_string(),
            ));
        }
        let sig = hex::decode(&auth.signature)
            .map_err(|e| RenegadeError::Crypto(format!("bad transfer signature: {e}")))?;
        verify_message(
            key,
            &self.authorization_message(auth.nonce, auth.deadline_ms),
            &sig,
        )
    }
}

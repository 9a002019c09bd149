//! # Wallet
//!
//! The privacy-preserving unit managed by the relayer. A [`Wallet`] is a
//! value object: balances, orders, fees and keychain, plus a blinder and the
//! two share vectors derived from them. Shares are never set by hand. They
//! come either from genesis derivation ([`Wallet::new`]) or from reblinding
//! the previous wallet.
//!
//! ## Editing
//!
//! Edits never touch an existing wallet. Each edit helper returns a
//! [`WalletDraft`]: the new contents together with the randomness position of
//! the wallet it came from. The only thing a draft can do is
//! [`WalletDraft::reblind`], which derives fresh shares for the new contents
//! from the next chain position. This makes "apply, then reblind" the only
//! path to an updated wallet, so two on-chain updates never share a blinder.
//!
//! ## Packing
//!
//! `balances ‖ orders ‖ fees ‖ keychain ‖ blinder`, each section zero-padded
//! to its maximum. The order is part of the verifier's wire contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::balance::{Balance, BalanceId};
use super::fee::{Fee, FeeId};
use super::keychain::{Keychain, KeychainJson};
use super::order::{Order, OrderId};
use super::shares::{self, Blinders, WalletShares};
use super::token::Token;
use crate::config::{
    MAX_BALANCES, MAX_FEES, MAX_ORDERS, SHARES_PER_BALANCE, SHARES_PER_FEE, SHARES_PER_ORDER,
    SHARES_PER_WALLET,
};
use crate::crypto::field::{scalar_from_limbs, scalar_to_limbs};
use crate::crypto::Scalar;
use crate::error::{RenegadeError, Result};

/// Wallet identifier. Equal to the owning account's id.
pub type WalletId = Uuid;

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    id: WalletId,
    balances: Vec<Balance>,
    orders: Vec<Order>,
    fees: Vec<Fee>,
    keychain: Keychain,
    blinders: Blinders,
    shares: WalletShares,
    update_locked: bool,
}

impl Wallet {
    /// A wallet with genesis randomness derived from the keychain.
    pub fn new(
        balances: Vec<Balance>,
        orders: Vec<Order>,
        fees: Vec<Fee>,
        keychain: Keychain,
    ) -> Result<Self> {
        check_capacity(&balances, &orders, &fees)?;
        let blinders = shares::derive_blinders(&keychain);
        let packed = pack(&balances, &orders, &fees, &keychain, blinders.blinder);
        let shares = shares::derive_shares(&packed, &blinders, &keychain)?;
        Ok(Self {
            id: keychain.account_id(),
            balances,
            orders,
            fees,
            keychain,
            blinders,
            shares,
            update_locked: false,
        })
    }

    /// An empty wallet for `keychain`.
    pub fn empty(keychain: Keychain) -> Result<Self> {
        Self::new(Vec::new(), Vec::new(), Vec::new(), keychain)
    }

    // -- Accessors ----------------------------------------------------------

    pub fn id(&self) -> WalletId {
        self.id
    }

    pub fn keychain(&self) -> &Keychain {
        &self.keychain
    }

    pub fn blinder(&self) -> Scalar {
        self.blinders.blinder
    }

    pub fn private_blinder(&self) -> Scalar {
        self.blinders.private_share
    }

    pub fn public_blinder(&self) -> Scalar {
        self.blinders.public_share
    }

    pub fn private_shares(&self) -> &[Scalar] {
        &self.shares.private
    }

    pub fn blinded_public_shares(&self) -> &[Scalar] {
        &self.shares.blinded_public
    }

    pub fn shares(&self) -> &WalletShares {
        &self.shares
    }

    pub fn update_locked(&self) -> bool {
        self.update_locked
    }

    /// Every balance slot in use, including drained (zero) ones.
    pub fn raw_balances(&self) -> &[Balance] {
        &self.balances
    }

    pub fn raw_orders(&self) -> &[Order] {
        &self.orders
    }

    /// Non-zero balances keyed by id.
    pub fn balances(&self) -> BTreeMap<BalanceId, Balance> {
        self.balances
            .iter()
            .filter(|b| !b.is_zero())
            .map(|b| (b.id(), b.clone()))
            .collect()
    }

    /// Non-zero orders keyed by id.
    pub fn orders(&self) -> BTreeMap<OrderId, Order> {
        self.orders
            .iter()
            .filter(|o| !o.is_zero())
            .map(|o| (o.id, o.clone()))
            .collect()
    }

    pub fn fees(&self) -> BTreeMap<FeeId, Fee> {
        self.fees.iter().map(|f| (f.id, f.clone())).collect()
    }

    /// Held amount of `mint`, zero if absent.
    pub fn balance_of(&self, mint: &Token) -> u128 {
        self.balances
            .iter()
            .find(|b| &b.mint == mint)
            .map_or(0, |b| b.amount)
    }

    /// The packed wallet (length `SHARES_PER_WALLET`).
    pub fn pack(&self) -> Vec<Scalar> {
        pack(
            &self.balances,
            &self.orders,
            &self.fees,
            &self.keychain,
            self.blinders.blinder,
        )
    }

    /// Hex signature over this wallet's shares, attached to every update.
    pub fn sign_update(&self) -> String {
        hex::encode(self.keychain.sign(&shares::statement_message(&self.shares)))
    }

    // -- Editing ------------------------------------------------------------

    /// Same contents, next randomness.
    pub fn reblind(&self) -> Result<Wallet> {
        self.draft().reblind()
    }

    /// Credit `amount` of `mint`.
    ///
    /// An existing balance for the mint is incremented. Otherwise the
    /// balance is appended while there is room, or written over a drained
    /// slot.
    pub fn add_balance(&self, mint: Token, amount: u128) -> Result<WalletDraft> {
        let mut draft = self.draft();
        if let Some(existing) = draft.balances.iter_mut().find(|b| b.mint == mint) {
            existing.amount = existing.amount.checked_add(amount).ok_or_else(|| {
                RenegadeError::ValueOutOfRange(format!("balance of {mint} overflows u128"))
            })?;
        } else if draft.balances.len() < MAX_BALANCES {
            draft.balances.push(Balance::new(mint, amount));
        } else if let Some(slot) = draft.balances.iter_mut().find(|b| b.is_zero()) {
            *slot = Balance::new(mint, amount);
        } else {
            return Err(RenegadeError::BalancesFull);
        }
        Ok(draft)
    }

    /// Debit `amount` of `mint`. A drained balance keeps its slot.
    pub fn remove_balance(&self, mint: Token, amount: u128) -> Result<WalletDraft> {
        let mut draft = self.draft();
        let balance = draft
            .balances
            .iter_mut()
            .find(|b| b.mint == mint)
            .ok_or_else(|| RenegadeError::NoBalanceToWithdraw(mint.to_hex()))?;
        if amount > balance.amount {
            return Err(RenegadeError::InsufficientBalance {
                requested: amount,
                available: balance.amount,
            });
        }
        balance.amount -= amount;
        Ok(draft)
    }

    /// Add an order, reusing a zero-amount slot once the wallet is full.
    pub fn add_order(&self, order: Order) -> Result<WalletDraft> {
        let slot = self.order_slot_for_new()?;
        let mut draft = self.draft();
        match slot {
            None => draft.orders.push(order),
            Some(zero) => {
                if let Some(existing) = draft.orders.iter_mut().find(|o| o.id == zero) {
                    *existing = order;
                }
            }
        }
        Ok(draft)
    }

    /// Replace order `id`, keeping its id.
    pub fn modify_order(&self, id: OrderId, order: Order) -> Result<WalletDraft> {
        let mut draft = self.draft();
        let slot = draft
            .orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| RenegadeError::OrderNotFound(id.to_string()))?;
        *slot = order.with_id(id);
        Ok(draft)
    }

    /// Remove order `id`. Its packed slot becomes padding.
    pub fn cancel_order(&self, id: OrderId) -> Result<WalletDraft> {
        let mut draft = self.draft();
        let before = draft.orders.len();
        draft.orders.retain(|o| o.id != id);
        if draft.orders.len() == before {
            return Err(RenegadeError::OrderNotFound(id.to_string()));
        }
        Ok(draft)
    }

    /// Pick how to place `order`: append, overwrite a zero order, or fail.
    pub fn order_slot_for_new(&self) -> Result<Option<OrderId>> {
        if self.orders.len() < MAX_ORDERS {
            Ok(None)
        } else if let Some(zero) = self.orders.iter().find(|o| o.is_zero()) {
            Ok(Some(zero.id))
        } else {
            Err(RenegadeError::MaxOrders)
        }
    }

    fn draft(&self) -> WalletDraft {
        WalletDraft {
            id: self.id,
            balances: self.balances.clone(),
            orders: self.orders.clone(),
            fees: self.fees.clone(),
            keychain: self.keychain.clone(),
            previous_private_shares: self.shares.private.clone(),
            update_locked: self.update_locked,
        }
    }

    // -- Wire form ----------------------------------------------------------

    pub fn to_api(&self) -> ApiWallet {
        ApiWallet {
            id: self.id,
            balances: self.balances.clone(),
            orders: self.orders.clone(),
            fees: self.fees.clone(),
            key_chain: self.keychain.to_wire(),
            blinder: scalar_to_limbs(&self.blinders.blinder),
            blinded_public_shares: self.shares.blinded_public.iter().map(scalar_to_limbs).collect(),
            private_shares: self.shares.private.iter().map(scalar_to_limbs).collect(),
            update_locked: self.update_locked,
        }
    }

    /// Adopt a wallet received from the relayer.
    ///
    /// The wire keychain never carries the root secret, so the caller
    /// supplies its own keychain, which must match the wallet's public keys.
    /// The shares must reconstruct the stated contents.
    pub fn from_api(api: &ApiWallet, keychain: &Keychain) -> Result<Self> {
        if !keychain.matches_public(&api.key_chain) {
            return Err(RenegadeError::InvalidWallet(format!(
                "wallet {} belongs to a different keychain",
                api.id
            )));
        }
        check_capacity(&api.balances, &api.orders, &api.fees)
            .map_err(|e| RenegadeError::InvalidWallet(e.to_string()))?;

        let parse = |limbs: &Vec<Vec<u32>>| -> Result<Vec<Scalar>> {
            limbs.iter().map(|l| scalar_from_limbs(l)).collect()
        };
        let shares = WalletShares {
            private: parse(&api.private_shares)?,
            blinded_public: parse(&api.blinded_public_shares)?,
        };
        if shares.private.len() != SHARES_PER_WALLET
            || shares.blinded_public.len() != SHARES_PER_WALLET
        {
            return Err(RenegadeError::InvalidWallet(format!(
                "expected {SHARES_PER_WALLET} shares, got {} private / {} public",
                shares.private.len(),
                shares.blinded_public.len()
            )));
        }

        let blinders = Blinders::from_shares(&shares.private, &shares.blinded_public)?;
        if scalar_from_limbs(&api.blinder)? != blinders.blinder {
            return Err(RenegadeError::InvalidWallet(
                "blinder does not match its shares".to_string(),
            ));
        }

        let packed = pack(
            &api.balances,
            &api.orders,
            &api.fees,
            keychain,
            blinders.blinder,
        );
        if shares::reconstruct(&shares)? != packed {
            return Err(RenegadeError::InvalidWallet(
                "shares do not reconstruct the wallet contents".to_string(),
            ));
        }

        Ok(Self {
            id: api.id,
            balances: api.balances.clone(),
            orders: api.orders.clone(),
            fees: api.fees.clone(),
            keychain: keychain.clone(),
            blinders,
            shares,
            update_locked: api.update_locked,
        })
    }
}

// ---------------------------------------------------------------------------
// WalletDraft
// ---------------------------------------------------------------------------

/// Edited wallet contents awaiting fresh randomness.
#[derive(Debug, Clone)]
pub struct WalletDraft {
    id: WalletId,
    balances: Vec<Balance>,
    orders: Vec<Order>,
    fees: Vec<Fee>,
    keychain: Keychain,
    previous_private_shares: Vec<Scalar>,
    update_locked: bool,
}

impl WalletDraft {
    /// Derive the next blinder and shares and produce the updated wallet.
    pub fn reblind(self) -> Result<Wallet> {
        check_capacity(&self.balances, &self.orders, &self.fees)?;
        let (blinders, secret_shares) = shares::next_randomness(&self.previous_private_shares)?;
        let packed = pack(
            &self.balances,
            &self.orders,
            &self.fees,
            &self.keychain,
            blinders.blinder,
        );
        let shares = shares::create_shares_with_randomness(
            &packed,
            blinders.blinder,
            blinders.private_share,
            &secret_shares,
        )?;
        Ok(Wallet {
            id: self.id,
            balances: self.balances,
            orders: self.orders,
            fees: self.fees,
            keychain: self.keychain,
            blinders,
            shares,
            update_locked: self.update_locked,
        })
    }
}

// ---------------------------------------------------------------------------
// Packing
// ---------------------------------------------------------------------------

fn pack(
    balances: &[Balance],
    orders: &[Order],
    fees: &[Fee],
    keychain: &Keychain,
    blinder: Scalar,
) -> Vec<Scalar> {
    let zero = Scalar::from(0u64);
    let mut packed = Vec::with_capacity(SHARES_PER_WALLET);

    for b in balances {
        packed.extend(b.pack());
    }
    packed.resize(MAX_BALANCES * SHARES_PER_BALANCE, zero);

    for o in orders {
        packed.extend(o.pack());
    }
    packed.resize(packed.len() + (MAX_ORDERS - orders.len()) * SHARES_PER_ORDER, zero);

    for f in fees {
        packed.extend(f.pack());
    }
    packed.resize(packed.len() + (MAX_FEES - fees.len()) * SHARES_PER_FEE, zero);

    packed.extend(keychain.pack());
    packed.push(blinder);
    packed
}

fn check_capacity(balances: &[Balance], orders: &[Order], fees: &[Fee]) -> Result<()> {
    if balances.len() > MAX_BALANCES {
        return Err(RenegadeError::BalancesFull);
    }
    if orders.len() > MAX_ORDERS {
        return Err(RenegadeError::MaxOrders);
    }
    if fees.len() > MAX_FEES {
        return Err(RenegadeError::BadParameters(format!(
            "at most {MAX_FEES} fees, got {}",
            fees.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ApiWallet
// ---------------------------------------------------------------------------

/// JSON form exchanged with the relayer. Scalars travel as little-endian
/// 32-bit limbs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiWallet {
    pub id: WalletId,
    pub balances: Vec<Balance>,
    pub orders: Vec<Order>,
    pub fees: Vec<Fee>,
    pub key_chain: KeychainJson,
    pub blinder: Vec<u32>,
    pub blinded_public_shares: Vec<Vec<u32>>,
    pub private_shares: Vec<Vec<u32>>,
    #[serde(default)]
    pub update_locked: bool,
}

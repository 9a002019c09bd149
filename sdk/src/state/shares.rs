//! # Secret Sharing Engine
//!
//! A packed wallet `w` (54 scalars) is split into two additive shares:
//!
//! ```text
//! private[i]        = s[i]                       s = share stream
//! blinded_public[i] = (w[i] - s[i]) + blinder
//! ```
//!
//! The private half stays with the client; the blinded public half is what
//! lands on-chain. Anyone holding both (and hence the blinder) recovers
//! `w[i] = blinded_public[i] - blinder + private[i]`.
//!
//! The last slot holds the blinder itself and is treated specially so the
//! blinder is never blinded by itself:
//!
//! ```text
//! private[N-1]        = private_blinder_share
//! blinded_public[N-1] = blinder - private_blinder_share
//! ```
//!
//! ## Randomness
//!
//! Both the blinder pair and the share stream come from hash chains, so no
//! random state is ever persisted:
//!
//! - **Genesis.** `(blinder, private_blinder_share) = chain(H("blinder-seed-domain" ‖ sk_root), 2)`
//!   and `s = chain(H("share-stream-domain" ‖ sk_root), N)`.
//! - **Reblind.** The next blinder pair is `chain(private[N-1], 2)` and the next
//!   share stream is `chain(private[N-2], N)`. Since `private[N-1]` is the last
//!   consumed element of the blinder chain, update `k` uses positions
//!   `2k, 2k+1` of that chain. The share stream likewise resumes at the one
//!   position the previous update discarded (the blinder slot).
//!
//! Walking forward from the current shares means the chain position lives in
//! the wallet itself. A client that crashes mid-sequence simply re-fetches
//! the canonical wallet and continues; there is no counter to lose.

use super::keychain::Keychain;
use crate::config::SHARES_PER_WALLET;
use crate::crypto::field::{hash_scalars, scalar_to_bytes_le};
use crate::crypto::hash_chain::evaluate;
use crate::crypto::Scalar;
use crate::error::{RenegadeError, Result};

/// The blinder and its additive split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blinders {
    pub blinder: Scalar,
    pub private_share: Scalar,
    pub public_share: Scalar,
}

impl Blinders {
    /// First two outputs of the chain seeded with `seed`.
    pub fn from_chain_seed(seed: Scalar) -> Self {
        let chain = evaluate(seed, 2);
        let (blinder, private_share) = (chain[0], chain[1]);
        Self {
            blinder,
            private_share,
            public_share: blinder - private_share,
        }
    }

    /// Recover the blinder from the last slot of each share vector.
    pub fn from_shares(private: &[Scalar], blinded_public: &[Scalar]) -> Result<Self> {
        let (Some(private_share), Some(public_share)) = (private.last(), blinded_public.last())
        else {
            return Err(RenegadeError::InvalidWallet(
                "empty share vectors".to_string(),
            ));
        };
        Ok(Self {
            blinder: *private_share + *public_share,
            private_share: *private_share,
            public_share: *public_share,
        })
    }
}

/// The two halves of a shared wallet. Both always have length
/// `SHARES_PER_WALLET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletShares {
    pub private: Vec<Scalar>,
    pub blinded_public: Vec<Scalar>,
}

/// Genesis blinders for a keychain.
pub fn derive_blinders(keychain: &Keychain) -> Blinders {
    Blinders::from_chain_seed(keychain.blinder_seed())
}

/// Genesis shares for a packed wallet.
pub fn derive_shares(
    packed: &[Scalar],
    blinders: &Blinders,
    keychain: &Keychain,
) -> Result<WalletShares> {
    let secret_shares = evaluate(keychain.share_stream_seed(), SHARES_PER_WALLET);
    create_shares_with_randomness(
        packed,
        blinders.blinder,
        blinders.private_share,
        &secret_shares,
    )
}

/// Randomness for the update following the one that produced
/// `private_shares`: the next blinder pair and the next share stream.
pub fn next_randomness(private_shares: &[Scalar]) -> Result<(Blinders, Vec<Scalar>)> {
    check_width("private shares", private_shares.len())?;
    let n = SHARES_PER_WALLET;
    let blinders = Blinders::from_chain_seed(private_shares[n - 1]);
    let secret_shares = evaluate(private_shares[n - 2], n);
    Ok((blinders, secret_shares))
}

/// Split `packed` using explicit randomness.
pub fn create_shares_with_randomness(
    packed: &[Scalar],
    blinder: Scalar,
    private_blinder_share: Scalar,
    secret_shares: &[Scalar],
) -> Result<WalletShares> {
    check_width("packed wallet", packed.len())?;
    check_width("secret shares", secret_shares.len())?;

    let mut private = Vec::with_capacity(SHARES_PER_WALLET);
    let mut blinded_public = Vec::with_capacity(SHARES_PER_WALLET);
    for (value, secret) in packed.iter().zip(secret_shares) {
        private.push(*secret);
        blinded_public.push(*value - *secret + blinder);
    }

    let last = SHARES_PER_WALLET - 1;
    private[last] = private_blinder_share;
    blinded_public[last] = blinder - private_blinder_share;

    check_width("derived private shares", private.len())?;
    check_width("derived public shares", blinded_public.len())?;
    Ok(WalletShares {
        private,
        blinded_public,
    })
}

/// Recover the packed wallet from its shares. The blinder slot reconstructs
/// to the blinder itself.
pub fn reconstruct(shares: &WalletShares) -> Result<Vec<Scalar>> {
    check_width("private shares", shares.private.len())?;
    check_width("public shares", shares.blinded_public.len())?;
    let blinders = Blinders::from_shares(&shares.private, &shares.blinded_public)?;
    let last = SHARES_PER_WALLET - 1;
    Ok(shares
        .blinded_public
        .iter()
        .zip(&shares.private)
        .enumerate()
        .map(|(i, (public, private))| {
            if i == last {
                *public + *private
            } else {
                *public - blinders.blinder + *private
            }
        })
        .collect())
}

/// Bytes covered by a wallet-update statement signature:
/// `commitment(private) ‖ blinded_public[0] ‖ … ‖ blinded_public[N-1]`.
pub fn statement_message(shares: &WalletShares) -> Vec<u8> {
    let commitment = hash_scalars(&shares.private);
    let mut message = scalar_to_bytes_le(&commitment);
    for share in &shares.blinded_public {
        message.extend_from_slice(&scalar_to_bytes_le(share));
    }
    message
}

fn check_width(what: &str, len: usize) -> Result<()> {
    if len == SHARES_PER_WALLET {
        Ok(())
    } else {
        Err(RenegadeError::Invariant(format!(
            "{what}: expected {SHARES_PER_WALLET} elements, got {len}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed() -> Vec<Scalar> {
        (0..SHARES_PER_WALLET as u64).map(|i| Scalar::from(i * 3 + 1)).collect()
    }

    #[test]
    fn reconstruction_law_holds() {
        let keychain = Keychain::from_seed(b"shares").unwrap();
        let blinders = derive_blinders(&keychain);
        let mut wallet = packed();
        *wallet.last_mut().unwrap() = blinders.blinder;
        let shares = derive_shares(&wallet, &blinders, &keychain).unwrap();
        assert_eq!(reconstruct(&shares).unwrap(), wallet);
    }

    #[test]
    fn blinder_slot_is_not_double_blinded() {
        let keychain = Keychain::from_seed(b"shares").unwrap();
        let blinders = derive_blinders(&keychain);
        let shares = derive_shares(&packed(), &blinders, &keychain).unwrap();
        let last = SHARES_PER_WALLET - 1;
        assert_eq!(shares.private[last], blinders.private_share);
        assert_eq!(shares.blinded_public[last], blinders.public_share);
        let recovered = Blinders::from_shares(&shares.private, &shares.blinded_public).unwrap();
        assert_eq!(recovered, blinders);
    }

    #[test]
    fn derivation_is_deterministic() {
        let keychain = Keychain::from_seed(b"shares").unwrap();
        let blinders = derive_blinders(&keychain);
        let a = derive_shares(&packed(), &blinders, &keychain).unwrap();
        let b = derive_shares(&packed(), &blinders, &keychain).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_width_is_an_invariant_error() {
        let err = create_shares_with_randomness(
            &packed()[..10],
            Scalar::from(1u64),
            Scalar::from(2u64),
            &packed(),
        )
        .unwrap_err();
        assert!(matches!(err, RenegadeError::Invariant(_)));
        assert!(matches!(
            next_randomness(&[Scalar::from(1u64); 3]),
            Err(RenegadeError::Invariant(_))
        ));
    }

    #[test]
    fn next_randomness_continues_the_blinder_chain() {
        let keychain = Keychain::from_seed(b"chain").unwrap();
        let seed = keychain.blinder_seed();
        let genesis = derive_blinders(&keychain);
        let shares = derive_shares(&packed(), &genesis, &keychain).unwrap();

        let (next, _) = next_randomness(&shares.private).unwrap();
        let chain = evaluate(seed, 4);
        assert_eq!(next.blinder, chain[2]);
        assert_eq!(next.private_share, chain[3]);
    }

    #[test]
    fn statement_message_binds_both_halves() {
        let keychain = Keychain::from_seed(b"stmt").unwrap();
        let blinders = derive_blinders(&keychain);
        let shares = derive_shares(&packed(), &blinders, &keychain).unwrap();
        let mut tampered = shares.clone();
        tampered.private[0] += Scalar::from(1u64);
        assert_ne!(statement_message(&shares), statement_message(&tampered));
        assert_eq!(statement_message(&shares).len(), 32 * (SHARES_PER_WALLET + 1));
    }
}

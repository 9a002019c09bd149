//! # Keychain
//!
//! A wallet is controlled by a two-level key hierarchy rooted in a single
//! 32-byte secp256k1 secret:
//!
//! ```text
//! sk_root ──sign("Unlock your Renegade match key…")──> SHA-256 ──> sk_match
//!    │                                                             │
//!    └─> pk_root (authenticates requests & updates)      pk_match = hash(sk_match)
//! ```
//!
//! Everything below `sk_root` is a pure function of it. That is what makes an
//! account recoverable: re-register the same root key and you get the same
//! account id, the same match key, and the same share/blinder seeds.
//!
//! `sk_root` never leaves the client. The wire form sent to the relayer only
//! carries the public keys and `sk_match` (the relayer needs the latter to
//! match orders on our behalf).

use std::fmt;
use std::path::Path;

use ark_ff::PrimeField;
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{
    BLINDER_SEED_DOMAIN, MATCH_KEY_MESSAGE, ROOT_KEY_DOMAIN, SHARES_PER_KEYCHAIN,
    SHARE_STREAM_DOMAIN,
};
use crate::crypto::field::{hash_scalar, hash_with_domain, scalar_from_hex, scalar_to_hex};
use crate::crypto::signing::{self, HttpAuth};
use crate::crypto::{sha256, Scalar};
use crate::error::{RenegadeError, Result};

/// How many counter values `from_seed` tries before giving up. A SHA-256
/// digest is a valid secp256k1 scalar with probability ~1 - 2^-128, so the
/// first attempt essentially always succeeds.
const MAX_SEED_ATTEMPTS: u32 = 16;

/// Identifier of an account (and of the wallet it controls).
pub type AccountId = Uuid;

// ---------------------------------------------------------------------------
// Keychain
// ---------------------------------------------------------------------------

/// The full key hierarchy for one wallet.
#[derive(Clone)]
pub struct Keychain {
    sk_root: SigningKey,
    sk_match: Scalar,
    pk_match: Scalar,
}

impl Keychain {
    /// Fresh keychain from the OS RNG.
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Deterministic keychain from arbitrary seed bytes.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        for counter in 0..MAX_SEED_ATTEMPTS {
            let mut material = Vec::with_capacity(ROOT_KEY_DOMAIN.len() + seed.len() + 4);
            material.extend_from_slice(ROOT_KEY_DOMAIN);
            material.extend_from_slice(seed);
            material.extend_from_slice(&counter.to_le_bytes());
            if let Ok(sk) = SigningKey::from_slice(&sha256(&material)) {
                return Ok(Self::from_signing_key(sk));
            }
        }
        Err(RenegadeError::Crypto(
            "seed did not produce a valid secp256k1 key".to_string(),
        ))
    }

    /// Rebuild from the raw 32-byte root secret.
    pub fn from_secret_key_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(RenegadeError::BadParameters(format!(
                "root secret key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let sk = SigningKey::from_slice(bytes)
            .map_err(|e| RenegadeError::Crypto(format!("invalid root secret key: {e}")))?;
        Ok(Self::from_signing_key(sk))
    }

    fn from_signing_key(sk_root: SigningKey) -> Self {
        let signature = signing::sign_message(&sk_root, MATCH_KEY_MESSAGE);
        let sk_match = Scalar::from_be_bytes_mod_order(&sha256(&signature));
        let pk_match = hash_scalar(&sk_match);
        Self {
            sk_root,
            sk_match,
            pk_match,
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn sk_root_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.sk_root.to_bytes());
        out
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.sk_root.verifying_key()
    }

    /// Uncompressed SEC1 encoding of `pk_root` (65 bytes).
    pub fn pk_root_bytes(&self) -> Vec<u8> {
        self.verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    pub fn sk_match(&self) -> Scalar {
        self.sk_match
    }

    pub fn pk_match(&self) -> Scalar {
        self.pk_match
    }

    /// Account id: a UUID whose random bytes are the low 16 bytes of
    /// SHA-256(pk_root).
    pub fn account_id(&self) -> AccountId {
        let digest = sha256(&self.pk_root_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[16..]);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }

    /// Seed of the blinder hash chain.
    pub fn blinder_seed(&self) -> Scalar {
        hash_with_domain(BLINDER_SEED_DOMAIN, &self.sk_root_bytes())
    }

    /// Seed of the secret share stream.
    pub fn share_stream_seed(&self) -> Scalar {
        hash_with_domain(SHARE_STREAM_DOMAIN, &self.sk_root_bytes())
    }

    // -- Packing ------------------------------------------------------------

    /// `[x_lo, x_hi, y_lo, y_hi, pk_match]`, where the coordinates of
    /// `pk_root` are split into 128-bit halves.
    pub fn pack(&self) -> [Scalar; SHARES_PER_KEYCHAIN] {
        let encoded = self.pk_root_bytes();
        // encoded = 0x04 ‖ x (32, BE) ‖ y (32, BE)
        let x = &encoded[1..33];
        let y = &encoded[33..65];
        let word = |half: &[u8]| Scalar::from_be_bytes_mod_order(half);
        [
            word(&x[16..]),
            word(&x[..16]),
            word(&y[16..]),
            word(&y[..16]),
            self.pk_match,
        ]
    }

    // -- Signing ------------------------------------------------------------

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        signing::sign_message(&self.sk_root, message)
    }

    pub fn sign_http_request(&self, body: &[u8], now_ms: u64) -> HttpAuth {
        signing::sign_http_request(&self.sk_root, body, now_ms)
    }

    // -- Persistence --------------------------------------------------------

    /// Wire form: public keys plus `sk_match`. No root secret.
    pub fn to_wire(&self) -> KeychainJson {
        let mut json = self.to_json();
        json.private_keys.sk_root = None;
        json
    }

    /// Full persisted form, including the root secret.
    pub fn to_json(&self) -> KeychainJson {
        KeychainJson {
            public_keys: PublicKeys {
                pk_root: hex::encode(self.pk_root_bytes()),
                pk_match: scalar_to_hex(&self.pk_match),
            },
            private_keys: PrivateKeys {
                sk_root: Some(hex::encode(self.sk_root_bytes())),
                sk_match: scalar_to_hex(&self.sk_match),
            },
        }
    }

    /// Load a persisted keychain. Derived keys are recomputed from `sk_root`
    /// and must match what was stored.
    pub fn from_json(json: &KeychainJson) -> Result<Self> {
        let sk_root_hex = json.private_keys.sk_root.as_deref().ok_or_else(|| {
            RenegadeError::BadParameters("keychain is missing sk_root".to_string())
        })?;
        let sk_root = hex::decode(sk_root_hex.trim_start_matches("0x"))
            .map_err(|e| RenegadeError::BadParameters(format!("invalid sk_root hex: {e}")))?;
        let keychain = Self::from_secret_key_bytes(&sk_root)?;
        if !keychain.matches_public(json)
            || scalar_from_hex(&json.private_keys.sk_match)? != keychain.sk_match
        {
            return Err(RenegadeError::BadParameters(
                "stored keys do not match keys derived from sk_root".to_string(),
            ));
        }
        Ok(keychain)
    }

    /// Whether a wire keychain carries our public keys.
    pub fn matches_public(&self, json: &KeychainJson) -> bool {
        let pk_root_ok = json
            .public_keys
            .pk_root
            .trim_start_matches("0x")
            .eq_ignore_ascii_case(&hex::encode(self.pk_root_bytes()));
        let pk_match_ok = scalar_from_hex(&json.public_keys.pk_match)
            .map(|pk| pk == self.pk_match)
            .unwrap_or(false);
        pk_root_ok && pk_match_ok
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, json)
            .map_err(|e| RenegadeError::BadParameters(format!("write {}: {e}", path.display())))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RenegadeError::BadParameters(format!("read {}: {e}", path.display())))?;
        let json: KeychainJson = serde_json::from_str(&raw)?;
        Self::from_json(&json)
    }
}

impl fmt::Debug for Keychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keychain")
            .field("account_id", &self.account_id())
            .field("pk_root", &hex::encode(self.pk_root_bytes()))
            .finish_non_exhaustive()
    }
}

impl PartialEq for Keychain {
    fn eq(&self, other: &Self) -> bool {
        self.sk_root_bytes() == other.sk_root_bytes()
    }
}

impl Eq for Keychain {}

// ---------------------------------------------------------------------------
// JSON forms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeys {
    pub pk_root: String,
    pub pk_match: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sk_root: Option<String>,
    pub sk_match: String,
}

/// Hex-encoded key material, as persisted and as sent to the relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeychainJson {
    pub public_keys: PublicKeys,
    pub private_keys: PrivateKeys,
}

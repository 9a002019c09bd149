//! # Message Signing
//!
//! ECDSA over secp256k1 via `k256`. Signatures are deterministic (RFC 6979),
//! which matters here: the match key is derived from a signature, so the
//! same root key must always produce the same bytes.
//!
//! Two shapes of signed payload are used against the relayer:
//!
//! - **Statement signatures** over a wallet update, attached to mutation
//!   requests as hex.
//! - **Expiring request signatures** over `body ‖ expiration_le`, carried in
//!   the `renegade-auth` / `renegade-auth-expiration` headers.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};

use crate::config::SIG_VALIDITY_WINDOW_MS;
use crate::error::{RenegadeError, Result};

/// Sign `message`, returning the 64-byte `r ‖ s` encoding.
pub fn sign_message(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    let sig: Signature = key.sign(message);
    sig.to_bytes().to_vec()
}

/// Verify a 64-byte `r ‖ s` signature.
pub fn verify_message(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> Result<()> {
    let sig = Signature::from_slice(signature)
        .map_err(|e| RenegadeError::Crypto(format!("malformed signature: {e}")))?;
    key.verify(message, &sig)
        .map_err(|e| RenegadeError::Crypto(format!("signature verification failed: {e}")))
}

/// Auth headers for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpAuth {
    /// Base64 (standard alphabet, no padding) signature.
    pub signature: String,
    /// Expiration timestamp in ms since epoch.
    pub expiration_ms: u64,
}

/// The exact bytes covered by an expiring request signature.
pub fn http_auth_payload(body: &[u8], expiration_ms: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + 8);
    payload.extend_from_slice(body);
    payload.extend_from_slice(&expiration_ms.to_le_bytes());
    payload
}

/// Sign a request body so that the signature expires
/// `SIG_VALIDITY_WINDOW_MS` after `now_ms`.
pub fn sign_http_request(key: &SigningKey, body: &[u8], now_ms: u64) -> HttpAuth {
    let expiration_ms = now_ms + SIG_VALIDITY_WINDOW_MS;
    let sig = sign_message(key, &http_auth_payload(body, expiration_ms));
    HttpAuth {
        signature: STANDARD_NO_PAD.encode(sig),
        expiration_ms,
    }
}

/// Check an expiring signature against a body. Used by the in-memory relayer.
pub fn verify_http_request(
    key: &VerifyingKey,
    body: &[u8],
    auth: &HttpAuth,
    now_ms: u64,
) -> Result<()> {
    if now_ms > auth.expiration_ms {
        return Err(RenegadeError::Crypto("request signature expired".to_string()));
    }
    let sig = STANDARD_NO_PAD
        .decode(&auth.signature)
        .map_err(|e| RenegadeError::Crypto(format!("invalid auth encoding: {e}")))?;
    verify_message(key, &http_auth_payload(body, auth.expiration_ms), &sig)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SigningKey {
        SigningKey::from_slice(&[7u8; 32]).unwrap()
    }

    #[test]
    fn signatures_are_deterministic() {
        let k = key();
        assert_eq!(sign_message(&k, b"msg"), sign_message(&k, b"msg"));
        assert_eq!(sign_message(&k, b"msg").len(), 64);
    }

    #[test]
    fn http_signature_window() {
        let k = key();
        let auth = sign_http_request(&k, b"{}", 1_000);
        assert_eq!(auth.expiration_ms, 11_000);
        assert!(!auth.signature.ends_with('='));
        verify_http_request(k.verifying_key(), b"{}", &auth, 5_000).unwrap();
        assert!(verify_http_request(k.verifying_key(), b"{}", &auth, 11_001).is_err());
        assert!(verify_http_request(k.verifying_key(), b"{ }", &auth, 5_000).is_err());
    }
}

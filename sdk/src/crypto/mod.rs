//! Cryptographic building blocks: the BN254 scalar field and its hash, the
//! deterministic hash chain, and secp256k1 signing.

pub mod field;
pub mod hash_chain;
pub mod signing;

pub use field::{hash_bytes, hash_scalar, hash_with_domain, Scalar};
pub use hash_chain::{evaluate as evaluate_hash_chain, HashChain};
pub use signing::{sign_http_request, sign_message, HttpAuth};

/// SHA-256 as a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

//! # Field Operations
//!
//! Everything the wallet engine needs from the BN254 scalar field: the
//! `Scalar` alias, the domain hash, and the fixed-width limb codec used on
//! the wire.
//!
//! ## Hashing
//!
//! `hash_bytes` maps arbitrary bytes to a scalar: BLAKE3, then reduce the
//! little-endian digest modulo the field order. `hash_scalar` is the same
//! construction applied to a scalar's canonical 32-byte encoding, and is the
//! step function of the hash chain in [`super::hash_chain`].
//!
//! ## Limbs
//!
//! The relayer speaks scalars as little-endian arrays of 32-bit limbs. A
//! scalar always fits in 8 limbs; decoding refuses anything that would not
//! be a canonical field element.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};

use crate::config::{AMOUNT_LIMBS, LIMB_BITS, SCALAR_LIMBS};
use crate::error::{RenegadeError, Result};

/// An element of the BN254 scalar field.
pub type Scalar = Fr;

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Hash arbitrary bytes to a scalar.
pub fn hash_bytes(data: &[u8]) -> Scalar {
    let digest = blake3::hash(data);
    Fr::from_le_bytes_mod_order(digest.as_bytes())
}

/// Hash `domain ‖ data` to a scalar.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Scalar {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain);
    hasher.update(data);
    Fr::from_le_bytes_mod_order(hasher.finalize().as_bytes())
}

/// Hash a scalar to a scalar.
pub fn hash_scalar(x: &Scalar) -> Scalar {
    hash_bytes(&scalar_to_bytes_le(x))
}

/// Fold a sequence of scalars into one by hashing `acc ‖ x` left to right.
///
/// Used as the commitment to a share vector when signing wallet updates.
pub fn hash_scalars(xs: &[Scalar]) -> Scalar {
    xs.iter().fold(Scalar::from(0u64), |acc, x| {
        let mut buf = scalar_to_bytes_le(&acc);
        buf.extend_from_slice(&scalar_to_bytes_le(x));
        hash_bytes(&buf)
    })
}

// ---------------------------------------------------------------------------
// Byte Encodings
// ---------------------------------------------------------------------------

/// Canonical 32-byte little-endian encoding.
pub fn scalar_to_bytes_le(x: &Scalar) -> Vec<u8> {
    x.into_bigint().to_bytes_le()
}

/// Canonical 32-byte big-endian encoding.
pub fn scalar_to_bytes_be(x: &Scalar) -> Vec<u8> {
    x.into_bigint().to_bytes_be()
}

/// Big-endian hex without a prefix.
pub fn scalar_to_hex(x: &Scalar) -> String {
    hex::encode(scalar_to_bytes_be(x))
}

/// Parse big-endian hex (optionally `0x`-prefixed). Values at or above the
/// modulus are rejected rather than silently reduced.
pub fn scalar_from_hex(s: &str) -> Result<Scalar> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| RenegadeError::Serialization(format!("invalid scalar hex: {e}")))?;
    if bytes.len() > 32 {
        return Err(RenegadeError::ValueOutOfRange(format!(
            "{} bytes exceeds a 32-byte scalar",
            bytes.len()
        )));
    }
    let mut le = bytes;
    le.reverse();
    scalar_from_bytes_le_checked(&le)
}

/// Interpret little-endian bytes as a scalar, rejecting non-canonical values.
pub fn scalar_from_bytes_le_checked(bytes: &[u8]) -> Result<Scalar> {
    let x = Fr::from_le_bytes_mod_order(bytes);
    let mut roundtrip = scalar_to_bytes_le(&x);
    let mut input = bytes.to_vec();
    // Compare with trailing zeros stripped so short inputs are accepted.
    trim_trailing_zeros(&mut roundtrip);
    trim_trailing_zeros(&mut input);
    if roundtrip == input {
        Ok(x)
    } else {
        Err(RenegadeError::ValueOutOfRange(
            "value is not below the field modulus".to_string(),
        ))
    }
}

fn trim_trailing_zeros(v: &mut Vec<u8>) {
    while v.last() == Some(&0) {
        v.pop();
    }
}

// ---------------------------------------------------------------------------
// Limb Codec
// ---------------------------------------------------------------------------

/// Split a scalar into `SCALAR_LIMBS` little-endian 32-bit limbs.
pub fn scalar_to_limbs(x: &Scalar) -> Vec<u32> {
    let bytes = scalar_to_bytes_le(x);
    bytes_to_limbs(&bytes, SCALAR_LIMBS)
}

/// Rebuild a scalar from little-endian limbs.
///
/// Fails with `ValueOutOfRange` if more than `SCALAR_LIMBS` limbs are given
/// or the value is not below the modulus.
pub fn scalar_from_limbs(limbs: &[u32]) -> Result<Scalar> {
    if limbs.len() > SCALAR_LIMBS {
        return Err(RenegadeError::ValueOutOfRange(format!(
            "{} limbs exceeds {} x {}-bit layout",
            limbs.len(),
            SCALAR_LIMBS,
            LIMB_BITS
        )));
    }
    scalar_from_bytes_le_checked(&limbs_to_bytes(limbs))
}

/// Split an amount into `AMOUNT_LIMBS` little-endian 32-bit limbs.
pub fn amount_to_limbs(amount: u128) -> Vec<u32> {
    bytes_to_limbs(&amount.to_le_bytes(), AMOUNT_LIMBS)
}

/// Rebuild an amount from little-endian limbs.
pub fn amount_from_limbs(limbs: &[u32]) -> Result<u128> {
    if limbs.len() > AMOUNT_LIMBS {
        return Err(RenegadeError::ValueOutOfRange(format!(
            "{} limbs exceeds a {}-limb amount",
            limbs.len(),
            AMOUNT_LIMBS
        )));
    }
    Ok(limbs
        .iter()
        .rev()
        .fold(0u128, |acc, limb| (acc << LIMB_BITS) | u128::from(*limb)))
}

fn bytes_to_limbs(bytes: &[u8], count: usize) -> Vec<u32> {
    let mut limbs = vec![0u32; count];
    for (i, chunk) in bytes.chunks(4).take(count).enumerate() {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        limbs[i] = u32::from_le_bytes(word);
    }
    limbs
}

fn limbs_to_bytes(limbs: &[u32]) -> Vec<u8> {
    limbs.iter().flat_map(|l| l.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_domain_separated() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
        assert_ne!(
            hash_with_domain(b"blinder-seed-domain", b"k"),
            hash_with_domain(b"share-stream-domain", b"k")
        );
    }

    #[test]
    fn limbs_roundtrip_for_large_scalar() {
        let x = -Scalar::from(1u64); // modulus - 1
        let limbs = scalar_to_limbs(&x);
        assert_eq!(limbs.len(), 8);
        assert_eq!(scalar_from_limbs(&limbs).unwrap(), x);
    }

    #[test]
    fn nine_limbs_are_out_of_range() {
        let err = scalar_from_limbs(&[1; 9]).unwrap_err();
        assert!(matches!(err, RenegadeError::ValueOutOfRange(_)));
    }

    #[test]
    fn modulus_itself_is_out_of_range() {
        // All-ones 256-bit value is far above the ~254-bit modulus.
        let err = scalar_from_limbs(&[u32::MAX; 8]).unwrap_err();
        assert!(matches!(err, RenegadeError::ValueOutOfRange(_)));
    }

    #[test]
    fn amount_limbs() {
        let amount = (7u128 << 64) | 42;
        let limbs = amount_to_limbs(amount);
        assert_eq!(limbs, vec![42, 0, 7, 0]);
        assert_eq!(amount_from_limbs(&limbs).unwrap(), amount);
        assert!(amount_from_limbs(&[0; 5]).is_err());
    }

    #[test]
    fn hex_roundtrip() {
        let x = hash_bytes(b"hex");
        assert_eq!(scalar_from_hex(&scalar_to_hex(&x)).unwrap(), x);
        assert_eq!(scalar_from_hex("0x01").unwrap(), Scalar::from(1u64));
    }
}

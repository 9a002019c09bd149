//! # Tokens
//!
//! A [`Token`] is an ERC-20 address. Human tickers are resolved through a
//! [`TokenRegistry`]: an explicitly constructed, read-only table that the
//! caller loads once (typically at startup) and passes to whoever needs it.
//! There is deliberately no global table.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ark_ff::PrimeField;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::Scalar;
use crate::error::{RenegadeError, Result};

/// Address width in bytes.
pub const ADDRESS_LENGTH: usize = 20;

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// An ERC-20 token address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token {
    address: [u8; ADDRESS_LENGTH],
}

impl Token {
    pub fn new(address: [u8; ADDRESS_LENGTH]) -> Self {
        Self { address }
    }

    /// Parse `0x`-prefixed or bare hex. Shorter inputs are left-padded.
    pub fn from_hex(s: &str) -> Result<Self> {
        let trimmed = s.trim_start_matches("0x");
        let padded = format!("{:0>40}", trimmed.to_lowercase());
        let bytes = hex::decode(&padded)
            .map_err(|e| RenegadeError::BadParameters(format!("invalid token address {s}: {e}")))?;
        let address: [u8; ADDRESS_LENGTH] = bytes.try_into().map_err(|_| {
            RenegadeError::BadParameters(format!("token address {s} is longer than 20 bytes"))
        })?;
        Ok(Self { address })
    }

    pub fn address(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.address
    }

    /// Field encoding: the address as a big-endian integer.
    pub fn to_scalar(&self) -> Scalar {
        Scalar::from_be_bytes_mod_order(&self.address)
    }

    /// Lower-case `0x`-prefixed hex, the wire form.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.address))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Token {
    type Err = RenegadeError;

    fn from_str(s: &str) -> Result<Self> {
        Token::from_hex(s)
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Token::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// TokenRegistry
// ---------------------------------------------------------------------------

/// One row of a token mapping file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub ticker: String,
    pub address: Token,
    #[serde(default)]
    pub decimals: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    tokens: Vec<TokenInfo>,
}

/// Immutable ticker <-> address table.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    by_ticker: HashMap<String, TokenInfo>,
    by_address: HashMap<Token, TokenInfo>,
}

impl TokenRegistry {
    /// Build from rows. Tickers are case-insensitive.
    pub fn from_entries(entries: impl IntoIterator<Item = TokenInfo>) -> Self {
        let mut registry = Self::default();
        for mut info in entries {
            info.ticker = info.ticker.to_uppercase();
            registry.by_address.insert(info.address, info.clone());
            registry.by_ticker.insert(info.ticker.clone(), info);
        }
        registry
    }

    /// Parse `{"tokens": [{"ticker", "address", "decimals"}]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: TokenFile = serde_json::from_str(json)?;
        Ok(Self::from_entries(file.tokens))
    }

    pub fn token(&self, ticker: &str) -> Result<Token> {
        self.by_ticker
            .get(&ticker.to_uppercase())
            .map(|info| info.address)
            .ok_or_else(|| RenegadeError::BadParameters(format!("unknown ticker: {ticker}")))
    }

    pub fn ticker(&self, token: &Token) -> Option<&str> {
        self.by_address.get(token).map(|info| info.ticker.as_str())
    }

    pub fn decimals(&self, token: &Token) -> Option<u8> {
        self.by_address.get(token).and_then(|info| info.decimals)
    }

    pub fn len(&self) -> usize {
        self.by_ticker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ticker.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKENS: &str = r#"{"tokens":[
        {"ticker":"weth","address":"0x408Da76E87511429485C32E4Ad647DD14823Fdc4","decimals":18},
        {"ticker":"USDC","address":"0x5Db9a7629912EBF95876228C24A848de0bfB43A9","decimals":6}
    ]}"#;

    #[test]
    fn hex_is_normalized() {
        let t = Token::from_hex("0xABCDEF").unwrap();
        assert_eq!(t.to_hex(), format!("0x{}abcdef", "0".repeat(34)));
        assert_eq!(t.to_scalar(), Scalar::from(0xabcdefu64));
    }

    #[test]
    fn rejects_long_addresses() {
        assert!(Token::from_hex(&"1".repeat(42)).is_err());
        assert!(Token::from_hex("0xzz").is_err());
    }

    #[test]
    fn registry_lookups() {
        let registry = TokenRegistry::from_json(TOKENS).unwrap();
        assert_eq!(registry.len(), 2);
        let weth = registry.token("WETH").unwrap();
        assert_eq!(registry.ticker(&weth), Some("WETH"));
        assert_eq!(registry.decimals(&weth), Some(18));
        assert!(registry.token("DOGE").is_err());
    }

    #[test]
    fn serde_uses_hex_string() {
        let t = Token::from_hex("0x01").unwrap();
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, format!("\"0x{}01\"", "0".repeat(38)));
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}

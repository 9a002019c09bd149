//! Serde helpers for 128-bit amounts.
//!
//! Token amounts routinely exceed `u64::MAX` (20 ETH is 2e19 wei), which a
//! JSON number cannot carry through `serde_json::Value`. Amounts are written
//! as decimal strings; plain integers are still accepted on input.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = u128;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer or a decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
        Ok(u128::from(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
        u128::try_from(v).map_err(|_| E::custom(format!("negative amount {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
        v.parse()
            .map_err(|_| E::custom(format!("invalid amount {v:?}")))
    }
}

/// `u128` as a decimal string.
pub mod decimal {
    use super::*;

    pub fn serialize<S: Serializer>(amount: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(amount)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        d.deserialize_any(AmountVisitor)
    }
}

/// `Option<u128>` as a decimal string or `null`.
pub mod decimal_opt {
    use super::*;

    pub fn serialize<S: Serializer>(amount: &Option<u128>, s: S) -> Result<S::Ok, S::Error> {
        match amount {
            Some(amount) => s.collect_str(amount),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u128>, D::Error> {
        struct OptVisitor;

        impl<'de> Visitor<'de> for OptVisitor {
            type Value = Option<u128>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an amount or null")
            }

            fn visit_none<E: de::Error>(self) -> Result<Option<u128>, E> {
                Ok(None)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Option<u128>, E> {
                Ok(None)
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Option<u128>, D::Error> {
                d.deserialize_any(AmountVisitor).map(Some)
            }
        }

        d.deserialize_option(OptVisitor)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holding {
        #[serde(with = "super::decimal")]
        amount: u128,
        #[serde(default, with = "super::decimal_opt")]
        limit: Option<u128>,
    }

    #[test]
    fn wei_amounts_survive_a_json_value() {
        let holding = Holding {
            amount: 20_000_000_000_000_000_000,
            limit: Some(u128::MAX),
        };
        let value = serde_json::to_value(&holding).unwrap();
        assert_eq!(value["amount"], json!("20000000000000000000"));
        let back: Holding = serde_json::from_value(value).unwrap();
        assert_eq!(back, holding);
    }

    #[test]
    fn accepts_plain_integers_and_missing_limit() {
        let back: Holding = serde_json::from_value(json!({ "amount": 42 })).unwrap();
        assert_eq!(back, Holding { amount: 42, limit: None });
        let back: Holding =
            serde_json::from_value(json!({ "amount": "7", "limit": null })).unwrap();
        assert_eq!(back.limit, None);
        assert!(serde_json::from_value::<Holding>(json!({ "amount": -1 })).is_err());
        assert!(serde_json::from_value::<Holding>(json!({ "amount": "1e3" })).is_err());
    }
}

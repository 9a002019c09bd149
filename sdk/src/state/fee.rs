//! Relayer fees approved by the wallet owner.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::token::Token;
use crate::config::SHARES_PER_FEE;
use crate::crypto::field::{scalar_from_hex, scalar_to_hex};
use crate::crypto::Scalar;

pub type FeeId = Uuid;

/// A fee the wallet owner has approved for a relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub id: FeeId,
    /// Settlement key of the fee recipient.
    #[serde(with = "scalar_hex")]
    pub recipient_key: Scalar,
    pub gas_mint: Token,
    #[serde(with = "super::amount::decimal")]
    pub gas_amount: u128,
    /// Fixed-point fraction of matched volume.
    #[serde(with = "super::amount::decimal")]
    pub percentage_fee: u128,
}

impl Fee {
    pub fn new(
        recipient_key: Scalar,
        gas_mint: Token,
        gas_amount: u128,
        percentage_fee: u128,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_key,
            gas_mint,
            gas_amount,
            percentage_fee,
        }
    }

    /// `[recipient_key, gas_mint, gas_amount, percentage_fee]`
    pub fn pack(&self) -> [Scalar; SHARES_PER_FEE] {
        [
            self.recipient_key,
            self.gas_mint.to_scalar(),
            Scalar::from(self.gas_amount),
            Scalar::from(self.percentage_fee),
        ]
    }
}

mod scalar_hex {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(x: &Scalar, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", scalar_to_hex(x)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Scalar, D::Error> {
        let s = String::deserialize(d)?;
        scalar_from_hex(&s).map_err(serde::de::Error::custom)
    }
}

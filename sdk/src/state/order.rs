//! Orders.
//!
//! An order packs to six words in the order the relayer's circuit expects:
//! `[quote_mint, base_mint, side, amount, price, timestamp]`. Midpoint orders
//! have no limit price and pack a zero in that slot. The optional minimum fill
//! amount is sent to the relayer but is not part of the packed wallet.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::token::Token;
use crate::config::SHARES_PER_ORDER;
use crate::crypto::Scalar;

/// Order identifier. Random unless explicitly supplied.
pub type OrderId = Uuid;

/// Which side of the book the order rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    fn to_scalar(self) -> Scalar {
        match self {
            OrderSide::Buy => Scalar::from(0u64),
            OrderSide::Sell => Scalar::from(1u64),
        }
    }
}

/// How the order is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Crosses at the midpoint of the reference price.
    Midpoint,
    /// Crosses no worse than `price`.
    Limit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub base_token: Token,
    pub quote_token: Token,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    #[serde(with = "super::amount::decimal")]
    pub amount: u128,
    #[serde(default, with = "super::amount::decimal_opt")]
    pub minimum_amount: Option<u128>,
    #[serde(default, with = "super::amount::decimal_opt")]
    pub price: Option<u128>,
    /// Creation time, ms since epoch.
    pub timestamp: u64,
}

impl Order {
    /// New order with a fresh random id, stamped with the current time.
    pub fn new(
        base_token: Token,
        quote_token: Token,
        side: OrderSide,
        kind: OrderKind,
        amount: u128,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            base_token,
            quote_token,
            side,
            kind,
            amount,
            minimum_amount: None,
            price: None,
            timestamp: now_ms(),
        }
    }

    pub fn with_price(mut self, price: u128) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_minimum_amount(mut self, minimum_amount: u128) -> Self {
        self.minimum_amount = Some(minimum_amount);
        self
    }

    /// Keep the id of an order being replaced.
    pub fn with_id(mut self, id: OrderId) -> Self {
        self.id = id;
        self
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    pub fn pack(&self) -> [Scalar; SHARES_PER_ORDER] {
        let price = match self.kind {
            OrderKind::Midpoint => 0,
            OrderKind::Limit => self.price.unwrap_or(0),
        };
        [
            self.quote_token.to_scalar(),
            self.base_token.to_scalar(),
            self.side.to_scalar(),
            Scalar::from(self.amount),
            Scalar::from(price),
            Scalar::from(self.timestamp),
        ]
    }
}

pub(crate) fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(kind: OrderKind) -> Order {
        Order::new(
            Token::from_hex("0x0b").unwrap(),
            Token::from_hex("0x0c").unwrap(),
            OrderSide::Sell,
            kind,
            250,
        )
    }

    #[test]
    fn fresh_orders_get_distinct_ids() {
        assert_ne!(order(OrderKind::Limit).id, order(OrderKind::Limit).id);
    }

    #[test]
    fn limit_order_packing() {
        let mut o = order(OrderKind::Limit).with_price(1_800);
        o.timestamp = 5;
        assert_eq!(
            o.pack(),
            [
                Scalar::from(12u64),
                Scalar::from(11u64),
                Scalar::from(1u64),
                Scalar::from(250u64),
                Scalar::from(1_800u64),
                Scalar::from(5u64),
            ]
        );
    }

    #[test]
    fn midpoint_order_ignores_price() {
        let o = order(OrderKind::Midpoint).with_price(1_800);
        assert_eq!(o.pack()[4], Scalar::from(0u64));
    }

    #[test]
    fn wire_names() {
        let json = serde_json::to_value(order(OrderKind::Midpoint)).unwrap();
        assert_eq!(json["type"], "Midpoint");
        assert_eq!(json["side"], "Sell");
    }
}

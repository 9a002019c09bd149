//! Topic names and frame shapes of the relayer event stream.
//!
//! ```text
//! client -> relayer   {"headers": {..auth..}, "body": {"method": "subscribe", "topic": "/v0/..."}}
//! relayer -> client   {"topic": "/v0/...", "event": {"type": "...", ...}}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{ApiWallet, Token};

/// Task state reported when a task has finished successfully.
pub const TASK_STATE_COMPLETED: &str = "Completed";

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

pub fn wallet_topic(wallet_id: &impl fmt::Display) -> String {
    format!("/v0/wallet/{wallet_id}")
}

pub fn task_topic(task_id: &str) -> String {
    format!("/v0/tasks/{task_id}")
}

pub fn price_report_topic(exchange: Exchange, base: &Token, quote: &Token) -> String {
    format!("/v0/price_report/{exchange}/{base}/{quote}")
}

pub const ORDER_BOOK_TOPIC: &str = "/v0/order_book";
pub const NETWORK_TOPIC: &str = "/v0/network";
pub const MPC_TOPIC: &str = "/v0/mpc";

/// Price sources the relayer aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    Median,
    Binance,
    Coinbase,
    Kraken,
    Okx,
    UniswapV3,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Exchange::Median => "median",
            Exchange::Binance => "binance",
            Exchange::Coinbase => "coinbase",
            Exchange::Kraken => "kraken",
            Exchange::Okx => "okx",
            Exchange::UniswapV3 => "uniswapv3",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeBody {
    pub method: String,
    pub topic: String,
}

impl SubscribeBody {
    pub fn subscribe(topic: &str) -> Self {
        Self {
            method: "subscribe".to_string(),
            topic: topic.to_string(),
        }
    }
}

/// Outbound control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: SubscribeBody,
}

/// Inbound event frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub topic: String,
    pub event: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub state: String,
}

/// Events this client interprets. Anything else passes through to
/// callbacks untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayerEvent {
    WalletUpdate { wallet: ApiWallet },
    TaskStatusUpdate {
        #[serde(default)]
        task_id: Option<String>,
        state: TaskState,
    },
}

impl RelayerEvent {
    pub fn task_completed(task_id: &str) -> Self {
        RelayerEvent::TaskStatusUpdate {
            task_id: Some(task_id.to_string()),
            state: TaskState {
                state: TASK_STATE_COMPLETED.to_string(),
            },
        }
    }
}

/// Whether `event` is a `TaskStatusUpdate` in the `Completed` state.
pub fn is_task_completed(event: &Value) -> bool {
    event.get("type").and_then(Value::as_str) == Some("TaskStatusUpdate")
        && event
            .get("state")
            .and_then(|s| s.get("state"))
            .and_then(Value::as_str)
            == Some(TASK_STATE_COMPLETED)
}

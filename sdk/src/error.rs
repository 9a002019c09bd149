//! Error types for the Renegade client.
//!
//! Every fallible SDK operation returns a [`RenegadeError`]. The variants
//! fall into four families:
//!
//! - **Configuration**: bad hostname or port. Raised at construction and
//!   never retried.
//! - **Transport**: the relayer could not be reached or answered with a
//!   non-success status. Surfaced as-is; retry policy belongs to the caller.
//! - **Protocol / state**: precondition violations such as operating on an
//!   account that has not been synced yet.
//! - **Invariant**: a packing or share-derivation bug. These must propagate
//!   and are never swallowed.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, RenegadeError>;

/// Errors that can occur anywhere in the SDK.
#[derive(Debug, Error)]
pub enum RenegadeError {
    // -- Configuration ------------------------------------------------------
    /// The relayer hostname failed validation.
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),

    /// A relayer port was outside `1..=65535`.
    #[error("invalid port: {0}")]
    InvalidPort(u32),

    // -- Transport ----------------------------------------------------------
    /// The relayer could not be reached, or the event connection has
    /// entered its (sticky) error state.
    #[error("relayer unreachable: {0}")]
    RelayerUnreachable(String),

    /// The relayer answered with a non-success status.
    #[error("relayer error (status {status}): {message}")]
    RelayerError {
        /// HTTP status code, or 0 when the failure happened before a status
        /// was available.
        status: u16,
        /// Response body or a short description.
        message: String,
    },

    /// The client or connection has been torn down.
    #[error("relayer connection has been torn down")]
    RelayerTornDown,

    // -- Protocol / state ---------------------------------------------------
    /// An account with the same id is already registered.
    #[error("account already registered: {0}")]
    AccountAlreadyRegistered(String),

    /// No account with this id is registered.
    #[error("account not registered: {0}")]
    AccountNotRegistered(String),

    /// The account has not reached the synced state yet.
    #[error("account not synced: {0}")]
    AccountNotSynced(String),

    /// The callback id is unknown to the multiplexer.
    #[error("callback not registered: {0}")]
    CallbackNotRegistered(String),

    /// A task completion was awaited without a task id.
    #[error("invalid task id")]
    InvalidTaskId,

    /// A caller-supplied argument was malformed.
    #[error("bad parameters: {0}")]
    BadParameters(String),

    /// Every order slot is occupied by a live order.
    #[error("wallet already holds the maximum number of orders")]
    MaxOrders,

    /// Every balance slot is occupied by a non-zero balance.
    #[error("wallet already holds the maximum number of balances")]
    BalancesFull,

    /// A withdrawal named a mint the wallet does not hold.
    #[error("no balance to withdraw for mint {0}")]
    NoBalanceToWithdraw(String),

    /// A withdrawal asked for more than the wallet holds.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Amount requested.
        requested: u128,
        /// Amount currently held.
        available: u128,
    },

    /// An order id did not match any order in the wallet.
    #[error("order not found: {0}")]
    OrderNotFound(String),

    // -- Encoding -----------------------------------------------------------
    /// A value does not fit the fixed limb layout or the field modulus.
    #[error("value out of range: {0}")]
    ValueOutOfRange(String),

    /// A wallet received from the relayer is structurally invalid.
    #[error("invalid wallet: {0}")]
    InvalidWallet(String),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A key or signature operation failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    // -- Invariant ----------------------------------------------------------
    /// Internal invariant violation (e.g. wrong derived-share count).
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for RenegadeError {
    fn from(e: serde_json::Error) -> Self {
        RenegadeError::Serialization(e.to_string())
    }
}

impl RenegadeError {
    /// Whether this error belongs to the transport family.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RenegadeError::RelayerUnreachable(_)
                | RenegadeError::RelayerError { .. }
                | RenegadeError::RelayerTornDown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            RenegadeError::ValueOutOfRange("9 limbs".into()).to_string(),
            "value out of range: 9 limbs"
        );
        assert_eq!(RenegadeError::InvalidTaskId.to_string(), "invalid task id");
    }

    #[test]
    fn transport_family() {
        assert!(RenegadeError::RelayerTornDown.is_transport());
        assert!(RenegadeError::RelayerError {
            status: 500,
            message: "boom".into()
        }
        .is_transport());
        assert!(!RenegadeError::MaxOrders.is_transport());
    }
}

//! # SDK Configuration & Constants
//!
//! Every sizing constant of the wallet layout lives here, together with the
//! client configuration used to reach a relayer. The wallet constants are part
//! of the wire contract with the relayer's verifier: if these drift from the
//! circuit's layout, every update we submit will be rejected.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::{RenegadeError, Result};

// ---------------------------------------------------------------------------
// Wallet Layout
// ---------------------------------------------------------------------------

/// Maximum number of balances a wallet can hold.
pub const MAX_BALANCES: usize = 5;

/// Maximum number of orders a wallet can hold.
pub const MAX_ORDERS: usize = 5;

/// Maximum number of fees a wallet can hold.
pub const MAX_FEES: usize = 2;

/// Field elements per packed balance: `[mint, amount]`.
pub const SHARES_PER_BALANCE: usize = 2;

/// Field elements per packed order.
pub const SHARES_PER_ORDER: usize = 6;

/// Field elements per packed fee.
pub const SHARES_PER_FEE: usize = 4;

/// Words used for the root public key (two per affine coordinate).
pub const NUM_ROOT_KEY_WORDS: usize = 4;

/// Root key words plus one word for the match public key.
pub const SHARES_PER_KEYCHAIN: usize = NUM_ROOT_KEY_WORDS + 1;

/// The blinder occupies the final slot of the packed wallet.
pub const SHARES_PER_BLINDER: usize = 1;

/// Total width of a packed wallet. 54 with the defaults above.
pub const SHARES_PER_WALLET: usize = MAX_BALANCES * SHARES_PER_BALANCE
    + MAX_ORDERS * SHARES_PER_ORDER
    + MAX_FEES * SHARES_PER_FEE
    + SHARES_PER_KEYCHAIN
    + SHARES_PER_BLINDER;

// ---------------------------------------------------------------------------
// Limb Encoding
// ---------------------------------------------------------------------------

/// Bit width of one serialized limb.
pub const LIMB_BITS: u32 = 32;

/// Limbs per serialized scalar. 8 x 32 = 256 bits.
pub const SCALAR_LIMBS: usize = 8;

/// Limbs per serialized amount. Amounts are `u128`.
pub const AMOUNT_LIMBS: usize = 4;

// ---------------------------------------------------------------------------
// Key Derivation Domains
// ---------------------------------------------------------------------------

/// Domain prefix for the blinder hash chain seed.
pub const BLINDER_SEED_DOMAIN: &[u8] = b"blinder-seed-domain";

/// Domain prefix for the secret share stream seed.
pub const SHARE_STREAM_DOMAIN: &[u8] = b"share-stream-domain";

/// Domain prefix used when expanding a user seed into a root key.
pub const ROOT_KEY_DOMAIN: &[u8] = b"renegade-root-key";

/// Message signed by the root key to derive the match key.
pub const MATCH_KEY_MESSAGE: &[u8] = b"Unlock your Renegade match key.\nTestnet v0";

// ---------------------------------------------------------------------------
// Request Authentication
// ---------------------------------------------------------------------------

/// Header carrying the expiring request signature.
pub const RENEGADE_AUTH_HEADER: &str = "renegade-auth";

/// Header carrying the signature expiration (ms since epoch).
pub const RENEGADE_AUTH_EXPIRATION_HEADER: &str = "renegade-auth-expiration";

/// How long a request signature stays valid.
pub const SIG_VALIDITY_WINDOW_MS: u64 = 10_000;

/// Domain prefix of an external transfer authorization.
pub const TRANSFER_AUTH_DOMAIN: &[u8] = b"renegade-external-transfer";

/// How long a transfer authorization stays valid.
pub const TRANSFER_VALIDITY_WINDOW_MS: u64 = 5 * 60 * 1000;

/// Task id the relayer (and this client) use for "nothing to wait for".
pub const TASK_DONE_SENTINEL: &str = "DONE";

// ---------------------------------------------------------------------------
// Relayer Defaults
// ---------------------------------------------------------------------------

/// Default relayer HTTP port.
pub const DEFAULT_HTTP_PORT: u32 = 3000;

/// Default relayer WebSocket port.
pub const DEFAULT_WS_PORT: u32 = 4000;

/// Hostnames (DNS) or dotted IPv4 addresses. No scheme, no port.
const HOSTNAME_PATTERN: &str =
    r"^((([a-zA-Z0-9-]{1,63}\.?)+[a-zA-Z]{2,63})|(\d{1,3}\.){3}\d{1,3})$";

// ---------------------------------------------------------------------------
// RenegadeConfig
// ---------------------------------------------------------------------------

/// How to reach a relayer.
///
/// Construct with [`RenegadeConfig::new`] and override fields as needed, then
/// call [`RenegadeConfig::validate`] (the `Renegade` constructor does this for
/// you). Validation failures are configuration errors: fatal, never retried.
#[derive(Debug, Clone)]
pub struct RenegadeConfig {
    /// Relayer hostname or IPv4 address. `localhost` is accepted and mapped
    /// to `127.0.0.1`.
    pub relayer_hostname: String,

    /// Port for the HTTP API.
    pub relayer_http_port: u32,

    /// Port for the event stream.
    pub relayer_ws_port: u32,

    /// Use `http`/`ws` instead of `https`/`wss`. Local development only.
    pub use_insecure_transport: bool,

    /// Emit extra diagnostic logging.
    pub verbose: bool,

    /// Extra delay after a task reports completion, giving the relayer
    /// time to settle its own state before the next request.
    pub task_delay: Duration,
}

impl RenegadeConfig {
    /// Configuration for `hostname` with default ports and secure transport.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            relayer_hostname: hostname.into(),
            relayer_http_port: DEFAULT_HTTP_PORT,
            relayer_ws_port: DEFAULT_WS_PORT,
            use_insecure_transport: false,
            verbose: false,
            task_delay: Duration::ZERO,
        }
    }

    /// Check the hostname and both ports.
    pub fn validate(&self) -> Result<()> {
        validate_hostname(&self.normalized_hostname())?;
        validate_port(self.relayer_http_port)?;
        validate_port(self.relayer_ws_port)?;
        Ok(())
    }

    /// The hostname with `localhost` mapped to the loopback address.
    pub fn normalized_hostname(&self) -> String {
        if self.relayer_hostname == "localhost" {
            "127.0.0.1".to_string()
        } else {
            self.relayer_hostname.clone()
        }
    }

    /// Base URL of the HTTP API, e.g. `https://relayer.example:3000`.
    pub fn http_url(&self) -> Result<String> {
        construct_url(
            "http",
            &self.normalized_hostname(),
            self.relayer_http_port,
            self.use_insecure_transport,
        )
    }

    /// URL of the event stream, e.g. `wss://relayer.example:4000`.
    pub fn ws_url(&self) -> Result<String> {
        construct_url(
            "ws",
            &self.normalized_hostname(),
            self.relayer_ws_port,
            self.use_insecure_transport,
        )
    }
}

/// Build `{scheme}[s]://{hostname}:{port}` after validating both parts.
pub fn construct_url(
    scheme: &str,
    hostname: &str,
    port: u32,
    use_insecure_transport: bool,
) -> Result<String> {
    validate_hostname(hostname)?;
    validate_port(port)?;
    let secure = if use_insecure_transport { "" } else { "s" };
    Ok(format!("{scheme}{secure}://{hostname}:{port}"))
}

fn hostname_regex() -> Result<&'static Regex> {
    static HOSTNAME_RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    HOSTNAME_RE
        .get_or_init(|| Regex::new(HOSTNAME_PATTERN))
        .as_ref()
        .map_err(|e| RenegadeError::Invariant(format!("hostname pattern: {e}")))
}

fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname_regex()?.is_match(hostname) {
        Ok(())
    } else {
        Err(RenegadeError::InvalidHostname(hostname.to_string()))
    }
}

fn validate_port(port: u32) -> Result<()> {
    if (1..=65_535).contains(&port) {
        Ok(())
    } else {
        Err(RenegadeError::InvalidPort(port))
    }
}

//! # CLI Interface
//!
//! Command-line structure for `renegade-cli`, built with `clap` derive.
//! Relayer location falls back to `RENEGADE_*` environment variables.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use renegade_sdk::config::{DEFAULT_HTTP_PORT, DEFAULT_WS_PORT};
use renegade_sdk::RenegadeConfig;

/// Command-line client for Renegade wallets.
///
/// Derives keychains, checks relayer health, and inspects wallets held by a
/// relayer.
#[derive(Parser, Debug)]
#[command(
    name = "renegade-cli",
    about = "Command-line client for Renegade wallets",
    version,
    propagate_version = true
)]
pub struct RenegadeCli {
    /// Log output format: `pretty` or `json`.
    #[arg(long, global = true, env = "RENEGADE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Derive a keychain and print its account id.
    Keys(KeysArgs),
    /// Check that a relayer answers.
    Ping(RelayerArgs),
    /// Fetch a wallet from a relayer and print its balances.
    Wallet(WalletArgs),
    /// Deposit and withdraw against an in-process relayer.
    Demo(DemoArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Args, Debug)]
pub struct KeysArgs {
    /// Derive deterministically from this seed instead of at random.
    #[arg(long)]
    pub seed: Option<String>,

    /// Write the keychain JSON (including the root secret) to this file.
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,
}

/// Where the relayer lives.
#[derive(Args, Debug, Clone)]
pub struct RelayerArgs {
    /// Relayer hostname or IPv4 address.
    #[arg(long, env = "RENEGADE_HOST", default_value = "localhost")]
    pub host: String,

    /// Relayer HTTP port.
    #[arg(long, env = "RENEGADE_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u32,

    /// Relayer event-stream port.
    #[arg(long, env = "RENEGADE_WS_PORT", default_value_t = DEFAULT_WS_PORT)]
    pub ws_port: u32,

    /// Use plain http/ws. Local relayers only.
    #[arg(long)]
    pub insecure: bool,
}

impl RelayerArgs {
    pub fn to_config(&self, verbose: bool) -> RenegadeConfig {
        let mut config = RenegadeConfig::new(self.host.clone());
        config.relayer_http_port = self.http_port;
        config.relayer_ws_port = self.ws_port;
        config.use_insecure_transport = self.insecure;
        config.verbose = verbose;
        config
    }
}

#[derive(Args, Debug)]
pub struct WalletArgs {
    /// Keychain JSON file written by `keys --out`.
    #[arg(long, short = 'k')]
    pub keychain: PathBuf,

    #[command(flatten)]
    pub relayer: RelayerArgs,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Seed for the demo keychain.
    #[arg(long, default_value = "seed")]
    pub seed: String,

    /// Amount to deposit before withdrawing it in two steps.
    #[arg(long, default_value_t = 1000)]
    pub amount: u128,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        RenegadeCli::command().debug_assert();
    }

    #[test]
    fn relayer_args_map_to_config() {
        let cli = RenegadeCli::parse_from([
            "renegade-cli",
            "ping",
            "--host",
            "relayer.example.org",
            "--http-port",
            "8080",
            "--insecure",
        ]);
        let Commands::Ping(args) = cli.command else {
            panic!("expected ping");
        };
        let config = args.to_config(false);
        assert_eq!(config.http_url().unwrap(), "http://relayer.example.org:8080");
        assert_eq!(config.relayer_ws_port, DEFAULT_WS_PORT);
    }
}

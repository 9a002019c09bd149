// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Renegade CLI
//!
//! Entry point for the `renegade-cli` binary.
//!
//! - `keys`    derive a keychain and optionally save it
//! - `ping`    check a relayer's HTTP API
//! - `wallet`  fetch a wallet and print its balances
//! - `demo`    run a deposit/withdraw round against an in-process relayer
//! - `version` print build version information

mod cli;
mod logging;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use renegade_sdk::{
    AccountId, HttpRelayerClient, InMemoryRelayer, Keychain, RelayerClient, Renegade,
    RenegadeConfig, Token, Wallet,
};

use cli::{Commands, RenegadeCli};
use logging::LogFormat;

/// Token used by the demo. Any 20-byte address works against the in-memory
/// relayer.
const DEMO_TOKEN: &str = "0x000000000000000000000000000000000000aaaa";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RenegadeCli::parse();
    logging::init_logging(
        logging::default_directives(cli.verbose),
        LogFormat::from_str_lossy(&cli.log_format),
    );

    match cli.command {
        Commands::Keys(args) => keys(args),
        Commands::Ping(args) => ping(args, cli.verbose).await,
        Commands::Wallet(args) => show_wallet(args, cli.verbose).await,
        Commands::Demo(args) => demo(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn keys(args: cli::KeysArgs) -> Result<()> {
    let keychain = match &args.seed {
        Some(seed) => Keychain::from_seed(seed.as_bytes()).context("failed to derive keychain")?,
        None => Keychain::random(),
    };
    if let Some(path) = &args.out {
        keychain
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "keychain saved");
    }
    let public = keychain.to_wire().public_keys;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "account_id": keychain.account_id(),
            "pk_root": public.pk_root,
            "pk_match": public.pk_match,
        }))?
    );
    Ok(())
}

async fn ping(args: cli::RelayerArgs, verbose: bool) -> Result<()> {
    let config = args.to_config(verbose);
    config.validate().context("invalid relayer configuration")?;
    let client = HttpRelayerClient::from_config(&config)?;
    let timestamp = client
        .ping()
        .await
        .with_context(|| format!("ping {} failed", client.base_url()))?;
    println!("{}", json!({ "relayer": client.base_url(), "timestamp": timestamp }));
    Ok(())
}

async fn show_wallet(args: cli::WalletArgs, verbose: bool) -> Result<()> {
    let keychain = Keychain::load(&args.keychain)
        .with_context(|| format!("failed to load {}", args.keychain.display()))?;
    let config = args.relayer.to_config(verbose);
    config.validate().context("invalid relayer configuration")?;
    let client = HttpRelayerClient::from_config(&config)?;

    let id = keychain.account_id();
    let api = client
        .get_wallet(id, &keychain)
        .await?
        .with_context(|| format!("relayer has no wallet {id}"))?;
    let wallet = Wallet::from_api(&api, &keychain).context("relayer returned an unusable wallet")?;
    print_balances(&wallet)
}

async fn demo(args: cli::DemoArgs) -> Result<()> {
    let relayer = InMemoryRelayer::new();
    let renegade = Renegade::with_relayer(
        RenegadeConfig::new("localhost"),
        Arc::new(relayer.clone()),
        Arc::new(relayer),
    )?;
    let id = renegade.register_account(Keychain::from_seed(args.seed.as_bytes())?)?;
    let origin = renegade.initialize_account(id).await?;
    tracing::info!(account = %id, ?origin, "demo account ready");

    let token = Token::from_hex(DEMO_TOKEN)?;
    let first = args.amount / 5 * 2;
    let rest = args.amount - first;

    renegade.deposit(id, token, args.amount, "0xdemo").await?;
    report(&renegade, id, "deposit", args.amount)?;
    renegade.withdraw(id, token, first, "0xdemo").await?;
    report(&renegade, id, "withdraw", first)?;
    renegade.withdraw(id, token, rest, "0xdemo").await?;
    report(&renegade, id, "withdraw", rest)?;

    renegade.teardown();
    Ok(())
}

fn report(renegade: &Renegade, id: AccountId, action: &str, amount: u128) -> Result<()> {
    let balances: Vec<_> = renegade
        .get_balances(id)?
        .into_values()
        .map(|b| json!({ "mint": b.mint, "amount": b.amount.to_string() }))
        .collect();
    println!(
        "{}",
        json!({ "action": action, "amount": amount.to_string(), "balances": balances })
    );
    Ok(())
}

fn print_balances(wallet: &Wallet) -> Result<()> {
    let balances: Vec<_> = wallet
        .balances()
        .into_values()
        .map(|b| json!({ "mint": b.mint, "amount": b.amount.to_string() }))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "wallet": wallet.id(), "balances": balances }))?
    );
    Ok(())
}

fn print_version() {
    println!("renegade-cli {}", env!("CARGO_PKG_VERSION"));
    println!("rustc        {}", rustc_version());
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

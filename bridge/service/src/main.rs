// Copyright (c) 2024 The Botho Foundation

//! REVO Bridge Service
//!
//! Bridges CXS and NEXTEP deposits on nxchain to REVO on the new chain.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use revo_bridge_core::{
    conversion::{convert_scaled, format_units, parse_units, usd_value},
    BridgeConfig, SourceToken,
};
use revo_bridge_service::{
    chains::{http_provider, NxchainClient, RevoChainClient},
    cli::ConfigOverrides,
    journal::MintJournal,
    retry::backoff_from_settings,
    rpc::RpcThrottle,
    BridgeController, BridgeStateStore, LedgerScanner, MintDispatcher, PriceOracle,
    ShutdownSignal,
};

/// REVO Bridge - mint REVO for CXS and NEXTEP deposits
#[derive(Parser, Debug)]
#[command(name = "revo-bridge")]
#[command(about = "Bridge service for CXS/NEXTEP -> REVO transfers")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "bridge.toml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bridge loop
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Show persisted bridge state
    Status,

    /// Resolve and print current prices
    Prices,

    /// Show the REVO a deposit would receive at current prices
    Quote {
        /// Deposited token (cxs or nextep)
        #[arg(short, long)]
        token: SourceToken,

        /// Deposited amount in whole tokens, e.g. 12.5
        #[arg(short, long)]
        amount: String,
    },

    /// Validate configuration file
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            if matches!(cli.command, Commands::ValidateConfig) {
                eprintln!("Configuration validation failed: {:#}", e);
                std::process::exit(1);
            }
            return Err(e);
        }
    };

    match cli.command {
        Commands::Run { once } => run_bridge(&config, once).await,
        Commands::Status => show_status(&config),
        Commands::Prices => show_prices(&config).await,
        Commands::Quote { token, amount } => quote(&config, token, &amount).await,
        Commands::ValidateConfig => {
            println!("Configuration is valid.");
            println!("  Source RPC: {}", config.source.rpc_url);
            println!("  Bridge address: {}", config.source.bridge_address);
            println!("  Confirmations: {}", config.source.confirmations);
            println!("  Destination: {} ({})", config.destination.api_url, config.destination.chain_id);
            println!("  Minter: {}", config.destination.minter_address);
            println!("  State file: {}", config.bridge.state_file.display());
            Ok(())
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level {:?}", level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    Ok(())
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = if cli.config.exists() {
        info!("Loading configuration from {}", cli.config.display());
        BridgeConfig::from_file(&cli.config)?
    } else if matches!(cli.command, Commands::ValidateConfig) {
        anyhow::bail!("Config file {} not found", cli.config.display());
    } else {
        info!("No config at {}, using defaults", cli.config.display());
        BridgeConfig::default()
    };

    cli.overrides.apply(&mut config)?;
    if !matches!(cli.command, Commands::Status) {
        config.validate()?;
    }
    Ok(config)
}

fn throttle(config: &BridgeConfig) -> Arc<RpcThrottle> {
    Arc::new(RpcThrottle::new(Duration::from_millis(
        config.bridge.rpc_min_interval_ms,
    )))
}

async fn run_bridge(config: &BridgeConfig, once: bool) -> Result<()> {
    info!("REVO bridge starting");
    info!("  nxchain RPC: {}", config.source.rpc_url);
    info!("  Bridge address: {}", config.source.bridge_address);
    info!("  REVO API: {}", config.destination.api_url);
    info!("  Confirmations: {}", config.source.confirmations);

    let throttle = throttle(config);
    let backoff = backoff_from_settings(&config.bridge);

    let source = NxchainClient::new(
        http_provider(&config.source.rpc_url)?,
        config.bridge_address()?,
        config.nextep_contract()?,
        throttle.clone(),
    );
    let destination = RevoChainClient::new(config.destination.clone(), throttle.clone())?;
    let oracle = PriceOracle::from_config(&config.pricing, throttle, backoff)?;
    let store =
        BridgeStateStore::load_or_start_at(&config.bridge.state_file, config.source.start_height)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut controller = BridgeController::new(
        LedgerScanner::new(
            source,
            config.source.confirmations,
            config.source.max_blocks_per_cycle,
            backoff,
        ),
        oracle,
        MintDispatcher::new(destination, backoff),
        store,
        ShutdownSignal::new(shutdown_rx),
    )
    .with_poll_interval(Duration::from_secs(config.bridge.poll_interval_secs))
    .with_destination_decimals(config.destination.decimals);
    if let Some(path) = &config.bridge.journal_file {
        info!("  Mint journal: {}", path.display());
        controller = controller.with_journal(MintJournal::new(path));
    }

    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Received shutdown signal, finishing in-flight work");
        let _ = shutdown_tx.send(());
    });

    if once {
        let report = controller.run_cycle().await?;
        info!("Single cycle complete: {}", report);
        return Ok(());
    }

    controller.run().await?;
    Ok(())
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn show_status(config: &BridgeConfig) -> Result<()> {
    let store = BridgeStateStore::load(&config.bridge.state_file)?;
    println!("{}", store.state().summary());
    Ok(())
}

async fn show_prices(config: &BridgeConfig) -> Result<()> {
    let oracle = PriceOracle::from_config(
        &config.pricing,
        throttle(config),
        backoff_from_settings(&config.bridge),
    )?;
    let snapshot = oracle.snapshot().await?;

    println!("Prices at {}:", snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  CXS:    {}", snapshot.cxs.to_display());
    println!("  NEXTEP: {}", snapshot.nextep.to_display());
    println!("  REVO:   {}", snapshot.revo.to_display());
    Ok(())
}

async fn quote(config: &BridgeConfig, token: SourceToken, amount: &str) -> Result<()> {
    let oracle = PriceOracle::from_config(
        &config.pricing,
        throttle(config),
        backoff_from_settings(&config.bridge),
    )?;
    let snapshot = oracle.snapshot().await?;

    let units = parse_units(amount, token.decimals())?;
    let token_price = snapshot.price_of(token);
    let usd = usd_value(units, token.decimals(), token_price)?;
    let revo = convert_scaled(
        units,
        token.decimals(),
        token_price,
        snapshot.revo,
        config.destination.decimals,
    )?;

    println!("{} {} at {}", amount, token, token_price.to_display());
    println!("  USD value: {}", usd.to_display());
    println!("  REVO at {}: {}", snapshot.revo.to_display(), format_units(revo, config.destination.decimals));
    Ok(())
}

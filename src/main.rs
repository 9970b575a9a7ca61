use clap::{Args, Parser, Subcommand};
use poly_maker::config::{Config, TradingMode};
use poly_maker::engine::MakerEngine;
use poly_maker::exec::{RealBackend, SandboxBackend, TradingBackend};
use poly_maker::lifecycle::LifecycleManager;
use poly_maker::market::{MarketFeed, StaticFeed};
use poly_maker::reconcile::FillReconciler;
use poly_maker::risk::RiskLedger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Environment variable holding the signing key for real mode
const PRIVATE_KEY_ENV: &str = "POLY_MAKER_PRIVATE_KEY";

#[derive(Parser, Debug)]
#[command(name = "poly-maker")]
#[command(about = "Automated market maker for prediction-market CLOBs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start quoting
    Run(RunArgs),
    /// Show the effective configuration
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Override the configured trading mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Sandbox,
    Real,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;

    let _guard = poly_maker::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            if let Some(mode) = args.mode {
                config.engine.mode = match mode {
                    ModeArg::Sandbox => TradingMode::Sandbox,
                    ModeArg::Real => TradingMode::Real,
                };
                config.validate()?;
            }
            run(config).await
        }
        Commands::Config => {
            println!("Current configuration:");
            println!("  Mode: {:?}", config.engine.mode);
            println!("  Capital: {} USD", config.engine.capital_usd);
            println!("  Aggression: {:?}", config.engine.aggression);
            println!("  Markets: {}", config.feed.markets.len());
            println!(
                "  Risk: MaxExposure={} MaxOrder={} StopLoss={}%",
                config.risk.max_exposure_usd,
                config.risk.max_single_order_usd,
                config.risk.stop_loss_pct * rust_decimal_macros::dec!(100)
            );
            Ok(())
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let feed: Arc<dyn MarketFeed> = Arc::new(StaticFeed::new(config.feed.markets.clone()));

    let backend: Arc<dyn TradingBackend> = match config.engine.mode {
        TradingMode::Sandbox => {
            tracing::info!("starting in sandbox mode");
            Arc::new(SandboxBackend::new(feed.clone(), config.sandbox.clone()))
        }
        TradingMode::Real => {
            tracing::info!("starting in real mode");
            let key = std::env::var(PRIVATE_KEY_ENV)
                .map_err(|_| anyhow::anyhow!("{} must be set in real mode", PRIVATE_KEY_ENV))?;
            Arc::new(RealBackend::connect(config.real.clone(), &key).await?)
        }
    };

    let ledger = Arc::new(Mutex::new(RiskLedger::new(
        config.risk.clone(),
        config.engine.capital_usd,
        config.engine.rebate_rate_bps,
    )));
    let lifecycle = Arc::new(LifecycleManager::new(
        backend.clone(),
        ledger,
        Duration::from_millis(config.engine.backend_timeout_ms),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = FillReconciler::new(
        backend.clone(),
        lifecycle.clone(),
        config.reconciler.clone(),
    );
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown_rx.clone()));

    let engine = MakerEngine::new(
        feed,
        lifecycle,
        config.engine.clone(),
        &config.risk,
    );
    let mut engine_handle = tokio::spawn(engine.run(shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
            engine_handle.await?;
        }
        result = &mut engine_handle => {
            result?;
            tracing::error!("engine halted, shutting down");
            let _ = shutdown_tx.send(true);
        }
    }

    reconciler_handle.await?;
    Ok(())
}

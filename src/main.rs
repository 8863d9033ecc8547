//! Trade Sentinel
//!
//! Binance trading engine with paper/real execution and trailing-stop
//! monitoring.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use trade_sentinel::{
    client::{BinanceClient, MarketDataSource},
    config::Config,
    credentials::ConfigCredentialStore,
    engine::TradingEngine,
    executor::{BinanceExecutor, OrderExecutor, PaperExecutor},
    notify::Notifier,
    portfolio::PortfolioLedger,
    server,
    storage::Database,
    types::TradeMode,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "trade-sentinel")]
#[command(about = "Binance trading engine with paper/real execution and TSL/TP monitoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine with its monitors (and dashboard if configured)
    Run {
        /// Skip the real-mode monitor even if real trading is active
        #[arg(long)]
        paper_only: bool,
    },
    /// Show portfolio summary and open positions
    Status,
    /// Show the latest price for a symbol
    Price { symbol: String },
    /// Test Telegram notification
    TestNotify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run { paper_only } => run_engine(config, paper_only).await,
        Commands::Status => show_status(config).await,
        Commands::Price { symbol } => show_price(config, &symbol).await,
        Commands::TestNotify => test_notify(config).await,
    }
}

async fn build_engine(config: &Config) -> anyhow::Result<(Arc<TradingEngine>, Database, Notifier)> {
    let db_path = shellexpand::tilde(&config.database.path).into_owned();
    let db = Database::connect(&db_path).await?;

    let client = Arc::new(BinanceClient::new(
        &config.binance.rest_url,
        config.binance.recv_window_ms,
    )?);

    let ledger = PortfolioLedger::new(db.clone(), &config.user_id, &config.engine.quote_asset);
    ledger
        .seed_if_empty(config.engine.paper_initial_balance)
        .await?;

    let notifier = match &config.telegram {
        Some(tg) => Notifier::from_config(tg),
        None => {
            tracing::warn!("Telegram not configured, notifications disabled");
            Notifier::disabled()
        }
    };

    let executors: Vec<Arc<dyn OrderExecutor>> = vec![
        Arc::new(PaperExecutor::new(ledger.clone())),
        Arc::new(BinanceExecutor::new(client.clone())),
    ];

    let engine = Arc::new(TradingEngine::new(
        db.clone(),
        client as Arc<dyn MarketDataSource>,
        Arc::new(ConfigCredentialStore::new(config.binance.clone())),
        ledger,
        notifier.clone(),
        executors,
        &config.user_id,
        Duration::from_secs(config.engine.poll_interval_secs),
    ));

    Ok((engine, db, notifier))
}

async fn run_engine(config: Config, paper_only: bool) -> anyhow::Result<()> {
    tracing::info!("Starting trade sentinel");

    let (engine, db, notifier) = build_engine(&config).await?;
    let settings = db.get_user_settings(&config.user_id).await?;

    engine.start_paper_trading_monitor().await;
    let real_monitor = settings.real_trading_active && !paper_only;
    if real_monitor {
        engine.start_real_trading_monitor().await;
    } else if settings.real_trading_active {
        tracing::info!("Real trading active but --paper-only given; real monitor not started");
    }

    if let Some(server_config) = &config.server {
        let engine_for_server = engine.clone();
        let bind_addr = server_config.bind_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(engine_for_server, &bind_addr).await {
                tracing::error!("Dashboard server error: {}", e);
            }
        });
    }

    if let Err(e) = notifier.startup(true, real_monitor).await {
        tracing::warn!("Failed to send startup notification: {}", e);
    }

    tracing::info!("Engine running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    engine.stop_all_monitors().await;
    if let Err(e) = notifier.shutdown().await {
        tracing::warn!("Failed to send shutdown notification: {}", e);
    }

    Ok(())
}

async fn show_status(config: Config) -> anyhow::Result<()> {
    let (engine, db, _notifier) = build_engine(&config).await?;
    let settings = db.get_user_settings(&config.user_id).await?;
    let summary = engine.portfolio_summary().await?;

    println!("\n💰 Portfolio ({})\n", summary.quote_asset);
    println!(
        "Available: {:.2} {}",
        summary.available_balance, summary.quote_asset
    );
    for asset in &summary.assets {
        match asset.value {
            Some(value) => println!(
                "  {:<6} {:>14} (≈ {:.2} {})",
                asset.asset, asset.quantity, value, summary.quote_asset
            ),
            None => println!("  {:<6} {:>14} (unpriced)", asset.asset, asset.quantity),
        }
    }
    println!(
        "Total value: {:.2} {}",
        summary.total_value, summary.quote_asset
    );

    let paper = engine.open_trades(TradeMode::Paper).await?;
    let real = engine.open_trades(TradeMode::Real).await?;
    println!("\n📊 Open positions: {} paper, {} real", paper.len(), real.len());
    for trade in paper.iter().chain(real.iter()) {
        println!(
            "  [{}] {} {} {} @ {} | TP {} | stop {}",
            trade.mode,
            trade.side.as_str(),
            trade.entry_order.executed_quantity,
            trade.symbol,
            trade.entry_order.executed_price,
            trade.take_profit_price,
            trade.current_stop_price,
        );
    }

    println!(
        "\n⚙️  Real trading: {} | trades used: {}/{} | daily risked: {:.2} of {:.2} USD",
        if settings.real_trading_active { "active" } else { "inactive" },
        settings.real_trades_executed_count,
        settings.max_real_trades,
        settings.daily_capital_risked_usd,
        settings.daily_capital_limit_usd(),
    );

    Ok(())
}

async fn show_price(config: Config, symbol: &str) -> anyhow::Result<()> {
    let client = BinanceClient::new(&config.binance.rest_url, config.binance.recv_window_ms)?;
    let price = client.ticker_price(symbol).await?;
    println!("{symbol}: {price}");
    Ok(())
}

async fn test_notify(config: Config) -> anyhow::Result<()> {
    let tg = config
        .telegram
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Telegram not configured in config file"))?;

    let notifier = Notifier::from_config(tg);
    notifier
        .send("🧪 <b>Test notification</b>\n\nIf you see this, Telegram integration is working!")
        .await?;

    println!("✅ Test notification sent!");
    Ok(())
}

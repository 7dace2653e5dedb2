use anyhow::Context;
use clap::{Parser, Subcommand};
use scalpbot::api::BinanceFuturesClient;
use scalpbot::discovery::MarketScanner;
use scalpbot::execution::SessionStats;
use scalpbot::{Credentials, Settings, TradingBot};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scalpbot", version, about = "AI-assisted futures scalping bot")]
struct Cli {
    /// Settings file (TOML). Defaults to ./scalpbot.toml when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading loop until Ctrl+C
    Run,
    /// Print the ranked scalping candidates and exit
    Scan {
        /// Number of candidates to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings).await,
        Command::Scan { limit } => scan(settings, limit).await,
    }
}

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scalpbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let credentials = Credentials::from_env().context("Missing API credentials")?;

    let mut bot = TradingBot::new(settings, &credentials)?;
    bot.start().await.context("Bot failed to start")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("🛑 Shutdown signal received");

    let stats = bot.stop().await;
    print_summary(&stats);
    Ok(())
}

async fn scan(settings: Settings, limit: usize) -> anyhow::Result<()> {
    // Market data endpoints are public, no credentials needed
    let client = BinanceFuturesClient::new(
        settings.exchange.base_url.clone(),
        "",
        "",
        Duration::from_secs(settings.exchange.request_timeout_secs),
    )?;
    let scanner = MarketScanner::new(
        client,
        settings.exchange.quote_asset.clone(),
        settings.scanner.clone(),
        settings.market_data.clone(),
    );

    let candidates = scanner.scan().await;
    if candidates.is_empty() {
        println!("No candidates passed the filter");
        return Ok(());
    }

    println!("{:<16} {:>14} {:>18} {:>9}", "SYMBOL", "PRICE", "QUOTE VOLUME", "24H %");
    for c in candidates.iter().take(limit) {
        println!(
            "{:<16} {:>14.6} {:>18.0} {:>8.2}%",
            c.symbol, c.last_price, c.quote_volume, c.price_change_pct
        );
    }
    Ok(())
}

fn print_summary(stats: &SessionStats) {
    println!("\n📊 Session summary");
    println!("  Trades:    {}", stats.completed_trades);
    println!("  Wins:      {}", stats.wins);
    println!("  Win rate:  {:.1}%", stats.win_rate);
    println!("  Total P&L: ${:.2}", stats.total_pnl);
    if !stats.open_symbols.is_empty() {
        println!("  Still open: {}", stats.open_symbols.join(", "));
    }
}

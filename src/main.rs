use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use oi_divergence_bot::bingx::ClientPool;
use oi_divergence_bot::config::{Config, LoggingConfig};
use oi_divergence_bot::market_data::BinanceMarketData;
use oi_divergence_bot::stats::AccountStats;
use oi_divergence_bot::telegram::{LogNotifier, Notifier, TelegramNotifier};
use oi_divergence_bot::{Scanner, UserStore};

#[derive(Parser)]
#[command(name = "oi-divergence-bot", version, about = "Open interest divergence scanner and BingX executor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the market and trade for subscribers (default)
    Run,
    /// Print account statistics for one subscriber
    Stats {
        /// Subscriber chat id
        #[arg(long)]
        user: String,
    },
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    init_logging(&config.logging);

    let store = Arc::new(UserStore::open(&config.storage.users_file).await?);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, store).await,
        Command::Stats { user } => stats(config, store, &user).await,
    }
}

async fn run(config: Arc<Config>, store: Arc<UserStore>) -> Result<()> {
    info!("🚀 OI Divergence Bot starting...");
    info!("   Market data: {}", config.market_data.base_url);
    info!("   Exchange: {}", config.exchange.rest_url);
    info!("   Subscribers: {}", store.len());

    let notifier: Arc<dyn Notifier> = match (&config.telegram.bot_token, config.telegram.enabled) {
        (Some(token), true) if !token.is_empty() => {
            info!("📱 Telegram notifications enabled");
            Arc::new(TelegramNotifier::new(token.clone(), config.telegram.api_url.clone())?)
        }
        _ => {
            warn!("📱 Telegram disabled or bot_token missing, messages go to the log");
            Arc::new(LogNotifier)
        }
    };

    let market = Arc::new(BinanceMarketData::new(&config.market_data)?);
    let gateways = Arc::new(ClientPool::new(config.exchange.clone()));
    let scanner = Scanner::new(config.scanner.clone(), market, store, notifier, gateways);
    info!("✅ All components initialized");

    tokio::select! {
        _ = scanner.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    let outcomes = scanner.join_pending().await;
    if !outcomes.is_empty() {
        info!("Waited for {} in-flight executions", outcomes.len());
    }

    info!("👋 Bot stopped");
    Ok(())
}

async fn stats(config: Arc<Config>, store: Arc<UserStore>, user_id: &str) -> Result<()> {
    let user = store
        .get(user_id)
        .with_context(|| format!("unknown subscriber {}", user_id))?;

    let pool = ClientPool::new(config.exchange.clone());
    let client = pool.client_for(&user).await?;
    let stats = AccountStats::collect(&*client).await?;

    println!("{}", stats.to_message());
    Ok(())
}

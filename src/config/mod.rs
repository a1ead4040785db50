use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_testnet_rest_url")]
    pub testnet_rest_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            testnet_rest_url: default_testnet_rest_url(),
            request_timeout_secs: default_request_timeout_secs(),
            recv_window_ms: default_recv_window_ms(),
        }
    }
}

impl ExchangeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_rest_url() -> String { "https://open-api.bingx.com".to_string() }
fn default_testnet_rest_url() -> String { "https://open-api-vst.bingx.com".to_string() }
fn default_request_timeout_secs() -> u64 { 10 }
fn default_recv_window_ms() -> u64 { 5000 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketDataConfig {
    #[serde(default = "default_market_data_url")]
    pub base_url: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: default_market_data_url(),
            requests_per_minute: default_requests_per_minute(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_market_data_url() -> String { "https://fapi.binance.com".to_string() }
fn default_requests_per_minute() -> u32 { 1200 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_min_sleep_secs")]
    pub min_sleep_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_oi_4h_threshold")]
    pub oi_4h_threshold: f64,
    #[serde(default = "default_oi_24h_threshold")]
    pub oi_24h_threshold: f64,
    /// Floor on open interest value in USDT; thinner instruments never signal
    #[serde(default = "default_min_oi_usdt")]
    pub min_oi_usdt: f64,
    /// Number of 5-minute points in the short window
    #[serde(default = "default_window_4h")]
    pub window_4h: usize,
    /// Number of 5-minute points in the long window
    #[serde(default = "default_window_24h")]
    pub window_24h: usize,
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,
    #[serde(default = "default_volume_period")]
    pub volume_period: usize,
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            min_sleep_secs: default_min_sleep_secs(),
            workers: default_workers(),
            oi_4h_threshold: default_oi_4h_threshold(),
            oi_24h_threshold: default_oi_24h_threshold(),
            min_oi_usdt: default_min_oi_usdt(),
            window_4h: default_window_4h(),
            window_24h: default_window_24h(),
            cooldown_hours: default_cooldown_hours(),
            volume_period: default_volume_period(),
            max_concurrent_executions: default_max_concurrent_executions(),
        }
    }
}

fn default_interval_secs() -> u64 { 60 }
fn default_min_sleep_secs() -> u64 { 60 }
fn default_workers() -> usize { 5 }
fn default_oi_4h_threshold() -> f64 { 10.0 }
fn default_oi_24h_threshold() -> f64 { 16.0 }
fn default_min_oi_usdt() -> f64 { 500_000.0 }
fn default_window_4h() -> usize { 48 }
fn default_window_24h() -> usize { 288 }
fn default_cooldown_hours() -> i64 { 3 }
fn default_volume_period() -> usize { 60 }
fn default_max_concurrent_executions() -> usize { 16 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_enabled")]
    pub enabled: bool,
    pub bot_token: Option<String>,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: default_telegram_enabled(),
            bot_token: None,
            api_url: default_telegram_api_url(),
        }
    }
}

fn default_telegram_enabled() -> bool { true }
fn default_telegram_api_url() -> String { "https://api.telegram.org".to_string() }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_users_file")]
    pub users_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { users_file: default_users_file() }
    }
}

fn default_users_file() -> PathBuf { PathBuf::from("users.json") }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String { "info".to_string() }

impl Config {
    pub fn load() -> Result<Arc<Self>> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("BOT").separator("__"));

        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            builder = builder.set_override("telegram.bot_token", token)?;
        }

        let config = builder.build()?;
        Ok(Arc::new(config.try_deserialize()?))
    }
}

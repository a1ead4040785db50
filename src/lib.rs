pub mod config;
pub mod bingx;
pub mod market_data;
pub mod strategy;
pub mod risk;
pub mod execution;
pub mod users;
pub mod telegram;
pub mod scanner;
pub mod stats;

pub use config::Config;
pub use bingx::{BingxClient, ClientPool, Symbol};
pub use execution::{ExecutionOutcome, OrderSequencer};
pub use scanner::Scanner;
pub use telegram::{LogNotifier, Notifier, TelegramNotifier};
pub use users::{UserStore, UserTradingConfig};

pub mod types;
pub mod auth;
pub mod client;
pub mod pool;

pub use types::Symbol;
pub use auth::BingxAuth;
pub use client::BingxClient;
pub use pool::{ClientPool, Network};

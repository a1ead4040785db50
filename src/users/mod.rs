use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bingx::{Network, Symbol};

/// Subscribers are keyed by their Telegram chat id
pub type UserId = String;

/// Per-subscriber settings as kept in `users.json`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UserTradingConfig {
    #[serde(default)]
    pub trading_enabled: bool,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default = "default_margin_usdt")]
    pub margin_usdt: f64,
    #[serde(default = "default_true")]
    pub signals_4h_enabled: bool,
    #[serde(default = "default_true")]
    pub signals_24h_enabled: bool,
    /// Maximum tolerated price growth per unit of OI growth
    #[serde(default = "default_price_oi_ratio")]
    pub price_oi_ratio: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_take_profit_pcts")]
    pub take_profit_pcts: Vec<f64>,
    #[serde(default)]
    pub trailing_enabled: bool,
    #[serde(default = "default_trailing_activation_pct")]
    pub trailing_activation_pct: f64,
    #[serde(default = "default_trailing_rate_pct")]
    pub trailing_rate_pct: f64,
    #[serde(default)]
    pub volume_filter_enabled: bool,
    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: f64,
    #[serde(default)]
    pub blacklist: BTreeSet<Symbol>,
    /// Last accepted signal per symbol, naive UTC
    #[serde(default)]
    pub last_signal_time: HashMap<Symbol, NaiveDateTime>,
}

fn default_leverage() -> u32 { 10 }
fn default_margin_usdt() -> f64 { 50.0 }
fn default_true() -> bool { true }
fn default_price_oi_ratio() -> f64 { 0.5 }
fn default_stop_loss_pct() -> f64 { 2.0 }
fn default_take_profit_pcts() -> Vec<f64> { vec![4.0, 6.0] }
fn default_trailing_activation_pct() -> f64 { 1.5 }
fn default_trailing_rate_pct() -> f64 { 0.5 }
fn default_volume_multiplier() -> f64 { 2.0 }

impl Default for UserTradingConfig {
    fn default() -> Self {
        Self {
            trading_enabled: false,
            testnet: false,
            api_key: String::new(),
            api_secret: String::new(),
            leverage: default_leverage(),
            margin_usdt: default_margin_usdt(),
            signals_4h_enabled: true,
            signals_24h_enabled: true,
            price_oi_ratio: default_price_oi_ratio(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pcts: default_take_profit_pcts(),
            trailing_enabled: false,
            trailing_activation_pct: default_trailing_activation_pct(),
            trailing_rate_pct: default_trailing_rate_pct(),
            volume_filter_enabled: false,
            volume_multiplier: default_volume_multiplier(),
            blacklist: BTreeSet::new(),
            last_signal_time: HashMap::new(),
        }
    }
}

impl UserTradingConfig {
    pub fn network(&self) -> Network {
        if self.testnet {
            Network::Testnet
        } else {
            Network::Production
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    pub fn is_blacklisted(&self, symbol: &Symbol) -> bool {
        self.blacklist.contains(symbol)
    }
}

/// JSON-file backed subscriber store.
///
/// Each mutation runs under the lock of that subscriber's map entry, so two
/// tasks can never interleave a read-modify-write on the same record. The
/// file is rewritten after every mutation; writes are serialized.
pub struct UserStore {
    path: PathBuf,
    users: DashMap<UserId, UserTradingConfig>,
    write_lock: Mutex<()>,
}

impl UserStore {
    /// Loads `path`; a missing file yields an empty store, a corrupted one is
    /// logged and replaced on the next write.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let users = DashMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<HashMap<UserId, UserTradingConfig>>(&content) {
                Ok(loaded) => {
                    for (id, cfg) in loaded {
                        users.insert(id, cfg);
                    }
                }
                Err(e) => error!("Corrupted {}, starting fresh: {}", path.display(), e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        }

        info!("👥 Loaded {} subscribers from {}", users.len(), path.display());

        Ok(Self {
            path,
            users,
            write_lock: Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn get(&self, user_id: &str) -> Option<UserTradingConfig> {
        self.users.get(user_id).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of every subscriber
    pub fn snapshot(&self) -> Vec<(UserId, UserTradingConfig)> {
        self.users
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub async fn upsert(&self, user_id: &str, config: UserTradingConfig) -> Result<()> {
        let previous = self.users.insert(user_id.to_string(), config.clone());
        if let Err(e) = self.persist().await {
            self.rollback(user_id, &config, previous);
            return Err(e);
        }
        Ok(())
    }

    pub async fn remove(&self, user_id: &str) -> Result<bool> {
        let Some((id, removed)) = self.users.remove(user_id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist().await {
            self.users.entry(id).or_insert(removed);
            return Err(e);
        }
        Ok(true)
    }

    /// Applies `f` to one subscriber under its entry lock, then persists.
    /// Returns `None` if the subscriber does not exist. If the write fails
    /// the in-memory record is restored so memory never runs ahead of disk.
    pub async fn update<R>(
        &self,
        user_id: &str,
        f: impl FnOnce(&mut UserTradingConfig) -> R,
    ) -> Result<Option<R>> {
        let (previous, updated, result) = match self.users.get_mut(user_id) {
            Some(mut entry) => {
                let previous = entry.value().clone();
                let result = f(entry.value_mut());
                (previous, entry.value().clone(), result)
            }
            None => return Ok(None),
        };
        if let Err(e) = self.persist().await {
            self.rollback(user_id, &updated, Some(previous));
            return Err(e);
        }
        Ok(Some(result))
    }

    /// Puts `previous` back unless another writer replaced `written` meanwhile
    fn rollback(&self, user_id: &str, written: &UserTradingConfig, previous: Option<UserTradingConfig>) {
        let unchanged = self
            .users
            .get(user_id)
            .map(|entry| entry.value() == written)
            .unwrap_or(false);
        if !unchanged {
            return;
        }
        match previous {
            Some(previous) => {
                self.users.insert(user_id.to_string(), previous);
            }
            None => {
                self.users.remove(user_id);
            }
        }
        warn!("↩️ Write failed, reverted in-memory record for {}", user_id);
    }

    pub async fn blacklist_add(&self, user_id: &str, symbol: &Symbol) -> Result<bool> {
        let added = self
            .update(user_id, |cfg| cfg.blacklist.insert(symbol.clone()))
            .await?;
        Ok(added.unwrap_or(false))
    }

    pub async fn blacklist_remove(&self, user_id: &str, symbol: &Symbol) -> Result<bool> {
        let removed = self
            .update(user_id, |cfg| cfg.blacklist.remove(symbol))
            .await?;
        Ok(removed.unwrap_or(false))
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let ordered: BTreeMap<UserId, UserTradingConfig> = self
            .users
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let body = serde_json::to_string_pretty(&ordered)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;

        Ok(())
    }
}

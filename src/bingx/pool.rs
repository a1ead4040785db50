use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

use super::auth::BingxAuth;
use super::client::BingxClient;
use crate::config::ExchangeConfig;
use crate::execution::gateway::{ExchangeGateway, GatewayProvider};
use crate::users::UserTradingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Production,
    Testnet,
}

/// Cache key; the secret is kept only as a digest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CredentialKey {
    api_key: String,
    secret_digest: String,
    network: Network,
}

impl CredentialKey {
    fn for_user(user: &UserTradingConfig) -> Self {
        Self {
            api_key: user.api_key.clone(),
            secret_digest: hex::encode(Sha256::digest(user.api_secret.as_bytes())),
            network: user.network(),
        }
    }
}

/// One connected client per credential set, so the server-clock offset is
/// measured once and reused by every execution for that subscriber.
pub struct ClientPool {
    config: ExchangeConfig,
    clients: DashMap<CredentialKey, Arc<BingxClient>>,
}

impl ClientPool {
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    fn rest_url(&self, network: Network) -> String {
        match network {
            Network::Production => self.config.rest_url.clone(),
            Network::Testnet => self.config.testnet_rest_url.clone(),
        }
    }

    pub async fn client_for(&self, user: &UserTradingConfig) -> anyhow::Result<Arc<BingxClient>> {
        if !user.has_credentials() {
            anyhow::bail!("API credentials are not configured");
        }

        let key = CredentialKey::for_user(user);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let auth = BingxAuth::new(user.api_key.clone(), user.api_secret.clone());
        let client = BingxClient::connect(
            self.rest_url(key.network),
            auth,
            self.config.request_timeout(),
            self.config.recv_window_ms,
        )
        .await?;
        info!("🔑 BingX client ready ({:?}, clock offset {}ms)", key.network, client.auth().time_offset());

        // a rotated secret retires the client signing with the old one
        self.clients.retain(|cached, _| {
            cached.api_key != key.api_key || cached.network != key.network || cached.secret_digest == key.secret_digest
        });

        Ok(self.clients.entry(key).or_insert_with(|| Arc::new(client)).clone())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl GatewayProvider for ClientPool {
    async fn gateway_for(&self, user: &UserTradingConfig) -> anyhow::Result<Arc<dyn ExchangeGateway>> {
        let gateway: Arc<dyn ExchangeGateway> = self.client_for(user).await?;
        Ok(gateway)
    }
}

use std::time::Duration;

use crate::core::cache::ResponseCache;
use crate::core::clients::http_client::UpstreamClient;
use crate::core::config::{AppConfig, Credentials};
use crate::core::error::ProxyError;

pub struct AppContext {
    pub config: AppConfig,
    pub credentials: Credentials,
    pub client: UpstreamClient,
    pub tvl_cache: ResponseCache,
}

impl AppContext {
    pub fn new(config: AppConfig, credentials: Credentials) -> Result<Self, reqwest::Error> {
        let client = UpstreamClient::new(
            Duration::from_secs(config.upstreams.timeout_seconds),
            &config.upstreams.user_agent,
        )?;
        let tvl_cache = ResponseCache::new(Duration::from_secs(config.cache.ttl_seconds));
        Ok(Self {
            config,
            credentials,
            client,
            tvl_cache,
        })
    }

    /// Glacier key, required by every Avalanche call
    pub fn glacier_key(&self) -> Result<&str, ProxyError> {
        self.credentials
            .glacier
            .as_deref()
            .ok_or_else(|| ProxyError::missing_credential("GLACIER_API_KEY"))
    }

    /// DefiLlama key, required by the pro-only TVL summary
    pub fn llama_key(&self) -> Result<&str, ProxyError> {
        self.credentials
            .llama
            .as_deref()
            .ok_or_else(|| ProxyError::missing_credential("LLAMA_API_KEY"))
    }

    pub fn beaconchain_key(&self) -> Option<&str> {
        self.credentials.beaconchain.as_deref()
    }
}

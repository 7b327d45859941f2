use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

/// Top-level config struct for the proxy
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub upstreams: UpstreamsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// General configuration for the proxy
#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            listen: ListenConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListenConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            path: default_metrics_path(),
        }
    }
}

/// Base URLs and timeouts for every third-party provider
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamsConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub beaconchain: BeaconchainConfig,
    #[serde(default)]
    pub glacier: GlacierConfig,
    #[serde(default)]
    pub llama: LlamaConfig,
    #[serde(default)]
    pub validatorqueue: ValidatorQueueConfig,
}

impl Default for UpstreamsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            user_agent: default_user_agent(),
            beaconchain: BeaconchainConfig::default(),
            glacier: GlacierConfig::default(),
            llama: LlamaConfig::default(),
            validatorqueue: ValidatorQueueConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BeaconchainConfig {
    #[serde(default = "default_beaconchain_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for BeaconchainConfig {
    fn default() -> Self {
        Self {
            url: default_beaconchain_url(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GlacierConfig {
    /// Candidate hosts, tried in order
    #[serde(default = "default_glacier_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_glacier_network")]
    pub network: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for GlacierConfig {
    fn default() -> Self {
        Self {
            urls: default_glacier_urls(),
            network: default_glacier_network(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlamaConfig {
    #[serde(default = "default_llama_pro_url")]
    pub pro_url: String,
    #[serde(default = "default_llama_open_url")]
    pub open_url: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for LlamaConfig {
    fn default() -> Self {
        Self {
            pro_url: default_llama_pro_url(),
            open_url: default_llama_open_url(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidatorQueueConfig {
    #[serde(default = "default_validatorqueue_url")]
    pub url: String,
}

impl Default for ValidatorQueueConfig {
    fn default() -> Self {
        Self {
            url: default_validatorqueue_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
        }
    }
}

pub const MIN_CACHE_TTL_SECONDS: u64 = 60;
pub const MAX_CACHE_TTL_SECONDS: u64 = 300;

impl AppConfig {
    /// Checks the loaded config once at startup and clamps the cache TTL into its allowed window
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.general.listen.address.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "general.listen.address",
                "must not be empty".to_string(),
            ));
        }
        if !self.general.metrics.path.starts_with('/') {
            return Err(ConfigError::InvalidValue(
                "general.metrics.path",
                format!("must start with '/', got: {}", self.general.metrics.path),
            ));
        }
        if self.upstreams.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "upstreams.timeout_seconds",
                "must be greater than zero".to_string(),
            ));
        }
        if self.upstreams.glacier.urls.is_empty() {
            return Err(ConfigError::InvalidValue(
                "upstreams.glacier.urls",
                "at least one host is required".to_string(),
            ));
        }

        let urls = [
            ("upstreams.beaconchain.url", &self.upstreams.beaconchain.url),
            ("upstreams.llama.pro_url", &self.upstreams.llama.pro_url),
            ("upstreams.llama.open_url", &self.upstreams.llama.open_url),
            ("upstreams.validatorqueue.url", &self.upstreams.validatorqueue.url),
        ];
        for (name, url) in urls
            .into_iter()
            .chain(self.upstreams.glacier.urls.iter().map(|u| ("upstreams.glacier.urls", u)))
        {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue(name, url.clone()));
            }
        }

        self.cache.ttl_seconds = self
            .cache
            .ttl_seconds
            .clamp(MIN_CACHE_TTL_SECONDS, MAX_CACHE_TTL_SECONDS);

        Ok(self)
    }
}

/// Server-side provider credentials. Never serialised back to clients.
#[derive(Clone, Default)]
pub struct Credentials {
    pub beaconchain: Option<String>,
    pub glacier: Option<String>,
    pub llama: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("beaconchain", &self.beaconchain.is_some())
            .field("glacier", &self.glacier.is_some())
            .field("llama", &self.llama.is_some())
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials, preferring environment variables over the config file
    pub fn resolve(config: &AppConfig) -> Self {
        Self::resolve_with(config, |name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(config: &AppConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).and_then(non_blank))
        };

        Self {
            beaconchain: from_env(&["BEACONCHA_IN_API_KEY"])
                .or_else(|| non_blank(config.upstreams.beaconchain.api_key.clone())),
            glacier: from_env(&["GLACIER_API_KEY"])
                .or_else(|| non_blank(config.upstreams.glacier.api_key.clone())),
            llama: from_env(&["LLAMA_API_KEY", "VITE_LLAMA_API_KEY"])
                .or_else(|| non_blank(config.upstreams.llama.api_key.clone())),
        }
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn default_network() -> String {
    "mainnet".to_string()
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8788
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_timeout_seconds() -> u64 {
    15
}

fn default_user_agent() -> String {
    "gotnodes/1.0 (+https://gotnodes.xyz)".to_string()
}

fn default_beaconchain_url() -> String {
    "https://beaconcha.in".to_string()
}

fn default_glacier_urls() -> Vec<String> {
    vec![
        "https://glacier-api.avax.network".to_string(),
        "https://data-api.avax.network".to_string(),
    ]
}

fn default_glacier_network() -> String {
    "mainnet".to_string()
}

fn default_llama_pro_url() -> String {
    "https://pro-api.llama.fi".to_string()
}

fn default_llama_open_url() -> String {
    "https://api.llama.fi".to_string()
}

fn default_validatorqueue_url() -> String {
    "https://www.validatorqueue.com".to_string()
}

fn default_cache_ttl() -> u64 {
    120 // 2 minutes, same as the TVL panel refresh cadence
}

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref PROXY_REGISTRY: Registry = Registry::new();
    pub static ref UPSTREAM_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("gotnodes_upstream_requests", "gotnodes proxy upstream requests"),
        &["provider", "status_code"]
    )
    .unwrap();
    pub static ref PROXY_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("gotnodes_proxy_requests", "gotnodes proxy client requests"),
        &["route", "status_code"]
    )
    .unwrap();
    pub static ref TVL_CACHE_LOOKUPS: CounterVec = CounterVec::new(
        Opts::new("gotnodes_tvl_cache_hits", "gotnodes chain-TVL cache lookups"),
        &["result"]
    )
    .unwrap();
    pub static ref APP_VERSION_INFO: IntGaugeVec = IntGaugeVec::new(
        Opts::new("app_version_info", "gotnodes proxy build information"),
        &["version", "commit_hash", "build_date", "network"]
    )
    .unwrap();
}

/// Registers every proxy metric. Safe to call more than once.
pub fn register_proxy_metrics() {
    PROXY_REGISTRY
        .register(Box::new(UPSTREAM_REQUESTS.clone()))
        .ok();
    PROXY_REGISTRY
        .register(Box::new(PROXY_REQUESTS.clone()))
        .ok();
    PROXY_REGISTRY
        .register(Box::new(TVL_CACHE_LOOKUPS.clone()))
        .ok();
    PROXY_REGISTRY
        .register(Box::new(APP_VERSION_INFO.clone()))
        .ok();
}

pub fn register_app_version_info(network: &str) {
    APP_VERSION_INFO
        .with_label_values(&[
            env!("CARGO_PKG_VERSION"),
            env!("GIT_COMMIT_HASH"),
            env!("BUILD_DATE"),
            network,
        ])
        .set(1);
}

/// Prometheus text exposition of the proxy registry
pub fn gather_metrics() -> (String, Vec<u8>) {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&PROXY_REGISTRY.gather(), &mut buffer) {
        error!("(Metrics) Could not encode metrics: {}", e);
    }
    (encoder.format_type().to_string(), buffer)
}

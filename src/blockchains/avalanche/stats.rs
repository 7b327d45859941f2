use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::blockchains::avalanche::validators::glacier_candidates;
use crate::blockchains::types::{Chain, ChainStats};
use crate::core::app_context::AppContext;
use crate::core::clients::http_client::host_label;
use crate::core::error::{ProxyError, UpstreamError};
use crate::core::fallback::{run_with_fallback, Source};
use crate::core::normalize::{first_number, lookup};
use crate::core::units::{format_avax_display, parse_base_units};
use crate::core::utils::now_ms;

/// Network summary from one or more Glacier hosts, first answer wins
pub struct GlacierNetworkStats<'a> {
    app_context: &'a AppContext,
    key: &'a str,
    hosts: &'a [String],
}

impl<'a> GlacierNetworkStats<'a> {
    pub fn new(app_context: &'a AppContext, key: &'a str, hosts: &'a [String]) -> Self {
        Self {
            app_context,
            key,
            hosts,
        }
    }
}

#[async_trait]
impl Source<ChainStats> for GlacierNetworkStats<'_> {
    fn name(&self) -> String {
        self.hosts
            .first()
            .map(|h| host_label(h))
            .unwrap_or_default()
    }

    async fn fetch(&self) -> Result<ChainStats, UpstreamError> {
        let path = format!(
            "/v1/networks/{}",
            urlencoding::encode(&self.app_context.config.upstreams.glacier.network)
        );
        let candidates = glacier_candidates(self.hosts, self.key, &path);

        let (idx, payload) = self
            .app_context
            .client
            .fetch_first_json(&candidates, |json| lookup(json, "validatorDetails").is_some())
            .await?;

        let mut stats = network_stats(&payload, now_ms());
        stats.source = self.hosts.get(idx).map(|h| host_label(h)).unwrap_or_default();
        Ok(stats)
    }
}

fn network_stats(payload: &Value, ts: i64) -> ChainStats {
    let mut stats = ChainStats::empty(Chain::Avalanche, ts);
    stats.active_validators = first_number(payload, &["validatorDetails.validatorCount"])
        .filter(|n| *n >= 0.0)
        .map(|n| n as u64);
    stats.total_staked = lookup(payload, "validatorDetails.totalAmountStaked")
        .and_then(parse_base_units)
        .map(format_avax_display);
    stats.delegators = first_number(payload, &["delegatorDetails.delegatorCount"])
        .filter(|n| *n >= 0.0)
        .map(|n| n as u64);
    stats
}

/// chain-stats(avalanche). The first host is primary, the rest form the fallback.
pub async fn fetch_stats(app_context: &AppContext) -> Result<ChainStats, ProxyError> {
    let key = app_context.glacier_key()?;
    let hosts = &app_context.config.upstreams.glacier.urls;
    let (first, rest) = hosts
        .split_first()
        .ok_or_else(|| ProxyError::Configuration("no Glacier hosts configured".to_string()))?;

    let primary = GlacierNetworkStats::new(app_context, key, std::slice::from_ref(first));
    let remaining = GlacierNetworkStats::new(app_context, key, rest);
    let fallback: Option<&dyn Source<ChainStats>> = if rest.is_empty() {
        None
    } else {
        Some(&remaining)
    };

    let sourced = run_with_fallback::<ChainStats>("Avalanche Stats", &primary, fallback).await?;
    let mut stats = sourced.value;
    if stats.source.is_empty() {
        stats.source = sourced.source;
    }
    info!("(Avalanche Stats) Served from {} ({:?})", stats.source, sourced.state);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Credentials;
    use crate::core::testing::{stub_config, stub_context, StubResponse, StubUpstream};
    use serde_json::json;

    fn glacier() -> Credentials {
        Credentials {
            glacier: Some("gk".to_string()),
            ..Credentials::default()
        }
    }

    #[tokio::test]
    async fn test_network_summary() {
        let stub = StubUpstream::start(|req| {
            if req.path == "/v1/networks/mainnet" {
                StubResponse::json(
                    200,
                    json!({ "validatorDetails": { "validatorCount": 1200, "totalAmountStaked": "250000000000000000" } }),
                )
            } else {
                StubResponse::text(404, "unexpected")
            }
        })
        .await;
        let ctx = stub_context(stub_config(&stub.base_url()), glacier());

        let stats = fetch_stats(&ctx).await.unwrap();
        assert_eq!(stats.chain, Chain::Avalanche);
        assert_eq!(stats.active_validators, Some(1200));
        assert_eq!(stats.total_staked.as_deref(), Some("250,000,000.00 AVAX"));
        assert_eq!(stats.source, host_label(&stub.base_url()));

        let json = serde_json::to_value(&stats).unwrap();
        assert!(json["apr"].is_null());
        assert!(json["entryQueue"].is_null());
        assert!(json["exitQueue"].is_null());
        assert!(json["churnLimit"].is_null());
        assert!(json.get("delegators").is_none());
    }

    #[tokio::test]
    async fn test_second_host_serves_when_first_fails() {
        let stub = StubUpstream::start(|req| {
            if req.path.starts_with("/a/") {
                StubResponse::text(503, "unavailable")
            } else {
                StubResponse::json(
                    200,
                    json!({ "validatorDetails": { "validatorCount": 5 }, "delegatorDetails": { "delegatorCount": 40 } }),
                )
            }
        })
        .await;
        let mut config = stub_config(&stub.base_url());
        config.upstreams.glacier.urls = vec![stub.url("/a"), stub.url("/b")];
        let ctx = stub_context(config, glacier());

        let stats = fetch_stats(&ctx).await.unwrap();
        assert_eq!(stats.source, host_label(&stub.url("/b")));
        assert_eq!(stats.delegators, Some(40));
        assert!(stats.total_staked.is_none());
        assert_eq!(stub.hit_count("/a/"), 1);
        assert_eq!(stub.hit_count("/b/"), 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let ctx = stub_context(stub_config("http://127.0.0.1:9"), Credentials::default());
        let err = fetch_stats(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }
}

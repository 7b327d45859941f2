use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::blockchains::types::{round2, Chain, ChainStats};
use crate::core::app_context::AppContext;
use crate::core::clients::http_client::{construct_url, Provider, UpstreamRequest};
use crate::core::error::{ProxyError, UpstreamError};
use crate::core::fallback::{run_with_fallback, Source};
use crate::core::normalize::{first_capture, first_number, lookup, parse_number, to_number};
use crate::core::units::{format_eth_total, group_thousands, parse_base_units};
use crate::core::utils::now_ms;

lazy_static! {
    static ref ACTIVE_VALIDATORS: Vec<Regex> = vec![
        Regex::new(r"(?i)active validators[:\s]*([\d,]+)").unwrap(),
        Regex::new(r"(?i)([\d,]+)\s*active validators").unwrap(),
        Regex::new(r"(?i)validators[:\s]+([\d,]{5,})").unwrap(),
    ];
    static ref STAKED_ETH: Vec<Regex> = vec![
        Regex::new(r"(?i)(?:total )?staked(?: eth)?[:\s]*([\d,]+(?:\.\d+)?)\s*eth").unwrap(),
        Regex::new(r"(?i)([\d,]+(?:\.\d+)?)\s*eth staked").unwrap(),
    ];
    static ref APR: Vec<Regex> = vec![
        Regex::new(r"(?i)\bapr[:\s]*([\d.]+)\s*%").unwrap(),
        Regex::new(r"(?i)([\d.]+)\s*%\s*apr").unwrap(),
    ];
    static ref ENTRY_QUEUE: Vec<Regex> = vec![
        Regex::new(r"(?i)entry queue[:\s]*([\d,]+\s*(?:validators|eth))").unwrap(),
        Regex::new(r"(?i)entry queue[:\s]*([\d,]+)").unwrap(),
    ];
    static ref EXIT_QUEUE: Vec<Regex> = vec![
        Regex::new(r"(?i)exit queue[:\s]*([\d,]+\s*(?:validators|eth))").unwrap(),
        Regex::new(r"(?i)exit queue[:\s]*([\d,]+)").unwrap(),
    ];
    static ref CHURN_LIMIT: Vec<Regex> = vec![
        Regex::new(r"(?i)churn limit[:\s]*([\d,]+(?:\.\d+)?\s*(?:eth|validators)?(?:\s*(?:/|per)\s*(?:epoch|day))?)").unwrap(),
    ];
}

/// beaconcha.in: epoch summary and queue are required, ethstore APR is optional
pub struct BeaconchainStats<'a> {
    app_context: &'a AppContext,
}

impl<'a> BeaconchainStats<'a> {
    pub fn new(app_context: &'a AppContext) -> Self {
        Self { app_context }
    }

    fn request(&self, path: &str) -> UpstreamRequest {
        UpstreamRequest::get(
            Provider::Beaconchain,
            construct_url(&self.app_context.config.upstreams.beaconchain.url, path),
        )
        .bearer(self.app_context.beaconchain_key())
    }
}

#[async_trait]
impl Source<ChainStats> for BeaconchainStats<'_> {
    fn name(&self) -> String {
        Provider::Beaconchain.label().to_string()
    }

    async fn fetch(&self) -> Result<ChainStats, UpstreamError> {
        let epoch_request = self.request("/api/v1/epoch/latest");
        let queue_request = self.request("/api/v1/validators/queue");
        let ethstore_request = self.request("/api/v1/ethstore/latest");

        let client = &self.app_context.client;
        let (epoch, queue, ethstore) = tokio::join!(
            client.fetch_json(&epoch_request),
            client.fetch_json(&queue_request),
            client.fetch_json(&ethstore_request)
        );
        let epoch = epoch?;
        let queue = queue?;
        let ethstore = match ethstore {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("(Ethereum Stats) ethstore unavailable, APR left empty: {}", e);
                None
            }
        };

        let stats = beaconchain_stats(&epoch, &queue, ethstore.as_ref(), now_ms());
        if !stats.has_any_field() {
            return Err(UpstreamError::schema(
                epoch_request.display_url(),
                "epoch and queue responses carried no known fields",
            ));
        }
        Ok(stats)
    }
}

fn beaconchain_stats(epoch: &Value, queue: &Value, ethstore: Option<&Value>, ts: i64) -> ChainStats {
    let mut stats = ChainStats::empty(Chain::Ethereum, ts);

    stats.active_validators = lookup(epoch, "data.validatorscount")
        .or_else(|| lookup(queue, "data.validatorscount"))
        .and_then(to_number)
        .filter(|n| *n >= 0.0)
        .map(|n| n as u64);
    stats.total_staked = lookup(epoch, "data.eligibleether")
        .and_then(parse_base_units)
        .map(format_eth_total);
    stats.entry_queue = first_number(queue, &["data.beaconchain_entering"]).map(validators_text);
    stats.exit_queue = first_number(queue, &["data.beaconchain_exiting"]).map(validators_text);
    stats.apr = ethstore
        .and_then(|payload| first_number(payload, &["data.apr", "apr"]))
        .map(|fraction| round2(fraction * 100.0));
    stats.source = Provider::Beaconchain.label().to_string();
    stats
}

fn validators_text(count: f64) -> String {
    format!("{} validators", group_thousands(&format!("{:.0}", count)))
}

/// validatorqueue.com page scrape
pub struct ValidatorQueueStats<'a> {
    app_context: &'a AppContext,
}

impl<'a> ValidatorQueueStats<'a> {
    pub fn new(app_context: &'a AppContext) -> Self {
        Self { app_context }
    }
}

#[async_trait]
impl Source<ChainStats> for ValidatorQueueStats<'_> {
    fn name(&self) -> String {
        Provider::ValidatorQueue.label().to_string()
    }

    async fn fetch(&self) -> Result<ChainStats, UpstreamError> {
        let request = UpstreamRequest::get(
            Provider::ValidatorQueue,
            self.app_context.config.upstreams.validatorqueue.url.clone(),
        );
        let text = self.app_context.client.fetch_page_text(&request).await?;
        let stats = scraped_stats(&text, now_ms());
        if !stats.has_any_field() {
            return Err(UpstreamError::schema(
                request.display_url(),
                "no known fields found on the validator queue page",
            ));
        }
        Ok(stats)
    }
}

/// Missing fields stay `None`; nothing is defaulted to zero
fn scraped_stats(text: &str, ts: i64) -> ChainStats {
    let mut stats = ChainStats::empty(Chain::Ethereum, ts);
    stats.active_validators = first_capture(text, &ACTIVE_VALIDATORS)
        .and_then(|s| parse_number(&s))
        .map(|n| n as u64);
    stats.total_staked = first_capture(text, &STAKED_ETH)
        .and_then(|s| parse_number(&s))
        .map(|n| format!("{} ETH", group_thousands(&format!("{:.2}", n))));
    stats.apr = first_capture(text, &APR)
        .and_then(|s| parse_number(&s))
        .map(round2);
    stats.entry_queue = first_capture(text, &ENTRY_QUEUE);
    stats.exit_queue = first_capture(text, &EXIT_QUEUE);
    stats.churn_limit = first_capture(text, &CHURN_LIMIT);
    stats.source = Provider::ValidatorQueue.label().to_string();
    stats
}

/// chain-stats(ethereum)
pub async fn fetch_stats(app_context: &AppContext) -> Result<ChainStats, ProxyError> {
    let primary = BeaconchainStats::new(app_context);
    let fallback = ValidatorQueueStats::new(app_context);

    let sourced = run_with_fallback::<ChainStats>(
        "Ethereum Stats",
        &primary,
        Some(&fallback as &dyn Source<ChainStats>),
    )
    .await?;

    let mut stats = sourced.value;
    stats.source = sourced.source;
    info!(
        "(Ethereum Stats) Served from {} ({:?})",
        stats.source, sourced.state
    );
    Ok(stats)
}

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::blockchains::types::{round2, Chain};
use crate::core::app_context::AppContext;
use crate::core::error::{ProxyError, UpstreamError};
use crate::core::normalize::{first_number, first_text, lookup, to_number};
use crate::core::utils::{now_ms, tail};
use crate::defillama::pro_request;

const SUMMARY_WINDOW: usize = 30;
const WEEK_LOOKBACK: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TvlFigures {
    pub current: Option<f64>,
    pub change7d_pct: Option<f64>,
    pub change30d_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeesSummary {
    #[serde(rename = "totalFees24h")]
    pub total_fees_24h: Option<f64>,
    #[serde(rename = "totalRevenue24h")]
    pub total_revenue_24h: Option<f64>,
    pub change_1d: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LargestStablecoin {
    pub name: String,
    pub symbol: String,
    pub circulating: Option<f64>,
    pub dominance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StablecoinSummary {
    pub dominance: Option<f64>,
    pub total_circulating: Option<f64>,
    pub largest_stablecoin: Option<LargestStablecoin>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummarySeries {
    #[serde(rename = "tvl30d")]
    pub tvl_30d: Vec<f64>,
    #[serde(rename = "fees30d")]
    pub fees_30d: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TvlSummary {
    pub chain: Chain,
    pub tvl: TvlFigures,
    pub fees: Option<FeesSummary>,
    pub stablecoins: Option<StablecoinSummary>,
    pub series: SummarySeries,
    pub ts: i64,
}

/// Pro API GET through the short-lived response cache
async fn cached_pro_get(app_context: &AppContext, key: &str, path: &str) -> Result<Value, UpstreamError> {
    let request = pro_request(app_context, key, path);
    let cache_key = request.display_url().to_string();
    if let Some(hit) = app_context.tvl_cache.get(&cache_key).await {
        return Ok(hit);
    }
    let payload = app_context.client.fetch_json(&request).await?;
    app_context.tvl_cache.put(&cache_key, payload.clone()).await;
    Ok(payload)
}

/// Percent change from `base` to `current`, `None` when the base is zero
fn pct_change(current: f64, base: f64) -> Option<f64> {
    if base == 0.0 {
        None
    } else {
        Some(round2((current - base) / base * 100.0))
    }
}

fn tvl_figures(series: &[f64]) -> TvlFigures {
    let current = series.last().copied();
    let change7d_pct = match (current, series.len().checked_sub(WEEK_LOOKBACK + 1)) {
        (Some(current), Some(idx)) => pct_change(current, series[idx]),
        _ => None,
    };
    let change30d_pct = match (current, series.first()) {
        (Some(current), Some(base)) if series.len() >= SUMMARY_WINDOW => pct_change(current, *base),
        _ => None,
    };
    TvlFigures {
        current,
        change7d_pct,
        change30d_pct,
    }
}

/// Values of the last 30 rows that carry a usable number
fn window_values(payload: &Value, value_of: fn(&Value) -> Option<f64>) -> Vec<f64> {
    let rows = payload.as_array().cloned().unwrap_or_default();
    tail(rows, SUMMARY_WINDOW).iter().filter_map(value_of).collect()
}

fn tvl_value(row: &Value) -> Option<f64> {
    first_number(row, &["tvl", "totalLiquidityUSD", "value"])
}

fn fees_value(row: &Value) -> Option<f64> {
    row.as_array().and_then(|pair| pair.get(1)).and_then(to_number)
}

fn fees_summary(payload: &Value) -> (FeesSummary, Vec<f64>) {
    let summary = FeesSummary {
        total_fees_24h: first_number(payload, &["totalFees24h", "fees24h", "total24h"]),
        total_revenue_24h: first_number(payload, &["totalRevenue24h", "revenue24h"]),
        change_1d: first_number(payload, &["change_1d"]),
    };
    let series = lookup(payload, "totalDataChart")
        .map(|chart| window_values(chart, fees_value))
        .unwrap_or_default();
    (summary, series)
}

fn stablecoin_summary(payload: &Value) -> StablecoinSummary {
    let largest = lookup(payload, "largestStablecoin").map(|coin| LargestStablecoin {
        name: first_text(coin, &["name"]).unwrap_or_default(),
        symbol: first_text(coin, &["symbol"]).unwrap_or_default(),
        circulating: first_number(coin, &["circulating"]),
        dominance: first_number(coin, &["dominance"]),
    });
    StablecoinSummary {
        dominance: first_number(payload, &["dominance"]),
        total_circulating: first_number(payload, &["totalCirculating"]),
        largest_stablecoin: largest,
    }
}

/// chain-tvl summary. Needs the pro key. TVL history is required; fees and stablecoin
/// dominance are best-effort and come back `null` on failure.
pub async fn chain_tvl(app_context: &AppContext, chain: Chain) -> Result<TvlSummary, ProxyError> {
    let key = app_context.llama_key()?;
    let name = urlencoding::encode(chain.llama_name()).into_owned();

    let history = cached_pro_get(
        app_context,
        key,
        &format!("/api/v2/historicalChainTvl/{}", name),
    )
    .await?;
    let tvl_30d = window_values(&history, tvl_value);

    let fees_path = format!("/api/overview/fees/{}", name);
    let stable_path = format!("/stablecoins/stablecoindominance/{}", name);
    let (fees, stablecoins) = tokio::join!(
        cached_pro_get(app_context, key, &fees_path),
        cached_pro_get(app_context, key, &stable_path)
    );

    let (fees, fees_30d) = match fees {
        Ok(payload) => {
            let (summary, series) = fees_summary(&payload);
            (Some(summary), series)
        }
        Err(e) => {
            warn!("(DefiLlama TVL) Fees overview unavailable for {}: {}", chain.as_str(), e);
            (None, Vec::new())
        }
    };
    let stablecoins = match stablecoins {
        Ok(payload) => Some(stablecoin_summary(&payload)),
        Err(e) => {
            warn!("(DefiLlama TVL) Stablecoin dominance unavailable for {}: {}", chain.as_str(), e);
            None
        }
    };

    info!(
        "(DefiLlama TVL) {}: {} TVL points, fees {}, stablecoins {}",
        chain.as_str(),
        tvl_30d.len(),
        fees.is_some(),
        stablecoins.is_some()
    );

    Ok(TvlSummary {
        chain,
        tvl: tvl_figures(&tvl_30d),
        fees,
        stablecoins,
        series: SummarySeries { tvl_30d, fees_30d },
        ts: now_ms(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Credentials;
    use crate::core::testing::{stub_config, stub_context, StubResponse, StubUpstream};
    use serde_json::json;

    fn llama() -> Credentials {
        Credentials {
            llama: Some("lk".to_string()),
            ..Credentials::default()
        }
    }

    fn history(n: usize) -> Value {
        Value::Array(
            (0..n)
                .map(|i| json!({ "date": 1_700_000_000 + i as i64 * 86_400, "tvl": 100.0 + i as f64 }))
                .collect(),
        )
    }

    #[test]
    fn test_tvl_figures() {
        let series: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let figures = tvl_figures(&series);
        assert_eq!(figures.current, Some(129.0));
        // 129 vs 122
        assert_eq!(figures.change7d_pct, Some(5.74));
        assert_eq!(figures.change30d_pct, Some(29.0));

        let short = tvl_figures(&[1.0, 2.0]);
        assert_eq!(short.current, Some(2.0));
        assert!(short.change7d_pct.is_none());
        assert!(short.change30d_pct.is_none());

        let zero_base = tvl_figures(&[0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        assert!(zero_base.change7d_pct.is_none());

        assert!(tvl_figures(&[]).current.is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let stub = StubUpstream::start(|_| StubResponse::json(200, json!([]))).await;
        let ctx = stub_context(stub_config(&stub.base_url()), Credentials::default());
        let err = chain_tvl(&ctx, Chain::Ethereum).await.unwrap_err();
        assert_eq!(err.envelope().message.as_deref(), Some("Missing LLAMA_API_KEY env var"));
        assert!(stub.hits().is_empty());
    }

    #[tokio::test]
    async fn test_summary_with_isolated_failures_and_cache() {
        let stub = StubUpstream::start(|req| match req.path.as_str() {
            "/pro/lk/api/v2/historicalChainTvl/Ethereum" => StubResponse::json(200, history(40)),
            "/pro/lk/api/overview/fees/Ethereum" => StubResponse::json(
                200,
                json!({ "totalFees24h": 1234.5, "change_1d": -2.5, "totalDataChart": [[1, 10], [2, "20"], [3, null]] }),
            ),
            _ => StubResponse::text(500, "stablecoins down"),
        })
        .await;
        let ctx = stub_context(stub_config(&stub.base_url()), llama());

        let summary = chain_tvl(&ctx, Chain::Ethereum).await.unwrap();
        assert_eq!(summary.series.tvl_30d.len(), 30);
        assert_eq!(summary.tvl.current, Some(139.0));
        assert!(summary.stablecoins.is_none());
        let fees = summary.fees.clone().unwrap();
        assert_eq!(fees.total_fees_24h, Some(1234.5));
        assert!(fees.total_revenue_24h.is_none());
        assert_eq!(summary.series.fees_30d, vec![10.0, 20.0]);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["fees"]["totalFees24h"], 1234.5);
        assert!(json["stablecoins"].is_null());
        assert!(json["tvl"]["change7dPct"].is_number());
        assert!(json["series"]["tvl30d"].is_array());

        // Second call is served from cache for the successful upstreams
        chain_tvl(&ctx, Chain::Ethereum).await.unwrap();
        assert_eq!(stub.hit_count("/pro/lk/api/v2/historicalChainTvl/"), 1);
        assert_eq!(stub.hit_count("/pro/lk/api/overview/fees/"), 1);
        assert_eq!(stub.hit_count("/pro/lk/stablecoins/"), 2);
    }

    #[tokio::test]
    async fn test_history_failure_is_upstream_error() {
        let stub = StubUpstream::start(|_| StubResponse::text(403, "invalid key")).await;
        let ctx = stub_context(stub_config(&stub.base_url()), llama());
        let err = chain_tvl(&ctx, Chain::Avalanche).await.unwrap_err();
        assert_eq!(err.code(), "upstream_failed");
        assert!(!err.envelope().message.unwrap_or_default().contains("/lk/"));
    }

    #[test]
    fn test_stablecoin_summary() {
        let summary = stablecoin_summary(&json!({
            "dominance": "61.2",
            "totalCirculating": 1000,
            "largestStablecoin": { "name": "Tether", "symbol": "USDT", "circulating": 600 }
        }));
        assert_eq!(summary.dominance, Some(61.2));
        let largest = summary.largest_stablecoin.unwrap();
        assert_eq!(largest.symbol, "USDT");
        assert!(largest.dominance.is_none());
    }
}

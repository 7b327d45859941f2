use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::blockchains::types::Chain;
use crate::core::app_context::AppContext;
use crate::core::clients::http_client::UpstreamRequest;
use crate::core::error::{ProxyError, UpstreamError};
use crate::core::utils::{now_ms, tail};
use crate::defillama::candles::{normalize_series, pick_series, weekly_candles, Candle, SeriesPoint};
use crate::defillama::{open_request, pro_request, source_label};

pub const SERIES_TAIL: usize = 180;

const TVL_TIME_KEYS: [&str; 2] = ["date", "timestamp"];
const TVL_VALUE_KEYS: [&str; 3] = ["tvl", "totalLiquidityUSD", "value"];
const VOLUME_TIME_KEYS: [&str; 4] = ["date", "timestamp", "time", "t"];
const VOLUME_VALUE_KEYS: [&str; 5] = ["totalVolume", "volume", "value", "dailyVolume", "v"];
const VOLUME_PREFERRED_KEYS: [&str; 2] = ["totalDataChart", "totalDataChartBreakdown"];
const VOLUME_FALLBACK_KEYS: [&str; 5] = ["chart", "chartData", "data", "volumeChart", "totalVolumeChart"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSources {
    pub tvl: String,
    pub volume: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    pub chain: Chain,
    pub tvl: Vec<SeriesPoint>,
    pub volume_weekly: Vec<Candle>,
    pub updated_at: i64,
    pub source: ChartSources,
}

/// Pro host first when a key is configured, then the open API
fn llama_candidates(app_context: &AppContext, pro_path: &str, open_path: &str) -> Vec<(UpstreamRequest, String)> {
    let llama = &app_context.config.upstreams.llama;
    let mut out = Vec::with_capacity(2);
    if let Some(key) = app_context.credentials.llama.as_deref() {
        out.push((
            pro_request(app_context, key, pro_path),
            source_label(&llama.pro_url, pro_path),
        ));
    }
    out.push((
        open_request(app_context, open_path),
        source_label(&llama.open_url, open_path),
    ));
    out
}

async fn fetch_first<F>(
    app_context: &AppContext,
    candidates: Vec<(UpstreamRequest, String)>,
    accept: F,
) -> Result<(Value, String, String), UpstreamError>
where
    F: Fn(&Value) -> bool,
{
    let (requests, labels): (Vec<_>, Vec<_>) = candidates.into_iter().unzip();
    let (idx, payload) = app_context.client.fetch_first_json(&requests, accept).await?;
    let display_url = requests
        .get(idx)
        .map(|r| r.display_url().to_string())
        .unwrap_or_default();
    let label = labels.get(idx).cloned().unwrap_or_default();
    Ok((payload, label, display_url))
}

async fn fetch_tvl_history(app_context: &AppContext, chain: Chain) -> Result<(Vec<SeriesPoint>, String), UpstreamError> {
    let name = urlencoding::encode(chain.llama_name());
    let candidates = llama_candidates(
        app_context,
        &format!("/api/v2/historicalChainTvl/{}", name),
        &format!("/v2/historicalChainTvl/{}", name),
    );
    let (payload, label, _) = fetch_first(app_context, candidates, Value::is_array).await?;

    let rows = payload.as_array().map(Vec::as_slice).unwrap_or_default();
    Ok((normalize_series(rows, &TVL_TIME_KEYS, &TVL_VALUE_KEYS), label))
}

async fn fetch_volume_history(app_context: &AppContext, chain: Chain) -> Result<(Vec<SeriesPoint>, String), UpstreamError> {
    let path = format!("/overview/dexs/{}", urlencoding::encode(chain.as_str()));
    let candidates = llama_candidates(app_context, &path, &path);
    let (payload, label, display_url) = fetch_first(app_context, candidates, Value::is_object).await?;

    let rows = pick_series(&payload, &VOLUME_PREFERRED_KEYS)
        .or_else(|| pick_series(&payload, &VOLUME_FALLBACK_KEYS))
        .ok_or_else(|| UpstreamError::schema(&display_url, "volume series missing"))?;
    Ok((normalize_series(rows, &VOLUME_TIME_KEYS, &VOLUME_VALUE_KEYS), label))
}

/// chain-charts. TVL and volume are fetched together; either failing fails the call.
pub async fn chain_charts(app_context: &AppContext, chain: Chain) -> Result<ChartSeries, ProxyError> {
    let (tvl, volume) = tokio::join!(
        fetch_tvl_history(app_context, chain),
        fetch_volume_history(app_context, chain)
    );
    let (tvl, tvl_source) = tvl?;
    let (volume, volume_source) = volume?;

    let tvl = tail(tvl, SERIES_TAIL);
    let volume_weekly = weekly_candles(&tail(volume, SERIES_TAIL));

    info!(
        "(DefiLlama Charts) {}: {} TVL points, {} weekly candles",
        chain.as_str(),
        tvl.len(),
        volume_weekly.len()
    );

    Ok(ChartSeries {
        chain,
        tvl,
        volume_weekly,
        updated_at: now_ms(),
        source: ChartSources {
            tvl: tvl_source,
            volume: volume_source,
        },
    })
}

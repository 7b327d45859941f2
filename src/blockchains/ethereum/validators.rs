use std::collections::HashMap;

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::blockchains::ethereum::types::{
    EthIdentifier, EthLookupParams, EthLookupResponse, EthValidatorRecord,
};
use crate::core::app_context::AppContext;
use crate::core::assemble::{assemble, cap_batch};
use crate::core::clients::http_client::{construct_url, Provider, UpstreamRequest};
use crate::core::error::{PartialRecordError, ProxyError, UpstreamError};
use crate::core::normalize::{first_number, first_text, lookup, to_number, to_text};
use crate::core::units::{format_eth, format_percent, gwei_to_eth};

const TIER_ERROR_MARKERS: [&str; 3] = [
    "validator selector type not allowed",
    "subscription tier",
    "upgrade your subscription",
];
const V1_FALLBACK_NOTE: &str =
    "beaconcha.in v2 selector restricted on this API plan. Served via v1 fallback (no APY/ROI).";
const BALANCE_HISTORY_LIMIT: usize = 30;

/// v2 failures caused by the API plan rather than by the request
pub fn is_tier_error(err: &UpstreamError) -> bool {
    let haystack = format!("{} {}", err.body, err.reason).to_lowercase();
    TIER_ERROR_MARKERS.iter().any(|marker| haystack.contains(marker))
}

/// APY/ROI figures shared by every validator in a v2 batch
#[derive(Debug, Default, Clone)]
struct BatchPerformance {
    apy: Option<String>,
    roi: Option<String>,
    finality: Option<String>,
}

/// validator-lookup(ethereum)
pub async fn lookup_validators(
    app_context: &AppContext,
    params: EthLookupParams,
) -> Result<EthLookupResponse, ProxyError> {
    let requested: Vec<EthIdentifier> = cap_batch(params.identifiers)
        .iter()
        .map(EthIdentifier::parse)
        .collect();
    let displays: Vec<String> = requested.iter().map(EthIdentifier::display).collect();

    if requested.is_empty() {
        return Ok(EthLookupResponse {
            validators: Vec::new(),
            note: None,
        });
    }

    let valid: Vec<(usize, &EthIdentifier)> = requested
        .iter()
        .enumerate()
        .filter(|(_, id)| !matches!(id, EthIdentifier::Invalid(_)))
        .collect();

    let mut note = None;
    let mut resolved: HashMap<usize, Result<EthValidatorRecord, PartialRecordError>> =
        if valid.is_empty() {
            HashMap::new()
        } else if let Some(key) = app_context.beaconchain_key() {
            match fetch_v2(app_context, key, &valid, &params.window).await {
                Ok(records) => records,
                Err(e) if is_tier_error(&e) => {
                    warn!("(Ethereum Validators) v2 selector rejected by API plan, using v1 per-validator calls");
                    note = Some(V1_FALLBACK_NOTE.to_string());
                    fetch_v1(app_context, &valid).await
                }
                Err(e) => return Err(ProxyError::Upstream(e)),
            }
        } else {
            fetch_v1(app_context, &valid).await
        };

    if params.include_series {
        attach_balance_series(app_context, &mut resolved).await;
    }

    let validators = assemble(&displays, |idx, identifier| {
        if let EthIdentifier::Invalid(_) = requested[idx] {
            return Err(PartialRecordError::new("invalid identifier"));
        }
        let mut record = resolved
            .remove(&idx)
            .unwrap_or_else(|| Err(PartialRecordError::new("validator not found upstream")))?;
        record.identifier = identifier.to_string();
        Ok(record)
    });

    info!(
        "(Ethereum Validators) Assembled {} records ({} resolved)",
        validators.len(),
        validators.iter().filter(|v| v.error.is_none()).count()
    );

    Ok(EthLookupResponse { validators, note })
}

/// Batch overview plus APY/ROI, joined. Either call failing fails the batch.
async fn fetch_v2(
    app_context: &AppContext,
    key: &str,
    valid: &[(usize, &EthIdentifier)],
    window: &str,
) -> Result<HashMap<usize, Result<EthValidatorRecord, PartialRecordError>>, UpstreamError> {
    let base = &app_context.config.upstreams.beaconchain.url;
    let selectors: Vec<Value> = valid.iter().filter_map(|(_, id)| id.selector()).collect();

    let overview_request = UpstreamRequest::post_json(
        Provider::Beaconchain,
        construct_url(base, "/api/v2/ethereum/validators"),
        json!({
            "chain": app_context.config.general.network,
            "page_size": selectors.len().clamp(1, 50),
            "cursor": "",
            "validator": { "validator_identifiers": selectors },
        }),
    )
    .bearer(Some(key));

    let performance_request = UpstreamRequest::post_json(
        Provider::Beaconchain,
        construct_url(base, "/api/v2/ethereum/validators/apy-roi"),
        json!({
            "chain": app_context.config.general.network,
            "validator": { "validator_identifiers": selectors },
            "range": { "evaluation_window": window },
        }),
    )
    .bearer(Some(key));

    let (overview, performance) = tokio::join!(
        app_context.client.fetch_json(&overview_request),
        app_context.client.fetch_json(&performance_request)
    );
    let overview = overview?;
    let performance = performance?;

    let batch = BatchPerformance {
        apy: lookup(&performance, "data.combined.apy.total")
            .and_then(to_number)
            .and_then(format_percent),
        roi: lookup(&performance, "data.combined.roi.total")
            .and_then(to_number)
            .and_then(format_percent),
        finality: lookup(&performance, "data.finality").and_then(to_text),
    };

    let items = match lookup(&overview, "data") {
        Some(Value::Array(items)) => items,
        _ => {
            return Err(UpstreamError::schema(
                overview_request.display_url(),
                "v2 overview response has no data array",
            ))
        }
    };

    let mut by_key: HashMap<String, EthValidatorRecord> = HashMap::new();
    for item in items {
        let record = v2_record(item, &batch);
        if let Some(index) = record.validator_id {
            by_key.insert(index.to_string(), record.clone());
        }
        if let Some(pubkey) = &record.pubkey {
            by_key.insert(pubkey.to_ascii_lowercase(), record);
        }
    }

    Ok(valid
        .iter()
        .map(|(idx, id)| {
            let record = id
                .match_key()
                .and_then(|k| by_key.get(&k).cloned())
                .ok_or_else(|| PartialRecordError::new("validator not found upstream"));
            (*idx, record)
        })
        .collect())
}

fn v2_record(item: &Value, batch: &BatchPerformance) -> EthValidatorRecord {
    let status = first_text(item, &["status", "validator.status"]).unwrap_or_else(|| "unknown".to_string());
    let mut record = EthValidatorRecord::new("", status);
    record.validator_id = first_number(item, &["validator.index", "index", "validatorindex"])
        .filter(|n| *n >= 0.0)
        .map(|n| n as u64);
    record.pubkey = first_text(item, &["validator.public_key", "validator.pubkey", "pubkey"]);
    record.online = lookup(item, "online").and_then(Value::as_bool);
    record.balance_eth = first_number(item, &["balances.current", "balance"]).and_then(format_eth);
    record.effective_balance_eth =
        first_number(item, &["balances.effective", "effective_balance"]).and_then(format_eth);
    record.apy30d = batch.apy.clone();
    record.roi30d = batch.roi.clone();
    record.finality = batch.finality.clone();
    record
}

/// One `GET /api/v1/validator/{id}` per identifier, concurrently. Failures stay per-record.
async fn fetch_v1(
    app_context: &AppContext,
    valid: &[(usize, &EthIdentifier)],
) -> HashMap<usize, Result<EthValidatorRecord, PartialRecordError>> {
    let base = &app_context.config.upstreams.beaconchain.url;
    let key = app_context.beaconchain_key();

    let calls = valid.iter().map(|(idx, id)| async move {
        let path = format!("/api/v1/validator/{}", urlencoding::encode(&id.display()));
        let request = UpstreamRequest::get(Provider::Beaconchain, construct_url(base, &path)).bearer(key);
        let result = app_context
            .client
            .fetch_json(&request)
            .await
            .map(|payload| v1_record(&payload, id))
            .map_err(PartialRecordError::from);
        (*idx, result)
    });

    join_all(calls).await.into_iter().collect()
}

fn v1_record(payload: &Value, requested: &EthIdentifier) -> EthValidatorRecord {
    let status = first_text(payload, &["data.status", "status", "data.state"])
        .unwrap_or_else(|| "unknown".to_string());
    let online = online_from_status(&status);

    let mut record = EthValidatorRecord::new("", status);
    record.validator_id = first_number(payload, &["data.validatorindex", "data.index", "validatorindex"])
        .filter(|n| *n >= 0.0)
        .map(|n| n as u64)
        .or(match requested {
            EthIdentifier::Index(index) => Some(*index),
            _ => None,
        });
    record.pubkey = first_text(payload, &["data.pubkey"]).or(match requested {
        EthIdentifier::Pubkey(key) => Some(key.clone()),
        _ => None,
    });
    record.online = online;
    record.balance_eth = first_number(payload, &["data.balance"]).and_then(format_eth);
    record.effective_balance_eth =
        first_number(payload, &["data.effectivebalance", "data.effective_balance"]).and_then(format_eth);
    record
}

/// `active_online` and friends carry liveness in the status text
fn online_from_status(status: &str) -> Option<bool> {
    let status = status.to_ascii_lowercase();
    if status.contains("offline") {
        Some(false)
    } else if status.contains("online") {
        Some(true)
    } else {
        None
    }
}

/// Adds the recent balance history to every resolved record. A failed history call leaves
/// the record without a series.
async fn attach_balance_series(
    app_context: &AppContext,
    resolved: &mut HashMap<usize, Result<EthValidatorRecord, PartialRecordError>>,
) {
    let base = &app_context.config.upstreams.beaconchain.url;
    let key = app_context.beaconchain_key();

    let targets: Vec<(usize, String)> = resolved
        .iter()
        .filter_map(|(idx, record)| record.as_ref().ok().map(|r| (*idx, r.lookup_id())))
        .collect();

    let calls = targets.into_iter().map(|(idx, id)| async move {
        let path = format!(
            "/api/v1/validator/{}/balancehistory?limit={}",
            urlencoding::encode(&id),
            BALANCE_HISTORY_LIMIT
        );
        let request = UpstreamRequest::get(Provider::Beaconchain, construct_url(base, &path)).bearer(key);
        match app_context.client.fetch_json(&request).await {
            Ok(payload) => (idx, balance_series(&payload)),
            Err(e) => {
                warn!("(Ethereum Validators) Balance history for {} unavailable: {}", id, e);
                (idx, None)
            }
        }
    });

    for (idx, series) in join_all(calls).await {
        if let (Some(series), Some(Ok(record))) = (series, resolved.get_mut(&idx)) {
            record.balance_series_eth = Some(series);
        }
    }
}

/// Balance history in ETH, oldest first
fn balance_series(payload: &Value) -> Option<Vec<f64>> {
    let rows = match lookup(payload, "data") {
        Some(Value::Array(rows)) => rows,
        _ => return None,
    };

    let mut points: Vec<(Option<f64>, f64)> = rows
        .iter()
        .filter_map(|row| {
            let balance = lookup(row, "balance").and_then(to_number)?;
            Some((lookup(row, "epoch").and_then(to_number), gwei_to_eth(balance)))
        })
        .collect();

    if points.iter().all(|(epoch, _)| epoch.is_some()) {
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    } else {
        // beaconcha.in lists newest first
        points.reverse();
    }
    Some(points.into_iter().map(|(_, v)| v).collect())
}

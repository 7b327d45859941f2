use std::collections::HashMap;

use serde_json::Value;
use tracing::info;

use crate::blockchains::avalanche::types::{
    parse_node_id, AvaxLookupParams, AvaxLookupResponse, NodeRecord,
};
use crate::core::app_context::AppContext;
use crate::core::assemble::{assemble, cap_batch};
use crate::core::clients::http_client::{construct_url, Provider, UpstreamRequest};
use crate::core::error::{PartialRecordError, ProxyError};
use crate::core::normalize::{first_number, first_text, lookup};
use crate::core::units::{format_avax, format_base_units, parse_base_units};

pub const GLACIER_KEY_HEADER: &str = "x-glacier-api-key";
const MAX_PAGE_SIZE: usize = 100;

/// One request per Glacier host, in preference order
pub fn glacier_candidates(hosts: &[String], key: &str, path_and_query: &str) -> Vec<UpstreamRequest> {
    hosts
        .iter()
        .map(|host| {
            UpstreamRequest::get(Provider::Glacier, construct_url(host, path_and_query))
                .header(GLACIER_KEY_HEADER, key)
        })
        .collect()
}

/// validator-lookup(avalanche)
pub async fn lookup_validators(
    app_context: &AppContext,
    params: AvaxLookupParams,
) -> Result<AvaxLookupResponse, ProxyError> {
    let key = app_context.glacier_key()?;

    let requested: Vec<Result<String, String>> = cap_batch(params.identifiers)
        .iter()
        .map(parse_node_id)
        .collect();
    let displays: Vec<String> = requested
        .iter()
        .map(|r| match r {
            Ok(id) | Err(id) => id.clone(),
        })
        .collect();
    let node_ids: Vec<&str> = requested
        .iter()
        .filter_map(|r| r.as_ref().ok().map(String::as_str))
        .collect();

    let mut by_node: HashMap<String, NodeRecord> = HashMap::new();
    if !node_ids.is_empty() {
        let path = format!(
            "/v1/networks/{}/validators?nodeIds={}&pageSize={}",
            urlencoding::encode(&app_context.config.upstreams.glacier.network),
            urlencoding::encode(&node_ids.join(",")),
            node_ids.len().clamp(1, MAX_PAGE_SIZE)
        );
        let candidates = glacier_candidates(&app_context.config.upstreams.glacier.urls, key, &path);
        let (_, payload) = app_context
            .client
            .fetch_first_json(&candidates, |json| {
                matches!(lookup(json, "validators"), Some(Value::Array(_)))
            })
            .await?;

        if let Some(Value::Array(items)) = lookup(&payload, "validators") {
            for item in items {
                if let Some(record) = node_record(item) {
                    by_node.insert(record.node_id.clone(), record);
                }
            }
        }
    }

    let validators = assemble(&displays, |idx, _| match &requested[idx] {
        Err(_) => Err(PartialRecordError::new("invalid node id")),
        Ok(node_id) => by_node
            .get(node_id)
            .cloned()
            .ok_or_else(|| PartialRecordError::new("node not found upstream")),
    });

    info!(
        "(Avalanche Validators) Assembled {} records ({} found upstream)",
        validators.len(),
        validators.iter().filter(|v| v.error.is_none()).count()
    );

    Ok(AvaxLookupResponse { validators })
}

fn node_record(item: &Value) -> Option<NodeRecord> {
    let node_id = first_text(item, &["nodeId"])?;
    let status = first_text(item, &["validationStatus"]).unwrap_or_else(|| "unknown".to_string());

    let mut record = NodeRecord::new(&node_id, status);
    record.amount_staked = lookup(item, "amountStaked")
        .and_then(parse_base_units)
        .map(format_avax);
    record.amount_delegated = lookup(item, "amountDelegated")
        .and_then(parse_base_units)
        .map(format_avax);
    record.delegator_count = first_number(item, &["delegatorCount"])
        .filter(|n| *n >= 0.0)
        .map(|n| n as u64);
    record.delegation_fee_pct = first_number(item, &["delegationFee", "delegationFeePercent"]);
    record.validation_reward = lookup(item, "rewards.validationRewardAmount")
        .and_then(parse_base_units)
        .map(|n| format_base_units(n, 4));
    record.delegation_reward = lookup(item, "rewards.delegationRewardAmount")
        .and_then(parse_base_units)
        .map(|n| format_base_units(n, 4));
    Some(record)
}

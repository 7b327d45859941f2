use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::core::assemble::BatchRecord;
use crate::core::error::{PartialRecordError, ProxyError};
use crate::core::normalize::{lookup, split_list, to_text};
use crate::core::utils::now_ms;

pub const NODE_ID_PREFIX: &str = "NodeID-";

/// Parsed validator-lookup(avalanche) call
#[derive(Debug, Clone, PartialEq)]
pub struct AvaxLookupParams {
    pub identifiers: Vec<Value>,
}

impl AvaxLookupParams {
    pub fn from_body(body: &Value) -> Result<Self, ProxyError> {
        let identifiers = match ["identifiers", "nodeIds"].iter().find_map(|key| lookup(body, key)) {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(ProxyError::Validation(
                    "nodeIds must be an array".to_string(),
                ))
            }
        };
        Ok(Self { identifiers })
    }

    pub fn from_query(query: &HashMap<String, String>) -> Self {
        let identifiers = ["ids", "nodeIds", "validators"]
            .iter()
            .find_map(|key| query.get(*key))
            .map(|raw| split_list(raw))
            .unwrap_or_default();
        Self { identifiers }
    }
}

/// Accepts `NodeID-...` strings; anything else comes back as its display text
pub fn parse_node_id(value: &Value) -> Result<String, String> {
    let text = to_text(value).unwrap_or_else(|| value.to_string());
    if text.starts_with(NODE_ID_PREFIX) && text.len() > NODE_ID_PREFIX.len() {
        Ok(text)
    } else {
        Err(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_id: String,
    pub validation_status: String,
    pub amount_staked: Option<String>,
    pub amount_delegated: Option<String>,
    pub delegator_count: Option<u64>,
    pub delegation_fee_pct: Option<f64>,
    pub validation_reward: Option<String>,
    pub delegation_reward: Option<String>,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeRecord {
    pub fn new(node_id: &str, validation_status: String) -> Self {
        Self {
            node_id: node_id.to_string(),
            validation_status,
            amount_staked: None,
            amount_delegated: None,
            delegator_count: None,
            delegation_fee_pct: None,
            validation_reward: None,
            delegation_reward: None,
            updated_at: now_ms(),
            error: None,
        }
    }
}

impl BatchRecord for NodeRecord {
    fn placeholder(identifier: &str, error: &PartialRecordError) -> Self {
        let mut record = NodeRecord::new(identifier, "error".to_string());
        record.error = Some(error.message.clone());
        record
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvaxLookupResponse {
    pub validators: Vec<NodeRecord>,
}

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::core::assemble::BatchRecord;
use crate::core::error::{PartialRecordError, ProxyError};
use crate::core::normalize::{lookup, split_list};
use crate::core::utils::now_ms;

/// Shortest string accepted as a public key, `0x` included
const MIN_PUBKEY_LEN: usize = 10;
const DEFAULT_WINDOW: &str = "30d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthIdentifier {
    Index(u64),
    Pubkey(String),
    Invalid(String),
}

impl EthIdentifier {
    pub fn parse(value: &Value) -> Self {
        match value {
            Value::Number(n) => match n.as_u64() {
                Some(index) => EthIdentifier::Index(index),
                None => EthIdentifier::Invalid(n.to_string()),
            },
            Value::String(s) => {
                let s = s.trim();
                if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                    match s.parse::<u64>() {
                        Ok(index) => EthIdentifier::Index(index),
                        Err(_) => EthIdentifier::Invalid(s.to_string()),
                    }
                } else if s.starts_with("0x") && s.len() >= MIN_PUBKEY_LEN {
                    EthIdentifier::Pubkey(s.to_string())
                } else {
                    EthIdentifier::Invalid(s.to_string())
                }
            }
            other => EthIdentifier::Invalid(other.to_string()),
        }
    }

    /// The identifier as the caller sent it
    pub fn display(&self) -> String {
        match self {
            EthIdentifier::Index(index) => index.to_string(),
            EthIdentifier::Pubkey(key) => key.clone(),
            EthIdentifier::Invalid(raw) => raw.clone(),
        }
    }

    /// Key used to match upstream records back to the request
    pub fn match_key(&self) -> Option<String> {
        match self {
            EthIdentifier::Index(index) => Some(index.to_string()),
            EthIdentifier::Pubkey(key) => Some(key.to_ascii_lowercase()),
            EthIdentifier::Invalid(_) => None,
        }
    }

    /// Form the v2 selector expects: numbers for indexes, strings for keys
    pub fn selector(&self) -> Option<Value> {
        match self {
            EthIdentifier::Index(index) => Some(Value::from(*index)),
            EthIdentifier::Pubkey(key) => Some(Value::from(key.clone())),
            EthIdentifier::Invalid(_) => None,
        }
    }
}

/// Parsed validator-lookup(ethereum) call
#[derive(Debug, Clone, PartialEq)]
pub struct EthLookupParams {
    pub identifiers: Vec<Value>,
    pub include_series: bool,
    pub window: String,
}

impl EthLookupParams {
    pub fn from_body(body: &Value) -> Result<Self, ProxyError> {
        let identifiers = match ["identifiers", "pubkeys", "validators"]
            .iter()
            .find_map(|key| lookup(body, key))
        {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(ProxyError::Validation(
                    "identifiers must be an array".to_string(),
                ))
            }
        };

        let include_series = ["includeSeries", "includeBalanceSeries"]
            .iter()
            .find_map(|key| lookup(body, key))
            .map(is_truthy)
            .unwrap_or(false);

        let window = lookup(body, "window")
            .and_then(Value::as_str)
            .filter(|w| !w.trim().is_empty())
            .unwrap_or(DEFAULT_WINDOW)
            .to_string();

        Ok(Self {
            identifiers,
            include_series,
            window,
        })
    }

    pub fn from_query(query: &HashMap<String, String>) -> Self {
        let identifiers = ["ids", "validators", "pubkeys"]
            .iter()
            .find_map(|key| query.get(*key))
            .map(|raw| split_list(raw))
            .unwrap_or_default();

        let include_series = ["includeSeries", "includeBalanceSeries"]
            .iter()
            .find_map(|key| query.get(*key))
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let window = query
            .get("window")
            .filter(|w| !w.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_WINDOW.to_string());

        Self {
            identifiers,
            include_series,
            window,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_u64() == Some(1),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EthValidatorRecord {
    pub identifier: String,
    pub validator_id: Option<u64>,
    pub pubkey: Option<String>,
    pub status: String,
    pub online: Option<bool>,
    pub balance_eth: Option<String>,
    pub effective_balance_eth: Option<String>,
    pub apy30d: Option<String>,
    pub roi30d: Option<String>,
    pub finality: Option<String>,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_series_eth: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EthValidatorRecord {
    pub fn new(identifier: &str, status: String) -> Self {
        Self {
            identifier: identifier.to_string(),
            validator_id: None,
            pubkey: None,
            status,
            online: None,
            balance_eth: None,
            effective_balance_eth: None,
            apy30d: None,
            roi30d: None,
            finality: None,
            updated_at: now_ms(),
            balance_series_eth: None,
            error: None,
        }
    }

    /// Identifier used for follow-up per-validator calls
    pub fn lookup_id(&self) -> String {
        match (self.validator_id, &self.pubkey) {
            (Some(index), _) => index.to_string(),
            (None, Some(key)) => key.clone(),
            (None, None) => self.identifier.clone(),
        }
    }
}

impl BatchRecord for EthValidatorRecord {
    fn placeholder(identifier: &str, error: &PartialRecordError) -> Self {
        let mut record = EthValidatorRecord::new(identifier, "error".to_string());
        record.error = Some(error.message.clone());
        record
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EthLookupResponse {
    pub validators: Vec<EthValidatorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_parse() {
        assert_eq!(EthIdentifier::parse(&json!(42)), EthIdentifier::Index(42));
        assert_eq!(EthIdentifier::parse(&json!(" 7 ")), EthIdentifier::Index(7));
        assert_eq!(
            EthIdentifier::parse(&json!("0xABCDEF0123")),
            EthIdentifier::Pubkey("0xABCDEF0123".to_string())
        );
        assert_eq!(
            EthIdentifier::parse(&json!("0xabc123...0000000")),
            EthIdentifier::Pubkey("0xabc123...0000000".to_string())
        );
        assert!(matches!(EthIdentifier::parse(&json!("0x12")), EthIdentifier::Invalid(_)));
        assert!(matches!(EthIdentifier::parse(&json!(-1)), EthIdentifier::Invalid(_)));
        assert!(matches!(EthIdentifier::parse(&json!({"a": 1})), EthIdentifier::Invalid(_)));
        assert_eq!(
            EthIdentifier::parse(&json!("0xABCDEF0123")).match_key().as_deref(),
            Some("0xabcdef0123")
        );
    }

    #[test]
    fn test_params_from_body() {
        let params = EthLookupParams::from_body(&json!({
            "pubkeys": ["0xabcdef012345"],
            "includeBalanceSeries": true
        }))
        .unwrap();
        assert_eq!(params.identifiers, vec![json!("0xabcdef012345")]);
        assert!(params.include_series);
        assert_eq!(params.window, "30d");

        let params = EthLookupParams::from_body(&json!({ "validators": [1, 2], "window": "7d" })).unwrap();
        assert_eq!(params.identifiers.len(), 2);
        assert!(!params.include_series);
        assert_eq!(params.window, "7d");

        let params = EthLookupParams::from_body(&json!("not an object")).unwrap();
        assert!(params.identifiers.is_empty());
    }

    #[test]
    fn test_params_reject_non_array() {
        let err = EthLookupParams::from_body(&json!({ "identifiers": "0xabc" })).unwrap_err();
        assert!(matches!(err, ProxyError::Validation(_)));
    }

    #[test]
    fn test_params_from_query() {
        let mut query = HashMap::new();
        query.insert("ids".to_string(), "1, 2,,0xabcdef012345".to_string());
        query.insert("includeSeries".to_string(), "1".to_string());
        let params = EthLookupParams::from_query(&query);
        assert_eq!(
            params.identifiers,
            vec![json!("1"), json!("2"), json!("0xabcdef012345")]
        );
        assert!(params.include_series);
    }

    #[test]
    fn test_placeholder_record() {
        let record =
            EthValidatorRecord::placeholder("0xdead", &PartialRecordError::new("invalid identifier"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "invalid identifier");
        assert_eq!(json["identifier"], "0xdead");
        assert!(json["balanceEth"].is_null());
        assert!(json.get("balanceSeriesEth").is_none());
    }
}

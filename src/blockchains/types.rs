use serde::Serialize;

use crate::core::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Avalanche,
}

impl Chain {
    /// Case-insensitive parse of the `chain` query parameter
    pub fn parse(value: Option<&str>) -> Result<Self, ProxyError> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("ethereum") => Ok(Chain::Ethereum),
            Some("avalanche") => Ok(Chain::Avalanche),
            _ => Err(ProxyError::Validation("missing_or_invalid_chain".to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Avalanche => "avalanche",
        }
    }

    /// Chain name as DefiLlama spells it in TVL paths
    pub fn llama_name(&self) -> &'static str {
        match self {
            Chain::Ethereum => "Ethereum",
            Chain::Avalanche => "Avalanche",
        }
    }
}

/// Chain-wide staking summary. Fields a provider does not supply stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStats {
    pub chain: Chain,
    pub active_validators: Option<u64>,
    pub total_staked: Option<String>,
    /// Percent, two decimals
    pub apr: Option<f64>,
    pub entry_queue: Option<String>,
    pub exit_queue: Option<String>,
    pub churn_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegators: Option<u64>,
    pub updated_at: i64,
    pub source: String,
}

impl ChainStats {
    pub fn empty(chain: Chain, updated_at: i64) -> Self {
        Self {
            chain,
            active_validators: None,
            total_staked: None,
            apr: None,
            entry_queue: None,
            exit_queue: None,
            churn_limit: None,
            delegators: None,
            updated_at,
            source: String::new(),
        }
    }

    pub fn has_any_field(&self) -> bool {
        self.active_validators.is_some()
            || self.total_staked.is_some()
            || self.apr.is_some()
            || self.entry_queue.is_some()
            || self.exit_queue.is_some()
            || self.churn_limit.is_some()
            || self.delegators.is_some()
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

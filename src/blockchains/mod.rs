pub mod avalanche;
pub mod ethereum;
pub mod types;

use crate::core::app_context::AppContext;
use crate::core::error::ProxyError;
use types::{Chain, ChainStats};

/// chain-stats entry point
pub async fn chain_stats(app_context: &AppContext, chain: Chain) -> Result<ChainStats, ProxyError> {
    match chain {
        Chain::Ethereum => ethereum::stats::fetch_stats(app_context).await,
        Chain::Avalanche => avalanche::stats::fetch_stats(app_context).await,
    }
}

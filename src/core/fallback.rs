use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::error::UpstreamError;

/// A provider path able to produce a fully normalised value
#[async_trait]
pub trait Source<T>: Send + Sync {
    /// Provenance tag attached to the value when this source wins
    fn name(&self) -> String;
    async fn fetch(&self) -> Result<T, UpstreamError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: String,
    pub state: FallbackState,
}

/// Primary first; any primary failure moves to the fallback. Each path runs exactly once and
/// nothing from a failed path is carried over.
pub async fn run_with_fallback<T: Send>(
    label: &str,
    primary: &dyn Source<T>,
    fallback: Option<&dyn Source<T>>,
) -> Result<Sourced<T>, UpstreamError> {
    let primary_error = match primary.fetch().await {
        Ok(value) => {
            info!("({}) Served from primary source {}", label, primary.name());
            return Ok(Sourced {
                value,
                source: primary.name(),
                state: FallbackState::Primary,
            });
        }
        Err(e) => e,
    };

    let Some(fallback) = fallback else {
        warn!("({}) Primary source {} failed with no fallback: {}", label, primary.name(), primary_error);
        return Err(primary_error);
    };

    warn!(
        "({}) Primary source {} failed, switching to {}: {}",
        label,
        primary.name(),
        fallback.name(),
        primary_error
    );

    match fallback.fetch().await {
        Ok(value) => Ok(Sourced {
            value,
            source: fallback.name(),
            state: FallbackState::Fallback,
        }),
        Err(e) => {
            warn!("({}) Fallback source {} failed too: {}", label, fallback.name(), e);
            Err(e)
        }
    }
}

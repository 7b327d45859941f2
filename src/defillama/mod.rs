pub mod candles;
pub mod charts;
pub mod tvl;

use crate::core::app_context::AppContext;
use crate::core::clients::http_client::{construct_url, host_label, Provider, UpstreamRequest};

/// Pro API request. The key sits in the path, so it is redacted from the display URL.
pub fn pro_request(app_context: &AppContext, key: &str, path: &str) -> UpstreamRequest {
    let keyed_path = format!("/{}{}", urlencoding::encode(key), path);
    UpstreamRequest::get(
        Provider::Llama,
        construct_url(&app_context.config.upstreams.llama.pro_url, &keyed_path),
    )
    .redact(key)
}

pub fn open_request(app_context: &AppContext, path: &str) -> UpstreamRequest {
    UpstreamRequest::get(
        Provider::Llama,
        construct_url(&app_context.config.upstreams.llama.open_url, path),
    )
}

/// Human-readable provenance such as `api.llama.fi /overview/dexs/ethereum`
pub fn source_label(base_url: &str, path: &str) -> String {
    format!("{} {}", host_label(base_url), path)
}

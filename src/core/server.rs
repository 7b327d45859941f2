use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use hyper::{
    body::HttpBody,
    header::{
        HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
        ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, CACHE_CONTROL, CONTENT_LENGTH,
        CONTENT_TYPE,
    },
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode, Uri,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blockchains::avalanche::types::AvaxLookupParams;
use crate::blockchains::ethereum::types::EthLookupParams;
use crate::blockchains::types::Chain;
use crate::blockchains::{avalanche, chain_stats, ethereum};
use crate::core::app_context::AppContext;
use crate::core::error::ProxyError;
use crate::core::metrics::proxy_metrics::{gather_metrics, PROXY_REQUESTS};
use crate::defillama::{charts::chain_charts, tvl::chain_tvl};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
/// Lookup batches are capped at 50 identifiers, a few KB of JSON
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    EthLookup,
    AvaxLookup,
    Stats,
    Charts,
    Llama,
    Metrics,
    Unknown,
}

impl Route {
    fn resolve(path: &str, metrics_path: &str) -> Self {
        match path.trim_end_matches('/') {
            "/api/eth" => Route::EthLookup,
            "/api/avax" => Route::AvaxLookup,
            "/api/stats" => Route::Stats,
            "/api/charts" => Route::Charts,
            "/api/llama" => Route::Llama,
            p if p == metrics_path.trim_end_matches('/') => Route::Metrics,
            _ => Route::Unknown,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Route::EthLookup => "eth",
            Route::AvaxLookup => "avax",
            Route::Stats => "stats",
            Route::Charts => "charts",
            Route::Llama => "llama",
            Route::Metrics => "metrics",
            Route::Unknown => "unknown",
        }
    }

    fn allows(&self, method: &Method) -> bool {
        match self {
            Route::EthLookup | Route::AvaxLookup => method == Method::GET || method == Method::POST,
            _ => method == Method::GET,
        }
    }
}

/// Serves the proxy API and the metrics path until the token is cancelled
pub async fn serve(app_context: Arc<AppContext>, token: CancellationToken) -> anyhow::Result<()> {
    let listen = &app_context.config.general.listen;
    let addr: SocketAddr = format!("{}:{}", listen.address, listen.port)
        .parse()
        .with_context(|| format!("Unable to parse listen address {}:{}", listen.address, listen.port))?;

    let ctx = app_context.clone();
    let make_svc = make_service_fn(move |_| {
        let ctx = ctx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let ctx = ctx.clone();
                async move { Ok::<_, Infallible>(handle(ctx, req).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Unable to bind {}", addr))?
        .serve(make_svc);
    info!("(Server) Listening on http://{}", addr);

    server
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("HTTP server error")?;
    info!("(Server) Stopped accepting connections");
    Ok(())
}

/// One request in, one response out. Never fails: errors become JSON envelopes.
pub async fn handle(app_context: Arc<AppContext>, req: Request<Body>) -> Response<Body> {
    let route = Route::resolve(req.uri().path(), &app_context.config.general.metrics.path);
    let method = req.method().clone();
    debug!("(Server) {} {}", method, req.uri());

    let response = if method == Method::OPTIONS && req.uri().path().starts_with("/api/") {
        preflight()
    } else {
        match dispatch(&app_context, route, req).await {
            Ok(response) => response,
            Err(e) => {
                if e.status_code().is_server_error() {
                    warn!("(Server) {} {} failed: {}", method, route.label(), e);
                }
                json_response(e.status_code(), &e.envelope())
            }
        }
    };

    PROXY_REQUESTS
        .with_label_values(&[route.label(), response.status().as_str()])
        .inc();
    response
}

async fn dispatch(
    app_context: &AppContext,
    route: Route,
    req: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    if route == Route::Unknown {
        return Err(ProxyError::NotFound(req.uri().path().to_string()));
    }
    if !route.allows(req.method()) {
        return Err(ProxyError::MethodNotAllowed);
    }

    let query = query_map(req.uri());
    match route {
        Route::EthLookup => {
            let params = if req.method() == Method::POST {
                EthLookupParams::from_body(&read_json_body(req).await?)?
            } else {
                EthLookupParams::from_query(&query)
            };
            let out = ethereum::validators::lookup_validators(app_context, params).await?;
            Ok(json_response(StatusCode::OK, &out))
        }
        Route::AvaxLookup => {
            let params = if req.method() == Method::POST {
                AvaxLookupParams::from_body(&read_json_body(req).await?)?
            } else {
                AvaxLookupParams::from_query(&query)
            };
            let out = avalanche::validators::lookup_validators(app_context, params).await?;
            Ok(json_response(StatusCode::OK, &out))
        }
        Route::Stats => {
            let chain = Chain::parse(query.get("chain").map(String::as_str))?;
            let out = chain_stats(app_context, chain).await?;
            Ok(json_response(StatusCode::OK, &out))
        }
        Route::Charts => {
            let chain = Chain::parse(query.get("chain").map(String::as_str))?;
            let out = chain_charts(app_context, chain).await?;
            Ok(json_response(StatusCode::OK, &out))
        }
        Route::Llama => {
            let chain = Chain::parse(query.get("chain").map(String::as_str))?;
            let out = chain_tvl(app_context, chain).await?;
            Ok(json_response(StatusCode::OK, &out))
        }
        Route::Metrics => Ok(metrics_response()),
        Route::Unknown => Err(ProxyError::NotFound(String::new())),
    }
}

/// Unreadable or non-JSON bodies count as an empty object. Oversized bodies are rejected.
async fn read_json_body(req: Request<Body>) -> Result<Value, ProxyError> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok());
    if declared.is_some_and(|len| len > MAX_BODY_BYTES) {
        return Err(body_too_large());
    }

    let mut body = req.into_body();
    let mut bytes = Vec::new();
    while let Some(chunk) = body.data().await {
        match chunk {
            Ok(chunk) => {
                if bytes.len() + chunk.len() > MAX_BODY_BYTES {
                    return Err(body_too_large());
                }
                bytes.extend_from_slice(&chunk);
            }
            Err(e) => {
                warn!("(Server) Could not read request body: {}", e);
                return Ok(Value::Null);
            }
        }
    }

    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn body_too_large() -> ProxyError {
    ProxyError::Validation(format!("request body exceeds {} bytes", MAX_BODY_BYTES))
}

fn query_map(uri: &Uri) -> HashMap<String, String> {
    let decode = |s: &str| {
        let s = s.replace('+', " ");
        match urlencoding::decode(&s) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => s.clone(),
        }
    };
    uri.query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(pair), String::new()),
        })
        .collect()
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(e) => {
            error!("(Server) Could not serialise response: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":"serialization_failed"}"#.to_vec(),
            )
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn preflight() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}

fn metrics_response() -> Response<Body> {
    let (content_type, buffer) = gather_metrics();
    let mut response = Response::new(Body::from(buffer));
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Credentials;
    use crate::core::metrics::proxy_metrics::register_proxy_metrics;
    use crate::core::testing::{stub_config, stub_context, StubResponse, StubUpstream};
    use serde_json::json;

    fn offline_context(credentials: Credentials) -> Arc<AppContext> {
        // Port 9 (discard) is never served in tests
        stub_context(stub_config("http://127.0.0.1:9"), credentials)
    }

    fn request(method: Method, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_route_resolution() {
        assert_eq!(Route::resolve("/api/eth", "/metrics"), Route::EthLookup);
        assert_eq!(Route::resolve("/api/stats/", "/metrics"), Route::Stats);
        assert_eq!(Route::resolve("/metrics", "/metrics"), Route::Metrics);
        assert_eq!(Route::resolve("/api/nope", "/metrics"), Route::Unknown);
        assert!(Route::AvaxLookup.allows(&Method::POST));
        assert!(!Route::Stats.allows(&Method::POST));
    }

    #[test]
    fn test_query_map_decodes() {
        let uri: Uri = "/api/eth?ids=1%2C2&includeSeries=true&flag".parse().unwrap();
        let query = query_map(&uri);
        assert_eq!(query.get("ids").map(String::as_str), Some("1,2"));
        assert_eq!(query.get("includeSeries").map(String::as_str), Some("true"));
        assert_eq!(query.get("flag").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn test_preflight() {
        let ctx = offline_context(Credentials::default());
        let response = handle(ctx, request(Method::OPTIONS, "/api/eth", "")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "GET,POST,OPTIONS");
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "86400");
    }

    #[tokio::test]
    async fn test_unknown_path_and_wrong_method() {
        let ctx = offline_context(Credentials::default());

        let response = handle(ctx.clone(), request(Method::GET, "/api/solana", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "not_found");

        let response = handle(ctx, request(Method::DELETE, "/api/eth", "")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            body_json(response).await,
            json!({ "error": "method_not_allowed" })
        );
    }

    #[tokio::test]
    async fn test_invalid_chain_is_bad_request() {
        let ctx = offline_context(Credentials::default());
        for uri in ["/api/stats", "/api/charts?chain=solana", "/api/llama?chain="] {
            let response = handle(ctx.clone(), request(Method::GET, uri, "")).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            let body = body_json(response).await;
            assert_eq!(body["error"], "invalid_request");
            assert_eq!(body["message"], "missing_or_invalid_chain");
        }
    }

    #[tokio::test]
    async fn test_lookup_body_handling() {
        let ctx = offline_context(Credentials::default());

        let response = handle(ctx.clone(), request(Method::POST, "/api/eth", "{not json")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
        assert_eq!(response.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(body_json(response).await, json!({ "validators": [] }));

        let response = handle(
            ctx,
            request(Method::POST, "/api/eth", r#"{"identifiers":"0xabc"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let ctx = offline_context(Credentials::default());

        let padding = "x".repeat(MAX_BODY_BYTES);
        let body = json!({ "identifiers": [1], "padding": padding }).to_string();
        let response = handle(ctx.clone(), request(Method::POST, "/api/eth", &body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["message"],
            format!("request body exceeds {} bytes", MAX_BODY_BYTES)
        );

        // Declared length alone is enough to refuse the body
        let declared = Request::builder()
            .method(Method::POST)
            .uri("/api/avax")
            .header(CONTENT_LENGTH, "1048576")
            .body(Body::from("{}"))
            .unwrap();
        let response = handle(ctx.clone(), declared).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Just under the cap is still read
        let filler = "y".repeat(MAX_BODY_BYTES - 100);
        let body = json!({ "identifiers": [], "padding": filler }).to_string();
        assert!(body.len() <= MAX_BODY_BYTES);
        let response = handle(ctx, request(Method::POST, "/api/eth", &body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "validators": [] }));
    }

    #[tokio::test]
    async fn test_missing_credential_is_500() {
        let ctx = offline_context(Credentials::default());
        for uri in ["/api/stats?chain=avalanche", "/api/llama?chain=ethereum"] {
            let response = handle(ctx.clone(), request(Method::GET, uri, "")).await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
            assert_eq!(body_json(response).await["error"], "configuration_error");
        }

        let response = handle(
            ctx,
            request(Method::POST, "/api/avax", r#"{"nodeIds":["NodeID-a"]}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await["message"],
            "Missing GLACIER_API_KEY env var"
        );
    }

    #[tokio::test]
    async fn test_eth_lookup_end_to_end() {
        let stub = StubUpstream::start(|_| {
            StubResponse::json(
                200,
                json!({ "data": { "validatorindex": 42, "status": "active", "balance": 32000000000u64 } }),
            )
        })
        .await;
        let ctx = stub_context(stub_config(&stub.base_url()), Credentials::default());

        let body = json!({ "pubkeys": [format!("{:0<18}", "0xabc123")], "includeSeries": false });
        let response = handle(ctx, request(Method::POST, "/api/eth", &body.to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let out = body_json(response).await;
        assert_eq!(out["validators"][0]["validatorId"], 42);
        assert_eq!(out["validators"][0]["status"], "active");
        assert_eq!(out["validators"][0]["balanceEth"], "32.00000");
    }

    #[tokio::test]
    async fn test_stats_fallback_end_to_end() {
        let stub = StubUpstream::start(|req| {
            if req.path == "/vq" {
                StubResponse::html("<p>Active Validators</p><p>1,000,000</p><p>APR 2.91%</p>")
            } else {
                StubResponse::text(503, "unavailable")
            }
        })
        .await;
        let ctx = stub_context(stub_config(&stub.base_url()), Credentials::default());

        let response = handle(ctx, request(Method::GET, "/api/stats?chain=Ethereum", "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let out = body_json(response).await;
        assert_eq!(out["source"], "validatorqueue.com");
        assert_eq!(out["activeValidators"], 1_000_000);
        assert_eq!(out["apr"], 2.91);
        assert!(out["entryQueue"].is_null());
    }

    #[tokio::test]
    async fn test_metrics_path() {
        register_proxy_metrics();
        let ctx = offline_context(Credentials::default());
        handle(ctx.clone(), request(Method::GET, "/api/unknown", "")).await;

        let response = handle(ctx, request(Method::GET, "/metrics", "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("gotnodes_proxy_requests"));
    }
}

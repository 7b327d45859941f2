//! In-process stand-in for third-party providers, used by handler tests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use hyper::{
    header::CONTENT_TYPE,
    service::{make_service_fn, service_fn},
    Body, HeaderMap, Request, Response, Server,
};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::core::app_context::AppContext;
use crate::core::config::{AppConfig, Credentials};

#[derive(Debug)]
pub struct StubRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl StubRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    pub fn body_json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            if k == name {
                urlencoding::decode(v).ok().map(|v| v.into_owned())
            } else {
                None
            }
        })
    }
}

pub struct StubResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl StubResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.to_string(),
        }
    }

    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.to_string(),
        }
    }
}

pub struct StubUpstream {
    addr: SocketAddr,
    hits: Arc<Mutex<Vec<String>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StubUpstream {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&StubRequest) -> StubResponse + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let hits = Arc::new(Mutex::new(Vec::new()));

        let svc_handler = handler.clone();
        let svc_hits = hits.clone();
        let make_svc = make_service_fn(move |_| {
            let handler = svc_handler.clone();
            let hits = svc_hits.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let handler = handler.clone();
                    let hits = hits.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = hyper::body::to_bytes(body).await.unwrap_or_default();
                        let request = StubRequest {
                            method: parts.method.to_string(),
                            path: parts.uri.path().to_string(),
                            query: parts.uri.query().map(|q| q.to_string()),
                            headers: parts.headers,
                            body: body.to_vec(),
                        };
                        hits.lock()
                            .unwrap()
                            .push(format!("{} {}", request.method, request.path));

                        let stub = handler(&request);
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(stub.status)
                                .header(CONTENT_TYPE, stub.content_type)
                                .body(Body::from(stub.body))
                                .unwrap(),
                        )
                    }
                }))
            }
        });

        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server.with_graceful_shutdown(async {
            rx.await.ok();
        }));

        Self {
            addr,
            hits,
            shutdown: Some(tx),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// `"<METHOD> <path>"` for every request served so far
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }

    pub fn hit_count(&self, path_prefix: &str) -> usize {
        self.hits()
            .iter()
            .filter(|h| h.split_once(' ').map(|(_, p)| p.starts_with(path_prefix)).unwrap_or(false))
            .count()
    }
}

impl Drop for StubUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Config with every provider pointed at `base_url`
pub fn stub_config(base_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.upstreams.timeout_seconds = 5;
    config.upstreams.beaconchain.url = base_url.to_string();
    config.upstreams.glacier.urls = vec![base_url.to_string()];
    config.upstreams.llama.pro_url = format!("{}/pro", base_url);
    config.upstreams.llama.open_url = format!("{}/open", base_url);
    config.upstreams.validatorqueue.url = format!("{}/vq", base_url);
    config
}

pub fn stub_context(config: AppConfig, credentials: Credentials) -> Arc<AppContext> {
    Arc::new(AppContext::new(config, credentials).unwrap())
}

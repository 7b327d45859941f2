use std::fs;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod blockchains;
mod core;
mod defillama;

use crate::core::app_context::AppContext;
use crate::core::config::{AppConfig, Credentials};
use crate::core::metrics::proxy_metrics::{register_app_version_info, register_proxy_metrics};
use crate::core::server::serve;

#[tokio::main]
async fn main() {
    // Plain log lines, no spans
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_ansi(true)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
        .init();

    // A missing .env is fine
    let _ = dotenv::dotenv();

    println!("{}", ascii_art());

    let mut args = std::env::args().skip(1);
    let mut config_path = "config.yaml".to_string();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                config_path = path;
            } else {
                error!("--config flag provided but no file specified");
                std::process::exit(1);
            }
        }
    }

    let config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("Startup failed:");
            for (i, cause) in err.chain().enumerate() {
                error!("  {}: {}", i, cause);
            }
            std::process::exit(1);
        }
    };
    info!("[main] Config loaded from {}", config_path);

    let credentials = Credentials::resolve(&config);
    info!(
        "[main] Credentials: beaconcha.in {}, glacier {}, defillama {}",
        presence(&credentials.beaconchain),
        presence(&credentials.glacier),
        presence(&credentials.llama)
    );

    let network = config.general.network.clone();
    let app_context = match AppContext::new(config, credentials) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("Failed to build upstream HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    info!("[main] Registering proxy metrics...");
    register_proxy_metrics();
    register_app_version_info(&network);

    let token = CancellationToken::new();

    tokio::select! {
        result = serve(app_context.clone(), token.clone()) => {
            if let Err(err) = result {
                error!("Hyper server exited: {:#}", err);
                std::process::exit(1);
            }
        },
        _ = listen_for_shutdown(token.clone()) => {
            info!("Gracefully shut down server.")
        }
    }
}

fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let config: AppConfig =
        serde_yaml::from_str(&raw).with_context(|| format!("Failed to parse {}", path))?;
    let config = config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn presence(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "set"
    } else {
        "missing"
    }
}

pub async fn listen_for_shutdown(cancel_token: CancellationToken) {
    let sigint = signal::ctrl_c();
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("Could not install SIGTERM handler: {}", e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = sigint => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    if cfg!(debug_assertions) {
        info!("Received Ctrl+C in dev mode. Shutting down immediately.");
        std::process::exit(0);
    }

    cancel_token.cancel();
}

fn ascii_art() -> &'static str {
    r#"

 ██████╗  ██████╗ ████████╗███╗   ██╗ ██████╗ ██████╗ ███████╗███████╗
██╔════╝ ██╔═══██╗╚══██╔══╝████╗  ██║██╔═══██╗██╔══██╗██╔════╝██╔════╝
██║  ███╗██║   ██║   ██║   ██╔██╗ ██║██║   ██║██║  ██║█████╗  ███████╗
██║   ██║██║   ██║   ██║   ██║╚██╗██║██║   ██║██║  ██║██╔══╝  ╚════██║
╚██████╔╝╚██████╔╝   ██║   ██║ ╚████║╚██████╔╝██████╔╝███████╗███████║
 ╚═════╝  ╚═════╝    ╚═╝   ╚═╝  ╚═══╝ ╚═════╝ ╚═════╝ ╚══════╝╚══════╝

██████╗ ██████╗  ██████╗ ██╗  ██╗██╗   ██╗
██╔══██╗██╔══██╗██╔═══██╗╚██╗██╔╝╚██╗ ██╔╝
██████╔╝██████╔╝██║   ██║ ╚███╔╝  ╚████╔╝
██╔═══╝ ██╔══██╗██║   ██║ ██╔██╗   ╚██╔╝
██║     ██║  ██║╚██████╔╝██╔╝ ██╗   ██║
╚═╝     ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝   ╚═╝
    "#
}

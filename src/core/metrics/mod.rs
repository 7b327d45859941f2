pub mod proxy_metrics;

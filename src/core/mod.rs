pub mod app_context;
pub mod assemble;
pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod fallback;
pub mod metrics;
pub mod normalize;
pub mod server;
pub mod units;
pub mod utils;

#[cfg(test)]
pub mod testing;

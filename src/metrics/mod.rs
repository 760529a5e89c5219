//! Prometheus metrics for deployment runs
//!
//! A run is a short-lived process, so there is no scrape endpoint. When a
//! textfile path is configured the registry is written there at exit for a
//! node-exporter textfile collector to pick up.

use crate::error::DeployerResult;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::path::Path;
use tracing::info;

lazy_static! {
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "nitrility_deployer_transactions_submitted_total",
        "Total transactions submitted",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "nitrility_deployer_transactions_confirmed_total",
        "Total transactions that reached the required confirmation depth",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "nitrility_deployer_transactions_failed_total",
        "Total transactions rejected, reverted or timed out",
        &["chain_id"]
    ).unwrap();

    pub static ref CONFIRMATION_LATENCY: HistogramVec = register_histogram_vec!(
        "nitrility_deployer_confirmation_latency_seconds",
        "Time from submission to required confirmation depth",
        &["chain_id"],
        vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();

    pub static ref CONTRACTS_DEPLOYED: CounterVec = register_counter_vec!(
        "nitrility_deployer_contracts_deployed_total",
        "Total contracts deployed",
        &["interface"]
    ).unwrap();
}

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_confirmed(chain_id: u64, latency_secs: f64) {
    let chain = chain_id.to_string();
    TX_CONFIRMED.with_label_values(&[&chain]).inc();
    CONFIRMATION_LATENCY
        .with_label_values(&[&chain])
        .observe(latency_secs);
}

pub fn record_tx_failed(chain_id: u64) {
    TX_FAILED.with_label_values(&[&chain_id.to_string()]).inc();
}

pub fn record_contract_deployed(interface: &str) {
    CONTRACTS_DEPLOYED.with_label_values(&[interface]).inc();
}

/// Render the default registry in text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Write the registry to a textfile, replacing it atomically
pub fn write_textfile(path: &Path) -> DeployerResult<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, render())?;
    std::fs::rename(&tmp, path)?;
    info!("Metrics written to {}", path.display());
    Ok(())
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Initialize Tracing (Logs)
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cairn_node=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer());
    if subscriber.try_init().is_err() {
        tracing::warn!("Tracing subscriber already installed");
    }

    // 2. Initialize Metrics (Prometheus)
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => {
            tracing::warn!("Failed to install Prometheus recorder: {}", e);
            return;
        }
    }

    metrics::describe_counter!("cairn_wal_records_written_total", "Records appended to the consensus WAL");
    metrics::describe_counter!("cairn_wal_bytes_written_total", "Bytes appended to the consensus WAL");
    metrics::describe_histogram!("cairn_wal_fsync_duration_seconds", "Time taken to fsync the WAL");
    metrics::describe_counter!("cairn_replay_messages_total", "WAL messages replayed at startup");
    metrics::describe_histogram!("cairn_replay_duration_seconds", "Time taken to replay the WAL");
    metrics::describe_counter!("cairn_handshake_blocks_replayed_total", "Blocks replayed into the application");
    metrics::describe_counter!("cairn_blocks_committed_total", "Blocks finalized by consensus");

    metrics::gauge!("cairn_node_up", 1.0);
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}

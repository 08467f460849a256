// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! batchd: batch ingestion, idempotent work dispatch, progress tracking,
//! and the per-request log relay.

pub mod config;
pub mod consumer;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod model;
pub mod progress;
pub mod relay;
pub mod time;
pub mod topic;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::consumer::ConsumerDeps;
use crate::dedup::{DedupCache, KvDedupCache, MemoryCache};
use crate::ingest::BatchIngestor;
use crate::progress::{MemoryProgressStore, ProgressStore};
use crate::relay::{JetStreamLogBroker, LogBroker, MemoryLogBroker};
use crate::topic::{JetStreamTopic, MemoryTopic, WorkTopic};
use crate::transport::{build_router, AppState};

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    static CRYPTO_INIT: std::sync::Once = std::sync::Once::new();
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Run the batch service until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);
    ensure_crypto();
    config.validate()?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let progress: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::new());
    let http = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.read_timeout() + config.write_timeout())
        .pool_idle_timeout(config.pool_timeout())
        .build()?;

    // Broker-backed capabilities in multi-instance mode; in-memory ones
    // when running single-instance.
    let (topic, relay): (Arc<dyn WorkTopic>, Arc<dyn LogBroker>) =
        match config.broker_url {
            Some(ref url) => {
                let client = async_nats::connect(url).await?;
                let js = async_nats::jetstream::new(client);
                info!(url = %url, "broker connected");

                let topic = Arc::new(
                    JetStreamTopic::connect(js.clone(), &config.work_stream, &config.topic_name)
                        .await?,
                );
                let cache = Arc::new(
                    KvDedupCache::connect(&js, config.inflight_ttl(), config.dedup_ttl()).await?,
                );
                let relay = Arc::new(JetStreamLogBroker::connect(js, &config.log_stream).await?);

                let deps = Arc::new(ConsumerDeps {
                    cache: Arc::clone(&cache) as Arc<dyn DedupCache>,
                    http: http.clone(),
                    processor_url: config.processor_url.clone(),
                    inflight_ttl: config.inflight_ttl(),
                    dedup_ttl: config.dedup_ttl(),
                    nack_on_failure: config.nack_on_planner_failure,
                });
                let js_consumer = topic
                    .pull_consumer(
                        &config.work_subscription,
                        config.max_outstanding_messages as i64,
                    )
                    .await?;
                let max = config.max_outstanding_messages;
                let sd = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = consumer::run_jetstream(deps, js_consumer, max, sd).await {
                        tracing::error!(err = %e, "dispatch consumer failed");
                    }
                });

                (topic, relay)
            }
            None => {
                info!("no broker configured; running single-instance in memory");
                let (topic, rx) = MemoryTopic::channel();
                let cache = Arc::new(MemoryCache::new());
                let relay = Arc::new(MemoryLogBroker::new(&config.log_stream));

                let deps = Arc::new(ConsumerDeps {
                    cache: Arc::clone(&cache) as Arc<dyn DedupCache>,
                    http: http.clone(),
                    processor_url: config.processor_url.clone(),
                    inflight_ttl: config.inflight_ttl(),
                    dedup_ttl: config.dedup_ttl(),
                    nack_on_failure: config.nack_on_planner_failure,
                });
                let max = config.max_outstanding_messages;
                let sd = shutdown.clone();
                tokio::spawn(consumer::run_memory(deps, rx, max, sd));

                (topic, relay)
            }
        };

    let state = Arc::new(AppState {
        ingestor: Arc::new(BatchIngestor::new(Arc::clone(&progress), topic)),
        progress,
        relay,
        sse_block: config.sse_block(),
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("batchd listening on {addr}");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        // First signal: graceful shutdown.
        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGTERM"),
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGINT"),
        }
        shutdown.cancel();

        // Second signal: force exit.
        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGTERM again, forcing exit"),
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGINT again, forcing exit"),
        }
        std::process::exit(130);
    });
}

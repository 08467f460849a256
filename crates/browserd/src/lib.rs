// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! browserd: remote-desktop browser session supervisor for prior-auth
//! agent workers.

pub mod agent;
pub mod browser;
pub mod config;
pub mod error;
pub mod logs;
pub mod registry;
pub mod slots;
pub mod supervisor;
#[cfg(test)]
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::agent::driver::FormFillLoop;
use crate::agent::tools::ToolSet;
use crate::agent::{AgentRunner, LlmConfig};
use crate::config::{Config, SessionPolicy};
use crate::logs::{JetStreamSink, LogSink, NullSink};
use crate::registry::SessionRegistry;
use crate::slots::SlotPool;
use crate::supervisor::{ProcessSupervisor, SupervisorConfig};
use crate::transport::{build_router, AppState};

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
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

/// Run the session supervisor until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);
    ensure_crypto();
    config.validate()?;

    let policy = config.policy()?;
    let pool_size = match policy {
        SessionPolicy::FixedPool { size } => size,
        SessionPolicy::Single => 1,
    };
    let pool = SlotPool::new(
        pool_size,
        config.base_display,
        config.base_vnc_port,
        config.base_web_port,
    );

    let backend = Arc::new(ProcessSupervisor::new(SupervisorConfig {
        browser_bin: config.browser_bin.clone(),
        novnc_root: config.novnc_root.clone(),
        extensions_dir: config.extensions_dir.clone(),
        profile_base: config.profile_dir.clone(),
        display_ready_timeout: config.display_ready_timeout(),
        grace: config.grace(),
        browser_attempts: config.browser_attempts,
    }));

    let registry = Arc::new(SessionRegistry::new(
        policy,
        pool,
        backend,
        config.vnc_base_url.clone(),
        config.grace(),
    ));

    let sink: Arc<dyn LogSink> = match config.broker_url {
        Some(ref url) => Arc::new(JetStreamSink::connect(url, &config.log_stream).await?),
        None => {
            info!("no broker configured; agent logs stay local");
            Arc::new(NullSink::new(&config.log_stream))
        }
    };

    let http = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(5))
        .build()?;

    let runner = Arc::new(AgentRunner::new(
        Arc::clone(&registry),
        Arc::new(FormFillLoop::default()),
        sink,
        LlmConfig {
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
            api_key: config.google_api_key.clone(),
        },
        ToolSet::new(
            config.upload_whitelist.clone(),
            config.hitl_webhook_url.clone(),
            http.clone(),
        ),
        config.progress_url.clone(),
        http,
    ));

    let state = Arc::new(AppState { registry: Arc::clone(&registry), runner });
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("browserd listening on {addr}");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // Tear down every live session before exiting so no child outlives us.
    for session in registry.list().await {
        if let Err(e) = registry.delete(&session.session_id).await {
            tracing::warn!(target: "cleanup", session_id = %session.session_id, err = %e, "shutdown teardown failed");
        }
    }

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

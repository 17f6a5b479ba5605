//! PayGuard service entry point.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use payguard_config::GuardConfig;
use payguard_ingress::{PayoutPoller, PollerConfig};
use payguard_service::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GuardConfig::from_env().context("loading configuration")?;
    payguard_telemetry::init_tracing("info");

    let state = Arc::new(AppState::from_config(config).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller_handle = if state.config.auto_poll {
        if state.config.payment_account.is_none() {
            warn!("auto-poll enabled but no payment account configured, poller disabled");
            None
        } else {
            let poller = Arc::new(
                PayoutPoller::new(
                    state.payments(),
                    Arc::clone(&state.engine),
                    state.gate.clone(),
                    PollerConfig::new(state.config.poll_interval),
                )
                .with_metrics(Arc::clone(&state.metrics)),
            );
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move { poller.run(rx).await }))
        }
    } else {
        None
    };

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "payguard listening");

    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving")?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = poller_handle {
        let _ = handle.await;
    }
    info!("payguard stopped");
    Ok(())
}

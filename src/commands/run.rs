use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

use pifleet::announce::Beacon;
use pifleet::config::{Config, DiscoveryMethod};
use pifleet::discovery::DiscoveryService;
use pifleet::notify::WebhookNotifier;
use pifleet::reconcile::Reconciler;
use pifleet::status::StatusServer;
use pifleet::storage::open_repository;

/// Overrides from the command line
#[derive(Debug, Default)]
pub struct RunParams {
    pub method: Option<DiscoveryMethod>,
    pub interface: Option<String>,
    pub announce: bool,
    pub status: bool,
}

/// Run discovery, reconciliation and the optional beacon and status server
/// until ctrl-c
pub async fn run(mut config: Config, params: RunParams) -> Result<()> {
    if let Some(method) = params.method {
        config.discovery.method = method;
    }
    if params.interface.is_some() {
        config.discovery.interface = params.interface;
    }
    config.validate()?;

    super::init_metrics();

    let repo = open_repository(&config.storage).with_context(|| {
        format!(
            "Failed to open node registry at {}",
            config.storage.sqlite_path.display()
        )
    })?;

    let service = Arc::new(DiscoveryService::from_config(config.discovery.clone())?);
    service.subscribe(Arc::new(Reconciler::new(repo)));

    if let Some(notifier) = WebhookNotifier::from_config(&config.notify)? {
        tracing::info!(url = %notifier.url(), "Webhook notifier enabled");
        service.subscribe(Arc::new(notifier));
    }

    let beacon = if params.announce {
        Some(Beacon::new(&config.announce, &config.discovery).start()?)
    } else {
        None
    };

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let status_task = (params.status && config.status.enabled).then(|| {
        let server = StatusServer::new(config.status.bind_address, service.clone());
        tokio::spawn(async move {
            server
                .start_with_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
        })
    });

    service.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    service.close().await;

    if let Some(beacon) = beacon {
        if let Err(e) = beacon.stop().await {
            tracing::warn!(error = %e, "Failed to withdraw announcement");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(task) = status_task {
        match task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "Status server failed"),
            Err(e) => tracing::warn!(error = %e, "Status server task panicked"),
            Ok(Ok(())) => {}
        }
    }

    Ok(())
}

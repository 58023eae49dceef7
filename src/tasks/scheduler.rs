use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::interval;

use crate::core::config::Settings;
use crate::services::evaluator::Evaluator;
use crate::store::JobStore;
use crate::tasks::evaluation::{maintenance, Worker, WorkerConfig};

/// Spawns the configured number of workers plus the lease sweep, then waits for a
/// shutdown signal. In-flight evaluations finish before their worker exits; anything
/// still leased is recovered by lease expiry on the next start.
pub(crate) async fn run(
    settings: &Settings,
    store: Arc<dyn JobStore>,
    evaluator: Arc<dyn Evaluator>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let concurrency = settings.worker().concurrency;
    let host = worker_host();

    let mut handles = Vec::with_capacity(concurrency + 1);
    for index in 0..concurrency {
        let config = WorkerConfig::from_settings(
            settings.worker(),
            settings.ai(),
            format!("{host}-{}-{index}", std::process::id()),
        );
        let worker = Worker::new(store.clone(), evaluator.clone(), config);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { worker.run(shutdown).await }));
    }

    handles.push(tokio::spawn(lease_sweep_loop(
        store.clone(),
        settings.clone(),
        shutdown_rx.clone(),
    )));

    tracing::info!(workers = concurrency, "Evaluation scheduler running");

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn lease_sweep_loop(
    store: Arc<dyn JobStore>,
    settings: Settings,
    mut shutdown: watch::Receiver<bool>,
) {
    let worker = settings.worker();
    let mut tick = interval(worker.lease_sweep_interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = maintenance::sweep_expired_leases(
                    store.as_ref(),
                    worker.max_retries,
                    worker.lease_duration,
                )
                .await
                {
                    metrics::counter!("evaluation_store_errors_total").increment(1);
                    tracing::error!(error = %err, "sweep_expired_leases failed");
                }
            }
        }
    }
}

fn worker_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "evalq".to_string())
}

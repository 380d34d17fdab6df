//! The worker pool: a fixed number of independent polling loops.
//!
//! Each loop receives at most one message at a time and processes it to
//! completion before receiving again. There is no dispatcher; the broker's
//! lease is the only coordination between loops (and between processes).

use std::sync::Arc;

use tc_av::ExecutionEngine;
use tc_core::Result;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::processor;

pub struct WorkerPool {
    ctx: AppContext,
    engine: Arc<ExecutionEngine>,
}

impl WorkerPool {
    pub fn new(ctx: AppContext, engine: Arc<ExecutionEngine>) -> Self {
        Self { ctx, engine }
    }

    /// Run until `cancel` fires, then wait up to the grace period for
    /// in-flight tasks.
    ///
    /// Loops still busy when the grace period ends are detached, not
    /// aborted; their encoders are left to process exit.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let worker = &self.ctx.config.worker;
        tokio::fs::create_dir_all(&worker.temp_dir).await?;

        if worker.concurrency == 0 {
            tracing::warn!("Worker concurrency is 0; waiting for shutdown");
        }

        let mut loops = JoinSet::new();
        for worker_id in 0..worker.concurrency {
            loops.spawn(run_worker(
                worker_id,
                self.ctx.clone(),
                self.engine.clone(),
                cancel.clone(),
            ));
        }
        tracing::info!(
            concurrency = worker.concurrency,
            platform = %self.engine.capabilities().platform,
            "Worker pool started"
        );

        cancel.cancelled().await;
        tracing::info!(
            grace_secs = worker.shutdown_grace_secs,
            "Shutting down; waiting for in-flight tasks"
        );

        let drain = async {
            while let Some(joined) = loops.join_next().await {
                if let Err(e) = joined {
                    tracing::error!("Worker loop panicked: {e}");
                }
            }
        };
        if tokio::time::timeout(worker.shutdown_grace(), drain).await.is_err() {
            tracing::warn!(
                busy = loops.len(),
                "Grace period elapsed with tasks still in flight"
            );
            loops.detach_all();
        }

        tracing::info!("Worker pool stopped");
        Ok(())
    }
}

async fn run_worker(
    worker_id: usize,
    ctx: AppContext,
    engine: Arc<ExecutionEngine>,
    cancel: CancellationToken,
) {
    let wait = ctx.config.queue.wait();
    tracing::debug!(worker_id, "Worker started");

    loop {
        let received = tokio::select! {
            r = ctx.queue.receive(1, wait) => r,
            _ = cancel.cancelled() => break,
        };

        match received {
            Ok(messages) => {
                for message in &messages {
                    processor::process_message(&ctx, &engine, message).await;
                }
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "Receive failed");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    tracing::debug!(worker_id, "Worker stopped");
}

/// Resolve when the process receives Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}

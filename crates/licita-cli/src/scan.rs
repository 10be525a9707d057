//! Runs a pool scan off the async runtime, cancelled by Ctrl-C.

use anyhow::Context;
use licita_core::ScanConfig;
use licita_ingest::{CancelToken, ScanStats, UnitHandler, WorkerPool};
use tracing::{info, warn};

/// List the configured snapshots and drive `handler` over them.
///
/// The handler is returned with its collected state once every worker joins.
pub async fn run<H>(config: &ScanConfig, handler: H) -> anyhow::Result<(H, ScanStats)>
where
    H: UnitHandler + Send + 'static,
{
    let files = licita_ingest::snapshot_files(config)
        .with_context(|| format!("listing {}", config.snapshot_dir.display()))?;
    info!(
        dir = %config.snapshot_dir.display(),
        files = files.len(),
        workers = config.workers(),
        "scanning snapshots"
    );

    let pool = WorkerPool::from_config(config);
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing files in flight");
            on_interrupt.cancel();
        }
    });

    let scan = tokio::task::spawn_blocking(move || {
        let stats = pool.run(files, &handler, &cancel);
        (handler, stats)
    });
    let result = scan.await.context("scan worker panicked");
    interrupt.abort();
    result
}

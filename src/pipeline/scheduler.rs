// Scheduler: retention sweep, ingestion pass, wait, repeat.

use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use super::ingest::Ingestor;
use crate::db::Database;
use crate::error::is_store_unavailable;

/// How long persisted rows are kept.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub relays: chrono::Duration,
    pub fingerprints: chrono::Duration,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            relays: chrono::Duration::days(90),
            fingerprints: chrono::Duration::days(365),
        }
    }
}

/// Waits between passes.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    /// After a pass that relayed something.
    pub active_wait: Duration,
    /// After a pass that relayed nothing or was aborted.
    pub idle_wait: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            active_wait: Duration::from_secs(5 * 60),
            idle_wait: Duration::from_secs(15 * 60),
        }
    }
}

impl Schedule {
    /// The wait after a pass with this result.
    pub fn wait_after(&self, pass: &Result<usize>) -> Duration {
        match pass {
            Ok(n) if *n > 0 => self.active_wait,
            _ => self.idle_wait,
        }
    }
}

/// Delete expired relay records and fingerprints. Returns both counts.
pub async fn sweep(db: &dyn Database, retention: Retention) -> Result<(u64, u64)> {
    let relays = db.sweep_relays_older_than(retention.relays).await?;
    let fingerprints = db
        .sweep_fingerprints_older_than(retention.fingerprints)
        .await?;
    if relays > 0 || fingerprints > 0 {
        info!(relays = relays, fingerprints = fingerprints, "Deleted expired rows");
    }
    Ok((relays, fingerprints))
}

/// Whether a pass should follow this sweep. When the store cannot be
/// reached every item of the pass would fail, so the pass is skipped.
pub fn pass_after_sweep(swept: &Result<(u64, u64)>) -> bool {
    match swept {
        Ok(_) => true,
        Err(e) => !is_store_unavailable(e),
    }
}

/// Run passes until the process exits. An aborted pass is reported to the
/// operator and followed by the idle wait.
pub async fn run_forever(
    ingestor: &Ingestor,
    db: &dyn Database,
    retention: Retention,
    schedule: Schedule,
) {
    loop {
        let swept = sweep(db, retention).await;
        if let Err(e) = &swept {
            warn!(error = %e, "Retention sweep failed");
        }
        if !pass_after_sweep(&swept) {
            ingestor
                .notifier()
                .notify("Store unavailable, skipping this pass")
                .await;
            tokio::time::sleep(schedule.idle_wait).await;
            continue;
        }

        let pass = ingestor.run_pass().await;
        if let Err(e) = &pass {
            error!(error = %e, "Ingestion pass aborted");
            ingestor
                .notifier()
                .notify(&format!("Ingestion pass aborted: {e:#}"))
                .await;
        }

        let wait = schedule.wait_after(&pass);
        info!(wait_secs = wait.as_secs(), "Next pass scheduled");
        tokio::time::sleep(wait).await;
    }
}

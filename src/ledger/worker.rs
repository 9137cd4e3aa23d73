//! Reconciliation Worker
//!
//! Background worker that finishes LOG_PENDING transfers (money moved,
//! history incomplete), keeps shouting about transfers that need an operator
//! and forgets settled transfers once `journal_retention_secs` has passed.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::coordinator::TransferEngine;
use super::state::TransferState;

/// Configuration for the reconciliation worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan the journal
    pub scan_interval: Duration,
    /// How long an entry must be untouched to be picked up
    pub stale_threshold: Duration,
    /// Maximum transfers to process per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(10),
            batch_size: 100,
        }
    }
}

/// Outcome of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ScanReport {
    /// LOG_PENDING transfers whose history is now complete
    pub resumed: usize,
    /// LOG_PENDING transfers still missing records
    pub still_pending: usize,
    /// Non-terminal transfers with no progress (commit task lost)
    pub stuck: usize,
    /// Transfers waiting for manual repair
    pub needs_reconciliation: usize,
    /// Settled transfers dropped from the journal
    pub purged: usize,
}

pub struct ReconciliationWorker {
    engine: TransferEngine,
    config: WorkerConfig,
}

impl ReconciliationWorker {
    pub fn new(engine: TransferEngine, config: WorkerConfig) -> Self {
        Self { engine, config }
    }

    pub fn with_defaults(engine: TransferEngine) -> Self {
        Self::new(engine, WorkerConfig::default())
    }

    /// Run forever, one scan per `scan_interval`
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting reconciliation worker"
        );

        loop {
            self.scan_and_recover().await;
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan
    pub async fn scan_and_recover(&self) -> ScanReport {
        let journal = self.engine.journal();
        let mut report = ScanReport::default();

        for entry in journal.find_in_state(TransferState::NeedsReconciliation) {
            report.needs_reconciliation += 1;
            error!(
                transfer_id = %entry.transfer_id,
                sender = %entry.sender,
                amount = %entry.amount,
                "Transfer needs manual reconciliation: sender debited, recipient not credited"
            );
        }

        report.purged = journal.purge_settled(self.engine.config().journal_retention());

        let stale = journal.find_stale(self.config.stale_threshold, self.config.batch_size);
        if stale.is_empty() {
            debug!("No stale transfers found");
            return report;
        }

        info!(count = stale.len(), "Found stale transfers");

        for entry in stale {
            if entry.state != TransferState::LogPending {
                report.stuck += 1;
                warn!(
                    transfer_id = %entry.transfer_id,
                    state = %entry.state,
                    "Transfer made no progress since {}",
                    entry.updated_at
                );
                continue;
            }

            debug!(
                transfer_id = %entry.transfer_id,
                retry_count = entry.retry_count,
                "Resuming log writes"
            );
            match self.engine.resume(entry.transfer_id).await {
                Ok(_) => report.resumed += 1,
                Err(e) => {
                    report.still_pending += 1;
                    warn!(
                        transfer_id = %entry.transfer_id,
                        retry_count = entry.retry_count + 1,
                        error = %e,
                        "Log writes still failing"
                    );
                }
            }
        }

        if report.resumed > 0 {
            info!(count = report.resumed, "Reconciled transfers this scan");
        }
        report
    }
}

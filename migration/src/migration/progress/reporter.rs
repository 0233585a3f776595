//! Progress reporting abstraction for migration runs

use tracing::{debug, error, info, warn};

use super::{DocumentState, MigrationSummary, RunPhase};
use crate::services::errors::MigrationError;

/// Trait for reporting migration progress
pub trait ProgressReporter: Send + Sync {
    fn report_phase(&self, phase: RunPhase);
    fn report_document(&self, policy_id: &str, state: DocumentState);
    fn report_error(&self, error: &MigrationError);
    fn report_completion(&self, summary: &MigrationSummary);
}

/// Reporter writing to the `tracing` subscriber the binary installs
pub struct TracingProgressReporter {
    dry_run: bool,
}

impl TracingProgressReporter {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    fn prefix(&self) -> &'static str {
        if self.dry_run {
            "[dry-run] "
        } else {
            ""
        }
    }
}

impl ProgressReporter for TracingProgressReporter {
    fn report_phase(&self, phase: RunPhase) {
        match phase {
            RunPhase::Connecting => {
                info!("Starting migration of policies.");
                if self.dry_run {
                    warn!("Note: dry-run mode is enabled, no policy will be modified.");
                }
            }
            RunPhase::Streaming => info!("Connected, streaming policies"),
            RunPhase::Draining => debug!("Search complete, waiting for outstanding writes"),
            RunPhase::Finished => debug!("Run finished"),
        }
    }

    fn report_document(&self, policy_id: &str, state: DocumentState) {
        match state {
            DocumentState::Pending => debug!("Processing policy: {}", policy_id),
            DocumentState::Skipped => debug!("Skipping policy: {}", policy_id),
            DocumentState::Done => info!("{}Migrated policy: {}", self.prefix(), policy_id),
            DocumentState::Failed => warn!("{}Migration failed for policy: {}", self.prefix(), policy_id),
        }
    }

    fn report_error(&self, error: &MigrationError) {
        if error.is_fatal() {
            error!(severity = ?error.severity(), "{}", error);
        } else {
            warn!(severity = ?error.severity(), "{}", error);
        }
    }

    fn report_completion(&self, summary: &MigrationSummary) {
        info!(
            "Migration finished in {:.2}s (started {})",
            summary.elapsed.as_secs_f64(),
            summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        info!("{} migrations successful.", summary.done);
        if summary.skipped > 0 {
            info!("{} migrations skipped.", summary.skipped);
        }
        if summary.failed > 0 {
            match &summary.failed_report {
                Some(path) => error!(
                    "{} migrations failed. See {} for raw error response log.",
                    summary.failed,
                    path.display()
                ),
                None => error!("{} migrations failed.", summary.failed),
            }
        }
        if summary.dry_run {
            warn!("This was a dry-run. No policy was modified.");
        }
    }
}

/// Reporter that drops everything
pub struct NoopProgressReporter;

impl ProgressReporter for NoopProgressReporter {
    fn report_phase(&self, _phase: RunPhase) {}
    fn report_document(&self, _policy_id: &str, _state: DocumentState) {}
    fn report_error(&self, _error: &MigrationError) {}
    fn report_completion(&self, _summary: &MigrationSummary) {}
}

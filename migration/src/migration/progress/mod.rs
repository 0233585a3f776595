//! Per-run bookkeeping: document states, outstanding writes and the final summary

pub mod reporter;

pub use reporter::{NoopProgressReporter, ProgressReporter, TracingProgressReporter};

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Lifecycle of one policy within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentState {
    Pending,
    Skipped,
    Failed,
    Done,
}

impl DocumentState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DocumentState::Pending)
    }
}

/// Orchestrator phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Connecting,
    Streaming,
    Draining,
    Finished,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Connecting => "connecting",
            RunPhase::Streaming => "streaming",
            RunPhase::Draining => "draining",
            RunPhase::Finished => "finished",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
struct PendingWrite {
    policy_id: String,
    deadline: Instant,
}

/// Mutable state of a run, owned by the orchestrator task
#[derive(Debug)]
pub struct MigrationProgress {
    started_at: DateTime<Utc>,
    started: Instant,
    dry_run: bool,
    documents: HashMap<String, DocumentState>,
    pending_writes: HashMap<String, PendingWrite>,
    failures: Vec<Value>,
    max_outstanding: usize,
}

impl MigrationProgress {
    pub fn new(dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            dry_run,
            documents: HashMap::new(),
            pending_writes: HashMap::new(),
            failures: Vec::new(),
            max_outstanding: 0,
        }
    }

    /// Record a newly seen policy as Pending.
    ///
    /// Returns false when the id was already observed in this run.
    pub fn observe(&mut self, policy_id: &str) -> bool {
        if self.documents.contains_key(policy_id) {
            return false;
        }
        self.documents
            .insert(policy_id.to_string(), DocumentState::Pending);
        true
    }

    pub fn state_of(&self, policy_id: &str) -> Option<DocumentState> {
        self.documents.get(policy_id).copied()
    }

    pub fn mark_skipped(&mut self, policy_id: &str) -> bool {
        self.settle(policy_id, DocumentState::Skipped)
    }

    pub fn mark_done(&mut self, policy_id: &str) -> bool {
        self.settle(policy_id, DocumentState::Done)
    }

    /// Record a failure together with the raw payload that explains it
    pub fn mark_failed(&mut self, policy_id: &str, payload: Value) -> bool {
        let settled = self.settle(policy_id, DocumentState::Failed);
        if settled {
            self.failures.push(payload);
        }
        settled
    }

    /// The first terminal state of a document sticks; returns false if the
    /// document had already settled
    fn settle(&mut self, policy_id: &str, state: DocumentState) -> bool {
        if let Some(current) = self.state_of(policy_id) {
            if current.is_terminal() {
                debug!("Policy {} already {:?}, not marking {:?}", policy_id, current, state);
                return false;
            }
        }
        self.documents.insert(policy_id.to_string(), state);
        true
    }

    pub fn register_write(&mut self, correlation_id: &str, policy_id: &str, deadline: Instant) {
        self.pending_writes.insert(
            correlation_id.to_string(),
            PendingWrite {
                policy_id: policy_id.to_string(),
                deadline,
            },
        );
        self.max_outstanding = self.max_outstanding.max(self.pending_writes.len());
    }

    pub fn is_pending_write(&self, correlation_id: &str) -> bool {
        self.pending_writes.contains_key(correlation_id)
    }

    /// Remove an outstanding write, returning the policy it belongs to
    pub fn complete_write(&mut self, correlation_id: &str) -> Option<String> {
        self.pending_writes
            .remove(correlation_id)
            .map(|write| write.policy_id)
    }

    pub fn outstanding(&self) -> usize {
        self.pending_writes.len()
    }

    /// Remove and return every write whose deadline is at or before `now`,
    /// as `(correlation_id, policy_id)` pairs
    pub fn take_expired(&mut self, now: Instant) -> Vec<(String, String)> {
        let expired: Vec<String> = self
            .pending_writes
            .iter()
            .filter(|(_, write)| write.deadline <= now)
            .map(|(cid, _)| cid.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|cid| {
                self.pending_writes
                    .remove(&cid)
                    .map(|write| (cid, write.policy_id))
            })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_writes.values().map(|write| write.deadline).min()
    }

    pub fn count(&self, state: DocumentState) -> usize {
        self.documents.values().filter(|s| **s == state).count()
    }

    pub fn observed(&self) -> usize {
        self.documents.len()
    }

    /// Highest number of simultaneously outstanding writes seen so far
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    pub fn failures(&self) -> &[Value] {
        &self.failures
    }

    pub fn summary(&self, failed_report: Option<PathBuf>) -> MigrationSummary {
        MigrationSummary {
            started_at: self.started_at,
            elapsed: self.started.elapsed(),
            done: self.count(DocumentState::Done),
            skipped: self.count(DocumentState::Skipped),
            failed: self.count(DocumentState::Failed),
            max_outstanding: self.max_outstanding,
            dry_run: self.dry_run,
            failed_report,
        }
    }
}

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct MigrationSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub max_outstanding: usize,
    pub dry_run: bool,
    /// Where the raw failure payloads were written, if anything failed
    pub failed_report: Option<PathBuf>,
}

impl MigrationSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// 0 when nothing failed, 2 when the run finished with failed documents.
    /// Fatal errors never produce a summary and exit with 1.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            2
        }
    }

    pub fn total(&self) -> usize {
        self.done + self.skipped + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_observe_rejects_duplicates() {
        let mut progress = MigrationProgress::new(false);
        assert!(progress.observe("ns:a"));
        assert!(!progress.observe("ns:a"));

        progress.mark_skipped("ns:a");
        assert!(!progress.observe("ns:a"));
        assert_eq!(progress.state_of("ns:a"), Some(DocumentState::Skipped));
        assert_eq!(progress.observed(), 1);
    }

    #[test]
    fn test_outstanding_high_water_mark() {
        let mut progress = MigrationProgress::new(false);
        let deadline = Instant::now() + Duration::from_secs(30);
        progress.register_write("c1", "ns:a", deadline);
        progress.register_write("c2", "ns:b", deadline);
        assert_eq!(progress.outstanding(), 2);

        assert_eq!(progress.complete_write("c1"), Some("ns:a".to_string()));
        assert_eq!(progress.complete_write("c1"), None);
        progress.register_write("c3", "ns:c", deadline);

        assert_eq!(progress.outstanding(), 2);
        assert_eq!(progress.max_outstanding(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_expired_only_returns_due_writes() {
        let mut progress = MigrationProgress::new(false);
        let now = Instant::now();
        progress.register_write("early", "ns:a", now + Duration::from_secs(1));
        progress.register_write("late", "ns:b", now + Duration::from_secs(10));
        assert_eq!(progress.next_deadline(), Some(now + Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        let expired = progress.take_expired(Instant::now());

        assert_eq!(expired, vec![("early".to_string(), "ns:a".to_string())]);
        assert!(progress.is_pending_write("late"));
        assert_eq!(progress.next_deadline(), Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_summary_counts_and_exit_code() {
        let mut progress = MigrationProgress::new(true);
        for id in ["ns:a", "ns:b", "ns:c"] {
            progress.observe(id);
        }
        progress.mark_done("ns:a");
        progress.mark_skipped("ns:b");

        let summary = progress.summary(None);
        assert_eq!((summary.done, summary.skipped, summary.failed), (1, 1, 0));
        assert!(summary.dry_run);
        assert_eq!(summary.exit_code(), 0);

        progress.mark_failed("ns:c", json!({ "status": 403 }));
        let summary = progress.summary(Some(PathBuf::from("failed.json")));
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.exit_code(), 2);
        assert_eq!(progress.failures(), &[json!({ "status": 403 })]);
    }

    #[test]
    fn test_settled_document_keeps_first_outcome() {
        let mut progress = MigrationProgress::new(false);
        progress.observe("ns:a");

        assert!(progress.mark_failed("ns:a", json!({ "status": 408 })));
        assert!(!progress.mark_done("ns:a"));
        assert!(!progress.mark_failed("ns:a", json!({ "status": 500 })));

        assert_eq!(progress.state_of("ns:a"), Some(DocumentState::Failed));
        assert_eq!(progress.failures(), &[json!({ "status": 408 })]);
        let summary = progress.summary(None);
        assert_eq!((summary.done, summary.failed), (0, 1));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!DocumentState::Pending.is_terminal());
        assert!(DocumentState::Done.is_terminal());
        assert!(DocumentState::Failed.is_terminal());
        assert!(DocumentState::Skipped.is_terminal());
    }
}

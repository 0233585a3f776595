//! Migration orchestrator - drives search, step engine and writes for one run
//!
//! All run state lives in `PolicyMigration` and is only touched from the task
//! running `run`. Inbound messages and write deadlines are multiplexed with
//! `tokio::select!`; no locks guard the progress map.

use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::migration::progress::{
    DocumentState, MigrationProgress, MigrationSummary, ProgressReporter, RunPhase,
    TracingProgressReporter,
};
use crate::migration::steps::StepEngine;
use crate::migration::types::PolicyDocument;
use crate::services::client::{
    connect_with_retry, ClientError, CredentialProvider, DittoMessage, HttpTransport, Inbound,
    RetryPolicy, Transport, WebSocketTransport,
};
use crate::services::config::{MigrationConfig, TransportKind};
use crate::services::errors::{MigrationError, MigrationResult};
use crate::services::streaming::{
    dispatch_events, CursorSearch, PolicySearch, SearchError, SearchHandler, SubscriptionSearch,
};

/// Status acknowledging a write in normal mode
pub const WRITE_SUCCESS_STATUS: u16 = 204;
/// Status acknowledging a dry-run write: the unmet precondition was checked
pub const DRY_RUN_SUCCESS_STATUS: u16 = 412;
/// Status recorded when a write gets no response in time
pub const WRITE_TIMEOUT_STATUS: u16 = 408;

pub struct PolicyMigration {
    config: MigrationConfig,
    transport: Arc<dyn Transport>,
    search: Box<dyn PolicySearch>,
    reporter: Arc<dyn ProgressReporter>,
    engine: StepEngine,
    retry: RetryPolicy,
    progress: MigrationProgress,
    queue: VecDeque<PolicyDocument>,
    phase: RunPhase,
    fatal: Option<MigrationError>,
}

impl PolicyMigration {
    pub fn new(
        config: MigrationConfig,
        transport: Arc<dyn Transport>,
        search: Box<dyn PolicySearch>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            engine: StepEngine::new(config.migrations.clone()),
            retry: RetryPolicy::from_config(&config.retry),
            progress: MigrationProgress::new(config.dry_run),
            transport,
            search,
            reporter,
            queue: VecDeque::new(),
            phase: RunPhase::Connecting,
            fatal: None,
            config,
        }
    }

    /// Wire up transport and search for the configured transport kind.
    ///
    /// The WebSocket transport pairs with the subscription search; HTTP pairs
    /// with cursor paging.
    pub fn from_config(config: MigrationConfig) -> MigrationResult<Self> {
        config.validate()?;

        let endpoint = config.endpoint()?.to_string();
        let http = HttpTransport::client_with_timeout(config.request_timeout())?;
        let credentials = Arc::new(CredentialProvider::new(&config, http.clone()));

        let (transport, search): (Arc<dyn Transport>, Box<dyn PolicySearch>) =
            match config.transport_kind() {
                TransportKind::Websocket => {
                    let transport: Arc<dyn Transport> = Arc::new(WebSocketTransport::new(
                        &endpoint,
                        credentials,
                        config.heartbeat_interval(),
                    ));
                    let search: Box<dyn PolicySearch> =
                        Box::new(SubscriptionSearch::new(&config, transport.clone()));
                    (transport, search)
                }
                TransportKind::Http => {
                    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
                        &endpoint,
                        http.clone(),
                        credentials.clone(),
                    ));
                    let search: Box<dyn PolicySearch> =
                        Box::new(CursorSearch::new(&endpoint, &config, http, credentials));
                    (transport, search)
                }
            };

        let reporter = Arc::new(TracingProgressReporter::new(config.dry_run));
        Ok(Self::new(config, transport, search, reporter))
    }

    /// Run to completion.
    ///
    /// Per-document failures are part of the summary; only connection,
    /// credential and search failures end the run with an error.
    pub async fn run(mut self) -> MigrationResult<MigrationSummary> {
        self.reporter.report_phase(RunPhase::Connecting);
        debug!(
            "Using {} transport, {} search, {} migration steps",
            self.transport.name(),
            self.search.name(),
            self.engine.steps().len()
        );

        let mut inbound = match connect_with_retry(self.transport.as_ref(), &self.retry).await {
            Ok(inbound) => inbound,
            Err(e) => {
                self.reporter.report_error(&e);
                return Err(e);
            }
        };

        self.set_phase(RunPhase::Streaming);
        let result = self.stream(&mut inbound).await;

        if let Err(e) = self.transport.close().await {
            debug!("Closing {} transport: {}", self.transport.name(), e);
        }

        if let Err(e) = result {
            self.reporter.report_error(&e);
            return Err(e);
        }
        Ok(self.finish().await)
    }

    async fn stream(&mut self, inbound: &mut Inbound) -> MigrationResult<()> {
        let events = self.search.start().await?;
        dispatch_events(self, events);

        loop {
            if let Some(error) = self.fatal.take() {
                return Err(error);
            }

            self.dispatch_queued().await?;

            if self.is_drained() {
                return Ok(());
            }

            if self.queue.is_empty() && self.progress.outstanding() == 0 && self.search.is_ready() {
                let events = self.search.request_more().await?;
                dispatch_events(self, events);
                continue;
            }

            if self.search.is_complete() {
                self.set_phase(RunPhase::Draining);
            }

            let deadline = self.progress.next_deadline();
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => {
                        return Err(MigrationError::Transport {
                            source: ClientError::ConnectionClosed {
                                reason: "inbound channel closed".to_string(),
                            },
                            context: format!(
                                "{} writes outstanding, search complete: {}",
                                self.progress.outstanding(),
                                self.search.is_complete()
                            ),
                        });
                    }
                },
                _ = wait_for(deadline) => self.expire_writes(),
            }
        }
    }

    fn is_drained(&self) -> bool {
        self.search.is_complete() && self.queue.is_empty() && self.progress.outstanding() == 0
    }

    fn set_phase(&mut self, phase: RunPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.reporter.report_phase(phase);
        }
    }

    /// Send queued writes while below the in-flight ceiling
    async fn dispatch_queued(&mut self) -> MigrationResult<()> {
        while self.progress.outstanding() < self.config.max_in_flight {
            let Some(policy) = self.queue.pop_front() else {
                break;
            };
            self.write(policy).await?;
        }
        Ok(())
    }

    async fn write(&mut self, policy: PolicyDocument) -> MigrationResult<()> {
        let correlation_id = Uuid::new_v4().to_string();
        let message = match DittoMessage::modify_policy(&policy, &correlation_id, self.config.dry_run) {
            Ok(message) => message,
            Err(e) => {
                self.record_failure(&policy.id, json!({ "error": "serialization", "message": e.to_string() }));
                return Ok(());
            }
        };

        let deadline = Instant::now() + self.config.write_timeout();
        self.progress.register_write(&correlation_id, &policy.id, deadline);

        match self.transport.send(message).await {
            Ok(()) => Ok(()),
            Err(e @ (ClientError::NotReady | ClientError::ConnectionClosed { .. })) => {
                Err(MigrationError::from(e).with_context("sending modify command"))
            }
            Err(e) => {
                self.progress.complete_write(&correlation_id);
                self.record_failure(
                    &policy.id,
                    json!({
                        "headers": { "correlation-id": correlation_id },
                        "error": "transport",
                        "message": e.to_string(),
                    }),
                );
                Ok(())
            }
        }
    }

    fn handle_message(&mut self, message: DittoMessage) {
        if let Some(events) = self.search.handle_message(&message) {
            dispatch_events(self, events);
            return;
        }

        match message.correlation_id().map(str::to_string) {
            Some(cid) if self.progress.is_pending_write(&cid) => self.handle_response(&cid, message),
            _ => debug!("Unexpected message received: {:?}", message),
        }
    }

    fn handle_response(&mut self, correlation_id: &str, response: DittoMessage) {
        let Some(policy_id) = self.progress.complete_write(correlation_id) else {
            return;
        };

        let expected = if self.config.dry_run {
            DRY_RUN_SUCCESS_STATUS
        } else {
            WRITE_SUCCESS_STATUS
        };

        if response.status == Some(expected) {
            if self.progress.mark_done(&policy_id) {
                self.reporter.report_document(&policy_id, DocumentState::Done);
            }
            return;
        }

        let detail = |key: &str| {
            response
                .value
                .as_ref()
                .and_then(|v| v.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        warn!(
            "{} failed: [{}] {}",
            correlation_id,
            detail("error"),
            detail("message")
        );
        let payload = serde_json::to_value(&response).unwrap_or(Value::Null);
        self.record_failure(&policy_id, payload);
    }

    fn expire_writes(&mut self) {
        let timeout = self.config.write_timeout();
        for (correlation_id, policy_id) in self.progress.take_expired(Instant::now()) {
            warn!("No response for {} within {}s", policy_id, timeout.as_secs());
            self.record_failure(&policy_id, timeout_payload(&correlation_id, &policy_id, timeout));
        }
    }

    fn record_failure(&mut self, policy_id: &str, payload: Value) {
        if self.progress.mark_failed(policy_id, payload) {
            self.reporter.report_document(policy_id, DocumentState::Failed);
        }
    }

    async fn finish(&mut self) -> MigrationSummary {
        self.set_phase(RunPhase::Finished);

        let mut failed_report = None;
        if !self.progress.failures().is_empty() {
            let path = self.config.failed_report_path.clone();
            match write_failure_report(&path, self.progress.failures()).await {
                Ok(()) => failed_report = Some(path),
                Err(e) => self.reporter.report_error(&e),
            }
        }

        let summary = self.progress.summary(failed_report);
        self.reporter.report_completion(&summary);
        summary
    }
}

impl SearchHandler for PolicyMigration {
    fn on_next(&mut self, mut policy: PolicyDocument) {
        if !self.progress.observe(&policy.id) {
            debug!("Policy {} already processed", policy.id);
            return;
        }
        self.reporter.report_document(&policy.id, DocumentState::Pending);

        if self.engine.apply_all(&mut policy) {
            self.queue.push_back(policy);
        } else {
            if self.progress.mark_skipped(&policy.id) {
                self.reporter.report_document(&policy.id, DocumentState::Skipped);
            }
        }
    }

    fn on_invalid(&mut self, id: String, payload: Value) {
        if self.progress.observe(&id) {
            warn!("Policy {} is malformed: {}", id, payload);
            self.record_failure(&id, payload);
        }
    }

    fn on_complete(&mut self) {
        debug!("Search complete, {} policies found", self.search.result_count());
        if self.progress.observed() == 0 {
            info!("Search returned an empty result. No Policy migrated.");
        }
    }

    fn on_error(&mut self, error: Value) {
        self.fatal = Some(SearchError::SubscriptionFailed { payload: error }.into());
    }
}

fn timeout_payload(correlation_id: &str, policy_id: &str, timeout: Duration) -> Value {
    json!({
        "headers": { "correlation-id": correlation_id },
        "status": WRITE_TIMEOUT_STATUS,
        "value": {
            "status": WRITE_TIMEOUT_STATUS,
            "error": "migration:write.timeout",
            "message": format!("No response within {}s", timeout.as_secs()),
            "policyId": policy_id,
        }
    })
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Write the raw failure payloads as a JSON array
pub async fn write_failure_report(path: &Path, failures: &[Value]) -> MigrationResult<()> {
    let report_error = |reason: String| MigrationError::Report {
        path: path.display().to_string(),
        reason,
    };
    let body = serde_json::to_vec_pretty(failures).map_err(|e| report_error(e.to_string()))?;
    tokio::fs::write(path, body)
        .await
        .map_err(|e| report_error(e.to_string()))
}
